//! Per-node identity: directories, validator files, account key and node
//! configuration.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::{
    config::TestnetConfig,
    crypto::PubKey,
    error::{BoxError, TestnetError},
    keyring::{KeyRecord, Keyring, LocalKeyring, generate_save_coin_key, signing_algo_from_str},
    node_config::{AppConfig, NodeConfig, calculate_ip, initialize_node_validator_files},
    utils::{ensure_dir, to_json_pretty, write_secret_file},
};

pub const KEY_SEED_FILE: &str = "key_seed.json";

/// Everything later phases need to know about one provisioned node.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub index: usize,
    pub name: String,
    pub home: PathBuf,
    pub node_id: String,
    pub validator_pub_key: PubKey,
    pub account: KeyRecord,
}

/// A provisioned node together with the keyring holding its account key.
pub struct ProvisionedNode {
    pub identity: NodeIdentity,
    pub keyring: Box<dyn Keyring>,
}

#[derive(Serialize)]
struct KeySeed<'a> {
    secret: &'a str,
}

/// Creates node `index` under the output directory.
pub fn provision_node(
    config: &TestnetConfig,
    index: usize,
) -> Result<ProvisionedNode, TestnetError> {
    let name = config.node_name(index);
    let home = config.node_home(index);
    let fail = |e: BoxError| TestnetError::provisioning(&name, e);

    ensure_dir(&home.join("config")).map_err(|e| fail(e.into()))?;

    let ip = calculate_ip(config.starting_ip, index as u32).map_err(|e| fail(e.into()))?;
    let node_config = NodeConfig::new(&home, &name, ip);
    let (node_id, validator_pub_key) =
        initialize_node_validator_files(&node_config).map_err(|e| fail(e.into()))?;

    let mut keyring =
        LocalKeyring::open(config.keyring_backend, &home, config.keyring_passphrase.clone())
            .map_err(|e| fail(e.into()))?;
    let algo = signing_algo_from_str(config.algo.name(), &keyring).map_err(|e| fail(e.into()))?;
    let (account, secret) =
        generate_save_coin_key(&mut keyring, &name, true, algo).map_err(|e| fail(e.into()))?;

    let seed = to_json_pretty(&KeySeed { secret: &secret }).map_err(|e| fail(e.into()))?;
    write_secret_file(KEY_SEED_FILE, &home, &seed).map_err(|e| fail(e.into()))?;

    node_config.write().map_err(|e| fail(e.into()))?;
    AppConfig::for_testnet(&config.chain_id, &config.minimum_gas_prices)
        .write(&node_config.config_dir())
        .map_err(|e| fail(e.into()))?;

    info!(node = %name, node_id = %node_id, address = %account.address, %ip, "provisioned node");
    Ok(ProvisionedNode {
        identity: NodeIdentity { index, name, home, node_id, validator_pub_key, account },
        keyring: Box::new(keyring),
    })
}
