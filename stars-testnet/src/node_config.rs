//! Per-node configuration files and validator key files.

use std::{
    fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    crypto::{self, PubKey},
    error::PathError,
    utils::{self, write_file, write_secret_file},
};

pub const P2P_PORT: u16 = 26656;
pub const RPC_LISTEN_ADDRESS: &str = "tcp://0.0.0.0:26657";

const PRIV_KEY_TYPE: &str = "tendermint/PrivKeyEd25519";
const PUB_KEY_TYPE: &str = "tendermint/PubKeyEd25519";

#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error(transparent)]
    Io(#[from] PathError),

    #[error("failed to encode {file}: {reason}")]
    Encode { file: &'static str, reason: String },

    #[error("failed to decode {file}: {reason}")]
    Decode { file: String, reason: String },

    #[error("starting IP {start} cannot be advanced by {offset}")]
    IpOverflow { start: Ipv4Addr, offset: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub laddr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pConfig {
    pub laddr: String,
    pub external_address: String,
    pub persistent_peers: String,
    pub addr_book_strict: bool,
    pub allow_duplicate_ip: bool,
}

/// Subset of the consensus engine's `config.toml` the testnet controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(skip)]
    pub root: PathBuf,
    pub moniker: String,
    pub genesis_file: String,
    pub priv_validator_key_file: String,
    pub priv_validator_state_file: String,
    pub node_key_file: String,
    pub rpc: RpcConfig,
    pub p2p: P2pConfig,
}

impl NodeConfig {
    pub fn new(root: &Path, moniker: &str, external_ip: Ipv4Addr) -> Self {
        Self {
            root: root.to_path_buf(),
            moniker: moniker.to_string(),
            genesis_file: "config/genesis.json".to_string(),
            priv_validator_key_file: "config/priv_validator_key.json".to_string(),
            priv_validator_state_file: "data/priv_validator_state.json".to_string(),
            node_key_file: "config/node_key.json".to_string(),
            rpc: RpcConfig { laddr: RPC_LISTEN_ADDRESS.to_string() },
            p2p: P2pConfig {
                laddr: format!("tcp://0.0.0.0:{P2P_PORT}"),
                external_address: format!("{external_ip}:{P2P_PORT}"),
                persistent_peers: String::new(),
                addr_book_strict: false,
                allow_duplicate_ip: true,
            },
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn genesis_file_path(&self) -> PathBuf {
        self.root.join(&self.genesis_file)
    }

    pub fn node_key_path(&self) -> PathBuf {
        self.root.join(&self.node_key_file)
    }

    pub fn priv_validator_key_path(&self) -> PathBuf {
        self.root.join(&self.priv_validator_key_file)
    }

    pub fn priv_validator_state_path(&self) -> PathBuf {
        self.root.join(&self.priv_validator_state_file)
    }

    pub fn write(&self) -> Result<PathBuf, NodeConfigError> {
        let contents = toml::to_string(self)
            .map_err(|e| NodeConfigError::Encode { file: "config.toml", reason: e.to_string() })?;
        Ok(write_file("config.toml", &self.config_dir(), contents.as_bytes())?)
    }

    pub fn load(root: &Path) -> Result<Self, NodeConfigError> {
        let path = root.join("config").join("config.toml");
        let contents =
            fs::read_to_string(&path).map_err(|e| PathError::new("read", &path, e))?;
        let mut config: NodeConfig = toml::from_str(&contents).map_err(|e| {
            NodeConfigError::Decode { file: path.display().to_string(), reason: e.to_string() }
        })?;
        config.root = root.to_path_buf();
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enable: bool,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcConfig {
    pub enable: bool,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub prometheus_retention_time: u64,
    pub enable_hostname_label: bool,
    pub global_labels: Vec<Vec<String>>,
}

/// Application-side `app.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    pub minimum_gas_prices: String,
    pub api: ApiConfig,
    pub grpc: GrpcConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn for_testnet(chain_id: &str, minimum_gas_prices: &str) -> Self {
        Self {
            minimum_gas_prices: minimum_gas_prices.to_string(),
            api: ApiConfig { enable: true, address: "tcp://0.0.0.0:1317".to_string() },
            grpc: GrpcConfig { enable: true, address: "0.0.0.0:9090".to_string() },
            telemetry: TelemetryConfig {
                enabled: true,
                prometheus_retention_time: 60,
                enable_hostname_label: false,
                global_labels: vec![vec!["chain_id".to_string(), chain_id.to_string()]],
            },
        }
    }

    pub fn write(&self, config_dir: &Path) -> Result<PathBuf, NodeConfigError> {
        let contents = toml::to_string(self)
            .map_err(|e| NodeConfigError::Encode { file: "app.toml", reason: e.to_string() })?;
        Ok(write_file("app.toml", config_dir, contents.as_bytes())?)
    }
}

/// Advances the last octets of `start` by `offset`.
pub fn calculate_ip(start: Ipv4Addr, offset: u32) -> Result<Ipv4Addr, NodeConfigError> {
    u32::from(start)
        .checked_add(offset)
        .map(Ipv4Addr::from)
        .ok_or(NodeConfigError::IpOverflow { start, offset })
}

#[derive(Serialize, Deserialize)]
struct TypedKey {
    #[serde(rename = "type")]
    key_type: String,
    value: String,
}

#[derive(Serialize, Deserialize)]
struct NodeKeyFile {
    priv_key: TypedKey,
}

#[derive(Serialize, Deserialize)]
struct PrivValidatorKeyFile {
    address: String,
    pub_key: TypedKey,
    priv_key: TypedKey,
}

#[derive(Serialize, Deserialize)]
struct PrivValidatorState {
    height: String,
    round: i32,
    step: i8,
}

fn encode_priv_key(key: &SigningKey) -> TypedKey {
    TypedKey { key_type: PRIV_KEY_TYPE.to_string(), value: STANDARD.encode(key.to_keypair_bytes()) }
}

fn decode_priv_key(path: &Path, key: &TypedKey) -> Result<SigningKey, NodeConfigError> {
    let corrupt = |reason: String| NodeConfigError::Decode {
        file: path.display().to_string(),
        reason,
    };
    if key.key_type != PRIV_KEY_TYPE {
        return Err(corrupt(format!("unexpected key type {}", key.key_type)));
    }
    let bytes = Zeroizing::new(STANDARD.decode(&key.value).map_err(|e| corrupt(e.to_string()))?);
    let keypair: &[u8; 64] =
        bytes.as_slice().try_into().map_err(|_| corrupt("expected 64 key bytes".to_string()))?;
    SigningKey::from_keypair_bytes(keypair).map_err(|e| corrupt(e.to_string()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, NodeConfigError> {
    let bytes = Zeroizing::new(fs::read(path).map_err(|e| PathError::new("read", path, e))?);
    serde_json::from_slice(&bytes).map_err(|e| NodeConfigError::Decode {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn write_key_json<T: Serialize>(
    path: &Path,
    value: &T,
    file: &'static str,
) -> Result<(), NodeConfigError> {
    let contents = Zeroizing::new(
        utils::to_json_pretty(value)
            .map_err(|e| NodeConfigError::Encode { file, reason: e.to_string() })?,
    );
    let (dir, name) = split_path(path);
    write_secret_file(name, dir, &contents)?;
    Ok(())
}

fn split_path(path: &Path) -> (&Path, &str) {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    (dir, name)
}

#[derive(Clone, Copy)]
enum KeyFile {
    Node,
    Validator,
}

impl KeyFile {
    fn name(self) -> &'static str {
        match self {
            KeyFile::Node => "node_key.json",
            KeyFile::Validator => "priv_validator_key.json",
        }
    }
}

fn load_or_generate(path: &Path, kind: KeyFile) -> Result<SigningKey, NodeConfigError> {
    if path.exists() {
        let priv_key = match kind {
            KeyFile::Node => read_json::<NodeKeyFile>(path)?.priv_key,
            KeyFile::Validator => read_json::<PrivValidatorKeyFile>(path)?.priv_key,
        };
        return decode_priv_key(path, &priv_key);
    }

    let key = SigningKey::generate(&mut rand::thread_rng());
    match kind {
        KeyFile::Node => {
            write_key_json(path, &NodeKeyFile { priv_key: encode_priv_key(&key) }, kind.name())?
        }
        KeyFile::Validator => {
            let pub_key = PubKey::Ed25519(key.verifying_key().to_bytes());
            let stored = PrivValidatorKeyFile {
                address: hex::encode_upper(pub_key.address()),
                pub_key: TypedKey {
                    key_type: PUB_KEY_TYPE.to_string(),
                    value: STANDARD.encode(pub_key.as_bytes()),
                },
                priv_key: encode_priv_key(&key),
            };
            write_key_json(path, &stored, kind.name())?
        }
    }
    Ok(key)
}

/// Loads or creates the node key, the consensus key and the signing state.
///
/// Returns the node ID and the consensus public key.
pub fn initialize_node_validator_files(
    config: &NodeConfig,
) -> Result<(String, PubKey), NodeConfigError> {
    let node_key = load_or_generate(&config.node_key_path(), KeyFile::Node)?;
    let node_id = crypto::node_id(&node_key.verifying_key());

    let validator_key =
        load_or_generate(&config.priv_validator_key_path(), KeyFile::Validator)?;
    let state_path = config.priv_validator_state_path();
    if !state_path.exists() {
        let state = PrivValidatorState { height: "0".to_string(), round: 0, step: 0 };
        let contents = utils::to_json_pretty(&state).map_err(|e| NodeConfigError::Encode {
            file: "priv_validator_state.json",
            reason: e.to_string(),
        })?;
        let (dir, name) = split_path(&state_path);
        write_file(name, dir, &contents)?;
    }

    debug!(moniker = %config.moniker, node_id = %node_id, "initialized validator files");
    Ok((node_id, PubKey::Ed25519(validator_key.verifying_key().to_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_files_are_stable_across_calls() {
        let home = tempfile::tempdir().unwrap();
        let config = NodeConfig::new(home.path(), "node0", Ipv4Addr::new(192, 168, 0, 1));
        let (id, pub_key) = initialize_node_validator_files(&config).unwrap();
        assert_eq!(id.len(), 40);
        assert!(config.priv_validator_state_path().exists());

        let (id_again, pub_key_again) = initialize_node_validator_files(&config).unwrap();
        assert_eq!(id, id_again);
        assert_eq!(pub_key, pub_key_again);
    }

    #[test]
    fn config_toml_round_trips() {
        let home = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::new(home.path(), "node1", Ipv4Addr::new(10, 0, 0, 2));
        config.p2p.persistent_peers = "abc@node0:26656".to_string();
        config.write().unwrap();
        let loaded = NodeConfig::load(home.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.p2p.external_address, "10.0.0.2:26656");
        assert!(!loaded.p2p.addr_book_strict);
    }

    #[test]
    fn app_toml_carries_gas_prices_and_labels() {
        let home = tempfile::tempdir().unwrap();
        let path =
            AppConfig::for_testnet("chain-abc123", "0.000006ustarx").write(home.path()).unwrap();
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains(r#"minimum-gas-prices = "0.000006ustarx""#));
        assert!(contents.contains("chain-abc123"));
    }

    #[test]
    fn ip_calculation_is_checked() {
        let start = Ipv4Addr::new(192, 168, 0, 254);
        assert_eq!(calculate_ip(start, 3).unwrap(), Ipv4Addr::new(192, 168, 1, 1));
        assert!(calculate_ip(Ipv4Addr::BROADCAST, 1).is_err());
    }
}
