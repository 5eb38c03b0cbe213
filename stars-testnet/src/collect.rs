//! Gentx collection and canonical genesis fan-out.
//!
//! Collection runs in two phases. Every node first replays all gentxs
//! against its own copy of the template, producing one candidate app state
//! per node. Node 0's candidate is then selected as canonical and written,
//! with a single genesis time, into every node's genesis file.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    coin::{Coin, Coins},
    crypto::PubKey,
    error::{PathError, TestnetError},
    genesis::{AppState, GenesisDoc, GenesisError},
    gentx::{MsgCreateValidator, Tx, TxError},
    modules::{self, BankGenesis, GenutilGenesis, ModuleBasics},
    node_config::{NodeConfig, NodeConfigError},
};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Genesis(#[from] GenesisError),

    #[error(transparent)]
    Tx(#[from] TxError),

    #[error(transparent)]
    NodeConfig(#[from] NodeConfigError),

    #[error(transparent)]
    Io(#[from] PathError),

    #[error("no gentx files found in {0}")]
    NoGentxs(PathBuf),

    #[error("gentx {file}: delegator {address} has no genesis balance")]
    MissingAccount { file: String, address: String },

    #[error("gentx {file}: {address} holds {available} but delegates {required}")]
    InsufficientFunds { file: String, address: String, required: Coin, available: u128 },

    #[error("gentx {file}: memo {memo:?} is not a peer address")]
    InvalidMemo { file: String, memo: String },

    #[error("no gentx registers consensus key of node {0}")]
    MissingOwnGentx(String),
}

/// What the replay routine needs to know about the node it runs for.
#[derive(Debug, Clone)]
pub struct InitConfig<'a> {
    pub chain_id: &'a str,
    pub gentxs_dir: &'a Path,
    pub node_id: &'a str,
    pub validator_pub_key: &'a PubKey,
}

/// Validated gentxs plus the peer list derived from their memos.
#[derive(Debug)]
pub struct CollectedTxs {
    pub txs: Vec<Tx>,
    pub msgs: Vec<MsgCreateValidator>,
    pub persistent_peers: String,
}

fn gentx_files(dir: &Path) -> Result<Vec<PathBuf>, CollectError> {
    let entries = fs::read_dir(dir).map_err(|e| PathError::new("read", dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PathError::new("read", dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(CollectError::NoGentxs(dir.to_path_buf()));
    }
    Ok(files)
}

/// Loads, verifies and funds-checks every gentx in `init.gentxs_dir`.
pub fn collect_txs(
    init: &InitConfig<'_>,
    balances: &BTreeMap<String, Coins>,
) -> Result<CollectedTxs, CollectError> {
    let mut txs = Vec::new();
    let mut msgs = Vec::new();
    let mut peers = BTreeSet::new();

    for path in gentx_files(init.gentxs_dir)? {
        let file = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let tx = Tx::from_file(&path)?;
        let msg = tx.verify(init.chain_id)?;

        let coins = balances.get(&msg.delegator_address).ok_or_else(|| {
            CollectError::MissingAccount {
                file: file.clone(),
                address: msg.delegator_address.clone(),
            }
        })?;
        let available = coins.amount_of(&msg.value.denom);
        if available < msg.value.amount {
            return Err(CollectError::InsufficientFunds {
                file,
                address: msg.delegator_address.clone(),
                required: msg.value.clone(),
                available,
            });
        }

        let memo = tx.body.memo.clone();
        let peer_id = match memo.split_once('@') {
            Some((id, host)) if !id.is_empty() && !host.is_empty() => id,
            _ => return Err(CollectError::InvalidMemo { file, memo }),
        };
        if peer_id != init.node_id {
            peers.insert(memo.clone());
        }

        debug!(file = %file, validator = %msg.validator_address, "accepted gentx");
        txs.push(tx);
        msgs.push(msg);
    }

    Ok(CollectedTxs {
        txs,
        msgs,
        persistent_peers: peers.into_iter().collect::<Vec<_>>().join(","),
    })
}

/// Replays every gentx against `genesis` and returns the resulting app state.
///
/// Also points the node's `persistent_peers` at every other validator.
pub fn gen_app_state_from_config(
    basics: &ModuleBasics,
    node_config: &mut NodeConfig,
    init: &InitConfig<'_>,
    genesis: &GenesisDoc,
) -> Result<AppState, CollectError> {
    let bank: BankGenesis = genesis.app_state.decode(modules::BANK)?.ok_or_else(|| {
        GenesisError::InvalidModule {
            module: modules::BANK.to_string(),
            reason: "missing from genesis".to_string(),
        }
    })?;
    let balances: BTreeMap<String, Coins> =
        bank.balances.into_iter().map(|b| (b.address, b.coins)).collect();

    let collected = collect_txs(init, &balances)?;
    if !collected.msgs.iter().any(|m| &m.pubkey == init.validator_pub_key) {
        return Err(CollectError::MissingOwnGentx(init.node_id.to_string()));
    }

    node_config.p2p.persistent_peers = collected.persistent_peers;
    node_config.write()?;

    let mut app_state = genesis.app_state.clone();
    let gen_txs = collected
        .txs
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(GenesisError::from)?;
    app_state.encode(modules::GENUTIL, &GenutilGenesis { gen_txs })?;
    basics.validate_genesis(&app_state)?;
    Ok(app_state)
}

/// One node as seen by the collector.
#[derive(Debug, Clone)]
pub struct CollectTarget {
    pub name: String,
    pub home: PathBuf,
    pub node_id: String,
    pub validator_pub_key: PubKey,
}

impl CollectTarget {
    pub fn genesis_file(&self) -> PathBuf {
        self.home.join("config").join("genesis.json")
    }
}

/// Result of a completed collection.
#[derive(Debug, Clone)]
pub struct CollectedGenesis {
    pub app_state: AppState,
    pub genesis_time: DateTime<Utc>,
    pub files: Vec<PathBuf>,
}

/// Phase one: every node independently replays the gentxs.
pub fn compute_candidates(
    basics: &ModuleBasics,
    chain_id: &str,
    gentxs_dir: &Path,
    targets: &[CollectTarget],
) -> Result<Vec<AppState>, TestnetError> {
    targets
        .iter()
        .map(|target| {
            let genesis = GenesisDoc::from_file(&target.genesis_file())
                .map_err(|e| TestnetError::collection(&target.name, e))?;
            let mut node_config = NodeConfig::load(&target.home)
                .map_err(|e| TestnetError::collection(&target.name, e))?;
            let init = InitConfig {
                chain_id,
                gentxs_dir,
                node_id: &target.node_id,
                validator_pub_key: &target.validator_pub_key,
            };
            let state = gen_app_state_from_config(basics, &mut node_config, &init, &genesis)
                .map_err(|e| TestnetError::collection(&target.name, e))?;
            debug!(node = %target.name, "computed candidate app state");
            Ok(state)
        })
        .collect()
}

/// Phase two, first step: node 0's candidate becomes canonical; the rest are
/// discarded.
pub fn select_canonical(candidates: Vec<AppState>) -> Option<AppState> {
    let mut candidates = candidates.into_iter();
    let canonical = candidates.next()?;
    for (offset, candidate) in candidates.enumerate() {
        if candidate != canonical {
            warn!(node_index = offset + 1, "discarding divergent candidate app state");
        }
    }
    Some(canonical)
}

/// Phase two, second step: write the canonical state with one genesis time
/// into every node's genesis file.
pub fn broadcast(
    chain_id: &str,
    canonical: &AppState,
    genesis_time: DateTime<Utc>,
    targets: &[CollectTarget],
) -> Result<Vec<PathBuf>, TestnetError> {
    targets
        .iter()
        .map(|target| {
            let mut doc = GenesisDoc::new(chain_id, genesis_time, canonical.clone());
            doc.save_as(&target.genesis_file())
                .map_err(|e| TestnetError::collection(&target.name, e))
        })
        .collect()
}

/// Collects every node's genesis and fans out the canonical result.
pub fn collect_gen_files(
    basics: &ModuleBasics,
    chain_id: &str,
    gentxs_dir: &Path,
    targets: &[CollectTarget],
    genesis_time: DateTime<Utc>,
) -> Result<CollectedGenesis, TestnetError> {
    let candidates = compute_candidates(basics, chain_id, gentxs_dir, targets)?;
    let app_state = select_canonical(candidates).ok_or_else(|| {
        TestnetError::Configuration("cannot collect genesis for zero validators".to_string())
    })?;
    let files = broadcast(chain_id, &app_state, genesis_time, targets)?;
    info!(nodes = files.len(), genesis_time = %genesis_time, "wrote canonical genesis");
    Ok(CollectedGenesis { app_state, genesis_time, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_candidate_is_canonical() {
        let mut first = AppState::default();
        first.insert("genutil", json!({ "gen_txs": ["a"] }));
        let mut second = AppState::default();
        second.insert("genutil", json!({ "gen_txs": ["b"] }));
        assert_eq!(select_canonical(vec![first.clone(), second]), Some(first));
        assert_eq!(select_canonical(Vec::new()), None);
    }

    #[test]
    fn empty_gentx_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let key = PubKey::Ed25519([0u8; 32]);
        let init = InitConfig {
            chain_id: "chain-test01",
            gentxs_dir: dir.path(),
            node_id: "abcd",
            validator_pub_key: &key,
        };
        assert!(matches!(collect_txs(&init, &BTreeMap::new()), Err(CollectError::NoGentxs(_))));
    }

    #[test]
    fn missing_gentx_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let key = PubKey::Ed25519([0u8; 32]);
        let missing = dir.path().join("gentxs");
        let init = InitConfig {
            chain_id: "chain-test01",
            gentxs_dir: &missing,
            node_id: "abcd",
            validator_pub_key: &key,
        };
        assert!(matches!(collect_txs(&init, &BTreeMap::new()), Err(CollectError::Io(_))));
    }
}
