use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;

use crate::{error::PathError, utils};

pub const MAX_CHAIN_ID_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error(transparent)]
    Io(#[from] PathError),

    #[error("failed to decode genesis file {file}: {reason}")]
    Decode { file: String, reason: String },

    #[error("failed to encode genesis document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid chain ID {0:?}")]
    InvalidChainId(String),

    #[error("failed to decode {module} genesis state: {reason}")]
    ModuleDecode { module: String, reason: String },

    #[error("invalid {module} genesis state: {reason}")]
    InvalidModule { module: String, reason: String },
}

/// Application state: module name to that module's JSON genesis state.
///
/// Keys and nested object keys serialize in sorted order, so two equal
/// bundles always produce the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppState(BTreeMap<String, Value>);

impl AppState {
    pub fn new(modules: BTreeMap<String, Value>) -> Self {
        Self(modules)
    }

    pub fn get(&self, module: &str) -> Option<&Value> {
        self.0.get(module)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.0.contains_key(module)
    }

    pub fn insert(&mut self, module: &str, state: Value) {
        self.0.insert(module.to_string(), state);
    }

    pub fn modules(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Decodes a module's state, or `None` when the module is absent.
    pub fn decode<T: DeserializeOwned>(&self, module: &str) -> Result<Option<T>, GenesisError> {
        self.0
            .get(module)
            .map(|raw| {
                serde_json::from_value(raw.clone()).map_err(|e| GenesisError::ModuleDecode {
                    module: module.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn encode<T: Serialize>(&mut self, module: &str, state: &T) -> Result<(), GenesisError> {
        self.0.insert(module.to_string(), serde_json::to_value(state)?);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, GenesisError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub address: String,
    pub pub_key: Value,
    pub power: String,
    pub name: String,
}

/// Genesis file shared by every node of the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub genesis_time: DateTime<Utc>,
    pub chain_id: String,
    #[serde(default = "default_initial_height")]
    pub initial_height: String,
    #[serde(default)]
    pub consensus_params: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub app_hash: String,
    pub app_state: AppState,
}

fn default_initial_height() -> String {
    "1".to_string()
}

pub fn default_consensus_params() -> Value {
    json!({
        "block": {
            "max_bytes": "22020096",
            "max_gas": "-1",
            "time_iota_ms": "1000"
        },
        "evidence": {
            "max_age_num_blocks": "100000",
            "max_age_duration": "172800000000000",
            "max_bytes": "1048576"
        },
        "validator": {
            "pub_key_types": ["ed25519"]
        },
        "version": {}
    })
}

impl GenesisDoc {
    pub fn new(chain_id: &str, genesis_time: DateTime<Utc>, app_state: AppState) -> Self {
        Self {
            genesis_time,
            chain_id: chain_id.to_string(),
            initial_height: default_initial_height(),
            consensus_params: default_consensus_params(),
            validators: Vec::new(),
            app_hash: String::new(),
            app_state,
        }
    }

    /// Checks required fields and fills defaults the file may omit.
    pub fn validate_and_complete(&mut self) -> Result<(), GenesisError> {
        if self.chain_id.is_empty() || self.chain_id.len() > MAX_CHAIN_ID_LEN {
            return Err(GenesisError::InvalidChainId(self.chain_id.clone()));
        }
        if self.initial_height.is_empty() {
            self.initial_height = default_initial_height();
        }
        if self.consensus_params.is_null() {
            self.consensus_params = default_consensus_params();
        }
        Ok(())
    }

    pub fn save_as(&mut self, path: &Path) -> Result<PathBuf, GenesisError> {
        self.validate_and_complete()?;
        let contents = utils::to_json_pretty(self)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("genesis.json");
        Ok(utils::write_file(name, dir, &contents)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, GenesisError> {
        let contents = fs::read(path).map_err(|e| PathError::new("read", path, e))?;
        let mut doc: GenesisDoc = serde_json::from_slice(&contents).map_err(|e| {
            GenesisError::Decode { file: path.display().to_string(), reason: e.to_string() }
        })?;
        doc.validate_and_complete()?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn save_and_load_preserve_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut app_state = AppState::default();
        app_state.insert("bank", json!({ "balances": [] }));
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut doc = GenesisDoc::new("chain-abcdef", time, app_state);

        let path = doc.save_as(&dir.path().join("config/genesis.json")).unwrap();
        let loaded = GenesisDoc::from_file(&path).unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.initial_height, "1");
    }

    #[test]
    fn rejects_empty_chain_id() {
        let mut doc = GenesisDoc::new("", Utc::now(), AppState::default());
        assert!(matches!(doc.validate_and_complete(), Err(GenesisError::InvalidChainId(_))));
    }

    #[test]
    fn absent_modules_decode_to_none() {
        let state = AppState::default();
        assert!(state.decode::<Value>("staking").unwrap().is_none());
    }

    #[test]
    fn app_state_bytes_are_key_ordered() {
        let mut state = AppState::default();
        state.insert("staking", json!({ "b": 1, "a": 2 }));
        state.insert("auth", json!({}));
        assert_eq!(state.to_bytes().unwrap(), br#"{"auth":{},"staking":{"a":2,"b":1}}"#);
    }
}
