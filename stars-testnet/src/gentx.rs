//! Signed create-validator transactions ("gentxs").

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::{
    coin::{Coin, CoinError, Coins},
    crypto::{self, KeyError, PubKey},
    error::PathError,
    keyring::{Keyring, KeyringError},
    node_config::P2P_PORT,
    utils,
};

pub const CREATE_VALIDATOR_TYPE_URL: &str = "/cosmos.staking.v1beta1.MsgCreateValidator";
const CREATE_VALIDATOR_AMINO_TYPE: &str = "cosmos-sdk/MsgCreateValidator";
const SIGN_MODE_LEGACY_AMINO_JSON: &str = "SIGN_MODE_LEGACY_AMINO_JSON";
pub const GENTX_GAS_LIMIT: u64 = 200_000;

const DEC_PRECISION: u32 = 18;
const DEC_ONE: u128 = 10u128.pow(DEC_PRECISION);

#[derive(Debug, Error)]
pub enum TxError {
    #[error("invalid self-delegation amount {0}")]
    InvalidAmount(u128),

    #[error(transparent)]
    Coin(#[from] CoinError),

    #[error("invalid commission: {0}")]
    InvalidCommission(String),

    #[error("invalid decimal {0:?}")]
    InvalidDecimal(String),

    #[error(transparent)]
    Keyring(#[from] KeyringError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("expected exactly one message, found {0}")]
    MessageCount(usize),

    #[error("unexpected message type {0:?}")]
    MessageType(String),

    #[error("expected exactly one signature, found {0}")]
    SignatureCount(usize),

    #[error("signer {signer} does not match delegator {delegator}")]
    SignerMismatch { signer: String, delegator: String },

    #[error("failed to encode transaction: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to decode gentx {file}: {reason}")]
    Decode { file: String, reason: String },

    #[error(transparent)]
    Io(#[from] PathError),
}

/// Fixed-point decimal with 18 fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dec(u128);

impl Dec {
    pub const ONE: Dec = Dec(DEC_ONE);

    /// `value * 10^-prec`, e.g. `with_prec(5, 2)` is 0.05.
    pub fn with_prec(value: u128, prec: u32) -> Self {
        Dec(value * 10u128.pow(DEC_PRECISION - prec))
    }
}

impl fmt::Display for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:018}", self.0 / DEC_ONE, self.0 % DEC_ONE)
    }
}

impl FromStr for Dec {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TxError::InvalidDecimal(s.to_string());
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));
        if frac.len() > DEC_PRECISION as usize || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let int: u128 = int.parse().map_err(|_| invalid())?;
        let frac: u128 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<18}").parse().map_err(|_| invalid())?
        };
        int.checked_mul(DEC_ONE).and_then(|v| v.checked_add(frac)).map(Dec).ok_or_else(invalid)
    }
}

impl Serialize for Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub moniker: String,
    pub identity: String,
    pub website: String,
    pub security_contact: String,
    pub details: String,
}

impl Description {
    pub fn new(moniker: &str) -> Self {
        Self { moniker: moniker.to_string(), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRates {
    pub rate: Dec,
    pub max_rate: Dec,
    pub max_change_rate: Dec,
}

impl CommissionRates {
    /// 5% rate, 25% max rate, 5% max daily change.
    pub fn testnet_default() -> Self {
        Self {
            rate: Dec::with_prec(5, 2),
            max_rate: Dec::with_prec(25, 2),
            max_change_rate: Dec::with_prec(5, 2),
        }
    }

    pub fn validate(&self) -> Result<(), TxError> {
        if self.max_rate > Dec::ONE {
            return Err(TxError::InvalidCommission("max rate above 100%".to_string()));
        }
        if self.rate > self.max_rate {
            return Err(TxError::InvalidCommission("rate above max rate".to_string()));
        }
        if self.max_change_rate > self.max_rate {
            return Err(TxError::InvalidCommission("max change rate above max rate".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateValidator {
    pub description: Description,
    pub commission: CommissionRates,
    pub min_self_delegation: String,
    pub delegator_address: String,
    pub validator_address: String,
    pub pubkey: PubKey,
    pub value: Coin,
}

impl MsgCreateValidator {
    pub fn new(
        delegator: &PubKey,
        consensus_pub_key: PubKey,
        value: Coin,
        description: Description,
        commission: CommissionRates,
    ) -> Result<Self, TxError> {
        if value.amount == 0 {
            return Err(TxError::InvalidAmount(value.amount));
        }
        Coin::new(value.denom.as_str(), value.amount)?;
        commission.validate()?;
        Ok(Self {
            description,
            commission,
            min_self_delegation: "1".to_string(),
            delegator_address: crypto::account_address(delegator)?,
            validator_address: crypto::validator_address(delegator)?,
            pubkey: consensus_pub_key,
            value,
        })
    }

    fn to_any(&self) -> Result<Value, TxError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("@type".to_string(), Value::String(CREATE_VALIDATOR_TYPE_URL.to_string()));
        }
        Ok(value)
    }

    fn from_any(value: &Value) -> Result<Self, TxError> {
        let type_url = value.get("@type").and_then(Value::as_str).unwrap_or_default();
        if type_url != CREATE_VALIDATOR_TYPE_URL {
            return Err(TxError::MessageType(type_url.to_string()));
        }
        let mut value = value.clone();
        if let Value::Object(map) = &mut value {
            map.remove("@type");
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxBody {
    pub messages: Vec<Value>,
    pub memo: String,
    pub timeout_height: String,
    pub extension_options: Vec<Value>,
    pub non_critical_extension_options: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleMode {
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub single: SingleMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    pub public_key: PubKey,
    pub mode_info: ModeInfo,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub amount: Coins,
    pub gas_limit: String,
    pub payer: String,
    pub granter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub signer_infos: Vec<SignerInfo>,
    pub fee: Fee,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub body: TxBody,
    pub auth_info: AuthInfo,
    pub signatures: Vec<String>,
}

impl Tx {
    fn unsigned(msg: &MsgCreateValidator, memo: &str) -> Result<Self, TxError> {
        Ok(Self {
            body: TxBody {
                messages: vec![msg.to_any()?],
                memo: memo.to_string(),
                timeout_height: "0".to_string(),
                extension_options: Vec::new(),
                non_critical_extension_options: Vec::new(),
            },
            auth_info: AuthInfo {
                signer_infos: Vec::new(),
                fee: Fee {
                    amount: Coins::default(),
                    gas_limit: GENTX_GAS_LIMIT.to_string(),
                    payer: String::new(),
                    granter: String::new(),
                },
            },
            signatures: Vec::new(),
        })
    }

    /// The single create-validator message this gentx must carry.
    pub fn create_validator_msg(&self) -> Result<MsgCreateValidator, TxError> {
        match self.body.messages.as_slice() {
            [msg] => MsgCreateValidator::from_any(msg),
            msgs => Err(TxError::MessageCount(msgs.len())),
        }
    }

    /// Legacy amino-JSON sign bytes: sorted, compact JSON of the sign doc.
    pub fn sign_bytes(&self, chain_id: &str) -> Result<Vec<u8>, TxError> {
        let msgs = self
            .body
            .messages
            .iter()
            .map(|m| {
                let msg = MsgCreateValidator::from_any(m)?;
                Ok(json!({ "type": CREATE_VALIDATOR_AMINO_TYPE, "value": msg }))
            })
            .collect::<Result<Vec<_>, TxError>>()?;
        let doc = json!({
            "account_number": "0",
            "chain_id": chain_id,
            "fee": {
                "amount": self.auth_info.fee.amount,
                "gas": self.auth_info.fee.gas_limit,
            },
            "memo": self.body.memo,
            "msgs": msgs,
            "sequence": "0",
        });
        Ok(utils::to_sorted_json(&doc)?)
    }

    /// Checks the sole signature and that the signer is the delegator.
    pub fn verify(&self, chain_id: &str) -> Result<MsgCreateValidator, TxError> {
        let msg = self.create_validator_msg()?;
        let signers = (self.auth_info.signer_infos.as_slice(), self.signatures.as_slice());
        let (signer, signature) = match signers {
            ([signer], [signature]) => (signer, signature),
            (_, signatures) => return Err(TxError::SignatureCount(signatures.len())),
        };
        let signer_address = crypto::account_address(&signer.public_key)?;
        if signer_address != msg.delegator_address {
            return Err(TxError::SignerMismatch {
                signer: signer_address,
                delegator: msg.delegator_address,
            });
        }
        let signature = STANDARD.decode(signature).map_err(KeyError::from)?;
        signer.public_key.verify(&self.sign_bytes(chain_id)?, &signature)?;
        Ok(msg)
    }

    pub fn from_file(path: &Path) -> Result<Self, TxError> {
        let contents = std::fs::read(path).map_err(|e| PathError::new("read", path, e))?;
        serde_json::from_slice(&contents).map_err(|e| TxError::Decode {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// `nodeID@nodeName:26656`
pub fn peer_memo(node_id: &str, node_name: &str) -> String {
    format!("{node_id}@{node_name}:{P2P_PORT}")
}

/// Inputs for one node's gentx.
#[derive(Debug, Clone)]
pub struct GentxRequest<'a> {
    pub chain_id: &'a str,
    pub key_name: &'a str,
    pub moniker: &'a str,
    pub memo: String,
    pub consensus_pub_key: PubKey,
    pub self_delegation: Coin,
}

/// Builds and signs a create-validator transaction with the node's own key.
pub fn build_gentx(keyring: &dyn Keyring, request: &GentxRequest<'_>) -> Result<Tx, TxError> {
    let record = keyring.key(request.key_name)?;
    let msg = MsgCreateValidator::new(
        &record.pub_key,
        request.consensus_pub_key.clone(),
        request.self_delegation.clone(),
        Description::new(request.moniker),
        CommissionRates::testnet_default(),
    )?;

    let mut tx = Tx::unsigned(&msg, &request.memo)?;
    let (signature, pub_key) = keyring.sign(request.key_name, &tx.sign_bytes(request.chain_id)?)?;
    tx.auth_info.signer_infos.push(SignerInfo {
        public_key: pub_key,
        mode_info: ModeInfo {
            single: SingleMode { mode: SIGN_MODE_LEGACY_AMINO_JSON.to_string() },
        },
        sequence: "0".to_string(),
    });
    tx.signatures.push(STANDARD.encode(signature));

    debug!(moniker = request.moniker, validator = %msg.validator_address, "signed gentx");
    Ok(tx)
}

/// Writes `<dir>/<node_name>.json`.
pub fn write_gentx(dir: &Path, node_name: &str, tx: &Tx) -> Result<PathBuf, TxError> {
    let contents = serde_json::to_vec(tx)?;
    Ok(utils::write_file(&format!("{node_name}.json"), dir, &contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::SigningAlgo,
        keyring::{KeyringBackend, LocalKeyring, generate_save_coin_key},
    };

    fn signed_tx(chain_id: &str) -> (Tx, tempfile::TempDir) {
        let home = tempfile::tempdir().unwrap();
        let mut keyring = LocalKeyring::open(KeyringBackend::Memory, home.path(), None).unwrap();
        generate_save_coin_key(&mut keyring, "node0", false, SigningAlgo::Secp256k1).unwrap();
        let request = GentxRequest {
            chain_id,
            key_name: "node0",
            moniker: "node0",
            memo: peer_memo("abcd", "node0"),
            consensus_pub_key: PubKey::Ed25519([3u8; 32]),
            self_delegation: Coin::new("ustarx", 100_000_000).unwrap(),
        };
        (build_gentx(&keyring, &request).unwrap(), home)
    }

    #[test]
    fn gentx_verifies_for_its_chain_only() {
        let (tx, _home) = signed_tx("chain-test01");
        let msg = tx.verify("chain-test01").unwrap();
        assert_eq!(msg.description.moniker, "node0");
        assert_eq!(msg.value.amount, 100_000_000);
        assert_eq!(tx.body.memo, "abcd@node0:26656");
        assert!(matches!(
            tx.verify("chain-other"),
            Err(TxError::Key(KeyError::VerificationFailed))
        ));
    }

    #[test]
    fn commission_rates_serialize_with_eighteen_decimals() {
        let (tx, _home) = signed_tx("chain-test01");
        let commission = &tx.body.messages[0]["commission"];
        assert_eq!(commission["rate"], "0.050000000000000000");
        assert_eq!(commission["max_rate"], "0.250000000000000000");
        assert_eq!(commission["max_change_rate"], "0.050000000000000000");
        assert_eq!(tx.body.messages[0]["@type"], CREATE_VALIDATOR_TYPE_URL);
    }

    #[test]
    fn rejects_zero_self_delegation() {
        let err = MsgCreateValidator::new(
            &PubKey::Secp256k1([2u8; 33]),
            PubKey::Ed25519([1u8; 32]),
            Coin { denom: "ustarx".to_string(), amount: 0 },
            Description::new("node0"),
            CommissionRates::testnet_default(),
        )
        .unwrap_err();
        assert!(matches!(err, TxError::InvalidAmount(0)));
    }

    #[test]
    fn tampered_memo_breaks_signature() {
        let (mut tx, _home) = signed_tx("chain-test01");
        tx.body.memo = "evil@node9:26656".to_string();
        assert!(tx.verify("chain-test01").is_err());
    }

    #[test]
    fn decimals_parse_and_order() {
        assert_eq!("0.05".parse::<Dec>().unwrap(), Dec::with_prec(5, 2));
        assert!(Dec::with_prec(25, 2) < Dec::ONE);
        assert!("1.2.3".parse::<Dec>().is_err());
    }
}
