//! # Keys and Addresses
//!
//! Account keys are secp256k1, derived from a BIP-39 mnemonic along the
//! standard Cosmos HD path. Node and consensus keys are ed25519.
//!
//! ## Encodings
//!
//! - Account address: bech32 of `ripemd160(sha256(compressed pubkey))`
//! - Validator operator address: same bytes, operator prefix
//! - Node ID: lowercase hex of the first 20 bytes of `sha256(pubkey)`

use std::{fmt, str::FromStr};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bech32::{Bech32, Hrp};
use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use k256::{
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::{Signer as _, Verifier as _},
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand::RngCore;
use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

pub const ACCOUNT_ADDRESS_PREFIX: &str = "stars";
pub const VALIDATOR_ADDRESS_PREFIX: &str = "starsvaloper";

pub const FULL_FUNDRAISER_PATH: &str = "m/44'/118'/0'/0/0";

const MNEMONIC_ENTROPY_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unknown signing algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("HD derivation failed: {0}")]
    Derivation(#[from] bip32::Error),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("invalid base64 key material: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Signing algorithms the keyring may be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningAlgo {
    Secp256k1,
    Ed25519,
}

impl SigningAlgo {
    pub fn name(&self) -> &'static str {
        match self {
            SigningAlgo::Secp256k1 => "secp256k1",
            SigningAlgo::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for SigningAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SigningAlgo {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" => Ok(SigningAlgo::Secp256k1),
            "ed25519" => Ok(SigningAlgo::Ed25519),
            other => Err(KeyError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Public key tagged with its algorithm.
///
/// Serialized the way the chain encodes `Any` public keys in JSON:
/// `{"@type": "/cosmos.crypto.secp256k1.PubKey", "key": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubKey {
    Secp256k1([u8; 33]),
    Ed25519([u8; 32]),
}

impl PubKey {
    pub fn type_url(&self) -> &'static str {
        match self {
            PubKey::Secp256k1(_) => "/cosmos.crypto.secp256k1.PubKey",
            PubKey::Ed25519(_) => "/cosmos.crypto.ed25519.PubKey",
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PubKey::Secp256k1(bytes) => bytes,
            PubKey::Ed25519(bytes) => bytes,
        }
    }

    /// 20-byte address of this key.
    pub fn address(&self) -> [u8; 20] {
        let sha = Sha256::digest(self.as_bytes());
        match self {
            PubKey::Secp256k1(_) => Ripemd160::digest(sha).into(),
            PubKey::Ed25519(_) => {
                let mut out = [0u8; 20];
                out.copy_from_slice(&sha[..20]);
                out
            }
        }
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        match self {
            PubKey::Secp256k1(bytes) => {
                let key =
                    VerifyingKey::from_sec1_bytes(bytes).map_err(|_| KeyError::InvalidPublicKey)?;
                let sig = Signature::from_slice(signature).map_err(|_| KeyError::InvalidSignature)?;
                key.verify(message, &sig).map_err(|_| KeyError::VerificationFailed)
            }
            PubKey::Ed25519(bytes) => {
                let key = ed25519_dalek::VerifyingKey::from_bytes(bytes)
                    .map_err(|_| KeyError::InvalidPublicKey)?;
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| KeyError::InvalidSignature)?;
                key.verify_strict(message, &sig).map_err(|_| KeyError::VerificationFailed)
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct AnyPubKey {
    #[serde(rename = "@type")]
    type_url: String,
    key: String,
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AnyPubKey { type_url: self.type_url().to_string(), key: STANDARD.encode(self.as_bytes()) }
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let any = AnyPubKey::deserialize(deserializer)?;
        let bytes = STANDARD.decode(&any.key).map_err(de::Error::custom)?;
        match any.type_url.as_str() {
            "/cosmos.crypto.secp256k1.PubKey" => bytes
                .try_into()
                .map(PubKey::Secp256k1)
                .map_err(|_| de::Error::custom("secp256k1 public key must be 33 bytes")),
            "/cosmos.crypto.ed25519.PubKey" => bytes
                .try_into()
                .map(PubKey::Ed25519)
                .map_err(|_| de::Error::custom("ed25519 public key must be 32 bytes")),
            other => Err(de::Error::custom(format!("unsupported public key type {other}"))),
        }
    }
}

pub fn bech32_address(prefix: &str, bytes: &[u8]) -> Result<String, KeyError> {
    let hrp = Hrp::parse(prefix).map_err(|_| KeyError::InvalidAddress(prefix.to_string()))?;
    bech32::encode::<Bech32>(hrp, bytes).map_err(|_| KeyError::InvalidAddress(prefix.to_string()))
}

/// Account address in `stars1...` form.
pub fn account_address(pub_key: &PubKey) -> Result<String, KeyError> {
    bech32_address(ACCOUNT_ADDRESS_PREFIX, &pub_key.address())
}

/// Operator address in `starsvaloper1...` form for the same account bytes.
pub fn validator_address(pub_key: &PubKey) -> Result<String, KeyError> {
    bech32_address(VALIDATOR_ADDRESS_PREFIX, &pub_key.address())
}

/// Decodes a bech32 address and checks its prefix.
pub fn decode_address(expected_prefix: &str, address: &str) -> Result<Vec<u8>, KeyError> {
    let (hrp, data) =
        bech32::decode(address).map_err(|_| KeyError::InvalidAddress(address.to_string()))?;
    if hrp.as_str() != expected_prefix {
        return Err(KeyError::InvalidAddress(address.to_string()));
    }
    Ok(data)
}

/// Node ID as used in peer addresses (`<id>@host:port`).
pub fn node_id(node_pub_key: &ed25519_dalek::VerifyingKey) -> String {
    hex::encode(PubKey::Ed25519(node_pub_key.to_bytes()).address())
}

/// Fresh 24-word English mnemonic.
pub fn new_mnemonic() -> Result<Mnemonic, KeyError> {
    let mut entropy = Zeroizing::new([0u8; MNEMONIC_ENTROPY_BYTES]);
    rand::thread_rng().fill_bytes(entropy.as_mut());
    Mnemonic::from_entropy_in(Language::English, entropy.as_ref())
        .map_err(|e| KeyError::InvalidMnemonic(e.to_string()))
}

/// secp256k1 account key.
#[derive(Clone)]
pub struct Secp256k1Key {
    signing_key: SigningKey,
}

impl Secp256k1Key {
    /// Derives the key for `path` from a mnemonic with an empty passphrase.
    pub fn from_mnemonic(mnemonic: &Mnemonic, path: &str) -> Result<Self, KeyError> {
        let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));
        Self::from_seed(seed.as_ref(), path)
    }

    pub fn from_seed(seed: &[u8], path: &str) -> Result<Self, KeyError> {
        let path: DerivationPath = path.parse()?;
        let xprv = XPrv::derive_from_path(seed, &path)?;
        Ok(Self { signing_key: xprv.private_key().clone() })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    pub fn public_key(&self) -> PubKey {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        PubKey::Secp256k1(bytes)
    }

    /// RFC 6979 signature over `sha256(message)`, 64 bytes `r || s`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sig: Signature = self.signing_key.sign(message);
        sig.to_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-32 test vector 1 private key at m/0'.
    #[test]
    fn derives_bip32_hardened_child() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let key = Secp256k1Key::from_seed(&seed, "m/0'").unwrap();
        assert_eq!(
            hex::encode(key.to_bytes().as_slice()),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
    }

    #[test]
    fn mnemonic_derivation_is_deterministic() {
        let mnemonic = new_mnemonic().unwrap();
        assert_eq!(mnemonic.word_count(), 24);
        let a = Secp256k1Key::from_mnemonic(&mnemonic, FULL_FUNDRAISER_PATH).unwrap();
        let b = Secp256k1Key::from_mnemonic(&mnemonic, FULL_FUNDRAISER_PATH).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn addresses_share_bytes_across_prefixes() {
        let key = Secp256k1Key::from_mnemonic(&new_mnemonic().unwrap(), FULL_FUNDRAISER_PATH)
            .unwrap();
        let acc = account_address(&key.public_key()).unwrap();
        let val = validator_address(&key.public_key()).unwrap();
        assert!(acc.starts_with("stars1"));
        assert!(val.starts_with("starsvaloper1"));
        assert_eq!(
            decode_address(ACCOUNT_ADDRESS_PREFIX, &acc).unwrap(),
            decode_address(VALIDATOR_ADDRESS_PREFIX, &val).unwrap()
        );
        assert!(decode_address(VALIDATOR_ADDRESS_PREFIX, &acc).is_err());
    }

    #[test]
    fn signatures_verify_against_public_key() {
        let key = Secp256k1Key::from_mnemonic(&new_mnemonic().unwrap(), FULL_FUNDRAISER_PATH)
            .unwrap();
        let sig = key.sign(b"create validator");
        key.public_key().verify(b"create validator", &sig).unwrap();
        assert!(matches!(
            key.public_key().verify(b"tampered", &sig),
            Err(KeyError::VerificationFailed)
        ));
    }

    #[test]
    fn pub_key_json_round_trips() {
        let key = PubKey::Ed25519([7u8; 32]);
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["@type"], "/cosmos.crypto.ed25519.PubKey");
        assert_eq!(serde_json::from_value::<PubKey>(json).unwrap(), key);
    }

    #[test]
    fn parses_known_algorithms() {
        assert_eq!("secp256k1".parse::<SigningAlgo>().unwrap(), SigningAlgo::Secp256k1);
        assert_eq!("ED25519".parse::<SigningAlgo>().unwrap(), SigningAlgo::Ed25519);
        assert!("sr25519".parse::<SigningAlgo>().is_err());
    }
}
