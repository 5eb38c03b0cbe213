use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    crypto::{self, FULL_FUNDRAISER_PATH, KeyError, PubKey, Secp256k1Key, SigningAlgo},
    error::PathError,
    utils::write_secret_file,
};

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("unsupported keyring backend {0:?} (expected test, file or memory)")]
    UnsupportedBackend(String),

    #[error("file keyring needs a passphrase of at least {} characters", MIN_PASSPHRASE_LEN)]
    MissingPassphrase,

    #[error("cannot unlock key {name:?}: {reason}")]
    Locked { name: String, reason: String },

    #[error("unsupported signing algorithm {algo}, keyring supports {supported}")]
    UnsupportedAlgorithm { algo: SigningAlgo, supported: String },

    #[error("key {0:?} already exists")]
    KeyExists(String),

    #[error("key {0:?} not found")]
    KeyNotFound(String),

    #[error("corrupt key record {name:?}: {reason}")]
    Corrupt { name: String, reason: String },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Io(#[from] PathError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyringBackend {
    /// Unencrypted key files under `<home>/keyring-test`.
    Test,
    /// Passphrase-encrypted key files under `<home>/keyring-file`.
    File,
    /// Keys live only as long as the keyring value.
    Memory,
}

impl FromStr for KeyringBackend {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(KeyringBackend::Test),
            "file" => Ok(KeyringBackend::File),
            "memory" => Ok(KeyringBackend::Memory),
            other => Err(KeyringError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl fmt::Display for KeyringBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyringBackend::Test => f.write_str("test"),
            KeyringBackend::File => f.write_str("file"),
            KeyringBackend::Memory => f.write_str("memory"),
        }
    }
}

pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Passphrase of the `file` backend. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(passphrase: impl Into<String>) -> Result<Self, KeyringError> {
        let passphrase = Zeroizing::new(passphrase.into());
        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(KeyringError::MissingPassphrase);
        }
        Ok(Self(passphrase))
    }

    fn cipher(&self, salt: &[u8]) -> Result<XChaCha20Poly1305, String> {
        let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, 1, Some(32))
            .map_err(|e| e.to_string())?;
        let mut key = Zeroizing::new([0u8; 32]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(self.0.as_bytes(), salt, &mut key[..])
            .map_err(|e| e.to_string())?;
        Ok(XChaCha20Poly1305::new(Key::from_slice(&key[..])))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<SealedKey, String> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher(&salt)?
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| e.to_string())?;
        Ok(SealedKey {
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    fn unseal(&self, sealed: &SealedKey) -> Result<Zeroizing<Vec<u8>>, String> {
        let salt = hex::decode(&sealed.salt).map_err(|e| e.to_string())?;
        let nonce = hex::decode(&sealed.nonce).map_err(|e| e.to_string())?;
        let ciphertext = hex::decode(&sealed.ciphertext).map_err(|e| e.to_string())?;
        if nonce.len() != NONCE_LEN {
            return Err(format!("nonce must be {NONCE_LEN} bytes"));
        }
        self.cipher(&salt)?
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| "wrong passphrase or corrupt ciphertext".to_string())
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

const KDF_MEMORY_KIB: u32 = 19 * 1024;
const KDF_ITERATIONS: u32 = 2;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// Public view of a stored key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub name: String,
    pub algo: SigningAlgo,
    pub address: String,
    pub pub_key: PubKey,
}

/// Key storage and signing used for validator account keys.
pub trait Keyring {
    fn backend(&self) -> KeyringBackend;

    fn supported_algorithms(&self) -> &[SigningAlgo];

    /// Derives a key from `mnemonic` and stores it under `uid`.
    fn save_from_mnemonic(
        &mut self,
        uid: &str,
        mnemonic: &bip39::Mnemonic,
        algo: SigningAlgo,
        overwrite: bool,
    ) -> Result<KeyRecord, KeyringError>;

    fn key(&self, uid: &str) -> Result<KeyRecord, KeyringError>;

    /// Signs `message` with the key stored under `uid`.
    fn sign(&self, uid: &str, message: &[u8]) -> Result<(Vec<u8>, PubKey), KeyringError>;
}

#[derive(Serialize, Deserialize)]
struct SealedKey {
    salt: String,
    nonce: String,
    ciphertext: String,
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    #[serde(flatten)]
    record: KeyRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priv_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sealed: Option<SealedKey>,
}

struct LocalKey {
    record: KeyRecord,
    key: Secp256k1Key,
}

/// Keyring backed by memory, optionally mirrored to key files.
pub struct LocalKeyring {
    backend: KeyringBackend,
    dir: Option<PathBuf>,
    passphrase: Option<Passphrase>,
    keys: BTreeMap<String, LocalKey>,
}

const SUPPORTED_ALGORITHMS: &[SigningAlgo] = &[SigningAlgo::Secp256k1];

impl LocalKeyring {
    /// Opens the keyring under `home`. `passphrase` is required by the
    /// `file` backend and ignored by the others.
    pub fn open(
        backend: KeyringBackend,
        home: &Path,
        passphrase: Option<Passphrase>,
    ) -> Result<Self, KeyringError> {
        let (dir, passphrase) = match backend {
            KeyringBackend::Test => (Some(home.join("keyring-test")), None),
            KeyringBackend::File => {
                let passphrase = passphrase.ok_or(KeyringError::MissingPassphrase)?;
                (Some(home.join("keyring-file")), Some(passphrase))
            }
            KeyringBackend::Memory => (None, None),
        };
        let mut keyring = Self { backend, dir, passphrase, keys: BTreeMap::new() };
        keyring.load()?;
        Ok(keyring)
    }

    fn load(&mut self) -> Result<(), KeyringError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        if !dir.exists() {
            return Ok(());
        }
        let entries = fs::read_dir(dir).map_err(|e| PathError::new("read", dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| PathError::new("read", dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("info") {
                continue;
            }
            let bytes =
                Zeroizing::new(fs::read(&path).map_err(|e| PathError::new("read", &path, e))?);
            let stored: StoredKey = serde_json::from_slice(&bytes).map_err(|e| {
                KeyringError::Corrupt { name: path.display().to_string(), reason: e.to_string() }
            })?;
            let secret = self.decode_secret(&stored)?;
            let key = Secp256k1Key::from_bytes(&secret)?;
            self.keys.insert(stored.record.name.clone(), LocalKey { record: stored.record, key });
        }
        Ok(())
    }

    fn decode_secret(&self, stored: &StoredKey) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
        let name = &stored.record.name;
        match (&self.passphrase, &stored.sealed, &stored.priv_key) {
            (Some(passphrase), Some(sealed), _) => passphrase
                .unseal(sealed)
                .map_err(|reason| KeyringError::Locked { name: name.clone(), reason }),
            (None, None, Some(priv_key)) => hex::decode(priv_key)
                .map(Zeroizing::new)
                .map_err(|e| KeyringError::Corrupt { name: name.clone(), reason: e.to_string() }),
            _ => Err(KeyringError::Corrupt {
                name: name.clone(),
                reason: format!("record does not match the {} backend", self.backend),
            }),
        }
    }

    fn persist(&self, local: &LocalKey) -> Result<(), KeyringError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let secret = local.key.to_bytes();
        let (priv_key, sealed) = match &self.passphrase {
            Some(passphrase) => {
                let sealed = passphrase.seal(&secret).map_err(|reason| {
                    KeyringError::Locked { name: local.record.name.clone(), reason }
                })?;
                (None, Some(sealed))
            }
            None => (Some(hex::encode(secret.as_slice())), None),
        };
        let stored = StoredKey { record: local.record.clone(), priv_key, sealed };
        let contents = Zeroizing::new(serde_json::to_vec(&stored).map_err(|e| {
            KeyringError::Corrupt { name: local.record.name.clone(), reason: e.to_string() }
        })?);
        write_secret_file(&format!("{}.info", local.record.name), dir, &contents)?;
        Ok(())
    }
}

impl Keyring for LocalKeyring {
    fn backend(&self) -> KeyringBackend {
        self.backend
    }

    fn supported_algorithms(&self) -> &[SigningAlgo] {
        SUPPORTED_ALGORITHMS
    }

    fn save_from_mnemonic(
        &mut self,
        uid: &str,
        mnemonic: &bip39::Mnemonic,
        algo: SigningAlgo,
        overwrite: bool,
    ) -> Result<KeyRecord, KeyringError> {
        if !self.supported_algorithms().contains(&algo) {
            return Err(unsupported_algorithm(algo, self.supported_algorithms()));
        }
        if !overwrite && self.keys.contains_key(uid) {
            return Err(KeyringError::KeyExists(uid.to_string()));
        }
        let key = Secp256k1Key::from_mnemonic(mnemonic, FULL_FUNDRAISER_PATH)?;
        let pub_key = key.public_key();
        let record = KeyRecord {
            name: uid.to_string(),
            algo,
            address: crypto::account_address(&pub_key)?,
            pub_key,
        };
        let local = LocalKey { record: record.clone(), key };
        self.persist(&local)?;
        debug!(name = uid, address = %record.address, backend = %self.backend, "stored key");
        self.keys.insert(uid.to_string(), local);
        Ok(record)
    }

    fn key(&self, uid: &str) -> Result<KeyRecord, KeyringError> {
        self.keys
            .get(uid)
            .map(|local| local.record.clone())
            .ok_or_else(|| KeyringError::KeyNotFound(uid.to_string()))
    }

    fn sign(&self, uid: &str, message: &[u8]) -> Result<(Vec<u8>, PubKey), KeyringError> {
        let local = self.keys.get(uid).ok_or_else(|| KeyringError::KeyNotFound(uid.to_string()))?;
        Ok((local.key.sign(message), local.record.pub_key.clone()))
    }
}

fn unsupported_algorithm(algo: SigningAlgo, supported: &[SigningAlgo]) -> KeyringError {
    let supported = supported.iter().map(SigningAlgo::name).collect::<Vec<_>>().join(", ");
    KeyringError::UnsupportedAlgorithm { algo, supported }
}

/// Resolves an algorithm name against what `keyring` supports.
pub fn signing_algo_from_str(
    name: &str,
    keyring: &dyn Keyring,
) -> Result<SigningAlgo, KeyringError> {
    let algo: SigningAlgo = name.parse()?;
    if keyring.supported_algorithms().contains(&algo) {
        Ok(algo)
    } else {
        Err(unsupported_algorithm(algo, keyring.supported_algorithms()))
    }
}

/// Generates a fresh mnemonic, stores the derived key under `name` and
/// returns the key record together with the mnemonic phrase.
pub fn generate_save_coin_key(
    keyring: &mut dyn Keyring,
    name: &str,
    overwrite: bool,
    algo: SigningAlgo,
) -> Result<(KeyRecord, Zeroizing<String>), KeyringError> {
    let mnemonic = crypto::new_mnemonic()?;
    let record = keyring.save_from_mnemonic(name, &mnemonic, algo, overwrite)?;
    Ok((record, Zeroizing::new(mnemonic.to_string())))
}
