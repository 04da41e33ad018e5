//! Signing collaborator and an in-process key store implementing it.

use std::collections::{HashMap, HashSet};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::RngCore;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use walletd_consensus::{Hash256, Network};
use walletd_primitives::hash::hash160;
use walletd_primitives::script::{p2pkh_hash, p2pkh_script};
use walletd_primitives::{wif_to_secret_key, AddressError};
use zeroize::Zeroize;

use crate::sighash::{SighashError, SIGHASH_ALL};
use crate::subchain::SubaccountId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    UnknownKey,
    UnsupportedScript,
    InvalidSecretKey,
    InvalidWif(AddressError),
    ChangeKeyUnavailable(SubaccountId),
    Sighash(SighashError),
    Poisoned,
}

impl std::fmt::Display for SignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignError::UnknownKey => write!(f, "no key for script"),
            SignError::UnsupportedScript => write!(f, "script type cannot be signed"),
            SignError::InvalidSecretKey => write!(f, "invalid secret key"),
            SignError::InvalidWif(err) => write!(f, "invalid wif: {err}"),
            SignError::ChangeKeyUnavailable(subaccount) => {
                write!(f, "no change key available for {subaccount}")
            }
            SignError::Sighash(err) => write!(f, "{err}"),
            SignError::Poisoned => write!(f, "key store lock poisoned"),
        }
    }
}

impl std::error::Error for SignError {}

impl From<SighashError> for SignError {
    fn from(err: SighashError) -> Self {
        SignError::Sighash(err)
    }
}

/// Signature push plus the public key that unlocks a P2PKH output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSignature {
    /// DER signature followed by the hash-type byte.
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

/// Key custody seen from the builder: who may send, where change goes and
/// how an input digest gets signed.
pub trait SigningService: Send + Sync {
    fn resolve_sender(&self, sender: &str) -> bool;

    fn change_script(&self, subaccount: SubaccountId) -> Result<Vec<u8>, SignError>;

    fn sign_digest(
        &self,
        script_pubkey: &[u8],
        digest: &Hash256,
    ) -> Result<InputSignature, SignError>;
}

struct LocalKey {
    secret: [u8; 32],
    pubkey_bytes: Vec<u8>,
}

impl LocalKey {
    fn from_secret(secret: [u8; 32], compressed: bool) -> Result<Self, SignError> {
        let secret_key = SecretKey::from_slice(&secret).map_err(|_| SignError::InvalidSecretKey)?;
        let pubkey = PublicKey::from_secret_key(secp(), &secret_key);
        let pubkey_bytes = if compressed {
            pubkey.serialize().to_vec()
        } else {
            pubkey.serialize_uncompressed().to_vec()
        };
        Ok(Self {
            secret,
            pubkey_bytes,
        })
    }

    fn key_hash(&self) -> [u8; 20] {
        hash160(&self.pubkey_bytes)
    }

    fn secret_key(&self) -> Result<SecretKey, SignError> {
        SecretKey::from_slice(&self.secret).map_err(|_| SignError::InvalidSecretKey)
    }
}

impl Drop for LocalKey {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

#[derive(Default)]
struct KeyState {
    keys: HashMap<[u8; 20], LocalKey>,
    senders: HashSet<String>,
    change: HashMap<SubaccountId, [u8; 20]>,
}

/// Keys held in process memory, addressed by their P2PKH key hash.
#[derive(Default)]
pub struct LocalKeys {
    state: RwLock<KeyState>,
}

impl LocalKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import_wif(&self, wif: &str, network: Network) -> Result<[u8; 20], SignError> {
        let (mut secret, compressed) =
            wif_to_secret_key(wif, network).map_err(SignError::InvalidWif)?;
        let result = self.import_secret(secret, compressed);
        secret.zeroize();
        result
    }

    pub fn import_secret(&self, secret: [u8; 32], compressed: bool) -> Result<[u8; 20], SignError> {
        let key = LocalKey::from_secret(secret, compressed)?;
        let key_hash = key.key_hash();
        self.write()?.keys.entry(key_hash).or_insert(key);
        Ok(key_hash)
    }

    /// Creates a fresh compressed key.
    pub fn generate_key(&self) -> Result<[u8; 20], SignError> {
        let mut rng = rand::thread_rng();
        loop {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            match self.import_secret(secret, true) {
                Ok(key_hash) => {
                    secret.zeroize();
                    return Ok(key_hash);
                }
                Err(SignError::InvalidSecretKey) => secret.zeroize(),
                Err(err) => return Err(err),
            }
        }
    }

    pub fn add_sender(&self, sender: impl Into<String>) -> Result<(), SignError> {
        self.write()?.senders.insert(sender.into());
        Ok(())
    }

    /// Directs change for `subaccount` to a key this store holds.
    pub fn set_change_key(
        &self,
        subaccount: SubaccountId,
        key_hash: [u8; 20],
    ) -> Result<(), SignError> {
        let mut state = self.write()?;
        if !state.keys.contains_key(&key_hash) {
            return Err(SignError::UnknownKey);
        }
        state.change.insert(subaccount, key_hash);
        Ok(())
    }

    pub fn script_for(&self, key_hash: &[u8; 20]) -> Option<Vec<u8>> {
        let state = self.read().ok()?;
        state.keys.contains_key(key_hash).then(|| p2pkh_script(key_hash))
    }

    pub fn pubkey(&self, key_hash: &[u8; 20]) -> Option<Vec<u8>> {
        let state = self.read().ok()?;
        state.keys.get(key_hash).map(|key| key.pubkey_bytes.clone())
    }

    pub fn key_count(&self) -> usize {
        self.read().map(|state| state.keys.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, KeyState>, SignError> {
        self.state.read().map_err(|_| SignError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, KeyState>, SignError> {
        self.state.write().map_err(|_| SignError::Poisoned)
    }
}

impl SigningService for LocalKeys {
    fn resolve_sender(&self, sender: &str) -> bool {
        self.read()
            .map(|state| state.senders.contains(sender))
            .unwrap_or(false)
    }

    fn change_script(&self, subaccount: SubaccountId) -> Result<Vec<u8>, SignError> {
        let state = self.read()?;
        state
            .change
            .get(&subaccount)
            .map(p2pkh_script)
            .ok_or(SignError::ChangeKeyUnavailable(subaccount))
    }

    fn sign_digest(
        &self,
        script_pubkey: &[u8],
        digest: &Hash256,
    ) -> Result<InputSignature, SignError> {
        let key_hash = p2pkh_hash(script_pubkey).ok_or(SignError::UnsupportedScript)?;
        let state = self.read()?;
        let key = state.keys.get(&key_hash).ok_or(SignError::UnknownKey)?;
        let message = Message::from_digest(*digest);
        let signature = secp().sign_ecdsa(&message, &key.secret_key()?);
        let mut encoded = signature.serialize_der().to_vec();
        encoded.push(SIGHASH_ALL as u8);
        Ok(InputSignature {
            signature: encoded,
            pubkey: key.pubkey_bytes.clone(),
        })
    }
}

pub(crate) fn secp() -> &'static Secp256k1<secp256k1::All> {
    static SECP: OnceLock<Secp256k1<secp256k1::All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}
