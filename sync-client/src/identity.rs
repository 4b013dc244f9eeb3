//! Signing identity: one secp256k1 keypair per installation.
//!
//! The secret key is generated once from the OS CSPRNG, persisted through
//! the [`KeyValueStore`] under [`IDENTITY_KEY`], and reused on every later
//! start. A stored key that cannot be parsed is reported, never replaced:
//! silently minting a new identity would orphan every list the old one owns.

use std::sync::Arc;

use listsync_types::PublicKey;
use secp256k1::{All, Keypair, Secp256k1, SecretKey, SECP256K1};
use thiserror::Error;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use crate::store::{KeyValueStore, StoreError};

/// Store key holding the hex-encoded secret key.
pub const IDENTITY_KEY: &str = "identity.secret";

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Reading or writing the key failed.
    #[error("identity storage failed: {0}")]
    Store(#[from] StoreError),

    /// A key is stored but unusable.
    #[error("stored identity is corrupt: {0}")]
    Corrupt(String),
}

/// A secp256k1 keypair with its x-only public key.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: PublicKey,
}

impl Keys {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        loop {
            let mut bytes = Zeroizing::new([0u8; 32]);
            getrandom::getrandom(&mut bytes[..]).expect("getrandom failed");
            // Out-of-range scalars are astronomically rare; draw again
            if let Ok(secret) = SecretKey::from_slice(&bytes[..]) {
                return Self::from_secret_key(&secret);
            }
        }
    }

    /// Parse a 64-character hex secret key.
    pub fn from_secret_hex(input: &str) -> Result<Self, IdentityError> {
        let bytes = Zeroizing::new(
            hex::decode(input.trim()).map_err(|e| IdentityError::Corrupt(e.to_string()))?,
        );
        let secret =
            SecretKey::from_slice(&bytes).map_err(|e| IdentityError::Corrupt(e.to_string()))?;
        Ok(Self::from_secret_key(&secret))
    }

    fn from_secret_key(secret: &SecretKey) -> Self {
        let secp: &Secp256k1<All> = SECP256K1;
        let keypair = Keypair::from_secret_key(secp, secret);
        let (xonly, _parity) = keypair.x_only_public_key();
        let public_key = PublicKey::from_bytes(&xonly.serialize())
            .expect("x-only keys are always 32 bytes");
        Self {
            keypair,
            public_key,
        }
    }

    /// The public half.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Hex-encoded secret key, zeroed on drop.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.keypair.secret_bytes()))
    }

    pub(crate) fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Loads or creates the session identity, memoised after the first call.
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
    keys: OnceCell<Keys>,
}

impl IdentityStore {
    /// Create a store backed by `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            keys: OnceCell::new(),
        }
    }

    /// Return the persisted identity, generating and persisting one if absent.
    pub async fn get_or_create(&self) -> Result<Keys, IdentityError> {
        self.keys
            .get_or_try_init(|| self.load_or_generate())
            .await
            .cloned()
    }

    async fn load_or_generate(&self) -> Result<Keys, IdentityError> {
        match self.store.get(IDENTITY_KEY).await? {
            Some(stored) => {
                let keys = Keys::from_secret_hex(&stored)?;
                tracing::debug!(pubkey = %keys.public_key().short(), "Loaded identity");
                Ok(keys)
            }
            None => {
                let keys = Keys::generate();
                self.store.put(IDENTITY_KEY, &keys.secret_hex()).await?;
                tracing::info!(pubkey = %keys.public_key().short(), "Generated new identity");
                Ok(keys)
            }
        }
    }
}
