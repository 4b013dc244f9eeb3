//! Event signing and verification.
//!
//! Events are addressed by `sha256` of their canonical serialization and
//! signed with a BIP-340 Schnorr signature over that id. Any event received
//! from a relay is checked here before it is decoded or merged.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use listsync_types::{Event, Kind, Tag, UnsignedEvent};
use secp256k1::{schnorr, Message, XOnlyPublicKey, SECP256K1};
use thiserror::Error;

use crate::identity::Keys;

/// Length of a hex-encoded Schnorr signature.
pub const SIGNATURE_HEX_LEN: usize = 128;

/// Reasons an event fails verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The id does not match the hashed fields.
    #[error("event id does not match its contents")]
    IdMismatch,

    /// The pubkey is not a valid x-only point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The signature is malformed.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// The signature does not verify against the pubkey.
    #[error("signature verification failed")]
    BadSignature,
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build, hash and sign an event.
pub fn sign_event(
    keys: &Keys,
    kind: Kind,
    tags: Vec<Tag>,
    content: String,
    created_at: u64,
) -> Event {
    let unsigned = UnsignedEvent {
        pubkey: keys.public_key(),
        created_at,
        kind,
        tags,
        content,
    };
    let id = unsigned.compute_id();

    let mut aux = [0u8; 32];
    getrandom::getrandom(&mut aux).expect("getrandom failed");
    let message = Message::from_digest(*id.as_bytes());
    let sig = SECP256K1.sign_schnorr_with_aux_rand(&message, keys.keypair(), &aux);

    Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: sig.to_string(),
    }
}

/// Check an event's id and signature, reporting why it failed.
pub fn check_event(event: &Event) -> Result<(), CryptoError> {
    if !event.has_valid_id() {
        return Err(CryptoError::IdMismatch);
    }
    let pubkey = XOnlyPublicKey::from_slice(event.pubkey.as_bytes())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    if event.sig.len() != SIGNATURE_HEX_LEN {
        return Err(CryptoError::MalformedSignature(format!(
            "expected {} hex characters, got {}",
            SIGNATURE_HEX_LEN,
            event.sig.len()
        )));
    }
    let sig = schnorr::Signature::from_str(&event.sig)
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let message = Message::from_digest(*event.id.as_bytes());
    SECP256K1
        .verify_schnorr(&sig, &message, &pubkey)
        .map_err(|_| CryptoError::BadSignature)
}

/// Whether an event's id and signature are both valid.
pub fn verify_event(event: &Event) -> bool {
    check_event(event).is_ok()
}
