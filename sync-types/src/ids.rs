//! Identity and addressing types for listsync.

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ProtocolError;

/// Human-readable part of a bech32-encoded public key.
const NPUB_HRP: Hrp = Hrp::parse_unchecked("npub");

/// URI scheme prefix used when a key is shared as a QR payload.
pub const NOSTR_URI_PREFIX: &str = "nostr:";

/// A 32-byte x-only secp256k1 public key identifying a writer.
///
/// Displayed as 64 lowercase hex characters; also convertible to and from
/// the bech32 `npub1…` form preferred for sharing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create a PublicKey from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(input: &str) -> Result<Self, ProtocolError> {
        if !is_hex_key(input) {
            return Err(ProtocolError::InvalidKey(format!(
                "expected 64 hex characters, got {:?}",
                input
            )));
        }
        let bytes = hex::decode(input).map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes).ok_or_else(|| ProtocolError::InvalidKey("wrong length".into()))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode a bech32 `npub1…` string.
    pub fn from_npub(input: &str) -> Result<Self, ProtocolError> {
        let (hrp, data) =
            bech32::decode(input).map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        if !hrp.as_str().eq_ignore_ascii_case(NPUB_HRP.as_str()) {
            return Err(ProtocolError::InvalidKey(format!(
                "expected npub prefix, got {}",
                hrp
            )));
        }
        Self::from_bytes(&data).ok_or_else(|| {
            ProtocolError::InvalidKey(format!("npub payload is {} bytes, expected 32", data.len()))
        })
    }

    /// Encode as bech32 `npub1…`.
    pub fn to_npub(&self) -> String {
        bech32::encode::<Bech32>(NPUB_HRP, &self.0)
            .expect("32-byte payload always fits a bech32 string")
    }

    /// Parse any accepted textual form of a key.
    ///
    /// Accepts raw hex, `npub1…`, and either of those behind a `nostr:`
    /// URI prefix. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let trimmed = input.trim();
        let key = trimmed.strip_prefix(NOSTR_URI_PREFIX).unwrap_or(trimmed);

        if is_hex_key(key) {
            return Self::from_hex(&key.to_ascii_lowercase());
        }
        if key.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("npub1")) {
            return Self::from_npub(key);
        }
        Err(ProtocolError::InvalidKey(format!(
            "not a hex or npub key: {:?}",
            input
        )))
    }

    /// `nostr:npub1…` form used for QR payloads.
    pub fn to_uri(&self) -> String {
        format!("{}{}", NOSTR_URI_PREFIX, self.to_npub())
    }

    /// Shortened display form (`abcdef...1234`).
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        format!("{}...{}", &hex[..6], &hex[hex.len() - 4..])
    }
}

/// Whether `input` looks like a raw 64-character hex key.
fn is_hex_key(input: &str) -> bool {
    input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit())
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short())
    }
}

impl FromStr for PublicKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Content-addressed identifier of a signed event (SHA-256, hex on the wire).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId([u8; 32]);

impl EventId {
    /// Create an EventId from a 32-byte digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse 64 hex characters.
    pub fn from_hex(input: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(input).map_err(|e| ProtocolError::InvalidEventId(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ProtocolError::InvalidEventId(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", &self.to_hex()[..12])
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a grocery list, immutable once created.
///
/// Doubles as the `d` tag of LIST events, so a list occupies one
/// replaceable slot per writer on every relay.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListId(String);

impl ListId {
    /// Generate a fresh id: `list_<unix millis>_<7 random base36 chars>`.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self(format!("list_{}_{}", millis, random_base36(7)))
    }

    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListId({})", self.0)
    }
}

impl From<&str> for ListId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ListId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a relay subscription (REQ/CLOSE correlation).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a new random subscription id (32 hex chars, under the 64-char relay limit).
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Random lowercase base36 string of `len` characters.
fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
    const NPUB: &str = "npub180cvv07tjdrrgpa0j7j7tmnyl2yr6yr7l8j4s3evf6u64th6gkwsyjh6w6";

    #[test]
    fn public_key_hex_roundtrip() {
        let key = PublicKey::from_hex(HEX).unwrap();
        assert_eq!(key.to_hex(), HEX);
        assert_eq!(key.to_string(), HEX);
    }

    #[test]
    fn public_key_npub_matches_known_vector() {
        let key = PublicKey::from_hex(HEX).unwrap();
        assert_eq!(key.to_npub(), NPUB);
        assert_eq!(PublicKey::from_npub(NPUB).unwrap(), key);
    }

    #[test]
    fn parse_accepts_hex_npub_and_uri_forms() {
        let key = PublicKey::from_hex(HEX).unwrap();
        assert_eq!(PublicKey::parse(HEX).unwrap(), key);
        assert_eq!(PublicKey::parse(&HEX.to_uppercase()).unwrap(), key);
        assert_eq!(PublicKey::parse(NPUB).unwrap(), key);
        assert_eq!(PublicKey::parse(&format!("nostr:{}", NPUB)).unwrap(), key);
        assert_eq!(PublicKey::parse(&format!("  nostr:{} ", HEX)).unwrap(), key);
        assert_eq!(key.to_uri(), format!("nostr:{}", NPUB));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(PublicKey::parse("npub1notarealkey").is_err());
        assert!(PublicKey::parse("abc123").is_err());
        assert!(PublicKey::parse("").is_err());
        // one character short of a hex key
        assert!(PublicKey::parse(&HEX[1..]).is_err());
        // bech32 with a different prefix
        assert!(PublicKey::parse("nsec1qqqqqqqq").is_err());
    }

    #[test]
    fn short_display() {
        let key = PublicKey::from_hex(HEX).unwrap();
        assert_eq!(key.short(), "3bf0c6...459d");
    }

    #[test]
    fn public_key_serializes_as_hex_string() {
        let key = PublicKey::from_hex(HEX).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", HEX));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn event_id_rejects_wrong_length() {
        assert!(EventId::from_hex("abcd").is_err());
        assert!(EventId::from_hex(&"00".repeat(32)).is_ok());
    }

    #[test]
    fn list_id_format() {
        let id = ListId::generate();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "list");
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), 7);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn list_ids_do_not_collide() {
        let ids: std::collections::HashSet<ListId> = (0..500).map(|_| ListId::generate()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn subscription_id_fits_relay_limit() {
        let id = SubscriptionId::new();
        assert!(id.as_str().len() <= 64);
        assert_ne!(id, SubscriptionId::new());
    }
}
