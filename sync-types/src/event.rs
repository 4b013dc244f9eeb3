//! Signed protocol events - the unit relays store and forward.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{EventId, ProtocolError, PublicKey};

/// Tag holding the list id (one replaceable slot per writer).
pub const TAG_D: &str = "d";
/// Tag holding the payload discriminator.
pub const TAG_TYPE: &str = "type";
/// Tag holding the human-readable list name.
pub const TAG_NAME: &str = "name";
/// Tag holding the recipient public key of an invite.
pub const TAG_P: &str = "p";

/// `type` tag value of LIST events.
pub const TYPE_GROCERY_LIST: &str = "grocery-list";
/// `type` tag value of INVITE events.
pub const TYPE_LIST_INVITE: &str = "list-invite";

/// Event kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum Kind {
    /// Full grocery list snapshot (30000).
    List,
    /// Sharing notification addressed to a recipient (30001).
    Invite,
    /// Any kind this crate does not interpret.
    Other(u16),
}

impl Kind {
    /// Numeric value of LIST events.
    pub const LIST: u16 = 30000;
    /// Numeric value of INVITE events.
    pub const INVITE: u16 = 30001;

    /// Numeric wire value.
    pub fn as_u16(self) -> u16 {
        u16::from(self)
    }
}

impl From<u16> for Kind {
    fn from(value: u16) -> Self {
        match value {
            Kind::LIST => Kind::List,
            Kind::INVITE => Kind::Invite,
            other => Kind::Other(other),
        }
    }
}

impl From<Kind> for u16 {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::List => Kind::LIST,
            Kind::Invite => Kind::INVITE,
            Kind::Other(v) => v,
        }
    }
}

/// An indexable annotation: `[key, value, ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    /// Create a two-element `[key, value]` tag.
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self(vec![key.to_string(), value.into()])
    }

    /// Create a tag from arbitrary parts.
    pub fn from_parts(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// The tag key (first element).
    pub fn key(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The first value (second element).
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// All elements.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// The fields that are hashed into an event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Author.
    pub pubkey: PublicKey,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    /// Kind discriminator.
    pub kind: Kind,
    /// Ordered tags.
    pub tags: Vec<Tag>,
    /// Serialized payload.
    pub content: String,
}

impl UnsignedEvent {
    /// Compute the content-addressed id.
    ///
    /// SHA-256 over the compact JSON array
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(&self) -> EventId {
        let canonical = serde_json::json!([
            0,
            self.pubkey.to_hex(),
            self.created_at,
            self.kind.as_u16(),
            self.tags,
            self.content,
        ]);
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        EventId::from_digest(bytes)
    }
}

/// A signed event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Content-addressed id.
    pub id: EventId,
    /// Author.
    pub pubkey: PublicKey,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    /// Kind discriminator.
    pub kind: Kind,
    /// Ordered tags.
    pub tags: Vec<Tag>,
    /// Serialized payload (JSON string).
    pub content: String,
    /// 64-byte Schnorr signature over `id`, hex encoded.
    pub sig: String,
}

impl Event {
    /// Strip id and signature, leaving the hashed fields.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Whether the embedded id matches the hashed fields.
    pub fn has_valid_id(&self) -> bool {
        self.unsigned().compute_id() == self.id
    }

    /// First value of the first tag with the given key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key() == Some(key))
            .and_then(Tag::value)
    }

    /// First values of every tag with the given key.
    pub fn tag_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.key() == Some(key))
            .filter_map(Tag::value)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }
}
