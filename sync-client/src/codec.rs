//! Typed payloads <-> signed events.
//!
//! | Payload       | Kind   | Tags                                   |
//! |---------------|--------|----------------------------------------|
//! | `GroceryList` | 30000  | `d`=list id, `type`, `name`            |
//! | `ListInvite`  | 30001  | `d`=list id, `type`, `name`, `p`=recipient |
//!
//! Content is the payload serialized as JSON. Decoding never panics; every
//! malformed event maps to a [`DecodeError`] the caller logs and drops.

use listsync_types::event::{
    TAG_D, TAG_NAME, TAG_P, TAG_TYPE, TYPE_GROCERY_LIST, TYPE_LIST_INVITE,
};
use listsync_types::{Event, GroceryList, Kind, ListInvite, PublicKey, Tag};
use thiserror::Error;

use crate::crypto::{check_event, sign_event, CryptoError};
use crate::identity::Keys;

/// Why an event could not be turned into a payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The event has a different kind.
    #[error("expected kind {expected}, found {found}")]
    WrongKind {
        /// Kind the decoder handles.
        expected: u16,
        /// Kind of the event.
        found: u16,
    },

    /// A required tag is absent.
    #[error("missing {0:?} tag")]
    MissingTag(&'static str),

    /// The content is not valid payload JSON.
    #[error("invalid content: {0}")]
    Content(#[from] serde_json::Error),

    /// The `d` tag and the content disagree on the list id.
    #[error("d tag {tag:?} does not match content id {content:?}")]
    ListIdMismatch {
        /// Value of the `d` tag.
        tag: String,
        /// `id` in the content.
        content: String,
    },

    /// An invite claims a sender other than its signer.
    #[error("invite sender {claimed} is not the signer {signer}")]
    SenderMismatch {
        /// `senderPublicKey` in the content.
        claimed: String,
        /// Event pubkey.
        signer: String,
    },

    /// The id or signature is invalid.
    #[error("rejected signature: {0}")]
    Signature(#[from] CryptoError),
}

/// Sign a LIST event carrying a full list snapshot.
///
/// `created_at` is the list's `updated_at` in seconds, so relays order
/// versions the same way the merge does.
pub fn encode_list(keys: &Keys, list: &GroceryList) -> Result<Event, serde_json::Error> {
    let content = serde_json::to_string(list)?;
    let tags = vec![
        Tag::new(TAG_D, list.id.as_str()),
        Tag::new(TAG_TYPE, TYPE_GROCERY_LIST),
        Tag::new(TAG_NAME, list.name.as_str()),
    ];
    let created_at = u64::try_from(list.updated_at.timestamp()).unwrap_or(0);
    Ok(sign_event(keys, Kind::List, tags, content, created_at))
}

/// Sign an INVITE event addressed to `recipient`.
pub fn encode_invite(
    keys: &Keys,
    invite: &ListInvite,
    recipient: &PublicKey,
) -> Result<Event, serde_json::Error> {
    let content = serde_json::to_string(invite)?;
    let tags = vec![
        Tag::new(TAG_D, invite.list_id.as_str()),
        Tag::new(TAG_TYPE, TYPE_LIST_INVITE),
        Tag::new(TAG_NAME, invite.list_name.as_str()),
        Tag::new(TAG_P, recipient.to_hex()),
    ];
    let created_at = u64::try_from(invite.created_at.timestamp()).unwrap_or(0);
    Ok(sign_event(keys, Kind::Invite, tags, content, created_at))
}

/// Decode a LIST event's content.
pub fn decode_list(event: &Event) -> Result<GroceryList, DecodeError> {
    expect_kind(event, Kind::List)?;
    let d = event.tag_value(TAG_D).ok_or(DecodeError::MissingTag(TAG_D))?;
    let list: GroceryList = serde_json::from_str(&event.content)?;
    if list.id.as_str() != d {
        return Err(DecodeError::ListIdMismatch {
            tag: d.to_string(),
            content: list.id.to_string(),
        });
    }
    Ok(list)
}

/// Decode an INVITE event's content.
pub fn decode_invite(event: &Event) -> Result<ListInvite, DecodeError> {
    expect_kind(event, Kind::Invite)?;
    let invite: ListInvite = serde_json::from_str(&event.content)?;
    if invite.sender_public_key != event.pubkey {
        return Err(DecodeError::SenderMismatch {
            claimed: invite.sender_public_key.short(),
            signer: event.pubkey.short(),
        });
    }
    Ok(invite)
}

/// Verify then decode a LIST event received from a relay.
pub fn open_list(event: &Event) -> Result<GroceryList, DecodeError> {
    check_event(event)?;
    decode_list(event)
}

/// Verify then decode an INVITE event received from a relay.
pub fn open_invite(event: &Event) -> Result<ListInvite, DecodeError> {
    check_event(event)?;
    decode_invite(event)
}

fn expect_kind(event: &Event, expected: Kind) -> Result<(), DecodeError> {
    if event.kind == expected {
        Ok(())
    } else {
        Err(DecodeError::WrongKind {
            expected: expected.as_u16(),
            found: event.kind.as_u16(),
        })
    }
}
