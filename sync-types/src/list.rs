//! Grocery list payloads carried in event content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ListId, PublicKey};

/// A single line item. `name` is the merge key within a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item name, unique within a list.
    pub name: String,
    /// Quantity.
    pub qty: f64,
    /// Unit of measure (may be empty).
    #[serde(default)]
    pub unit: String,
    /// Store aisle (may be empty).
    #[serde(default)]
    pub aisle: String,
}

impl Item {
    /// Create an item.
    pub fn new(name: &str, qty: f64, unit: &str, aisle: &str) -> Self {
        Self {
            name: name.to_string(),
            qty,
            unit: unit.to_string(),
            aisle: aisle.to_string(),
        }
    }
}

/// A named, ordered collection of items, owned by the key that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroceryList {
    /// Immutable list id.
    pub id: ListId,
    /// Display name.
    pub name: String,
    /// Items in display order.
    pub items: Vec<Item>,
    /// When the list was first created.
    pub created_at: DateTime<Utc>,
    /// When this version was written. Drives last-write-wins.
    pub updated_at: DateTime<Utc>,
    /// Public key of the creator.
    pub owner: PublicKey,
}

impl GroceryList {
    /// Create a first version with `created_at == updated_at == now`.
    pub fn new(
        id: ListId,
        name: &str,
        items: Vec<Item>,
        owner: PublicKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            items,
            created_at: now,
            updated_at: now,
            owner,
        }
    }

    /// Look up an item by name.
    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.name == name)
    }

    /// The items with every entry named `name` removed.
    pub fn items_without(&self, name: &str) -> Vec<Item> {
        self.items
            .iter()
            .filter(|i| i.name != name)
            .cloned()
            .collect()
    }
}

/// A notification that `sender_public_key` shared a list with us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInvite {
    /// The shared list.
    pub list_id: ListId,
    /// Its name at the time of sharing.
    pub list_name: String,
    /// Who shared it.
    pub sender_public_key: PublicKey,
    /// When the invite was created.
    pub created_at: DateTime<Utc>,
}
