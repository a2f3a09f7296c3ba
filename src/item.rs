use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Stable identifier of an item. Must be unique within one ranking or tournament.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Something being ranked: a song, a player, a design candidate.
///
/// `seed` only orders the initial Swiss pairing and breaks standings ties; the
/// engines never use it to decide a match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub label: String,
    pub seed: i64,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, label: impl Into<String>, seed: i64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            seed,
        }
    }
}

impl Display for Item {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.id, self.seed)
    }
}

/// Returns the first id that appears more than once, if any.
pub(crate) fn find_duplicate(items: &[Item]) -> Option<&ItemId> {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    items.iter().map(|i| &i.id).find(|id| !seen.insert(*id))
}
