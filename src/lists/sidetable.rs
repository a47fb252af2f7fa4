//! Lists described in a JSON file rather than the database.
//!
//! ```json
//! {
//!   "board": {
//!     "senders": ["chair@example.org"],
//!     "moderators": ["chair@example.org"],
//!     "receivers": [{"name": "Ann", "addr": "ann@example.org", "token": "t1"}]
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::store::Store;
use super::{ListKind, Resolved};
use crate::error::{RelayError, Result};
use crate::model::list::List;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SideEntry {
    display_name: Option<String>,
    senders: Vec<String>,
    moderators: Vec<String>,
    receivers: Vec<SideReceiver>,
}

#[derive(Debug, Clone, Deserialize)]
struct SideReceiver {
    #[serde(default)]
    name: String,
    addr: String,
    #[serde(default)]
    token: String,
}

/// Lists loaded from the side table, keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct SideTable {
    lists: BTreeMap<String, SideEntry>,
}

impl SideTable {
    /// Load and validate the JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RelayError::io(path, e))?;
        Self::from_json(&text)
            .map_err(|e| RelayError::Config(format!("side table {}: {e}", path.display())))
    }

    /// Parse the JSON document.
    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, SideEntry> = serde_json::from_str(text)?;
        Ok(Self {
            lists: raw
                .into_iter()
                .map(|(name, entry)| (name.to_lowercase(), entry))
                .collect(),
        })
    }

    /// Number of lists described.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// `true` if the table describes no list.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

impl ListKind for SideTable {
    fn kind(&self) -> &'static str {
        "side-table"
    }

    fn resolve(&self, _store: &Store, name: &str) -> Result<Option<Resolved>> {
        let Some(entry) = self.lists.get(name) else {
            return Ok(None);
        };
        let display_name = entry.display_name.as_deref().unwrap_or(name);
        let mut list = List::new(name, display_name);
        list.reason = format!("via the {display_name} mailing list");
        for receiver in &entry.receivers {
            list.add_recipient(&receiver.addr, &receiver.name, &receiver.token);
        }
        for sender in &entry.senders {
            list.add_sender(sender);
        }
        for moderator in &entry.moderators {
            list.add_moderator(moderator);
        }
        Ok(Some(Resolved {
            list,
            orgs: Default::default(),
        }))
    }
}
