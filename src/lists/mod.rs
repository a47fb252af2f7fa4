//! List resolution: list name → [`List`], asking each list kind in turn.
//!
//! Kinds are tried in a fixed order (named, event/task, role, class, then
//! the optional JSON side table); the first one that recognizes the name
//! wins.

pub mod class;
pub mod event;
pub mod leaders;
pub mod named;
pub mod role;
pub mod sidetable;
pub mod store;

use std::collections::BTreeSet;

use rusqlite::OptionalExtension;
use tracing::{debug, info};

use crate::config::{Config, SiteConfig};
use crate::error::{RelayError, Result};
use crate::model::list::List;

pub use sidetable::SideTable;
pub use store::{Person, Store};

/// A list as produced by one kind, before leaders are merged in.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub list: List,
    /// Organizations whose leaders are copied on and moderate the list.
    pub orgs: BTreeSet<i64>,
}

/// One way of turning a name into a list.
pub trait ListKind: std::fmt::Debug {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// `Ok(None)` when the name is not of this kind or names nothing.
    fn resolve(&self, store: &Store, name: &str) -> Result<Option<Resolved>>;
}

/// Resolves list names against the store and the side table.
#[derive(Debug)]
pub struct ListResolver {
    store: Store,
    kinds: Vec<Box<dyn ListKind>>,
    wiretap: Vec<String>,
    admin_role: String,
}

impl ListResolver {
    /// Build a resolver over `store` with the standard kinds.
    pub fn new(store: Store, site: &SiteConfig, side_table: Option<SideTable>) -> Self {
        let mut kinds: Vec<Box<dyn ListKind>> = vec![
            Box::new(named::NamedLists),
            Box::new(event::EventLists),
            Box::new(role::RoleLists),
            Box::new(class::ClassLists),
        ];
        if let Some(table) = side_table {
            kinds.push(Box::new(table));
        }
        Self {
            store,
            kinds,
            wiretap: site.wiretap.clone(),
            admin_role: site.admin_role.clone(),
        }
    }

    /// Open the configured database (and side table, if any).
    pub fn open(config: &Config) -> Result<Self> {
        let store = Store::open_readonly(&config.store.db_path)?;
        let side_table = match &config.store.side_table {
            Some(path) => Some(SideTable::load(path)?),
            None => None,
        };
        Ok(Self::new(store, &config.site, side_table))
    }

    /// Resolve a list name (case-insensitive). `Ok(None)` for unknown names.
    pub fn resolve(&self, name: &str) -> Result<Option<List>> {
        let name = name.trim().to_lowercase();
        for kind in &self.kinds {
            let Some(Resolved { mut list, orgs }) = kind.resolve(&self.store, &name)? else {
                continue;
            };
            let leaders = leaders::org_leaders(&self.store, &orgs)?;
            leaders::merge(&mut list, &leaders, &self.wiretap);
            info!(
                list = %name,
                kind = kind.kind(),
                recipients = list.recipients.len(),
                bcc = list.bcc.len(),
                "Resolved list"
            );
            return Ok(Some(list));
        }
        debug!(list = %name, "No such list");
        Ok(None)
    }

    /// Holders of the administrator role; a missing role is an invariant
    /// violation.
    pub fn admins(&self) -> Result<Vec<Person>> {
        let role_id = self
            .store
            .conn()
            .query_row(
                "SELECT id FROM role WHERE name = ?1",
                [&self.admin_role],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .ok_or_else(|| {
                RelayError::Invariant(format!(
                    "administrator role '{}' does not exist",
                    self.admin_role
                ))
            })?;
        let sql = format!(
            "SELECT DISTINCT {} FROM person p JOIN person_role pr ON pr.person = p.id \
             WHERE pr.role = ?1 ORDER BY p.sort_name",
            store::PERSON_COLUMNS
        );
        self.store.people(&sql, [role_id])
    }
}
