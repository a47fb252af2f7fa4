//! Named lists: explicit subscriptions in the `list` table.

use std::collections::BTreeSet;

use rusqlite::OptionalExtension;

use super::store::{Store, PERSON_COLUMNS};
use super::{ListKind, Resolved};
use crate::error::Result;
use crate::model::list::List;

/// Lists stored by name with their subscribers and authorized senders.
#[derive(Debug, Default)]
pub struct NamedLists;

impl ListKind for NamedLists {
    fn kind(&self) -> &'static str {
        "named"
    }

    fn resolve(&self, store: &Store, name: &str) -> Result<Option<Resolved>> {
        let row = store
            .conn()
            .query_row(
                "SELECT id, name, display_name, org FROM list WHERE lower(name) = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, list_name, display_name, org)) = row else {
            return Ok(None);
        };

        let display_name = display_name
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(list_name);
        let mut list = List::new(name, display_name.as_str());
        list.reason = format!("via the {display_name} mailing list");

        let members = format!(
            "SELECT {PERSON_COLUMNS} FROM list_person lp JOIN person p ON p.id = lp.person \
             WHERE lp.list = ?1 AND lp.subscribed AND NOT lp.unsubscribed ORDER BY p.sort_name"
        );
        for person in store.people(&members, [id])? {
            list.add_recipient(&person.email, &person.name, &person.token);
        }

        let senders = format!(
            "SELECT {PERSON_COLUMNS} FROM list_person lp JOIN person p ON p.id = lp.person \
             WHERE lp.list = ?1 AND lp.sender"
        );
        for person in store.people(&senders, [id])? {
            list.add_sender(&person.email);
        }

        Ok(Some(Resolved {
            list,
            orgs: org.into_iter().collect::<BTreeSet<_>>(),
        }))
    }
}
