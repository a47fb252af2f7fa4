//! Class lists: `class-<id>-registered` and `class-<id>-waitlist`.

use std::collections::BTreeSet;

use rusqlite::OptionalExtension;

use super::leaders::org_leaders;
use super::store::Store;
use super::{ListKind, Resolved};
use crate::error::Result;
use crate::model::list::List;

/// Registrants of a class, split at its enrollment limit.
#[derive(Debug, Default)]
pub struct ClassLists;

fn parse_name(name: &str) -> Option<(i64, bool)> {
    let rest = name.strip_prefix("class-")?;
    let (id, which) = rest.split_once('-')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let waitlist = match which {
        "registered" => false,
        "waitlist" => true,
        _ => return None,
    };
    Some((id.parse().ok()?, waitlist))
}

impl ListKind for ClassLists {
    fn kind(&self) -> &'static str {
        "class"
    }

    fn resolve(&self, store: &Store, name: &str) -> Result<Option<Resolved>> {
        let Some((id, waitlist)) = parse_name(name) else {
            return Ok(None);
        };

        let class = store
            .conn()
            .query_row(
                "SELECT name, start, org, enrollment_limit FROM class WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    ))
                },
            )
            .optional()?;
        let Some((class_name, start, org, limit)) = class else {
            return Ok(None);
        };

        let registrants = {
            let mut stmt = store.conn().prepare_cached(
                "SELECT first_name, last_name, email FROM class_reg WHERE class = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map([id], |row| {
                let first: Option<String> = row.get(0)?;
                let last: Option<String> = row.get(1)?;
                let email: Option<String> = row.get(2)?;
                let name = format!("{} {}", first.unwrap_or_default(), last.unwrap_or_default());
                Ok((name.trim().to_string(), email.unwrap_or_default()))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        // 0 means unlimited enrollment
        let cut = match usize::try_from(limit) {
            Ok(0) | Err(_) => registrants.len(),
            Ok(n) => n.min(registrants.len()),
        };
        let selected = if waitlist {
            &registrants[cut..]
        } else {
            &registrants[..cut]
        };

        let mut list = List::new(name, class_name.as_str());
        list.no_unsubscribe = true;
        list.reason = if waitlist {
            format!("because they are on the waiting list for the {class_name} class on {start}")
        } else {
            format!("because they are registered for the {class_name} class on {start}")
        };
        for (person, email) in selected {
            list.add_recipient(email, person, "");
        }

        let orgs: BTreeSet<i64> = org.into_iter().collect();
        for leader in org_leaders(store, &orgs)? {
            list.add_sender(&leader.email);
        }
        Ok(Some(Resolved { list, orgs }))
    }
}
