//! Event and task lists: `event-<id>-<verb>` and `task-<id>-<verb>`.
//!
//! | verb       | who                                        |
//! |------------|--------------------------------------------|
//! | `signedup` | people on a shift of the event/task        |
//! | `signedin` | people whose attendance was recorded       |
//! | `invited`  | holders of a role invited to the event/task |

use std::collections::BTreeSet;

use rusqlite::OptionalExtension;

use super::leaders::org_leaders;
use super::store::{Store, PERSON_COLUMNS};
use super::{ListKind, Resolved};
use crate::error::Result;
use crate::model::list::List;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Event,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    SignedUp,
    SignedIn,
    Invited,
}

impl Scope {
    /// Restriction on the joined `task t` row.
    fn clause(self) -> &'static str {
        match self {
            Self::Event => "t.event = ?1",
            Self::Task => "t.id = ?1",
        }
    }
}

impl Verb {
    fn from_name(s: &str) -> Option<Self> {
        match s {
            "signedup" => Some(Self::SignedUp),
            "signedin" => Some(Self::SignedIn),
            "invited" => Some(Self::Invited),
            _ => None,
        }
    }

    /// Joins from `person p` to `task t`.
    fn joins(self) -> &'static str {
        match self {
            Self::SignedUp => {
                "JOIN shift_person sp ON sp.person = p.id \
                 JOIN shift s ON s.id = sp.shift \
                 JOIN task t ON t.id = s.task"
            }
            Self::SignedIn => {
                "JOIN task_person tp ON tp.person = p.id AND tp.attended \
                 JOIN task t ON t.id = tp.task"
            }
            Self::Invited => {
                "JOIN person_role pr ON pr.person = p.id \
                 JOIN task_role tr ON tr.role = pr.role \
                 JOIN task t ON t.id = tr.task"
            }
        }
    }

    fn phrase(self) -> &'static str {
        match self {
            Self::SignedUp => "signed up for",
            Self::SignedIn => "signed in at",
            Self::Invited => "invited to",
        }
    }
}

/// Parse `event-12-signedup` into its parts.
fn parse_name(name: &str) -> Option<(Scope, i64, Verb)> {
    let (scope, rest) = if let Some(rest) = name.strip_prefix("event-") {
        (Scope::Event, rest)
    } else {
        (Scope::Task, name.strip_prefix("task-")?)
    };
    let (id, verb) = rest.split_once('-')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((scope, id.parse().ok()?, Verb::from_name(verb)?))
}

/// Lists of the people involved in an event or one of its tasks.
#[derive(Debug, Default)]
pub struct EventLists;

impl ListKind for EventLists {
    fn kind(&self) -> &'static str {
        "event"
    }

    fn resolve(&self, store: &Store, name: &str) -> Result<Option<Resolved>> {
        let Some((scope, id, verb)) = parse_name(name) else {
            return Ok(None);
        };

        let subject = match scope {
            Scope::Event => store
                .conn()
                .query_row("SELECT name, date FROM event WHERE id = ?1", [id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .optional()?,
            Scope::Task => store
                .conn()
                .query_row(
                    "SELECT t.name, e.name, e.date FROM task t JOIN event e ON e.id = t.event \
                     WHERE t.id = ?1",
                    [id],
                    |row| {
                        let task: String = row.get(0)?;
                        let event: String = row.get(1)?;
                        Ok((format!("{event} {task}"), row.get::<_, String>(2)?))
                    },
                )
                .optional()?,
        };
        let Some((label, date)) = subject else {
            return Ok(None);
        };

        let orgs_sql = match scope {
            Scope::Event => "SELECT DISTINCT org FROM task WHERE event = ?1 AND org IS NOT NULL",
            Scope::Task => "SELECT DISTINCT org FROM task WHERE id = ?1 AND org IS NOT NULL",
        };
        let orgs = {
            let mut stmt = store.conn().prepare_cached(orgs_sql)?;
            let rows = stmt.query_map([id], |row| row.get::<_, i64>(0))?;
            rows.collect::<rusqlite::Result<BTreeSet<i64>>>()?
        };

        let mut list = List::new(name, label.as_str());
        list.no_unsubscribe = true;
        let tense = if date.as_str() >= store.today() { "are" } else { "were" };
        list.reason = format!("because they {tense} {} {label} on {date}", verb.phrase());

        let sql = format!(
            "SELECT DISTINCT {PERSON_COLUMNS} FROM person p {} WHERE {} ORDER BY p.sort_name",
            verb.joins(),
            scope.clause()
        );
        for person in store.people(&sql, [id])? {
            list.add_recipient(&person.email, &person.name, "");
        }
        for leader in org_leaders(store, &orgs)? {
            list.add_sender(&leader.email);
        }

        Ok(Some(Resolved { list, orgs }))
    }
}
