//! Read-only access to the portal database.

use std::path::Path;

use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OpenFlags, Params};

use crate::error::{RelayError, Result};

/// Columns selected by every person query, in [`Person::from_row`] order.
pub(crate) const PERSON_COLUMNS: &str = "p.email, p.informal_name, p.unsubscribe_token";

/// A person as far as list delivery is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub email: String,
    pub name: String,
    pub token: String,
}

impl Person {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            email: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            token: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    }
}

/// The list data store: one read-only connection for the whole run.
pub struct Store {
    conn: Connection,
    today: String,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("today", &self.today).finish()
    }
}

impl Store {
    /// Open the database read-only.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RelayError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "database not found"),
            ));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA query_only=ON;")?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already open connection (tests use in-memory databases).
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            today: Local::now().date_naive().format("%Y-%m-%d").to_string(),
        }
    }

    /// Override the date used for "current" registrations and event tense.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today.format("%Y-%m-%d").to_string();
        self
    }

    /// Today's date as stored in the database (`YYYY-MM-DD`).
    pub fn today(&self) -> &str {
        &self.today
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query selecting [`PERSON_COLUMNS`]; people without an email
    /// address are skipped.
    pub(crate) fn people<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Person>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, Person::from_row)?;
        let mut people = Vec::new();
        for person in rows {
            let person = person?;
            if !person.email.trim().is_empty() {
                people.push(person);
            }
        }
        Ok(people)
    }
}
