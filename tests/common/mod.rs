//! Shared setup for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::Connection;

use listrelay::config::{Config, SiteConfig};
use listrelay::lists::{ListResolver, Store};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn read_fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

/// In-memory portal database loaded with the schema and seed fixtures.
pub fn store() -> Store {
    store_with("")
}

/// Like [`store`], with `extra` SQL run after the seed.
pub fn store_with(extra: &str) -> Store {
    let conn = Connection::open_in_memory().unwrap();
    load_fixtures(&conn);
    conn.execute_batch(extra).unwrap();
    Store::from_connection(conn).with_today(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
}

/// Write the fixture database to `path`.
pub fn database_file(path: &Path) {
    load_fixtures(&Connection::open(path).unwrap());
}

fn load_fixtures(conn: &Connection) {
    conn.execute_batch(&std::fs::read_to_string(fixture("schema.sql")).unwrap())
        .unwrap();
    conn.execute_batch(&std::fs::read_to_string(fixture("seed.sql")).unwrap())
        .unwrap();
}

pub fn site() -> SiteConfig {
    SiteConfig {
        domain: "lists.example.org".into(),
        base_url: "https://example.org".into(),
        ..SiteConfig::default()
    }
}

pub fn resolver() -> ListResolver {
    ListResolver::new(store(), &site(), None)
}

/// Configuration rooted in `dir`, sending without delay.
pub fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.site = site();
    config.queue.dir = dir.join("queue");
    config.archive.dir = dir.join("archive");
    config.delivery.send_interval_ms = 0;
    config
}
