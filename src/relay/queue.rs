//! The inbound queue directory.
//!
//! Each message is a pair of files: `<id>` holds the raw RFC 5322 message,
//! `<id>.data` its tracking file. The owner-execute bit on `<id>.data`
//! marks the message as ready for the driver.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

/// Owner-execute permission bit: "ready to process".
const PENDING_BIT: u32 = 0o100;

/// Suffix of tracking files.
const TRACKING_SUFFIX: &str = ".data";

static ENQUEUE_SEQ: AtomicU32 = AtomicU32::new(0);

/// A queue directory of `<id>` / `<id>.data` pairs.
#[derive(Debug, Clone)]
pub struct QueueDir {
    dir: PathBuf,
}

impl QueueDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory itself.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `true` for names that can be queue IDs: ASCII letters, digits, `.`,
    /// `_` and `-`, not starting with a dot and not a tracking file name.
    pub fn valid_id(id: &str) -> bool {
        !id.is_empty()
            && !id.starts_with('.')
            && !id.ends_with(TRACKING_SUFFIX)
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    }

    fn check_id(id: &str) -> Result<()> {
        if Self::valid_id(id) {
            Ok(())
        } else {
            Err(RelayError::InvalidEntry(id.to_string()))
        }
    }

    /// Path of the raw message.
    pub fn message_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    /// Path of the tracking file.
    pub fn tracking_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{TRACKING_SUFFIX}"))
    }

    /// Read the raw message.
    pub fn read_message(&self, id: &str) -> Result<Vec<u8>> {
        Self::check_id(id)?;
        let path = self.message_path(id);
        fs::read(&path).map_err(|e| RelayError::io(path, e))
    }

    /// IDs of pending messages, oldest name first.
    pub fn pending(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for (id, mode, _) in self.entries()? {
            if mode & PENDING_BIT != 0 {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// `true` if the message is marked ready.
    pub fn is_pending(&self, id: &str) -> Result<bool> {
        Self::check_id(id)?;
        let path = self.tracking_path(id);
        let meta = fs::metadata(&path).map_err(|e| RelayError::io(&path, e))?;
        Ok(meta.permissions().mode() & PENDING_BIT != 0)
    }

    /// Set or clear the ready bit.
    pub fn set_pending(&self, id: &str, pending: bool) -> Result<()> {
        Self::check_id(id)?;
        let path = self.tracking_path(id);
        let meta = fs::metadata(&path).map_err(|e| RelayError::io(&path, e))?;
        let mut perms = meta.permissions();
        let mode = perms.mode();
        perms.set_mode(if pending {
            mode | PENDING_BIT
        } else {
            mode & !PENDING_BIT
        });
        fs::set_permissions(&path, perms).map_err(|e| RelayError::io(&path, e))?;
        debug!(id, pending, "Updated queue entry state");
        Ok(())
    }

    /// Remove both files of an entry; missing files are not an error.
    pub fn remove(&self, id: &str) -> Result<()> {
        Self::check_id(id)?;
        for path in [self.message_path(id), self.tracking_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RelayError::io(path, e)),
            }
        }
        debug!(id, "Removed queue entry");
        Ok(())
    }

    /// Delete entries that are not pending and whose tracking file has not
    /// changed for `max_age`. Returns how many were removed.
    pub fn reclaim_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for (id, mode, modified) in self.entries()? {
            if mode & PENDING_BIT != 0 {
                continue;
            }
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            match self.remove(&id) {
                Ok(()) => removed += 1,
                Err(e) => warn!(id = %id, error = %e, "Failed to reclaim stale entry"),
            }
        }
        if removed > 0 {
            info!(removed, "Reclaimed stale queue entries");
        }
        Ok(removed)
    }

    /// Store a new message and mark it pending. The tracking file is created
    /// last, so a half-written entry is never picked up.
    pub fn enqueue(&self, raw: &[u8], id: Option<&str>) -> Result<String> {
        fs::create_dir_all(&self.dir).map_err(|e| RelayError::io(&self.dir, e))?;
        let id = match id {
            Some(id) => id.to_string(),
            None => format!(
                "{}-{}-{}",
                Utc::now().format("%Y%m%d%H%M%S%6f"),
                std::process::id(),
                ENQUEUE_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
        };
        Self::check_id(&id)?;

        let message_path = self.message_path(&id);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&message_path)
            .map_err(|e| RelayError::io(&message_path, e))?;
        file.write_all(raw)
            .and_then(|()| file.sync_all())
            .map_err(|e| RelayError::io(&message_path, e))?;

        let tracking_path = self.tracking_path(&id);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tracking_path)
            .map_err(|e| RelayError::io(&tracking_path, e))?;
        fs::set_permissions(&tracking_path, fs::Permissions::from_mode(0o600 | PENDING_BIT))
            .map_err(|e| RelayError::io(&tracking_path, e))?;

        info!(id = %id, bytes = raw.len(), "Enqueued message");
        Ok(id)
    }

    /// `(id, mode, mtime)` of every tracking file with a valid ID.
    fn entries(&self) -> Result<Vec<(String, u32, SystemTime)>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RelayError::io(&self.dir, e)),
        };
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| RelayError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(TRACKING_SUFFIX)) else {
                continue;
            };
            if !Self::valid_id(id) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => return Err(RelayError::io(entry.path(), e)),
            };
            let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
            entries.push((id.to_string(), meta.permissions().mode(), modified));
        }
        Ok(entries)
    }
}
