//! Archive of delivered messages: `<dir>/<list>/<timestamp>[-N]` with the
//! tracking snapshot beside it as `<timestamp>[-N].data`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::error::{RelayError, Result};

/// Longest list-name component used for a directory name.
const MAX_LIST_COMPONENT: usize = 64;

#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a delivered message and its tracking snapshot. Never overwrites
    /// an existing archive entry.
    pub fn store(&self, list: &str, raw: &[u8], tracking: &[u8]) -> Result<PathBuf> {
        let list_dir = self.dir.join(sanitize_filename_part(list, MAX_LIST_COMPONENT));
        fs::create_dir_all(&list_dir).map_err(|e| RelayError::io(&list_dir, e))?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let (path, mut file) = create_unique(&list_dir, &stamp)?;
        file.write_all(raw)
            .and_then(|()| file.sync_all())
            .map_err(|e| RelayError::io(&path, e))?;

        let tracking_path = path.with_extension("data");
        fs::write(&tracking_path, tracking).map_err(|e| RelayError::io(&tracking_path, e))?;

        info!(list, path = %path.display(), "Archived message");
        Ok(path)
    }
}

/// Create `<dir>/<stamp>`, or `<stamp>-1`, `<stamp>-2`… if taken.
fn create_unique(dir: &Path, stamp: &str) -> Result<(PathBuf, fs::File)> {
    let mut n = 0u32;
    loop {
        let name = if n == 0 {
            stamp.to_string()
        } else {
            format!("{stamp}-{n}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(RelayError::io(path, e)),
        }
    }
}

/// Keep a name safe as a single path component.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' || c == '+' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        sanitized
    }
}
