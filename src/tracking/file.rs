//! A locked, replayed tracking file.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::lock::LockedFile;
use super::metadata::MailMetadata;
use super::record::{Entry, ParseError, Record};
use crate::error::{RelayError, Result};

/// The tracking file of one queued message, held under an exclusive lock
/// for as long as this value lives.
#[derive(Debug)]
pub struct TrackingFile {
    path: PathBuf,
    file: LockedFile,
    metadata: MailMetadata,
}

impl TrackingFile {
    /// Open an existing tracking file, wait for its lock and replay it.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| RelayError::io(path, e))?;
        let mut file = LockedFile::acquire(file).map_err(|e| RelayError::io(path, e))?;

        let text = read_all(&mut file).map_err(|e| RelayError::io(path, e))?;
        let text = String::from_utf8(text).map_err(|e| {
            let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
            let line = valid.iter().filter(|&&b| b == b'\n').count() + 1;
            RelayError::Tracking {
                path: path.to_path_buf(),
                source: ParseError::Encoding { line },
            }
        })?;
        let metadata = MailMetadata::replay(&text).map_err(|source| RelayError::Tracking {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), lists = ?metadata.lists, "Replayed tracking file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            metadata,
        })
    }

    /// State replayed so far, including records appended through `self`.
    pub fn metadata(&self) -> &MailMetadata {
        &self.metadata
    }

    /// Path of the file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append a record, then fold it into [`Self::metadata`].
    ///
    /// Call only after the side effect the record describes has happened.
    pub fn append(&mut self, record: Record) -> Result<()> {
        let entry = Entry::now(record);
        let line = format!("{entry}\n");
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| RelayError::io(&self.path, e))?;
        self.metadata.apply(&entry.record);
        Ok(())
    }

    /// Fold a record into [`Self::metadata`] without writing it, for runs
    /// that must leave the file untouched.
    pub fn note(&mut self, record: Record) {
        self.metadata.apply(&record);
    }

    /// Current contents, for archiving.
    pub fn snapshot(&mut self) -> Result<Vec<u8>> {
        read_all(&mut self.file).map_err(|e| RelayError::io(&self.path, e))
    }
}

fn read_all(file: &mut LockedFile) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
