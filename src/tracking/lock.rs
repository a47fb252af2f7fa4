//! Exclusive advisory locks (`flock(2)`) held for the lifetime of a guard.

use std::fs::File;
use std::io;
use std::ops::{Deref, DerefMut};
use std::os::unix::io::AsRawFd;

/// An open file holding an exclusive `flock`. The lock is released when the
/// guard is dropped, on every exit path.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
}

impl LockedFile {
    /// Block until the exclusive lock is granted.
    ///
    /// # Errors
    ///
    /// see flock(2) ERRORS
    pub fn acquire(file: File) -> io::Result<Self> {
        flock(&file, libc::LOCK_EX)?;
        Ok(Self { file })
    }

    /// Take the lock if nobody holds it; `Ok(None)` if it is busy.
    ///
    /// # Errors
    ///
    /// see flock(2) ERRORS
    pub fn try_acquire(file: File) -> io::Result<Option<Self>> {
        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        match unsafe { libc::flock(file.as_raw_fd(), operation) } {
            0 => return Ok(()),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

impl Deref for LockedFile {
    type Target = File;

    fn deref(&self) -> &File {
        &self.file
    }
}

impl DerefMut for LockedFile {
    fn deref_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = flock(&self.file, libc::LOCK_UN) {
            tracing::warn!(error = %e, "Failed to release tracking file lock");
        }
    }
}
