//! Per-message delivery tracking: an append-only log replayed into
//! [`MailMetadata`] and held under an exclusive lock while a message is
//! processed.

mod file;
mod lock;
mod metadata;
mod record;

pub use file::TrackingFile;
pub use lock::LockedFile;
pub use metadata::MailMetadata;
pub use record::{Entry, ParseError, Record};
