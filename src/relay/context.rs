//! Everything one relay run needs, owned in one place.

use crate::config::Config;
use crate::error::Result;
use crate::lists::ListResolver;

use super::archive::Archive;
use super::queue::QueueDir;
use super::transport::{CapturingTransport, SmtpRelay, Transport};

/// Configuration, list resolver, transport, queue and archive for a run.
pub struct RelayContext {
    pub config: Config,
    pub resolver: ListResolver,
    pub transport: Box<dyn Transport>,
    pub queue: QueueDir,
    pub archive: Archive,
    /// Process without changing the queue, tracking files or archive.
    pub dry_run: bool,
}

impl RelayContext {
    /// Assemble a context from parts; queue and archive come from `config`.
    pub fn new(config: Config, resolver: ListResolver, transport: Box<dyn Transport>) -> Self {
        let queue = QueueDir::new(&config.queue.dir);
        let archive = Archive::new(&config.archive.dir);
        Self {
            config,
            resolver,
            transport,
            queue,
            archive,
            dry_run: false,
        }
    }

    /// Leave queue, tracking files and archive as they are.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Open the store and configure the transport. With `dry_run`, messages
    /// are captured and logged instead of sent, and nothing on disk changes.
    pub fn open(config: Config, dry_run: bool) -> Result<Self> {
        let resolver = ListResolver::open(&config)?;
        let transport: Box<dyn Transport> = if dry_run {
            Box::new(CapturingTransport::new())
        } else {
            Box::new(SmtpRelay::new(&config.delivery)?)
        };
        Ok(Self::new(config, resolver, transport).with_dry_run(dry_run))
    }
}
