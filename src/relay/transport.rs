//! Outbound delivery: hand raw MIME to an SMTP relay.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport};
use tracing::{debug, info};

use crate::config::DeliveryConfig;
use crate::error::{RelayError, Result};

/// Something that can deliver a raw message to envelope recipients.
pub trait Transport {
    /// Send `message` with envelope sender `from` to every address in `to`.
    fn send(&self, from: &str, to: &[String], message: &[u8]) -> Result<()>;
}

/// Build a lettre envelope, rejecting addresses lettre cannot parse.
pub fn envelope(from: &str, to: &[String]) -> Result<Envelope> {
    let from: Address = from
        .parse()
        .map_err(|_| RelayError::Address(from.to_string()))?;
    let to = to
        .iter()
        .map(|rcpt| {
            rcpt.parse::<Address>()
                .map_err(|_| RelayError::Address(rcpt.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    Envelope::new(Some(from), to).map_err(|e| RelayError::Transport(e.to_string()))
}

/// Delivery through a configured SMTP relay.
pub struct SmtpRelay {
    inner: SmtpTransport,
}

impl SmtpRelay {
    /// Configure the relay connection; nothing is opened until the first send.
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let builder = if config.starttls {
            SmtpTransport::starttls_relay(&config.relay_host)
                .map_err(|e| RelayError::Config(format!("relay {}: {e}", config.relay_host)))?
        } else {
            SmtpTransport::builder_dangerous(config.relay_host.as_str())
        };
        let mut builder = builder
            .port(config.relay_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        info!(
            host = %config.relay_host,
            port = config.relay_port,
            starttls = config.starttls,
            "Configured SMTP relay"
        );
        Ok(Self {
            inner: builder.build(),
        })
    }
}

impl Transport for SmtpRelay {
    fn send(&self, from: &str, to: &[String], message: &[u8]) -> Result<()> {
        let envelope = envelope(from, to)?;
        lettre::Transport::send_raw(&self.inner, &envelope, message)
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        debug!(from, recipients = to.len(), bytes = message.len(), "Sent");
        Ok(())
    }
}

/// A message accepted by [`CapturingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub from: String,
    pub to: Vec<String>,
    pub data: Vec<u8>,
}

impl SentMessage {
    /// Message bytes as (lossy) text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Records messages instead of sending them (`run --dry-run`, tests).
///
/// Clones share the same record, so a caller can keep a handle while the
/// driver owns another.
#[derive(Debug, Clone, Default)]
pub struct CapturingTransport {
    sent: Rc<RefCell<Vec<SentMessage>>>,
    refuse: Rc<RefCell<Vec<String>>>,
}

impl CapturingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send that includes `address` (for exercising retries).
    pub fn refuse(&self, address: &str) {
        self.refuse.borrow_mut().push(address.to_lowercase());
    }

    /// Stop refusing any address.
    pub fn accept_all(&self) {
        self.refuse.borrow_mut().clear();
    }

    /// Everything captured so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.borrow().clone()
    }

    /// Captured messages addressed to `address`.
    pub fn sent_to(&self, address: &str) -> Vec<SentMessage> {
        let address = address.to_lowercase();
        self.sent
            .borrow()
            .iter()
            .filter(|m| m.to.iter().any(|t| t.to_lowercase() == address))
            .cloned()
            .collect()
    }
}

impl Transport for CapturingTransport {
    fn send(&self, from: &str, to: &[String], message: &[u8]) -> Result<()> {
        envelope(from, to)?;
        let refused = self.refuse.borrow();
        if let Some(bad) = to.iter().find(|t| refused.contains(&t.to_lowercase())) {
            return Err(RelayError::Transport(format!("{bad}: refused")));
        }
        info!(from, to = ?to, bytes = message.len(), "Captured message (not sent)");
        self.sent.borrow_mut().push(SentMessage {
            from: from.to_string(),
            to: to.to_vec(),
            data: message.to_vec(),
        });
        Ok(())
    }
}
