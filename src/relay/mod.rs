//! The relay driver: process every pending queue entry, list by list.
//!
//! For each addressed list a message is either rejected (unknown list),
//! held for moderation, or sent one personalized copy per recipient. Every
//! step is recorded in the message's tracking file after it happened, so a
//! later run picks up exactly where an interrupted one stopped.

pub mod approval;
pub mod archive;
pub mod context;
pub mod forward;
pub mod pacer;
pub mod queue;
pub mod transport;

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SiteConfig;
use crate::error::{RelayError, Result};
use crate::mime::header::HeaderBlock;
use crate::mime::{Footer, Message};
use crate::model::address::EmailAddress;
use crate::model::list::{List, Recipient};
use crate::moderation::{needs_moderation, Verdicts};
use crate::tracking::{Record, TrackingFile};

pub use context::RelayContext;
use pacer::Pacer;

/// How processing of one message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every list was sent or rejected; the entry was removed.
    Completed,
    /// Some list waits for a moderator; the entry is no longer pending.
    AwaitingModeration,
    /// A send failed; the entry stays pending for the next run.
    Retry,
}

/// What happened to one list of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListOutcome {
    Done,
    Held,
    Incomplete,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub reclaimed: usize,
    pub handled: usize,
    pub completed: usize,
    pub awaiting_moderation: usize,
    pub retried: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} handled, {} completed, {} awaiting moderation, {} to retry, {} failed, {} reclaimed",
            self.handled,
            self.completed,
            self.awaiting_moderation,
            self.retried,
            self.failed,
            self.reclaimed
        )
    }
}

/// Processes the queue of one [`RelayContext`].
pub struct Driver<'a> {
    ctx: &'a RelayContext,
    pacer: Pacer,
    worklist: VecDeque<String>,
}

impl<'a> Driver<'a> {
    pub fn new(ctx: &'a RelayContext) -> Self {
        Self {
            ctx,
            pacer: Pacer::new(ctx.config.delivery.send_interval()),
            worklist: VecDeque::new(),
        }
    }

    /// Reclaim stale entries, then process every pending message, including
    /// messages approved during this run.
    pub fn run(&mut self) -> Result<RunSummary> {
        let ctx = self.ctx;
        let mut summary = RunSummary::default();
        if !ctx.dry_run {
            summary.reclaimed = ctx.queue.reclaim_stale(ctx.config.queue.stale_after())?;
        }
        self.worklist.extend(ctx.queue.pending()?);
        info!(
            queue = %ctx.queue.dir().display(),
            archive = %ctx.archive.dir().display(),
            pending = self.worklist.len(),
            dry_run = ctx.dry_run,
            "Starting relay run"
        );

        while let Some(id) = self.worklist.pop_front() {
            match self.ctx.queue.is_pending(&id) {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    debug!(id = %id, "Entry no longer pending, skipping");
                    continue;
                }
            }
            summary.handled += 1;
            match self.handle(&id) {
                Ok(Outcome::Completed) => summary.completed += 1,
                Ok(Outcome::AwaitingModeration) => summary.awaiting_moderation += 1,
                Ok(Outcome::Retry) => summary.retried += 1,
                Err(e) => {
                    error!(id = %id, error = %e, "Message processing aborted");
                    summary.failed += 1;
                }
            }
        }

        info!(%summary, "Relay run finished");
        Ok(summary)
    }

    /// Process one queued message while holding its tracking lock.
    pub fn handle(&mut self, id: &str) -> Result<Outcome> {
        let ctx = self.ctx;
        let queue = &ctx.queue;
        let raw = queue.read_message(id)?;
        let mut tracking = TrackingFile::open(&queue.tracking_path(id))?;
        let message = Message::parse(&raw);

        if !tracking.metadata().received {
            let lists = message.addressed_lists(&ctx.config.site.domain);
            if lists.is_empty() {
                warn!(id, "Message is not addressed to any list");
            }
            self.record(&mut tracking, Record::Received { lists })?;
        }
        if tracking.metadata().verdicts.is_none() {
            let verdicts = Verdicts::from_headers(message.header());
            self.record(&mut tracking, Record::Verdicts(verdicts))?;
        }
        let verdicts = tracking.metadata().verdicts.clone().unwrap_or_default();
        debug!(
            id,
            %verdicts,
            message_id = message.message_id().as_deref().unwrap_or(""),
            subject = %message.subject(),
            "Processing message"
        );

        let mut failures = false;
        let lists = tracking.metadata().lists.clone();
        for name in &lists {
            let metadata = tracking.metadata();
            if metadata.sent_to_list.contains(name) || metadata.rejects.contains(name) {
                continue;
            }
            match self.handle_list(id, name, &raw, &message, &verdicts, &mut tracking) {
                Ok(ListOutcome::Done) | Ok(ListOutcome::Held) => {}
                Ok(ListOutcome::Incomplete) => failures = true,
                Err(e) if e.is_transient() => {
                    warn!(id, list = %name, error = %e, "List processing failed, will retry");
                    failures = true;
                }
                Err(e) => return Err(e),
            }
        }

        if tracking.metadata().is_complete() {
            drop(tracking);
            if !ctx.dry_run {
                queue.remove(id)?;
            }
            info!(id, "Message completed");
            Ok(Outcome::Completed)
        } else if failures {
            info!(id, "Message left pending for retry");
            Ok(Outcome::Retry)
        } else {
            if !ctx.dry_run {
                queue.set_pending(id, false)?;
            }
            info!(id, "Message awaiting moderation");
            Ok(Outcome::AwaitingModeration)
        }
    }

    fn handle_list(
        &mut self,
        id: &str,
        name: &str,
        raw: &[u8],
        message: &Message,
        verdicts: &Verdicts,
        tracking: &mut TrackingFile,
    ) -> Result<ListOutcome> {
        let ctx = self.ctx;
        let site = &ctx.config.site;

        if let Some(list_name) = approval::moderated_list(name) {
            self.handle_approval(id, list_name, raw, message, tracking)?;
            self.record(
                tracking,
                Record::ListSent {
                    list: name.to_string(),
                },
            )?;
            return Ok(ListOutcome::Done);
        }

        let Some(list) = ctx.resolver.resolve(name)? else {
            let admins = self.admin_addresses()?;
            let fwd = forward::admin_forward(
                site,
                message,
                raw,
                &format!("No such mailing list \"{name}\"."),
                &admins,
            )?;
            ctx.transport.send(&fwd.from, &fwd.to, &fwd.data)?;
            self.record(
                tracking,
                Record::UnknownRecipient {
                    list: name.to_string(),
                },
            )?;
            info!(id, list = %name, "Unknown list, forwarded to administrators");
            return Ok(ListOutcome::Done);
        };

        if !tracking.metadata().approved.contains(name) {
            let (held, reasons) =
                needs_moderation(verdicts, &list.senders, message.from_header().as_deref());
            if held {
                if tracking.metadata().moderating.contains(name) {
                    debug!(id, list = %name, "Still awaiting moderation");
                    return Ok(ListOutcome::Held);
                }
                let moderators = self.approvers(&list)?;
                let fwd = forward::moderation_request(
                    site,
                    &list,
                    message,
                    raw,
                    id,
                    &reasons,
                    &moderators,
                )?;
                ctx.transport.send(&fwd.from, &fwd.to, &fwd.data)?;
                self.record(
                    tracking,
                    Record::ModerationRequested {
                        list: name.to_string(),
                    },
                )?;
                info!(id, list = %name, ?reasons, "Held for moderation");
                return Ok(ListOutcome::Held);
            }
        }

        self.deliver(id, &list, raw, message, tracking)
    }

    /// Send one personalized copy to every recipient and blind copy not yet
    /// sent, then mark the list sent and archive.
    fn deliver(
        &mut self,
        id: &str,
        list: &List,
        raw: &[u8],
        message: &Message,
        tracking: &mut TrackingFile,
    ) -> Result<ListOutcome> {
        let ctx = self.ctx;
        let site = &ctx.config.site;
        let from = forward::bounce_address(site, &list.name);
        let mut failed = 0usize;
        let mut sent = 0usize;

        for (address, recipient, bcc) in list.deliveries() {
            if tracking.metadata().sent.contains(address) {
                continue;
            }
            let (header, footer) = personalize(message, list, site, address, recipient, bcc);
            let data = match message.render(&header, footer.as_ref()) {
                Ok(data) => data,
                Err(e) => {
                    warn!(id, list = %list.name, to = %address, error = %e, "Rendering failed");
                    failed += 1;
                    continue;
                }
            };

            self.pacer.wait();
            match ctx.transport.send(&from, std::slice::from_ref(address), &data) {
                Ok(()) => {
                    self.record(
                        tracking,
                        Record::Sent {
                            address: address.clone(),
                        },
                    )?;
                    sent += 1;
                }
                // A recipient the transport can never accept is settled, not retried
                Err(RelayError::Address(bad)) if bad == *address => {
                    warn!(id, list = %list.name, to = %address, "Invalid recipient address, skipped");
                    self.record(
                        tracking,
                        Record::Comment {
                            text: format!("Skipped invalid address {address:?} on {}", list.name),
                        },
                    )?;
                }
                Err(e) => {
                    warn!(id, list = %list.name, to = %address, error = %e, "Send failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!(id, list = %list.name, sent, failed, "List partially sent");
            return Ok(ListOutcome::Incomplete);
        }

        self.record(
            tracking,
            Record::ListSent {
                list: list.name.clone(),
            },
        )?;
        info!(id, list = %list.name, sent, "List sent");

        if ctx.dry_run {
            return Ok(ListOutcome::Done);
        }
        let snapshot = tracking.snapshot()?;
        if let Err(e) = ctx.archive.store(&list.name, raw, &snapshot) {
            error!(id, list = %list.name, error = %e, "Archiving failed");
        }
        Ok(ListOutcome::Done)
    }

    /// Apply a moderator's reply to the held message it names.
    ///
    /// Replies that cannot be applied are logged and noted in the reply's
    /// tracking file; they never abort the run.
    fn handle_approval(
        &mut self,
        id: &str,
        list_name: &str,
        raw: &[u8],
        reply: &Message,
        tracking: &mut TrackingFile,
    ) -> Result<()> {
        let Some(original) = approval::reply_marker(raw) else {
            return self.ignore_reply(id, tracking, "no moderation marker in reply");
        };
        let ctx = self.ctx;
        let Some(list) = ctx.resolver.resolve(list_name)? else {
            return self.ignore_reply(id, tracking, &format!("no such list \"{list_name}\""));
        };

        let approvers: BTreeSet<String> = self.approvers(&list)?.into_iter().collect();
        let reply_verdicts = tracking.metadata().verdicts.clone().unwrap_or_default();
        let (refused, reasons) =
            needs_moderation(&reply_verdicts, &approvers, reply.from_header().as_deref());
        if refused {
            return self.ignore_reply(
                id,
                tracking,
                &format!("approval not accepted: {}", reasons.join(" ")),
            );
        }

        if original == id {
            return self.ignore_reply(id, tracking, "reply names itself");
        }
        let queue = &ctx.queue;
        let original_path = queue.tracking_path(&original);
        if !original_path.is_file() {
            return self.ignore_reply(id, tracking, &format!("message {original} is not queued"));
        }
        let mut held = TrackingFile::open(&original_path)?;
        let metadata = held.metadata();
        if !metadata.moderating.contains(list_name) || metadata.approved.contains(list_name) {
            drop(held);
            return self.ignore_reply(
                id,
                tracking,
                &format!("message {original} is not awaiting approval for {list_name}"),
            );
        }

        let moderator = reply.from().map(|a| a.canonical());
        if ctx.dry_run {
            info!(id, original = %original, list = %list_name, "Dry run: approval not applied");
            return Ok(());
        }
        held.append(Record::Approved {
            list: list_name.to_string(),
            by: moderator.clone(),
        })?;
        drop(held);
        queue.set_pending(&original, true)?;
        if !self.worklist.contains(&original) {
            self.worklist.push_back(original.clone());
        }
        info!(
            id,
            original = %original,
            list = %list_name,
            moderator = moderator.as_deref().unwrap_or(""),
            "Moderator approved message"
        );
        Ok(())
    }

    fn ignore_reply(&self, id: &str, tracking: &mut TrackingFile, why: &str) -> Result<()> {
        warn!(id, reason = why, "Ignoring moderation reply");
        self.record(
            tracking,
            Record::Comment {
                text: format!("Ignored moderation reply: {why}"),
            },
        )
    }

    /// Append `record` after its side effect; a dry run only keeps it in memory.
    fn record(&self, tracking: &mut TrackingFile, record: Record) -> Result<()> {
        if self.ctx.dry_run {
            tracking.note(record);
            Ok(())
        } else {
            tracking.append(record)
        }
    }

    /// Who may approve held messages for `list`: its moderators, or the
    /// administrators when it has none.
    fn approvers(&self, list: &List) -> Result<Vec<String>> {
        if list.moderators.is_empty() {
            self.admin_addresses()
        } else {
            Ok(list.moderators.iter().cloned().collect())
        }
    }

    fn admin_addresses(&self) -> Result<Vec<String>> {
        let admins: Vec<String> = self
            .ctx
            .resolver
            .admins()?
            .into_iter()
            .map(|p| p.email.to_lowercase())
            .collect();
        if admins.is_empty() {
            return Err(RelayError::Invariant(format!(
                "administrator role '{}' has no members",
                self.ctx.config.site.admin_role
            )));
        }
        Ok(admins)
    }
}

/// Header and footer of the copy `address` gets through `list`.
///
/// Blind copies, lists without unsubscription and recipients without a token
/// get neither the unsubscribe headers nor a footer.
pub fn personalize(
    message: &Message,
    list: &List,
    site: &SiteConfig,
    address: &str,
    recipient: &Recipient,
    bcc: bool,
) -> (HeaderBlock, Option<Footer>) {
    let unsubscribe = (!bcc && !list.no_unsubscribe && !recipient.token.is_empty())
        .then(|| site.unsubscribe_url(&recipient.token, &list.name));
    let header = message.list_header(list, &site.domain, unsubscribe.as_deref());
    let footer = unsubscribe.as_deref().map(|url| {
        let to = EmailAddress {
            display_name: recipient.name.trim().to_string(),
            address: address.to_string(),
        };
        Footer::new(&to.display(), &list.reason, url)
    });
    (header, footer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig {
        SiteConfig {
            domain: "lists.example.org".into(),
            base_url: "https://example.org".into(),
            ..SiteConfig::default()
        }
    }

    fn list() -> List {
        let mut list = List::new("cert", "CERT Team");
        list.reason = "via the CERT Team mailing list".into();
        list.add_recipient("pat@example.org", "Pat Member", "tok-pat");
        list.add_recipient("robin@example.org", "", "");
        list.add_bcc("lou@example.org", "Lou Leader");
        list
    }

    fn copy_for(list: &List, address: &str) -> String {
        let message = Message::parse(b"From: a@example.org\r\nSubject: s\r\n\r\nHello\r\n");
        let (recipient, bcc) = match list.recipients.get(address) {
            Some(r) => (r, false),
            None => (&list.bcc[address], true),
        };
        let (header, footer) = personalize(&message, list, &site(), address, recipient, bcc);
        String::from_utf8(message.render(&header, footer.as_ref()).unwrap()).unwrap()
    }

    #[test]
    fn test_personalize_subscriber() {
        let text = copy_for(&list(), "pat@example.org");
        assert!(text.contains("List-Unsubscribe: <https://example.org/unsubscribe/tok-pat/cert>"));
        assert!(text.contains(
            "This message was sent to Pat Member <pat@example.org> via the CERT Team mailing list."
        ));
    }

    #[test]
    fn test_personalize_without_token_or_as_blind_copy() {
        let list = list();
        for address in ["robin@example.org", "lou@example.org"] {
            let text = copy_for(&list, address);
            assert!(!text.contains("List-Unsubscribe"), "{address}");
            assert!(!text.contains("This message was sent to"), "{address}");
        }
    }

    #[test]
    fn test_personalize_honors_no_unsubscribe() {
        let mut list = list();
        list.no_unsubscribe = true;
        let text = copy_for(&list, "pat@example.org");
        assert!(!text.contains("List-Unsubscribe"));
        assert!(text.ends_with("\r\n\r\nHello\r\n"));
    }
}
