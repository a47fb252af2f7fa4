//! A resolved mailing list.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::address::canonical;

/// Sender-set sentinel meaning anyone may post without moderation.
pub const ANYONE: &str = "*";

/// One addressee of a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Recipient {
    /// Name used in the footer ("This message was sent to NAME …").
    pub name: String,
    /// Unsubscribe token; empty when the recipient cannot unsubscribe.
    pub token: String,
}

/// Point-in-time view of a mailing list, built by the resolver and left
/// untouched while a message is sent to it.
///
/// Every address key is lowercase. An address in `recipients` is never in
/// `bcc`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct List {
    /// Stable identifier; also the local part of the list address.
    pub name: String,
    /// Shown after "via" in the rewritten `From`.
    pub display_name: String,
    /// Addresses that may post without moderation, or [`ANYONE`].
    pub senders: BTreeSet<String>,
    /// Addresses that may approve held messages.
    pub moderators: BTreeSet<String>,
    /// Subscribers, keyed by lowercase address.
    pub recipients: BTreeMap<String, Recipient>,
    /// Blind copies (organization leaders, wiretaps).
    pub bcc: BTreeMap<String, Recipient>,
    /// Completion of "this was sent to NAME …".
    pub reason: String,
    /// Suppresses the unsubscribe footer and headers.
    pub no_unsubscribe: bool,
}

impl List {
    /// Create an empty list.
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Add a subscriber. Recipient status wins over an earlier BCC entry.
    pub fn add_recipient(&mut self, address: &str, name: &str, token: &str) {
        let key = canonical(address);
        if key.is_empty() {
            return;
        }
        self.bcc.remove(&key);
        self.recipients.entry(key).or_insert_with(|| Recipient {
            name: name.to_string(),
            token: token.to_string(),
        });
    }

    /// Add a blind copy unless the address already receives the list.
    pub fn add_bcc(&mut self, address: &str, name: &str) {
        let key = canonical(address);
        if key.is_empty() || self.recipients.contains_key(&key) {
            return;
        }
        self.bcc.entry(key).or_insert_with(|| Recipient {
            name: name.to_string(),
            token: String::new(),
        });
    }

    /// Authorize an address to post without moderation.
    pub fn add_sender(&mut self, address: &str) {
        let key = canonical(address);
        if !key.is_empty() {
            self.senders.insert(key);
        }
    }

    /// Authorize an address to approve held messages.
    pub fn add_moderator(&mut self, address: &str) {
        let key = canonical(address);
        if !key.is_empty() {
            self.moderators.insert(key);
        }
    }

    /// `true` if the sender set is the [`ANYONE`] sentinel.
    pub fn anyone_may_send(&self) -> bool {
        self.senders.contains(ANYONE)
    }

    /// Every delivery target: recipients first, then blind copies.
    pub fn deliveries(&self) -> impl Iterator<Item = (&String, &Recipient, bool)> {
        self.recipients
            .iter()
            .map(|(a, r)| (a, r, false))
            .chain(self.bcc.iter().map(|(a, r)| (a, r, true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_wins_over_bcc() {
        let mut list = List::new("cert", "CERT");
        list.add_bcc("Leader@Example.org", "Leader");
        list.add_recipient("leader@example.org", "Leader", "tok");
        assert!(list.bcc.is_empty());
        assert_eq!(list.recipients["leader@example.org"].token, "tok");

        list.add_bcc("LEADER@example.org", "Leader");
        assert!(list.bcc.is_empty());
    }

    #[test]
    fn test_keys_are_lowercase() {
        let mut list = List::new("cert", "CERT");
        list.add_recipient("Alice@Example.ORG", "Alice", "t1");
        list.add_sender("Bob@Example.org");
        list.add_moderator("Carol@Example.org");
        assert!(list.recipients.contains_key("alice@example.org"));
        assert!(list.senders.contains("bob@example.org"));
        assert!(list.moderators.contains("carol@example.org"));
    }

    #[test]
    fn test_deliveries_order() {
        let mut list = List::new("cert", "CERT");
        list.add_bcc("z@example.org", "Z");
        list.add_recipient("b@example.org", "B", "");
        list.add_recipient("a@example.org", "A", "");
        let order: Vec<(&str, bool)> = list
            .deliveries()
            .map(|(a, _, bcc)| (a.as_str(), bcc))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a@example.org", false),
                ("b@example.org", false),
                ("z@example.org", true)
            ]
        );
    }

    #[test]
    fn test_anyone_sentinel() {
        let mut list = List::new("open", "Open");
        assert!(!list.anyone_may_send());
        list.add_sender(ANYONE);
        assert!(list.anyone_may_send());
    }
}
