//! State replayed from a tracking file.

use std::collections::BTreeSet;

use serde::Serialize;

use super::record::{Entry, ParseError, Record};
use crate::moderation::Verdicts;

/// Everything known about one queued message.
///
/// Built by replaying records in order; replaying the same record twice
/// leaves the state unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailMetadata {
    /// `true` once an `R` record was seen.
    pub received: bool,
    /// Lists the message was addressed to, in first-seen order.
    pub lists: Vec<String>,
    /// Latest verdicts, if recorded.
    pub verdicts: Option<Verdicts>,
    /// Lists whose moderators approved the message.
    pub approved: BTreeSet<String>,
    /// Addressed names that are not lists.
    pub rejects: BTreeSet<String>,
    /// Lists for which moderation has been requested.
    pub moderating: BTreeSet<String>,
    /// Lists completely sent.
    pub sent_to_list: BTreeSet<String>,
    /// Recipient addresses already sent a copy.
    pub sent: BTreeSet<String>,
}

impl MailMetadata {
    /// Replay a whole tracking file.
    pub fn replay(text: &str) -> Result<Self, ParseError> {
        let mut metadata = Self::default();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            metadata.apply(&Entry::parse(line, i + 1)?.record);
        }
        Ok(metadata)
    }

    /// Fold one record into the state.
    pub fn apply(&mut self, record: &Record) {
        match record {
            Record::Received { lists } => {
                self.received = true;
                for list in lists {
                    if !self.lists.contains(list) {
                        self.lists.push(list.clone());
                    }
                }
            }
            Record::Verdicts(v) => self.verdicts = Some(v.clone()),
            Record::ModerationRequested { list } => {
                self.moderating.insert(list.clone());
            }
            Record::Approved { list, .. } => {
                self.approved.insert(list.clone());
            }
            Record::UnknownRecipient { list } => {
                self.rejects.insert(list.clone());
            }
            Record::ListSent { list } => {
                self.sent_to_list.insert(list.clone());
            }
            Record::Sent { address } => {
                self.sent.insert(address.clone());
            }
            Record::Comment { .. } => {}
        }
    }

    /// `true` once every addressed list is either sent or rejected.
    pub fn is_complete(&self) -> bool {
        self.received
            && self
                .lists
                .iter()
                .all(|l| self.sent_to_list.contains(l) || self.rejects.contains(l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "R 2024-05-01T10:00:00Z cert role-42 bogus\n\
V 2024-05-01T10:00:00Z PASS PASS PASS PASS PASS\n\
X 2024-05-01T10:00:01Z bogus\n\
M 2024-05-01T10:00:01Z role-42\n\
S 2024-05-01T10:00:02Z ann@example.org\n\
L 2024-05-01T10:00:03Z cert\n\
E 2024-05-01T10:00:03Z note\n";

    #[test]
    fn test_replay() {
        let m = MailMetadata::replay(LOG).unwrap();
        assert_eq!(m.lists, vec!["cert", "role-42", "bogus"]);
        assert_eq!(m.verdicts, Some(Verdicts::passing()));
        assert!(m.rejects.contains("bogus"));
        assert!(m.moderating.contains("role-42"));
        assert!(m.sent.contains("ann@example.org"));
        assert!(m.sent_to_list.contains("cert"));
        assert!(!m.is_complete());
    }

    #[test]
    fn test_replay_is_idempotent() {
        let once = MailMetadata::replay(LOG).unwrap();
        let twice = MailMetadata::replay(&format!("{LOG}{LOG}")).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_complete_after_all_lists_settled() {
        let m = MailMetadata::replay(&format!("{LOG}A 2024-05-01T11:00:00Z role-42\nL 2024-05-01T11:00:01Z role-42\n"))
            .unwrap();
        assert!(m.approved.contains("role-42"));
        assert!(m.is_complete());
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let err = MailMetadata::replay("R 2024-05-01T10:00:00Z a\n\nZ junk\n").unwrap_err();
        assert!(matches!(err, ParseError::UnknownVerb { line: 3, .. }));
    }
}
