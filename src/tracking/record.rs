//! One line of a tracking file.
//!
//! ```text
//! R 2024-05-01T10:00:00Z cert role-42
//! V 2024-05-01T10:00:00Z PASS PASS GRAY PASS PASS
//! M 2024-05-01T10:00:01Z cert
//! A 2024-05-01T11:30:00Z cert mod@example.org
//! X 2024-05-01T10:00:01Z nosuchlist
//! S 2024-05-01T11:30:02Z ann@example.org
//! L 2024-05-01T11:30:05Z cert
//! E 2024-05-01T11:30:05Z free text
//! ```

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::moderation::Verdicts;

/// A tracking line that cannot be replayed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: unknown record type '{verb}'")]
    UnknownVerb { line: usize, verb: String },

    #[error("line {line}: malformed '{verb}' record")]
    Malformed { line: usize, verb: char },

    #[error("line {line}: invalid timestamp '{value}'")]
    Timestamp { line: usize, value: String },

    #[error("line {line}: not valid UTF-8")]
    Encoding { line: usize },
}

/// A state transition recorded for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `R`: the message was received for these lists.
    Received { lists: Vec<String> },
    /// `V`: inbound verdicts.
    Verdicts(Verdicts),
    /// `M`: moderators of `list` were asked to approve.
    ModerationRequested { list: String },
    /// `A`: a moderator approved delivery to `list`.
    Approved { list: String, by: Option<String> },
    /// `X`: no list named `list` exists.
    UnknownRecipient { list: String },
    /// `L`: every recipient of `list` has been sent a copy.
    ListSent { list: String },
    /// `S`: a copy went to `address`.
    Sent { address: String },
    /// `E`: free-text comment, ignored on replay.
    Comment { text: String },
}

impl Record {
    /// The single-letter verb.
    pub fn verb(&self) -> char {
        match self {
            Self::Received { .. } => 'R',
            Self::Verdicts(_) => 'V',
            Self::ModerationRequested { .. } => 'M',
            Self::Approved { .. } => 'A',
            Self::UnknownRecipient { .. } => 'X',
            Self::ListSent { .. } => 'L',
            Self::Sent { .. } => 'S',
            Self::Comment { .. } => 'E',
        }
    }
}

/// A record with its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub at: DateTime<Utc>,
    pub record: Record,
}

impl Entry {
    /// Stamp `record` with the current time (whole seconds).
    pub fn now(record: Record) -> Self {
        let now = Utc::now();
        Self {
            at: DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now),
            record,
        }
    }

    /// Parse one line (without its newline). `line` is 1-based, for errors.
    pub fn parse(text: &str, line: usize) -> Result<Self, ParseError> {
        let mut fields = text.splitn(3, ' ');
        let verb_field = fields.next().unwrap_or("");
        let mut chars = verb_field.chars();
        let verb = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(ParseError::UnknownVerb {
                    line,
                    verb: verb_field.to_string(),
                })
            }
        };
        if !"RVMAXLSE".contains(verb) {
            return Err(ParseError::UnknownVerb {
                line,
                verb: verb.to_string(),
            });
        }

        let stamp = fields.next().ok_or(ParseError::Malformed { line, verb })?;
        let at = DateTime::parse_from_rfc3339(stamp)
            .map_err(|_| ParseError::Timestamp {
                line,
                value: stamp.to_string(),
            })?
            .with_timezone(&Utc);
        let rest = fields.next().unwrap_or("");

        if verb == 'E' {
            return Ok(Self {
                at,
                record: Record::Comment {
                    text: rest.to_string(),
                },
            });
        }

        let args: Vec<&str> = rest.split_whitespace().collect();
        let malformed = || ParseError::Malformed { line, verb };
        let one = |args: &[&str]| match args {
            [single] => Ok(single.to_string()),
            _ => Err(malformed()),
        };

        let record = match verb {
            'R' => Record::Received {
                lists: args.iter().map(|s| s.to_string()).collect(),
            },
            'V' => match args.as_slice() {
                [dkim, dmarc, spf, spam, virus] => Record::Verdicts(Verdicts {
                    dkim: dkim.to_string(),
                    dmarc: dmarc.to_string(),
                    spf: spf.to_string(),
                    spam: spam.to_string(),
                    virus: virus.to_string(),
                }),
                _ => return Err(malformed()),
            },
            'M' => Record::ModerationRequested { list: one(&args)? },
            'A' => match args.as_slice() {
                [list] => Record::Approved {
                    list: list.to_string(),
                    by: None,
                },
                [list, by] => Record::Approved {
                    list: list.to_string(),
                    by: Some(by.to_string()),
                },
                _ => return Err(malformed()),
            },
            'X' => Record::UnknownRecipient { list: one(&args)? },
            'L' => Record::ListSent { list: one(&args)? },
            _ => Record::Sent { address: one(&args)? },
        };
        Ok(Self { at, record })
    }
}

impl fmt::Display for Entry {
    /// Serialized line, without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.record.verb(),
            self.at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        match &self.record {
            Record::Received { lists } => {
                for list in lists {
                    write!(f, " {list}")?;
                }
                Ok(())
            }
            Record::Verdicts(v) => write!(f, " {}", v.to_array().join(" ")),
            Record::ModerationRequested { list }
            | Record::UnknownRecipient { list }
            | Record::ListSent { list } => write!(f, " {list}"),
            Record::Approved { list, by: None } => write!(f, " {list}"),
            Record::Approved { list, by: Some(by) } => write!(f, " {list} {by}"),
            Record::Sent { address } => write!(f, " {address}"),
            // Comments stay on one line
            Record::Comment { text } => write!(f, " {}", text.replace(['\r', '\n'], " ")),
        }
    }
}
