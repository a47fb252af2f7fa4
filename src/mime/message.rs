//! A complete message: top-level header plus the part tree.

use std::io::{self, Write};

use super::footer::Footer;
use super::header::{decode_encoded_words, encode_display_name, split_header, HeaderBlock};
use super::node::Node;
use crate::model::address::EmailAddress;
use crate::model::list::List;

/// Headers that must not survive into the relayed copy: signatures that
/// would no longer verify, and inbound annotations from the receiving MTA.
const DROPPED_HEADERS: &[&str] = &[
    "dkim-signature",
    "return-path",
    "sender",
    "authentication-results",
    "received-spf",
];

/// A parsed message, built once and emitted once per recipient.
#[derive(Debug, Clone)]
pub struct Message {
    root: Node,
}

impl Message {
    /// Parse raw RFC 5322 bytes. Never fails: anything unrecognized becomes
    /// an opaque part.
    pub fn parse(raw: &[u8]) -> Self {
        let raw = skip_from_line(raw);
        let (header, body) = split_header(raw);
        Self {
            root: Node::build(HeaderBlock::parse(header), body, 0),
        }
    }

    /// Top-level header block.
    pub fn header(&self) -> &HeaderBlock {
        self.root.header()
    }

    /// Decoded `Subject`, empty when missing.
    pub fn subject(&self) -> String {
        self.header()
            .get("subject")
            .map(|s| decode_encoded_words(&s))
            .unwrap_or_default()
    }

    /// `Message-ID` without angle brackets.
    pub fn message_id(&self) -> Option<String> {
        let id = self.header().get("message-id")?;
        let id = id.trim().trim_start_matches('<').trim_end_matches('>');
        (!id.is_empty()).then(|| id.to_string())
    }

    /// Decoded `From` header value.
    pub fn from_header(&self) -> Option<String> {
        self.header().get("from").map(|v| decode_encoded_words(&v))
    }

    /// Parsed `From` address.
    pub fn from(&self) -> Option<EmailAddress> {
        EmailAddress::parse(&self.from_header()?)
    }

    /// Local parts of every `To`/`Cc` address in `domain`, lowercased and
    /// deduplicated in header order.
    pub fn addressed_lists(&self, domain: &str) -> Vec<String> {
        let mut lists: Vec<String> = Vec::new();
        for name in ["to", "cc"] {
            for value in self.header().get_all(name) {
                for addr in EmailAddress::parse_list(&decode_encoded_words(&value)) {
                    let Some((local, dom)) = addr.parts() else {
                        continue;
                    };
                    if !dom.eq_ignore_ascii_case(domain) {
                        continue;
                    }
                    let local = local.to_lowercase();
                    if !lists.contains(&local) {
                        lists.push(local);
                    }
                }
            }
        }
        lists
    }

    /// Header block for the copy relayed through `list`.
    ///
    /// `unsubscribe_url` adds the one-click unsubscribe headers; pass `None`
    /// for blind copies and lists without unsubscription.
    pub fn list_header(
        &self,
        list: &List,
        domain: &str,
        unsubscribe_url: Option<&str>,
    ) -> HeaderBlock {
        let mut header = self.header().clone();
        let original_from = header.get("from");

        for name in DROPPED_HEADERS {
            header.remove(name);
        }
        header.remove_prefixed("x-ses-");
        header.remove_prefixed("list-");

        let sender = match self.from() {
            Some(addr) if !addr.display_name.is_empty() => addr.display_name,
            Some(addr) => addr.address,
            None => "Unknown sender".to_string(),
        };
        header.set(
            "From",
            &format!(
                "{} <{}@{}>",
                encode_display_name(&format!("{sender} via {}", list.display_name)),
                list.name,
                domain
            ),
        );
        if !header.contains("reply-to") {
            if let Some(from) = original_from {
                header.push("Reply-To", &from);
            }
        }
        header.push(
            "List-Id",
            &format!(
                "{} <{}.{}>",
                encode_display_name(&list.display_name),
                list.name,
                domain
            ),
        );
        if let Some(url) = unsubscribe_url {
            header.push("List-Unsubscribe", &format!("<{url}>"));
            header.push("List-Unsubscribe-Post", "List-Unsubscribe=One-Click");
        }
        header
    }

    /// Write the message with `header` in place of the original one, and the
    /// body copied (`None`) or rewritten with `footer`.
    pub fn write(
        &self,
        out: &mut dyn Write,
        header: &HeaderBlock,
        footer: Option<&Footer>,
    ) -> io::Result<()> {
        header.write_to(out)?;
        out.write_all(b"\r\n")?;
        self.root.write_body(out, footer)
    }

    /// Write the message unchanged.
    pub fn copy(&self, out: &mut dyn Write) -> io::Result<()> {
        self.root.copy(out)
    }

    /// Render the relayed copy for one recipient into a buffer.
    pub fn render(&self, header: &HeaderBlock, footer: Option<&Footer>) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out, header, footer)?;
        Ok(out)
    }
}

/// Skip a byte-order mark and an mbox `From ` separator line.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
