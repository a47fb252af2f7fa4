//! Moderator replies to `<list>-mod@<domain>`.

use mail_parser::MessageParser;

use super::forward::{MOD_MARKER, MOD_SUFFIX};
use super::queue::QueueDir;

/// The list a moderation address belongs to: `cert-mod` → `cert`.
pub fn moderated_list(name: &str) -> Option<&str> {
    name.strip_suffix(MOD_SUFFIX).filter(|list| !list.is_empty())
}

/// Queue ID named by the first `[MOD]MSGID:` marker in `text`.
pub fn find_marker(text: &str) -> Option<String> {
    let start = text.find(MOD_MARKER)? + MOD_MARKER.len();
    let id: String = text[start..]
        .chars()
        .take_while(|&c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    QueueDir::valid_id(&id).then_some(id)
}

/// Find the marker in the plain-text body of a reply, then in the HTML body,
/// then anywhere in the raw bytes (an attached original, an unparseable reply).
pub fn reply_marker(raw: &[u8]) -> Option<String> {
    let reply = MessageParser::default().parse(raw);
    reply
        .as_ref()
        .and_then(|r| r.body_text(0))
        .and_then(|text| find_marker(&text))
        .or_else(|| {
            reply
                .as_ref()
                .and_then(|r| r.body_html(0))
                .and_then(|html| find_marker(&html))
        })
        .or_else(|| find_marker(&String::from_utf8_lossy(raw)))
}
