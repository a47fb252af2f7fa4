//! Integration tests for per-recipient rewriting of MIME messages.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mail_parser::{MessageParser, MimeHeaders};

use listrelay::mime::{Footer, Message};
use listrelay::model::list::List;

const SENTENCE: &str = "This message was sent to Ann <ann@example.org>";

fn footer() -> Footer {
    Footer::new(
        "Ann <ann@example.org>",
        "via the CERT mailing list",
        "https://example.org/unsubscribe/t1/cert",
    )
}

fn rewrite(raw: &[u8]) -> Vec<u8> {
    let message = Message::parse(raw);
    message
        .render(&message.header().clone(), Some(&footer()))
        .unwrap()
}

fn copy(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    Message::parse(raw).copy(&mut out).unwrap();
    out
}

fn count(haystack: &[u8], needle: &str) -> usize {
    String::from_utf8_lossy(haystack).matches(needle).count()
}

/// Every byte value, base64-encoded in 76-column CRLF lines.
fn binary_attachment() -> (Vec<u8>, String) {
    let bytes: Vec<u8> = (0..=255u8).cycle().take(700).collect();
    let encoded = STANDARD.encode(&bytes);
    let lines: Vec<&str> = encoded
        .as_bytes()
        .chunks(76)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect();
    (bytes, lines.join("\r\n"))
}

fn mixed_with_binary() -> (Vec<u8>, Vec<u8>, String) {
    let (bytes, encoded) = binary_attachment();
    let attachment_part = format!(
        "Content-Type: application/octet-stream; name=\"blob.bin\"\r\n\
Content-Disposition: attachment; filename=\"blob.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
{encoded}"
    );
    let raw = format!(
        "From: Ann <ann@example.org>\r\n\
To: cert@lists.example.org\r\n\
Subject: Blob\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=us-ascii\r\n\
\r\n\
See attached.\r\n\
--b1\r\n\
{attachment_part}\r\n\
--b1--\r\n"
    );
    (raw.into_bytes(), bytes, attachment_part)
}

// ─── multipart/mixed ────────────────────────────────────────────────

#[test]
fn test_copy_preserves_attachment_bytes() {
    let (raw, bytes, _) = mixed_with_binary();
    let out = copy(&raw);
    assert_eq!(out, raw);

    let parsed = MessageParser::default().parse(&out).unwrap();
    let attachment = parsed.attachment(0).unwrap();
    assert_eq!(attachment.attachment_name(), Some("blob.bin"));
    assert_eq!(attachment.contents(), bytes.as_slice());
}

#[test]
fn test_rewrite_touches_only_the_text_part() {
    let (raw, bytes, attachment_part) = mixed_with_binary();
    let out = rewrite(&raw);

    assert_eq!(count(&out, SENTENCE), 1);
    assert_eq!(count(&out, &attachment_part), 1);

    let parsed = MessageParser::default().parse(&out).unwrap();
    assert_eq!(parsed.attachment(0).unwrap().contents(), bytes.as_slice());
    let text = parsed.body_text(0).unwrap();
    assert!(text.starts_with("See attached."));
    assert!(text.contains("To unsubscribe, visit https://example.org/unsubscribe/t1/cert"));
}

#[test]
fn test_primary_is_first_rewritable_child() {
    let raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: image/png\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
first text\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
second text\r\n\
--b--\r\n";
    let out = String::from_utf8(rewrite(raw)).unwrap();
    assert_eq!(out.matches(SENTENCE).count(), 1);
    let first = out.find("first text").unwrap();
    let footer_at = out.find(SENTENCE).unwrap();
    let second = out.find("second text").unwrap();
    assert!(first < footer_at && footer_at < second);
    assert!(out.contains("iVBORw0KGgo=\r\n--b\r\n"));
}

// ─── multipart/alternative ──────────────────────────────────────────

#[test]
fn test_alternative_parts_each_get_a_footer() {
    let raw = b"From: Ann <ann@example.org>\r\n\
Content-Type: multipart/alternative; boundary=\"alt\"\r\n\
\r\n\
--alt\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Plain body.\r\n\
--alt\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>HTML body.</p></body></html>\r\n\
--alt--\r\n";
    let out = rewrite(raw);
    let parsed = MessageParser::default().parse(&out).unwrap();

    let text = parsed.body_text(0).unwrap();
    assert!(text.starts_with("Plain body."));
    assert_eq!(text.matches(SENTENCE).count(), 1);

    let html = parsed.body_html(0).unwrap();
    assert_eq!(html.matches("This message was sent to Ann &lt;ann@example.org&gt;").count(), 1);
    let footer_at = html.find("<div").unwrap();
    assert!(html.find("HTML body.").unwrap() < footer_at);
    assert!(footer_at < html.rfind("</body>").unwrap());
}

#[test]
fn test_html_footer_goes_before_last_body_close() {
    let raw = b"Content-Type: text/html\r\n\
\r\n\
<html><body><pre>&lt;/body&gt; </body> quoted</pre></body></html>\r\n";
    let out = String::from_utf8(rewrite(raw)).unwrap();
    let footer_at = out.find("<div").unwrap();
    assert!(out.find("quoted</pre>").unwrap() < footer_at);
    assert!(out[footer_at..].contains("</div></body></html>"));
}

#[test]
fn test_related_footer_goes_to_root_part() {
    let raw = b"Content-Type: multipart/related; boundary=\"rel\"\r\n\
\r\n\
--rel\r\n\
Content-Type: text/html\r\n\
\r\n\
<html><body><img src=\"cid:logo\"></body></html>\r\n\
--rel\r\n\
Content-Type: text/plain; name=\"notes.txt\"\r\n\
Content-ID: <logo>\r\n\
\r\n\
not a footer target\r\n\
--rel--\r\n";
    let out = String::from_utf8(rewrite(raw)).unwrap();
    assert_eq!(out.matches("This message was sent to").count(), 1);
    assert!(out.find("<div").unwrap() < out.find("not a footer target").unwrap());
}

// ─── Header rewriting ───────────────────────────────────────────────

#[test]
fn test_line_breaks_in_sender_name_stay_inside_from() {
    let raw = b"From: =?UTF-8?Q?Eve=0D=0ABcc:_victim@evil.org=0D=0A=0D=0Ainjected?= <eve@example.org>\r\n\
To: cert@lists.example.org\r\n\
Subject: Hello\r\n\
\r\n\
Body.\r\n";
    let message = Message::parse(raw);
    let header = message.list_header(&List::new("cert", "CERT Team"), "lists.example.org", None);
    let out = message.render(&header, None).unwrap();
    let text = String::from_utf8(out.clone()).unwrap();
    assert!(text.contains("\r\nTo: cert@lists.example.org\r\nSubject: Hello\r\n"));
    assert!(!text.contains("\r\nBcc:"));

    let parsed = MessageParser::default().parse(&out).unwrap();
    assert!(parsed.bcc().is_none());
    assert!(parsed.to().is_some());
    assert_eq!(parsed.subject(), Some("Hello"));
    assert_eq!(
        parsed.from().unwrap().first().unwrap().address(),
        Some("cert@lists.example.org")
    );
    assert_eq!(parsed.body_text(0).unwrap().trim_end(), "Body.");
}

// ─── Encodings and charsets ─────────────────────────────────────────

#[test]
fn test_base64_text_is_reencoded() {
    let body = STANDARD.encode("Hola, ¿qué tal?\r\n");
    let raw = format!(
        "Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
{body}\r\n"
    );
    let out = rewrite(raw.as_bytes());
    assert!(!String::from_utf8_lossy(&out).contains(SENTENCE));

    let parsed = MessageParser::default().parse(&out).unwrap();
    let text = parsed.body_text(0).unwrap();
    assert!(text.starts_with("Hola, ¿qué tal?"));
    assert!(text.contains(SENTENCE));
}

#[test]
fn test_unknown_encoding_is_left_alone() {
    let raw = b"Content-Type: text/plain\r\n\
Content-Transfer-Encoding: x-uuencode\r\n\
\r\n\
begin 644 x\r\n";
    let out = rewrite(raw);
    assert_eq!(out, raw.to_vec());
}

#[test]
fn test_fixture_alternative_in_mixed() {
    let raw = common::read_fixture("mixed.eml");
    let out = rewrite(&raw);
    let parsed = MessageParser::default().parse(&out).unwrap();
    assert!(parsed.body_text(0).unwrap().contains(SENTENCE));
    assert!(parsed
        .body_html(0)
        .unwrap()
        .contains("This message was sent to Ann &lt;ann@example.org&gt;"));
    let attachment = parsed.attachment(0).unwrap();
    assert_eq!(
        attachment.contents(),
        b"09:00 Briefing\n09:30 Radio check\n".as_slice()
    );
}
