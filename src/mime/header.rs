//! RFC 5322 header blocks: raw-preserving parse, unfolding, editing,
//! encoded-words (RFC 2047) and `Content-Type` parameters.

use std::collections::BTreeMap;
use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

use super::encoding::write_crlf;

/// One header field with its raw bytes, continuation lines included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    /// Lowercased field name; empty for a line that is not a header.
    name: String,
    raw: Vec<u8>,
}

/// An ordered header block that writes back byte-for-byte (modulo line
/// endings) unless edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    fields: Vec<HeaderField>,
}

impl HeaderBlock {
    /// Parse a header block (without the terminating blank line).
    pub fn parse(bytes: &[u8]) -> Self {
        let mut fields: Vec<HeaderField> = Vec::new();
        for line in split_lines(bytes) {
            if line.is_empty() {
                continue;
            }
            let continuation = line[0] == b' ' || line[0] == b'\t';
            match fields.last_mut() {
                Some(last) if continuation => {
                    last.raw.extend_from_slice(b"\r\n");
                    last.raw.extend_from_slice(line);
                }
                _ => {
                    let name = match line.iter().position(|&b| b == b':') {
                        Some(colon) => String::from_utf8_lossy(&line[..colon])
                            .trim()
                            .to_lowercase(),
                        None => String::new(),
                    };
                    fields.push(HeaderField {
                        name,
                        raw: line.to_vec(),
                    });
                }
            }
        }
        Self { fields }
    }

    /// First value of a header (case-insensitive), unfolded and trimmed.
    /// Encoded-words are left as-is.
    pub fn get(&self, name: &str) -> Option<String> {
        self.get_all(name).next()
    }

    /// All values of a header, in order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = String> + 'a {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .filter(move |f| f.name == name)
            .map(HeaderField::value)
    }

    /// `true` if the header is present.
    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.fields.iter().any(|f| f.name == name)
    }

    /// Remove every occurrence of a header.
    pub fn remove(&mut self, name: &str) {
        let name = name.to_lowercase();
        self.fields.retain(|f| f.name != name);
    }

    /// Remove every header whose name starts with `prefix` (case-insensitive).
    pub fn remove_prefixed(&mut self, prefix: &str) {
        let prefix = prefix.to_lowercase();
        self.fields
            .retain(|f| f.name.is_empty() || !f.name.starts_with(&prefix));
    }

    /// Append a header. `value` must already be encoded for transport; line
    /// breaks in it are replaced by spaces.
    pub fn push(&mut self, name: &str, value: &str) {
        self.fields.push(HeaderField {
            name: name.to_lowercase(),
            raw: field_line(name, value),
        });
    }

    /// Replace the first occurrence in place (dropping the others), or append.
    pub fn set(&mut self, name: &str, value: &str) {
        let lower = name.to_lowercase();
        let field = HeaderField {
            name: lower.clone(),
            raw: field_line(name, value),
        };
        match self.fields.iter().position(|f| f.name == lower) {
            Some(pos) => {
                self.fields[pos] = field;
                let mut seen = false;
                self.fields.retain(|f| {
                    if f.name != lower {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.fields.push(field),
        }
    }

    /// Write every field with CRLF line endings (no terminating blank line).
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        for field in &self.fields {
            write_crlf(out, &field.raw)?;
            out.write_all(b"\r\n")?;
        }
        Ok(())
    }

    /// Parsed `Content-Type`.
    ///
    /// `None` when the header is missing; `Some(None)` when present but
    /// unparseable.
    pub fn content_type(&self) -> Option<Option<ContentType>> {
        self.get("content-type").map(|v| ContentType::parse(&v))
    }

    /// `Content-Transfer-Encoding`, lowercased; `7bit` when missing.
    pub fn transfer_encoding(&self) -> String {
        self.get("content-transfer-encoding")
            .map(|v| v.trim().to_lowercase())
            .unwrap_or_else(|| "7bit".to_string())
    }

    /// `true` for `Content-Disposition: attachment`.
    pub fn is_attachment(&self) -> bool {
        self.get("content-disposition")
            .map(|v| {
                v.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("attachment")
            })
            .unwrap_or(false)
    }
}

impl HeaderField {
    fn value(&self) -> String {
        let text = decode_header_bytes(&self.raw);
        let after_colon = match text.find(':') {
            Some(pos) => &text[pos + 1..],
            None => "",
        };
        let mut unfolded = String::with_capacity(after_colon.len());
        for (i, line) in after_colon.split("\r\n").enumerate() {
            if i > 0 {
                unfolded.push(' ');
            }
            unfolded.push_str(line.trim());
        }
        unfolded.trim().to_string()
    }
}

/// Split raw bytes at the first blank line into `(header, body)`.
///
/// The blank line belongs to neither side. Without a blank line everything
/// is header.
pub fn split_header(data: &[u8]) -> (&[u8], &[u8]) {
    if data.starts_with(b"\r\n") {
        return (&[], &data[2..]);
    }
    if data.starts_with(b"\n") {
        return (&[], &data[1..]);
    }
    for i in 0..data.len() {
        if data[i] != b'\n' {
            continue;
        }
        let rest = &data[i + 1..];
        if rest.starts_with(b"\r\n") {
            return (&data[..i + 1], &rest[2..]);
        }
        if rest.starts_with(b"\n") {
            return (&data[..i + 1], &rest[1..]);
        }
    }
    (data, &[])
}

/// Split into lines without their `\n` / `\r\n` terminators.
fn split_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

/// A parsed `Content-Type` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercased main type (`text`, `multipart`, …).
    pub main: String,
    /// Lowercased subtype (`plain`, `alternative`, …).
    pub sub: String,
    /// Parameters with lowercased names and unquoted values.
    pub params: BTreeMap<String, String>,
}

impl ContentType {
    /// Parse `type/subtype; name=value; name="quoted value"`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut pieces = split_params(value).into_iter();
        let mime = pieces.next()?;
        let (main, sub) = mime.trim().split_once('/')?;
        let (main, sub) = (main.trim().to_lowercase(), sub.trim().to_lowercase());
        if main.is_empty() || sub.is_empty() || main.contains(char::is_whitespace) {
            return None;
        }

        let mut params = BTreeMap::new();
        for piece in pieces {
            if let Some((k, v)) = piece.split_once('=') {
                let v = v.trim();
                let v = v
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .map(|v| v.replace("\\\"", "\"").replace("\\\\", "\\"))
                    .unwrap_or_else(|| v.to_string());
                params.insert(k.trim().to_lowercase(), v);
            }
        }
        Some(Self { main, sub, params })
    }

    /// `text/plain`, the type of a part without `Content-Type` (RFC 2045 §5.2).
    pub fn default_text() -> Self {
        Self {
            main: "text".to_string(),
            sub: "plain".to_string(),
            params: BTreeMap::new(),
        }
    }

    /// `true` for `main/sub`.
    pub fn is(&self, main: &str, sub: &str) -> bool {
        self.main == main && self.sub == sub
    }

    /// A parameter value by (lowercase) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Split on `;` outside double quotes.
fn split_params(value: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for ch in value.chars() {
        match ch {
            _ if escaped => {
                escaped = false;
                current.push(ch);
            }
            '\\' if in_quotes => {
                escaped = true;
                current.push(ch);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => pieces.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    pieces.push(current);
    pieces.retain(|p| !p.trim().is_empty());
    pieces
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match decode_one_word(after_start) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after_start[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?enc?text?=`; returns the text and the bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded_text = &rest[..end];
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => STANDARD.decode(encoded_text.trim()).ok()?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };
    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    Some((decode_charset(charset, &bytes), consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match hex_pair(bytes[i + 1], bytes[i + 2]) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Value of two hex digits.
pub(crate) fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Decode bytes using a named charset.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match charset.to_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" => String::from_utf8_lossy(bytes).into_owned(),
        _ => match encoding_rs::Encoding::for_label(charset.as_bytes()) {
            Some(encoding) => encoding.decode(bytes).0.into_owned(),
            None => {
                warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
    }
}

/// `name: value` on one line; CR and LF in `value` become spaces.
fn field_line(name: &str, value: &str) -> Vec<u8> {
    let value = value.replace(['\r', '\n'], " ");
    format!("{name}: {value}").into_bytes()
}

/// Format a display name for a header: RFC 2047 `B` encoding when it is not
/// plain ASCII, a quoted string otherwise. Control characters become spaces.
pub fn encode_display_name(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let name = name.trim();
    if name.is_ascii() {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(name.as_bytes()))
    }
}
