//! MIME part tree: built once per message, emitted once per recipient.
//!
//! Text leaves are kept decoded so a footer can be spliced in and the part
//! re-encoded with its original transfer encoding. Everything else is kept
//! as raw bytes and copied through.

use std::borrow::Cow;
use std::io::{self, Write};

use super::encoding::{write_crlf, TransferEncoding};
use super::footer::Footer;
use super::header::{split_header, ContentType, HeaderBlock};

/// Maximum multipart nesting; deeper parts are copied opaquely.
const MAX_DEPTH: usize = 10;

/// HTML footers go right before the last occurrence of this tag.
const BODY_CLOSE: &[u8] = b"</body>";

/// Which footer rendition a text part takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextClass {
    /// `text/plain`
    Plain,
    /// `text/html`
    Html,
}

/// A `text/plain` or `text/html` leaf, decoded.
#[derive(Debug, Clone)]
pub struct TextPart {
    header: HeaderBlock,
    class: TextClass,
    encoding: TransferEncoding,
    charset: Option<String>,
    /// Decoded bytes before the footer insertion point.
    prefix: Vec<u8>,
    /// Decoded bytes from the insertion point on (`</body>…` for HTML).
    suffix: Vec<u8>,
}

/// A leaf that is never modified: attachments, unknown encodings,
/// unparseable `Content-Type`, nested messages.
#[derive(Debug, Clone)]
pub struct OpaquePart {
    header: HeaderBlock,
    body: Vec<u8>,
}

/// A `multipart/*` container.
#[derive(Debug, Clone)]
pub struct Multipart {
    header: HeaderBlock,
    boundary: String,
    /// Children are renditions of the same content, each gets a footer.
    alternative: bool,
    preamble: Vec<u8>,
    children: Vec<Node>,
    epilogue: Vec<u8>,
    /// Child that receives the footer when not `alternative`.
    primary: Option<usize>,
}

/// One node of the part tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// Rewritable text leaf.
    Text(TextPart),
    /// Pass-through leaf.
    Opaque(OpaquePart),
    /// Container of further parts.
    Multipart(Multipart),
}

impl Node {
    /// Parse a complete part (header, blank line, body).
    pub fn parse(raw: &[u8]) -> Self {
        let (header, body) = split_header(raw);
        Self::build(HeaderBlock::parse(header), body, 0)
    }

    /// Build a node from an already separated header and body.
    pub(crate) fn build(header: HeaderBlock, body: &[u8], depth: usize) -> Self {
        let content_type = match header.content_type() {
            None => ContentType::default_text(),
            Some(Some(ct)) => ct,
            Some(None) => return Self::opaque(header, body),
        };

        if content_type.main == "multipart" {
            return Self::build_multipart(header, &content_type, body, depth);
        }

        let class = match content_type.sub.as_str() {
            _ if content_type.main != "text" || header.is_attachment() => None,
            "plain" => Some(TextClass::Plain),
            "html" => Some(TextClass::Html),
            _ => None,
        };
        let Some(class) = class else {
            return Self::opaque(header, body);
        };
        let Some(encoding) = TransferEncoding::from_header(&header.transfer_encoding()) else {
            return Self::opaque(header, body);
        };
        let Some(mut decoded) = encoding.decode(body) else {
            return Self::opaque(header, body);
        };

        let suffix = match class {
            TextClass::Plain => Vec::new(),
            TextClass::Html => match rfind(&decoded, BODY_CLOSE) {
                Some(pos) => decoded.split_off(pos),
                None => Vec::new(),
            },
        };
        let charset = content_type.param("charset").map(str::to_string);

        Self::Text(TextPart {
            header,
            class,
            encoding,
            charset,
            prefix: decoded,
            suffix,
        })
    }

    fn build_multipart(
        header: HeaderBlock,
        content_type: &ContentType,
        body: &[u8],
        depth: usize,
    ) -> Self {
        if depth >= MAX_DEPTH {
            return Self::opaque(header, body);
        }
        let Some(boundary) = content_type.param("boundary").map(str::to_string) else {
            return Self::opaque(header, body);
        };
        let Some(split) = split_multipart(body, &boundary) else {
            return Self::opaque(header, body);
        };

        let children: Vec<Node> = split
            .parts
            .iter()
            .map(|part| {
                let (h, b) = split_header(part);
                Self::build(HeaderBlock::parse(h), b, depth + 1)
            })
            .collect();

        let alternative = content_type.is("multipart", "alternative");
        let primary = match content_type.sub.as_str() {
            "alternative" => None,
            "related" if !children.is_empty() => Some(0),
            _ => children.iter().position(Node::is_rewritable),
        };

        Self::Multipart(Multipart {
            header,
            boundary,
            alternative,
            preamble: split.preamble.to_vec(),
            children,
            epilogue: split.epilogue.to_vec(),
            primary,
        })
    }

    fn opaque(header: HeaderBlock, body: &[u8]) -> Self {
        Self::Opaque(OpaquePart {
            header,
            body: body.to_vec(),
        })
    }

    /// The part's own header block.
    pub fn header(&self) -> &HeaderBlock {
        match self {
            Self::Text(t) => &t.header,
            Self::Opaque(o) => &o.header,
            Self::Multipart(m) => &m.header,
        }
    }

    /// `true` if a footer can land somewhere in this subtree.
    pub fn is_rewritable(&self) -> bool {
        match self {
            Self::Text(_) => true,
            Self::Opaque(_) => false,
            Self::Multipart(m) => m.children.iter().any(Node::is_rewritable),
        }
    }

    /// Children of a multipart node (empty for leaves).
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Multipart(m) => &m.children,
            _ => &[],
        }
    }

    /// Write the part unchanged (header, blank line, re-encoded body).
    pub fn copy(&self, out: &mut dyn Write) -> io::Result<()> {
        self.header().write_to(out)?;
        out.write_all(b"\r\n")?;
        self.write_body(out, None)
    }

    /// Write the part with `footer` injected into its primary text.
    pub fn rewrite(&self, out: &mut dyn Write, footer: &Footer) -> io::Result<()> {
        self.header().write_to(out)?;
        out.write_all(b"\r\n")?;
        self.write_body(out, Some(footer))
    }

    /// Write only the body; `None` copies, `Some` rewrites.
    pub(crate) fn write_body(&self, out: &mut dyn Write, footer: Option<&Footer>) -> io::Result<()> {
        match self {
            Self::Text(t) => t.write_body(out, footer),
            Self::Opaque(o) => write_crlf(out, &o.body),
            Self::Multipart(m) => m.write_body(out, footer),
        }
    }
}

impl TextPart {
    /// Decoded content class.
    pub fn class(&self) -> TextClass {
        self.class
    }

    fn write_body(&self, out: &mut dyn Write, footer: Option<&Footer>) -> io::Result<()> {
        let mut data = Vec::with_capacity(self.prefix.len() + self.suffix.len() + 512);
        data.extend_from_slice(&self.prefix);
        if let Some(footer) = footer {
            let text = match self.class {
                TextClass::Plain => footer.plain(),
                TextClass::Html => footer.html(),
            };
            data.extend_from_slice(&encode_charset(self.charset.as_deref(), text));
        }
        data.extend_from_slice(&self.suffix);
        self.encoding.encode_to(out, &data)
    }
}

impl Multipart {
    fn write_body(&self, out: &mut dyn Write, footer: Option<&Footer>) -> io::Result<()> {
        if !self.preamble.is_empty() {
            write_crlf(out, &self.preamble)?;
            out.write_all(b"\r\n")?;
        }
        for (i, child) in self.children.iter().enumerate() {
            write!(out, "--{}\r\n", self.boundary)?;
            match footer {
                Some(f) if self.alternative || self.primary == Some(i) => child.rewrite(out, f)?,
                _ => child.copy(out)?,
            }
            out.write_all(b"\r\n")?;
        }
        write!(out, "--{}--\r\n", self.boundary)?;
        write_crlf(out, &self.epilogue)
    }
}

/// Convert footer text into the part's charset.
fn encode_charset<'a>(charset: Option<&str>, text: &'a str) -> Cow<'a, [u8]> {
    let Some(label) = charset else {
        return Cow::Borrowed(text.as_bytes());
    };
    match label.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => Cow::Borrowed(text.as_bytes()),
        _ => match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(encoding) => encoding.encode(text).0,
            None => Cow::Borrowed(text.as_bytes()),
        },
    }
}

/// Last occurrence of `needle` in `haystack` (case-sensitive).
fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// A multipart body cut at its delimiter lines.
struct MultipartSplit<'a> {
    preamble: &'a [u8],
    parts: Vec<&'a [u8]>,
    epilogue: &'a [u8],
}

/// Split a multipart body on `--boundary` delimiter lines (RFC 2046 §5.1.1).
///
/// The line break before a delimiter belongs to the delimiter. A missing
/// close delimiter ends the last part at the end of the body. Returns `None`
/// if no delimiter is present at all.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Option<MultipartSplit<'a>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut preamble: Option<&[u8]> = None;
    let mut parts = Vec::new();
    let mut part_start: Option<usize> = None;
    let mut line_start = 0;

    while line_start < body.len() {
        let line_end = body[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| line_start + p)
            .unwrap_or(body.len());
        let next = (line_end + 1).min(body.len());
        let line = &body[line_start..line_end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if let Some(rest) = line.strip_prefix(delimiter) {
            let closing = rest.starts_with(b"--");
            let tail = if closing { &rest[2..] } else { rest };
            if tail.iter().all(|&b| b == b' ' || b == b'\t') {
                let content_end = before_line_break(body, line_start);
                match part_start {
                    None => preamble = Some(&body[..content_end]),
                    Some(start) => parts.push(&body[start..content_end.max(start)]),
                }
                if closing {
                    return Some(MultipartSplit {
                        preamble: preamble.unwrap_or(&[]),
                        parts,
                        epilogue: &body[next..],
                    });
                }
                part_start = Some(next);
            }
        }
        line_start = next;
        if line_end == body.len() {
            break;
        }
    }

    let preamble = preamble?;
    if let Some(start) = part_start {
        parts.push(&body[start..]);
    }
    Some(MultipartSplit {
        preamble,
        parts,
        epilogue: &[],
    })
}

/// Offset of the line break that ends right before `pos`.
fn before_line_break(body: &[u8], pos: usize) -> usize {
    if pos >= 2 && &body[pos - 2..pos] == b"\r\n" {
        pos - 2
    } else if pos >= 1 && body[pos - 1] == b'\n' {
        pos - 1
    } else {
        pos
    }
}
