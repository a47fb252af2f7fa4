//! Content-Transfer-Encoding codecs (RFC 2045 §6).

use std::io::{self, Write};

use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use super::header::hex_pair;

/// Encoded line length limit for base64 bodies.
const BASE64_LINE: usize = 76;

/// Quoted-printable lines are kept under 76 characters including the soft break.
const QP_LINE: usize = 75;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Base64 decoder that tolerates missing or superfluous padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Transfer encodings a text part can be rewritten in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `7bit`, `8bit` or `binary`: the body is its own decoding.
    Identity,
    /// `quoted-printable`.
    QuotedPrintable,
    /// `base64`.
    Base64,
}

impl TransferEncoding {
    /// Map a `Content-Transfer-Encoding` value; `None` for unknown encodings.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "7bit" | "8bit" | "binary" | "" => Some(Self::Identity),
            "quoted-printable" => Some(Self::QuotedPrintable),
            "base64" => Some(Self::Base64),
            _ => None,
        }
    }

    /// Decode a body. `None` if the body is not valid in this encoding.
    pub fn decode(self, body: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Identity => Some(body.to_vec()),
            Self::QuotedPrintable => Some(decode_quoted_printable(body)),
            Self::Base64 => {
                let compact: Vec<u8> = body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                LENIENT_BASE64.decode(compact).ok()
            }
        }
    }

    /// Encode decoded bytes and write them.
    pub fn encode_to(self, out: &mut dyn Write, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Identity => write_crlf(out, data),
            Self::QuotedPrintable => out.write_all(&encode_quoted_printable(data)),
            Self::Base64 => out.write_all(&encode_base64_lines(data)),
        }
    }
}

/// Write `data`, turning every bare `\n` into `\r\n`.
pub fn write_crlf(out: &mut dyn Write, data: &[u8]) -> io::Result<()> {
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' && (i == 0 || data[i - 1] != b'\r') {
            out.write_all(&data[start..i])?;
            out.write_all(b"\r\n")?;
            start = i + 1;
        }
    }
    out.write_all(&data[start..])
}

/// Decode quoted-printable: `=XX` escapes and soft line breaks
/// (`=\r\n`, `=\n`, optionally preceded by transport padding).
/// A stray `=` is kept literally.
pub fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }
        if i + 2 < input.len() {
            if let Some(byte) = hex_pair(input[i + 1], input[i + 2]) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        let mut j = i + 1;
        while j < input.len() && (input[j] == b' ' || input[j] == b'\t') {
            j += 1;
        }
        if input[j..].starts_with(b"\r\n") {
            i = j + 2;
        } else if input[j..].starts_with(b"\n") {
            i = j + 1;
        } else if j == input.len() {
            i = j;
        } else {
            out.push(b'=');
            i += 1;
        }
    }
    out
}

/// Encode text as quoted-printable with CRLF hard breaks.
pub fn encode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    for (idx, line) in data.split(|&b| b == b'\n').enumerate() {
        if idx > 0 {
            out.extend_from_slice(b"\r\n");
        }
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        encode_qp_line(line, &mut out);
    }
    out
}

fn encode_qp_line(line: &[u8], out: &mut Vec<u8>) {
    let mut col = 0;
    for (i, &b) in line.iter().enumerate() {
        let last = i + 1 == line.len();
        let literal = match b {
            b' ' | b'\t' => !last,
            b'=' => false,
            33..=126 => true,
            _ => false,
        };
        let width = if literal { 1 } else { 3 };
        if col + width > QP_LINE {
            out.extend_from_slice(b"=\r\n");
            col = 0;
        }
        if literal {
            out.push(b);
        } else {
            out.push(b'=');
            out.push(HEX_UPPER[(b >> 4) as usize]);
            out.push(HEX_UPPER[(b & 0x0f) as usize]);
        }
        col += width;
    }
}

/// Encode as base64 broken into 76-character CRLF-separated lines.
pub fn encode_base64_lines(data: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(data);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2);
    for (i, chunk) in encoded.as_bytes().chunks(BASE64_LINE).enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(chunk);
    }
    out
}
