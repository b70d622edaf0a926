//! Multipart body encoding and decoding (RFC 2046).
//!
//! Encoded bodies use CRLF line endings and a randomly generated boundary that is guaranteed not
//! to occur anywhere inside the sections being encoded. Decoding accepts both CRLF and bare LF
//! line endings.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};
use memchr::memmem;
use rand::Rng;
use snafu::{ResultExt, Snafu};

pub const MIXED: &str = "mixed";
pub const FORM_DATA: &str = "form-data";

/// RFC 2046 caps boundaries at 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;
const BOUNDARY_RANDOM_BYTES: usize = 30;
const MAX_BOUNDARY_ATTEMPTS: usize = 8;

#[derive(Debug, Snafu)]
pub enum MultipartError {
    #[snafu(display("Invalid multipart boundary {:?}", boundary))]
    InvalidBoundary { boundary: String },
    #[snafu(display("Could not generate a boundary absent from every section"))]
    BoundaryCollision,
    #[snafu(display("Invalid multipart section header {:?}", name))]
    InvalidSectionHeader { name: String },
    #[snafu(display("Multipart body does not contain boundary {:?}", boundary))]
    MissingBoundary { boundary: String },
    #[snafu(display("Malformed multipart section header line {:?}", line))]
    MalformedHeader { line: String },
    #[snafu(display("Multipart body ended before its closing boundary"))]
    Unterminated,
    #[snafu(display("Invalid content type {:?}: {}", content_type, source))]
    InvalidContentType {
        content_type: String,
        source: mime::FromStrError,
    },
    #[snafu(display("Multipart content type {:?} has no boundary parameter", content_type))]
    MissingBoundaryParameter { content_type: String },
}

/// One headered section of a multipart body.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Section {
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Section {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a section header, ignoring ASCII case in the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    fn contains(&self, needle: &[u8]) -> bool {
        memmem::find(&self.body, needle).is_some()
            || self.headers.iter().any(|(name, value)| {
                memmem::find(name.as_bytes(), needle).is_some()
                    || memmem::find(value.as_bytes(), needle).is_some()
            })
    }
}

/// An encoded multipart body along with the boundary it was delimited with.
#[derive(Clone, Debug)]
pub struct Multipart {
    pub boundary: String,
    pub body: Bytes,
}

impl Multipart {
    /// The `Content-Type` header value for this body, e.g. `multipart/mixed; boundary=...`.
    pub fn content_type(&self, subtype: &str) -> String {
        format!("multipart/{subtype}; boundary={}", self.boundary)
    }
}

/// Encodes `sections` in order under a freshly generated boundary.
pub fn encode(sections: &[Section]) -> Result<Multipart, MultipartError> {
    for _ in 0..MAX_BOUNDARY_ATTEMPTS {
        let boundary = random_boundary();
        if sections
            .iter()
            .all(|section| !section.contains(boundary.as_bytes()))
        {
            let body = encode_with_boundary(sections, &boundary)?;
            return Ok(Multipart { boundary, body });
        }
    }
    BoundaryCollisionSnafu.fail()
}

/// Encodes `sections` in order under `boundary`.
pub fn encode_with_boundary(sections: &[Section], boundary: &str) -> Result<Bytes, MultipartError> {
    if !is_valid_boundary(boundary) {
        return InvalidBoundarySnafu { boundary }.fail();
    }
    if sections
        .iter()
        .any(|section| section.contains(boundary.as_bytes()))
    {
        return BoundaryCollisionSnafu.fail();
    }

    let mut out = BytesMut::new();
    for (index, section) in sections.iter().enumerate() {
        if index > 0 {
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"--");
        out.put_slice(boundary.as_bytes());
        out.put_slice(b"\r\n");
        for (name, value) in &section.headers {
            if !is_valid_header(name, value) {
                return InvalidSectionHeaderSnafu { name: name.clone() }.fail();
            }
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");
        out.put_slice(&section.body);
    }
    if !sections.is_empty() {
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"--");
    out.put_slice(boundary.as_bytes());
    out.put_slice(b"--\r\n");

    Ok(out.freeze())
}

/// Decodes a multipart body delimited by `boundary` into its sections, in encoded order.
pub fn decode(body: &Bytes, boundary: &str) -> Result<Vec<Section>, MultipartError> {
    if !is_valid_boundary(boundary) {
        return InvalidBoundarySnafu { boundary }.fail();
    }

    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut line_delimiter = Vec::with_capacity(delimiter.len() + 1);
    line_delimiter.push(b'\n');
    line_delimiter.extend_from_slice(delimiter);

    let mut pos = if body.starts_with(delimiter) {
        0
    } else {
        // Anything before the first delimiter line is preamble.
        memmem::find(body, &line_delimiter)
            .map(|index| index + 1)
            .ok_or_else(|| MultipartError::MissingBoundary {
                boundary: boundary.to_owned(),
            })?
    };

    let mut sections = Vec::new();
    loop {
        pos += delimiter.len();
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(sections);
        }
        pos += line_end(rest).ok_or(MultipartError::Unterminated)?;

        let mut section = Section::default();
        loop {
            let rest = &body[pos..];
            let newline = memchr::memchr(b'\n', rest).ok_or(MultipartError::Unterminated)?;
            let line = rest[..newline].strip_suffix(b"\r").unwrap_or(&rest[..newline]);
            pos += newline + 1;
            if line.is_empty() {
                break;
            }
            section.headers.push(parse_header(line)?);
        }

        let rest = &body[pos..];
        let next = memmem::find(rest, &line_delimiter).ok_or(MultipartError::Unterminated)?;
        let mut end = pos + next;
        if end > pos && body[end - 1] == b'\r' {
            end -= 1;
        }
        section.body = body.slice(pos..end);
        sections.push(section);

        pos += next + 1;
    }
}

/// Extracts the boundary from a `Content-Type` value when it names a multipart media type.
///
/// Returns `Ok(None)` for non-multipart media types.
pub fn boundary_from_content_type(content_type: &str) -> Result<Option<String>, MultipartError> {
    let media: mime::Mime = content_type
        .parse()
        .context(InvalidContentTypeSnafu { content_type })?;
    if media.type_() != mime::MULTIPART {
        return Ok(None);
    }
    media
        .get_param(mime::BOUNDARY)
        .map(|boundary| Some(boundary.as_str().trim_matches('"').to_owned()))
        .ok_or_else(|| MultipartError::MissingBoundaryParameter {
            content_type: content_type.to_owned(),
        })
}

fn random_boundary() -> String {
    let mut bytes = [0_u8; BOUNDARY_RANDOM_BYTES];
    rand::rng().fill(&mut bytes);
    bytes
        .iter()
        .fold(String::with_capacity(BOUNDARY_RANDOM_BYTES * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

fn is_valid_boundary(boundary: &str) -> bool {
    const SPECIALS: &[u8] = b"'()+_,-./:=? ";

    !boundary.is_empty()
        && boundary.len() <= MAX_BOUNDARY_LEN
        && !boundary.ends_with(' ')
        && boundary
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || SPECIALS.contains(&b))
}

fn is_valid_header(name: &str, value: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
        && !value.bytes().any(|b| b == b'\r' || b == b'\n')
}

/// Length of the line ending (after optional linear whitespace) at the start of `rest`.
fn line_end(rest: &[u8]) -> Option<usize> {
    let padding = rest
        .iter()
        .take_while(|b| **b == b' ' || **b == b'\t')
        .count();
    match &rest[padding..] {
        [b'\r', b'\n', ..] => Some(padding + 2),
        [b'\n', ..] => Some(padding + 1),
        _ => None,
    }
}

fn parse_header(line: &[u8]) -> Result<(String, String), MultipartError> {
    let malformed = || MultipartError::MalformedHeader {
        line: String::from_utf8_lossy(line).into_owned(),
    };
    let colon = memchr::memchr(b':', line).ok_or_else(malformed)?;
    let name = std::str::from_utf8(&line[..colon]).map_err(|_| malformed())?;
    let value = String::from_utf8_lossy(&line[colon + 1..]);
    if name.trim().is_empty() {
        return Err(malformed());
    }
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}
