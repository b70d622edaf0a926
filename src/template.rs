//! Templates evaluated against a batch.
//!
//! A template is a string with `{{ ... }}` references interpolated from the batch it is rendered
//! against. References resolve against the first part of the batch:
//!
//! - `{{ content }}`: the raw payload of the first part.
//! - `{{ batch_size }}`: the number of parts in the batch.
//! - `{{ metadata.<key> }}`: the metadata value stored under `<key>` on the first part.
//!
//! A template without references is static and renders to itself regardless of the batch.

use std::{fmt, str::FromStr, sync::LazyLock};

use bytes::{BufMut, Bytes, BytesMut};
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::message::Batch;

static RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(?P<reference>[^{}]*)\}\}").unwrap());

#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
pub enum TemplateParseError {
    #[snafu(display(
        "Invalid template reference {:?}: expected `content`, `batch_size` or `metadata.<key>`",
        reference
    ))]
    UnknownReference { reference: String },
}

#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
pub enum TemplateRenderingError {
    #[snafu(display("Missing metadata keys on template: {:?}", missing_keys))]
    MissingKeys { missing_keys: Vec<String> },
    #[snafu(display("Template references message content but the batch is empty"))]
    EmptyBatch,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Reference {
    Content,
    BatchSize,
    Metadata(String),
}

impl FromStr for Reference {
    type Err = TemplateParseError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let reference = reference.trim();
        match reference {
            "content" => Ok(Self::Content),
            "batch_size" => Ok(Self::BatchSize),
            _ => match reference.strip_prefix("metadata.") {
                Some(key) if !key.is_empty() => Ok(Self::Metadata(key.to_owned())),
                _ => UnknownReferenceSnafu { reference }.fail(),
            },
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Part {
    Literal(String),
    Reference(Reference),
}

/// A string interpolated against a batch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
    src: String,
    parts: Vec<Part>,
}

impl Template {
    /// A static template. `src` is not scanned for references and always renders verbatim.
    pub fn literal(src: impl Into<String>) -> Self {
        let src = src.into();
        Self {
            parts: vec![Part::Literal(src.clone())],
            src,
        }
    }

    /// Returns `true` when rendering depends on the batch.
    pub fn is_dynamic(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, Part::Reference(_)))
    }

    pub fn get_ref(&self) -> &str {
        &self.src
    }

    /// Renders the template against `batch` as raw bytes.
    ///
    /// Bytes interpolated from `{{ content }}` are copied unmodified, so binary payloads survive.
    pub fn render(&self, batch: &Batch) -> Result<Bytes, TemplateRenderingError> {
        if !self.is_dynamic() {
            return Ok(Bytes::copy_from_slice(self.src.as_bytes()));
        }

        let mut out = BytesMut::new();
        let mut missing_keys = Vec::new();
        for part in &self.parts {
            match part {
                Part::Literal(literal) => out.put_slice(literal.as_bytes()),
                Part::Reference(Reference::BatchSize) => {
                    out.put_slice(batch.len().to_string().as_bytes())
                }
                Part::Reference(Reference::Content) => {
                    let first = batch.first().ok_or(TemplateRenderingError::EmptyBatch)?;
                    out.put_slice(first.payload());
                }
                Part::Reference(Reference::Metadata(key)) => {
                    let first = batch.first().ok_or(TemplateRenderingError::EmptyBatch)?;
                    match first.metadata_get(key) {
                        Some(value) => out.put_slice(value.as_bytes()),
                        None => missing_keys.push(key.clone()),
                    }
                }
            }
        }

        if missing_keys.is_empty() {
            Ok(out.freeze())
        } else {
            Err(TemplateRenderingError::MissingKeys { missing_keys })
        }
    }

    /// Renders the template against `batch` as a string, replacing invalid UTF-8.
    pub fn render_string(&self, batch: &Batch) -> Result<String, TemplateRenderingError> {
        self.render(batch)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl TryFrom<&str> for Template {
    type Error = TemplateParseError;

    fn try_from(src: &str) -> Result<Self, Self::Error> {
        let mut parts = Vec::new();
        let mut last_end = 0;
        for captures in RE.captures_iter(src) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if whole.start() > last_end {
                parts.push(Part::Literal(src[last_end..whole.start()].to_owned()));
            }
            let reference = captures
                .name("reference")
                .map_or("", |reference| reference.as_str());
            parts.push(Part::Reference(reference.parse()?));
            last_end = whole.end();
        }
        if last_end < src.len() {
            parts.push(Part::Literal(src[last_end..].to_owned()));
        }

        Ok(Self {
            src: src.to_owned(),
            parts,
        })
    }
}

impl TryFrom<String> for Template {
    type Error = TemplateParseError;

    fn try_from(src: String) -> Result<Self, Self::Error> {
        Self::try_from(src.as_str())
    }
}

impl FromStr for Template {
    type Err = TemplateParseError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        Self::try_from(src)
    }
}

impl From<Template> for String {
    fn from(template: Template) -> String {
        template.src
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.src.fmt(f)
    }
}
