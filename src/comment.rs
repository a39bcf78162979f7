//! Feedback export records: column layout, feedback types and row parsing.

use crate::tsv::split_fields;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of columns in an export row.
pub const EXPORT_COLUMNS: usize = 11;

/// Feedback category short codes as written by the exporter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeedbackType {
    Praise,
    Issue,
    BrokenWebsite,
    Other(String),
}

impl FeedbackType {
    pub fn from_short(code: &str) -> Self {
        match code {
            "praise" => Self::Praise,
            "issue" => Self::Issue,
            "brokenwebsite" => Self::BrokenWebsite,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn short(&self) -> &str {
        match self {
            Self::Praise => "praise",
            Self::Issue => "issue",
            Self::BrokenWebsite => "brokenwebsite",
            Self::Other(s) => s,
        }
    }

    /// Types that take part in site clustering.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn is_praise(&self) -> bool {
        matches!(self, Self::Praise)
    }
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// `positive` column mapping: `NULL` for the aggregate bucket, `1` for praise, else `0`.
pub fn positive_flag(kind: Option<&FeedbackType>) -> &'static str {
    match kind {
        None => crate::tsv::NULL,
        Some(t) if t.is_praise() => "1",
        Some(_) => "0",
    }
}

/// One exported feedback item (id, created, type, product, version, os, locale,
/// manufacturer, device, url, description).
#[derive(Clone, Debug, PartialEq)]
pub struct Comment {
    pub id: u64,
    pub created: i64,
    pub kind: FeedbackType,
    pub product: String,
    pub version: String,
    pub os: String,
    pub locale: String,
    pub manufacturer: String,
    pub device: String,
    pub url: String,
    pub message: String,
}

/// Why a logical record could not be read as a [`Comment`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowError {
    FieldCount(usize),
    BadId(String),
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::FieldCount(n) => write!(f, "expected {EXPORT_COLUMNS} fields, found {n}"),
            RowError::BadId(s) => write!(f, "comment id {s:?} is not an integer"),
        }
    }
}

impl std::error::Error for RowError {}

impl Comment {
    /// Parse one recombined export record. Tabs past the tenth column belong to the message.
    /// An empty or non-numeric timestamp is read as 0; it plays no part in clustering.
    pub fn parse(line: &str) -> Result<Self, RowError> {
        let fields = split_fields(line, EXPORT_COLUMNS);
        if fields.len() != EXPORT_COLUMNS {
            return Err(RowError::FieldCount(fields.len()));
        }
        let mut it = fields.into_iter();
        let mut next = || it.next().unwrap_or_default();

        let raw_id = next();
        let id = raw_id.trim().parse::<u64>().map_err(|_| RowError::BadId(raw_id.clone()))?;
        let created = next().trim().parse::<i64>().unwrap_or(0);
        let kind = FeedbackType::from_short(&next());
        Ok(Self {
            id,
            created,
            kind,
            product: next(),
            version: next(),
            os: next(),
            locale: next(),
            manufacturer: next(),
            device: next(),
            url: next(),
            message: next(),
        })
    }
}
