//! Core data models used throughout Quality Store.
//!
//! An [`Analysis`] is one generated report. It is split into [`Chunk`]s,
//! each of which is persisted as a [`ChunkRecord`] carrying a denormalized
//! copy of the parent's [`AnalysisMetadata`] so that filters never need a
//! join.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Field names that `extra` metadata keys may not shadow.
pub const RESERVED_FIELDS: &[&str] = &[
    "app_id",
    "app_name",
    "focus_areas",
    "created_at",
    "sequence_index",
    "text",
    "chunk_id",
];

/// Quality dimension an analysis covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusArea {
    Logging,
    Availability,
    ErrorHandling,
}

impl FocusArea {
    pub const ALL: [FocusArea; 3] = [
        FocusArea::Logging,
        FocusArea::Availability,
        FocusArea::ErrorHandling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FocusArea::Logging => "logging",
            FocusArea::Availability => "availability",
            FocusArea::ErrorHandling => "error_handling",
        }
    }
}

impl fmt::Display for FocusArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FocusArea {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "logging" => Ok(FocusArea::Logging),
            "availability" => Ok(FocusArea::Availability),
            "error_handling" => Ok(FocusArea::ErrorHandling),
            other => Err(StoreError::InvalidRecord(format!(
                "unknown focus area '{}': expected logging, availability or error_handling",
                other
            ))),
        }
    }
}

/// Render a focus-area set as a comma-separated list (`"availability,logging"`).
pub fn join_focus_areas(areas: &BTreeSet<FocusArea>) -> String {
    areas
        .iter()
        .map(FocusArea::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the comma-separated form written by [`join_focus_areas`].
pub fn parse_focus_areas(s: &str) -> Result<BTreeSet<FocusArea>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(FocusArea::from_str)
        .collect()
}

/// One generated report, as handed over by the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub app_id: String,
    pub app_name: String,
    pub focus_areas: BTreeSet<FocusArea>,
    pub created_at: DateTime<Utc>,
    pub source_text: String,
    /// Free-form string attributes (e.g. `team = "payments"`).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Analysis {
    pub fn new(
        app_id: impl Into<String>,
        app_name: impl Into<String>,
        focus_areas: impl IntoIterator<Item = FocusArea>,
        source_text: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_name: app_name.into(),
            focus_areas: focus_areas.into_iter().collect(),
            created_at: Utc::now(),
            source_text: source_text.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Validate the record before it enters the index.
    pub fn validate(&self) -> Result<()> {
        validate_app_id(&self.app_id)?;
        if self.app_name.trim().is_empty() {
            return Err(StoreError::InvalidRecord(format!(
                "app_name must not be empty (app_id {})",
                self.app_id
            )));
        }
        for key in self.extra.keys() {
            if key.trim().is_empty() {
                return Err(StoreError::InvalidRecord(
                    "extra metadata keys must not be empty".to_string(),
                ));
            }
            if RESERVED_FIELDS.contains(&key.as_str()) {
                return Err(StoreError::InvalidRecord(format!(
                    "extra metadata key '{}' shadows a reserved field",
                    key
                )));
            }
        }
        Ok(())
    }

    pub fn metadata(&self) -> AnalysisMetadata {
        AnalysisMetadata {
            app_id: self.app_id.clone(),
            app_name: self.app_name.clone(),
            focus_areas: self.focus_areas.clone(),
            created_at: self.created_at,
            extra: self.extra.clone(),
        }
    }
}

/// Check an application id for use as a key.
pub fn validate_app_id(app_id: &str) -> Result<()> {
    if app_id.is_empty() {
        return Err(StoreError::InvalidRecord(
            "app_id must not be empty".to_string(),
        ));
    }
    if app_id.trim() != app_id {
        return Err(StoreError::InvalidRecord(format!(
            "app_id '{}' has leading or trailing whitespace",
            app_id
        )));
    }
    if app_id.chars().any(char::is_control) {
        return Err(StoreError::InvalidRecord(
            "app_id must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Attributes of an [`Analysis`] duplicated onto every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub app_id: String,
    pub app_name: String,
    pub focus_areas: BTreeSet<FocusArea>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// A contiguous slice of an analysis's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub app_id: String,
    /// 0-based position; defines reconstruction order.
    pub sequence_index: u32,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// The persisted unit: chunk, embedding and metadata payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub metadata: AnalysisMetadata,
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }

    pub fn app_id(&self) -> &str {
        &self.chunk.app_id
    }

    /// Reject records whose payload disagrees with itself.
    pub fn validate(&self) -> Result<()> {
        if self.chunk.app_id != self.metadata.app_id {
            return Err(StoreError::InvalidRecord(format!(
                "chunk {} belongs to '{}' but carries metadata for '{}'",
                self.chunk.chunk_id, self.chunk.app_id, self.metadata.app_id
            )));
        }
        if self.vector.is_empty() {
            return Err(StoreError::InvalidRecord(format!(
                "chunk {} has an empty vector",
                self.chunk.chunk_id
            )));
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidRecord(format!(
                "chunk {} has non-finite vector components",
                self.chunk.chunk_id
            )));
        }
        Ok(())
    }
}

/// Entry in the application listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AppSummary {
    pub app_id: String,
    pub app_name: String,
}

/// A fully reconstructed analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAnalysis {
    pub app_id: String,
    pub metadata: AnalysisMetadata,
    pub text: String,
    pub chunk_count: usize,
}

/// A ranked query result: the best chunk of one application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub app_id: String,
    pub app_name: String,
    pub chunk_id: String,
    pub sequence_index: u32,
    pub matched_text: String,
    pub score: f64,
}

/// Outcome of a store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreReceipt {
    pub app_id: String,
    pub chunk_count: usize,
    /// Number of previously stored chunks that were replaced.
    pub replaced: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_area_parse_and_display() {
        assert_eq!("logging".parse::<FocusArea>().unwrap(), FocusArea::Logging);
        assert_eq!(
            "Error-Handling".parse::<FocusArea>().unwrap(),
            FocusArea::ErrorHandling
        );
        assert!("security".parse::<FocusArea>().is_err());
        assert_eq!(FocusArea::ErrorHandling.to_string(), "error_handling");
    }

    #[test]
    fn test_focus_area_serde_snake_case() {
        let json = serde_json::to_string(&FocusArea::ErrorHandling).unwrap();
        assert_eq!(json, "\"error_handling\"");
    }

    #[test]
    fn test_focus_list_roundtrip() {
        let areas: BTreeSet<_> = [FocusArea::Logging, FocusArea::Availability].into();
        let joined = join_focus_areas(&areas);
        assert_eq!(joined, "logging,availability");
        assert_eq!(parse_focus_areas(&joined).unwrap(), areas);
        assert!(parse_focus_areas("").unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_ids() {
        let ok = Analysis::new("app-1", "Payments", [FocusArea::Logging], "text");
        assert!(ok.validate().is_ok());

        let mut bad = ok.clone();
        bad.app_id = " app-1".to_string();
        assert!(bad.validate().is_err());

        bad.app_id = String::new();
        assert!(bad.validate().is_err());

        let mut unnamed = ok.clone();
        unnamed.app_name = "  ".to_string();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_reserved_extra_keys() {
        let a = Analysis::new("app-1", "Payments", [], "text").with_extra("app_name", "x");
        assert!(matches!(a.validate(), Err(StoreError::InvalidRecord(_))));

        let b = Analysis::new("app-1", "Payments", [], "text").with_extra("team", "core");
        assert!(b.validate().is_ok());
    }

    #[test]
    fn test_record_validation() {
        let a = Analysis::new("app-1", "Payments", [], "text");
        let mut record = ChunkRecord {
            chunk: Chunk {
                chunk_id: "c0".into(),
                app_id: "app-1".into(),
                sequence_index: 0,
                text: "text".into(),
                hash: String::new(),
            },
            metadata: a.metadata(),
            vector: vec![1.0, 0.0],
        };
        assert!(record.validate().is_ok());

        record.vector = vec![f32::NAN];
        assert!(record.validate().is_err());

        record.vector = vec![1.0];
        record.metadata.app_id = "other".into();
        assert!(record.validate().is_err());
    }
}
