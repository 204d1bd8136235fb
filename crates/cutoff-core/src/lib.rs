//! Core domain model for the specialization cutoff sync.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cutoff-core";

/// Program classification. Persisted with spaces normalized to underscores.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProgramType {
    #[default]
    #[serde(rename = "Major")]
    Major,
    #[serde(rename = "Combined_Major")]
    CombinedMajor,
    #[serde(rename = "Honours")]
    Honours,
    #[serde(rename = "Combined_Honours")]
    CombinedHonours,
}

impl ProgramType {
    pub const ALL: [ProgramType; 4] = [
        ProgramType::Major,
        ProgramType::CombinedMajor,
        ProgramType::Honours,
        ProgramType::CombinedHonours,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgramType::Major => "Major",
            ProgramType::CombinedMajor => "Combined_Major",
            ProgramType::Honours => "Honours",
            ProgramType::CombinedHonours => "Combined_Honours",
        }
    }

    /// Accepts both the display keyword (`Combined Major`) and the stored form (`Combined_Major`).
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().replace(' ', "_").as_str() {
            "Major" => Some(ProgramType::Major),
            "Combined_Major" => Some(ProgramType::CombinedMajor),
            "Honours" => Some(ProgramType::Honours),
            "Combined_Honours" => Some(ProgramType::CombinedHonours),
            _ => None,
        }
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical per-run record produced by normalization and consumed by the merge.
///
/// `name` and `external_id` are required: a row without them never becomes a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MajorRecord {
    pub name: String,
    pub external_id: String,
    pub program_type: Option<ProgramType>,
    pub year: Option<String>,
    pub max_grade: Option<f64>,
    pub min_grade: Option<f64>,
    pub initial_reject_count: Option<i64>,
    pub final_admit_count: Option<i64>,
    pub domestic: Option<bool>,
    #[serde(default)]
    pub note: String,
}

impl MajorRecord {
    pub fn new(name: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: external_id.into(),
            program_type: None,
            year: None,
            max_grade: None,
            min_grade: None,
            initial_reject_count: None,
            final_admit_count: None,
            domestic: None,
            note: String::new(),
        }
    }

    pub fn effective_program_type(&self) -> ProgramType {
        self.program_type.unwrap_or_default()
    }

    /// `name|type|year`, with an unresolved type read as `Major`.
    pub fn merge_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.name,
            self.effective_program_type(),
            self.year.as_deref().unwrap_or_default()
        )
    }
}

/// Which upstream a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Sheet,
    Scrape,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Sheet => f.write_str("sheet"),
            SourceKind::Scrape => f.write_str("scrape"),
        }
    }
}

/// Physical table shapes the adapters emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    Sheet,
    UniformTable,
    DualHeaderTable,
}

const NAN_EQUIVALENTS: [&str; 5] = ["nan", "null", "none", "n/a", "<na>"];

/// One untyped row as extracted by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow(pub Vec<String>);

impl RawRow {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(cells.into_iter().map(Into::into).collect())
    }

    /// Trimmed cell text, or `None` when missing, blank, or NaN-like.
    pub fn cell(&self, index: usize) -> Option<&str> {
        let value = self.0.get(index)?.trim();
        if value.is_empty()
            || NAN_EQUIVALENTS
                .iter()
                .any(|nan| value.eq_ignore_ascii_case(nan))
        {
            return None;
        }
        Some(value)
    }
}

/// How a layout expresses residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResidencyColumn {
    /// Free-text option column; "Excluding ... Domestic" marks international.
    OptionText { column: usize },
    /// Explicit `DOM`/`INT` tag column.
    Tag { column: usize },
    /// Every row of the layout has the same residency.
    Fixed { domestic: bool },
    Absent,
}

/// Logical field -> physical column position for one table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub specialization: usize,
    #[serde(default)]
    pub year: Option<usize>,
    #[serde(default)]
    pub max_grade: Option<usize>,
    #[serde(default)]
    pub min_grade: Option<usize>,
    #[serde(default)]
    pub initial_reject_count: Option<usize>,
    #[serde(default)]
    pub final_admit_count: Option<usize>,
    #[serde(default)]
    pub note: Option<usize>,
    pub residency: ResidencyColumn,
}

impl ColumnMapping {
    pub fn sheet() -> Self {
        Self {
            specialization: 2,
            year: Some(0),
            max_grade: Some(7),
            min_grade: Some(8),
            initial_reject_count: Some(5),
            final_admit_count: Some(6),
            note: None,
            residency: ResidencyColumn::OptionText { column: 1 },
        }
    }

    pub fn uniform_table() -> Self {
        Self {
            specialization: 0,
            year: Some(1),
            max_grade: None,
            min_grade: Some(2),
            initial_reject_count: None,
            final_admit_count: None,
            note: Some(3),
            residency: ResidencyColumn::Fixed { domestic: true },
        }
    }

    pub fn dual_header_table() -> Self {
        Self {
            specialization: 0,
            year: Some(1),
            max_grade: None,
            min_grade: Some(3),
            initial_reject_count: None,
            final_admit_count: None,
            note: None,
            residency: ResidencyColumn::Tag { column: 2 },
        }
    }
}

/// One mapping per layout, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMappings {
    #[serde(default = "ColumnMapping::sheet")]
    pub sheet: ColumnMapping,
    #[serde(default = "ColumnMapping::uniform_table")]
    pub uniform_table: ColumnMapping,
    #[serde(default = "ColumnMapping::dual_header_table")]
    pub dual_header_table: ColumnMapping,
}

impl Default for ColumnMappings {
    fn default() -> Self {
        Self {
            sheet: ColumnMapping::sheet(),
            uniform_table: ColumnMapping::uniform_table(),
            dual_header_table: ColumnMapping::dual_header_table(),
        }
    }
}

impl ColumnMappings {
    pub fn for_layout(&self, layout: TableLayout) -> &ColumnMapping {
        match layout {
            TableLayout::Sheet => &self.sheet,
            TableLayout::UniformTable => &self.uniform_table,
            TableLayout::DualHeaderTable => &self.dual_header_table,
        }
    }
}

/// Per-source content digests for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub sheet: String,
    pub scrape: String,
}

/// Persisted audit row, one per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub id: i64,
    pub sheet_checksum: String,
    pub scrape_checksum: String,
    pub recorded_at: DateTime<Utc>,
    pub success: bool,
}

/// Append payload for the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRunMetadata {
    pub sheet_checksum: String,
    pub scrape_checksum: String,
    pub recorded_at: DateTime<Utc>,
    pub success: bool,
}

impl NewRunMetadata {
    pub fn new(fingerprints: &Fingerprints, recorded_at: DateTime<Utc>, success: bool) -> Self {
        Self {
            sheet_checksum: fingerprints.sheet.clone(),
            scrape_checksum: fingerprints.scrape.clone(),
            recorded_at,
            success,
        }
    }
}

/// Durable identifier of a persisted major.
pub type MajorId = i64;
