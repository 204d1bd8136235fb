use std::sync::OnceLock;

use cutoff_adapters::SourceSnapshot;
use cutoff_core::{ColumnMapping, ColumnMappings, MajorRecord, ProgramType, RawRow, ResidencyColumn, SourceKind};
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Cell values that carry no number even though the column is numeric.
const NUMERIC_PLACEHOLDERS: [&str; 4] = ["sup", "nf", "-", "specialization did not exist"];

/// Why a raw row never became a record. Row-level: the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("no program name in specialization cell {raw:?}")]
    MissingName { raw: Option<String> },
    #[error("no 4-digit program id in specialization cell {raw:?}")]
    MissingExternalId { raw: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub source: SourceKind,
    pub table_index: usize,
    pub row_index: usize,
    pub reason: MalformedRecord,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<MajorRecord>,
    pub rejected: Vec<RejectedRow>,
}

fn program_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d{4})\)").expect("valid program id regex"))
}

fn program_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(Combined Major|Combined Honours|Major|Honours)\b")
            .expect("valid program type regex")
    })
}

fn bare_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:Combined Major|Combined Honours|Major|Honours)\b)?\s*(?:\(\d+\))?\s*:?\s*([^()]+)",
        )
        .expect("valid program name regex")
    })
}

fn excluding_domestic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bExcluding\b.*\bDomestic\b").expect("valid residency regex"))
}

pub fn extract_program_id(specialization: &str) -> Option<String> {
    program_id_re()
        .captures(specialization)
        .map(|caps| caps[1].to_string())
}

/// `Type: Name (id)` yields `Name`; otherwise leading type keywords and `(id)` are stripped.
pub fn extract_program_name(specialization: &str) -> Option<String> {
    let name = match specialization.split(": ").nth(1) {
        Some(after_prefix) => after_prefix
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string(),
        None => bare_name_re()
            .captures(specialization)
            .map(|caps| caps[1].trim().to_string())?,
    };
    (!name.is_empty()).then_some(name)
}

pub fn extract_program_type(specialization: &str) -> Option<ProgramType> {
    program_type_re()
        .find(specialization)
        .and_then(|m| ProgramType::from_keyword(m.as_str()))
}

/// Grade-like cell to a number, with placeholders and junk read as null.
pub fn parse_measure(raw: Option<&str>) -> Option<f64> {
    let text = raw?.trim().to_lowercase();
    if text.is_empty() || NUMERIC_PLACEHOLDERS.contains(&text.as_str()) {
        return None;
    }
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_count(raw: Option<&str>) -> Option<i64> {
    let value = parse_measure(raw)?;
    (value.fract() == 0.0 && value <= i64::MAX as f64).then_some(value as i64)
}

fn residency(row: &RawRow, rule: ResidencyColumn) -> Option<bool> {
    match rule {
        ResidencyColumn::OptionText { column } => row
            .cell(column)
            .map(|text| !excluding_domestic_re().is_match(text)),
        ResidencyColumn::Tag { column } => {
            row.cell(column)
                .and_then(|tag| match tag.to_ascii_uppercase().as_str() {
                    "DOM" => Some(true),
                    "INT" => Some(false),
                    _ => None,
                })
        }
        ResidencyColumn::Fixed { domestic } => Some(domestic),
        ResidencyColumn::Absent => None,
    }
}

fn optional_cell(row: &RawRow, col: Option<usize>) -> Option<&str> {
    col.and_then(|c| row.cell(c))
}

/// Pure per-row conversion. Never yields a record without name and id.
pub fn normalize(row: &RawRow, mapping: &ColumnMapping) -> Result<MajorRecord, MalformedRecord> {
    let specialization = row.cell(mapping.specialization);
    let raw = || specialization.map(str::to_string);

    let name = specialization
        .and_then(extract_program_name)
        .ok_or_else(|| MalformedRecord::MissingName { raw: raw() })?;
    let external_id = specialization
        .and_then(extract_program_id)
        .ok_or_else(|| MalformedRecord::MissingExternalId { raw: raw() })?;

    let mut record = MajorRecord::new(name, external_id);
    record.program_type = specialization.and_then(extract_program_type);
    record.year = optional_cell(row, mapping.year).map(str::to_string);
    record.max_grade = parse_measure(optional_cell(row, mapping.max_grade));
    record.min_grade = parse_measure(optional_cell(row, mapping.min_grade));
    record.initial_reject_count = parse_count(optional_cell(row, mapping.initial_reject_count));
    record.final_admit_count = parse_count(optional_cell(row, mapping.final_admit_count));
    record.domestic = residency(row, mapping.residency);
    record.note = optional_cell(row, mapping.note)
        .unwrap_or_default()
        .to_string();
    Ok(record)
}

/// Normalize every table of a snapshot through the mapping for its layout.
pub fn normalize_snapshot(snapshot: &SourceSnapshot, mappings: &ColumnMappings) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for (table_index, table) in snapshot.tables.iter().enumerate() {
        let mapping = mappings.for_layout(table.layout);
        for (row_index, row) in table.rows.iter().enumerate() {
            match normalize(row, mapping) {
                Ok(record) => batch.records.push(record),
                Err(reason) => {
                    warn!(
                        source = %snapshot.source,
                        table_index,
                        row_index,
                        %reason,
                        "dropping malformed row"
                    );
                    batch.rejected.push(RejectedRow {
                        source: snapshot.source,
                        table_index,
                        row_index,
                        reason,
                    });
                }
            }
        }
    }
    batch
}
