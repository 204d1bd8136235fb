//! Source adapter contracts + sheet (CSV) and scrape (HTML) adapters.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cutoff_core::{RawRow, SourceKind, TableLayout};
use cutoff_storage::HttpFetcher;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "cutoff-adapters";

pub const DEFAULT_SCRAPE_URL: &str =
    "https://science.ubc.ca/students/historical-bsc-specialization-admission-information";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

/// Where a source document lives: fetched over HTTP or read from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentLocation {
    Url(String),
    File(PathBuf),
}

impl DocumentLocation {
    /// `http(s)://` locations are URLs; anything else is a path relative to `base_dir`.
    pub fn parse(location: &str, base_dir: &Path) -> Self {
        let trimmed = location.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            DocumentLocation::Url(trimmed.to_string())
        } else {
            let path = Path::new(trimmed);
            if path.is_absolute() {
                DocumentLocation::File(path.to_path_buf())
            } else {
                DocumentLocation::File(base_dir.join(path))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DocumentLocation::Url(url) => url.clone(),
            DocumentLocation::File(path) => path.display().to_string(),
        }
    }
}

/// Rows of one physical table, tagged with the layout that decides their mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub layout: TableLayout,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub source: SourceKind,
    pub location: String,
    pub fetched_at: DateTime<Utc>,
    pub tables: Vec<RawTable>,
}

impl SourceSnapshot {
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{origin} data unavailable from {location}: {reason}")]
    DataUnavailable {
        origin: SourceKind,
        location: String,
        reason: String,
    },
}

impl AdapterError {
    fn unavailable(origin: SourceKind, location: &DocumentLocation, reason: impl ToString) -> Self {
        AdapterError::DataUnavailable {
            origin,
            location: location.describe(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceKind;

    /// Fetch the document and extract its raw rows. Any failure is fatal to the run.
    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<SourceSnapshot, AdapterError>;
}

async fn read_document(
    http: &HttpFetcher,
    ctx: &AdapterContext,
    source: SourceKind,
    location: &DocumentLocation,
) -> Result<String, AdapterError> {
    let bytes = match location {
        DocumentLocation::Url(url) => {
            http.fetch_bytes(ctx.run_id, &source.to_string(), url)
                .await
                .map_err(|e| AdapterError::unavailable(source, location, e))?
                .body
        }
        DocumentLocation::File(path) => tokio::fs::read(path)
            .await
            .map_err(|e| AdapterError::unavailable(source, location, e))?,
    };
    if bytes.is_empty() {
        return Err(AdapterError::unavailable(source, location, "empty document"));
    }
    String::from_utf8(bytes).map_err(|e| AdapterError::unavailable(source, location, e))
}

/// Published spreadsheet export (CSV, fixed column layout).
#[derive(Debug, Clone)]
pub struct SheetAdapter {
    location: DocumentLocation,
}

impl SheetAdapter {
    pub fn new(location: DocumentLocation) -> Self {
        Self { location }
    }
}

#[async_trait]
impl SourceAdapter for SheetAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Sheet
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<SourceSnapshot, AdapterError> {
        let text = read_document(http, ctx, SourceKind::Sheet, &self.location).await?;
        let rows = parse_sheet_csv(&text)
            .map_err(|e| AdapterError::unavailable(SourceKind::Sheet, &self.location, e))?;
        Ok(SourceSnapshot {
            source: SourceKind::Sheet,
            location: self.location.describe(),
            fetched_at: ctx.fetched_at,
            tables: vec![RawTable {
                layout: TableLayout::Sheet,
                rows,
            }],
        })
    }
}

/// Skips the header row; rows may be ragged.
pub fn parse_sheet_csv(text: &str) -> Result<Vec<RawRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    reader
        .records()
        .map(|record| record.map(|r| RawRow::new(r.iter())))
        .collect()
}

/// Historical admission page with one uniform table and two dual-header tables.
#[derive(Debug, Clone)]
pub struct ScrapeAdapter {
    location: DocumentLocation,
}

impl ScrapeAdapter {
    pub fn new(location: DocumentLocation) -> Self {
        Self { location }
    }
}

#[async_trait]
impl SourceAdapter for ScrapeAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Scrape
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<SourceSnapshot, AdapterError> {
        let html = read_document(http, ctx, SourceKind::Scrape, &self.location).await?;
        let tables = parse_scrape_html(&html)
            .map_err(|e| AdapterError::unavailable(SourceKind::Scrape, &self.location, e))?;
        Ok(SourceSnapshot {
            source: SourceKind::Scrape,
            location: self.location.describe(),
            fetched_at: ctx.fetched_at,
            tables,
        })
    }
}

pub fn adapter_for_source(source: SourceKind, location: DocumentLocation) -> Box<dyn SourceAdapter> {
    match source {
        SourceKind::Sheet => Box::new(SheetAdapter::new(location)),
        SourceKind::Scrape => Box::new(ScrapeAdapter::new(location)),
    }
}

fn year_residency_column() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})_(DOM|INT)$").expect("static regex"))
}

fn parse_selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| e.to_string())
}

/// Extract the three admission tables, melted to one row per (specialization, year[, residency]).
///
/// Uniform rows: `[specialization, year, value, notes]`.
/// Dual-header rows: `[specialization, year, DOM|INT, value]`.
pub fn parse_scrape_html(html: &str) -> Result<Vec<RawTable>, String> {
    let document = Html::parse_document(html);
    let table_sel = parse_selector("table")?;
    let grids = document
        .select(&table_sel)
        .map(table_grid)
        .collect::<Result<Vec<_>, _>>()?;

    if grids.len() < 3 {
        return Err(format!("expected 3 admission tables, found {}", grids.len()));
    }

    let mut tables = vec![RawTable {
        layout: TableLayout::UniformTable,
        rows: melt_uniform(&grids[0])?,
    }];
    for grid in &grids[1..3] {
        tables.push(RawTable {
            layout: TableLayout::DualHeaderTable,
            rows: melt_dual_header(grid)?,
        });
    }
    Ok(tables)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn span_attr(cell: ElementRef<'_>, name: &str) -> usize {
    cell.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}

/// Rectangularize a table, repeating `colspan`/`rowspan` cells into every slot they cover.
fn table_grid(table: ElementRef<'_>) -> Result<Vec<Vec<String>>, String> {
    let row_sel = parse_selector("tr")?;
    let cell_sel = parse_selector("th, td")?;

    let mut grid = Vec::new();
    // Per column: text still spanning down, and how many more rows it covers.
    let mut carried: Vec<Option<(String, usize)>> = Vec::new();

    for tr in table.select(&row_sel) {
        let mut row = Vec::new();
        let mut cells = tr.select(&cell_sel);
        let mut col = 0;

        loop {
            if let Some((text, remaining)) = carried.get_mut(col).and_then(Option::as_mut) {
                if *remaining > 0 {
                    row.push(text.clone());
                    *remaining -= 1;
                    col += 1;
                    continue;
                }
            }
            let Some(cell) = cells.next() else {
                break;
            };
            let text = cell_text(cell);
            let rowspan = span_attr(cell, "rowspan");
            for _ in 0..span_attr(cell, "colspan") {
                if carried.len() <= col {
                    carried.resize(col + 1, None);
                }
                carried[col] = (rowspan > 1).then(|| (text.clone(), rowspan - 1));
                row.push(text.clone());
                col += 1;
            }
        }

        while let Some((text, remaining)) = carried.get_mut(col).and_then(Option::as_mut) {
            if *remaining == 0 {
                break;
            }
            row.push(text.clone());
            *remaining -= 1;
            col += 1;
        }

        grid.push(row);
    }
    Ok(grid)
}

fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h.eq_ignore_ascii_case(name))
}

fn cell_at(row: &[String], index: usize) -> String {
    row.get(index).cloned().unwrap_or_default()
}

fn melt_uniform(grid: &[Vec<String>]) -> Result<Vec<RawRow>, String> {
    let (header, body) = grid
        .split_first()
        .ok_or_else(|| "uniform table has no header row".to_string())?;
    let spec_col = column_index(header, "Specialization")
        .ok_or_else(|| "uniform table lacks a Specialization column".to_string())?;
    let notes_col = column_index(header, "Notes");
    let year_cols: Vec<usize> = (0..header.len())
        .filter(|&c| c != spec_col && Some(c) != notes_col && !header[c].is_empty())
        .collect();

    let mut rows = Vec::new();
    for row in body {
        let spec = cell_at(row, spec_col);
        let notes = notes_col.map(|c| cell_at(row, c)).unwrap_or_default();
        for &c in &year_cols {
            rows.push(RawRow::new([
                spec.clone(),
                header[c].clone(),
                cell_at(row, c),
                notes.clone(),
            ]));
        }
    }
    Ok(rows)
}

fn melt_dual_header(grid: &[Vec<String>]) -> Result<Vec<RawRow>, String> {
    if grid.len() < 2 {
        return Err("dual-header table needs two header rows".to_string());
    }
    let width = grid[0].len().max(grid[1].len());
    let header: Vec<String> = (0..width)
        .map(|c| {
            let first = cell_at(&grid[0], c);
            let second = cell_at(&grid[1], c);
            if first == second {
                first
            } else {
                format!("{first}_{second}")
            }
        })
        .collect();

    let spec_col = column_index(&header, "Specialization")
        .ok_or_else(|| "dual-header table lacks a Specialization column".to_string())?;
    let value_cols: Vec<(usize, String, String)> = header
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.eq_ignore_ascii_case("Umbrella"))
        .filter_map(|(c, h)| {
            let caps = year_residency_column().captures(h)?;
            Some((c, caps[1].to_string(), caps[2].to_string()))
        })
        .collect();

    let mut rows = Vec::new();
    for row in &grid[2..] {
        let spec = cell_at(row, spec_col);
        for (c, year, residency) in &value_cols {
            rows.push(RawRow::new([
                spec.clone(),
                year.clone(),
                residency.clone(),
                cell_at(row, *c),
            ]));
        }
    }
    Ok(rows)
}
