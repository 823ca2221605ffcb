//! Source loader: upload validation and decoding of workbooks, CSV and JSON.

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use encoding_rs::{UTF_8, WINDOWS_1252};
use serde::Serialize;
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{ExtractError, Result};
use crate::pipeline::{extract_json, extract_tables, ExtractionConfig, ExtractionOutcome, NamedTable};
use crate::table::{Cell, RawTable};

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

pub const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Workbook,
    Csv,
    Json,
}

impl SourceKind {
    /// Determines the kind from a file name's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(SourceKind::Csv),
            "json" => Ok(SourceKind::Json),
            e if WORKBOOK_EXTENSIONS.contains(&e) => Ok(SourceKind::Workbook),
            "" => Err(ExtractError::UnsupportedFile(filename.to_string())),
            _ => Err(ExtractError::UnsupportedFile(format!(".{}", ext))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Workbook => "workbook",
            SourceKind::Csv => "csv",
            SourceKind::Json => "json",
        }
    }
}

/// Checks an upload before any decoding is attempted.
pub fn validate_upload(filename: &str, size: u64) -> Result<SourceKind> {
    let kind = SourceKind::from_filename(filename)?;
    if size > MAX_UPLOAD_BYTES {
        return Err(ExtractError::FileTooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }
    Ok(kind)
}

// ============================================================================
// WORKBOOKS
// ============================================================================

fn workbook_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::from(s.as_str()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time() == chrono::NaiveTime::MIN => {
                Cell::Text(ts.format("%Y-%m-%d").to_string())
            }
            Some(ts) => Cell::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Cell::Text(dt.to_string()),
        },
        other => Cell::from(other.to_string().as_str()),
    }
}

/// Converts a calamine range into a table anchored at A1.
///
/// Ranges start at their first used cell, so a sheet whose column A is empty
/// is shifted left; leading empty columns are restored to keep column indices
/// stable for detection, and row indices count from the top of the sheet.
fn range_to_table(range: &Range<Data>) -> RawTable {
    let (row_offset, col_offset) = range
        .start()
        .map(|(row, col)| (row as usize, col as usize))
        .unwrap_or((0, 0));
    RawTable::from_indexed_rows(range.rows().enumerate().map(|(idx, row)| {
        let mut cells = vec![Cell::Empty; col_offset];
        cells.extend(row.iter().map(workbook_cell));
        (row_offset + idx, cells)
    }))
}

/// Decodes every sheet of an xlsx/xls/xlsb/ods workbook.
pub fn load_workbook(bytes: &[u8]) -> Result<Vec<NamedTable>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ExtractError::parse("workbook", e))?;

    let sheet_names = workbook.sheet_names().to_vec();
    info!("Workbook has {} sheets: {:?}", sheet_names.len(), sheet_names);

    let mut tables = Vec::with_capacity(sheet_names.len());
    for name in sheet_names {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                warn!("Skipping sheet '{}': {}", name, e);
                continue;
            }
        };
        let (rows, cols) = range.get_size();
        debug!("Sheet '{}': {} rows x {} columns", name, rows, cols);
        tables.push(NamedTable {
            table: range_to_table(&range),
            name,
        });
    }
    Ok(tables)
}

// ============================================================================
// CSV
// ============================================================================

/// UTF-8 (BOM stripped) when valid, Windows-1252 otherwise.
fn decode_text(bytes: &[u8]) -> String {
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    debug!("Input is not valid UTF-8, decoding as Windows-1252");
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Picks the delimiter that occurs most in the first non-blank line. Ties go
/// to the earlier candidate in `,` `;` tab order.
fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut best = (b',', 0);
    for delimiter in [b',', b';', b'\t'] {
        let count = first.bytes().filter(|&b| b == delimiter).count();
        if count > best.1 {
            best = (delimiter, count);
        }
    }
    best.0
}

/// Decodes CSV bytes into a headerless table. Ragged rows are allowed.
pub fn decode_csv(bytes: &[u8]) -> Result<RawTable> {
    let text = decode_text(bytes);
    let delimiter = sniff_delimiter(&text);
    debug!("CSV delimiter: '{}'", delimiter as char);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| ExtractError::parse("csv", e))?;
        // The reader skips blank lines; use the record's own line.
        let line = record
            .position()
            .map(|p| p.line().saturating_sub(1) as usize)
            .unwrap_or(idx);
        rows.push((line, record.iter().map(Cell::from).collect::<Vec<_>>()));
    }
    Ok(RawTable::from_indexed_rows(rows))
}

// ============================================================================
// JSON
// ============================================================================

pub fn parse_json(bytes: &[u8]) -> Result<Value> {
    let text = decode_text(bytes);
    serde_json::from_str(&text).map_err(|e| ExtractError::parse("json", e))
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Validates and extracts an in-memory upload.
pub fn extract_bytes(
    filename: &str,
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome> {
    let kind = validate_upload(filename, bytes.len() as u64)?;
    info!("Extracting '{}' as {} ({} bytes)", filename, kind.as_str(), bytes.len());

    let outcome = match kind {
        SourceKind::Json => extract_json(&parse_json(bytes)?, config),
        SourceKind::Csv => {
            let name = Path::new(filename)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(filename)
                .to_string();
            let table = decode_csv(bytes)?;
            extract_tables(kind, &[NamedTable { name, table }], config)
        }
        SourceKind::Workbook => extract_tables(kind, &load_workbook(bytes)?, config),
    };
    Ok(outcome)
}

/// Reads and extracts a file from disk. The size limit is checked before the
/// file is read.
pub fn extract_file(path: &Path, config: &ExtractionConfig) -> Result<ExtractionOutcome> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    validate_upload(filename, std::fs::metadata(path)?.len())?;
    let bytes = std::fs::read(path)?;
    extract_bytes(filename, &bytes, config)
}
