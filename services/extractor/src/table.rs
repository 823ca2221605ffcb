//! In-memory tabular input and flat label/value maps.

use indexmap::IndexMap;
use serde::ser::{Serialize, Serializer};

/// Tokens treated as "no value" wherever a cell or raw value is inspected.
/// Compared case-insensitively after trimming.
pub const PLACEHOLDER_TOKENS: &[&str] = &["", "nan", "none", "null"];

/// Returns true if the value carries no data (blank or a placeholder token).
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    PLACEHOLDER_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    /// Trimmed textual form, or None for blank cells.
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            Cell::Empty => return None,
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Trimmed textual form, or None for blank and placeholder cells.
    pub fn value(&self) -> Option<String> {
        self.as_text().filter(|text| !is_placeholder(text))
    }

    pub fn is_blank(&self) -> bool {
        self.as_text().is_none()
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }
}

/// Rows x columns of cells with no header semantics.
///
/// Rows where every cell is blank are dropped on construction; a sheet's
/// visual spacing rows carry no data for either extraction strategy. Each kept
/// row remembers its index in the source sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    rows: Vec<Vec<Cell>>,
    source_rows: Vec<usize>,
    width: usize,
}

impl RawTable {
    /// Builds a table whose rows sit at indices 0.. in the source.
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self::from_indexed_rows(rows.into_iter().enumerate())
    }

    /// Builds a table from (source row index, cells) pairs.
    pub fn from_indexed_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (usize, Vec<Cell>)>,
    {
        let (source_rows, rows): (Vec<usize>, Vec<Vec<Cell>>) = rows
            .into_iter()
            .filter(|(_, row)| row.iter().any(|cell| !cell.is_blank()))
            .unzip();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            rows,
            source_rows,
            width,
        }
    }

    /// Builds a table from plain strings; blank strings become empty cells.
    pub fn from_text_rows<I, R, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            rows.into_iter()
                .map(|row| row.into_iter().map(|s| Cell::from(s.as_ref())).collect())
                .collect(),
        )
    }

    /// Number of columns (widest row).
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of non-blank rows.
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at (row, col); ragged rows read as empty past their end.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Index in the source sheet of table row `row`.
    pub fn source_row(&self, row: usize) -> usize {
        self.source_rows.get(row).copied().unwrap_or(row)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn column(&self, col: usize) -> impl Iterator<Item = &Cell> + '_ {
        (0..self.rows.len()).map(move |row| self.cell(row, col))
    }
}

/// Ordered raw label -> raw value pairs for one candidate record.
///
/// Labels are unique; inserting an existing label replaces the value in place.
/// Equality compares entries in order.
#[derive(Debug, Clone, Default)]
pub struct RawFieldMap {
    entries: IndexMap<String, String>,
}

impl RawFieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(label.into(), value.into());
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }
}

impl PartialEq for RawFieldMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.iter().eq(other.iter())
    }
}

impl Eq for RawFieldMap {}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawFieldMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = RawFieldMap::new();
        for (label, value) in iter {
            map.insert(label, value);
        }
        map
    }
}

impl Serialize for RawFieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}
