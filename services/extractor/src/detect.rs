//! Structure detection for sheets with no header semantics.
//!
//! A sheet is either a label-value matrix (one column of field labels, each
//! column to its right holding one complete combination) or a plain
//! row-per-record table. A sheet is only declared a matrix when its label
//! column looks like field labels; anything else falls back to rows.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clean::fold_accents;
use crate::table::RawTable;

/// Tunable detection strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Column expected to hold field labels.
    pub label_column: usize,
    /// Tokens that mark the label column outright.
    pub indicator_tokens: Vec<String>,
    /// Domain terms expected among real field labels.
    pub field_patterns: Vec<String>,
    pub indicator_sample_rows: usize,
    pub pattern_sample_rows: usize,
    /// Distinct field patterns needed to declare a matrix without an indicator.
    pub min_pattern_matches: usize,
    /// First combination column, relative to the label column.
    pub combination_offset: usize,
    /// Non-empty, non-placeholder cells a column needs to count as a combination.
    pub min_cells_per_combination: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::conservative()
    }
}

impl DetectorConfig {
    /// Requires two distinct field patterns; single matches fall back to rows.
    pub fn conservative() -> Self {
        Self {
            label_column: 1,
            indicator_tokens: vec!["campo".into(), "field".into(), "parameter".into()],
            field_patterns: vec![
                "número".into(),
                "nombre".into(),
                "versión".into(),
                "ramo".into(),
                "año".into(),
            ],
            indicator_sample_rows: 10,
            pattern_sample_rows: 15,
            min_pattern_matches: 2,
            combination_offset: 1,
            min_cells_per_combination: 3,
        }
    }

    /// Accepts a single field pattern as evidence of a matrix.
    pub fn lenient() -> Self {
        Self {
            min_pattern_matches: 1,
            ..Self::conservative()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructureClassification {
    LabelValueMatrix {
        label_column: usize,
        combination_columns: Vec<usize>,
        combination_count: usize,
    },
    RowPerRecord,
    Unknown,
}

impl StructureClassification {
    pub fn is_matrix(&self) -> bool {
        matches!(self, Self::LabelValueMatrix { .. })
    }

    pub fn combination_count(&self) -> usize {
        match self {
            Self::LabelValueMatrix {
                combination_count, ..
            } => *combination_count,
            _ => 0,
        }
    }
}

/// Why the label column was (or was not) accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelEvidence {
    Indicator(String),
    Patterns(Vec<String>),
}

fn label_column_evidence(table: &RawTable, config: &DetectorConfig) -> Option<LabelEvidence> {
    let sample_len = config.indicator_sample_rows.max(config.pattern_sample_rows);
    let sampled: Vec<String> = table
        .column(config.label_column)
        .take(sample_len)
        .map(|cell| cell.as_text().map(|t| fold_accents(&t)).unwrap_or_default())
        .collect();

    let contains = |token: &str, rows: usize| {
        let token = fold_accents(token);
        sampled.iter().take(rows).any(|value| value.contains(&token))
    };

    if let Some(indicator) = config
        .indicator_tokens
        .iter()
        .find(|token| contains(token.as_str(), config.indicator_sample_rows))
    {
        return Some(LabelEvidence::Indicator(indicator.clone()));
    }

    let found: Vec<String> = config
        .field_patterns
        .iter()
        .filter(|pattern| contains(pattern.as_str(), config.pattern_sample_rows))
        .cloned()
        .collect();
    debug!("Field patterns found in label column: {:?}", found);

    if !found.is_empty() && found.len() >= config.min_pattern_matches {
        Some(LabelEvidence::Patterns(found))
    } else {
        None
    }
}

/// Columns right of the label column holding enough data to be a combination,
/// in left-to-right order.
fn combination_columns(table: &RawTable, config: &DetectorConfig) -> Vec<usize> {
    let start = config.label_column + config.combination_offset;
    (start..table.width())
        .filter(|&col| {
            let filled = table
                .column(col)
                .filter(|cell| cell.value().is_some())
                .count();
            debug!("Column {}: {} meaningful values", col, filled);
            filled >= config.min_cells_per_combination
        })
        .collect()
}

/// Classifies a sheet. Never fails; unrecognized layouts fall back to
/// `RowPerRecord` and degenerate tables to `Unknown`.
pub fn classify(table: &RawTable, config: &DetectorConfig) -> StructureClassification {
    if table.width() < 2 || table.width() <= config.label_column || table.is_empty() {
        debug!(
            "Table {}x{} too small to inspect label column {}",
            table.height(),
            table.width(),
            config.label_column
        );
        return StructureClassification::Unknown;
    }

    match label_column_evidence(table, config) {
        Some(evidence) => {
            let columns = combination_columns(table, config);
            info!(
                "Label-value matrix detected ({:?}): label column {}, combination columns {:?}",
                evidence, config.label_column, columns
            );
            StructureClassification::LabelValueMatrix {
                label_column: config.label_column,
                combination_count: columns.len(),
                combination_columns: columns,
            }
        }
        None => {
            info!("No field-label column found; treating sheet as row-per-record");
            StructureClassification::RowPerRecord
        }
    }
}
