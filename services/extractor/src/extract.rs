//! Turns a classified table into raw label/value maps.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detect::StructureClassification;
use crate::table::{RawFieldMap, RawTable};

/// One column of a label-value matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    /// 1-based position among qualifying columns.
    pub number: usize,
    pub column: usize,
    pub fields: RawFieldMap,
}

/// One row of a row-per-record table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFields {
    /// Row index in the source sheet, counting dropped blank rows.
    pub row: usize,
    pub fields: RawFieldMap,
}

/// Where row-per-record labels come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    /// The first row holds column labels.
    #[default]
    FirstRow,
    /// No header row; columns are labelled `col_{index}`.
    Synthetic,
}

fn synthetic_label(col: usize) -> String {
    format!("col_{}", col)
}

/// Reads one raw field map per combination column.
///
/// Rows with a blank label are visual spacers and contribute nothing. Returns
/// an empty list for anything but a matrix classification.
pub fn extract_combinations(
    table: &RawTable,
    classification: &StructureClassification,
) -> Vec<Combination> {
    let StructureClassification::LabelValueMatrix {
        label_column,
        combination_columns,
        ..
    } = classification
    else {
        return Vec::new();
    };

    let labels: Vec<(usize, String)> = table
        .column(*label_column)
        .enumerate()
        .filter_map(|(row, cell)| cell.as_text().map(|label| (row, label)))
        .collect();
    debug!("Found {} field labels in column {}", labels.len(), label_column);

    combination_columns
        .iter()
        .enumerate()
        .map(|(idx, &column)| {
            let fields: RawFieldMap = labels
                .iter()
                .filter_map(|(row, label)| {
                    table
                        .cell(*row, column)
                        .value()
                        .map(|value| (label.clone(), value))
                })
                .collect();
            debug!(
                "Combination {} (column {}): {} field values",
                idx + 1,
                column,
                fields.len()
            );
            Combination {
                number: idx + 1,
                column,
                fields,
            }
        })
        .collect()
}

/// Reads one raw field map per data row; empty rows are dropped.
pub fn extract_rows(table: &RawTable, header_mode: HeaderMode) -> Vec<RowFields> {
    let (headers, first_data_row): (Vec<String>, usize) = match header_mode {
        HeaderMode::FirstRow => {
            let mut headers: Vec<String> = Vec::with_capacity(table.width());
            for col in 0..table.width() {
                let label = table
                    .cell(0, col)
                    .as_text()
                    .unwrap_or_else(|| synthetic_label(col));
                let label = if headers.contains(&label) {
                    format!("{}_{}", label, col)
                } else {
                    label
                };
                headers.push(label);
            }
            (headers, 1)
        }
        HeaderMode::Synthetic => ((0..table.width()).map(synthetic_label).collect(), 0),
    };

    table
        .rows()
        .enumerate()
        .skip(first_data_row)
        .filter_map(|(row, cells)| {
            let fields: RawFieldMap = cells
                .iter()
                .zip(headers.iter())
                .filter_map(|(cell, header)| cell.value().map(|value| (header.clone(), value)))
                .collect();
            if fields.is_empty() {
                None
            } else {
                Some(RowFields {
                    row: table.source_row(row),
                    fields,
                })
            }
        })
        .collect()
}
