//! Composes detection, extraction and normalization into records.
//!
//! Both record filters live here: the structural minimum (enough raw fields
//! for a tabular record to be worth normalizing) and the viability rule (at
//! least one core field, or enough raw fields to keep the record anyway).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::detect::{classify, DetectorConfig, StructureClassification};
use crate::extract::{extract_combinations, extract_rows, HeaderMode};
use crate::flatten::flatten_object;
use crate::mapping::FieldMappingTable;
use crate::normalize::{normalize, CoreFields, NormalizedFields};
use crate::source::SourceKind;
use crate::table::{RawFieldMap, RawTable};

/// Record filter thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Raw fields a tabular record (matrix combination or row) needs before
    /// it is normalized at all.
    pub min_fields_per_record: usize,
    /// Raw fields that keep a record with no resolved core field.
    pub matrix_rescue_fields: usize,
    pub row_rescue_fields: usize,
    pub json_rescue_fields: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_fields_per_record: 3,
            matrix_rescue_fields: 5,
            row_rescue_fields: 3,
            json_rescue_fields: 5,
        }
    }
}

impl Thresholds {
    pub fn rescue_fields(&self, method: ExtractionMethod) -> usize {
        match method {
            ExtractionMethod::Matrix => self.matrix_rescue_fields,
            ExtractionMethod::RowBased => self.row_rescue_fields,
            ExtractionMethod::JsonDirect => self.json_rescue_fields,
        }
    }

    /// Structural sufficiency; JSON objects are exempt.
    pub fn is_sufficient(&self, fields: &RawFieldMap, method: ExtractionMethod) -> bool {
        method == ExtractionMethod::JsonDirect || fields.len() >= self.min_fields_per_record
    }

    /// Semantic sufficiency.
    pub fn is_viable(&self, normalized: &NormalizedFields, method: ExtractionMethod) -> bool {
        !normalized.core_fields.is_empty()
            || normalized.raw_fields.len() >= self.rescue_fields(method)
    }
}

/// Everything one extraction call needs. Immutable and cheap to share.
#[derive(Debug, Clone, Default)]
pub struct ExtractionConfig {
    pub detector: DetectorConfig,
    pub thresholds: Thresholds,
    pub header_mode: HeaderMode,
    pub mapping: FieldMappingTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Matrix,
    RowBased,
    JsonDirect,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Matrix => "matrix",
            ExtractionMethod::RowBased => "row_based",
            ExtractionMethod::JsonDirect => "json_direct",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub sheet: Option<String>,
    pub row: Option<usize>,
    pub column: Option<usize>,
}

/// One extracted endorsement combination, ready for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    #[serde(flatten)]
    pub normalized: NormalizedFields,
    /// 1-based.
    pub combination_number: usize,
    pub combination_id: String,
    /// Records emitted from the same source document.
    pub total_combinations: usize,
    pub extraction_method: ExtractionMethod,
    pub source: SourceLocation,
}

impl NormalizedRecord {
    pub fn core(&self) -> &CoreFields {
        &self.normalized.core_fields
    }

    pub fn raw_fields(&self) -> &RawFieldMap {
        &self.normalized.raw_fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetSummary {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    pub structure: StructureClassification,
    pub records: usize,
}

/// A decoded sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTable {
    pub name: String,
    pub table: RawTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub file_kind: SourceKind,
    pub sheets: Vec<SheetSummary>,
    pub records: Vec<NormalizedRecord>,
    pub processed_at: DateTime<Utc>,
}

impl ExtractionOutcome {
    fn new(
        file_kind: SourceKind,
        sheets: Vec<SheetSummary>,
        mut records: Vec<NormalizedRecord>,
    ) -> Self {
        let total = records.len();
        for record in &mut records {
            record.total_combinations = total;
        }
        Self {
            file_kind,
            sheets,
            records,
            processed_at: Utc::now(),
        }
    }
}

/// Applies both filters and normalizes. None means the candidate is dropped.
fn admit(
    fields: RawFieldMap,
    method: ExtractionMethod,
    label: &str,
    config: &ExtractionConfig,
) -> Option<NormalizedFields> {
    let thresholds = &config.thresholds;
    if !thresholds.is_sufficient(&fields, method) {
        debug!(
            "{} dropped: insufficient data ({} fields, need {})",
            label,
            fields.len(),
            thresholds.min_fields_per_record
        );
        return None;
    }
    let normalized = normalize(&fields, &config.mapping);
    if !thresholds.is_viable(&normalized, method) {
        debug!(
            "{} dropped: no core fields and only {} raw fields",
            label,
            normalized.raw_fields.len()
        );
        return None;
    }
    Some(normalized)
}

fn record(
    normalized: NormalizedFields,
    method: ExtractionMethod,
    combination_number: usize,
    combination_id: String,
    source: SourceLocation,
) -> NormalizedRecord {
    NormalizedRecord {
        normalized,
        combination_number,
        combination_id,
        total_combinations: 0,
        extraction_method: method,
        source,
    }
}

/// Classifies one sheet and extracts its records with the matching strategy.
/// `total_combinations` is left at 0; the caller knows the sibling count.
pub fn extract_table(
    name: &str,
    table: &RawTable,
    config: &ExtractionConfig,
) -> (SheetSummary, Vec<NormalizedRecord>) {
    let structure = classify(table, &config.detector);
    let mut records = Vec::new();

    if structure.is_matrix() {
        let method = ExtractionMethod::Matrix;
        for combo in extract_combinations(table, &structure) {
            let label = format!("Combination {} of sheet '{}'", combo.number, name);
            if let Some(normalized) = admit(combo.fields, method, &label, config) {
                records.push(record(
                    normalized,
                    method,
                    combo.number,
                    format!("combo_{}", combo.number),
                    SourceLocation {
                        sheet: Some(name.to_string()),
                        row: None,
                        column: Some(combo.column),
                    },
                ));
            }
        }
    } else {
        let method = ExtractionMethod::RowBased;
        for row in extract_rows(table, config.header_mode) {
            let label = format!("Row {} of sheet '{}'", row.row, name);
            if let Some(normalized) = admit(row.fields, method, &label, config) {
                let number = records.len() + 1;
                records.push(record(
                    normalized,
                    method,
                    number,
                    format!("row_{}", row.row),
                    SourceLocation {
                        sheet: Some(name.to_string()),
                        row: Some(row.row),
                        column: None,
                    },
                ));
            }
        }
    }

    info!(
        "Sheet '{}' ({}x{}) produced {} records",
        name,
        table.height(),
        table.width(),
        records.len()
    );

    let summary = SheetSummary {
        name: name.to_string(),
        rows: table.height(),
        columns: table.width(),
        structure,
        records: records.len(),
    };
    (summary, records)
}

/// Extracts every sheet of a tabular source.
pub fn extract_tables(
    file_kind: SourceKind,
    tables: &[NamedTable],
    config: &ExtractionConfig,
) -> ExtractionOutcome {
    let mut sheets = Vec::with_capacity(tables.len());
    let mut records = Vec::new();
    for named in tables {
        let (summary, sheet_records) = extract_table(&named.name, &named.table, config);
        sheets.push(summary);
        records.extend(sheet_records);
    }
    ExtractionOutcome::new(file_kind, sheets, records)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn object_items(items: &[Value]) -> Vec<(usize, &Map<String, Value>)> {
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| match item {
            Value::Object(map) => Some((idx + 1, map)),
            other => {
                warn!("Skipping non-object item {} ({})", idx + 1, value_kind(other));
                None
            }
        })
        .collect()
}

/// The objects of a JSON document that each describe one combination,
/// numbered by their 1-based position.
fn json_combinations(document: &Value) -> Vec<(usize, &Map<String, Value>)> {
    match document {
        Value::Array(items) => object_items(items),
        Value::Object(map) => match map.get("combinations") {
            Some(Value::Array(items)) => object_items(items),
            _ => vec![(1, map)],
        },
        other => {
            warn!(
                "JSON document is a {}, expected an object or array of objects",
                value_kind(other)
            );
            Vec::new()
        }
    }
}

/// Extracts records from a decoded JSON document, bypassing the detector.
pub fn extract_json(document: &Value, config: &ExtractionConfig) -> ExtractionOutcome {
    let method = ExtractionMethod::JsonDirect;
    let mut records = Vec::new();
    for (number, object) in json_combinations(document) {
        let label = format!("JSON item {}", number);
        if let Some(normalized) = admit(flatten_object(object), method, &label, config) {
            records.push(record(
                normalized,
                method,
                number,
                format!("json_combo_{}", number),
                SourceLocation::default(),
            ));
        }
    }
    info!("JSON document produced {} records", records.len());
    ExtractionOutcome::new(SourceKind::Json, Vec::new(), records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario_table() -> RawTable {
        RawTable::from_text_rows(vec![
            vec!["", "Número de póliza", "1618805", "1618805"],
            vec!["", "Tipo de endoso", "Maternidad", "Natalidad"],
            vec!["", "", "", ""],
            vec!["", "Versión del endoso", "904", "905"],
        ])
    }

    // -------------------------------------------------------------------------
    // MATRIX SHEETS
    // -------------------------------------------------------------------------

    #[test]
    fn test_scenario_two_combinations() {
        let config = ExtractionConfig::default();
        let (summary, records) = extract_table("Endosos", &scenario_table(), &config);

        assert!(summary.structure.is_matrix());
        assert_eq!(records.len(), 2);

        let first = &records[0];
        let second = &records[1];
        assert_eq!(first.core().policy_number.as_deref(), Some("1618805"));
        assert_eq!(second.core().policy_number.as_deref(), Some("1618805"));
        assert_eq!(first.core().endorsement_type.as_deref(), Some("Maternidad"));
        assert_eq!(second.core().endorsement_type.as_deref(), Some("Natalidad"));
        assert_eq!(first.core().endorsement_version.as_deref(), Some("904"));
        assert_eq!(second.core().endorsement_version.as_deref(), Some("905"));
        assert_eq!(first.combination_number, 1);
        assert_eq!(second.combination_number, 2);
        assert_eq!(first.combination_id, "combo_1");
        assert_eq!(first.extraction_method, ExtractionMethod::Matrix);
        assert_eq!(first.raw_fields().len(), 3);
        assert_eq!(first.source.column, Some(2));
    }

    #[test]
    fn test_total_combinations_counts_siblings() {
        let config = ExtractionConfig::default();
        let tables = vec![NamedTable {
            name: "Endosos".into(),
            table: scenario_table(),
        }];
        let outcome = extract_tables(SourceKind::Workbook, &tables, &config);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|r| r.total_combinations == 2));
        assert_eq!(outcome.sheets[0].records, 2);
    }

    #[test]
    fn test_matrix_sparse_columns_produce_no_records() {
        let table = RawTable::from_text_rows(vec![
            vec!["", "Campo", "1618805", ""],
            vec!["", "Número de póliza", "", "Maternidad"],
            vec!["", "Tipo de endoso", "", ""],
        ]);
        let (summary, records) = extract_table("Hoja1", &table, &ExtractionConfig::default());
        assert_eq!(summary.structure.combination_count(), 0);
        assert!(records.is_empty());
    }

    #[test]
    fn test_matrix_structural_minimum_drops_small_combinations() {
        // Column 3 qualifies (3 cells) but one sits on a blank label row.
        let table = RawTable::from_text_rows(vec![
            vec!["", "Campo", "a", "b"],
            vec!["", "Número de póliza", "1", "2"],
            vec!["", "", "x", "y"],
            vec!["", "Tipo de endoso", "Vida", ""],
        ]);
        let (summary, records) = extract_table("Hoja1", &table, &ExtractionConfig::default());
        assert_eq!(summary.structure.combination_count(), 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].combination_number, 1);
    }

    #[test]
    fn test_matrix_rescue_threshold_keeps_unrecognized_vocabulary() {
        let table = RawTable::from_text_rows(vec![
            vec!["", "Campo", "a", "b"],
            vec!["", "Prima", "1", "2"],
            vec!["", "Moneda", "MXN", "USD"],
            vec!["", "Suma", "10", ""],
            vec!["", "Deducible", "5", ""],
        ]);
        let (_, records) = extract_table("Hoja1", &table, &ExtractionConfig::default());
        // Column 2 has 5 raw fields and is rescued; column 3 has 3 and no core field.
        assert_eq!(records.len(), 1);
        assert!(records[0].core().is_empty());
        assert_eq!(records[0].raw_fields().len(), 5);
    }

    // -------------------------------------------------------------------------
    // ROW SHEETS
    // -------------------------------------------------------------------------

    #[test]
    fn test_row_per_record_sheet() {
        let table = RawTable::from_text_rows(vec![
            vec!["Póliza", "Tipo de endoso", "Estado"],
            vec!["POL-1", "Maternidad", "Activo"],
            vec!["POL-2", "Natalidad", "Activo"],
            vec!["", "solo", ""],
        ]);
        let (summary, records) = extract_table("Datos", &table, &ExtractionConfig::default());
        assert_eq!(summary.structure, StructureClassification::RowPerRecord);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].core().policy_number.as_deref(), Some("1"));
        assert_eq!(records[1].core().policy_number.as_deref(), Some("2"));
        assert_eq!(records[0].combination_number, 1);
        assert_eq!(records[1].combination_id, "row_2");
        assert_eq!(records[0].extraction_method, ExtractionMethod::RowBased);
        assert_eq!(records[0].source.row, Some(1));
    }

    #[test]
    fn test_row_ids_point_at_source_rows() {
        let table = RawTable::from_text_rows(vec![
            vec!["Póliza", "Tipo de endoso", "Estado"],
            vec!["", "", ""],
            vec!["", "", ""],
            vec!["POL-1", "Maternidad", "Activo"],
        ]);
        let (_, records) = extract_table("Datos", &table, &ExtractionConfig::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].combination_id, "row_3");
        assert_eq!(records[0].source.row, Some(3));
        assert_eq!(records[0].combination_number, 1);
    }

    #[test]
    fn test_unknown_structure_falls_back_to_rows() {
        let table = RawTable::from_text_rows(vec![vec!["Póliza"], vec!["1618805"]]);
        let (summary, records) = extract_table("Una", &table, &ExtractionConfig::default());
        assert_eq!(summary.structure, StructureClassification::Unknown);
        // One field is below the structural minimum.
        assert!(records.is_empty());
    }

    #[test]
    fn test_ambiguous_sheet_depends_on_strategy() {
        let table = RawTable::from_text_rows(vec![
            vec!["#", "Nombre del endoso", "Maternidad", "Natalidad"],
            vec!["1", "Fecha", "2024-01-01", "2024-02-01"],
            vec!["2", "Estado", "Activo", "Activo"],
        ]);

        let conservative = ExtractionConfig::default();
        let (summary, records) = extract_table("Hoja1", &table, &conservative);
        assert_eq!(summary.structure, StructureClassification::RowPerRecord);
        assert!(records.iter().all(|r| r.extraction_method == ExtractionMethod::RowBased));

        let lenient = ExtractionConfig {
            detector: DetectorConfig::lenient(),
            ..ExtractionConfig::default()
        };
        let (summary, records) = extract_table("Hoja1", &table, &lenient);
        assert!(summary.structure.is_matrix());
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].core().endorsement_type.as_deref(), Some("Natalidad"));
    }

    // -------------------------------------------------------------------------
    // JSON DOCUMENTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_json_array_of_objects() {
        let doc = json!([
            {"Número de póliza": "POL-1618805-A", "Tipo de endoso": "Maternidad"},
            "not an object",
            {"foo": "bar"},
            {"poliza": {"numero": "77"}}
        ]);
        let outcome = extract_json(&doc, &ExtractionConfig::default());
        assert_eq!(outcome.file_kind, SourceKind::Json);
        assert_eq!(outcome.records.len(), 2);

        let first = &outcome.records[0];
        assert_eq!(first.core().policy_number.as_deref(), Some("1618805"));
        assert_eq!(first.combination_number, 1);
        assert_eq!(first.combination_id, "json_combo_1");
        assert_eq!(first.extraction_method, ExtractionMethod::JsonDirect);
        assert_eq!(first.total_combinations, 2);

        let nested = &outcome.records[1];
        assert_eq!(nested.combination_number, 4);
        assert_eq!(nested.raw_fields().get("poliza_numero"), Some("77"));
        assert_eq!(nested.core().policy_number.as_deref(), Some("77"));
    }

    #[test]
    fn test_json_combinations_key() {
        let doc = json!({
            "archivo": "endosos.json",
            "combinations": [
                {"tipo de endoso": "Maternidad"},
                {"tipo de endoso": "Natalidad"}
            ]
        });
        let outcome = extract_json(&doc, &ExtractionConfig::default());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[1].combination_id, "json_combo_2");
    }

    #[test]
    fn test_json_single_object_and_rescue() {
        let doc = json!({"prima": 1, "moneda": "MXN", "suma": 3, "deducible": 4, "plazo": 5});
        let outcome = extract_json(&doc, &ExtractionConfig::default());
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].core().is_empty());

        let doc = json!({"prima": 1, "moneda": "MXN"});
        assert!(extract_json(&doc, &ExtractionConfig::default()).records.is_empty());
    }

    #[test]
    fn test_json_scalar_document_yields_nothing() {
        let outcome = extract_json(&json!("just text"), &ExtractionConfig::default());
        assert!(outcome.records.is_empty());
        let outcome = extract_json(&json!(42), &ExtractionConfig::default());
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_json_null_values_do_not_count_as_core() {
        let doc = json!({"policy_number": null, "endorsement_type": "nan"});
        let outcome = extract_json(&doc, &ExtractionConfig::default());
        assert!(outcome.records.is_empty());
    }

    // -------------------------------------------------------------------------
    // THRESHOLDS
    // -------------------------------------------------------------------------

    #[test]
    fn test_custom_thresholds() {
        let thresholds = Thresholds {
            min_fields_per_record: 1,
            ..Thresholds::default()
        };
        let config = ExtractionConfig {
            thresholds,
            ..ExtractionConfig::default()
        };
        let table = RawTable::from_text_rows(vec![vec!["Póliza"], vec!["1618805"]]);
        let (_, records) = extract_table("Una", &table, &config);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].core().policy_number.as_deref(), Some("1618805"));
    }

    #[test]
    fn test_record_serializes_flat() {
        let (_, records) = extract_table("Endosos", &scenario_table(), &ExtractionConfig::default());
        let value = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(value["core_fields"]["policy_number"], "1618805");
        assert_eq!(value["raw_fields"]["Tipo de endoso"], "Maternidad");
        assert_eq!(value["extraction_method"], "matrix");
        assert_eq!(value["combination_number"], 1);
    }
}
