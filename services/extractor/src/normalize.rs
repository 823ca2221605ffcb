//! Field normalizer: resolves raw labels to canonical fields.

use serde::Serialize;
use tracing::debug;

use crate::clean::{clean_value, slugify};
use crate::mapping::{
    is_core_field, FieldMappingTable, CONCEPTO_ID, ENDORSEMENT_TYPE, ENDORSEMENT_VALIDITY,
    ENDORSEMENT_VERSION, POLICY_NUMBER,
};
use crate::table::RawFieldMap;

/// How a raw label was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Substring,
    /// Not in the mapping table; canonical name is a slug of the label.
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedField {
    pub raw_label: String,
    pub canonical: String,
    pub value: Option<String>,
    pub matched: MatchKind,
    pub core: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreFields {
    pub policy_number: Option<String>,
    pub endorsement_type: Option<String>,
    pub endorsement_version: Option<String>,
    pub endorsement_validity: Option<String>,
    pub concepto_id: Option<String>,
}

impl CoreFields {
    fn slot_mut(&mut self, canonical: &str) -> Option<&mut Option<String>> {
        match canonical {
            POLICY_NUMBER => Some(&mut self.policy_number),
            ENDORSEMENT_TYPE => Some(&mut self.endorsement_type),
            ENDORSEMENT_VERSION => Some(&mut self.endorsement_version),
            ENDORSEMENT_VALIDITY => Some(&mut self.endorsement_validity),
            CONCEPTO_ID => Some(&mut self.concepto_id),
            _ => None,
        }
    }

    pub fn get(&self, canonical: &str) -> Option<&str> {
        match canonical {
            POLICY_NUMBER => self.policy_number.as_deref(),
            ENDORSEMENT_TYPE => self.endorsement_type.as_deref(),
            ENDORSEMENT_VERSION => self.endorsement_version.as_deref(),
            ENDORSEMENT_VALIDITY => self.endorsement_validity.as_deref(),
            CONCEPTO_ID => self.concepto_id.as_deref(),
            _ => None,
        }
    }

    /// Number of resolved (non-null) core fields.
    pub fn resolved(&self) -> usize {
        [
            &self.policy_number,
            &self.endorsement_type,
            &self.endorsement_version,
            &self.endorsement_validity,
            &self.concepto_id,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved() == 0
    }
}

/// Normalizer output for one raw field map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedFields {
    pub core_fields: CoreFields,
    pub fields: Vec<NormalizedField>,
    pub raw_fields: RawFieldMap,
}

/// Canonical name for an unmatched label. Labels with no alphanumeric content
/// ("#", "¿?") fall back to their position.
fn other_field_name(label: &str, position: usize) -> String {
    let slug = slugify(label);
    if slug.is_empty() {
        format!("col_{}", position)
    } else {
        slug
    }
}

fn resolve_label(label: &str, position: usize, table: &FieldMappingTable) -> (String, MatchKind) {
    let key = label.trim().to_lowercase();
    if let Some(canonical) = table.exact_match(&key) {
        return (canonical.to_string(), MatchKind::Exact);
    }
    if let Some((variant, canonical)) = table.substring_match(&key) {
        debug!("Label '{}' matched variant '{}' -> {}", label, variant, canonical);
        return (canonical.to_string(), MatchKind::Substring);
    }
    (other_field_name(label, position), MatchKind::Unmatched)
}

/// Maps every raw label to a canonical field and fills the core fields.
///
/// Exact matches take precedence over substring matches. Within the same match
/// kind the first label (in map order) with a non-null value wins.
pub fn normalize(raw: &RawFieldMap, table: &FieldMappingTable) -> NormalizedFields {
    let fields: Vec<NormalizedField> = raw
        .iter()
        .enumerate()
        .map(|(position, (label, value))| {
            let (canonical, matched) = resolve_label(label, position, table);
            let value = clean_value(value, table.value_type(&canonical));
            let core = matched != MatchKind::Unmatched && is_core_field(&canonical);
            NormalizedField {
                raw_label: label.to_string(),
                canonical,
                value,
                matched,
                core,
            }
        })
        .collect();

    let mut core_fields = CoreFields::default();
    for kind in [MatchKind::Exact, MatchKind::Substring] {
        for field in fields.iter().filter(|f| f.core && f.matched == kind) {
            let (Some(slot), Some(value)) = (core_fields.slot_mut(&field.canonical), &field.value)
            else {
                continue;
            };
            if slot.is_none() {
                debug!("{} <- '{}' = '{}'", field.canonical, field.raw_label, value);
                *slot = Some(value.clone());
            }
        }
    }

    NormalizedFields {
        core_fields,
        fields,
        raw_fields: raw.clone(),
    }
}
