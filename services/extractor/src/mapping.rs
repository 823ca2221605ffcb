//! Field mapping table: raw label variants -> canonical field names.
//!
//! Variants are kept as an ordered list. Exact lookups go through an index;
//! the substring fallback walks the list in declaration order and the first
//! hit wins, so more specific variants must be declared before generic ones.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{ExtractError, Result};

pub const POLICY_NUMBER: &str = "policy_number";
pub const ENDORSEMENT_TYPE: &str = "endorsement_type";
pub const ENDORSEMENT_VERSION: &str = "endorsement_version";
pub const ENDORSEMENT_VALIDITY: &str = "endorsement_validity";
pub const CONCEPTO_ID: &str = "concepto_id";

/// The canonical fields every record tries to resolve.
pub const CORE_FIELDS: [&str; 5] = [
    POLICY_NUMBER,
    ENDORSEMENT_TYPE,
    ENDORSEMENT_VERSION,
    ENDORSEMENT_VALIDITY,
    CONCEPTO_ID,
];

pub fn is_core_field(canonical: &str) -> bool {
    CORE_FIELDS.contains(&canonical)
}

/// How a field's value is cleaned and displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Text,
    /// Reduced to its first digit run.
    Identifier,
    Number,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub label: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default = "default_group")]
    pub group: String,
}

fn default_group() -> String {
    "other".to_string()
}

impl FieldDescriptor {
    fn new(label: &str, value_type: ValueType, group: &str) -> Self {
        Self {
            label: label.to_string(),
            value_type,
            group: group.to_string(),
        }
    }
}

/// Default Spanish/English vocabulary, most specific variants first.
const DEFAULT_VARIANTS: &[(&str, &str)] = &[
    // Policy number
    ("número de póliza", POLICY_NUMBER),
    ("numero de poliza", POLICY_NUMBER),
    ("numero de póliza", POLICY_NUMBER),
    ("número de poliza", POLICY_NUMBER),
    ("no. de póliza", POLICY_NUMBER),
    ("no. de poliza", POLICY_NUMBER),
    ("policy_number", POLICY_NUMBER),
    ("policy number", POLICY_NUMBER),
    // Endorsement type
    ("nombre del endoso", ENDORSEMENT_TYPE),
    ("tipo de endoso", ENDORSEMENT_TYPE),
    ("endorsement_type", ENDORSEMENT_TYPE),
    ("endorsement type", ENDORSEMENT_TYPE),
    // Version
    ("versión del endoso inicial", ENDORSEMENT_VERSION),
    ("version del endoso inicial", ENDORSEMENT_VERSION),
    ("versión del endoso", ENDORSEMENT_VERSION),
    ("version del endoso", ENDORSEMENT_VERSION),
    ("endorsement_version", ENDORSEMENT_VERSION),
    ("endorsement version", ENDORSEMENT_VERSION),
    // Validity
    ("vigencia del endoso", ENDORSEMENT_VALIDITY),
    ("fecha de vigencia", ENDORSEMENT_VALIDITY),
    ("endorsement_validity", ENDORSEMENT_VALIDITY),
    ("endorsement validity", ENDORSEMENT_VALIDITY),
    ("vigencia", ENDORSEMENT_VALIDITY),
    ("validity", ENDORSEMENT_VALIDITY),
    // Concept id
    ("id del concepto", CONCEPTO_ID),
    ("id de concepto", CONCEPTO_ID),
    ("concepto_id", CONCEPTO_ID),
    ("concepto id", CONCEPTO_ID),
    ("concept id", CONCEPTO_ID),
    ("concepto", CONCEPTO_ID),
    // Generic single words last
    ("póliza", POLICY_NUMBER),
    ("poliza", POLICY_NUMBER),
    ("policy", POLICY_NUMBER),
    ("versión", ENDORSEMENT_VERSION),
    ("version", ENDORSEMENT_VERSION),
    ("endoso", ENDORSEMENT_TYPE),
    ("endorsement", ENDORSEMENT_TYPE),
    // Non-core descriptive fields
    ("ramo", "branch"),
    ("branch", "branch"),
    ("producto", "product"),
    ("product", "product"),
];

fn default_fields() -> BTreeMap<String, FieldDescriptor> {
    [
        (POLICY_NUMBER, FieldDescriptor::new("Número de Póliza", ValueType::Identifier, "core")),
        (ENDORSEMENT_TYPE, FieldDescriptor::new("Tipo de Endoso", ValueType::Text, "core")),
        (ENDORSEMENT_VERSION, FieldDescriptor::new("Versión del Endoso", ValueType::Text, "core")),
        (ENDORSEMENT_VALIDITY, FieldDescriptor::new("Vigencia del Endoso", ValueType::Date, "core")),
        (CONCEPTO_ID, FieldDescriptor::new("ID del Concepto", ValueType::Text, "core")),
        ("branch", FieldDescriptor::new("Ramo", ValueType::Text, "policy")),
        ("product", FieldDescriptor::new("Producto", ValueType::Text, "policy")),
    ]
    .into_iter()
    .map(|(name, descriptor)| (name.to_string(), descriptor))
    .collect()
}

/// On-disk form of a mapping table.
#[derive(Debug, Deserialize)]
struct MappingFile {
    variants: Vec<(String, String)>,
    #[serde(default)]
    fields: BTreeMap<String, FieldDescriptor>,
}

/// Immutable label vocabulary shared by every extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMappingTable {
    variants: Vec<(String, String)>,
    exact: HashMap<String, usize>,
    fields: BTreeMap<String, FieldDescriptor>,
}

impl Default for FieldMappingTable {
    fn default() -> Self {
        Self::build(
            DEFAULT_VARIANTS
                .iter()
                .map(|(variant, canonical)| (variant.to_string(), canonical.to_string()))
                .collect(),
            default_fields(),
        )
    }
}

impl FieldMappingTable {
    /// Builds a table from ordered (variant, canonical) pairs.
    ///
    /// Variants are trimmed and lowercased. Empty variants are rejected since
    /// they would substring-match every label.
    pub fn new(
        variants: Vec<(String, String)>,
        fields: BTreeMap<String, FieldDescriptor>,
    ) -> Result<Self> {
        let mut normalized = Vec::with_capacity(variants.len());
        for (variant, canonical) in variants {
            let variant = variant.trim().to_lowercase();
            let canonical = canonical.trim().to_string();
            if variant.is_empty() {
                return Err(ExtractError::Config(format!(
                    "empty label variant for canonical field '{}'",
                    canonical
                )));
            }
            if canonical.is_empty() {
                return Err(ExtractError::Config(format!(
                    "variant '{}' maps to an empty canonical name",
                    variant
                )));
            }
            normalized.push((variant, canonical));
        }
        Ok(Self::build(normalized, fields))
    }

    fn build(variants: Vec<(String, String)>, fields: BTreeMap<String, FieldDescriptor>) -> Self {
        let mut exact = HashMap::with_capacity(variants.len());
        for (idx, (variant, _)) in variants.iter().enumerate() {
            exact.entry(variant.clone()).or_insert(idx);
        }
        Self {
            variants,
            exact,
            fields,
        }
    }

    /// Parses a JSON mapping document. Core field descriptors missing from the
    /// document are filled from the defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: MappingFile = serde_json::from_str(json)
            .map_err(|e| ExtractError::Config(format!("invalid mapping table: {}", e)))?;
        let mut fields = file.fields;
        for (name, descriptor) in default_fields() {
            if is_core_field(&name) {
                fields.entry(name).or_insert(descriptor);
            }
        }
        Self::new(file.variants, fields)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Exact lookup of an already lowercased, trimmed label.
    pub fn exact_match(&self, label: &str) -> Option<&str> {
        self.exact
            .get(label)
            .map(|&idx| self.variants[idx].1.as_str())
    }

    /// First variant, in declaration order, that contains the label or is
    /// contained in it. Returns (variant, canonical).
    pub fn substring_match(&self, label: &str) -> Option<(&str, &str)> {
        if label.is_empty() {
            return None;
        }
        self.variants
            .iter()
            .find(|(variant, _)| label.contains(variant.as_str()) || variant.contains(label))
            .map(|(variant, canonical)| (variant.as_str(), canonical.as_str()))
    }

    pub fn descriptor(&self, canonical: &str) -> Option<&FieldDescriptor> {
        self.fields.get(canonical)
    }

    /// Cleaning type for a canonical field. `policy_number` is always an
    /// identifier, whatever its descriptor says.
    pub fn value_type(&self, canonical: &str) -> ValueType {
        if canonical == POLICY_NUMBER {
            return ValueType::Identifier;
        }
        self.descriptor(canonical)
            .map(|d| d.value_type)
            .unwrap_or_default()
    }

    pub fn variants(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variants.iter().map(|(v, c)| (v.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}
