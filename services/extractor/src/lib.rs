//! Endorsement extraction.
//!
//! Turns loosely formatted workbooks, CSV files and JSON payloads describing
//! insurance policy endorsements into normalized records:
//!
//! - [`detect`] classifies a sheet as a label-value matrix or row-per-record
//! - [`extract`] reads raw label/value maps from a classified sheet
//! - [`flatten`] does the same for nested JSON objects
//! - [`normalize`] resolves raw labels to canonical fields via [`mapping`]
//! - [`pipeline`] composes the above and applies the record thresholds
//! - [`source`] validates uploads and decodes files
//! - [`store`] persists records to PostgreSQL

pub mod clean;
pub mod detect;
pub mod error;
pub mod extract;
pub mod flatten;
pub mod mapping;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod table;

pub use error::{ExtractError, Result};
pub use mapping::FieldMappingTable;
pub use pipeline::{ExtractionConfig, ExtractionOutcome, NormalizedRecord};
pub use source::{extract_bytes, extract_file, SourceKind};
