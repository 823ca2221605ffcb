//! PostgreSQL persistence for extracted endorsements.
//!
//! Writes into an existing `endorsements` table:
//!
//! ```sql
//! id BIGSERIAL PRIMARY KEY, policy_number TEXT NOT NULL,
//! endorsement_type TEXT NOT NULL, endorsement_version TEXT,
//! endorsement_validity TEXT, concepto_id TEXT,
//! status TEXT NOT NULL DEFAULT 'In Review', json_data JSONB NOT NULL,
//! original_filename TEXT, file_path TEXT, uploaded_by TEXT,
//! file_group_id UUID, combination_number INT, combination_id TEXT,
//! total_combinations INT, created_at TIMESTAMPTZ DEFAULT now(),
//! updated_at TIMESTAMPTZ DEFAULT now(), updated_by TEXT
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::pipeline::{ExtractionOutcome, NormalizedRecord};
use crate::source::SourceKind;

pub const UNKNOWN_POLICY: &str = "unknown";
pub const EXCEL_UPLOAD_TYPE: &str = "EXCEL_UPLOAD";
pub const JSON_UPLOAD_TYPE: &str = "JSON_UPLOAD";

/// Review state of a stored endorsement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum EndorsementStatus {
    Approved,
    Rejected,
    #[default]
    #[serde(rename = "In Review")]
    InReview,
}

impl EndorsementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndorsementStatus::Approved => "Approved",
            EndorsementStatus::Rejected => "Rejected",
            EndorsementStatus::InReview => "In Review",
        }
    }
}

impl fmt::Display for EndorsementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndorsementStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "approved" => Ok(EndorsementStatus::Approved),
            "rejected" => Ok(EndorsementStatus::Rejected),
            "in review" | "in_review" => Ok(EndorsementStatus::InReview),
            other => bail!(
                "Invalid status '{}'. Expected Approved, Rejected or In Review",
                other
            ),
        }
    }
}

/// Where an upload came from and who sent it.
#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub original_filename: String,
    pub file_path: Option<String>,
    pub uploaded_by: String,
}

/// A row ready for insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEndorsement {
    pub policy_number: String,
    pub endorsement_type: String,
    pub endorsement_version: Option<String>,
    pub endorsement_validity: Option<String>,
    pub concepto_id: Option<String>,
    pub status: EndorsementStatus,
    pub json_data: serde_json::Value,
    pub original_filename: String,
    pub file_path: Option<String>,
    pub uploaded_by: String,
    pub file_group_id: Uuid,
    pub combination_number: i32,
    pub combination_id: String,
    pub total_combinations: i32,
}

/// Endorsement as read back from the database.
#[derive(Debug, sqlx::FromRow)]
pub struct Endorsement {
    pub id: i64,
    pub policy_number: String,
    pub endorsement_type: String,
    pub endorsement_version: Option<String>,
    pub endorsement_validity: Option<String>,
    pub concepto_id: Option<String>,
    pub status: String,
    pub json_data: serde_json::Value,
    pub original_filename: Option<String>,
    pub file_path: Option<String>,
    pub uploaded_by: Option<String>,
    pub file_group_id: Option<Uuid>,
    pub combination_number: Option<i32>,
    pub combination_id: Option<String>,
    pub total_combinations: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

/// Builds the insertable row for one record. Missing policy number and type
/// fall back to placeholders since both columns are NOT NULL.
pub fn build_endorsement(
    record: &NormalizedRecord,
    file_kind: SourceKind,
    upload: &UploadInfo,
    file_group_id: Uuid,
) -> Result<NewEndorsement> {
    let core = record.core();
    let type_fallback = match file_kind {
        SourceKind::Json => JSON_UPLOAD_TYPE,
        SourceKind::Workbook | SourceKind::Csv => EXCEL_UPLOAD_TYPE,
    };

    Ok(NewEndorsement {
        policy_number: core
            .policy_number
            .clone()
            .unwrap_or_else(|| UNKNOWN_POLICY.to_string()),
        endorsement_type: core
            .endorsement_type
            .clone()
            .unwrap_or_else(|| type_fallback.to_string()),
        endorsement_version: core.endorsement_version.clone(),
        endorsement_validity: core.endorsement_validity.clone(),
        concepto_id: core.concepto_id.clone(),
        status: EndorsementStatus::InReview,
        json_data: serde_json::to_value(record.raw_fields())
            .context("Failed to serialize raw fields")?,
        original_filename: upload.original_filename.clone(),
        file_path: upload.file_path.clone(),
        uploaded_by: upload.uploaded_by.clone(),
        file_group_id,
        combination_number: i32::try_from(record.combination_number)
            .context("combination_number out of range")?,
        combination_id: record.combination_id.clone(),
        total_combinations: i32::try_from(record.total_combinations)
            .context("total_combinations out of range")?,
    })
}

const SELECT_ENDORSEMENT: &str = r#"
    SELECT id, policy_number, endorsement_type, endorsement_version, endorsement_validity,
           concepto_id, status, json_data, original_filename, file_path, uploaded_by,
           file_group_id, combination_number, combination_id, total_combinations,
           created_at, updated_at, updated_by
    FROM endorsements
"#;

/// Inserts one endorsement, returning its id. Accepts a pool or an open
/// transaction.
pub async fn insert_endorsement<'e, E>(executor: E, row: &NewEndorsement) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO endorsements
            (policy_number, endorsement_type, endorsement_version, endorsement_validity,
             concepto_id, status, json_data, original_filename, file_path, uploaded_by,
             file_group_id, combination_number, combination_id, total_combinations)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING id
        "#,
    )
    .bind(&row.policy_number)
    .bind(&row.endorsement_type)
    .bind(&row.endorsement_version)
    .bind(&row.endorsement_validity)
    .bind(&row.concepto_id)
    .bind(row.status.as_str())
    .bind(&row.json_data)
    .bind(&row.original_filename)
    .bind(&row.file_path)
    .bind(&row.uploaded_by)
    .bind(row.file_group_id)
    .bind(row.combination_number)
    .bind(&row.combination_id)
    .bind(row.total_combinations)
    .fetch_one(executor)
    .await
    .context("Failed to insert endorsement")?;

    debug!(
        "Inserted endorsement {} ({} {}/{})",
        id, row.combination_id, row.combination_number, row.total_combinations
    );
    Ok(id)
}

pub async fn fetch_endorsement(pool: &PgPool, id: i64) -> Result<Option<Endorsement>> {
    let sql = format!("{} WHERE id = $1", SELECT_ENDORSEMENT);
    let endorsement = sqlx::query_as::<_, Endorsement>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch endorsement")?;
    Ok(endorsement)
}

/// Every combination stored from one upload, in combination order.
pub async fn fetch_group(pool: &PgPool, file_group_id: Uuid) -> Result<Vec<Endorsement>> {
    let sql = format!(
        "{} WHERE file_group_id = $1 ORDER BY combination_number, id",
        SELECT_ENDORSEMENT
    );
    let endorsements = sqlx::query_as::<_, Endorsement>(&sql)
        .bind(file_group_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch endorsement group")?;
    Ok(endorsements)
}

/// Deletes every combination of one upload. Returns the number of rows removed.
pub async fn delete_group(pool: &PgPool, file_group_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM endorsements WHERE file_group_id = $1")
        .bind(file_group_id)
        .execute(pool)
        .await
        .context("Failed to delete endorsement group")?;
    info!(
        "Deleted {} endorsements of group {}",
        result.rows_affected(),
        file_group_id
    );
    Ok(result.rows_affected())
}

/// Sets the review status. Returns false if no endorsement has that id.
pub async fn update_endorsement_status(
    pool: &PgPool,
    id: i64,
    status: EndorsementStatus,
    updated_by: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE endorsements SET status = $1, updated_at = now(), updated_by = $2 WHERE id = $3",
    )
    .bind(status.as_str())
    .bind(updated_by)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update endorsement status")?;
    Ok(result.rows_affected() > 0)
}

/// Ids created for one upload.
#[derive(Debug, Clone, Serialize)]
pub struct PersistSummary {
    pub file_group_id: Uuid,
    pub endorsement_ids: Vec<i64>,
}

/// Stores every record of an outcome under a fresh file group id. The group is
/// written in one transaction: either every combination is stored or none is.
pub async fn persist_outcome(
    pool: &PgPool,
    outcome: &ExtractionOutcome,
    upload: &UploadInfo,
) -> Result<PersistSummary> {
    let file_group_id = Uuid::new_v4();
    let rows = outcome
        .records
        .iter()
        .map(|record| build_endorsement(record, outcome.file_kind, upload, file_group_id))
        .collect::<Result<Vec<_>>>()?;

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let mut endorsement_ids = Vec::with_capacity(rows.len());
    for row in &rows {
        endorsement_ids.push(insert_endorsement(&mut *tx, row).await?);
    }
    tx.commit().await.context("Failed to commit endorsements")?;

    info!(
        "Stored {} endorsements from '{}' (group {})",
        endorsement_ids.len(),
        upload.original_filename,
        file_group_id
    );
    Ok(PersistSummary {
        file_group_id,
        endorsement_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{extract_json, ExtractionConfig};
    use serde_json::json;

    fn upload() -> UploadInfo {
        UploadInfo {
            original_filename: "endosos.json".to_string(),
            file_path: Some("uploads/endosos.json".to_string()),
            uploaded_by: "admin".to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // STATUS
    // -------------------------------------------------------------------------

    #[test]
    fn test_status_round_trip_and_default() {
        assert_eq!(EndorsementStatus::default(), EndorsementStatus::InReview);
        assert_eq!(EndorsementStatus::InReview.to_string(), "In Review");
        assert_eq!(
            "approved".parse::<EndorsementStatus>().unwrap(),
            EndorsementStatus::Approved
        );
        assert_eq!(
            " In Review ".parse::<EndorsementStatus>().unwrap(),
            EndorsementStatus::InReview
        );
        assert!("pending".parse::<EndorsementStatus>().is_err());
    }

    // -------------------------------------------------------------------------
    // ROW BUILDING
    // -------------------------------------------------------------------------

    #[test]
    fn test_build_endorsement_copies_core_fields() {
        let doc = json!([
            {"Número de póliza": "POL-1618805-A", "Tipo de endoso": "Maternidad", "Vigencia": "2024"}
        ]);
        let outcome = extract_json(&doc, &ExtractionConfig::default());
        let group = Uuid::new_v4();
        let row = build_endorsement(&outcome.records[0], outcome.file_kind, &upload(), group)
            .unwrap();

        assert_eq!(row.policy_number, "1618805");
        assert_eq!(row.endorsement_type, "Maternidad");
        assert_eq!(row.endorsement_validity.as_deref(), Some("2024"));
        assert_eq!(row.endorsement_version, None);
        assert_eq!(row.status, EndorsementStatus::InReview);
        assert_eq!(row.file_group_id, group);
        assert_eq!(row.combination_id, "json_combo_1");
        assert_eq!(row.total_combinations, 1);
        assert_eq!(row.json_data["Número de póliza"], "POL-1618805-A");
        assert_eq!(row.uploaded_by, "admin");
    }

    #[test]
    fn test_build_endorsement_fallbacks() {
        let doc = json!({"prima": 1, "moneda": "MXN", "suma": 3, "deducible": 4, "plazo": 5});
        let outcome = extract_json(&doc, &ExtractionConfig::default());
        let record = &outcome.records[0];

        let row = build_endorsement(record, SourceKind::Json, &upload(), Uuid::nil()).unwrap();
        assert_eq!(row.policy_number, UNKNOWN_POLICY);
        assert_eq!(row.endorsement_type, JSON_UPLOAD_TYPE);

        let row = build_endorsement(record, SourceKind::Workbook, &upload(), Uuid::nil()).unwrap();
        assert_eq!(row.endorsement_type, EXCEL_UPLOAD_TYPE);
        let row = build_endorsement(record, SourceKind::Csv, &upload(), Uuid::nil()).unwrap();
        assert_eq!(row.endorsement_type, EXCEL_UPLOAD_TYPE);
    }

    // -------------------------------------------------------------------------
    // DATABASE (needs DB_URL pointing at a database with the endorsements table)
    // -------------------------------------------------------------------------

    async fn test_pool() -> PgPool {
        dotenvy::dotenv().ok();
        let db_url = std::env::var("DB_URL").expect("DB_URL must be set");
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&db_url)
            .await
            .expect("database connection")
    }

    fn two_record_outcome() -> ExtractionOutcome {
        let doc = json!([
            {"Número de póliza": "1618805", "Tipo de endoso": "Maternidad"},
            {"Número de póliza": "1618806", "Tipo de endoso": "Natalidad"}
        ]);
        extract_json(&doc, &ExtractionConfig::default())
    }

    fn unique_upload() -> UploadInfo {
        UploadInfo {
            original_filename: format!("{}.json", Uuid::new_v4()),
            file_path: None,
            uploaded_by: "admin".to_string(),
        }
    }

    #[tokio::test]
    #[ignore = "requires DB_URL"]
    async fn test_persist_group_fetch_and_delete() {
        let pool = test_pool().await;
        let summary = persist_outcome(&pool, &two_record_outcome(), &unique_upload())
            .await
            .unwrap();
        assert_eq!(summary.endorsement_ids.len(), 2);

        let group = fetch_group(&pool, summary.file_group_id).await.unwrap();
        let numbers: Vec<Option<i32>> = group.iter().map(|e| e.combination_number).collect();
        assert_eq!(numbers, vec![Some(1), Some(2)]);
        assert!(group.iter().all(|e| e.total_combinations == Some(2)));
        assert!(group.iter().all(|e| e.status == "In Review"));

        let updated =
            update_endorsement_status(&pool, group[0].id, EndorsementStatus::Approved, "admin")
                .await
                .unwrap();
        assert!(updated);
        let approved = fetch_endorsement(&pool, group[0].id).await.unwrap().unwrap();
        assert_eq!(approved.status, "Approved");
        assert_eq!(approved.updated_by.as_deref(), Some("admin"));

        assert_eq!(delete_group(&pool, summary.file_group_id).await.unwrap(), 2);
        assert!(fetch_group(&pool, summary.file_group_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires DB_URL"]
    async fn test_failed_insert_leaves_no_partial_group() {
        let pool = test_pool().await;
        let mut outcome = two_record_outcome();
        // Postgres rejects NUL bytes in text columns, so the second insert fails.
        outcome.records[1].normalized.core_fields.policy_number =
            Some("16\u{0}18806".to_string());
        let upload = unique_upload();

        assert!(persist_outcome(&pool, &outcome, &upload).await.is_err());

        let (stored,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM endorsements WHERE original_filename = $1")
                .bind(&upload.original_filename)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored, 0);
    }
}
