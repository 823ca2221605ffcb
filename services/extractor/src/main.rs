//! Extractor Service - Turns endorsement uploads into stored records
//!
//! Responsibilities:
//! - Validate and decode one workbook/CSV/JSON file
//! - Detect sheet structure and extract endorsement combinations
//! - Normalize bilingual field labels to canonical fields
//! - Persist records for review (unless --dry-run)
//! - Update the review status of a stored endorsement (--id/--status)
//! - Show or delete every combination of one upload (--group [--delete])

use anyhow::{Context, Result};
use clap::Parser;
use extractor::detect::DetectorConfig;
use extractor::extract::HeaderMode;
use extractor::pipeline::{ExtractionConfig, ExtractionOutcome};
use extractor::store::{self, EndorsementStatus, UploadInfo};
use extractor::{extract_file, FieldMappingTable};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "extractor", about = "Extracts endorsement records from uploaded files")]
struct Args {
    /// File to process (.xlsx, .xls, .xlsb, .ods, .csv, .json)
    #[arg(long, required_unless_present_any = ["id", "group"])]
    file: Option<PathBuf>,

    /// JSON mapping table replacing the built-in label vocabulary
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// User recorded as uploader / reviewer
    #[arg(long, default_value = "system")]
    uploaded_by: String,

    /// Dry run - don't save to database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Accept a single field pattern as evidence of a label-value matrix
    #[arg(long, default_value = "false")]
    lenient: bool,

    /// Header handling for row-per-record sheets
    #[arg(long, value_enum, default_value_t = HeaderMode::FirstRow)]
    header_mode: HeaderMode,

    /// Print the full extraction outcome as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Stored endorsement id to review instead of processing a file
    #[arg(long, requires = "status", conflicts_with = "file")]
    id: Option<i64>,

    /// New review status: Approved, Rejected or "In Review"
    #[arg(long, requires = "id")]
    status: Option<String>,

    /// File group id of a previous upload to show
    #[arg(long, conflicts_with_all = ["file", "id"])]
    group: Option<Uuid>,

    /// Delete every combination of --group
    #[arg(long, default_value = "false", requires = "group")]
    delete: bool,
}

fn build_config(args: &Args) -> Result<ExtractionConfig> {
    let mapping = match &args.mapping {
        Some(path) => FieldMappingTable::load(path)
            .with_context(|| format!("Failed to load mapping table {}", path.display()))?,
        None => FieldMappingTable::default(),
    };
    let detector = if args.lenient {
        DetectorConfig::lenient()
    } else {
        DetectorConfig::conservative()
    };
    Ok(ExtractionConfig {
        detector,
        header_mode: args.header_mode,
        mapping,
        ..ExtractionConfig::default()
    })
}

async fn connect() -> Result<PgPool> {
    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")
}

fn print_summary(outcome: &ExtractionOutcome) {
    println!("Kind: {}", outcome.file_kind.as_str());
    for sheet in &outcome.sheets {
        println!(
            "  Sheet '{}': {} rows x {} columns, {} combinations, {} records",
            sheet.name,
            sheet.rows,
            sheet.columns,
            sheet.structure.combination_count(),
            sheet.records
        );
    }

    println!("\nExtracted {} records", outcome.records.len());
    for record in outcome.records.iter().take(5) {
        let core = record.core();
        println!(
            "  [{}] {} | policy={} | type={} | version={} | {} raw fields",
            record.combination_number,
            record.combination_id,
            core.policy_number.as_deref().unwrap_or("-"),
            core.endorsement_type.as_deref().unwrap_or("-"),
            core.endorsement_version.as_deref().unwrap_or("-"),
            record.raw_fields().len()
        );
    }
    if outcome.records.len() > 5 {
        println!("  ... and {} more", outcome.records.len() - 5);
    }
}

async fn review(id: i64, status: &str, reviewer: &str) -> Result<()> {
    let status: EndorsementStatus = status.parse()?;
    let pool = connect().await?;

    if !store::update_endorsement_status(&pool, id, status, reviewer).await? {
        anyhow::bail!("Endorsement {} not found", id);
    }
    let endorsement = store::fetch_endorsement(&pool, id)
        .await?
        .context("Endorsement disappeared after update")?;
    println!(
        "Endorsement {} ({} / {}) is now '{}'",
        endorsement.id, endorsement.policy_number, endorsement.endorsement_type, endorsement.status
    );
    Ok(())
}

async fn show_group(file_group_id: Uuid, delete: bool) -> Result<()> {
    let pool = connect().await?;
    let group = store::fetch_group(&pool, file_group_id).await?;
    if group.is_empty() {
        anyhow::bail!("File group {} not found", file_group_id);
    }

    println!("File group {}: {} combinations", file_group_id, group.len());
    for endorsement in &group {
        println!(
            "  [{}] id={} policy={} type={} status={} file={}",
            endorsement.combination_number.unwrap_or_default(),
            endorsement.id,
            endorsement.policy_number,
            endorsement.endorsement_type,
            endorsement.status,
            endorsement.original_filename.as_deref().unwrap_or("-")
        );
    }

    if delete {
        let removed = store::delete_group(&pool, file_group_id).await?;
        println!("Deleted {} endorsements", removed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    if let (Some(id), Some(status)) = (args.id, args.status.as_deref()) {
        return review(id, status, &args.uploaded_by).await;
    }
    if let Some(group) = args.group {
        return show_group(group, args.delete).await;
    }

    let file = args.file.as_ref().context("--file is required")?;
    let config = build_config(&args)?;

    println!("=== Endorsement Extractor ===");
    println!("File: {}", file.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });
    println!(
        "Detection: {}",
        if args.lenient { "lenient" } else { "conservative" }
    );

    let outcome = extract_file(file, &config)
        .with_context(|| format!("Failed to extract {}", file.display()))?;

    print_summary(&outcome);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
        );
    }

    if args.dry_run {
        println!("\nDry run - no endorsements saved to database");
        return Ok(());
    }
    if outcome.records.is_empty() {
        println!("\nNo endorsement records found - nothing to save");
        return Ok(());
    }

    let pool = connect().await?;
    let upload = UploadInfo {
        original_filename: file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path: Some(file.display().to_string()),
        uploaded_by: args.uploaded_by.clone(),
    };
    let summary = store::persist_outcome(&pool, &outcome, &upload).await?;

    println!(
        "\nSaved {} endorsements (file group {})",
        summary.endorsement_ids.len(),
        summary.file_group_id
    );
    for stored in store::fetch_group(&pool, summary.file_group_id).await? {
        println!(
            "  id={} {} policy={} type={} status={}",
            stored.id,
            stored.combination_id.as_deref().unwrap_or("-"),
            stored.policy_number,
            stored.endorsement_type,
            stored.status
        );
    }
    Ok(())
}
