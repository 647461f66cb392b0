use super::gateway::{GatewayError, ImportGateway};
use super::reader::{read_records, ReadOutcome};
use super::validate::ImportRecord;
use crate::calc::{calculate_grade, get_grade_point, GradeScale};
use crate::model::{GradePolicy, ImportSummary};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImportOptions {
    pub scale: GradeScale,
    pub grade_policy: GradePolicy,
}

enum RecordOutcome {
    Persisted,
    Rejected(String),
}

/// One record inside its own savepoint. `Err` means the batch cannot go on.
fn persist_record<G: ImportGateway>(
    gateway: &mut G,
    record: &ImportRecord,
    scale: GradeScale,
) -> Result<RecordOutcome, GatewayError> {
    gateway.begin_record()?;

    let letter = calculate_grade(record.score);
    let grade = record.grade_entry(letter, get_grade_point(record.score, scale));
    let attempt = gateway
        .upsert_profile(&record.profile())
        .and_then(|_| gateway.insert_grade(&grade));

    match attempt {
        Ok(()) => {
            gateway.finish_record(true)?;
            Ok(RecordOutcome::Persisted)
        }
        Err(GatewayError::Rejected(msg)) => {
            gateway.finish_record(false)?;
            Ok(RecordOutcome::Rejected(msg))
        }
        Err(e) => Err(e),
    }
}

fn abort_batch<G: ImportGateway>(
    gateway: &mut G,
    cause: GatewayError,
    total: usize,
    mut errors: Vec<String>,
) -> ImportSummary {
    tracing::error!(error = %cause, "bulk import aborted; rolling back batch");
    if let Err(e) = gateway.rollback() {
        tracing::error!(error = %e, "rollback failed");
    }
    errors.push(format!("critical import error: {}", cause));
    ImportSummary::nothing_saved("Bulk import failed; no records were saved.", total, errors)
}

/// Reads `path`, validates every row and persists the valid ones as a single
/// batch through the gateway returned by `connect`.
///
/// `connect` is only called when at least one row is valid. Record-level
/// rejections are skipped and reported; a batch-level failure rolls back
/// everything, so the summary never counts rows that were not committed.
pub fn bulk_import<G, F>(path: &Path, options: ImportOptions, connect: F) -> ImportSummary
where
    G: ImportGateway,
    F: FnOnce() -> Result<G, GatewayError>,
{
    let ReadOutcome {
        records,
        mut errors,
        rows_seen,
    } = read_records(path);
    let total = rows_seen;

    if records.is_empty() {
        tracing::info!(total, "no valid records to import");
        return ImportSummary::nothing_saved("No valid records found.", total, errors);
    }

    let mut gateway = match connect() {
        Ok(g) => g,
        Err(e) => {
            tracing::error!(error = %e, "could not open import batch");
            errors.push(format!("critical import error: {}", e));
            return ImportSummary::nothing_saved("Database connection failed.", total, errors);
        }
    };

    tracing::info!(
        records = records.len(),
        policy = options.grade_policy.as_str(),
        scale = options.scale.as_f64(),
        "importing batch"
    );

    let mut successful = 0usize;
    let mut skipped = total - records.len();
    for record in &records {
        match persist_record(&mut gateway, record, options.scale) {
            Ok(RecordOutcome::Persisted) => successful += 1,
            Ok(RecordOutcome::Rejected(detail)) => {
                tracing::warn!(
                    line = record.line,
                    index_number = %record.index_number,
                    error = %detail,
                    "record rejected"
                );
                skipped += 1;
                errors.push(format!(
                    "record {}: {}: {}",
                    record.line, record.index_number, detail
                ));
            }
            Err(e) => return abort_batch(&mut gateway, e, total, errors),
        }
    }

    if let Err(e) = gateway.commit() {
        return abort_batch(&mut gateway, e, total, errors);
    }

    debug_assert_eq!(total, successful + skipped);
    tracing::info!(total, successful, skipped, "bulk import committed");
    ImportSummary {
        message: "Bulk import complete.".to_string(),
        total,
        successful,
        skipped,
        errors,
    }
}
