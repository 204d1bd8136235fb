use chrono::{DateTime, Utc};
use cutoff_core::{Fingerprints, NewRunMetadata};
use cutoff_storage::{AdmissionStore, StoreError};
use serde::Serialize;
use tracing::{info, warn};

use crate::merge::MergedRecords;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub attempted: usize,
    pub upserted: usize,
    /// Merge keys of records whose upsert was refused.
    pub failed: Vec<String>,
    pub success: bool,
}

/// Upsert every merged record in one transaction, then append the audit row.
///
/// Row-level conflicts are collected and the loop carries on; any conflict
/// reverts all record changes before the audit row is written with
/// `success = false`. An `Err` means nothing was committed, audit row included.
pub async fn persist(
    store: &dyn AdmissionStore,
    records: &MergedRecords,
    fingerprints: &Fingerprints,
    recorded_at: DateTime<Utc>,
) -> Result<PersistReport, StoreError> {
    let mut tx = store.begin().await?;
    let mut upserted = 0usize;
    let mut failed = Vec::new();

    for (key, record) in records {
        match tx.upsert_record(record).await {
            Ok(_) => upserted += 1,
            Err(err) if err.is_row_level() => {
                warn!(record = %key, error = %err, "upsert failed; continuing");
                failed.push(key.clone());
            }
            Err(err) => return Err(err),
        }
    }

    let success = failed.is_empty();
    if !success {
        warn!(
            failed = failed.len(),
            attempted = records.len(),
            "rolling back record changes"
        );
        tx.discard_record_changes().await?;
        upserted = 0;
    }

    tx.append_run_metadata(&NewRunMetadata::new(fingerprints, recorded_at, success))
        .await?;
    tx.commit().await?;
    info!(upserted, success, "run persisted");

    Ok(PersistReport {
        attempted: records.len(),
        upserted,
        failed,
        success,
    })
}
