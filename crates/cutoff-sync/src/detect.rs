use cutoff_core::{Fingerprints, RunMetadata};
use cutoff_storage::{AdmissionStore, StoreError};
use serde::Serialize;
use tracing::info;

/// Where the current fingerprints stand relative to the latest audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ChangeState {
    Fresh,
    Stable,
    Changed {
        sheet_changed: bool,
        scrape_changed: bool,
    },
    FailedRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Refresh,
    Skip,
}

impl ChangeState {
    pub fn decision(self) -> Decision {
        match self {
            ChangeState::Stable => Decision::Skip,
            ChangeState::Fresh | ChangeState::Changed { .. } | ChangeState::FailedRetry => {
                Decision::Refresh
            }
        }
    }
}

/// Looks only at the single latest row.
pub fn classify(current: &Fingerprints, latest: Option<&RunMetadata>) -> ChangeState {
    let Some(latest) = latest else {
        return ChangeState::Fresh;
    };
    let sheet_changed = latest.sheet_checksum != current.sheet;
    let scrape_changed = latest.scrape_checksum != current.scrape;
    if sheet_changed || scrape_changed {
        ChangeState::Changed {
            sheet_changed,
            scrape_changed,
        }
    } else if latest.success {
        ChangeState::Stable
    } else {
        ChangeState::FailedRetry
    }
}

/// Read the latest audit row and classify. A read failure is returned, never read as "unchanged".
pub async fn detect_change(
    store: &dyn AdmissionStore,
    current: &Fingerprints,
) -> Result<ChangeState, StoreError> {
    let latest = store.latest_run().await?;
    let state = classify(current, latest.as_ref());
    match state {
        ChangeState::Fresh => info!("no prior run recorded"),
        ChangeState::Stable => info!("fingerprints match the last successful run"),
        ChangeState::Changed {
            sheet_changed,
            scrape_changed,
        } => info!(sheet_changed, scrape_changed, "source content changed"),
        ChangeState::FailedRetry => info!("retrying content whose last run failed"),
    }
    Ok(state)
}
