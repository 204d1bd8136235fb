use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cutoff_adapters::{AdapterContext, AdapterError, SourceAdapter, SourceSnapshot, RawTable};
use cutoff_core::{ProgramType, RawRow, SourceKind, TableLayout};
use cutoff_storage::{HttpFetcher, MemoryStore};
use cutoff_sync::{ChangeState, FailureKind, SyncConfig, SyncOutcome, SyncPipeline};

/// Serves whatever tables the test put in `tables`; `None` means the source is down.
#[derive(Clone)]
struct StaticAdapter {
    source: SourceKind,
    tables: Arc<Mutex<Option<Vec<RawTable>>>>,
    delay: Option<Duration>,
}

impl StaticAdapter {
    fn new(source: SourceKind, tables: Vec<RawTable>) -> Self {
        Self {
            source,
            tables: Arc::new(Mutex::new(Some(tables))),
            delay: None,
        }
    }

    fn replace(&self, tables: Option<Vec<RawTable>>) {
        *self.tables.lock().unwrap() = tables;
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn source(&self) -> SourceKind {
        self.source
    }

    async fn fetch(
        &self,
        _http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<SourceSnapshot, AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let tables = self
            .tables
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AdapterError::DataUnavailable {
                origin: self.source,
                location: "static".into(),
                reason: "source offline".into(),
            })?;
        Ok(SourceSnapshot {
            source: self.source,
            location: "static".into(),
            fetched_at: ctx.fetched_at,
            tables,
        })
    }
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn test_config() -> SyncConfig {
    SyncConfig {
        database_url: "postgres://unused".into(),
        sheet_location: "fixtures/sheet/sample.csv".into(),
        scrape_location: "fixtures/scrape/sample.html".into(),
        user_agent: "cutoff-sync-tests".into(),
        http_timeout_secs: 5,
        db_timeout_secs: 1,
        scheduler_enabled: false,
        sync_cron: "0 0 */6 * * *".into(),
        mappings_path: None,
        workspace_root: workspace_root(),
    }
}

fn sheet_row(option: &str, specialization: &str, year: &str, min: &str) -> RawRow {
    RawRow::new([year, option, specialization, "100", "50", "50", "40", "95", min])
}

fn sheet_table(rows: Vec<RawRow>) -> Vec<RawTable> {
    vec![RawTable {
        layout: TableLayout::Sheet,
        rows,
    }]
}

fn uniform_table(rows: Vec<RawRow>) -> Vec<RawTable> {
    vec![RawTable {
        layout: TableLayout::UniformTable,
        rows,
    }]
}

fn pipeline(sheet: &StaticAdapter, scrape: &StaticAdapter) -> SyncPipeline {
    SyncPipeline::new(&test_config(), Box::new(sheet.clone()), Box::new(scrape.clone()))
        .expect("pipeline")
}

fn two_plus_one() -> (StaticAdapter, StaticAdapter) {
    let sheet = StaticAdapter::new(
        SourceKind::Sheet,
        sheet_table(vec![
            sheet_row("All Students", "Major: Computer Science (0530)", "2023", "82.5"),
            sheet_row("All Students", "Honours: Biology (0110)", "2023", "80"),
        ]),
    );
    let scrape = StaticAdapter::new(
        SourceKind::Scrape,
        uniform_table(vec![RawRow::new(["Astronomy (0201)", "2022", "78.0", ""])]),
    );
    (sheet, scrape)
}

#[tokio::test]
async fn fresh_run_creates_majors_statistics_and_one_audit_row() {
    let (sheet, scrape) = two_plus_one();
    let store = MemoryStore::new();

    let outcome = pipeline(&sheet, &scrape).run_once(&store).await;

    let SyncOutcome::Refreshed { summary, .. } = outcome else {
        panic!("expected refresh, got {outcome:?}");
    };
    assert_eq!(summary.change, ChangeState::Fresh);
    assert_eq!(summary.merged_records, 3);
    assert_eq!(summary.upserted_records, 3);
    assert_eq!(store.majors().len(), 3);
    assert_eq!(store.statistics().len(), 3);
    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].success);
    assert_eq!(runs[0].sheet_checksum, summary.fingerprints.sheet);
}

#[tokio::test]
async fn identical_sources_skip_on_second_run() {
    let (sheet, scrape) = two_plus_one();
    let store = MemoryStore::new();
    let pipeline = pipeline(&sheet, &scrape);

    assert!(matches!(
        pipeline.run_once(&store).await,
        SyncOutcome::Refreshed { .. }
    ));
    let majors = store.majors();
    let statistics = store.statistics();

    assert!(matches!(
        pipeline.run_once(&store).await,
        SyncOutcome::Skipped { no_change: true }
    ));
    assert_eq!(store.runs().len(), 1);
    assert_eq!(store.majors(), majors);
    assert_eq!(store.statistics(), statistics);
}

#[tokio::test]
async fn reordered_rows_are_not_a_change() {
    let (sheet, scrape) = two_plus_one();
    let store = MemoryStore::new();
    let pipeline = pipeline(&sheet, &scrape);
    pipeline.run_once(&store).await;

    sheet.replace(Some(sheet_table(vec![
        sheet_row("All Students", "Honours: Biology (0110)", "2023", "80"),
        sheet_row("All Students", "Major: Computer Science (0530)", "2023", "82.5"),
    ])));
    assert!(matches!(
        pipeline.run_once(&store).await,
        SyncOutcome::Skipped { .. }
    ));
}

#[tokio::test]
async fn changed_sheet_is_attributed_and_refreshed() {
    let (sheet, scrape) = two_plus_one();
    let store = MemoryStore::new();
    let pipeline = pipeline(&sheet, &scrape);
    pipeline.run_once(&store).await;

    sheet.replace(Some(sheet_table(vec![
        sheet_row("All Students", "Major: Computer Science (0530)", "2023", "84.0"),
        sheet_row("All Students", "Honours: Biology (0110)", "2023", "80"),
    ])));
    let SyncOutcome::Refreshed { summary, .. } = pipeline.run_once(&store).await else {
        panic!("expected refresh");
    };
    assert_eq!(
        summary.change,
        ChangeState::Changed {
            sheet_changed: true,
            scrape_changed: false
        }
    );
    assert_eq!(store.runs().len(), 2);
    assert!(store
        .statistics()
        .iter()
        .any(|s| s.min_grade == Some(84.0)));
}

#[tokio::test]
async fn scrape_values_overwrite_sheet_values_but_not_identity() {
    let sheet = StaticAdapter::new(
        SourceKind::Sheet,
        sheet_table(vec![sheet_row("", "Major: CS (0530)", "2023", "80")]),
    );
    let scrape = StaticAdapter::new(
        SourceKind::Scrape,
        vec![RawTable {
            layout: TableLayout::DualHeaderTable,
            rows: vec![RawRow::new(["Major CS (0531)", "2023", "DOM", "85"])],
        }],
    );
    let store = MemoryStore::new();

    let outcome = pipeline(&sheet, &scrape).run_once(&store).await;
    assert!(matches!(outcome, SyncOutcome::Refreshed { .. }));

    let majors = store.majors();
    assert_eq!(majors.len(), 1);
    assert_eq!(majors[0].name, "CS");
    assert_eq!(majors[0].external_id, "0530");
    let statistics = store.statistics();
    assert_eq!(statistics.len(), 1);
    assert_eq!(statistics[0].min_grade, Some(85.0));
    assert_eq!(statistics[0].domestic, Some(true));
    assert_eq!(statistics[0].max_grade, Some(95.0));
}

#[tokio::test]
async fn failing_seventh_record_rolls_back_everything() {
    let rows = (0..10)
        .map(|i| {
            sheet_row(
                "All Students",
                &format!("Major: Program {i:02} ({:04})", 1000 + i),
                "2023",
                "70",
            )
        })
        .collect();
    let sheet = StaticAdapter::new(SourceKind::Sheet, sheet_table(rows));
    let scrape = StaticAdapter::new(SourceKind::Scrape, uniform_table(vec![]));
    let store = MemoryStore::new();
    store.fail_record("Program 06");
    let pipeline = pipeline(&sheet, &scrape);

    let outcome = pipeline.run_once(&store).await;
    assert!(matches!(
        outcome,
        SyncOutcome::Failed {
            kind: FailureKind::PersistenceConflict,
            ..
        }
    ));
    assert!(store.majors().is_empty());
    assert!(store.statistics().is_empty());
    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert!(!runs[0].success);

    // Same content again: the failed audit row forces a retry.
    store.clear_faults();
    let SyncOutcome::Refreshed { summary, .. } = pipeline.run_once(&store).await else {
        panic!("expected retry to refresh");
    };
    assert_eq!(summary.change, ChangeState::FailedRetry);
    assert_eq!(store.majors().len(), 10);
}

#[tokio::test]
async fn untyped_records_persist_as_major() {
    let sheet = StaticAdapter::new(SourceKind::Sheet, sheet_table(vec![]));
    let scrape = StaticAdapter::new(
        SourceKind::Scrape,
        uniform_table(vec![RawRow::new(["Astronomy (0201)", "2023", "80.5", ""])]),
    );
    let store = MemoryStore::new();

    pipeline(&sheet, &scrape).run_once(&store).await;

    let majors = store.majors();
    assert_eq!(majors.len(), 1);
    assert_eq!(majors[0].program_type, ProgramType::Major);
}

#[tokio::test]
async fn malformed_rows_are_dropped_without_failing_the_run() {
    let sheet = StaticAdapter::new(
        SourceKind::Sheet,
        sheet_table(vec![
            sheet_row("All Students", "Major: Astronomy", "2023", "75"),
            sheet_row("All Students", "", "2023", ""),
            sheet_row("All Students", "Honours: Biology (0110)", "2023", "80"),
        ]),
    );
    let scrape = StaticAdapter::new(SourceKind::Scrape, uniform_table(vec![]));
    let store = MemoryStore::new();

    let SyncOutcome::Refreshed { summary, .. } = pipeline(&sheet, &scrape).run_once(&store).await
    else {
        panic!("expected refresh");
    };
    assert_eq!(summary.rejected_rows, 2);
    assert_eq!(summary.merged_records, 1);
    assert!(store.majors().iter().all(|m| m.name != "Astronomy"));
}

#[tokio::test]
async fn unavailable_source_fails_without_audit_row() {
    let (sheet, scrape) = two_plus_one();
    scrape.replace(None);
    let store = MemoryStore::new();

    let outcome = pipeline(&sheet, &scrape).run_once(&store).await;

    let SyncOutcome::Failed { kind, detail } = outcome else {
        panic!("expected failure");
    };
    assert_eq!(kind, FailureKind::DataUnavailable);
    assert!(detail.contains("scrape"));
    assert!(store.runs().is_empty());
    assert!(store.majors().is_empty());
}

#[tokio::test]
async fn unreadable_metadata_is_not_treated_as_no_change() {
    let (sheet, scrape) = two_plus_one();
    let store = MemoryStore::new();
    store.set_metadata_unreadable(true);

    let outcome = pipeline(&sheet, &scrape).run_once(&store).await;

    assert!(matches!(
        outcome,
        SyncOutcome::Failed {
            kind: FailureKind::MetadataUnavailable,
            ..
        }
    ));
    store.clear_faults();
    assert!(store.runs().is_empty());
    assert!(store.majors().is_empty());
}

#[tokio::test]
async fn overlapping_run_is_refused() {
    let (mut sheet, scrape) = two_plus_one();
    sheet.delay = Some(Duration::from_millis(100));
    let store = MemoryStore::new();
    let pipeline = pipeline(&sheet, &scrape);

    let (first, second) = tokio::join!(pipeline.run_once(&store), pipeline.run_once(&store));

    assert!(matches!(first, SyncOutcome::Refreshed { .. }));
    assert!(matches!(
        second,
        SyncOutcome::Failed {
            kind: FailureKind::RunInProgress,
            ..
        }
    ));
    assert_eq!(store.runs().len(), 1);
}

#[tokio::test]
async fn fixture_documents_sync_end_to_end() {
    let config = test_config();
    let pipeline = SyncPipeline::from_config(&config).expect("pipeline");
    let store = MemoryStore::new();

    let SyncOutcome::Refreshed { summary, .. } = pipeline.run_once(&store).await else {
        panic!("expected fixtures to refresh");
    };
    assert_eq!(summary.sheet_rows, 6);
    assert_eq!(summary.scrape_rows, 16);
    assert_eq!(summary.rejected_rows, 2);
    assert_eq!(summary.merged_records, 12);
    assert_eq!(store.majors().len(), 7);
    assert_eq!(store.statistics().len(), 12);

    assert!(matches!(
        pipeline.run_once(&store).await,
        SyncOutcome::Skipped { .. }
    ));
}
