use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cutoff_core::{MajorId, MajorRecord, NewRunMetadata, ProgramType, RunMetadata};

use crate::{AdmissionStore, StoreError, StoreTransaction};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMajor {
    pub id: MajorId,
    pub name: String,
    pub external_id: String,
    pub program_type: ProgramType,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredStatistic {
    pub major_id: MajorId,
    pub year: Option<String>,
    pub max_grade: Option<f64>,
    pub min_grade: Option<f64>,
    pub initial_reject_count: Option<i64>,
    pub final_admit_count: Option<i64>,
    pub domestic: Option<bool>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    majors: Vec<StoredMajor>,
    statistics: Vec<StoredStatistic>,
    runs: Vec<RunMetadata>,
    next_major_id: MajorId,
    next_run_id: i64,
}

#[derive(Debug, Default)]
struct Faults {
    failing_names: HashSet<String>,
    unreachable: bool,
    metadata_unreadable: bool,
}

/// In-process store with the same upsert/rollback semantics as Postgres.
///
/// Supports fault injection so pipelines can be exercised without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts of records with this name fail with a row-level conflict.
    pub fn fail_record(&self, name: impl Into<String>) {
        lock(&self.faults).failing_names.insert(name.into());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.faults).unreachable = unreachable;
    }

    pub fn set_metadata_unreadable(&self, unreadable: bool) {
        lock(&self.faults).metadata_unreadable = unreadable;
    }

    pub fn clear_faults(&self) {
        *lock(&self.faults) = Faults::default();
    }

    pub fn majors(&self) -> Vec<StoredMajor> {
        lock(&self.tables).majors.clone()
    }

    pub fn statistics(&self) -> Vec<StoredStatistic> {
        lock(&self.tables).statistics.clone()
    }

    pub fn runs(&self) -> Vec<RunMetadata> {
        lock(&self.tables).runs.clone()
    }
}

#[async_trait]
impl AdmissionStore for MemoryStore {
    async fn latest_run(&self) -> Result<Option<RunMetadata>, StoreError> {
        {
            let faults = lock(&self.faults);
            if faults.unreachable || faults.metadata_unreadable {
                return Err(StoreError::Connectivity("run_metadata unavailable".into()));
            }
        }
        let tables = lock(&self.tables);
        Ok(tables
            .runs
            .iter()
            .max_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        if lock(&self.faults).unreachable {
            return Err(StoreError::Connectivity("memory store marked unreachable".into()));
        }
        let working = lock(&self.tables).clone();
        Ok(Box::new(MemoryTransaction {
            store: self,
            checkpoint: working.clone(),
            working,
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    checkpoint: Tables,
    working: Tables,
}

impl MemoryTransaction<'_> {
    fn upsert_major(&mut self, record: &MajorRecord) -> MajorId {
        let program_type = record.effective_program_type();
        if let Some(existing) = self
            .working
            .majors
            .iter_mut()
            .find(|m| m.name == record.name && m.program_type == program_type)
        {
            existing.external_id = record.external_id.clone();
            existing.note = record.note.clone();
            return existing.id;
        }

        self.working.next_major_id += 1;
        let id = self.working.next_major_id;
        self.working.majors.push(StoredMajor {
            id,
            name: record.name.clone(),
            external_id: record.external_id.clone(),
            program_type,
            note: record.note.clone(),
        });
        id
    }

    fn upsert_statistic(&mut self, major_id: MajorId, record: &MajorRecord) {
        let incoming = StoredStatistic {
            major_id,
            year: record.year.clone(),
            max_grade: record.max_grade,
            min_grade: record.min_grade,
            initial_reject_count: record.initial_reject_count,
            final_admit_count: record.final_admit_count,
            domestic: record.domestic,
        };
        match self.working.statistics.iter_mut().find(|s| {
            s.major_id == major_id && s.year == record.year && s.domestic == record.domestic
        }) {
            Some(existing) => *existing = incoming,
            None => self.working.statistics.push(incoming),
        }
    }
}

#[async_trait]
impl<'a> StoreTransaction for MemoryTransaction<'a> {
    async fn upsert_record(&mut self, record: &MajorRecord) -> Result<MajorId, StoreError> {
        {
            let faults = lock(&self.store.faults);
            if faults.unreachable {
                return Err(StoreError::Connectivity("memory store marked unreachable".into()));
            }
            if faults.failing_names.contains(&record.name) {
                return Err(StoreError::Conflict {
                    record: record.merge_key(),
                    reason: "injected failure".into(),
                });
            }
        }
        let major_id = self.upsert_major(record);
        self.upsert_statistic(major_id, record);
        Ok(major_id)
    }

    async fn discard_record_changes(&mut self) -> Result<(), StoreError> {
        self.working.majors = self.checkpoint.majors.clone();
        self.working.statistics = self.checkpoint.statistics.clone();
        self.working.next_major_id = self.checkpoint.next_major_id;
        Ok(())
    }

    async fn append_run_metadata(&mut self, entry: &NewRunMetadata) -> Result<(), StoreError> {
        self.working.next_run_id += 1;
        self.working.runs.push(RunMetadata {
            id: self.working.next_run_id,
            sheet_checksum: entry.sheet_checksum.clone(),
            scrape_checksum: entry.scrape_checksum.clone(),
            recorded_at: entry.recorded_at,
            success: entry.success,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if lock(&self.store.faults).unreachable {
            return Err(StoreError::Connectivity("memory store marked unreachable".into()));
        }
        let MemoryTransaction { store, working, .. } = *self;
        *lock(&store.tables) = working;
        Ok(())
    }
}
