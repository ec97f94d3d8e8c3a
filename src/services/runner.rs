//! Batch orchestrator
//!
//! Drives one import run: partitions rows into batches, processes them
//! strictly sequentially (later batches must see earlier inserts for
//! duplicate detection), aggregates running totals and emits one
//! progress event per settled batch. A row failure never aborts the
//! run; only pre-flight problems (invalid mapping, empty file, busy
//! scope) do.

use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::cancellation::RunCancellation;
use crate::services::duplicate::{self, Classification};
use crate::services::normalizer;
use crate::services::run_lock::RunLock;
use crate::store::{PropertyStore, StoreError};
use crate::types::{
    ColumnMapping, ImportBatch, ImportOptions, ImportSession, NewProperty, PropertyRef, RawRow,
    RowError, RowErrorType, RunProgress, RunSummary, SessionStatus,
};

/// Default rows per batch, halved for large files to keep each batch's
/// wall time under the store's single-request budget.
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const LARGE_FILE_ROWS: usize = 1000;
pub const LARGE_FILE_BATCH_SIZE: usize = 25;

/// Pause between batches. Rate-limit avoidance, not correctness.
pub const BATCH_DELAY_MS: u64 = 500;

const UNCONFIRMED_OUTCOME: &str = "resultado não confirmado — verifique manualmente";

pub type ProgressObserver = Box<dyn Fn(RunProgress) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("mapeamento de colunas inválido: {}", .0.join("; "))]
    InvalidMapping(Vec<String>),

    #[error("arquivo CSV vazio ou ilegível")]
    EmptyFile,

    #[error("já existe uma importação em andamento para este batalhão")]
    ScopeBusy,

    #[error("falha ao acessar o armazenamento: {0}")]
    Store(#[from] StoreError),
}

/// Effective batch size for a run.
pub fn effective_batch_size(total_rows: usize, options: &ImportOptions) -> usize {
    if let Some(size) = options.batch_size {
        return size.max(1);
    }
    if total_rows > LARGE_FILE_ROWS {
        LARGE_FILE_BATCH_SIZE
    } else {
        DEFAULT_BATCH_SIZE
    }
}

/// Partition rows into contiguous batches covering every index exactly
/// once. Batch numbers are 1-based.
pub fn partition_batches(rows: Vec<RawRow>, batch_size: usize) -> Vec<ImportBatch> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(rows.len().div_ceil(size));
    let mut rows = rows;
    let mut start_index = 0;
    let mut batch_number = 1;
    while !rows.is_empty() {
        let take = size.min(rows.len());
        let rest = rows.split_off(take);
        let batch_rows = rows;
        rows = rest;
        batches.push(ImportBatch {
            batch_number,
            start_index,
            end_index: start_index + take,
            rows: batch_rows,
        });
        start_index += take;
        batch_number += 1;
    }
    batches
}

struct RunTotals {
    successful: usize,
    failed: usize,
    skipped: usize,
    processed: usize,
}

pub struct ImportRunner {
    store: Arc<dyn PropertyStore>,
    /// Captured once per run so defaulted cadastro dates agree.
    today: NaiveDate,
    observer: Option<ProgressObserver>,
}

impl ImportRunner {
    pub fn new(store: Arc<dyn PropertyStore>, today: NaiveDate) -> Self {
        Self {
            store,
            today,
            observer: None,
        }
    }

    /// Called at least once per settled batch with running totals.
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn emit(&self, progress: RunProgress) {
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }

    /// Execute the whole run and finalize the session. Row failures are
    /// accumulated, never propagated; `Err` means the run could not
    /// start or the session itself could not be read.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        job_id: Uuid,
        session: &ImportSession,
        headers: &[String],
        rows: Vec<RawRow>,
        mapping: &ColumnMapping,
        options: &ImportOptions,
        cancellation: &RunCancellation,
        lock: &RunLock,
    ) -> Result<RunSummary, RunnerError> {
        let complaints = mapping.validate();
        if !complaints.is_empty() {
            return Err(RunnerError::InvalidMapping(complaints));
        }
        if rows.is_empty() {
            return Err(RunnerError::EmptyFile);
        }

        let _lease = lock
            .acquire(options.battalion.as_deref(), job_id)
            .map_err(|held| {
                warn!(%job_id, holder = %held.holder, "Import scope busy");
                RunnerError::ScopeBusy
            })?;

        let total_rows = rows.len();
        let batch_size = effective_batch_size(total_rows, options);
        let batches = partition_batches(rows, batch_size);
        let total_batches = batches.len();
        let delay_ms = options.batch_delay_ms.unwrap_or(BATCH_DELAY_MS);

        // Live duplicate set: seeded from the store, appended as rows
        // persist so later batches see earlier inserts.
        let mut existing: Vec<PropertyRef> = self.store.list_active_properties().await?;

        info!(
            %job_id, session_id = %session.id, total_rows, total_batches, batch_size,
            "Import run starting"
        );

        let mut totals = RunTotals {
            successful: 0,
            failed: 0,
            skipped: 0,
            processed: 0,
        };
        let mut errors: Vec<RowError> = Vec::new();
        let mut cancelled = false;

        for batch in &batches {
            if cancellation.is_cancelled(&job_id) {
                cancelled = true;
                info!(%job_id, batch_number = batch.batch_number, "Import run cancelled by the user");
                break;
            }

            self.process_batch(session, headers, batch, mapping, options, &mut existing, &mut totals, &mut errors)
                .await;

            self.emit(RunProgress {
                message: format!(
                    "Lote {} de {} processado",
                    batch.batch_number, total_batches
                ),
                batch_number: batch.batch_number,
                total_batches,
                successful: totals.successful,
                failed: totals.failed,
                skipped: totals.skipped,
                progress_rows: totals.processed,
                total_rows,
            });

            if batch.batch_number < total_batches && delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }

        // Rows the cancel left undispatched still have to be accounted
        // for: they count as skipped so the totals cover the whole file
        let unprocessed = total_rows - totals.processed;
        if cancelled {
            totals.skipped += unprocessed;
        }
        let message = if cancelled {
            format!("Importação cancelada — {unprocessed} linhas não processadas")
        } else {
            "Importação concluída".to_string()
        };

        let status = SessionStatus::Completed;
        self.store
            .finalize_session(
                session.id,
                status,
                totals.successful as i32,
                totals.failed as i32,
                totals.skipped as i32,
                &errors,
            )
            .await?;

        info!(
            %job_id, session_id = %session.id,
            successful = totals.successful, failed = totals.failed,
            skipped = totals.skipped, cancelled,
            "Import run finished"
        );

        Ok(RunSummary {
            session_id: session.id,
            total_rows,
            successful: totals.successful,
            failed: totals.failed,
            skipped: totals.skipped,
            cancelled,
            status,
            message,
            errors,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &self,
        session: &ImportSession,
        headers: &[String],
        batch: &ImportBatch,
        mapping: &ColumnMapping,
        options: &ImportOptions,
        existing: &mut Vec<PropertyRef>,
        totals: &mut RunTotals,
        errors: &mut Vec<RowError>,
    ) {
        let mut store_lost = false;
        for row in &batch.rows {
            totals.processed += 1;

            if store_lost {
                // Outcome of this batch's remaining rows was never
                // observed; never claim success or failure we did not see.
                totals.failed += 1;
                errors.push(RowError::new(
                    row.row_number,
                    String::new(),
                    RowErrorType::CriticalError,
                    UNCONFIRMED_OUTCOME,
                    row.cells.join(","),
                    Default::default(),
                ));
                continue;
            }

            let record = match normalizer::normalize(row, mapping, headers, self.today) {
                Ok(record) => record,
                Err(error) => {
                    totals.failed += 1;
                    errors.push(error);
                    continue;
                }
            };

            if let Classification::Duplicate { reference, .. } =
                duplicate::classify(&record, existing)
            {
                if options.skip_existing {
                    totals.skipped += 1;
                    errors.push(RowError::new(
                        row.row_number,
                        record.name.clone(),
                        RowErrorType::Duplicate,
                        format!("duplicada de \"{}\" — ignorada", reference.name),
                        row.cells.join(","),
                        Default::default(),
                    ));
                    continue;
                }
            }

            let new_property = NewProperty {
                record,
                session_id: session.id,
                created_by: session.user_id,
            };
            match self.store.insert_property(&new_property).await {
                Ok(id) => {
                    totals.successful += 1;
                    existing.push(PropertyRef {
                        id,
                        name: new_property.record.name.clone(),
                        coordinates: new_property.record.coordinates(),
                    });
                }
                Err(StoreError::Unavailable(reason)) => {
                    warn!(row = row.row_number, %reason, "Store unavailable mid-batch");
                    totals.failed += 1;
                    errors.push(RowError::new(
                        row.row_number,
                        new_property.record.name.clone(),
                        RowErrorType::CriticalError,
                        format!("{UNCONFIRMED_OUTCOME} ({reason})"),
                        row.cells.join(","),
                        Default::default(),
                    ));
                    store_lost = true;
                }
                Err(err) => {
                    totals.failed += 1;
                    errors.push(RowError::new(
                        row.row_number,
                        new_property.record.name.clone(),
                        RowErrorType::DatabaseError,
                        err.to_string(),
                        row.cells.join(","),
                        Default::default(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InjectedFailure, MemoryStore};
    use crate::types::TargetField;
    use parking_lot::Mutex;

    fn mapping() -> ColumnMapping {
        let mut m = ColumnMapping::new();
        m.insert("Propriedade".into(), TargetField::Name);
        m.insert("Cidade".into(), TargetField::Cidade);
        m.insert("Proprietario".into(), TargetField::OwnerName);
        m.insert("Coord".into(), TargetField::CoordinatesCombined);
        m
    }

    fn headers() -> Vec<String> {
        vec![
            "Propriedade".to_string(),
            "Cidade".to_string(),
            "Proprietario".to_string(),
            "Coord".to_string(),
        ]
    }

    fn rows(count: usize) -> Vec<RawRow> {
        (0..count)
            .map(|i| RawRow {
                row_number: i + 2,
                // Spread rows far apart so they are not location duplicates
                cells: vec![
                    format!("Propriedade {i}"),
                    "Curitiba".to_string(),
                    "João".to_string(),
                    format!("{:.4},{:.4}", -25.0 + (i as f64) * 0.01, -49.0),
                ],
            })
            .collect()
    }

    fn options() -> ImportOptions {
        ImportOptions {
            skip_existing: true,
            batch_size: None,
            batch_delay_ms: Some(0),
            battalion: None,
        }
    }

    async fn session_for(store: &Arc<MemoryStore>, total: i32) -> ImportSession {
        let ledger = crate::services::ledger::SessionLedger::new(store.clone() as Arc<dyn PropertyStore>);
        ledger.begin(Uuid::new_v4(), "teste.csv", total).await.unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 31).unwrap()
    }

    #[test]
    fn test_partition_covers_every_index_once() {
        let batches = partition_batches(rows(120), 50);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].rows.len(), 50);
        assert_eq!(batches[1].rows.len(), 50);
        assert_eq!(batches[2].rows.len(), 20);
        let mut next = 0;
        for batch in &batches {
            assert_eq!(batch.start_index, next);
            assert_eq!(batch.end_index - batch.start_index, batch.rows.len());
            next = batch.end_index;
        }
        assert_eq!(next, 120);
    }

    #[test]
    fn test_partition_exact_multiple() {
        let batches = partition_batches(rows(100), 50);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].end_index, 100);
    }

    #[test]
    fn test_adaptive_batch_size() {
        assert_eq!(effective_batch_size(500, &options()), 50);
        assert_eq!(effective_batch_size(1001, &options()), 25);
        let mut opts = options();
        opts.batch_size = Some(10);
        assert_eq!(effective_batch_size(5000, &opts), 10);
    }

    #[tokio::test]
    async fn test_invalid_mapping_refuses_to_start() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 1).await;
        let runner = ImportRunner::new(store.clone(), today());
        let mut incomplete = ColumnMapping::new();
        incomplete.insert("Propriedade".into(), TargetField::Name);
        let err = runner
            .run(
                Uuid::new_v4(),
                &session,
                &headers(),
                rows(1),
                &incomplete,
                &options(),
                &RunCancellation::default(),
                &RunLock::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidMapping(_)));
        assert_eq!(store.active_property_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 0).await;
        let runner = ImportRunner::new(store.clone(), today());
        let err = runner
            .run(
                Uuid::new_v4(),
                &session,
                &headers(),
                Vec::new(),
                &mapping(),
                &options(),
                &RunCancellation::default(),
                &RunLock::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::EmptyFile));
    }

    #[tokio::test]
    async fn test_malformed_row_does_not_block_siblings() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 3).await;
        let mut all = rows(2);
        all.push(RawRow {
            row_number: 4,
            cells: vec!["Ruim".into(), "Curitiba".into(), "Ana".into(), "abc,def".into()],
        });
        let runner = ImportRunner::new(store.clone(), today());
        let summary = runner
            .run(
                Uuid::new_v4(),
                &session,
                &headers(),
                all,
                &mapping(),
                &options(),
                &RunCancellation::default(),
                &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].error_type, RowErrorType::InvalidCoordinates);
        assert_eq!(store.active_property_count(), 2);
    }

    #[tokio::test]
    async fn test_count_conservation_and_progress_cadence() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 120).await;
        let events: Arc<Mutex<Vec<RunProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let runner = ImportRunner::new(store.clone(), today())
            .with_observer(Box::new(move |p| sink.lock().push(p)));
        let summary = runner
            .run(
                Uuid::new_v4(),
                &session,
                &headers(),
                rows(120),
                &mapping(),
                &options(),
                &RunCancellation::default(),
                &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.successful + summary.failed + summary.skipped, 120);
        assert_eq!(summary.status, SessionStatus::Completed);

        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].batch_number, 1);
        assert_eq!(events[0].total_batches, 3);
        assert_eq!(events[2].progress_rows, 120);
        assert!(events[2].message.contains("Lote 3 de 3"));
    }

    #[tokio::test]
    async fn test_duplicate_in_store_is_skipped_case_insensitively() {
        let store = Arc::new(MemoryStore::new());
        store.seed_property("Fazenda X", -25.4284, -49.2733);
        let session = session_for(&store, 1).await;
        let row = RawRow {
            row_number: 2,
            cells: vec![
                "fazenda x".into(),
                "Curitiba".into(),
                "João".into(),
                "-25.4284,-49.2733".into(),
            ],
        };
        let runner = ImportRunner::new(store.clone(), today());
        let summary = runner
            .run(
                Uuid::new_v4(),
                &session,
                &headers(),
                vec![row],
                &mapping(),
                &options(),
                &RunCancellation::default(),
                &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.active_property_count(), 1);
    }

    #[tokio::test]
    async fn test_earlier_batch_insert_makes_later_row_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 2).await;
        let make_row = |n: usize| RawRow {
            row_number: n,
            cells: vec![
                "Fazenda Repetida".into(),
                "Curitiba".into(),
                "João".into(),
                "-25.4284,-49.2733".into(),
            ],
        };
        let mut opts = options();
        opts.batch_size = Some(1); // one row per batch
        let runner = ImportRunner::new(store.clone(), today());
        let summary = runner
            .run(
                Uuid::new_v4(),
                &session,
                &headers(),
                vec![make_row(2), make_row(3)],
                &mapping(),
                &opts,
                &RunCancellation::default(),
                &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.active_property_count(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_resume_with_skip_existing() {
        let store = Arc::new(MemoryStore::new());
        let runner = ImportRunner::new(store.clone(), today());
        let file = rows(10);

        let first = session_for(&store, 10).await;
        let summary = runner
            .run(
                Uuid::new_v4(), &first, &headers(), file.clone(), &mapping(),
                &options(), &RunCancellation::default(), &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.successful, 10);

        // Same file again: everything already persisted, nothing inserted
        let second = session_for(&store, 10).await;
        let summary = runner
            .run(
                Uuid::new_v4(), &second, &headers(), file, &mapping(),
                &options(), &RunCancellation::default(), &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.skipped, 10);
        assert_eq!(store.active_property_count(), 10);
    }

    #[tokio::test]
    async fn test_skip_existing_false_imports_duplicates() {
        let store = Arc::new(MemoryStore::new());
        store.seed_property("Propriedade 0", -25.0, -49.0);
        let session = session_for(&store, 1).await;
        let mut opts = options();
        opts.skip_existing = false;
        let runner = ImportRunner::new(store.clone(), today());
        let summary = runner
            .run(
                Uuid::new_v4(), &session, &headers(), rows(1), &mapping(),
                &opts, &RunCancellation::default(), &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(store.active_property_count(), 2);
    }

    #[tokio::test]
    async fn test_store_outage_charges_rest_of_batch_pessimistically() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 10).await;
        // Connection lost on the 3rd insert; rows 3..5 of batch 1 unknown
        store.fail_insert(3, InjectedFailure::Unavailable);
        let mut opts = options();
        opts.batch_size = Some(5);
        let runner = ImportRunner::new(store.clone(), today());
        let summary = runner
            .run(
                Uuid::new_v4(), &session, &headers(), rows(10), &mapping(),
                &opts, &RunCancellation::default(), &RunLock::default(),
            )
            .await
            .unwrap();
        // Batch 1: 2 ok, 3 critical. Batch 2 proceeds normally.
        assert_eq!(summary.successful, 7);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.successful + summary.failed + summary.skipped, 10);
        let critical: Vec<_> = summary
            .errors
            .iter()
            .filter(|e| e.error_type == RowErrorType::CriticalError)
            .collect();
        assert_eq!(critical.len(), 3);
        assert!(critical[0].error_message.contains("verifique manualmente"));
    }

    #[tokio::test]
    async fn test_conflict_charges_single_row_only() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 3).await;
        store.fail_insert(2, InjectedFailure::Conflict);
        let runner = ImportRunner::new(store.clone(), today());
        let summary = runner
            .run(
                Uuid::new_v4(), &session, &headers(), rows(3), &mapping(),
                &options(), &RunCancellation::default(), &RunLock::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors[0].error_type, RowErrorType::DatabaseError);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_batch() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 100).await;
        let job_id = Uuid::new_v4();
        let owner = session.user_id;
        let cancellation = RunCancellation::default();
        let _guard = cancellation.register(job_id, owner);

        // Cancel as soon as the first batch settles
        let cancel_after_first = {
            let cancellation = cancellation.clone();
            Box::new(move |p: RunProgress| {
                if p.batch_number == 1 {
                    let _ = cancellation.cancel(&job_id, owner);
                }
            })
        };
        let mut opts = options();
        opts.batch_size = Some(10);
        let runner =
            ImportRunner::new(store.clone(), today()).with_observer(cancel_after_first);
        let summary = runner
            .run(
                job_id, &session, &headers(), rows(100), &mapping(),
                &opts, &cancellation, &RunLock::default(),
            )
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.successful, 10);
        assert_eq!(store.active_property_count(), 10);
        // Undispatched rows count as skipped so the file stays accounted for
        assert_eq!(summary.skipped, 90);
        assert_eq!(
            summary.successful + summary.failed + summary.skipped,
            summary.total_rows
        );
        assert!(summary.message.contains("90 linhas não processadas"));
        // Session is still closed with the observed totals
        let stored = store.get_session(session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.success_count, 10);
        assert_eq!(stored.skipped_count, 90);
    }

    #[tokio::test]
    async fn test_busy_battalion_scope_refuses_run() {
        let store = Arc::new(MemoryStore::new());
        let session = session_for(&store, 1).await;
        let lock = RunLock::default();
        let _held = lock.acquire(Some("1º BPM"), Uuid::new_v4()).unwrap();
        let mut opts = options();
        opts.battalion = Some("1º BPM".to_string());
        let runner = ImportRunner::new(store.clone(), today());
        let err = runner
            .run(
                Uuid::new_v4(), &session, &headers(), rows(1), &mapping(),
                &opts, &RunCancellation::default(), &lock,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ScopeBusy));
    }
}
