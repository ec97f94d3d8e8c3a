//! Import JetStream processor
//!
//! Wraps the batch orchestrator with a JetStream work queue:
//! - jobs survive worker restarts
//! - one job at a time (runs are strictly sequential)
//! - per-batch progress published on a per-job status subject
//!
//! ## Streams
//! - `PATRULHA_IMPORT_JOBS` — CSV property import jobs

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::cancellation::CANCELLATION;
use crate::services::column_mapper;
use crate::services::runner::{effective_batch_size, ImportRunner, RunnerError};
use crate::services::run_lock::RUN_LOCK;
use crate::store::PropertyStore;
use crate::types::{
    ColumnMapping, ImportJobStatus, ImportJobStatusUpdate, ImportJobSubmitResponse,
    QueuedImportJob, RunProgress, SessionStatus,
};

const STREAM_NAME: &str = "PATRULHA_IMPORT_JOBS";
const CONSUMER_NAME: &str = "import_workers";
const SUBJECT: &str = "patrulha.jobs.import";
const STATUS_PREFIX: &str = "patrulha.job.import.status";

pub struct ImportProcessor {
    client: Client,
    js: JsContext,
    store: Arc<dyn PropertyStore>,
}

impl ImportProcessor {
    /// Create the processor, initializing the JetStream stream.
    pub async fn new(client: Client, store: Arc<dyn PropertyStore>) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            max_bytes: 100 * 1024 * 1024, // CSV payloads travel in the job
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self { client, js, store })
    }

    /// Queue a job. The session was already opened by the submit
    /// handler; this only persists the job and reports queue state.
    pub async fn submit_job(
        &self,
        job: QueuedImportJob,
        total_rows: usize,
    ) -> Result<ImportJobSubmitResponse> {
        let job_id = job.id;
        let session_id = job.session_id;
        let total_batches = total_rows
            .div_ceil(effective_batch_size(total_rows, &job.request.options).max(1));

        let payload = serde_json::to_vec(&job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;

        info!(%job_id, %session_id, total_rows, "Import job queued");

        self.publish_status(job_id, ImportJobStatus::Queued { position: 1 })
            .await?;

        Ok(ImportJobSubmitResponse {
            job_id,
            session_id,
            total_rows,
            total_batches,
            message: "Importação enfileirada".to_string(),
        })
    }

    pub async fn publish_status(&self, job_id: Uuid, status: ImportJobStatus) -> Result<()> {
        let update = ImportJobStatusUpdate::new(job_id, status);
        let subject = format!("{}.{}", STATUS_PREFIX, job_id);
        let payload = serde_json::to_vec(&update)?;
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    /// Consume jobs from the queue, one at a time.
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: 3,
            filter_subject: SUBJECT.to_string(),
            ..Default::default()
        };
        let consumer = stream
            .get_or_create_consumer(CONSUMER_NAME, consumer_config)
            .await?;
        info!("JetStream import consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    // Sequential on purpose: concurrent runs would miss
                    // each other's inserts in duplicate detection
                    if let Err(e) = Arc::clone(&self).process_job(msg).await {
                        error!("Failed to process import job: {}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving import message: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn process_job(self: Arc<Self>, msg: jetstream::Message) -> Result<()> {
        let start_time = Instant::now();
        let job: QueuedImportJob = serde_json::from_slice(&msg.payload)?;
        let job_id = job.id;

        info!(%job_id, session_id = %job.session_id, filename = %job.request.filename,
              "Processing import job");

        let _guard = CANCELLATION.register(job_id, job.user_id);

        let result = self.execute(&job).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(summary) => {
                self.publish_status(
                    job_id,
                    ImportJobStatus::Completed {
                        message: summary.message.clone(),
                        session_id: summary.session_id,
                        total_rows: summary.total_rows,
                        successful: summary.successful,
                        failed: summary.failed,
                        skipped: summary.skipped,
                        cancelled: summary.cancelled,
                        duration_ms,
                    },
                )
                .await?;
                info!(%job_id, duration_ms, successful = summary.successful,
                      failed = summary.failed, skipped = summary.skipped,
                      "Import job completed");
            }
            Err(e) => {
                warn!(%job_id, error = %e, "Import job failed");
                if let Err(e) = self
                    .store
                    .set_session_status(job.session_id, SessionStatus::Failed)
                    .await
                {
                    error!(%job_id, "Failed to mark session as failed: {}", e);
                }
                self.publish_status(
                    job_id,
                    ImportJobStatus::Failed {
                        error: e.to_string(),
                    },
                )
                .await?;
            }
        }

        // Ack either way: permanent failures must not loop through redelivery
        if let Err(e) = msg.ack().await {
            error!("Failed to ack import job {}: {:?}", job_id, e);
        }
        Ok(())
    }

    async fn execute(&self, job: &QueuedImportJob) -> Result<crate::types::RunSummary, RunnerError> {
        self.publish_status(job.id, ImportJobStatus::Parsing { progress: 0 })
            .await
            .ok();

        let analysis = column_mapper::analyze(&job.request.csv_content);
        let mapping = ColumnMapping::from_entries(&job.request.mapping)
            .map_err(|e| RunnerError::InvalidMapping(vec![e]))?;
        let session = self.store.get_session(job.session_id).await?;

        // Forward observer events to NATS from a task; the runner's
        // callback is synchronous
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RunProgress>();
        let publisher = {
            let client = self.client.clone();
            let job_id = job.id;
            tokio::spawn(async move {
                while let Some(p) = rx.recv().await {
                    let update = ImportJobStatusUpdate::new(
                        job_id,
                        ImportJobStatus::Importing {
                            message: p.message,
                            batch_number: p.batch_number,
                            total_batches: p.total_batches,
                            successful: p.successful,
                            failed: p.failed,
                            skipped: p.skipped,
                            progress_rows: p.progress_rows,
                            total_rows: p.total_rows,
                        },
                    );
                    if let Ok(payload) = serde_json::to_vec(&update) {
                        let subject = format!("{}.{}", STATUS_PREFIX, job_id);
                        if let Err(e) = client.publish(subject, payload.into()).await {
                            warn!("Failed to publish progress update: {}", e);
                        }
                    }
                }
            })
        };

        let runner = ImportRunner::new(self.store.clone(), chrono::Utc::now().date_naive())
            .with_observer(Box::new(move |p| {
                let _ = tx.send(p);
            }));

        let summary = runner
            .run(
                job.id,
                &session,
                &analysis.headers,
                analysis.rows,
                &mapping,
                &job.request.options,
                &CANCELLATION,
                &RUN_LOCK,
            )
            .await;

        // Dropping the runner closes the channel; wait so the last
        // progress event still goes out
        drop(runner);
        let _ = publisher.await;
        summary
    }
}
