//! Report ingestion: parse an uploaded artifact and write its stats onto the
//! run, either inline or through the background [`IngestWorker`].

use crate::artifacts::ArtifactSource;
use crate::config::IngestConfig;
use crate::model::Verdict;
use crate::parser::{parse_report, ParseOutcome, ParserConfig};
use crate::storage::{Store, StoreError, WriteOutcome};
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub run_id: String,
    pub verdict: Verdict,
    pub total_tests: u32,
    /// False when the report was truncated or malformed.
    pub complete: bool,
    pub written: bool,
    pub timing_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Done(IngestSummary),
    Failed { error: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done(_) | JobState::Failed { .. })
    }
}

/// Parses `reader` and writes the result onto `run_id`.
///
/// Only complete parses reach the store; a partial parse is reported in the
/// summary and leaves the run untouched.
pub fn ingest_reader<R: Read>(
    store: &Store,
    run_id: &str,
    reader: R,
    config: &ParserConfig,
) -> Result<IngestSummary, StoreError> {
    let outcome = parse_report(reader, config);

    let write = match &outcome {
        ParseOutcome::Complete(stats) => store.write_run_stats(run_id, stats)?,
        ParseOutcome::Partial { cause, .. } => {
            tracing::warn!(event = "ingest_partial_discarded", run_id, error = %cause);
            WriteOutcome::Skipped
        }
    };

    let stats = outcome.stats();
    let (written, timing_rows) = match write {
        WriteOutcome::Written { timing_rows } => (true, timing_rows),
        WriteOutcome::Skipped => (false, 0),
    };
    Ok(IngestSummary {
        run_id: run_id.to_string(),
        verdict: stats.verdict,
        total_tests: stats.total_tests,
        complete: outcome.is_complete(),
        written,
        timing_rows,
        parse_error: outcome.error().map(|e| e.to_string()),
    })
}

/// Fetches `object` from `source` and ingests it on a blocking thread.
pub async fn ingest_artifact(
    store: &Store,
    source: &dyn ArtifactSource,
    run_id: &str,
    object: &str,
    config: &ParserConfig,
) -> anyhow::Result<IngestSummary> {
    let reader = source.fetch(object).await?;
    let store = store.clone();
    let run_id = run_id.to_string();
    let config = config.clone();
    let summary =
        tokio::task::spawn_blocking(move || ingest_reader(&store, &run_id, reader, &config))
            .await??;
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestJob {
    pub run_id: String,
    pub object: String,
}

struct Queued {
    job: IngestJob,
    state: watch::Sender<JobState>,
}

/// Observes one submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub run_id: String,
    rx: watch::Receiver<JobState>,
}

impl JobHandle {
    pub fn state(&self) -> JobState {
        self.rx.borrow().clone()
    }

    /// Resolves once the job is done or failed.
    pub async fn wait(mut self) -> JobState {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                // worker dropped the job without a final state
                return self.rx.borrow().clone();
            }
        }
    }
}

/// Bounded queue of ingest jobs drained by a fixed number of concurrent
/// tasks. Jobs are not cancellable; [`IngestWorker::shutdown`] waits for
/// everything already queued.
pub struct IngestWorker {
    tx: mpsc::Sender<Queued>,
    dispatcher: JoinHandle<()>,
}

impl IngestWorker {
    pub fn start(store: Store, source: Arc<dyn ArtifactSource>, config: &IngestConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<Queued>(config.queue_depth.max(1));
        let parallel = config.workers.max(1);
        let parser = config.parser_config();

        let dispatcher = tokio::spawn(async move {
            let sem = Arc::new(Semaphore::new(parallel));
            let mut handles = Vec::new();

            while let Some(queued) = rx.recv().await {
                let permit = match sem.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let store = store.clone();
                let source = source.clone();
                let parser = parser.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    run_job(store, source, queued, parser).await
                }));
                handles.retain(|h| !h.is_finished());
            }

            for h in handles {
                if let Err(e) = h.await {
                    tracing::error!(event = "ingest_task_panicked", error = %e);
                }
            }
        });

        tracing::info!(event = "ingest_worker_started", workers = parallel, queue = config.queue_depth);
        Self { tx, dispatcher }
    }

    /// Queues a job, waiting for queue space if needed.
    pub async fn submit(&self, job: IngestJob) -> anyhow::Result<JobHandle> {
        let (state, rx) = watch::channel(JobState::Submitted);
        let run_id = job.run_id.clone();
        self.tx
            .send(Queued { job, state })
            .await
            .map_err(|_| anyhow::anyhow!("ingest worker is not running"))?;
        tracing::debug!(event = "ingest_submitted", run_id = %run_id);
        Ok(JobHandle { run_id, rx })
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        drop(self.tx);
        self.dispatcher.await?;
        tracing::info!(event = "ingest_worker_stopped");
        Ok(())
    }
}

async fn run_job(
    store: Store,
    source: Arc<dyn ArtifactSource>,
    queued: Queued,
    parser: ParserConfig,
) {
    let Queued { job, state } = queued;
    state.send_replace(JobState::Running);
    tracing::info!(event = "ingest_started", run_id = %job.run_id, object = %job.object);

    let next = match ingest_artifact(&store, source.as_ref(), &job.run_id, &job.object, &parser)
        .await
    {
        Ok(summary) => {
            tracing::info!(
                event = "ingest_done",
                run_id = %job.run_id,
                verdict = %summary.verdict,
                written = summary.written
            );
            JobState::Done(summary)
        }
        Err(e) => {
            tracing::error!(event = "ingest_failed", run_id = %job.run_id, error = %e);
            JobState::Failed {
                error: format!("{e:#}"),
            }
        }
    };
    state.send_replace(next);
}
