//! Fixed-size worker pool with a bounded job queue
//!
//! Each worker is an OS thread owning one extractor. Workers pull from a
//! shared queue whose capacity equals the worker count, so at most
//! `2 * workers` jobs are in flight and a full queue suspends the submitter.
//! Outcomes flow to a supervisor task that owns [`WorkerPoolState`] and
//! drives the health state.

use super::marker::MarkerDir;
use super::state::{HealthState, JobOutcome, WorkerPoolState};
use crate::config::{EncodeSettings, ExtractorKind, SemitransparencyStrategy, ServerConfig};
use crate::error::{BgRemovalError, Result};
use crate::extractor::ExtractorFactory;
use crate::processor::{RemovalRequest, RemovalResponse, RequestPipeline};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info_span;

/// One queued request and where its response goes
#[derive(Debug)]
struct Job {
    correlation_id: String,
    request: RemovalRequest,
    reply: oneshot::Sender<RemovalResponse>,
}

/// Messages from workers to the supervisor
#[derive(Debug)]
enum PoolEvent {
    WorkerReady(usize),
    WorkerFailed { worker: usize, error: String },
    JobFinished(JobOutcome),
}

/// Settings every worker needs besides its extractor
#[derive(Debug, Clone)]
struct WorkerContext {
    strategy: SemitransparencyStrategy,
    encode: EncodeSettings,
    markers: MarkerDir,
}

type SharedQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Running pool; dropping it without [`WorkerPool::shutdown`] detaches the workers
#[derive(Debug)]
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    health: watch::Receiver<HealthState>,
    workers: Vec<JoinHandle<()>>,
    supervisor: Option<tokio::task::JoinHandle<WorkerPoolState>>,
    markers: MarkerDir,
    api: &'static str,
}

impl WorkerPool {
    /// Spawn the workers and the supervisor; must be called within a Tokio runtime
    ///
    /// Returns immediately in [`HealthState::Initializing`]. The pool turns
    /// [`HealthState::Ready`] once every worker has built its extractor.
    pub fn spawn(config: &ServerConfig, factory: Arc<dyn ExtractorFactory>) -> Result<Self> {
        config.validate()?;
        let count = config.worker_count();
        let markers = MarkerDir::create(&config.marker_dir)?;
        markers.clear()?;

        let api = match config.extractor {
            ExtractorKind::Mock { .. } => "mock",
            ExtractorKind::Onnx { .. } => "rust",
        };
        let context = WorkerContext {
            strategy: config.semitransparency,
            encode: config.encode,
            markers: markers.clone(),
        };

        let (sender, receiver) = mpsc::channel::<Job>(count);
        let queue: SharedQueue = Arc::new(Mutex::new(receiver));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (health_tx, health_rx) = watch::channel(HealthState::Initializing);

        log::info!(
            "🚀 Starting {count} worker(s), breaker after {} consecutive failures",
            config.max_consecutive_failures
        );

        let supervisor = tokio::spawn(supervise(
            events_rx,
            health_tx,
            WorkerPoolState::new(config.max_consecutive_failures),
            count,
            markers.clone(),
        ));

        let mut workers = Vec::with_capacity(count);
        for worker in 0..count {
            let factory = Arc::clone(&factory);
            let queue = Arc::clone(&queue);
            let events = events_tx.clone();
            let context = context.clone();
            let handle = std::thread::Builder::new()
                .name(format!("bgremove-worker-{worker}"))
                .spawn(move || worker_loop(worker, factory.as_ref(), &queue, &events, &context))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            health: health_rx,
            workers,
            supervisor: Some(supervisor),
            markers,
            api,
        })
    }

    /// Current health state
    #[must_use]
    pub fn health(&self) -> HealthState {
        *self.health.borrow()
    }

    /// Watch health transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.health.clone()
    }

    /// Answer a health check without touching the queue
    #[must_use]
    pub fn health_response(&self) -> RemovalResponse {
        RemovalResponse::health(self.health() == HealthState::Ready, self.api)
    }

    #[must_use]
    pub fn api(&self) -> &'static str {
        self.api
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn markers(&self) -> &MarkerDir {
        &self.markers
    }

    /// Wait until the pool leaves `Initializing`
    ///
    /// # Errors
    /// `Unhealthy` if the pool terminated instead of becoming ready.
    pub async fn ready(&self) -> Result<()> {
        let mut health = self.health.clone();
        let state = *health
            .wait_for(|state| *state != HealthState::Initializing)
            .await
            .map_err(|_| BgRemovalError::unhealthy("pool supervisor stopped during startup"))?;
        match state {
            HealthState::Ready => Ok(()),
            other => Err(BgRemovalError::unhealthy(format!("pool is {other}"))),
        }
    }

    /// Queue a request, waiting while the queue is full
    ///
    /// Dispatch is FIFO. The returned receiver resolves once a worker finishes the job.
    ///
    /// # Errors
    /// `Unhealthy` once the pool has terminated or is shutting down.
    pub async fn submit(
        &self,
        correlation_id: impl Into<String>,
        request: RemovalRequest,
    ) -> Result<oneshot::Receiver<RemovalResponse>> {
        let state = self.health();
        if !state.accepts_jobs() {
            return Err(BgRemovalError::unhealthy(format!("pool is {state}")));
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| BgRemovalError::unhealthy("pool is shutting down"))?;

        let (reply, response) = oneshot::channel();
        let job = Job {
            correlation_id: correlation_id.into(),
            request,
            reply,
        };
        sender
            .send(job)
            .await
            .map_err(|_| BgRemovalError::unhealthy("all workers have stopped"))?;
        Ok(response)
    }

    /// Submit and wait for the response; pool failures become error responses
    pub async fn process(&self, correlation_id: impl Into<String>, request: RemovalRequest) -> RemovalResponse {
        let response = match self.submit(correlation_id, request).await {
            Ok(response) => response,
            Err(e) => return RemovalResponse::from_error(&e, self.api),
        };
        response.await.unwrap_or_else(|_| {
            RemovalResponse::from_error(&BgRemovalError::internal("worker dropped the job"), self.api)
        })
    }

    /// Stop accepting jobs, let queued and running jobs finish, then join everything
    ///
    /// Returns the final breaker counters.
    pub async fn shutdown(mut self) -> Result<WorkerPoolState> {
        drop(self.sender.take());
        let workers = std::mem::take(&mut self.workers);
        tokio::task::spawn_blocking(move || {
            for handle in workers {
                if handle.join().is_err() {
                    log::error!("❌ A worker thread panicked outside a job");
                }
            }
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("failed to join workers: {e}")))?;

        let state = match self.supervisor.take() {
            Some(supervisor) => supervisor
                .await
                .map_err(|e| BgRemovalError::internal(format!("supervisor failed: {e}")))?,
            None => return Err(BgRemovalError::internal("pool was already shut down")),
        };
        self.markers.clear()?;
        log::info!(
            "✅ Pool stopped after {} job(s), {} failed",
            state.jobs_finished(),
            state.jobs_failed()
        );
        Ok(state)
    }
}

fn worker_loop(
    worker: usize,
    factory: &dyn ExtractorFactory,
    queue: &SharedQueue,
    events: &mpsc::UnboundedSender<PoolEvent>,
    context: &WorkerContext,
) {
    let extractor = match factory.create_extractor(worker) {
        Ok(extractor) => extractor,
        Err(e) => {
            let _ = events.send(PoolEvent::WorkerFailed {
                worker,
                error: e.to_string(),
            });
            return;
        },
    };
    log::debug!("Worker {worker} ready with {} extractor", extractor.name());
    let mut pipeline = RequestPipeline::new(extractor, context.strategy, context.encode);
    let _ = events.send(PoolEvent::WorkerReady(worker));

    loop {
        // The lock is held only while waiting, never while processing
        let job = match queue.lock() {
            Ok(mut receiver) => receiver.blocking_recv(),
            Err(_) => {
                log::error!("❌ Worker {worker}: job queue lock poisoned");
                None
            },
        };
        let Some(job) = job else {
            break;
        };
        let outcome = run_job(worker, &mut pipeline, job, context);
        let _ = events.send(PoolEvent::JobFinished(outcome));
    }
    log::debug!("Worker {worker} stopped");
}

fn run_job(worker: usize, pipeline: &mut RequestPipeline, job: Job, context: &WorkerContext) -> JobOutcome {
    let span = info_span!("job", correlation_id = %job.correlation_id, worker);
    let _entered = span.enter();

    let marker = match context.markers.processing(worker, &job.correlation_id) {
        Ok(marker) => Some(marker),
        Err(e) => {
            log::warn!("⚠️ Could not write processing marker: {e}");
            None
        },
    };
    let result = catch_unwind(AssertUnwindSafe(|| pipeline.process(&job.request)));
    drop(marker);

    let (response, outcome) = match result {
        Ok(Ok(response)) => (response, JobOutcome::Succeeded),
        Ok(Err(e)) => {
            let outcome = if e.trips_breaker() {
                JobOutcome::Failed
            } else if pipeline.extraction_succeeded() {
                JobOutcome::Succeeded
            } else {
                JobOutcome::Rejected
            };
            log::info!("error: {} ({e})", e.kind().description());
            (RemovalResponse::from_error(&e, pipeline.api()), outcome)
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("❌ Worker {worker} panicked: {message}");
            let error = BgRemovalError::internal(format!("worker panicked: {message}"));
            (RemovalResponse::from_error(&error, pipeline.api()), JobOutcome::Failed)
        },
    };

    if job.reply.send(response).is_err() {
        log::debug!("Requester went away before the response was ready");
    }
    outcome
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

async fn supervise(
    mut events: mpsc::UnboundedReceiver<PoolEvent>,
    health: watch::Sender<HealthState>,
    mut state: WorkerPoolState,
    workers: usize,
    markers: MarkerDir,
) -> WorkerPoolState {
    let mut ready = 0;
    while let Some(event) = events.recv().await {
        match event {
            PoolEvent::WorkerReady(_) => {
                ready += 1;
                if ready == workers && *health.borrow() == HealthState::Initializing {
                    if let Err(e) = markers.write_startup() {
                        log::warn!("⚠️ Could not write startup marker: {e}");
                    }
                    health.send_replace(HealthState::Ready);
                    log::info!("✅ All {workers} worker(s) ready");
                }
            },
            PoolEvent::WorkerFailed { worker, error } => {
                log::error!("❌ Worker {worker} failed to start: {error}");
                health.send_replace(HealthState::Terminated);
            },
            PoolEvent::JobFinished(outcome) => {
                if state.record(outcome) && *health.borrow() != HealthState::Terminated {
                    log::error!(
                        "❌ {} consecutive extraction failures, terminating",
                        state.consecutive_failures()
                    );
                    health.send_replace(HealthState::Terminated);
                }
            },
        }
    }
    state
}
