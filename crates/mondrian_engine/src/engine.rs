//! The job engine: submission, worker loop, per-job processing, reaping,
//! and drain-aware shutdown.

use chrono::Utc;
use mondrian_protocol::{
    defaults, percent_for, Advisor, AdvisorSelector, AnalysisMode, ErrorKind, JobId, JobPatch,
    JobPhase, JobRecord, JobStatus, StreamEvent,
};
use mondrian_store::{Store, StoreError};
use mondrian_strategy::{AnalysisRequest, Dispatcher, ThinkingSink};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::labels::step_label;
use crate::render::render_critique;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected synchronously; never creates a job.
    #[error("{0}")]
    BadInput(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("engine is draining and accepts no new jobs")]
    Draining,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::BadInput(_) => ErrorKind::BadInput,
            EngineError::Draining => ErrorKind::Unavailable,
            EngineError::NotFound(_) | EngineError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool degree. The model gate still serializes per handle.
    pub worker_count: usize,
    pub heartbeat_interval: Duration,
    /// Queue poll cadence when idle
    pub poll_interval: Duration,
    /// Per-subscriber event buffer
    pub subscriber_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::DEFAULT_WORKER_COUNT,
            heartbeat_interval: Duration::from_secs(defaults::HEARTBEAT_INTERVAL_SECS),
            poll_interval: Duration::from_millis(250),
            subscriber_buffer: defaults::SUBSCRIBER_BUFFER_EVENTS,
        }
    }
}

/// A validated upload turned into work.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub image_ref: String,
    /// Raw advisor field: id, comma list, `all`, or `random`
    pub advisor_spec: String,
    pub mode: AnalysisMode,
}

/// Owns the queue, the worker pool, and the streaming bus.
pub struct JobEngine {
    store: Store,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<EventBus>,
    config: EngineConfig,
    emit_locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
    shutdown_tx: watch::Sender<bool>,
    accepting: AtomicBool,
}

impl JobEngine {
    pub fn new(store: Store, dispatcher: Arc<Dispatcher>, config: EngineConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus: Arc::new(EventBus::new(config.subscriber_buffer)),
            store,
            dispatcher,
            config,
            emit_locks: Mutex::new(HashMap::new()),
            shutdown_tx,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ------------------------------------------------------------------
    // Submission & subscription
    // ------------------------------------------------------------------

    /// Validate and enqueue an upload. Unknown advisors and empty selectors
    /// are rejected here and never create a job.
    pub async fn submit(&self, submission: JobSubmission) -> Result<JobRecord, EngineError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::Draining);
        }

        let selector = AdvisorSelector::parse(&submission.advisor_spec)
            .map_err(|e| EngineError::BadInput(e.to_string()))?;
        match &selector {
            AdvisorSelector::One(id) => {
                self.require_advisor(id).await?;
            }
            AdvisorSelector::List(ids) => {
                for id in ids {
                    self.require_advisor(id).await?;
                }
            }
            AdvisorSelector::All | AdvisorSelector::Random => {
                if self.store.list_advisors().await?.is_empty() {
                    return Err(EngineError::BadInput(
                        "no advisors configured".to_string(),
                    ));
                }
            }
        }

        let record = JobRecord::new(
            submission.image_ref,
            submission.advisor_spec,
            submission.mode,
        );
        self.store.create_job(&record).await?;
        info!(
            "Job {} queued: advisor={} mode={}",
            record.id, record.advisor_spec, record.requested_mode
        );
        Ok(record)
    }

    async fn require_advisor(&self, id: &str) -> Result<Advisor, EngineError> {
        match self.store.get_advisor(id).await {
            Ok(advisor) => Ok(advisor),
            Err(StoreError::AdvisorNotFound(id)) => {
                Err(EngineError::BadInput(format!("unknown advisor: {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Subscribe to a job's event stream.
    ///
    /// Returns the synthesized initial events (`connected` plus a
    /// `status_update` snapshot, and the terminal events for already-finished
    /// jobs) alongside the live receiver. Terminal jobs get no receiver: the
    /// synthesized events are the whole stream. The snapshot is taken under
    /// the emit lock, so the first live event a subscriber sees is never
    /// older than the snapshot.
    pub async fn subscribe(
        &self,
        job_id: JobId,
    ) -> Result<(Vec<StreamEvent>, Option<broadcast::Receiver<StreamEvent>>), EngineError> {
        let lock = self.emit_lock(job_id).await;
        let _guard = lock.lock().await;

        let record = match self.store.get_job(job_id).await {
            Ok(record) => record,
            Err(StoreError::JobNotFound(id)) => return Err(EngineError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };

        let mut initial = vec![
            StreamEvent::connected(job_id),
            StreamEvent::status_update(record.snapshot()),
        ];
        if record.is_terminal() {
            if record.status == JobStatus::Done {
                if let Some(output) = &record.rendered_output {
                    initial.push(StreamEvent::analysis_complete(job_id, output.clone()));
                }
            }
            initial.push(StreamEvent::done(job_id));
            return Ok((initial, None));
        }
        Ok((initial, Some(self.bus.subscribe(job_id))))
    }

    // ------------------------------------------------------------------
    // Mutation path
    // ------------------------------------------------------------------

    async fn emit_lock(&self, job_id: JobId) -> Arc<Mutex<()>> {
        let mut locks = self.emit_locks.lock().await;
        Arc::clone(locks.entry(job_id).or_default())
    }

    /// Commit a mutation and publish the resulting snapshot.
    ///
    /// The emit lock spans commit and publish, so subscribers observe
    /// `status_update`s in commit order.
    async fn update_job(&self, job_id: JobId, patch: JobPatch) -> Result<JobRecord, EngineError> {
        let lock = self.emit_lock(job_id).await;
        let _guard = lock.lock().await;
        let updated = self.store.mutate_job(job_id, patch).await?;
        self.bus.publish(&StreamEvent::status_update(updated.snapshot()));
        Ok(updated)
    }

    /// Transition a job to `error`, emit the terminal events, close the bus.
    /// Idempotent: an already-terminal job is left untouched.
    async fn fail_job(&self, job_id: JobId, kind: ErrorKind, message: String) {
        match self
            .update_job(job_id, JobPatch::failure(kind, message))
            .await
        {
            Ok(_) => {
                let lock = self.emit_lock(job_id).await;
                let guard = lock.lock().await;
                self.bus.publish(&StreamEvent::done(job_id));
                drop(guard);
                self.bus.close(job_id);
                self.emit_locks.lock().await.remove(&job_id);
            }
            Err(EngineError::Store(StoreError::TerminalJob(_))) => {
                debug!("Job {} already terminal, skipping failure", job_id);
            }
            Err(e) => error!("Failed to mark job {} as errored: {}", job_id, e),
        }
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// Claim and fully process one queued job. Returns false when the queue
    /// is empty. Strategy errors end the job; they are not returned.
    pub async fn process_next(&self) -> Result<bool, EngineError> {
        let Some(record) = self.store.claim_next_queued().await? else {
            return Ok(false);
        };
        let job_id = record.id;
        info!("Processing job {}", job_id);

        if let Err((kind, message)) = self.run_pipeline(record).await {
            error!("Job {} failed ({}): {}", job_id, kind, message);
            self.fail_job(job_id, kind, message).await;
        }
        Ok(true)
    }

    async fn run_pipeline(&self, record: JobRecord) -> Result<(), (ErrorKind, String)> {
        let job_id = record.id;
        let internal = |e: EngineError| (ErrorKind::Internal, e.to_string());

        // Step 1: the job was claimed into processing/image_processing.
        // Image normalization (resize) would land here; format handling is an
        // external collaborator.
        debug!("Preparing image {}", record.image_ref);
        self.update_job(job_id, JobPatch::default().with_percentage(5))
            .await
            .map_err(internal)?;

        // Step 2: advisor preparation.
        let advisors = self.expand_advisors(&record.advisor_spec).await?;
        let total = advisors.len() as u32;
        self.update_job(
            job_id,
            JobPatch {
                status: Some(JobStatus::Analyzing),
                phase: Some(JobPhase::AdvisorPreparation),
                total_advisors: Some(total),
                percentage: Some(10),
                ..JobPatch::default()
            },
        )
        .await
        .map_err(internal)?;

        // Step 3: per-advisor analysis.
        let mut mode_recorded = false;
        for (index, advisor) in advisors.iter().enumerate() {
            let completed = index as u32;
            let pct = percent_for(
                JobStatus::Analyzing,
                JobPhase::AdvisorAnalysis,
                completed,
                total,
            )
            .unwrap_or(10);
            self.update_job(
                job_id,
                JobPatch {
                    phase: Some(JobPhase::AdvisorAnalysis),
                    current_step: Some(step_label(&advisor.name)),
                    percentage: Some(pct),
                    ..JobPatch::default()
                },
            )
            .await
            .map_err(internal)?;

            let outcome = self.analyze_with_thinking(job_id, &record, advisor).await?;

            let output = serde_json::to_value(&outcome)
                .map_err(|e| (ErrorKind::Internal, format!("result serialization: {e}")))?;
            let advanced = percent_for(
                JobStatus::Analyzing,
                JobPhase::AdvisorAnalysis,
                completed + 1,
                total,
            )
            .unwrap_or(90);
            self.update_job(
                job_id,
                JobPatch {
                    current_advisor: Some(completed + 1),
                    percentage: Some(advanced),
                    advisor_output: Some((advisor.id.clone(), output)),
                    mode_used: if mode_recorded {
                        None
                    } else {
                        Some(outcome.mode_used)
                    },
                    ..JobPatch::default()
                },
            )
            .await
            .map_err(internal)?;
            mode_recorded = true;
        }

        // Step 4: compose the combined critique.
        self.update_job(
            job_id,
            JobPatch::status(JobStatus::Finalizing, JobPhase::Finalizing).with_percentage(95),
        )
        .await
        .map_err(internal)?;
        let current = self
            .store
            .get_job(job_id)
            .await
            .map_err(|e| (ErrorKind::Internal, e.to_string()))?;
        let output = render_critique(&current);
        self.update_job(
            job_id,
            JobPatch {
                rendered_output: Some(output.clone()),
                ..JobPatch::default()
            },
        )
        .await
        .map_err(internal)?;

        // Step 5: terminal.
        self.update_job(
            job_id,
            JobPatch {
                status: Some(JobStatus::Done),
                phase: Some(JobPhase::Done),
                percentage: Some(100),
                completed_at: Some(Utc::now()),
                ..JobPatch::default()
            },
        )
        .await
        .map_err(internal)?;

        let lock = self.emit_lock(job_id).await;
        let guard = lock.lock().await;
        self.bus
            .publish(&StreamEvent::analysis_complete(job_id, output));
        self.bus.publish(&StreamEvent::done(job_id));
        drop(guard);
        self.bus.close(job_id);
        self.emit_locks.lock().await.remove(&job_id);

        info!("Job {} done", job_id);
        Ok(())
    }

    /// Run the dispatcher while relaying thinking updates onto the bus.
    ///
    /// Thinking updates refresh `last_thinking` only; they never recompute
    /// percentage. The biased select drains every queued update before the
    /// analysis result is observed.
    async fn analyze_with_thinking(
        &self,
        job_id: JobId,
        record: &JobRecord,
        advisor: &Advisor,
    ) -> Result<mondrian_strategy::AnalysisOutcome, (ErrorKind, String)> {
        let request = AnalysisRequest {
            job_id,
            image_ref: record.image_ref.clone(),
            advisor: advisor.clone(),
            requested_mode: record.requested_mode,
        };
        let (sink, mut thinking_rx) = ThinkingSink::channel();

        let analyze = self.dispatcher.analyze(&request, &sink);
        tokio::pin!(analyze);

        let result = loop {
            tokio::select! {
                biased;
                Some(text) = thinking_rx.recv() => {
                    if let Err(e) = self.update_job(job_id, JobPatch::thinking(text)).await {
                        warn!("Dropping thinking update for {}: {}", job_id, e);
                    }
                }
                result = &mut analyze => break result,
            }
        };

        // Late pushes that raced the completion.
        while let Ok(text) = thinking_rx.try_recv() {
            if let Err(e) = self.update_job(job_id, JobPatch::thinking(text)).await {
                warn!("Dropping thinking update for {}: {}", job_id, e);
            }
        }

        result.map_err(|e| (e.kind(), e.to_string()))
    }

    async fn expand_advisors(
        &self,
        spec: &str,
    ) -> Result<Vec<Advisor>, (ErrorKind, String)> {
        let bad_input = |msg: String| (ErrorKind::BadInput, msg);
        let selector =
            AdvisorSelector::parse(spec).map_err(|e| bad_input(e.to_string()))?;

        let advisors = match selector {
            AdvisorSelector::One(id) => {
                vec![self
                    .require_advisor(&id)
                    .await
                    .map_err(|e| (e.kind(), e.to_string()))?]
            }
            AdvisorSelector::List(ids) => {
                let mut advisors = Vec::with_capacity(ids.len());
                for id in ids {
                    advisors.push(
                        self.require_advisor(&id)
                            .await
                            .map_err(|e| (e.kind(), e.to_string()))?,
                    );
                }
                advisors
            }
            AdvisorSelector::All => self
                .store
                .list_advisors()
                .await
                .map_err(|e| (ErrorKind::Internal, e.to_string()))?,
            AdvisorSelector::Random => {
                let all = self
                    .store
                    .list_advisors()
                    .await
                    .map_err(|e| (ErrorKind::Internal, e.to_string()))?;
                match all.choose(&mut rand::thread_rng()) {
                    Some(advisor) => vec![advisor.clone()],
                    None => Vec::new(),
                }
            }
        };

        if advisors.is_empty() {
            return Err(bad_input("no advisors to run".to_string()));
        }
        Ok(advisors)
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    /// Spawn the worker pool and the heartbeat task.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for worker_id in 0..self.config.worker_count.max(1) {
            let engine = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                engine.worker_loop(worker_id).await;
            }));
        }
        let engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            engine.heartbeat_loop().await;
        }));
        handles
    }

    async fn worker_loop(&self, worker_id: usize) {
        info!("Worker {} started", worker_id);
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!("Worker {} queue error: {}", worker_id, e);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        info!("Worker {} stopped", worker_id);
    }

    async fn heartbeat_loop(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for job_id in self.bus.live_jobs() {
                        self.bus.publish(&StreamEvent::heartbeat(job_id));
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    // ------------------------------------------------------------------
    // Reaping & shutdown
    // ------------------------------------------------------------------

    /// Mark as `error` every non-terminal job idle past `timeout`, with the
    /// terminal SSE events. Idempotent: reaped jobs are terminal and never
    /// reported stale again.
    pub async fn reap_stale(&self, timeout: chrono::Duration) -> Result<usize, EngineError> {
        let cutoff = Utc::now() - timeout;
        let stale = self.store.list_stale_jobs(cutoff).await?;
        let count = stale.len();
        for job in stale {
            warn!(
                "Reaping job {}: idle since {}",
                job.id, job.last_activity
            );
            self.fail_job(
                job.id,
                ErrorKind::Timeout,
                "job exceeded its wall-clock budget".to_string(),
            )
            .await;
        }
        Ok(count)
    }

    /// Stop accepting uploads immediately.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting, let in-flight jobs finish within the drain window,
    /// then stop workers and cancel all subscriptions.
    pub async fn shutdown(&self, drain_window: Duration) {
        self.stop_accepting();
        info!("Draining in-flight jobs ({:?} window)", drain_window);

        let deadline = tokio::time::Instant::now() + drain_window;
        loop {
            let active = self.active_jobs().await.unwrap_or(0);
            if active == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Drain window elapsed with {} jobs in flight", active);
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let _ = self.shutdown_tx.send(true);
        self.bus.close_all();
        info!("Engine stopped");
    }

    /// Jobs currently between claim and terminal.
    pub async fn active_jobs(&self) -> Result<u64, EngineError> {
        let mut active = 0;
        for status in [
            JobStatus::Processing,
            JobStatus::Analyzing,
            JobStatus::Finalizing,
        ] {
            active += self.store.count_jobs(status).await?;
        }
        Ok(active)
    }

    /// Queue depth (jobs waiting for a worker).
    pub async fn queued_jobs(&self) -> Result<u64, EngineError> {
        Ok(self.store.count_jobs(JobStatus::Queued).await?)
    }
}
