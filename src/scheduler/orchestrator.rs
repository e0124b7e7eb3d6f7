//! The job orchestrator: one job slot, one dispatch loop, many workers.
//!
//! All mutable job state lives in a single `JobState` behind a mutex. The
//! dispatch loop is the only code that launches workers; each worker posts
//! a message on a completion channel when it is done, which wakes the loop.
//! Counter updates and the completion transition happen in the same critical
//! section, so the `Running/Stopping → Idle` transition happens exactly once.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::job::{BatchSpec, JobPhase, Task};
use super::outcome::VisitOutcome;
use super::progress::{compute_progress, JobEvent, JobStatus, ProgressReport, ProgressSink};
use crate::config::{JobSettings, SchedulerTimings};
use crate::error::{InitError, JobError};
use crate::identity::{IdentityStrategy, StrategyDeps, StrategyStatus};
use crate::metrics::MetricsCollector;

/// Finished-task counters. `processed` includes abandoned tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobCounters {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl JobCounters {
    fn record(&mut self, outcome: VisitOutcome) {
        self.processed += 1;
        match outcome {
            VisitOutcome::Success => self.succeeded += 1,
            VisitOutcome::Abandoned => self.abandoned += 1,
            VisitOutcome::Retryable | VisitOutcome::NonRetryable => self.failed += 1,
        }
    }
}

/// Read-only view of the job slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Option<Uuid>,
    pub phase: JobPhase,
    pub queued: usize,
    pub active_workers: usize,
    pub max_concurrency: usize,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyStatus>,
}

#[derive(Default)]
struct JobState {
    job_id: Option<Uuid>,
    phase: JobPhase,
    queue: VecDeque<Task>,
    active_workers: usize,
    max_concurrency: usize,
    counters: JobCounters,
    timings: SchedulerTimings,
    strategy: Option<Arc<IdentityStrategy>>,
}

impl JobState {
    fn is_current(&self, job_id: Uuid) -> bool {
        self.job_id == Some(job_id)
    }

    fn progress(&self) -> f64 {
        compute_progress(self.counters.processed, self.queue.len(), self.active_workers)
    }
}

/// What a worker reports back for one task.
struct TaskRecord {
    outcome: VisitOutcome,
    log: String,
}

struct Inner {
    deps: StrategyDeps,
    sink: Arc<dyn ProgressSink>,
    metrics: MetricsCollector,
    state: Mutex<JobState>,
    /// Serialises `start_job` so strategy initialisation runs once at a time.
    admission: Mutex<()>,
    phase_tx: watch::Sender<JobPhase>,
}

/// Admits, runs, drains and stops one job at a time.
///
/// Cloning is cheap; every clone drives the same job slot.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(deps: StrategyDeps, sink: Arc<dyn ProgressSink>) -> Self {
        let (phase_tx, _) = watch::channel(JobPhase::Idle);
        Self {
            inner: Arc::new(Inner {
                deps,
                sink,
                metrics: MetricsCollector::new(),
                state: Mutex::new(JobState::default()),
                admission: Mutex::new(()),
                phase_tx,
            }),
        }
    }

    /// Starts a job over `targets × cycles`.
    ///
    /// Returns once the strategy is initialised and dispatch has begun.
    ///
    /// # Errors
    ///
    /// - `JobError::AlreadyRunning` while a job is running or stopping; the
    ///   existing job is untouched
    /// - `JobError::MalformedBatch` for an empty batch, zero cycles or a
    ///   target that is not an http(s) URL
    /// - `JobError::Init` when settings are invalid or the strategy cannot
    ///   be prepared
    pub async fn start_job(
        &self,
        targets: Vec<String>,
        cycles: u32,
        settings: JobSettings,
    ) -> Result<Uuid, JobError> {
        let _admission = self.inner.admission.lock().await;

        if self.inner.state.lock().await.phase != JobPhase::Idle {
            return Err(JobError::AlreadyRunning);
        }

        let batch = BatchSpec::new(targets, cycles)?;
        settings
            .validate()
            .map_err(|e| InitError::InvalidConfig(e.to_string()))?;

        let strategy = Arc::new(IdentityStrategy::initialize(&settings, &self.inner.deps).await?);
        let max_concurrency = strategy.max_concurrency(settings.threads).await;
        let job_id = Uuid::new_v4();
        let queue = batch.build_queue();
        let total = queue.len();

        {
            let mut state = self.inner.state.lock().await;
            *state = JobState {
                job_id: Some(job_id),
                phase: JobPhase::Running,
                queue,
                active_workers: 0,
                max_concurrency,
                counters: JobCounters::default(),
                timings: settings.timings.clone(),
                strategy: Some(strategy.clone()),
            };
            self.inner.phase_tx.send_replace(JobPhase::Running);
            self.inner.metrics.update_queue_depth(total);
            self.inner.sink.emit(JobEvent::status(
                job_id,
                JobStatus::Started,
                JobPhase::Running,
                format!(
                    "Job started: {} tasks, strategy {}, concurrency {}",
                    total,
                    strategy.kind(),
                    max_concurrency
                ),
                0.0,
            ));
        }

        info!(
            job_id = %job_id,
            tasks = total,
            cycles,
            strategy = %strategy.kind(),
            max_concurrency,
            "Job started"
        );

        let orchestrator = self.clone();
        let timings = settings.timings.clone();
        tokio::spawn(async move {
            match strategy.wave_capacity() {
                Some(capacity) => {
                    orchestrator
                        .run_waves(job_id, strategy, timings, capacity)
                        .await
                }
                None => {
                    orchestrator
                        .run_dispatch(job_id, strategy, timings, max_concurrency)
                        .await
                }
            }
        });

        Ok(job_id)
    }

    /// Requests a cooperative stop.
    ///
    /// Pending tasks are dropped at once; in-flight workers finish. The
    /// strategy is shut down after the stop grace period. No-op unless a job
    /// is running.
    pub async fn stop_job(&self) {
        let mut state = self.inner.state.lock().await;
        if state.phase != JobPhase::Running {
            debug!(phase = %state.phase, "Stop requested with no running job");
            return;
        }
        let Some(job_id) = state.job_id else {
            return;
        };

        let dropped = state.queue.len();
        state.queue.clear();
        state.phase = JobPhase::Stopping;
        self.inner.phase_tx.send_replace(JobPhase::Stopping);
        self.inner.metrics.update_queue_depth(0);

        info!(job_id = %job_id, dropped, active = state.active_workers, "Stopping job");
        self.inner.sink.emit(JobEvent::status(
            job_id,
            JobStatus::Stopping,
            JobPhase::Stopping,
            format!(
                "Stopping: {} queued tasks dropped, {} in flight",
                dropped, state.active_workers
            ),
            state.progress(),
        ));

        if let Some(strategy) = state.strategy.clone() {
            let grace = state.timings.stop_grace();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                strategy.shutdown().await;
            });
        }

        // A job with nothing in flight is done right away.
        if let Some(strategy) = self.complete_if_drained(&mut state) {
            drop(state);
            strategy.shutdown().await;
        }
    }

    pub async fn status(&self) -> JobSnapshot {
        let (snapshot, strategy) = {
            let state = self.inner.state.lock().await;
            (
                JobSnapshot {
                    job_id: state.job_id,
                    phase: state.phase,
                    queued: state.queue.len(),
                    active_workers: state.active_workers,
                    max_concurrency: state.max_concurrency,
                    counters: state.counters,
                    progress: state.progress(),
                    strategy: None,
                },
                state.strategy.clone(),
            )
        };

        match strategy {
            Some(strategy) => JobSnapshot {
                strategy: Some(strategy.status().await),
                ..snapshot
            },
            None => snapshot,
        }
    }

    pub fn phase(&self) -> JobPhase {
        *self.inner.phase_tx.borrow()
    }

    /// Resolves once the orchestrator is idle.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.phase_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|phase| *phase == JobPhase::Idle).await;
    }

    async fn run_dispatch(
        self,
        job_id: Uuid,
        strategy: Arc<IdentityStrategy>,
        timings: SchedulerTimings,
        max_concurrency: usize,
    ) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

        loop {
            loop {
                let task = {
                    let mut state = self.inner.state.lock().await;
                    if !state.is_current(job_id)
                        || state.phase != JobPhase::Running
                        || state.active_workers >= max_concurrency
                    {
                        None
                    } else {
                        let task = state.queue.pop_front();
                        if task.is_some() {
                            state.active_workers += 1;
                            self.inner.metrics.update_workers(state.active_workers);
                            self.inner.metrics.update_queue_depth(state.queue.len());
                        }
                        task
                    }
                };
                let Some(task) = task else {
                    break;
                };

                let worker = self.clone();
                let strategy = strategy.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let record = execute_task(&worker.inner.metrics, &strategy, &task).await;
                    worker.finish_task(job_id, &strategy, record).await;
                    // Ignore send errors - the loop exits once the job is over
                    let _ = done_tx.send(());
                });

                tokio::time::sleep(timings.stagger()).await;
            }

            {
                let mut state = self.inner.state.lock().await;
                if !state.is_current(job_id) || state.phase == JobPhase::Idle {
                    return;
                }
                if let Some(strategy) = self.complete_if_drained(&mut state) {
                    drop(state);
                    strategy.shutdown().await;
                    return;
                }
            }

            if done_rx.recv().await.is_none() {
                return;
            }
            tokio::time::sleep(timings.reentry_delay()).await;
        }
    }

    async fn run_waves(
        self,
        job_id: Uuid,
        strategy: Arc<IdentityStrategy>,
        timings: SchedulerTimings,
        capacity: usize,
    ) {
        let mut wave_number = 0u64;
        loop {
            let wave: Vec<Task> = {
                let mut state = self.inner.state.lock().await;
                if !state.is_current(job_id) || state.phase == JobPhase::Idle {
                    return;
                }
                if let Some(strategy) = self.complete_if_drained(&mut state) {
                    drop(state);
                    strategy.shutdown().await;
                    return;
                }
                if state.phase != JobPhase::Running {
                    Vec::new()
                } else {
                    let size = capacity.min(state.queue.len());
                    let wave: Vec<Task> = state.queue.drain(..size).collect();
                    state.active_workers += wave.len();
                    self.inner.metrics.update_workers(state.active_workers);
                    self.inner.metrics.update_queue_depth(state.queue.len());
                    wave
                }
            };

            if wave.is_empty() {
                return;
            }

            wave_number += 1;
            info!(job_id = %job_id, wave = wave_number, tasks = wave.len(), "Launching wave");

            for (task, identity, result) in strategy.run_wave(wave).await {
                let outcome = VisitOutcome::classify(&result);
                let log = describe(&task, &identity.describe(), outcome, result.error.as_deref());
                self.inner
                    .metrics
                    .record_visit(strategy.kind().as_str(), outcome.as_str());
                self.finish_task(job_id, &strategy, TaskRecord { outcome, log })
                    .await;
            }

            {
                let state = self.inner.state.lock().await;
                if !state.is_current(job_id) || state.phase == JobPhase::Idle {
                    return;
                }
            }
            tokio::time::sleep(timings.wave_cooldown()).await;
        }
    }

    /// Counts a finished task, emits progress and completes the job when it
    /// is drained.
    async fn finish_task(&self, job_id: Uuid, strategy: &IdentityStrategy, record: TaskRecord) {
        let identity = strategy.status().await;

        let mut state = self.inner.state.lock().await;
        if !state.is_current(job_id) || state.phase == JobPhase::Idle {
            warn!(job_id = %job_id, "Dropping result for a finished job");
            return;
        }

        state.active_workers = state.active_workers.saturating_sub(1);
        state.counters.record(record.outcome);
        self.inner.metrics.update_workers(state.active_workers);

        self.inner.sink.emit(JobEvent::Progress(ProgressReport {
            job_id,
            processed: state.counters.processed,
            succeeded: state.counters.succeeded,
            failed: state.counters.failed,
            abandoned: state.counters.abandoned,
            active_workers: state.active_workers,
            queued: state.queue.len(),
            progress: state.progress(),
            log: record.log,
            identity: Some(identity),
            timestamp: Utc::now(),
        }));

        if let Some(strategy) = self.complete_if_drained(&mut state) {
            drop(state);
            strategy.shutdown().await;
        }
    }

    /// Moves the job to `Idle` when nothing is queued (or a stop is pending)
    /// and no worker is in flight. Emits the terminal status and returns the
    /// strategy for shutdown; `None` when the job is not drained.
    fn complete_if_drained(&self, state: &mut JobState) -> Option<Arc<IdentityStrategy>> {
        if state.phase == JobPhase::Idle || state.active_workers > 0 {
            return None;
        }
        if state.phase == JobPhase::Running && !state.queue.is_empty() {
            return None;
        }
        let job_id = state.job_id?;

        let status = match state.phase {
            JobPhase::Stopping => JobStatus::Stopped,
            _ => JobStatus::Completed,
        };
        state.phase = JobPhase::Idle;
        state.queue.clear();
        let strategy = state.strategy.take();

        let counters = state.counters;
        let (message, progress) = match status {
            JobStatus::Completed => (
                format!(
                    "Job completed: {} processed, {} succeeded, {} failed, {} abandoned",
                    counters.processed, counters.succeeded, counters.failed, counters.abandoned
                ),
                100.0,
            ),
            _ => (
                format!("Job stopped after {} processed", counters.processed),
                state.progress(),
            ),
        };

        info!(
            job_id = %job_id,
            status = status.as_str(),
            processed = counters.processed,
            succeeded = counters.succeeded,
            failed = counters.failed,
            "Job finished"
        );
        self.inner.metrics.record_job_finished(status.as_str());
        self.inner.metrics.update_workers(0);
        self.inner.metrics.update_queue_depth(0);
        self.inner
            .sink
            .emit(JobEvent::status(job_id, status, JobPhase::Idle, message, progress));
        self.inner.phase_tx.send_replace(JobPhase::Idle);

        strategy
    }
}

/// Runs one task: acquire, rotate, visit, classify, and for health-tracked
/// strategies update health and retry once directly.
async fn execute_task(metrics: &MetricsCollector, strategy: &IdentityStrategy, task: &Task) -> TaskRecord {
    let kind = strategy.kind();

    let Some(identity) = strategy.acquire_identity(task).await else {
        metrics.record_visit(kind.as_str(), VisitOutcome::Abandoned.as_str());
        return TaskRecord {
            outcome: VisitOutcome::Abandoned,
            log: format!("Skipped {} [cycle {}]: no identity available", task.target, task.cycle_index),
        };
    };

    let identity = strategy.rotate_if_due(identity).await;
    let result = strategy.run_visit(task, &identity).await;
    let mut outcome = VisitOutcome::classify(&result);
    let mut log = describe(task, &identity.describe(), outcome, result.error.as_deref());

    if strategy.is_health_tracked() {
        match outcome {
            VisitOutcome::Success => strategy.record_success(&identity).await,
            VisitOutcome::Retryable => {
                strategy.record_failure(&identity).await;
                if !identity.is_direct() {
                    metrics.record_direct_retry();
                    let retry = strategy.run_direct(task).await;
                    outcome = VisitOutcome::classify(&retry);
                    log = format!(
                        "{}; retried direct: {}",
                        log,
                        retry.error.as_deref().unwrap_or("ok")
                    );
                }
            }
            _ => {}
        }
    }

    strategy.release(&identity).await;
    metrics.record_visit(kind.as_str(), outcome.as_str());
    TaskRecord { outcome, log }
}

fn describe(task: &Task, route: &str, outcome: VisitOutcome, error: Option<&str>) -> String {
    match outcome {
        VisitOutcome::Success => format!(
            "Visited {} [cycle {}] via {}",
            task.target, task.cycle_index, route
        ),
        _ => format!(
            "Failed {} [cycle {}] via {}: {}",
            task.target,
            task.cycle_index,
            route,
            error.unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RotationTimings, StrategySettings};
    use crate::identity::{Identity, ProxyEndpoint, ProxyPool, RelayService};
    use crate::testing::{ScriptedBridge, ScriptedDriver, ScriptedProbe};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        events: std::sync::Mutex<Vec<JobEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<JobEvent> {
            self.events.lock().expect("sink lock").clone()
        }

        fn statuses(&self) -> Vec<JobStatus> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    JobEvent::Status { status, .. } => Some(status),
                    JobEvent::Progress(_) => None,
                })
                .collect()
        }
    }

    impl ProgressSink for RecordingSink {
        fn emit(&self, event: JobEvent) {
            self.events.lock().expect("sink lock").push(event);
        }
    }

    struct Harness {
        orchestrator: JobOrchestrator,
        driver: Arc<ScriptedDriver>,
        sink: Arc<RecordingSink>,
    }

    fn harness_with(driver: ScriptedDriver, bridge: ScriptedBridge, pool: ProxyPool) -> Harness {
        let driver = Arc::new(driver);
        let sink = Arc::new(RecordingSink::default());
        let deps = StrategyDeps {
            driver: driver.clone(),
            probe: Arc::new(ScriptedProbe::new(vec![Some("10.0.0.1")])),
            bridge: Arc::new(bridge),
            proxy_pool: Arc::new(pool),
        };
        Harness {
            orchestrator: JobOrchestrator::new(deps, sink.clone()),
            driver,
            sink,
        }
    }

    fn harness(driver: ScriptedDriver) -> Harness {
        harness_with(driver, ScriptedBridge::with_devices(&[]), ProxyPool::new())
    }

    fn settings(strategy: StrategySettings, threads: usize) -> JobSettings {
        JobSettings::new(strategy)
            .with_threads(threads)
            .with_timings(SchedulerTimings::immediate())
            .with_rotation(RotationTimings::immediate())
    }

    fn direct_settings(threads: usize) -> JobSettings {
        settings(StrategySettings::ProxyPool { proxy_file: None }, threads)
    }

    fn urls(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("https://{}.test/", n)).collect()
    }

    #[tokio::test]
    async fn test_runs_tasks_in_cycle_major_order() {
        let h = harness(ScriptedDriver::new());
        h.orchestrator
            .start_job(urls(&["a", "b"]), 2, direct_settings(1))
            .await
            .expect("job should start");
        h.orchestrator.wait_idle().await;

        let visited: Vec<String> = h.driver.visits().into_iter().map(|(url, _)| url).collect();
        assert_eq!(
            visited,
            vec![
                "https://a.test/",
                "https://b.test/",
                "https://a.test/",
                "https://b.test/"
            ]
        );
    }

    #[tokio::test]
    async fn test_completion_counts_every_task() {
        let h = harness(ScriptedDriver::new());
        h.orchestrator
            .start_job(urls(&["a", "b", "c"]), 2, direct_settings(3))
            .await
            .expect("job should start");
        h.orchestrator.wait_idle().await;

        let snapshot = h.orchestrator.status().await;
        assert_eq!(snapshot.phase, JobPhase::Idle);
        assert_eq!(snapshot.counters.processed, 6);
        assert_eq!(snapshot.counters.succeeded, 6);
        assert_eq!(snapshot.active_workers, 0);
        assert_eq!(snapshot.queued, 0);

        assert_eq!(
            h.sink.statuses(),
            vec![JobStatus::Started, JobStatus::Completed]
        );
        match h.sink.events().last() {
            Some(JobEvent::Status { progress, .. }) => assert_eq!(*progress, 100.0),
            other => panic!("unexpected last event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_events_are_monotonic() {
        let h = harness(ScriptedDriver::new());
        h.orchestrator
            .start_job(urls(&["a", "b", "c", "d"]), 1, direct_settings(2))
            .await
            .expect("job should start");
        h.orchestrator.wait_idle().await;

        let processed: Vec<usize> = h
            .sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                JobEvent::Progress(report) => Some(report.processed),
                _ => None,
            })
            .collect();
        assert_eq!(processed, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let h = harness(ScriptedDriver::new().with_delay(Duration::from_millis(200)));
        let job_id = h
            .orchestrator
            .start_job(urls(&["a", "b", "c", "d", "e"]), 1, direct_settings(2))
            .await
            .expect("job should start");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let before = h.orchestrator.status().await;
        assert_eq!(before.active_workers, 2);
        assert_eq!(before.queued, 3);

        let second = h
            .orchestrator
            .start_job(urls(&["x", "y"]), 3, direct_settings(4))
            .await;
        assert!(matches!(second, Err(JobError::AlreadyRunning)));

        let after = h.orchestrator.status().await;
        assert_eq!(after.job_id, Some(job_id));
        assert_eq!(after.phase, JobPhase::Running);
        assert_eq!(after.queued, before.queued);
        assert_eq!(after.active_workers, before.active_workers);
        assert_eq!(after.max_concurrency, before.max_concurrency);
        assert_eq!(after.counters, before.counters);

        h.orchestrator.wait_idle().await;
        assert_eq!(h.orchestrator.status().await.counters.processed, 5);
    }

    #[tokio::test]
    async fn test_stop_drops_queue_and_drains() {
        let h = harness(ScriptedDriver::new().with_delay(Duration::from_millis(200)));
        h.orchestrator
            .start_job(urls(&["a", "b", "c", "d", "e"]), 2, direct_settings(2))
            .await
            .expect("job should start");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let before = h.orchestrator.status().await;
        assert_eq!(before.active_workers, 2);
        assert_eq!(before.queued, 8);

        h.orchestrator.stop_job().await;
        let after = h.orchestrator.status().await;
        assert_eq!(after.phase, JobPhase::Stopping);
        assert_eq!(after.queued, 0);
        assert_eq!(after.active_workers, before.active_workers);
        assert_eq!(after.counters, before.counters);

        let stopping_progress = h.sink.events().into_iter().find_map(|event| match event {
            JobEvent::Status {
                status: JobStatus::Stopping,
                progress,
                ..
            } => Some(progress),
            _ => None,
        });
        let stopping_progress = stopping_progress.expect("stopping event emitted");
        assert!(stopping_progress < 100.0);

        h.orchestrator.wait_idle().await;
        let snapshot = h.orchestrator.status().await;
        assert_eq!(snapshot.phase, JobPhase::Idle);
        assert_eq!(snapshot.active_workers, 0);
        assert_eq!(snapshot.counters.processed, 2);
        assert_eq!(h.sink.statuses().last(), Some(&JobStatus::Stopped));
    }

    #[tokio::test]
    async fn test_stop_without_job_is_noop() {
        let h = harness(ScriptedDriver::new());
        h.orchestrator.stop_job().await;
        assert_eq!(h.orchestrator.phase(), JobPhase::Idle);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_batch_leaves_idle() {
        let h = harness(ScriptedDriver::new());
        let result = h
            .orchestrator
            .start_job(Vec::new(), 1, direct_settings(1))
            .await;
        assert!(matches!(result, Err(JobError::MalformedBatch(_))));

        let result = h
            .orchestrator
            .start_job(urls(&["a"]), 0, direct_settings(1))
            .await;
        assert!(matches!(result, Err(JobError::MalformedBatch(_))));
        assert_eq!(h.orchestrator.phase(), JobPhase::Idle);
    }

    #[tokio::test]
    async fn test_init_failure_leaves_idle() {
        let h = harness(ScriptedDriver::new());
        let tunnel = StrategySettings::Tunnel {
            endpoints: Vec::new(),
            rotate_every: 5,
        };
        let result = h
            .orchestrator
            .start_job(urls(&["a"]), 1, settings(tunnel, 1))
            .await;
        assert!(matches!(result, Err(JobError::Init(_))));

        let result = h
            .orchestrator
            .start_job(urls(&["a"]), 1, settings(StrategySettings::single_device_defaults(), 1))
            .await;
        assert!(matches!(
            result,
            Err(JobError::Init(InitError::DeviceNotConnected))
        ));
        assert_eq!(h.orchestrator.phase(), JobPhase::Idle);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_failing_proxy_is_quarantined() {
        let pool = ProxyPool::with_proxies(vec![
            ProxyEndpoint::new("bad.proxy", 8080),
            ProxyEndpoint::new("good.proxy", 8080),
        ]);
        let driver = ScriptedDriver::new().failing("bad.proxy", "Proxy connection failed");
        let h = harness_with(driver, ScriptedBridge::with_devices(&[]), pool);

        let targets: Vec<String> = (0..30).map(|i| format!("https://t{}.test/", i)).collect();
        h.orchestrator
            .start_job(targets, 1, direct_settings(1))
            .await
            .expect("job should start");
        h.orchestrator.wait_idle().await;

        let visits = h.driver.visits();
        let bad = visits
            .iter()
            .filter(|(_, identity)| identity.key() == "bad.proxy")
            .count();
        let direct = visits
            .iter()
            .filter(|(_, identity)| matches!(identity, Identity::Direct))
            .count();
        assert!(bad <= 3, "bad proxy used {} times", bad);
        // Every proxy failure gets one direct retry.
        assert_eq!(direct, bad);

        let snapshot = h.orchestrator.status().await;
        assert_eq!(snapshot.counters.processed, 30);
        assert_eq!(snapshot.counters.succeeded, 30);
    }

    #[tokio::test]
    async fn test_tunnel_runs_one_at_a_time() {
        let h = harness(ScriptedDriver::new());
        let tunnel = StrategySettings::Tunnel {
            endpoints: vec![
                crate::identity::TunnelEndpoint::named("Germany"),
                crate::identity::TunnelEndpoint::named("France"),
            ],
            rotate_every: 2,
        };
        h.orchestrator
            .start_job(urls(&["a", "b", "c", "d"]), 1, settings(tunnel, 8))
            .await
            .expect("job should start");
        assert_eq!(h.orchestrator.status().await.max_concurrency, 1);
        h.orchestrator.wait_idle().await;

        let routes: Vec<String> = h
            .driver
            .visits()
            .into_iter()
            .map(|(_, identity)| identity.key())
            .collect();
        assert_eq!(routes, vec!["Germany", "Germany", "France", "France"]);
    }

    #[tokio::test]
    async fn test_single_device_rotates_between_visits() {
        let bridge = ScriptedBridge::with_devices(&["dev1"]);
        let h = harness_with(ScriptedDriver::new(), bridge, ProxyPool::new());
        let strategy = StrategySettings::SingleDevice {
            device_id: None,
            rotate_every: 2,
            toggle: Default::default(),
        };
        h.orchestrator
            .start_job(urls(&["a", "b", "c"]), 1, settings(strategy, 1))
            .await
            .expect("job should start");
        h.orchestrator.wait_idle().await;

        let snapshot = h.orchestrator.status().await;
        assert_eq!(snapshot.counters.processed, 3);
        let visits = h.driver.visits();
        assert!(visits
            .iter()
            .all(|(_, identity)| matches!(identity, Identity::Device(_))));
    }

    #[tokio::test]
    async fn test_relay_wave_processes_every_task() {
        let h = harness(ScriptedDriver::new());
        let strategy = StrategySettings::RelayWave {
            relays: vec![
                RelayService::new("r1", "https://r1.test/?u={url}"),
                RelayService::new("r2", "https://r2.test/?u={url}"),
            ],
            browsers: 1,
            tabs: 2,
            rotate_every: 10,
        };
        h.orchestrator
            .start_job(urls(&["a", "b", "c", "d", "e"]), 1, settings(strategy, 1))
            .await
            .expect("job should start");
        h.orchestrator.wait_idle().await;

        let snapshot = h.orchestrator.status().await;
        assert_eq!(snapshot.counters.processed, 5);
        assert_eq!(snapshot.counters.succeeded, 5);

        let visits = h.driver.visits();
        assert_eq!(visits.len(), 5);
        assert!(visits
            .iter()
            .all(|(_, identity)| matches!(identity, Identity::Relay(_))));
        assert_eq!(h.sink.statuses().last(), Some(&JobStatus::Completed));
    }

    #[test]
    fn test_counters_include_abandoned_in_processed() {
        let mut counters = JobCounters::default();
        counters.record(VisitOutcome::Success);
        counters.record(VisitOutcome::Abandoned);
        counters.record(VisitOutcome::Retryable);
        counters.record(VisitOutcome::NonRetryable);
        assert_eq!(
            counters,
            JobCounters {
                processed: 4,
                succeeded: 1,
                failed: 2,
                abandoned: 1,
            }
        );
    }
}
