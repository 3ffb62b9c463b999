//! Worker runtime: claims jobs from the gateway, probes them, classifies the
//! result and reports it back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::models::job::{ClaimedJob, Provider};
use crate::models::verification::ResultSubmission;
use crate::services::classifier::{ClassifierRegistry, Verdict};
use crate::services::gateway_client::JobGateway;
use crate::services::probe::ProbeDriver;

/// Extra time granted on top of the probe budget before a job is abandoned.
const JOB_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub concurrent_jobs: usize,
    pub poll_interval: Duration,
    /// Upper bound on one probe, measured by the runtime.
    pub job_timeout: Duration,
    pub stats_interval: Duration,
    pub submit_attempts: u32,
    pub submit_backoff: Duration,
}

impl From<&WorkerConfig> for RuntimeSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrent_jobs: config.concurrent_jobs.max(1),
            poll_interval: config.poll_interval(),
            job_timeout: config.probe_timeout() + config.settle_delay() + JOB_TIMEOUT_GRACE,
            stats_interval: config.stats_interval(),
            submit_attempts: 3,
            submit_backoff: Duration::from_millis(500),
        }
    }
}

/// Counters local to this worker process.
pub struct WorkerCounters {
    started: Instant,
    processed: AtomicU64,
    valid: AtomicU64,
    bounced: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub valid: u64,
    pub bounced: u64,
    pub errors: u64,
    pub uptime: Duration,
    pub per_minute: f64,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            valid: AtomicU64::new(0),
            bounced: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record(&self, verdict: &Verdict) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let bucket = match verdict {
            Verdict::Valid { .. } => &self.valid,
            Verdict::StrongBounce { .. } => &self.bounced,
            Verdict::Error { .. } => &self.errors,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let uptime = self.started.elapsed();
        let processed = self.processed.load(Ordering::Relaxed);
        let minutes = uptime.as_secs_f64() / 60.0;

        StatsSnapshot {
            processed,
            valid: self.valid.load(Ordering::Relaxed),
            bounced: self.bounced.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime,
            per_minute: if minutes > 0.0 {
                processed as f64 / minutes
            } else {
                0.0
            },
        }
    }
}

impl Default for WorkerCounters {
    fn default() -> Self {
        Self::new()
    }
}

struct RuntimeInner {
    gateway: Arc<dyn JobGateway>,
    driver: Arc<dyn ProbeDriver>,
    classifiers: ClassifierRegistry,
    settings: RuntimeSettings,
    counters: WorkerCounters,
}

/// Bounded-concurrency job loop.
///
/// Keeps up to `concurrent_jobs` probes in flight, claims again as soon as a
/// slot frees up and waits `poll_interval` while the queue is empty. On
/// shutdown it stops claiming and lets in-flight jobs finish and report.
#[derive(Clone)]
pub struct WorkerRuntime {
    inner: Arc<RuntimeInner>,
}

impl WorkerRuntime {
    pub fn new(
        gateway: Arc<dyn JobGateway>,
        driver: Arc<dyn ProbeDriver>,
        classifiers: ClassifierRegistry,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                gateway,
                driver,
                classifiers,
                settings,
                counters: WorkerCounters::new(),
            }),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.counters.snapshot()
    }

    /// Run until `shutdown` is cancelled and all in-flight jobs have finished.
    pub async fn run(&self, shutdown: CancellationToken) -> StatsSnapshot {
        let settings = &self.inner.settings;
        let mut in_flight: JoinSet<()> = JoinSet::new();

        let mut poll = tokio::time::interval_at(
            tokio::time::Instant::now() + settings.poll_interval,
            settings.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = tokio::time::interval_at(
            tokio::time::Instant::now() + settings.stats_interval,
            settings.stats_interval,
        );

        tracing::info!(
            concurrent_jobs = settings.concurrent_jobs,
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            job_timeout_ms = settings.job_timeout.as_millis() as u64,
            "Worker runtime started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            self.fill(&mut in_flight).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {}
                _ = report.tick() => log_stats(&self.inner.counters.snapshot(), "Worker stats"),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Job task failed");
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "Shutdown requested, draining in-flight jobs");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job task failed");
            }
        }

        let snapshot = self.inner.counters.snapshot();
        log_stats(&snapshot, "Worker stopped");
        snapshot
    }

    /// Claim jobs until every slot is busy or the queue is empty.
    async fn fill(&self, in_flight: &mut JoinSet<()>) {
        while in_flight.len() < self.inner.settings.concurrent_jobs {
            match self.inner.gateway.next_job().await {
                Ok(Some(job)) => {
                    let inner = self.inner.clone();
                    in_flight.spawn(async move { inner.process(job).await });
                }
                Ok(None) => {
                    tracing::trace!("No pending jobs");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to claim next job");
                    break;
                }
            }
        }
    }
}

impl RuntimeInner {
    async fn process(&self, job: ClaimedJob) {
        let started = Instant::now();
        tracing::info!(job_id = job.id, email = %job.email, provider = %job.provider, "Processing job");

        let verdict = match job.provider() {
            Ok(provider) => self.verify(provider, &job.email).await,
            Err(_) => Verdict::error(format!("Provider {} not supported", job.provider)),
        };
        self.counters.record(&verdict);

        match &verdict {
            Verdict::Error { message } => tracing::warn!(
                job_id = job.id,
                email = %job.email,
                error = %message,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Verification failed"
            ),
            _ => tracing::info!(
                job_id = job.id,
                email = %job.email,
                result = %verdict.outcome(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Verification finished"
            ),
        }

        self.report(verdict.into_submission(job.id)).await;
    }

    /// Probe on a separate task so a panic or an overrun becomes an error verdict.
    async fn verify(&self, provider: Provider, email: &str) -> Verdict {
        let driver = self.driver.clone();
        let address = email.to_string();
        let mut probe = tokio::spawn(async move { driver.probe(provider, &address).await });

        let signal = match tokio::time::timeout(self.settings.job_timeout, &mut probe).await {
            Ok(Ok(Ok(signal))) => signal,
            Ok(Ok(Err(e))) => return Verdict::error(e.to_string()),
            Ok(Err(e)) => return Verdict::error(format!("Probe task failed: {}", e)),
            Err(_) => {
                probe.abort();
                return Verdict::error(format!(
                    "Probe timed out after {} ms",
                    self.settings.job_timeout.as_millis()
                ));
            }
        };

        self.classifiers.classify(provider, &signal)
    }

    async fn report(&self, submission: ResultSubmission) {
        let attempts = self.settings.submit_attempts.max(1);

        for attempt in 1..=attempts {
            match self.gateway.submit_result(&submission).await {
                Ok(()) => return,
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        job_id = submission.id,
                        attempt = attempt,
                        error = %e,
                        "Failed to submit result, retrying"
                    );
                    tokio::time::sleep(self.settings.submit_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = submission.id,
                        attempt = attempt,
                        error = %e,
                        "Failed to submit result; job stays in processing"
                    );
                    return;
                }
            }
        }
    }
}

fn log_stats(snapshot: &StatsSnapshot, message: &str) {
    tracing::info!(
        processed = snapshot.processed,
        valid = snapshot.valid,
        bounced = snapshot.bounced,
        errors = snapshot.errors,
        uptime_secs = snapshot.uptime.as_secs(),
        per_minute = snapshot.per_minute,
        "{}",
        message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{VerificationOutcome, WorkerStats};
    use crate::services::classifier::Signal;
    use crate::services::gateway_client::GatewayError;
    use crate::services::probe::ProbeError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        jobs: Mutex<VecDeque<ClaimedJob>>,
        submitted: Mutex<Vec<ResultSubmission>>,
        failing_submits: AtomicU32,
        submit_calls: AtomicU32,
        claim_calls: AtomicU32,
    }

    impl FakeGateway {
        fn with_jobs(jobs: Vec<(&str, &str)>) -> Arc<Self> {
            let jobs = jobs
                .into_iter()
                .enumerate()
                .map(|(i, (email, provider))| ClaimedJob {
                    id: i as i64 + 1,
                    email: email.to_string(),
                    provider: provider.to_string(),
                    attempts: 1,
                })
                .collect();
            Arc::new(Self {
                jobs: Mutex::new(jobs),
                ..Default::default()
            })
        }

        fn submitted(&self) -> Vec<ResultSubmission> {
            let mut out = self.submitted.lock().unwrap().clone();
            out.sort_by_key(|s| s.id);
            out
        }
    }

    #[async_trait]
    impl JobGateway for FakeGateway {
        async fn next_job(&self) -> Result<Option<ClaimedJob>, GatewayError> {
            self.claim_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.jobs.lock().unwrap().pop_front())
        }

        async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), GatewayError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_submits.load(Ordering::SeqCst) > 0 {
                self.failing_submits.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::Rejected {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.submitted.lock().unwrap().push(submission.clone());
            Ok(())
        }

        async fn worker_stats(&self) -> Result<WorkerStats, GatewayError> {
            Ok(WorkerStats::default())
        }
    }

    /// Behaviour is picked from the local part of the address.
    #[derive(Default)]
    struct FakeDriver {
        delay: Duration,
        calls: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeDriver {
        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ProbeDriver for FakeDriver {
        async fn probe(&self, _provider: Provider, email: &str) -> Result<Signal, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            if email.starts_with("slow@") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            if email.starts_with("panic@") {
                panic!("browser crashed");
            }
            if email.starts_with("broken@") {
                return Err(ProbeError::Timeout(Duration::from_millis(10)));
            }

            let page_source = if email.starts_with("ghost@") {
                "<html><body><div id=\"usernameError\">This username may be incorrect.</div></body></html>"
            } else {
                "<html><body><input type=\"password\" name=\"passwd\"></body></html>"
            };
            Ok(Signal {
                page_source: page_source.to_string(),
                current_url: "https://login.microsoftonline.com/common/login".to_string(),
            })
        }
    }

    fn settings(concurrent_jobs: usize) -> RuntimeSettings {
        RuntimeSettings {
            concurrent_jobs,
            poll_interval: Duration::from_millis(10),
            job_timeout: Duration::from_millis(500),
            stats_interval: Duration::from_secs(60),
            submit_attempts: 3,
            submit_backoff: Duration::from_millis(5),
        }
    }

    /// Run until `expected` results have been submitted, then shut down.
    async fn run_until(
        gateway: Arc<FakeGateway>,
        driver: Arc<FakeDriver>,
        settings: RuntimeSettings,
        expected: usize,
    ) -> StatsSnapshot {
        let runtime = WorkerRuntime::new(
            gateway.clone(),
            driver,
            ClassifierRegistry::default(),
            settings,
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let runtime = runtime.clone();
            let shutdown = shutdown.clone();
            async move { runtime.run(shutdown).await }
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            while gateway.submitted.lock().unwrap().len() < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs were not reported in time");

        shutdown.cancel();
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn test_processes_jobs_within_concurrency_bound() {
        let gateway = FakeGateway::with_jobs(vec![
            ("a@x.com", "office365"),
            ("ghost@x.com", "office365"),
            ("b@x.com", "office365"),
            ("c@x.com", "office365"),
            ("ghost@y.com", "office365"),
            ("d@x.com", "office365"),
        ]);
        let driver = FakeDriver::with_delay(Duration::from_millis(40));

        let stats = run_until(gateway.clone(), driver.clone(), settings(2), 6).await;

        let submitted = gateway.submitted();
        assert_eq!(submitted.len(), 6);
        assert_eq!(submitted[0].result, VerificationOutcome::Valid);
        assert_eq!(submitted[1].result, VerificationOutcome::StrongBounce);
        assert_eq!(submitted[4].result, VerificationOutcome::StrongBounce);
        assert_eq!(driver.peak.load(Ordering::SeqCst), 2);

        assert_eq!(stats.processed, 6);
        assert_eq!(stats.valid, 4);
        assert_eq!(stats.bounced, 2);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_unsupported_provider_reports_error_without_probing() {
        let gateway = FakeGateway::with_jobs(vec![("a@yahoo.com", "yahoo")]);
        let driver = FakeDriver::with_delay(Duration::ZERO);

        run_until(gateway.clone(), driver.clone(), settings(1), 1).await;

        let submitted = gateway.submitted();
        assert_eq!(submitted[0].result, VerificationOutcome::Error);
        assert_eq!(
            submitted[0].error_message.as_deref(),
            Some("Provider yahoo not supported")
        );
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_failures_become_error_verdicts() {
        let gateway = FakeGateway::with_jobs(vec![
            ("broken@x.com", "office365"),
            ("panic@x.com", "office365"),
            ("slow@x.com", "office365"),
            ("a@x.com", "gmail"),
        ]);
        let driver = FakeDriver::with_delay(Duration::ZERO);

        let stats = run_until(gateway.clone(), driver, settings(4), 4).await;

        let submitted = gateway.submitted();
        assert_eq!(submitted[0].result, VerificationOutcome::Error);
        assert_eq!(
            submitted[0].error_message.as_deref(),
            Some("Probe timed out after 10 ms")
        );
        assert_eq!(submitted[1].result, VerificationOutcome::Error);
        assert!(submitted[1]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Probe task failed"));
        assert_eq!(
            submitted[2].error_message.as_deref(),
            Some("Probe timed out after 500 ms")
        );
        assert_eq!(submitted[3].result, VerificationOutcome::Valid);
        assert_eq!(stats.errors, 3);
    }

    #[tokio::test]
    async fn test_submit_is_retried_on_server_errors() {
        let gateway = FakeGateway::with_jobs(vec![("a@x.com", "office365")]);
        gateway.failing_submits.store(2, Ordering::SeqCst);
        let driver = FakeDriver::with_delay(Duration::ZERO);

        run_until(gateway.clone(), driver, settings(1), 1).await;

        assert_eq!(gateway.submit_calls.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_jobs() {
        let gateway = FakeGateway::with_jobs(vec![("a@x.com", "office365")]);
        let driver = FakeDriver::with_delay(Duration::from_millis(150));
        let runtime = WorkerRuntime::new(
            gateway.clone(),
            driver.clone(),
            ClassifierRegistry::default(),
            settings(1),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let runtime = runtime.clone();
            let shutdown = shutdown.clone();
            async move { runtime.run(shutdown).await }
        });

        while driver.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        let stats = handle.await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(gateway.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_no_claims_after_shutdown() {
        let gateway = FakeGateway::with_jobs(vec![("a@x.com", "office365")]);
        let driver = FakeDriver::with_delay(Duration::ZERO);
        let runtime = WorkerRuntime::new(
            gateway.clone(),
            driver.clone(),
            ClassifierRegistry::default(),
            settings(1),
        );

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = runtime.run(shutdown).await;

        assert_eq!(stats.processed, 0);
        assert_eq!(gateway.jobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_is_polled_once_per_tick() {
        let gateway = FakeGateway::with_jobs(vec![]);
        let driver = FakeDriver::with_delay(Duration::ZERO);
        let mut settings = settings(4);
        settings.poll_interval = Duration::from_millis(20);
        let runtime = WorkerRuntime::new(
            gateway.clone(),
            driver,
            ClassifierRegistry::default(),
            settings,
        );

        let shutdown = CancellationToken::new();
        let started = Instant::now();
        let handle = tokio::spawn({
            let runtime = runtime.clone();
            let shutdown = shutdown.clone();
            async move { runtime.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // One claim up front plus at most one per elapsed tick.
        let ticks = started.elapsed().as_millis() as u32 / 20;
        let calls = gateway.claim_calls.load(Ordering::SeqCst);
        assert!(calls >= 2, "runtime stopped polling: {} calls", calls);
        assert!(
            calls <= ticks + 2,
            "{} claims in {} ticks on an empty queue",
            calls,
            ticks
        );
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = WorkerCounters::new();
        counters.record(&Verdict::Valid {
            details: String::new(),
        });
        counters.record(&Verdict::error("boom"));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.valid, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.bounced, 0);
    }
}
