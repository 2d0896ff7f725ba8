use super::{JobService, Run, RunOutcome, RunStatus, UpstreamError};
use async_trait::async_trait;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Time source for the poller; tests substitute a manual clock.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 15,
            timeout: Duration::from_secs(20),
        }
    }
}

impl PollConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_u64("RUN_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
            max_attempts: env_u64("RUN_POLL_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_attempts),
            timeout: env_u64("RUN_POLL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
}

/// Drives a run to a terminal status.
///
/// Each check that sees a non-terminal status is followed by a full
/// `interval` sleep. The poll aborts with [`UpstreamError::Timeout`] as soon
/// as either `max_attempts` checks were made or `timeout` has elapsed.
#[derive(Clone)]
pub struct RunPoller {
    config: PollConfig,
    clock: Arc<dyn Clock>,
}

impl RunPoller {
    pub fn new(config: PollConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    pub async fn wait(&self, service: &dyn JobService, run: &Run) -> Result<Run, UpstreamError> {
        let started = self.clock.now();
        let mut attempts = 0u32;
        let mut last_status = run.status;

        loop {
            let elapsed = self.clock.now().saturating_duration_since(started);
            if attempts >= self.config.max_attempts || elapsed >= self.config.timeout {
                return Err(timed_out(run, attempts, elapsed, last_status));
            }

            attempts += 1;
            let current = service.get_run(&run.thread_id, &run.id).await?;
            last_status = current.status;
            debug!(
                target = "buildlist.poller",
                run_id = %run.id,
                attempt = attempts,
                status = %current.status,
                "run_status"
            );

            match current.status.outcome() {
                RunOutcome::Succeeded => {
                    crate::metrics::poll_finished("completed", attempts);
                    return Ok(current);
                }
                RunOutcome::Failed => {
                    crate::metrics::poll_finished("failed", attempts);
                    return Err(UpstreamError::RunFailed {
                        run_id: run.id.clone(),
                        status: current.status,
                    });
                }
                RunOutcome::Pending if attempts >= self.config.max_attempts => {
                    let elapsed = self.clock.now().saturating_duration_since(started);
                    return Err(timed_out(run, attempts, elapsed, last_status));
                }
                RunOutcome::Pending => self.clock.sleep(self.config.interval).await,
            }
        }
    }
}

fn timed_out(run: &Run, attempts: u32, elapsed: Duration, last_status: RunStatus) -> UpstreamError {
    warn!(
        target = "buildlist.poller",
        run_id = %run.id,
        attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        last_status = %last_status,
        "run_poll_timeout"
    );
    crate::metrics::poll_finished("timeout", attempts);
    UpstreamError::Timeout {
        run_id: run.id.clone(),
        attempts,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::testing::{ManualClock, ScriptedJobs};

    fn poller(clock: Arc<ManualClock>, config: PollConfig) -> RunPoller {
        RunPoller::new(config, clock)
    }

    #[tokio::test]
    async fn completes_after_exactly_three_waits() {
        let jobs = ScriptedJobs::with_statuses(&[
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::InProgress,
            RunStatus::Completed,
        ]);
        let clock = Arc::new(ManualClock::new());
        let run = jobs.start_run("thread_test", "asst_test").await.unwrap();

        let done = poller(clock.clone(), PollConfig::default())
            .wait(&jobs, &run)
            .await
            .expect("completed");

        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(clock.sleeps(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
        assert_eq!(jobs.status_checks(), 4);
    }

    #[tokio::test]
    async fn immediate_completion_does_not_sleep() {
        let jobs = ScriptedJobs::with_statuses(&[RunStatus::Completed]);
        let clock = Arc::new(ManualClock::new());
        let run = jobs.start_run("thread_test", "asst_test").await.unwrap();
        poller(clock.clone(), PollConfig::default())
            .wait(&jobs, &run)
            .await
            .expect("completed");
        assert_eq!(clock.sleeps(), 0);
    }

    #[tokio::test]
    async fn attempt_bound_caps_status_checks() {
        let jobs = ScriptedJobs::with_statuses(&[RunStatus::InProgress]);
        let clock = Arc::new(ManualClock::new());
        let run = jobs.start_run("thread_test", "asst_test").await.unwrap();

        let err = poller(clock.clone(), PollConfig::default())
            .wait(&jobs, &run)
            .await
            .expect_err("timeout");

        match err {
            UpstreamError::Timeout { attempts, .. } => assert_eq!(attempts, 15),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(jobs.status_checks(), 15);
        assert_eq!(clock.sleeps(), 14);
        assert_eq!(clock.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test]
    async fn wall_clock_bound_wins_when_reached_first() {
        let jobs = ScriptedJobs::with_statuses(&[RunStatus::Queued]);
        let clock = Arc::new(ManualClock::new());
        let run = jobs.start_run("thread_test", "asst_test").await.unwrap();
        let config = PollConfig {
            interval: Duration::from_secs(2),
            max_attempts: 15,
            timeout: Duration::from_secs(5),
        };

        let err = poller(clock.clone(), config)
            .wait(&jobs, &run)
            .await
            .expect_err("timeout");

        assert!(matches!(err, UpstreamError::Timeout { attempts: 3, .. }));
        assert_eq!(jobs.status_checks(), 3);
        assert!(clock.elapsed() >= config.timeout);
    }

    #[tokio::test]
    async fn failure_terminals_are_classified() {
        for terminal in [RunStatus::Failed, RunStatus::Cancelled, RunStatus::Expired] {
            let jobs = ScriptedJobs::with_statuses(&[RunStatus::InProgress, terminal]);
            let clock = Arc::new(ManualClock::new());
            let run = jobs.start_run("thread_test", "asst_test").await.unwrap();
            let err = poller(clock.clone(), PollConfig::default())
                .wait(&jobs, &run)
                .await
                .expect_err("failed run");
            match err {
                UpstreamError::RunFailed { status, .. } => assert_eq!(status, terminal),
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(clock.sleeps(), 1);
        }
    }

    #[tokio::test]
    async fn status_check_errors_propagate_unchanged() {
        let jobs = ScriptedJobs::with_statuses(&[RunStatus::InProgress]);
        let run = jobs.start_run("thread_test", "asst_test").await.unwrap();
        jobs.fail_on("get_run");
        let err = poller(Arc::new(ManualClock::new()), PollConfig::default())
            .wait(&jobs, &run)
            .await
            .expect_err("unavailable");
        assert!(matches!(err, UpstreamError::Unavailable(_)));
    }
}
