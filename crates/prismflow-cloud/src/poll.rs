//! Bounded polling of backend tasks
//!
//! [`wait_for`] is the one poll loop in the crate. It owns the timing
//! (initial delay, backoff floor, deadline) and leaves the meaning of each
//! observation to a refresh callback, which answers with an explicit
//! [`Refresh`] value. [`TaskPoller`] plugs task-status lookups into it.

use crate::api::{PrismApi, TaskId, TaskState, TaskStatus};
use crate::error::{ApiError, CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Consecutive "not found" observations tolerated before giving up
pub const NOT_FOUND_CHECKS: u32 = 20;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Timing of one wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Overall bound on the wait
    pub timeout: Duration,

    /// Pause before the first observation
    pub delay: Duration,

    /// Minimum pause between two observations
    pub min_timeout: Duration,
}

impl PollConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Replace the overall bound when one is given.
    pub fn with_timeout_override(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            self.timeout = timeout;
        }
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60),
            delay: Duration::from_secs(10),
            min_timeout: Duration::from_secs(3),
        }
    }
}

/// Poll timing per resource family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Subnets, images, security rules, protection rules, recovery plans
    pub default: PollConfig,

    /// Virtual machines, including power transitions
    pub vm: PollConfig,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default: PollConfig::default(),
            vm: PollConfig::new(Duration::from_secs(60)).with_delay(Duration::from_secs(3)),
        }
    }
}

impl Timeouts {
    /// Apply the provider-level wait timeout, in minutes, to the VM family.
    /// Zero keeps the default.
    pub fn with_wait_timeout(mut self, minutes: u64) -> Self {
        if minutes > 0 {
            self.vm.timeout = Duration::from_secs(minutes * 60);
        }
        self
    }
}

/// One observation made by a refresh callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh<T> {
    /// Not terminal yet
    Pending,

    /// The polled object is not visible yet
    NotFound,

    /// Terminal success
    Done(T),
}

/// Poll `refresh` until it reports [`Refresh::Done`], fails, or `config.timeout`
/// elapses.
///
/// An error returned by `refresh` is a terminal failure and ends the wait
/// immediately. More than [`NOT_FOUND_CHECKS`] consecutive
/// [`Refresh::NotFound`] observations end it with [`CloudError::NotFound`].
pub async fn wait_for<T, F, Fut>(config: &PollConfig, what: &str, mut refresh: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Refresh<T>>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut backoff = INITIAL_BACKOFF;
    let mut not_found = 0u32;

    tokio::time::sleep_until((start + config.delay).min(deadline)).await;

    loop {
        match refresh().await? {
            Refresh::Done(value) => {
                debug!(what, elapsed = ?start.elapsed(), "wait finished");
                return Ok(value);
            }
            Refresh::Pending => {
                not_found = 0;
                debug!(what, "still pending");
            }
            Refresh::NotFound => {
                not_found += 1;
                debug!(what, not_found, "not visible yet");
                if not_found > NOT_FOUND_CHECKS {
                    return Err(CloudError::NotFound(what.to_string()));
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CloudError::Timeout {
                what: what.to_string(),
                elapsed: now - start,
            });
        }

        let wait = backoff.max(config.min_timeout);
        backoff = (backoff * 2).min(MAX_BACKOFF);
        tokio::time::sleep_until((now + wait).min(deadline)).await;
    }
}

/// Waits on backend tasks
pub struct TaskPoller<'a> {
    api: &'a dyn PrismApi,
}

impl<'a> TaskPoller<'a> {
    pub fn new(api: &'a dyn PrismApi) -> Self {
        Self { api }
    }

    /// Wait until the task leaves QUEUED/RUNNING.
    ///
    /// Returns the final status on SUCCEEDED and [`CloudError::TaskFailed`]
    /// for any other terminal state.
    pub async fn wait_for_completion(
        &self,
        task_id: &TaskId,
        config: &PollConfig,
    ) -> Result<TaskStatus> {
        let what = format!("task {}", task_id);
        let api = self.api;
        wait_for(config, &what, || async move {
            interpret(task_id, api.task_status(task_id).await)
        })
        .await
    }

    /// Observe the task exactly once.
    pub async fn check_once(&self, task_id: &TaskId) -> Result<Refresh<TaskStatus>> {
        interpret(task_id, self.api.task_status(task_id).await)
    }
}

fn interpret(
    task_id: &TaskId,
    observed: std::result::Result<TaskStatus, ApiError>,
) -> Result<Refresh<TaskStatus>> {
    let status = match observed {
        Ok(status) => status,
        // freshly submitted tasks can take a moment to be indexed
        Err(ApiError::NotFound(_)) => return Ok(Refresh::NotFound),
        Err(err) => return Err(CloudError::Api(err)),
    };

    if status.state.is_pending() {
        return Ok(Refresh::Pending);
    }
    if status.state == TaskState::Succeeded {
        return Ok(Refresh::Done(status));
    }

    let detail = status
        .error_detail
        .clone()
        .or_else(|| status.progress_message.clone())
        .unwrap_or_else(|| "no detail reported".to_string());
    Err(CloudError::TaskFailed {
        task_id: task_id.to_string(),
        state: status.state.to_string(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePrism;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_secs(30))
            .with_delay(Duration::from_secs(1))
            .with_min_timeout(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeded_task_returns_status() {
        let fake = FakePrism::new();
        let task = fake.script_task(&[TaskState::Queued, TaskState::Running, TaskState::Succeeded]);

        let status = TaskPoller::new(&fake)
            .wait_for_completion(&task, &fast())
            .await
            .unwrap();
        assert_eq!(status.state, TaskState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_other_terminal_state_is_an_error_naming_the_task() {
        for terminal in [
            TaskState::Failed,
            TaskState::Aborted,
            TaskState::Other("CANCELED".to_string()),
        ] {
            let fake = FakePrism::new();
            let task = fake.script_task(&[TaskState::Running, terminal.clone()]);

            let err = TaskPoller::new(&fake)
                .wait_for_completion(&task, &fast())
                .await
                .unwrap_err();
            assert!(matches!(err, CloudError::TaskFailed { .. }), "{terminal}");
            assert!(err.to_string().contains(task.as_str()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_task_carries_backend_detail() {
        let fake = FakePrism::new();
        let task = fake.script_task_status(vec![
            TaskStatus::new(TaskId::new("x"), TaskState::Failed)
                .with_error_detail("cluster out of memory"),
        ]);

        let err = TaskPoller::new(&fake)
            .wait_for_completion(&task, &fast())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cluster out of memory"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_forever_times_out() {
        let fake = FakePrism::new();
        let task = fake.script_task(&[TaskState::Running]);

        let err = TaskPoller::new(&fake)
            .wait_for_completion(&task, &fast())
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_forever_times_out() {
        let fake = FakePrism::new();
        let task = fake.script_task(&[TaskState::Queued]);
        let start = Instant::now();

        let err = TaskPoller::new(&fake)
            .wait_for_completion(&task, &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Timeout { .. }), "{err}");
        assert!(err.to_string().contains(task.as_str()));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unindexed_task_is_still_pending() {
        let fake = FakePrism::new();
        let task = fake.script_task(&[TaskState::Succeeded]);
        fake.hide_task(&task, 3);

        let status = TaskPoller::new(&fake)
            .wait_for_completion(&task, &fast())
            .await
            .unwrap();
        assert_eq!(status.state, TaskState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_budget_is_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let config = PollConfig::new(Duration::from_secs(3600))
            .with_delay(Duration::ZERO)
            .with_min_timeout(Duration::from_millis(10));

        let err = wait_for(&config, "ghost", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CloudError>(Refresh::<()>::NotFound)
        })
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(counter.load(Ordering::SeqCst), NOT_FOUND_CHECKS + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_respect_delay_and_floor() {
        let config = PollConfig::new(Duration::from_secs(60))
            .with_delay(Duration::from_secs(5))
            .with_min_timeout(Duration::from_secs(2));
        let start = Instant::now();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        wait_for(&config, "counter", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CloudError>(if n < 2 {
                Refresh::Pending
            } else {
                Refresh::Done(())
            })
        })
        .await
        .unwrap();

        // 5s delay, then two pauses of at least 2s each
        assert!(start.elapsed() >= Duration::from_secs(9));
    }
}
