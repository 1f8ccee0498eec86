use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A job's position in its lifecycle. Mirrors the state machine new → queued → active →
/// complete/failed/aborted described for the queue engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    New,
    Deferred,
    Queued,
    Active,
    Aborted,
    Failed,
    Complete,
}

impl Status {
    /// True for any status a job will never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed | Status::Aborted)
    }

    /// True for a terminal status that did not end in success.
    pub fn is_unsuccessful_terminal(self) -> bool {
        matches!(self, Status::Failed | Status::Aborted)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Deferred => "deferred",
            Status::Queued => "queued",
            Status::Active => "active",
            Status::Aborted => "aborted",
            Status::Failed => "failed",
            Status::Complete => "complete",
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Status> {
        Some(match s {
            "new" => Status::New,
            "deferred" => Status::Deferred,
            "queued" => Status::Queued,
            "active" => Status::Active,
            "aborted" => Status::Aborted,
            "failed" => Status::Failed,
            "complete" => Status::Complete,
            _ => return None,
        })
    }
}

/// Which duration to compute from a job's timestamps. See [`Job::duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationKind {
    /// Time spent actually running (`completed - started`).
    Process,
    /// Time spent waiting to start (`started - queued`).
    Start,
    /// Time from enqueue to completion (`completed - queued`).
    Total,
}

/// Pluggable hook consulted by `Queue::retry` to decide whether the next attempt should be
/// immediate (return `None`, the default) or delayed by some number of seconds.
pub trait RetryPolicy: Send + Sync {
    fn next_retry_delay(&self, job: &Job) -> Option<i64>;
}

/// An exponential backoff policy: `base * 2^(attempts - 1)`, capped at `max`.
pub struct ExponentialRetryPolicy {
    pub base_seconds: i64,
    pub max_seconds: i64,
}

impl RetryPolicy for ExponentialRetryPolicy {
    fn next_retry_delay(&self, job: &Job) -> Option<i64> {
        let exp = job.attempts.saturating_sub(1).min(20);
        let delay = self.base_seconds.saturating_mul(1i64 << exp);
        Some(delay.min(self.max_seconds))
    }
}

/// A persisted invocation of a named function with kwargs, uniquely keyed within its queue.
///
/// Every field here round-trips through the queue's codec except `retry_policy`, which is a
/// process-local hook and is never sent to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub function: String,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    pub queue: String,
    pub key: String,

    #[serde(default = "default_timeout")]
    pub timeout: i64,
    #[serde(default)]
    pub heartbeat: i64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_ttl")]
    pub ttl: i64,
    #[serde(default)]
    pub scheduled: i64,

    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub queued: i64,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub completed: i64,
    #[serde(default)]
    pub touched: i64,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default = "default_status")]
    pub status: Status,

    #[serde(skip, default)]
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
}

fn default_timeout() -> i64 {
    10
}

fn default_retries() -> u32 {
    1
}

fn default_ttl() -> i64 {
    60
}

fn default_status() -> Status {
    Status::New
}

impl Job {
    /// Begin building a job for `function` on `queue`, with a fresh key.
    pub fn new(queue: impl Into<String>, function: impl Into<String>) -> Job {
        Job {
            function: function.into(),
            kwargs: serde_json::Map::new(),
            queue: queue.into(),
            key: generate_key(),
            timeout: default_timeout(),
            heartbeat: 0,
            retries: default_retries(),
            ttl: default_ttl(),
            scheduled: 0,
            attempts: 0,
            queued: 0,
            started: 0,
            completed: 0,
            touched: 0,
            progress: 0.0,
            result: None,
            error: None,
            status: Status::New,
            retry_policy: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Job {
        self.key = key.into();
        self
    }

    pub fn with_kwargs(mut self, kwargs: serde_json::Map<String, serde_json::Value>) -> Job {
        self.kwargs = kwargs;
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Job {
        self.timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: i64) -> Job {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Job {
        self.retries = retries;
        self
    }

    pub fn with_ttl(mut self, ttl: i64) -> Job {
        self.ttl = ttl;
        self
    }

    pub fn with_scheduled(mut self, scheduled: i64) -> Job {
        self.scheduled = scheduled;
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Job {
        self.retry_policy = Some(policy);
        self
    }

    /// Duration in seconds between two lifecycle timestamps, or `None` if either is unset.
    pub fn duration(&self, kind: DurationKind) -> Option<i64> {
        match kind {
            DurationKind::Process => sub_if_set(self.completed, self.started),
            DurationKind::Start => sub_if_set(self.started, self.queued),
            DurationKind::Total => sub_if_set(self.completed, self.queued),
        }
    }

    /// An active job is stuck if it's run longer than its timeout, or gone quiet longer than
    /// its heartbeat interval.
    pub fn stuck(&self) -> bool {
        if self.status != Status::Active {
            return false;
        }
        let current = Utc::now().timestamp();
        (self.timeout > 0 && current - self.started > self.timeout)
            || (self.heartbeat > 0 && current - self.touched > self.heartbeat)
    }
}

/// Job-level options accepted by `Queue::enqueue`, separate from the function's own kwargs
/// (mirrors the source's split between reflected job fields and the free-form kwargs bag).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub key: Option<String>,
    pub timeout: Option<i64>,
    pub heartbeat: Option<i64>,
    pub retries: Option<u32>,
    pub ttl: Option<i64>,
    pub scheduled: Option<i64>,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl EnqueueOptions {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: i64) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_scheduled(mut self, scheduled: i64) -> Self {
        self.scheduled = Some(scheduled);
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Build the `Job` this set of options describes for `function` on `queue`.
    pub fn build(&self, queue: &str, function: &str, kwargs: serde_json::Map<String, serde_json::Value>) -> Job {
        let mut job = Job::new(queue, function).with_kwargs(kwargs);
        if let Some(key) = &self.key {
            job = job.with_key(key.clone());
        }
        if let Some(timeout) = self.timeout {
            job = job.with_timeout(timeout);
        }
        if let Some(heartbeat) = self.heartbeat {
            job = job.with_heartbeat(heartbeat);
        }
        if let Some(retries) = self.retries {
            job = job.with_retries(retries);
        }
        if let Some(ttl) = self.ttl {
            job = job.with_ttl(ttl);
        }
        if let Some(scheduled) = self.scheduled {
            job = job.with_scheduled(scheduled);
        }
        if let Some(policy) = &self.retry_policy {
            job = job.with_retry_policy(policy.clone());
        }
        job
    }
}

fn sub_if_set(a: i64, b: i64) -> Option<i64> {
    if a != 0 && b != 0 {
        Some(a - b)
    } else {
        None
    }
}

pub fn generate_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuck_requires_active_status() {
        let mut job = Job::new("q", "f").with_timeout(5);
        job.started = Utc::now().timestamp() - 100;
        assert!(!job.stuck(), "non-active job is never stuck");

        job.status = Status::Active;
        assert!(job.stuck());
    }

    #[test]
    fn stuck_checks_heartbeat_independently_of_timeout() {
        let mut job = Job::new("q", "f").with_timeout(0).with_heartbeat(5);
        job.status = Status::Active;
        job.started = Utc::now().timestamp() - 1000;
        job.touched = Utc::now().timestamp() - 100;
        assert!(job.stuck(), "stale heartbeat should mark job stuck even with timeout disabled");
    }

    #[test]
    fn duration_is_none_until_both_timestamps_are_set() {
        let mut job = Job::new("q", "f");
        assert_eq!(job.duration(DurationKind::Total), None);
        job.queued = 100;
        assert_eq!(job.duration(DurationKind::Total), None);
        job.completed = 150;
        assert_eq!(job.duration(DurationKind::Total), Some(50));
    }

    #[test]
    fn exponential_retry_policy_caps_at_max() {
        let policy = ExponentialRetryPolicy {
            base_seconds: 1,
            max_seconds: 10,
        };
        let mut job = Job::new("q", "f");
        job.attempts = 1;
        assert_eq!(policy.next_retry_delay(&job), Some(1));
        job.attempts = 5;
        assert_eq!(policy.next_retry_delay(&job), Some(10));
    }
}
