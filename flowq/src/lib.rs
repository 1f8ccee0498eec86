//! A distributed asynchronous job queue backed by a shared Redis-class store: atomic
//! enqueue/schedule/sweep scripts, a job state machine with retries, pub/sub notification of
//! terminal status, and a `map`/`apply` fan-out coordinator.
//!
//! Logging configuration, the worker loop that actually invokes user functions, and the
//! serializer choice (beyond the default JSON [`Codec`]) are left to the host process.

mod background;
mod codec;
mod error;
mod job;
mod keys;
mod map;
mod ops;
mod pubsub;
mod scripts;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::Semaphore;
use tracing::{event, Level};
use uuid::Uuid;

pub use codec::{Codec, JsonCodec};
pub use error::Error;
pub use flowq_store::RedisPool;
pub use job::{DurationKind, EnqueueOptions, ExponentialRetryPolicy, Job, RetryPolicy, Status};
pub use map::{Batch, BeforeEnqueue, BeforeEnqueueHandle, JobError, MapItem, MapOptions};
pub use ops::{CountKind, QueueInfo, WorkerStats};
pub use pubsub::ListenCallback;

use keys::QueueKeys;
use scripts::{EnqueueScript, ScheduleScript, SweepScript};

const DEFAULT_MAX_CONCURRENT_OPS: usize = 20;

#[derive(Default)]
struct Counters {
    complete: u64,
    failed: u64,
    retried: u64,
    aborted: u64,
}

#[derive(Default)]
struct BackgroundTasks {
    schedule: Option<tokio::task::JoinHandle<()>>,
    sweep: Option<tokio::task::JoinHandle<()>>,
}

struct QueueInner {
    name: String,
    store: RedisPool,
    keys: QueueKeys,
    codec: Box<dyn Codec>,
    semaphore: Semaphore,
    uuid: String,
    started: i64,
    counters: Mutex<Counters>,
    callbacks: map::CallbackRegistry,
    enqueue_script: EnqueueScript,
    schedule_script: ScheduleScript,
    sweep_script: SweepScript,
    background: Mutex<BackgroundTasks>,
}

/// A cheaply cloneable handle to a named queue. All state lives in the shared store; cloning a
/// `Queue` shares the same connection pool, in-process counters and background task handles.
#[derive(Clone)]
pub struct Queue(Arc<QueueInner>);

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("name", &self.0.name).finish()
    }
}

impl Queue {
    /// A queue named `name` over `store`, using the default JSON codec and a concurrency limit
    /// of [`DEFAULT_MAX_CONCURRENT_OPS`] in-flight operations.
    pub fn new(store: RedisPool, name: impl Into<String>) -> Queue {
        Queue::build(store, name, Box::new(JsonCodec), DEFAULT_MAX_CONCURRENT_OPS)
    }

    pub fn with_codec(store: RedisPool, name: impl Into<String>, codec: Box<dyn Codec>) -> Queue {
        Queue::build(store, name, codec, DEFAULT_MAX_CONCURRENT_OPS)
    }

    pub fn with_max_concurrent_ops(store: RedisPool, name: impl Into<String>, max_concurrent_ops: usize) -> Queue {
        Queue::build(store, name, Box::new(JsonCodec), max_concurrent_ops)
    }

    fn build(store: RedisPool, name: impl Into<String>, codec: Box<dyn Codec>, max_concurrent_ops: usize) -> Queue {
        let name = name.into();
        let keys = QueueKeys::new(&name);
        Queue(Arc::new(QueueInner {
            name,
            store,
            keys,
            codec,
            semaphore: Semaphore::new(max_concurrent_ops),
            uuid: Uuid::new_v4().to_string(),
            started: Utc::now().timestamp(),
            counters: Mutex::new(Counters::default()),
            callbacks: map::CallbackRegistry::new(),
            enqueue_script: EnqueueScript::new(),
            schedule_script: ScheduleScript::new(),
            sweep_script: SweepScript::new(),
            background: Mutex::new(BackgroundTasks::default()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn uuid(&self) -> &str {
        &self.0.uuid
    }

    pub(crate) fn store(&self) -> &RedisPool {
        &self.0.store
    }

    pub(crate) fn codec(&self) -> &dyn Codec {
        self.0.codec.as_ref()
    }

    /// Decode a stored record and assert its embedded queue name matches this handle's. A
    /// mismatch means the record was fetched under the wrong queue's key prefix somehow, which
    /// is a programmer error, not a transport failure.
    pub(crate) fn load_job(&self, blob: &[u8]) -> Result<Job, Error> {
        let job = self.codec().load(blob)?;
        if job.queue != self.name() {
            return Err(Error::QueueMismatch(job.queue));
        }
        Ok(job)
    }

    pub(crate) fn keys(&self) -> &QueueKeys {
        &self.0.keys
    }

    pub(crate) fn record_finish(&self, status: Status) {
        let mut counters = self.0.counters.lock().expect("counters lock poisoned");
        match status {
            Status::Complete => counters.complete += 1,
            Status::Failed => counters.failed += 1,
            Status::Aborted => counters.aborted += 1,
            _ => {}
        }
    }

    pub(crate) fn record_retry(&self) {
        self.0.counters.lock().expect("counters lock poisoned").retried += 1;
    }

    pub(crate) fn counters_snapshot(&self) -> WorkerStats {
        let counters = self.0.counters.lock().expect("counters lock poisoned");
        WorkerStats {
            uuid: self.uuid().to_string(),
            started: self.0.started,
            complete: counters.complete,
            failed: counters.failed,
            retried: counters.retried,
            aborted: counters.aborted,
        }
    }

    /// Run every registered `before_enqueue` callback, then atomically insert `job` unless its
    /// key collides with a still-incomplete entry or an abort marker blocks it. Mutates `job`'s
    /// `queue`/`status`/`queued` fields to reflect the attempt. Returns `false` for a no-op
    /// enqueue (duplicate key, or blocked by a pending abort marker).
    pub async fn enqueue(&self, job: &mut Job) -> Result<bool, Error> {
        let _permit = self.0.semaphore.acquire().await.expect("semaphore closed");

        self.0.callbacks.run_all(job).await?;

        if job.queue.is_empty() {
            job.queue = self.name().to_string();
        } else if job.queue != self.name() {
            return Err(Error::QueueMismatch(job.queue.clone()));
        }

        job.status = Status::Queued;
        job.queued = Utc::now().timestamp();

        let job_id = keys::job_id(self.name(), &job.key);
        let abort_id = keys::abort_id(&job_id);
        let payload = self.codec().dump(job)?;

        let mut conn = self.store().get().await?;
        let inserted = self
            .0
            .enqueue_script
            .run(self.keys(), &mut conn, &job_id, &abort_id, &payload, job.scheduled)
            .await?;

        event!(
            Level::INFO,
            queue = %self.name(),
            job = %job.key,
            inserted,
            "enqueue attempted"
        );

        Ok(inserted)
    }

    /// Block (up to `timeout`, or forever if zero) for a job to become available, moving it
    /// from `queued` to `active` atomically and returning its record as last persisted. The
    /// returned job's `status` is still whatever `enqueue`/`retry` left it as (`QUEUED`); it is
    /// the worker's responsibility to set `status = ACTIVE`, stamp `started`/bump `attempts`,
    /// and persist that via `update` before running the function.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, Error> {
        let mut conn = self.store().get().await?;
        let timeout_secs = timeout.as_secs_f64();

        let id: Option<String> = match redis::cmd("BLMOVE")
            .arg(self.keys().queued.as_str())
            .arg(self.keys().active.as_str())
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout_secs)
            .query_async(&mut *conn)
            .await
        {
            Ok(id) => id,
            Err(e) if e.to_string().contains("unknown command") => {
                redis::cmd("BRPOPLPUSH")
                    .arg(self.keys().queued.as_str())
                    .arg(self.keys().active.as_str())
                    .arg(timeout_secs as usize)
                    .query_async(&mut *conn)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        let Some(id) = id else { return Ok(None) };

        let blob: Option<Vec<u8>> = conn.get(id.as_str()).await?;
        let Some(blob) = blob else { return Ok(None) };

        let job = self.load_job(&blob)?;

        event!(Level::INFO, queue = %self.name(), job = %job.key, "job dequeued");
        Ok(Some(job))
    }

    /// Fetch and deserialize a job's current record by its key, gated by the same concurrency
    /// limit as `enqueue`.
    pub async fn job(&self, key: &str) -> Result<Option<Job>, Error> {
        let _permit = self.0.semaphore.acquire().await.expect("semaphore closed");
        let job_id = keys::job_id(self.name(), key);
        let mut conn = self.store().get().await?;
        let blob: Option<Vec<u8>> = conn.get(job_id.as_str()).await?;
        match blob {
            Some(blob) => Ok(Some(self.load_job(&blob)?)),
            None => Ok(None),
        }
    }

    pub async fn finish(
        &self,
        job: &mut Job,
        status: Status,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), Error> {
        ops::finish::finish(self, job, status, result, error).await
    }

    pub async fn retry(&self, job: &mut Job, error: Option<String>) -> Result<(), Error> {
        ops::retry::retry(self, job, error).await
    }

    pub async fn abort(&self, job: &mut Job, error: String, ttl_seconds: i64) -> Result<(), Error> {
        let _permit = self.0.semaphore.acquire().await.expect("semaphore closed");
        ops::abort::abort(self, job, error, ttl_seconds).await
    }

    /// Persist a mid-run progress/heartbeat update for `job`.
    pub async fn update(&self, job: &mut Job) -> Result<(), Error> {
        ops::update::update(self, job).await
    }

    /// Promote due-but-deferred jobs from `incomplete` into `queued`, under a TTL lock so only
    /// one caller across the fleet does it per `lock_seconds` interval.
    pub async fn schedule(&self, lock_seconds: i64) -> Result<Vec<String>, Error> {
        let mut conn = self.store().get().await?;
        let now = Utc::now().timestamp();
        let promoted = self
            .0
            .schedule_script
            .run(self.keys(), &mut conn, lock_seconds, now)
            .await?;

        if !promoted.is_empty() {
            event!(Level::DEBUG, queue = %self.name(), promoted = promoted.len(), "schedule promoted jobs");
        }
        Ok(promoted)
    }

    /// Reap `active` entries whose record is missing, or whose job is stuck or no longer active,
    /// under a TTL lock. Missing records are dropped silently; stuck/orphaned jobs are finished
    /// as ABORTED with error `"swept"`.
    pub async fn sweep(&self, lock_seconds: i64) -> Result<Vec<String>, Error> {
        let ids = {
            let mut conn = self.store().get().await?;
            self.0.sweep_script.run(self.keys(), &mut conn, lock_seconds).await?
        };

        let mut swept = Vec::new();
        for id in ids {
            let blob: Option<Vec<u8>> = {
                let mut conn = self.store().get().await?;
                conn.get(id.as_str()).await?
            };

            match blob {
                None => {
                    let mut conn = self.store().get().await?;
                    let _: () = redis::pipe()
                        .atomic()
                        .lrem(self.keys().active.as_str(), 0, id.as_str())
                        .zrem(self.keys().incomplete.as_str(), id.as_str())
                        .query_async(&mut *conn)
                        .await?;
                    event!(Level::WARN, queue = %self.name(), job = %id, "swept orphaned job with no record");
                    swept.push(id);
                }
                Some(blob) => {
                    if let Ok(mut job) = self.load_job(&blob) {
                        if job.status != Status::Active || job.stuck() {
                            ops::finish::finish(self, &mut job, Status::Aborted, None, Some("swept".to_string())).await?;
                            swept.push(id);
                        }
                    }
                }
            }
        }

        Ok(swept)
    }

    pub async fn stats(&self, ttl_seconds: i64) -> Result<(), Error> {
        ops::stats::stats(self, ttl_seconds).await
    }

    pub async fn info(&self, include_jobs: bool, offset: isize, limit: isize) -> Result<QueueInfo, Error> {
        ops::stats::info(self, include_jobs, offset, limit).await
    }

    pub async fn count(&self, kind: CountKind) -> Result<i64, Error> {
        ops::stats::count(self, kind).await
    }

    /// Subscribe to status changes for `job_keys`, invoking `callback` for each terminal status
    /// (including a synthetic one for any job already terminal at subscribe time).
    pub async fn listen<C: ListenCallback>(
        &self,
        job_keys: &[String],
        callback: C,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        pubsub::listen(self, job_keys, callback, timeout).await
    }

    /// Enqueue one job per element of `items` and wait for all of them to reach a terminal
    /// status. See [`MapOptions`] for early-exit and exception-collection behavior.
    pub async fn map(
        &self,
        function: &str,
        items: Vec<serde_json::Map<String, serde_json::Value>>,
        defaults: EnqueueOptions,
        opts: MapOptions,
    ) -> Result<Vec<MapItem>, Error> {
        map::map(self, function, items, defaults, opts).await
    }

    /// `map` with a single item, returning its scalar outcome.
    /// `map` with a single kwargs dict, returning its result directly. An unsuccessful job
    /// raises `Error::Job` rather than returning a value the caller must branch on.
    pub async fn apply(
        &self,
        function: &str,
        kwargs: serde_json::Map<String, serde_json::Value>,
        defaults: EnqueueOptions,
        timeout: Option<Duration>,
    ) -> Result<Job, Error> {
        map::apply(self, function, kwargs, defaults, timeout).await
    }

    /// Start a scoped guard that records every job enqueued through this handle while alive.
    pub fn batch(&self) -> Batch {
        Batch::start(self)
    }

    pub fn register_before_enqueue(&self, callback: Arc<dyn BeforeEnqueue>) -> BeforeEnqueueHandle {
        self.0.callbacks.register(callback)
    }

    pub fn unregister_before_enqueue(&self, handle: BeforeEnqueueHandle) {
        self.0.callbacks.unregister(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(name: &str) -> Queue {
        let pool = RedisPool::new(Some("redis://127.0.0.1:0".to_string()), None).expect("building pool config");
        Queue::new(pool, name)
    }

    #[test]
    fn load_job_accepts_record_for_its_own_queue() {
        let queue = queue("orders");
        let job = Job::new("orders", "ship").with_key("k1");
        let blob = queue.codec().dump(&job).unwrap();

        let loaded = queue.load_job(&blob).expect("same-queue record loads");
        assert_eq!(loaded.key, "k1");
    }

    #[test]
    fn load_job_rejects_record_from_a_different_queue() {
        let queue = queue("orders");
        let job = Job::new("other-queue", "ship").with_key("k1");
        let blob = queue.codec().dump(&job).unwrap();

        match queue.load_job(&blob) {
            Err(Error::QueueMismatch(name)) => assert_eq!(name, "other-queue"),
            other => panic!("expected QueueMismatch, got {:?}", other),
        }
    }
}
