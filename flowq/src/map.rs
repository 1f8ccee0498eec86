//! Fan-out coordination (`map`/`apply`), the `before_enqueue` callback registry, and the
//! `batch` scoped guard.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{job::EnqueueOptions, pubsub::ListenCallback, Error, Job, Queue, Status};

/// A job that did not reach a successful terminal status, carrying its final record.
#[derive(Debug, Clone)]
pub struct JobError {
    pub job: Job,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job {:?} ended in status {:?}: {}",
            self.job.key,
            self.job.status,
            self.job.error.as_deref().unwrap_or("")
        )
    }
}

impl std::error::Error for JobError {}

/// A hook run (in registration order) against every job immediately before its enqueue script
/// executes. Returning an error aborts the enqueue before the store is touched.
#[async_trait]
pub trait BeforeEnqueue: Send + Sync {
    async fn call(&self, job: &Job) -> Result<(), Error>;
}

#[async_trait]
impl<F, Fut> BeforeEnqueue for F
where
    F: Fn(&Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn call(&self, job: &Job) -> Result<(), Error> {
        (self)(job).await
    }
}

/// Opaque handle returned by [`CallbackRegistry::register`]; pass it to `unregister` to remove
/// the callback. Carries no meaning beyond identifying a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeforeEnqueueHandle(usize);

#[derive(Default)]
pub(crate) struct CallbackRegistry {
    slots: Mutex<Vec<Option<Arc<dyn BeforeEnqueue>>>>,
}

impl CallbackRegistry {
    pub fn new() -> CallbackRegistry {
        CallbackRegistry::default()
    }

    pub fn register(&self, callback: Arc<dyn BeforeEnqueue>) -> BeforeEnqueueHandle {
        let mut slots = self.slots.lock().expect("callback registry lock poisoned");
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(callback);
                return BeforeEnqueueHandle(i);
            }
        }
        slots.push(Some(callback));
        BeforeEnqueueHandle(slots.len() - 1)
    }

    pub fn unregister(&self, handle: BeforeEnqueueHandle) {
        let mut slots = self.slots.lock().expect("callback registry lock poisoned");
        if let Some(slot) = slots.get_mut(handle.0) {
            *slot = None;
        }
    }

    pub async fn run_all(&self, job: &Job) -> Result<(), Error> {
        let callbacks: Vec<Arc<dyn BeforeEnqueue>> = {
            let slots = self.slots.lock().expect("callback registry lock poisoned");
            slots.iter().flatten().cloned().collect()
        };
        for callback in callbacks {
            callback.call(job).await?;
        }
        Ok(())
    }
}

/// Options governing a `map`/`apply` call, beyond the per-item kwargs and job options.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub timeout: Option<Duration>,
    /// If `false` (the default), the first unsuccessful terminal job stops the wait and its
    /// error propagates. If `true`, every item's outcome (success or [`JobError`]) is returned.
    pub return_exceptions: bool,
}

/// Outcome of one item in a `map` call.
#[derive(Debug, Clone)]
pub enum MapItem {
    Done(Job),
    Failed(JobError),
}

struct PendingTracker {
    pending: HashSet<String>,
    return_exceptions: bool,
}

impl PendingTracker {
    /// Returns `true` once listening should stop: either every job has reached a terminal
    /// status, or one failed and `return_exceptions` is false.
    fn apply(&mut self, job_key: &str, status: Status) -> bool {
        if !status.is_terminal() {
            return false;
        }
        self.pending.remove(job_key);
        if status.is_unsuccessful_terminal() && !self.return_exceptions {
            return true;
        }
        self.pending.is_empty()
    }
}

/// Enqueue one job per element of `items` (each merged over `defaults`), wait for every one to
/// reach a terminal status, and return their outcomes in input order.
///
/// Subscribes to every job's channel *before* enqueuing any of them, per the ordering
/// requirement that a job finishing between enqueue and subscribe must still be observed
/// (`pubsub::listen`'s unconditional post-subscribe poll covers exactly this race).
pub(crate) async fn map(
    queue: &Queue,
    function: &str,
    items: Vec<serde_json::Map<String, serde_json::Value>>,
    defaults: EnqueueOptions,
    opts: MapOptions,
) -> Result<Vec<MapItem>, Error> {
    let mut keys = Vec::with_capacity(items.len());
    let mut jobs = Vec::with_capacity(items.len());

    for kwargs in items {
        let mut item_defaults = defaults.clone();
        if item_defaults.key.is_none() {
            item_defaults.key = Some(crate::job::generate_key());
        }
        if item_defaults.timeout.is_none() {
            item_defaults.timeout = opts.timeout.map(|t| t.as_secs() as i64);
        }
        let job = item_defaults.build(queue.name(), function, kwargs);
        keys.push(job.key.clone());
        jobs.push(job);
    }

    let tracker = PendingTracker {
        pending: keys.iter().cloned().collect(),
        return_exceptions: opts.return_exceptions,
    };
    let tracked = Arc::new(std::sync::Mutex::new(tracker));

    let listen_keys = keys.clone();
    let listen_queue = queue.clone();
    let listen_tracked = tracked.clone();
    let listen_handle = tokio::spawn(async move {
        crate::pubsub::listen(
            &listen_queue,
            &listen_keys,
            SharedTracker(listen_tracked),
            opts.timeout,
        )
        .await
    });

    for job in &mut jobs {
        if let Err(e) = queue.enqueue(job).await {
            listen_handle.abort();
            return Err(e);
        }
    }

    listen_handle
        .await
        .map_err(|_| Error::Timeout)
        .and_then(|r| r)?;

    let mut out = Vec::with_capacity(jobs.len());
    for job in jobs {
        let current = queue.job(&job.key).await?.unwrap_or(job);
        if current.status.is_unsuccessful_terminal() {
            if !opts.return_exceptions {
                return Err(Error::Job(JobError { job: current }));
            }
            out.push(MapItem::Failed(JobError { job: current }));
        } else {
            out.push(MapItem::Done(current));
        }
    }
    Ok(out)
}

struct SharedTracker(Arc<std::sync::Mutex<PendingTracker>>);

#[async_trait]
impl ListenCallback for SharedTracker {
    async fn on_status(&mut self, job_key: &str, status: Status) -> bool {
        self.0.lock().expect("tracker lock poisoned").apply(job_key, status)
    }
}

/// `map` with a single item, returning its scalar outcome. Like the source's `apply`, this
/// always runs with `return_exceptions: false`: an unsuccessful job surfaces as `Err(Error::Job)`
/// rather than a value the caller has to branch on.
pub(crate) async fn apply(
    queue: &Queue,
    function: &str,
    kwargs: serde_json::Map<String, serde_json::Value>,
    defaults: EnqueueOptions,
    timeout: Option<Duration>,
) -> Result<Job, Error> {
    let mut results = map(
        queue,
        function,
        vec![kwargs],
        defaults,
        MapOptions {
            timeout,
            return_exceptions: false,
        },
    )
    .await?;
    match results.remove(0) {
        MapItem::Done(job) => Ok(job),
        MapItem::Failed(e) => Err(Error::Job(e)),
    }
}

/// Scoped guard returned by `Queue::batch`: while alive, every job enqueued through `queue` is
/// recorded. The caller is expected to call [`Batch::abort_all`] on its own error path before
/// dropping the guard, since there is no implicit scope-exit cleanup for async work in Rust; the
/// registered callback itself is always removed on drop.
pub struct Batch {
    queue: Queue,
    handle: Option<BeforeEnqueueHandle>,
    keys: Arc<Mutex<Vec<String>>>,
}

struct BatchRecorder {
    keys: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BeforeEnqueue for BatchRecorder {
    async fn call(&self, job: &Job) -> Result<(), Error> {
        self.keys.lock().expect("batch key list lock poisoned").push(job.key.clone());
        Ok(())
    }
}

impl Batch {
    pub(crate) fn start(queue: &Queue) -> Batch {
        let keys = Arc::new(Mutex::new(Vec::new()));
        let handle = queue.register_before_enqueue(Arc::new(BatchRecorder { keys: keys.clone() }));
        Batch {
            queue: queue.clone(),
            handle: Some(handle),
            keys,
        }
    }

    /// Keys enqueued through this batch so far.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().expect("batch key list lock poisoned").clone()
    }

    /// Best-effort: abort every job recorded so far. Errors are suppressed per job.
    pub async fn abort_all(&self, error: impl Into<String>) {
        let error = error.into();
        for key in self.keys() {
            if let Ok(Some(mut job)) = self.queue.job(&key).await {
                let _ = self.queue.abort(&mut job, error.clone(), 5).await;
            }
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.queue.unregister_before_enqueue(handle);
        }
    }
}
