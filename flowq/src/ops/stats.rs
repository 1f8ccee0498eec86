use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::{Error, Job, Queue};

/// Which key-space list/set a plain `count` call should measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    Queued,
    Active,
    Incomplete,
}

/// A snapshot of one worker's process-local counters, as written by [`stats`] and read back by
/// [`info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub uuid: String,
    pub started: i64,
    pub complete: u64,
    pub failed: u64,
    pub retried: u64,
    pub aborted: u64,
}

/// Aggregate view of a queue: sizes of its three core structures plus, if requested, live
/// worker counters and a sample of in-flight job records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub queued: i64,
    pub active: i64,
    pub incomplete: i64,
    pub scheduled: i64,
    pub workers: Vec<WorkerStats>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// Publish this queue handle's current counters under its worker uuid, trimming any
/// worker-stat entries that have already expired out of the liveness index.
pub(crate) async fn stats(queue: &Queue, ttl_seconds: i64) -> Result<(), Error> {
    let worker_key = queue.keys().stats_worker(queue.name(), queue.uuid());
    let snapshot = queue.counters_snapshot();
    let payload = serde_json::to_vec(&snapshot)?;

    let now_ms = Utc::now().timestamp_millis();
    let expiry_ms = now_ms + ttl_seconds * 1000;

    let mut conn = queue.store().get().await?;
    let _: () = redis::pipe()
        .atomic()
        .set_ex(worker_key.as_str(), payload, ttl_seconds as usize)
        .zrembyscore(queue.keys().stats.as_str(), 0, now_ms)
        .zadd(queue.keys().stats.as_str(), worker_key.as_str(), expiry_ms)
        .expire(queue.keys().stats.as_str(), ttl_seconds as usize)
        .query_async(&mut *conn)
        .await?;

    Ok(())
}

pub(crate) async fn count(queue: &Queue, kind: CountKind) -> Result<i64, Error> {
    let mut conn = queue.store().get().await?;
    let n = match kind {
        CountKind::Queued => conn.llen(queue.keys().queued.as_str()).await?,
        CountKind::Active => conn.llen(queue.keys().active.as_str()).await?,
        CountKind::Incomplete => conn.zcard(queue.keys().incomplete.as_str()).await?,
    };
    Ok(n)
}

/// Gather sizes for `queued`/`active`/`incomplete`, the derived `scheduled` count, every live
/// worker's published counters, and (if `include_jobs`) a page of deserialized job records from
/// `active` then `queued`.
pub(crate) async fn info(
    queue: &Queue,
    include_jobs: bool,
    offset: isize,
    limit: isize,
) -> Result<QueueInfo, Error> {
    let mut conn = queue.store().get().await?;

    let queued = count(queue, CountKind::Queued).await?;
    let active = count(queue, CountKind::Active).await?;
    let incomplete = count(queue, CountKind::Incomplete).await?;
    let scheduled = (incomplete - queued - active).max(0);

    let now_ms = Utc::now().timestamp_millis();
    let worker_keys: Vec<String> = conn
        .zrangebyscore(queue.keys().stats.as_str(), now_ms, "+inf")
        .await?;

    let mut workers = Vec::with_capacity(worker_keys.len());
    if !worker_keys.is_empty() {
        // Explicit MGET: `Commands::get` issues a bare GET for a single-element slice, whose
        // reply doesn't decode into `Vec<Option<Vec<u8>>>`.
        let blobs: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(worker_keys.as_slice())
            .query_async(&mut *conn)
            .await?;
        for blob in blobs.into_iter().flatten() {
            if let Ok(w) = serde_json::from_slice::<WorkerStats>(&blob) {
                workers.push(w);
            }
        }
    }

    let mut jobs = Vec::new();
    if include_jobs {
        let end = offset + limit.max(0) - 1;
        let mut ids: Vec<String> = conn
            .lrange(queue.keys().active.as_str(), offset, end)
            .await?;
        let remaining = limit - ids.len() as isize;
        if remaining > 0 {
            let more: Vec<String> = conn
                .lrange(queue.keys().queued.as_str(), 0, remaining - 1)
                .await?;
            ids.extend(more);
        }

        if !ids.is_empty() {
            let blobs: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                .arg(ids.as_slice())
                .query_async(&mut *conn)
                .await?;
            for blob in blobs.into_iter().flatten() {
                if let Ok(job) = queue.load_job(&blob) {
                    jobs.push(job);
                }
            }
        }
    }

    Ok(QueueInfo {
        queued,
        active,
        incomplete,
        scheduled,
        workers,
        jobs,
    })
}
