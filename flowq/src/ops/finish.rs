use chrono::Utc;
use tracing::{event, Level};

use crate::{job::Status, keys, pubsub, Error, Job, Queue};

/// Resolve a job to a terminal status: remove it from `active`/`incomplete`, retain or delete
/// its record per its `ttl`, publish the new status, and update the queue's local counters.
pub(crate) async fn finish(
    queue: &Queue,
    job: &mut Job,
    status: Status,
    result: Option<serde_json::Value>,
    error: Option<String>,
) -> Result<(), Error> {
    job.status = status;
    job.result = result;
    job.error = error;
    job.completed = Utc::now().timestamp();
    if status == Status::Complete {
        job.progress = 1.0;
    }

    let job_id = keys::job_id(queue.name(), &job.key);
    let payload = queue.codec().dump(job)?;

    let mut conn = queue.store().get().await?;
    let mut pipe = redis::pipe();
    pipe.atomic()
        .lrem(queue.keys().active.as_str(), 1, job_id.as_str())
        .zrem(queue.keys().incomplete.as_str(), job_id.as_str());

    if job.ttl > 0 {
        pipe.set_ex(job_id.as_str(), payload, job.ttl as usize);
    } else if job.ttl == 0 {
        pipe.set(job_id.as_str(), payload);
    } else {
        pipe.del(job_id.as_str());
    }

    let _: () = pipe.query_async(&mut *conn).await?;

    queue.record_finish(status);
    pubsub::notify(queue, &job_id, status).await?;

    event!(Level::INFO, queue = %queue.name(), job = %job.key, status = status.as_str(), "job finished");
    Ok(())
}
