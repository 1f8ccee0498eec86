use chrono::Utc;
use tracing::{event, Level};

use crate::{job::Status, keys, pubsub, Error, Job, Queue};

/// Requeue a job after a failed attempt: either immediately (the default, when no retry policy
/// is set or it returns `None`) or after a policy-supplied delay.
pub(crate) async fn retry(queue: &Queue, job: &mut Job, error: Option<String>) -> Result<(), Error> {
    let job_id = keys::job_id(queue.name(), &job.key);
    let now = Utc::now().timestamp();

    let delay = job.retry_policy.as_ref().and_then(|p| p.next_retry_delay(job));

    job.status = Status::Queued;
    job.error = error;
    job.completed = 0;
    job.started = 0;
    job.progress = 0.0;
    job.touched = now;

    let payload = queue.codec().dump(job)?;

    let mut conn = queue.store().get().await?;
    let mut pipe = redis::pipe();
    pipe.atomic()
        .lrem(queue.keys().active.as_str(), 1, job_id.as_str())
        .lrem(queue.keys().queued.as_str(), 1, job_id.as_str());

    match delay {
        Some(delay) => {
            pipe.zadd(queue.keys().incomplete.as_str(), job_id.as_str(), now + delay);
        }
        None => {
            pipe.zadd(queue.keys().incomplete.as_str(), job_id.as_str(), job.scheduled)
                .rpush(queue.keys().queued.as_str(), job_id.as_str());
        }
    }

    pipe.set(job_id.as_str(), payload);

    let _: () = pipe.query_async(&mut *conn).await?;

    queue.record_retry();
    pubsub::notify(queue, &job_id, job.status).await?;

    event!(Level::INFO, queue = %queue.name(), job = %job.key, "job retried");
    Ok(())
}
