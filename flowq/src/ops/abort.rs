use redis::AsyncCommands;
use tracing::{event, Level};

use crate::{job::Status, keys, ops, Error, Job, Queue};

/// Request cancellation of `job`. If it was only queued (never dequeued), it's finished as
/// ABORTED immediately and the abort marker is cleared right away. If it's already active, the
/// marker is left in place: a cooperating worker polling for it finishes the job itself, and an
/// unresponsive worker's entry is eventually reclaimed by `sweep`.
pub(crate) async fn abort(
    queue: &Queue,
    job: &mut Job,
    error: String,
    ttl_seconds: i64,
) -> Result<(), Error> {
    let job_id = keys::job_id(queue.name(), &job.key);
    let abort_id = keys::abort_id(&job_id);

    let mut conn = queue.store().get().await?;
    let (dequeued,): (i64,) = redis::pipe()
        .atomic()
        .lrem(queue.keys().queued.as_str(), 0, job_id.as_str())
        .zrem(queue.keys().incomplete.as_str(), job_id.as_str())
        .ignore()
        .expire(job_id.as_str(), (ttl_seconds + 1) as usize)
        .ignore()
        .set_ex(abort_id.as_str(), error.as_str(), ttl_seconds as usize)
        .ignore()
        .query_async(&mut *conn)
        .await?;

    if dequeued > 0 {
        ops::finish::finish(queue, job, Status::Aborted, None, Some(error)).await?;
        let _: () = conn.del(abort_id.as_str()).await?;
    } else {
        event!(Level::DEBUG, queue = %queue.name(), job = %job.key, "abort marker set for active job");
    }

    Ok(())
}
