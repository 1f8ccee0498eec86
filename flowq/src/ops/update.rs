use chrono::Utc;
use redis::AsyncCommands;

use crate::{keys, pubsub, Error, Job, Queue};

/// Touch a job's `touched` timestamp and persist its current record. Called by a worker
/// periodically to satisfy a job's `heartbeat` contract, and also used to persist mid-run
/// `progress` updates.
pub(crate) async fn update(queue: &Queue, job: &mut Job) -> Result<(), Error> {
    job.touched = Utc::now().timestamp();

    let job_id = keys::job_id(queue.name(), &job.key);
    let payload = queue.codec().dump(job)?;

    let mut conn = queue.store().get().await?;
    let _: () = conn.set(job_id.as_str(), payload).await?;

    pubsub::notify(queue, &job_id, job.status).await?;
    Ok(())
}
