//! Per-job status-change notifications over the store's pub/sub channels.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tracing::{event, Level};

use crate::{keys, Error, Queue, Status};

/// Invoked for every status-change message `listen` observes (including the synthetic ones
/// produced for jobs that were already terminal at subscribe time). Return `true` to stop
/// listening.
#[async_trait]
pub trait ListenCallback: Send {
    async fn on_status(&mut self, job_key: &str, status: Status) -> bool;
}

#[async_trait]
impl<F> ListenCallback for F
where
    F: FnMut(&str, Status) -> bool + Send,
{
    async fn on_status(&mut self, job_key: &str, status: Status) -> bool {
        (self)(job_key, status)
    }
}

/// Publish a job's current status on its channel. Called after the transactional state change
/// that produced the status, so subscribers observing it may assume the record reflects it.
pub(crate) async fn notify(queue: &Queue, job_id: &str, status: Status) -> Result<(), Error> {
    let mut conn = queue.store().get().await?;
    let _: () = conn.publish(job_id, status.as_str()).await?;
    Ok(())
}

/// Subscribe to status changes for `job_keys` and invoke `callback` for each one, including a
/// synthetic callback for any job that is already terminal at subscribe time (so a job that
/// finishes between a caller's enqueue and its subscribe can't be missed).
///
/// Unsubscribes before returning in every case: normal callback-requested stop, timeout, or
/// error.
pub(crate) async fn listen<C: ListenCallback>(
    queue: &Queue,
    job_keys: &[String],
    mut callback: C,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let job_ids: Vec<String> = job_keys
        .iter()
        .map(|key| keys::job_id(queue.name(), key))
        .collect();

    let mut pubsub = queue.store().pubsub().await?;
    for id in &job_ids {
        pubsub.subscribe(id).await?;
    }

    let result = run_listen(queue, &job_ids, &mut pubsub, &mut callback, timeout).await;

    for id in &job_ids {
        // Best-effort: the connection may already be gone if we timed out or errored badly.
        let _ = pubsub.unsubscribe(id).await;
    }

    result
}

async fn run_listen<C: ListenCallback>(
    queue: &Queue,
    job_ids: &[String],
    pubsub: &mut redis::aio::PubSub,
    callback: &mut C,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    // Sample each job's current record once now that we're subscribed, so a job that reached
    // a terminal status before our subscribe took effect still gets observed.
    if poll_terminal_once(queue, job_ids, callback).await? {
        return Ok(());
    }

    let body = async {
        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel: String = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(_) => continue,
            };
            let Some(status) = Status::from_str(&payload) else {
                continue;
            };
            let job_key = keys::key_from_id(&channel).to_string();
            if callback.on_status(&job_key, status).await {
                break;
            }
        }
        Ok::<(), Error>(())
    };

    match timeout {
        Some(t) => match tokio::time::timeout(t, body).await {
            Ok(r) => r,
            Err(_) => {
                event!(Level::DEBUG, queue = %queue.name(), "listen timed out");
                Err(Error::Timeout)
            }
        },
        None => body.await,
    }
}

async fn poll_terminal_once<C: ListenCallback>(
    queue: &Queue,
    job_ids: &[String],
    callback: &mut C,
) -> Result<bool, Error> {
    if job_ids.is_empty() {
        return Ok(false);
    }

    let mut conn = queue.store().get().await?;
    // `Commands::get` downgrades to a bare `GET` (not `MGET`) when the key slice has exactly one
    // element, which doesn't decode into `Vec<Option<Vec<u8>>>`. Issue `MGET` explicitly so the
    // reply shape doesn't depend on how many jobs are being polled.
    let blobs: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(job_ids).query_async(&mut *conn).await?;

    for (id, blob) in job_ids.iter().zip(blobs) {
        let Some(blob) = blob else { continue };
        let job = match queue.load_job(&blob) {
            Ok(job) => job,
            Err(_) => continue,
        };
        if job.status.is_terminal() {
            let job_key = keys::key_from_id(id).to_string();
            if callback.on_status(&job_key, job.status).await {
                return Ok(true);
            }
        }
    }

    Ok(false)
}
