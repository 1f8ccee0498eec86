use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] flowq_store::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    #[error("job {0:?} is registered to a different queue")]
    QueueMismatch(String),

    #[error("job error: {0}")]
    Job(#[from] crate::map::JobError),

    #[error("operation timed out")]
    Timeout,
}
