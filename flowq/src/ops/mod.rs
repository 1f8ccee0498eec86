pub(crate) mod abort;
pub(crate) mod finish;
pub(crate) mod retry;
pub(crate) mod stats;
pub(crate) mod update;

pub use stats::{CountKind, QueueInfo, WorkerStats};
