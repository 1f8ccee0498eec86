//! Deterministic naming of every key a queue touches in the shared store.

pub(crate) const ID_PREFIX: &str = "saq:job:";

/// Every key name a [`crate::Queue`] needs, precomputed once at construction.
#[derive(Debug, Clone)]
pub(crate) struct QueueKeys {
    pub incomplete: String,
    pub queued: String,
    pub active: String,
    pub schedule: String,
    pub sweep: String,
    pub stats: String,
}

impl QueueKeys {
    pub fn new(queue: &str) -> QueueKeys {
        QueueKeys {
            incomplete: namespace(queue, "incomplete"),
            queued: namespace(queue, "queued"),
            active: namespace(queue, "active"),
            schedule: namespace(queue, "schedule"),
            sweep: namespace(queue, "sweep"),
            stats: namespace(queue, "stats"),
        }
    }

    pub fn stats_worker(&self, queue: &str, worker_uuid: &str) -> String {
        namespace(queue, &format!("stats:{}", worker_uuid))
    }
}

/// `saq:<queue>:<part>`, e.g. the `incomplete`/`queued`/`active`/`schedule`/`sweep`/`stats` keys.
pub(crate) fn namespace(queue: &str, part: &str) -> String {
    format!("saq:{}:{}", queue, part)
}

/// The full store id for a job: `saq:job:<queue>:<key>`.
pub(crate) fn job_id(queue: &str, key: &str) -> String {
    format!("{}{}:{}", ID_PREFIX, queue, key)
}

/// The short-lived marker that blocks re-enqueue of an aborted key.
pub(crate) fn abort_id(job_id: &str) -> String {
    format!("{}:abort", job_id)
}

/// Inverse of [`job_id`]: recovers the user-supplied key from a fully-qualified job id.
pub(crate) fn key_from_id(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_and_key_from_id_round_trip() {
        let id = job_id("myqueue", "abc-123");
        assert_eq!(id, "saq:job:myqueue:abc-123");
        assert_eq!(key_from_id(&id), "abc-123");
    }

    #[test]
    fn abort_id_appends_suffix() {
        let id = job_id("q", "k");
        assert_eq!(abort_id(&id), "saq:job:q:k:abort");
    }

    #[test]
    fn namespace_joins_with_colons() {
        assert_eq!(namespace("q", "queued"), "saq:q:queued");
    }
}
