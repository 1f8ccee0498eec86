use lazy_static::lazy_static;

use crate::{keys::QueueKeys, Error};

// KEYS:
//  1. sweep lock
//  2. active list
// ARGV:
//  1. lock ttl seconds
const SWEEP_SCRIPT: &str = r##"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        redis.call('SETEX', KEYS[1], ARGV[1], 1)
        return redis.call('LRANGE', KEYS[2], 0, -1)
    end
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(SWEEP_SCRIPT);
}

pub(crate) struct SweepScript(&'static redis::Script);

impl SweepScript {
    pub fn new() -> Self {
        SweepScript(&SCRIPT)
    }

    /// Returns every id currently in `active`, or empty if another worker holds the sweep
    /// lock. The caller (not this script) decides what to do with each id.
    pub async fn run(
        &self,
        keys: &QueueKeys,
        conn: &mut deadpool_redis::Connection,
        lock_seconds: i64,
    ) -> Result<Vec<String>, Error> {
        let ids: Option<Vec<String>> = self
            .0
            .key(&keys.sweep)
            .key(&keys.active)
            .arg(lock_seconds)
            .invoke_async(&mut **conn)
            .await?;

        Ok(ids.unwrap_or_default())
    }
}
