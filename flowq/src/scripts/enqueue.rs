use lazy_static::lazy_static;

use crate::{keys::QueueKeys, Error};

// KEYS:
//  1. incomplete sorted set
//  2. this job's store id (also doubles as the zset member/string value)
//  3. queued list
//  4. abort marker id for this job's key
// ARGV:
//  1. serialized job bytes
//  2. scheduled epoch seconds (as a string; "0" means ready now)
const ENQUEUE_SCRIPT: &str = r##"
    if redis.call('ZSCORE', KEYS[1], KEYS[2]) == false and redis.call('EXISTS', KEYS[4]) == 0 then
        redis.call('SET', KEYS[2], ARGV[1])
        redis.call('ZADD', KEYS[1], ARGV[2], KEYS[2])
        if ARGV[2] == '0' then redis.call('RPUSH', KEYS[3], KEYS[2]) end
        return 1
    else
        return nil
    end
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(ENQUEUE_SCRIPT);
}

pub(crate) struct EnqueueScript(&'static redis::Script);

impl EnqueueScript {
    pub fn new() -> Self {
        EnqueueScript(&SCRIPT)
    }

    /// Returns `true` if the job was actually inserted, `false` if it was a no-op (duplicate
    /// key still incomplete, or an abort marker is blocking re-enqueue).
    pub async fn run(
        &self,
        keys: &QueueKeys,
        conn: &mut deadpool_redis::Connection,
        job_id: &str,
        abort_id: &str,
        payload: &[u8],
        scheduled: i64,
    ) -> Result<bool, Error> {
        let inserted: Option<i32> = self
            .0
            .key(&keys.incomplete)
            .key(job_id)
            .key(&keys.queued)
            .key(abort_id)
            .arg(payload)
            .arg(scheduled)
            .invoke_async(&mut **conn)
            .await?;

        Ok(inserted.is_some())
    }
}
