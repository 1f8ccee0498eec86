use lazy_static::lazy_static;

use crate::{keys::QueueKeys, Error};

// KEYS:
//  1. schedule lock
//  2. incomplete sorted set
//  3. queued list
// ARGV:
//  1. lock ttl seconds
//  2. now, epoch seconds
const SCHEDULE_SCRIPT: &str = r##"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        redis.call('SETEX', KEYS[1], ARGV[1], 1)
        local jobs = redis.call('ZRANGEBYSCORE', KEYS[2], 1, ARGV[2])

        if next(jobs) then
            local scores = {}
            for _, v in ipairs(jobs) do
                table.insert(scores, 0)
                table.insert(scores, v)
            end
            redis.call('ZADD', KEYS[2], unpack(scores))
            redis.call('RPUSH', KEYS[3], unpack(jobs))
        end

        return jobs
    end
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(SCHEDULE_SCRIPT);
}

pub(crate) struct ScheduleScript(&'static redis::Script);

impl ScheduleScript {
    pub fn new() -> Self {
        ScheduleScript(&SCRIPT)
    }

    /// Returns the ids promoted from `incomplete` to `queued`. Empty if another worker
    /// currently holds the schedule lock.
    pub async fn run(
        &self,
        keys: &QueueKeys,
        conn: &mut deadpool_redis::Connection,
        lock_seconds: i64,
        now: i64,
    ) -> Result<Vec<String>, Error> {
        let promoted: Option<Vec<String>> = self
            .0
            .key(&keys.schedule)
            .key(&keys.incomplete)
            .key(&keys.queued)
            .arg(lock_seconds)
            .arg(now)
            .invoke_async(&mut **conn)
            .await?;

        Ok(promoted.unwrap_or_default())
    }
}
