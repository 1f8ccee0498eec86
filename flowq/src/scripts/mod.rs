mod enqueue;
mod schedule;
mod sweep;

pub(crate) use enqueue::EnqueueScript;
pub(crate) use schedule::ScheduleScript;
pub(crate) use sweep::SweepScript;
