//! The injected serializer pair a [`crate::Queue`] uses to turn a [`Job`] into store bytes
//! and back. JSON is the default, but a host crate may plug in anything that round-trips
//! every `Job` field.

use crate::{Error, Job};

pub trait Codec: Send + Sync {
    fn dump(&self, job: &Job) -> Result<Vec<u8>, Error>;
    fn load(&self, bytes: &[u8]) -> Result<Job, Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn dump(&self, job: &Job) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(job)?)
    }

    fn load(&self, bytes: &[u8]) -> Result<Job, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_round_trips_a_job() {
        let codec = JsonCodec;
        let mut job = Job::new("q", "add").with_kwargs({
            let mut m = serde_json::Map::new();
            m.insert("a".into(), 1.into());
            m.insert("b".into(), 2.into());
            m
        });
        job.status = crate::Status::Queued;

        let bytes = codec.dump(&job).unwrap();
        let loaded = codec.load(&bytes).unwrap();

        assert_eq!(loaded.function, job.function);
        assert_eq!(loaded.kwargs, job.kwargs);
        assert_eq!(loaded.queue, job.queue);
        assert_eq!(loaded.key, job.key);
        assert_eq!(loaded.status, job.status);
    }
}
