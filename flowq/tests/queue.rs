#![cfg(feature = "test_redis")]

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use flowq::{CountKind, EnqueueOptions, Job, MapItem, MapOptions, Queue, RedisPool, Status};
use futures::FutureExt;

async fn run_queue_test<T, Fut>(test: T)
where
    T: FnOnce(Queue) -> Fut,
    Fut: Future<Output = Result<(), flowq::Error>>,
{
    dotenv::dotenv().ok();
    let queue_name = format!("test-{}", uuid::Uuid::new_v4());
    let pool = RedisPool::new(None, None).expect("creating connection pool");
    let queue = Queue::new(pool.clone(), queue_name.clone());

    let result = AssertUnwindSafe(test(queue)).catch_unwind().await;

    let mut conn = pool.get().await.expect("cleanup: acquiring connection");
    let key_pattern = format!("saq:{}*", queue_name);
    let mut scan = redis::cmd("SCAN");
    let mut iter: redis::AsyncIter<String> = scan
        .cursor_arg(0)
        .arg("MATCH")
        .arg(&key_pattern)
        .arg("COUNT")
        .arg(100)
        .clone()
        .iter_async(&mut *conn)
        .await
        .expect("cleanup: scanning keyspace");

    let mut keys = Vec::new();
    while let Some(key) = iter.next_item().await {
        keys.push(key);
    }
    if !keys.is_empty() {
        let mut del = redis::cmd("DEL");
        for key in &keys {
            del.arg(key);
        }
        let _: () = del.query_async(&mut *conn).await.expect("cleanup: deleting keys");
    }

    result.expect("test panicked").expect("test returned an error");
}

#[tokio::test]
async fn round_trip_enqueue_dequeue_finish() {
    run_queue_test(|queue| async move {
        let mut job = Job::new(queue.name(), "add").with_key("k1");
        job.kwargs.insert("a".into(), 1.into());
        job.kwargs.insert("b".into(), 2.into());

        assert!(queue.enqueue(&mut job).await?);

        let dequeued = queue.dequeue(Duration::from_secs(1)).await?;
        let mut dequeued = dequeued.expect("job should be available");
        assert_eq!(dequeued.function, "add");
        assert_eq!(dequeued.status, Status::Queued);

        // The worker (out of scope for this crate) marks the job active and persists that
        // before running the function.
        dequeued.status = Status::Active;
        dequeued.started = chrono::Utc::now().timestamp();
        dequeued.attempts += 1;
        queue.update(&mut dequeued).await?;

        queue
            .finish(&mut dequeued, Status::Complete, Some(3.into()), None)
            .await?;

        let stored = queue.job("k1").await?.expect("record retained after finish");
        assert_eq!(stored.status, Status::Complete);
        assert_eq!(stored.result, Some(3.into()));
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn duplicate_enqueue_is_suppressed() {
    run_queue_test(|queue| async move {
        let mut first = Job::new(queue.name(), "noop").with_key("k2");
        let mut second = Job::new(queue.name(), "noop").with_key("k2");

        assert!(queue.enqueue(&mut first).await?);
        assert!(!queue.enqueue(&mut second).await?);
        assert_eq!(queue.count(CountKind::Incomplete).await?, 1);
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn scheduled_job_is_promoted_by_schedule() {
    run_queue_test(|queue| async move {
        let future = chrono::Utc::now().timestamp() + 2;
        let mut job = EnqueueOptions::default()
            .with_key("k3")
            .with_scheduled(future)
            .build(queue.name(), "noop", Default::default());

        assert!(queue.enqueue(&mut job).await?);
        assert_eq!(queue.count(CountKind::Queued).await?, 0);
        assert_eq!(queue.count(CountKind::Incomplete).await?, 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let promoted = queue.schedule(1).await?;
        assert_eq!(promoted.len(), 1);
        assert_eq!(queue.count(CountKind::Queued).await?, 1);
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn sweep_reclaims_an_orphaned_active_entry() {
    run_queue_test(|queue| async move {
        let active_key = format!("saq:{}:active", queue.name());
        let ghost_id = format!("saq:job:{}:ghost", queue.name());

        let pool = RedisPool::new(None, None)?;
        let mut conn = pool.get().await?;
        let _: () = redis::cmd("RPUSH")
            .arg(&active_key)
            .arg(&ghost_id)
            .query_async(&mut *conn)
            .await?;

        let swept = queue.sweep(1).await?;
        assert_eq!(swept, vec![ghost_id]);
        assert_eq!(queue.count(CountKind::Active).await?, 0);
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn abort_while_still_queued_finishes_immediately() {
    run_queue_test(|queue| async move {
        let mut job = Job::new(queue.name(), "noop").with_key("k4");
        queue.enqueue(&mut job).await?;

        queue.abort(&mut job, "stop".to_string(), 5).await?;

        let stored = queue.job("k4").await?.expect("record present");
        assert_eq!(stored.status, Status::Aborted);
        assert_eq!(queue.count(CountKind::Queued).await?, 0);
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn map_waits_for_every_job_to_finish() {
    run_queue_test(|queue| async move {
        let queue_for_worker = queue.clone();
        let worker = tokio::spawn(async move {
            for _ in 0..2 {
                if let Some(mut job) = queue_for_worker.dequeue(Duration::from_secs(5)).await.unwrap() {
                    let result = {
                        let a = job.kwargs.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
                        let b = job.kwargs.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
                        a + b
                    };
                    queue_for_worker
                        .finish(&mut job, Status::Complete, Some(result.into()), None)
                        .await
                        .unwrap();
                }
            }
        });

        let items: Vec<serde_json::Map<String, serde_json::Value>> = vec![
            [
                ("a".to_string(), serde_json::Value::from(1)),
                ("b".to_string(), serde_json::Value::from(2)),
            ]
            .into_iter()
            .collect(),
            [
                ("a".to_string(), serde_json::Value::from(3)),
                ("b".to_string(), serde_json::Value::from(4)),
            ]
            .into_iter()
            .collect(),
        ];

        let results = queue
            .map(
                "add",
                items,
                EnqueueOptions::default(),
                MapOptions {
                    timeout: Some(Duration::from_secs(10)),
                    return_exceptions: false,
                },
            )
            .await?;

        worker.await.ok();

        let sums: Vec<i64> = results
            .into_iter()
            .map(|item| match item {
                MapItem::Done(job) => job.result.and_then(|v| v.as_i64()).unwrap_or(-1),
                MapItem::Failed(_) => -1,
            })
            .collect();
        assert_eq!(sums, vec![3, 7]);
        Ok(())
    })
    .await;
}
