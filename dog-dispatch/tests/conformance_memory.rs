//! Protocol conformance against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dog_dispatch::prelude::*;
use dog_dispatch::queue::QueueManager;
use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::sync::Notify;

fn config() -> DispatchConfig {
    DispatchConfig::default().with_poll_interval(Duration::from_millis(20))
}

fn setup() -> (Arc<MemoryStore>, Client) {
    let store = Arc::new(MemoryStore::new());
    let client = Client::new(store.clone(), config());
    (store, client)
}

fn resize_handler() -> impl WorkHandler {
    handler_fn(|_job, input: Vec<u8>| async move {
        let name = String::from_utf8_lossy(&input).replace(".png", "_small.png");
        Ok(name.into_bytes())
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ids_are_unique_and_dense_under_concurrent_clients() {
    let store = Arc::new(MemoryStore::new());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = Client::new(store.clone(), config());
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..25 {
                let submitted = client
                    .run("resize", "x", Dispatch::normal(), RunOptions::new())
                    .await
                    .unwrap();
                ids.push(submitted.job_id.value());
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        let ids = task.await.unwrap();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        all.extend(ids);
    }

    all.sort_unstable();
    assert_eq!(all, (1..=200).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_lane_job_is_delivered_exactly_once() {
    let (store, client) = setup();
    let seen: Arc<Mutex<Vec<JobId>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let seen = seen.clone();
        let mut worker = Worker::new(store.clone(), config());
        worker
            .accept(
                "resize",
                handler_fn(move |job: JobContext, input: Vec<u8>| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().push(job.job_id());
                        Ok(input)
                    }
                }),
            )
            .await
            .unwrap();
        handles.push(worker.start());
    }

    let mut ids = Vec::new();
    for i in 0..200u32 {
        let dispatch = match i % 3 {
            0 => Dispatch::high(),
            1 => Dispatch::normal(),
            _ => Dispatch::low(),
        };
        ids.push(client.run("resize", "x", dispatch, RunOptions::new()).await.unwrap().job_id);
    }

    for id in &ids {
        let outcome = client.wait("resize", *id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Signaled);
    }

    for handle in handles {
        handle.shutdown().await.unwrap();
    }

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, ids);
    assert_eq!(client.roll_call("resize").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn due_scheduled_job_is_claimed_by_exactly_one_poller() {
    let store = Arc::new(MemoryStore::new());
    let keys = config().key_space();
    let queue = QueueManager::new(store.clone(), keys.clone());

    let due = Utc::now() + chrono::Duration::seconds(30);
    queue.enqueue("report", JobId(1), Dispatch::at(due)).await.unwrap();

    let before = queue
        .claim_at("report", due - chrono::Duration::milliseconds(1), Duration::from_millis(1))
        .await
        .unwrap();
    assert!(before.is_none());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let queue = QueueManager::new(store.clone(), keys.clone());
        tasks.push(tokio::spawn(async move {
            queue.claim_at("report", due, Duration::from_millis(5)).await.unwrap()
        }));
    }

    let mut claims = Vec::new();
    for task in tasks {
        if let Some(claim) = task.await.unwrap() {
            claims.push(claim.job_id);
        }
    }
    assert_eq!(claims, vec![JobId(1)]);
}

#[tokio::test]
async fn blocking_wait_is_released_by_completion() {
    let (store, client) = setup();

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .run(
                    "resize",
                    "img1.png",
                    Dispatch::normal(),
                    RunOptions::new().blocking(Duration::from_secs(5)),
                )
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut worker = Worker::new(store, config());
    worker.accept("resize", resize_handler()).await.unwrap();
    let handle = worker.start();

    let submitted = waiter.await.unwrap();
    assert_eq!(submitted.wait, Some(WaitOutcome::Signaled));

    let record = client.get("resize", submitted.job_id).await.unwrap().unwrap();
    assert!(record.status.is_terminal());
    assert_eq!(record.output.as_deref(), Some(&b"img1_small.png"[..]));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_roll_call_modifies_nothing() {
    let (store, client) = setup();
    let keys = client.config().key_space();

    let mut worker = Worker::new(store.clone(), config());
    worker.accept("transcode", resize_handler()).await.unwrap();
    client.run("transcode", "a.mov", Dispatch::low(), RunOptions::new()).await.unwrap();
    worker.start().shutdown().await.unwrap();

    let pending_before = client.pending("transcode").await.unwrap();
    let counter_before = store.get(&keys.id_counter("transcode")).await.unwrap();

    let err = client
        .run("transcode", "b.mov", Dispatch::high(), RunOptions::new().with_roll_call())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::RollCallFailed { .. }));

    assert_eq!(client.pending("transcode").await.unwrap(), pending_before);
    assert_eq!(store.get(&keys.id_counter("transcode")).await.unwrap(), counter_before);
    assert!(client.get("transcode", JobId(2)).await.unwrap().is_none());
}

#[tokio::test]
async fn terminal_get_is_idempotent() {
    let (store, client) = setup();
    let mut worker = Worker::new(store, config());
    worker.accept("resize", resize_handler()).await.unwrap();

    let submitted = client
        .run("resize", "img1.png", Dispatch::normal(), RunOptions::new())
        .await
        .unwrap();
    worker.poll_once("resize").await.unwrap();

    let first = client.get("resize", submitted.job_id).await.unwrap().unwrap();
    for _ in 0..3 {
        let again = client.get("resize", submitted.job_id).await.unwrap().unwrap();
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn scenario_a_resize_succeeds() {
    let (store, client) = setup();
    let mut worker = Worker::new(store, config());
    worker.accept("resize", resize_handler()).await.unwrap();
    let handle = worker.start();

    let submitted = client
        .run("resize", "img1.png", Dispatch::normal(), RunOptions::new())
        .await
        .unwrap();
    let outcome = client
        .wait("resize", submitted.job_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(outcome.is_signaled());

    let record = client.get("resize", submitted.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(record.output_lossy().as_deref(), Some("img1_small.png"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn scenario_b_roll_call_with_zero_presence() {
    let (store, client) = setup();
    let keys = client.config().key_space();

    let mut worker = Worker::new(store.clone(), config());
    worker.accept("transcode", resize_handler()).await.unwrap();
    worker.start().shutdown().await.unwrap();
    assert_eq!(client.roll_call("transcode").await.unwrap(), 0);

    let err = client
        .run("transcode", "a.mov", Dispatch::normal(), RunOptions::new().with_roll_call())
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::RollCallFailed { .. }));
    assert!(store.get(&keys.id_counter("transcode")).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn scenario_c_blocking_run_without_workers_times_out() {
    let (_, client) = setup();
    let started = tokio::time::Instant::now();

    let submitted = client
        .run(
            "orphan",
            "payload",
            Dispatch::normal(),
            RunOptions::new().blocking(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(submitted.job_id, JobId(1));
    assert_eq!(submitted.wait, Some(WaitOutcome::TimedOut));

    let record = client.get("orphan", submitted.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Idle);
}

#[tokio::test]
async fn scenario_d_scheduled_job_waits_for_due_time() {
    let store = Arc::new(MemoryStore::new());
    let queue = QueueManager::new(store.clone(), config().key_space());

    let now = Utc::now();
    let due = now + chrono::Duration::seconds(10);
    queue.enqueue("report", JobId(1), Dispatch::at(due)).await.unwrap();

    let wait = Duration::from_millis(1);
    for offset_ms in [0, 5_000, 9_999] {
        let at = now + chrono::Duration::milliseconds(offset_ms);
        assert!(queue.claim_at("report", at, wait).await.unwrap().is_none());
    }
    let claim = queue.claim_at("report", due, wait).await.unwrap().unwrap();
    assert_eq!(claim.job_id, JobId(1));
}

#[tokio::test]
async fn scenario_d_worker_runs_scheduled_job_once_due() {
    let (store, client) = setup();
    let mut worker = Worker::new(store, config());
    worker.accept("report", resize_handler()).await.unwrap();

    let due = Utc::now() + chrono::Duration::milliseconds(300);
    let submitted = client
        .run("report", "r.png", Dispatch::at(due), RunOptions::new())
        .await
        .unwrap();

    assert_eq!(worker.poll_once("report").await.unwrap(), None);
    let record = client.get("report", submitted.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Idle);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(worker.poll_once("report").await.unwrap(), Some(submitted.job_id));

    let record = client.get("report", submitted.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Success);
}

#[tokio::test]
async fn scenario_e_progress_is_visible_while_busy() {
    let (store, client) = setup();
    let updated = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let mut worker = Worker::new(store, config());
    {
        let updated = updated.clone();
        let release = release.clone();
        worker
            .accept(
                "encode",
                handler_fn(move |job: JobContext, input: Vec<u8>| {
                    let updated = updated.clone();
                    let release = release.clone();
                    async move {
                        job.update(3, 10).await.map_err(|e| WorkError::new(e.to_string()))?;
                        updated.notify_one();
                        release.notified().await;
                        Ok(input)
                    }
                }),
            )
            .await
            .unwrap();
    }
    let handle = worker.start();

    let submitted = client
        .run("encode", "clip", Dispatch::normal(), RunOptions::new())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), updated.notified())
        .await
        .unwrap();

    let record = client.get("encode", submitted.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Busy);
    assert_eq!(record.dividend, Some(3));
    assert_eq!(record.divisor, Some(10));
    assert!(record.output.is_none());

    release.notify_one();
    let outcome = client
        .wait("encode", submitted.job_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(outcome.is_signaled());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unrelated_functions_are_isolated() {
    let (store, client) = setup();
    let mut worker = Worker::new(store, config());
    worker.accept("resize", resize_handler()).await.unwrap();

    client.run("thumb", "t.png", Dispatch::high(), RunOptions::new()).await.unwrap();
    assert_eq!(worker.poll_once("resize").await.unwrap(), None);
    assert_eq!(client.pending("thumb").await.unwrap().high, 1);
}

proptest! {
    #[test]
    fn lanes_drain_by_priority_then_fifo(priorities in proptest::collection::vec(0u8..3, 0..40)) {
        let order = tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new());
            let queue = QueueManager::new(store, config().key_space());

            for (i, p) in priorities.iter().enumerate() {
                let dispatch = match *p {
                    0 => Dispatch::low(),
                    1 => Dispatch::normal(),
                    _ => Dispatch::high(),
                };
                queue.enqueue("f", JobId(i as u64 + 1), dispatch).await.unwrap();
            }

            let mut order = Vec::new();
            while let Some(claim) = queue.claim("f", Duration::from_millis(1)).await.unwrap() {
                order.push(claim.job_id.value());
            }
            order
        });

        let mut expected: Vec<(u8, u64)> = priorities
            .iter()
            .enumerate()
            .map(|(i, p)| (*p, i as u64 + 1))
            .collect();
        expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected: Vec<u64> = expected.into_iter().map(|(_, id)| id).collect();

        prop_assert_eq!(order, expected);
    }
}
