//! End-to-end pool behavior: every transfer path, ordering, cancellation,
//! timeouts, reconfiguration, and teardown.

use core::time::Duration;
use md5pool::{
    ArenaConfig, ByteSource, DigestWidth, Error, Md5Pool, PoolConfig, TaskOptions, digest_oneshot,
};
use std::io::Write;
use std::sync::{Arc, Mutex};

const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn pool_with(workers: usize, max_concurrent: usize, arena: Option<ArenaConfig>) -> Md5Pool {
    Md5Pool::new(PoolConfig {
        workers,
        max_concurrent,
        arena,
    })
    .expect("valid configuration")
}

fn small_chunks() -> Option<ArenaConfig> {
    Some(ArenaConfig {
        capacity: 1024 * 1024,
        chunk_size: 64 * 1024,
    })
}

#[tokio::test]
async fn digests_agree_across_transfer_paths() {
    let data = patterned(300 * 1024);
    let reference = digest_oneshot(&data, DigestWidth::Full);

    // Streaming: the input spans five 64 KiB chunks, the last one partial.
    let pool = pool_with(2, 2, small_chunks());
    let digest = pool
        .submit(data.clone().into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, reference);
    pool.destroy().await;

    // Arena one-shot: the input fits in a single chunk.
    let pool = pool_with(
        2,
        2,
        Some(ArenaConfig {
            capacity: 1024 * 1024,
            chunk_size: 512 * 1024,
        }),
    );
    let digest = pool
        .submit(data.clone().into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, reference);
    pool.destroy().await;

    // Inline: no arena at all.
    let pool = pool_with(2, 2, None);
    let digest = pool
        .submit(data.into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, reference);
    pool.destroy().await;
}

#[tokio::test]
async fn empty_input_hashes_to_known_digest() {
    let pool = pool_with(1, 1, Some(ArenaConfig::default()));
    let full = pool
        .submit(Vec::<u8>::new().into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(full, EMPTY_MD5);

    let half = pool
        .submit(
            Vec::<u8>::new().into(),
            TaskOptions {
                width: DigestWidth::Half,
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(half, &EMPTY_MD5[..16]);
    pool.destroy().await;
}

#[tokio::test]
async fn half_width_is_prefix_of_full_on_every_path() {
    let data = patterned(200 * 1024);
    let pool = pool_with(2, 2, small_chunks());

    let full = pool
        .submit(data.clone().into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    let half = pool
        .submit(
            data.into(),
            TaskOptions {
                width: DigestWidth::Half,
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(half.len(), 16);
    assert_eq!(half, full[..16]);
    pool.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_results_match_input_order() {
    let inputs: Vec<Vec<u8>> = (0..8).map(|i| patterned(10_000 + i * 1111)).collect();
    let expected: Vec<String> = inputs
        .iter()
        .map(|data| digest_oneshot(data, DigestWidth::Full))
        .collect();

    let pool = pool_with(3, 3, Some(ArenaConfig::default()));
    let sources = inputs.into_iter().map(ByteSource::from).collect();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = {
        let seen = Arc::clone(&seen);
        Arc::new(move |completed: usize, total: usize| {
            seen.lock().unwrap().push((completed, total));
        }) as md5pool::BatchProgressFn
    };

    let digests = pool
        .submit_batch(sources, DigestWidth::Full, Some(progress))
        .await
        .unwrap();
    assert_eq!(digests, expected);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 8);
    assert_eq!(seen.last(), Some(&(8, 8)));
    pool.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatched_count_never_exceeds_ceiling() {
    let pool = pool_with(4, 2, Some(ArenaConfig::default()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        handles.push(
            pool.submit(patterned(1024 * 1024).into(), TaskOptions::default())
                .await
                .unwrap(),
        );
    }

    for _ in 0..50 {
        let status = pool.status().await.unwrap();
        assert!(
            status.dispatched <= status.max_concurrent,
            "dispatched {} exceeded ceiling {}",
            status.dispatched,
            status.max_concurrent
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    for handle in handles {
        handle.digest().await.unwrap();
    }
    pool.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_second_task_while_first_in_flight() {
    // One worker, ceiling one: the second submission must wait behind the
    // first, which is large enough to still be streaming when the cancel
    // lands.
    let pool = pool_with(1, 1, Some(ArenaConfig::default()));

    let first = pool
        .submit(
            patterned(8 * 1024 * 1024).into(),
            TaskOptions {
                timeout: Some(Duration::ZERO),
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();
    let second = pool
        .submit(
            patterned(1024).into(),
            TaskOptions {
                timeout: Some(Duration::ZERO),
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(pool.cancel(second.id()).await);
    assert!(matches!(second.digest().await, Err(Error::Cancelled)));

    let expected = digest_oneshot(&patterned(8 * 1024 * 1024), DigestWidth::Full);
    assert_eq!(first.digest().await.unwrap(), expected);

    // Cancelling an unknown id reports false.
    let resolved = pool
        .submit(patterned(16).into(), TaskOptions::default())
        .await
        .unwrap();
    let id = resolved.id();
    resolved.digest().await.unwrap();
    assert!(!pool.cancel(id).await);
    pool.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deadline_rejects_slow_task_and_zero_never_fires() {
    let pool = pool_with(1, 1, None);

    let slow = pool
        .submit(
            patterned(32 * 1024 * 1024).into(),
            TaskOptions {
                timeout: Some(Duration::from_millis(1)),
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(slow.digest().await, Err(Error::Timeout)));

    // The pool stays usable, and a zero timeout means no deadline.
    let quick = pool
        .submit(
            patterned(512).into(),
            TaskOptions {
                timeout: Some(Duration::ZERO),
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        quick.digest().await.unwrap(),
        digest_oneshot(&patterned(512), DigestWidth::Full)
    );
    pool.destroy().await;
}

#[tokio::test]
async fn streaming_progress_is_monotonic_and_ends_at_100() {
    let data = patterned(300 * 1024);
    let pool = pool_with(1, 1, small_chunks());

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let observed = Arc::clone(&observed);
        Arc::new(move |pct: u8| observed.lock().unwrap().push(pct)) as md5pool::ProgressFn
    };

    let digest = pool
        .submit(
            data.clone().into(),
            TaskOptions {
                progress: Some(sink),
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, digest_oneshot(&data, DigestWidth::Full));

    let observed = observed.lock().unwrap();
    assert_eq!(*observed, vec![20, 40, 60, 80, 100]);
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(observed.iter().filter(|&&p| p == 100).count(), 1);
    pool.destroy().await;
}

#[tokio::test]
async fn file_sources_hash_on_both_paths() {
    let mut streamed = tempfile::NamedTempFile::new().unwrap();
    let big = patterned(200 * 1024);
    streamed.write_all(&big).unwrap();
    streamed.flush().unwrap();

    let mut small_file = tempfile::NamedTempFile::new().unwrap();
    let small = patterned(10 * 1024);
    small_file.write_all(&small).unwrap();
    small_file.flush().unwrap();

    let pool = pool_with(2, 2, small_chunks());

    let digest = pool
        .submit(
            ByteSource::File(streamed.path().to_path_buf()),
            TaskOptions::default(),
        )
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, digest_oneshot(&big, DigestWidth::Full));

    let digest = pool
        .submit(
            ByteSource::File(small_file.path().to_path_buf()),
            TaskOptions::default(),
        )
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, digest_oneshot(&small, DigestWidth::Full));
    pool.destroy().await;
}

#[tokio::test]
async fn missing_file_resolves_with_io_error() {
    let pool = pool_with(1, 1, None);
    let handle = pool
        .submit(
            ByteSource::File("/definitely/not/a/real/path".into()),
            TaskOptions::default(),
        )
        .await
        .unwrap();
    assert!(matches!(handle.digest().await, Err(Error::Io(_))));
    pool.destroy().await;
}

#[tokio::test]
async fn arena_disabled_pool_still_resolves_everything() {
    let pool = pool_with(2, 2, None);

    let status = pool.status().await.unwrap();
    assert!(!status.arena_enabled);
    assert!(status.arena.is_none());

    let data = patterned(2 * 1024 * 1024);
    let digest = pool
        .submit(data.clone().into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, digest_oneshot(&data, DigestWidth::Full));
    pool.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn arena_allocations_are_released_on_every_terminal_state() {
    let pool = pool_with(2, 2, small_chunks());

    // Completed tasks release their regions.
    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(
            pool.submit(patterned(200 * 1024).into(), TaskOptions::default())
                .await
                .unwrap(),
        );
    }
    for handle in handles {
        handle.digest().await.unwrap();
    }
    let usage = pool.status().await.unwrap().arena.unwrap();
    assert_eq!(usage.used, 0);
    assert_eq!(usage.fragments, 1);

    // A cancelled streaming task releases its region too.
    let victim = pool
        .submit(
            patterned(900 * 1024).into(),
            TaskOptions {
                timeout: Some(Duration::ZERO),
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let cancelled = pool.cancel(victim.id()).await;
    let outcome = victim.digest().await;
    if cancelled {
        assert!(matches!(outcome, Err(Error::Cancelled)));
    } else {
        // Lost the race: the stream finished first, which is fine.
        outcome.unwrap();
    }
    let usage = pool.status().await.unwrap().arena.unwrap();
    assert_eq!(usage.used, 0);
    pool.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reconfiguring_arena_rejects_in_flight_tasks() {
    let pool = pool_with(1, 1, small_chunks());

    let in_flight = pool
        .submit(
            patterned(8 * 1024 * 1024).into(),
            TaskOptions {
                timeout: Some(Duration::ZERO),
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();

    pool.disable_arena().await;
    assert!(matches!(
        in_flight.digest().await,
        Err(Error::PoolReconfigured)
    ));
    assert!(!pool.status().await.unwrap().arena_enabled);

    // The pool keeps working inline, and the arena can come back.
    let data = patterned(100 * 1024);
    let digest = pool
        .submit(data.clone().into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, digest_oneshot(&data, DigestWidth::Full));

    assert!(pool.enable_arena(1024 * 1024, 64 * 1024).await);
    assert!(pool.status().await.unwrap().arena_enabled);
    let digest = pool
        .submit(data.clone().into(), TaskOptions::default())
        .await
        .unwrap()
        .digest()
        .await
        .unwrap();
    assert_eq!(digest, digest_oneshot(&data, DigestWidth::Full));

    // Unusable sizing is refused.
    assert!(!pool.enable_arena(1024, 4096).await);
    pool.destroy().await;
}

#[tokio::test]
async fn status_reports_worker_and_queue_counts() {
    let pool = pool_with(3, 2, Some(ArenaConfig::default()));
    let status = pool.status().await.unwrap();
    assert_eq!(status.total_workers, 3);
    assert_eq!(status.idle_workers, 3);
    assert_eq!(status.queued, 0);
    assert_eq!(status.dispatched, 0);
    assert_eq!(status.max_concurrent, 2);
    assert!(status.arena_enabled);
    let usage = status.arena.unwrap();
    assert_eq!(usage.capacity, ArenaConfig::default().capacity);
    assert_eq!(usage.used, 0);
    pool.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn priorities_run_before_earlier_low_priority_submissions() {
    let pool = pool_with(1, 1, Some(ArenaConfig::default()));

    // Occupy the only worker so the next two submissions queue up.
    let blocker = pool
        .submit(patterned(4 * 1024 * 1024).into(), TaskOptions::default())
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let low = pool
        .submit(
            patterned(1024 * 1024).into(),
            TaskOptions {
                priority: 0,
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();
    let high = pool
        .submit(
            patterned(1024 * 1024).into(),
            TaskOptions {
                priority: 10,
                ..TaskOptions::default()
            },
        )
        .await
        .unwrap();

    let record = |label: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
        move |_digest: String| order.lock().unwrap().push(label)
    };
    let low_done = {
        let f = record("low", Arc::clone(&order));
        tokio::spawn(async move { f(low.digest().await.unwrap()) })
    };
    let high_done = {
        let f = record("high", Arc::clone(&order));
        tokio::spawn(async move { f(high.digest().await.unwrap()) })
    };

    blocker.digest().await.unwrap();
    low_done.await.unwrap();
    high_done.await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    pool.destroy().await;
}

#[tokio::test]
async fn destroy_rejects_outstanding_and_future_work() {
    let pool = pool_with(1, 1, Some(ArenaConfig::default()));

    let outstanding = pool
        .submit(patterned(8 * 1024 * 1024).into(), TaskOptions::default())
        .await
        .unwrap();
    pool.destroy().await;

    assert!(matches!(
        outstanding.digest().await,
        Err(Error::PoolShutdown)
    ));

    match pool.submit(patterned(16).into(), TaskOptions::default()).await {
        Err(Error::PoolShutdown) => {}
        Ok(handle) => {
            // The destroy command raced ahead of the shutdown flag; the
            // handle still resolves to the shutdown error.
            assert!(matches!(handle.digest().await, Err(Error::PoolShutdown)));
        }
        Err(other) => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn zero_worker_configuration_is_rejected() {
    let config = PoolConfig {
        workers: 0,
        max_concurrent: 1,
        arena: None,
    };
    assert!(matches!(
        Md5Pool::new(config),
        Err(Error::InvalidConfig { .. })
    ));
}
