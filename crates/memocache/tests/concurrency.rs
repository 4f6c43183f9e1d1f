use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use memocache::{CacheConfig, MemoCache};
use tempfile::TempDir;

#[test]
fn test_concurrent_misses_compute_once() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MemoCache::open(CacheConfig::new(dir.path())).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compute("slow", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                        Ok::<_, String>(42u64)
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 42);
    }

    let stats = cache.stats();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.fast_hits, 7);
}

#[test]
fn test_waiter_takes_over_after_failed_leader() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MemoCache::open(CacheConfig::new(dir.path())).unwrap());
    let (started_tx, started_rx) = mpsc::channel();

    let leader_cache = Arc::clone(&cache);
    let leader = thread::spawn(move || {
        leader_cache.get_or_compute::<u64, _, _>("k", || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            Err("upstream unavailable".to_string())
        })
    });

    started_rx.recv().unwrap();
    let value = cache
        .get_or_compute("k", || Ok::<_, String>(9u64))
        .unwrap();

    assert_eq!(value, 9);
    assert_eq!(leader.join().unwrap().unwrap_err(), "upstream unavailable");
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn test_panicking_compute_releases_waiters() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MemoCache::open(CacheConfig::new(dir.path())).unwrap());
    let (started_tx, started_rx) = mpsc::channel();

    let leader_cache = Arc::clone(&cache);
    let leader = thread::spawn(move || {
        leader_cache.get_or_compute::<u64, String, _>("k", || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            panic!("compute panicked");
        })
    });

    started_rx.recv().unwrap();
    let value = cache
        .get_or_compute("k", || Ok::<_, String>(1u64))
        .unwrap();

    assert_eq!(value, 1);
    assert!(leader.join().is_err());
}

#[test]
fn test_distinct_keys_compute_in_parallel() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MemoCache::open(CacheConfig::new(dir.path())).unwrap());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4u64)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                cache
                    .get_or_compute(&format!("k{i}"), || {
                        // Every leader must be inside compute at once to pass.
                        barrier.wait();
                        Ok::<_, String>(i)
                    })
                    .unwrap()
            })
        })
        .collect();

    let mut results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort();
    assert_eq!(results, vec![0, 1, 2, 3]);
    assert_eq!(cache.stats().misses, 4);
}

#[test]
fn test_invalidate_racing_durable_promotion() {
    for _ in 0..200 {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(
            MemoCache::open(CacheConfig::new(dir.path()).with_fast_capacity(1)).unwrap(),
        );
        cache.get_or_compute("k", || Ok::<_, String>(1u64)).unwrap();
        // Push "k" out of the fast tier so the reader has to promote it.
        cache.get_or_compute("other", || Ok::<_, String>(0u64)).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let reader = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_compute("k", || Ok::<_, String>(2u64)).unwrap()
            })
        };

        barrier.wait();
        cache.invalidate("k");
        reader.join().unwrap();

        let value = cache.get_or_compute("k", || Ok::<_, String>(2u64)).unwrap();
        assert_eq!(value, 2, "invalidated value served after invalidate returned");
    }
}

#[test]
fn test_invalidate_during_compute_discards_result() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MemoCache::open(CacheConfig::new(dir.path())).unwrap());
    let (started_tx, started_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();

    let leader_cache = Arc::clone(&cache);
    let leader = thread::spawn(move || {
        leader_cache.get_or_compute("k", || {
            started_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
            Ok::<_, String>(1u64)
        })
    });

    started_rx.recv().unwrap();
    cache.invalidate("k");
    resume_tx.send(()).unwrap();

    // The leader still gets its own result back.
    assert_eq!(leader.join().unwrap().unwrap(), 1);
    assert!(!cache.contains("k"));

    let calls = AtomicUsize::new(0);
    let value = cache
        .get_or_compute("k", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(2u64)
        })
        .unwrap();
    assert_eq!(value, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
