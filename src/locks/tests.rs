//! Tests for the locking subsystem.

use super::*;
use crate::error::CubbyError;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const KEY: &str = "/tmp/store/users.json";

/// Poll a condition until it holds or two seconds pass.
fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for: {}", what);
}

#[test]
fn readers_share_a_key() {
    let table = LockTable::new();

    let first = table.acquire_read(KEY, None).unwrap();
    let second = table.acquire_read(KEY, None).unwrap();

    let stats = table.stats(KEY);
    assert_eq!(stats.readers, 2);
    assert!(!stats.writer_held);
    assert_eq!(stats.queue_len, 0);

    drop(first);
    drop(second);
}

#[test]
fn writer_excludes_readers_and_writers() {
    let table = LockTable::new();
    let _writer = table.acquire_write(KEY, None).unwrap();

    let stats = table.stats(KEY);
    assert!(stats.writer_held);
    assert_eq!(stats.readers, 0);

    // Neither a reader nor a second writer can get in.
    let read_err = table
        .acquire_read(KEY, Some(Duration::from_millis(50)))
        .unwrap_err();
    assert!(matches!(
        read_err,
        CubbyError::LockTimeout {
            kind: LockKind::Read,
            ..
        }
    ));

    let write_err = table
        .acquire_write(KEY, Some(Duration::from_millis(50)))
        .unwrap_err();
    assert!(matches!(
        write_err,
        CubbyError::LockTimeout {
            kind: LockKind::Write,
            ..
        }
    ));
}

#[test]
fn zero_timeout_behaves_like_try_lock() {
    let table = LockTable::new();
    let _writer = table.acquire_write(KEY, None).unwrap();

    let err = table
        .acquire_read(KEY, Some(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, CubbyError::LockTimeout { .. }));
}

#[test]
fn lock_timeout_error_names_the_key() {
    let table = LockTable::new();
    let _writer = table.acquire_write(KEY, None).unwrap();

    let err = table
        .acquire_write(KEY, Some(Duration::from_millis(20)))
        .unwrap_err();
    match err {
        CubbyError::LockTimeout { key, kind } => {
            assert_eq!(key, KEY);
            assert_eq!(kind, LockKind::Write);
        }
        other => panic!("expected LockTimeout, got: {}", other),
    }
}

#[test]
fn distinct_keys_do_not_contend() {
    let table = LockTable::new();

    let _writer_a = table.acquire_write("/a", None).unwrap();
    // A writer on a different key is granted immediately.
    let _writer_b = table
        .acquire_write("/b", Some(Duration::ZERO))
        .unwrap();
}

#[test]
fn fifo_read_then_write_after_writer() {
    // W1 held, then R2 and W3 enqueued in that order. Releasing W1 grants
    // R2 (and only R2); releasing R2 grants W3.
    let table = LockTable::new();
    let writer1 = table.acquire_write(KEY, None).unwrap();

    let (granted_tx, granted_rx) = mpsc::channel::<&'static str>();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let t2 = {
        let table = table.clone();
        let granted_tx = granted_tx.clone();
        thread::spawn(move || {
            let guard = table.acquire_read(KEY, Some(Duration::from_secs(5))).unwrap();
            granted_tx.send("r2").unwrap();
            release_rx.recv().unwrap();
            drop(guard);
        })
    };
    {
        let table = table.clone();
        wait_until("R2 queued", move || table.stats(KEY).queue_len == 1);
    }

    let t3 = {
        let table = table.clone();
        thread::spawn(move || {
            let guard = table.acquire_write(KEY, Some(Duration::from_secs(5))).unwrap();
            granted_tx.send("w3").unwrap();
            drop(guard);
        })
    };
    {
        let table = table.clone();
        wait_until("W3 queued", move || table.stats(KEY).queue_len == 2);
    }

    drop(writer1);

    // R2 is granted first; W3 must still be queued behind it.
    assert_eq!(granted_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "r2");
    let stats = table.stats(KEY);
    assert_eq!(stats.readers, 1);
    assert!(!stats.writer_held);
    assert_eq!(stats.queue_len, 1);

    release_tx.send(()).unwrap();
    assert_eq!(granted_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "w3");

    t2.join().unwrap();
    t3.join().unwrap();
}

#[test]
fn adjacent_reads_are_granted_as_a_batch() {
    // Two reads queued back-to-back behind a writer are both granted the
    // instant the writer releases (one admission pass, submission order).
    let table = LockTable::new();
    let writer = table.acquire_write(KEY, None).unwrap();

    let (granted_tx, granted_rx) = mpsc::channel::<&'static str>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = std::sync::Arc::new(std::sync::Mutex::new(release_rx));

    let mut joins = Vec::new();
    for (label, expected_queue) in [("r1", 1), ("r2", 2)] {
        let thread_table = table.clone();
        let granted_tx = granted_tx.clone();
        let release_rx = release_rx.clone();
        joins.push(thread::spawn(move || {
            let guard = thread_table.acquire_read(KEY, Some(Duration::from_secs(5))).unwrap();
            granted_tx.send(label).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            drop(guard);
        }));
        {
            let table = table.clone();
            wait_until("read queued", move || {
                table.stats(KEY).queue_len == expected_queue
            });
        }
    }

    drop(writer);

    // Both reads arrive without anything else being released. The threads
    // race to report, so collect rather than assert arrival order.
    let mut granted = vec![
        granted_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        granted_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
    ];
    granted.sort_unstable();
    assert_eq!(granted, ["r1", "r2"]);

    let stats = table.stats(KEY);
    assert_eq!(stats.readers, 2);
    assert!(!stats.writer_held);
    assert_eq!(stats.queue_len, 0);

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    for join in joins {
        join.join().unwrap();
    }
}

#[test]
fn pending_writer_blocks_reads_queued_behind_it() {
    // Strict FIFO: a read enqueued after a blocked write must not jump it,
    // even though the key currently only holds readers.
    let table = LockTable::new();
    let reader = table.acquire_read(KEY, None).unwrap();

    let writer_thread = {
        let table = table.clone();
        thread::spawn(move || {
            // Blocked behind the active reader until the main thread is done.
            let guard = table.acquire_write(KEY, Some(Duration::from_secs(5))).unwrap();
            drop(guard);
        })
    };
    {
        let table = table.clone();
        wait_until("writer queued", move || table.stats(KEY).queue_len == 1);
    }

    let err = table
        .acquire_read(KEY, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert!(matches!(
        err,
        CubbyError::LockTimeout {
            kind: LockKind::Read,
            ..
        }
    ));

    drop(reader);
    writer_thread.join().unwrap();
}

#[test]
fn timed_out_request_is_not_granted_retroactively() {
    let table = LockTable::new();
    let writer = table.acquire_write(KEY, None).unwrap();

    let waiter = {
        let table = table.clone();
        thread::spawn(move || table.acquire_read(KEY, Some(Duration::from_millis(100))))
    };
    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(CubbyError::LockTimeout { .. })));

    // The request is gone from the queue; releasing the writer leaves the
    // key fully idle instead of resurrecting the dead waiter.
    drop(writer);
    let stats = table.stats(KEY);
    assert_eq!(stats.readers, 0);
    assert!(!stats.writer_held);
    assert_eq!(stats.queue_len, 0);
}

#[test]
fn idle_entries_are_garbage_collected() {
    let table = LockTable::new();
    assert_eq!(table.tracked_keys(), 0);

    let guard = table.acquire_write(KEY, None).unwrap();
    assert_eq!(table.tracked_keys(), 1);

    drop(guard);
    assert_eq!(table.tracked_keys(), 0);
    assert_eq!(table.stats(KEY), LockStats::default());
}

#[test]
fn timed_out_request_unblocks_the_queue_behind_it() {
    // R1 held, W2 queued, R3 queued behind W2. When W2 times out, R3 is at
    // the head and must be granted immediately (R1 is still a reader).
    let table = LockTable::new();
    let reader1 = table.acquire_read(KEY, None).unwrap();

    let w2 = {
        let table = table.clone();
        thread::spawn(move || table.acquire_write(KEY, Some(Duration::from_millis(400))))
    };
    {
        let table = table.clone();
        wait_until("W2 queued", move || table.stats(KEY).queue_len == 1);
    }

    let r3 = {
        let table = table.clone();
        thread::spawn(move || {
            let guard = table.acquire_read(KEY, Some(Duration::from_secs(5))).unwrap();
            drop(guard);
        })
    };
    {
        let table = table.clone();
        wait_until("R3 queued", move || table.stats(KEY).queue_len == 2);
    }

    assert!(matches!(
        w2.join().unwrap(),
        Err(CubbyError::LockTimeout { .. })
    ));
    r3.join().unwrap();
    drop(reader1);
    assert_eq!(table.tracked_keys(), 0);
}

#[test]
fn explicit_release_reopens_the_key() {
    let table = LockTable::new();
    let guard = table.acquire_write(KEY, None).unwrap();
    assert_eq!(guard.key(), KEY);
    assert_eq!(guard.kind(), LockKind::Write);

    guard.release();
    // Immediately grantable again.
    let _again = table.acquire_write(KEY, Some(Duration::ZERO)).unwrap();
}

#[test]
fn table_default_timeout_is_configurable() {
    let table = LockTable::with_timeout(Duration::from_millis(50));
    let _writer = table.acquire_write(KEY, None).unwrap();

    let start = std::time::Instant::now();
    let err = table.acquire_read(KEY, None).unwrap_err();
    assert!(matches!(err, CubbyError::LockTimeout { .. }));
    // Failed on the table default, not the 5 s fallback.
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn clones_share_one_table() {
    let table = LockTable::new();
    let clone = table.clone();

    let _writer = table.acquire_write(KEY, None).unwrap();
    let err = clone
        .acquire_write(KEY, Some(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, CubbyError::LockTimeout { .. }));
}
