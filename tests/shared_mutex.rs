#![cfg(not(loom))]

use slimlock::SharedMutex;
use std::cell::UnsafeCell;
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn many_readers() {
    const READERS: usize = 8;

    let lock = Arc::new(SharedMutex::new());
    let barrier = Arc::new(Barrier::new(READERS + 1));

    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let lock = lock.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                lock.lock_shared();
                barrier.wait();
                // Hold until the main thread has inspected the count.
                barrier.wait();
                unsafe { lock.unlock_shared() };
            })
        })
        .collect();

    barrier.wait();
    assert_eq!(lock.holder_count(), READERS as u32);
    assert!(lock.is_locked());
    assert!(!lock.is_waiting());
    barrier.wait();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lock.holder_count(), 0);
    assert!(!lock.is_locked_or_waiting());
}

#[test]
fn writer_preference() {
    let lock = Arc::new(SharedMutex::new());
    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (read_tx, read_rx) = mpsc::channel();

    lock.lock_shared();

    let writer = {
        let lock = lock.clone();
        thread::spawn(move || {
            // Installs exclusive-pending, then parks until the reader
            // drains.
            lock.lock();
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            unsafe { lock.unlock() };
        })
    };

    // Wait until the writer has installed its intent.
    while !lock.is_waiting() {
        thread::yield_now();
    }

    // New shared acquisitions are now refused...
    assert!(!lock.try_lock_shared());

    // ...and blocking ones queue behind the writer.
    let late_reader = {
        let lock = lock.clone();
        thread::spawn(move || {
            lock.lock_shared();
            read_tx.send(()).unwrap();
            unsafe { lock.unlock_shared() };
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(read_rx.try_recv().is_err(), "late reader must wait for the writer");

    // Drain: the last shared release hands the lock to the writer.
    unsafe { lock.unlock_shared() };
    locked_rx.recv().unwrap();
    assert_eq!(lock.holder_count(), 0);
    assert!(read_rx.try_recv().is_err(), "reader must not share with the writer");

    release_tx.send(()).unwrap();
    read_rx.recv().unwrap();

    writer.join().unwrap();
    late_reader.join().unwrap();
    assert!(!lock.is_locked_or_waiting());
}

#[test]
fn upgrade_waits_for_readers() {
    const READERS: usize = 2;

    let lock = Arc::new(SharedMutex::new());
    let barrier = Arc::new(Barrier::new(READERS + 1));

    lock.lock_update();

    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let lock = lock.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                // Shared holds coexist with the update hold.
                lock.lock_shared();
                barrier.wait();
                thread::sleep(Duration::from_millis(30));
                unsafe { lock.unlock_shared() };
            })
        })
        .collect();

    barrier.wait();
    assert_eq!(lock.holder_count(), READERS as u32 + 1);

    unsafe {
        // Blocks until both readers have drained.
        lock.update_lock_upgrade();
        assert!(lock.is_waiting());
        assert_eq!(lock.holder_count(), 0);

        lock.update_lock_downgrade();
        assert!(!lock.is_waiting());
        assert_eq!(lock.holder_count(), 1);

        lock.unlock_update();
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!lock.is_locked_or_waiting());
}

struct Table {
    lock: SharedMutex,
    cells: UnsafeCell<[u64; 2]>,
}

// Safety: `cells` is only written under an exclusive hold and only read
// under a shared (or stronger) hold.
unsafe impl Sync for Table {}

#[test]
fn readers_writers_updaters() {
    const WRITERS: u64 = 2;
    const READERS: u64 = 4;
    const WRITES: u64 = 1_000;
    const READS: u64 = 1_000;
    const UPGRADES: u64 = 500;

    let table = Arc::new(Table {
        lock: SharedMutex::new(),
        cells: UnsafeCell::new([0; 2]),
    });

    let mut handles = Vec::new();

    for _ in 0..WRITERS {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..WRITES {
                table.lock.lock();
                unsafe {
                    let cells = &mut *table.cells.get();
                    cells[0] += 1;
                    cells[1] += 1;
                    table.lock.unlock();
                }
            }
        }));
    }

    for _ in 0..READERS {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..READS {
                table.lock.spin_lock_shared(100);
                unsafe {
                    let cells = &*table.cells.get();
                    // Both cells advance together under the write lock; a
                    // torn observation means shared failed to exclude a
                    // writer.
                    assert_eq!(cells[0], cells[1]);
                    table.lock.unlock_shared();
                }
            }
        }));
    }

    {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..UPGRADES {
                table.lock.lock_update();
                unsafe {
                    table.lock.update_lock_upgrade();
                    let cells = &mut *table.cells.get();
                    cells[0] += 1;
                    cells[1] += 1;
                    table.lock.update_lock_downgrade();
                    table.lock.unlock_update();
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let cells = unsafe { &*table.cells.get() };
    assert_eq!(cells[0], WRITERS * WRITES + UPGRADES);
    assert_eq!(cells[1], cells[0]);
    assert!(!table.lock.is_locked_or_waiting());
}

#[test]
fn exclusive_roundtrip() {
    let lock = SharedMutex::new();

    assert!(lock.try_lock());
    assert!(lock.is_waiting());
    assert!(lock.is_locked());
    unsafe { lock.unlock() };
    assert!(!lock.is_locked_or_waiting());

    lock.lock();
    unsafe { lock.unlock() };
    lock.spin_lock(1000);
    unsafe { lock.unlock() };
    lock.spin_lock_default();
    unsafe { lock.unlock() };
    assert!(!lock.is_locked_or_waiting());
}

#[test]
fn update_spin_and_try() {
    let lock = SharedMutex::new();

    assert!(lock.try_lock_update());
    assert!(!lock.try_lock_update());
    unsafe { lock.unlock_update() };

    lock.spin_lock_update(1000);
    assert_eq!(lock.holder_count(), 1);
    unsafe { lock.unlock_update() };

    lock.spin_lock_update_default();
    unsafe { lock.unlock_update() };
    assert!(!lock.is_locked_or_waiting());
}
