// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Lock-free single-producer single-consumer queue with batched publication
//! and reader sleep/wake accounting.
//!
//! The writer accumulates elements privately and publishes them in batches
//! with `flush`. The reader observes published elements only. A single
//! atomic word carries either the total published count or a sleep marker;
//! the CAS hand-off over that word tells the writer whether the reader went
//! to sleep, in which case `flush` returns `false` and the writer is
//! responsible for waking it through its command mailbox.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;

/// Sentinel stored in the state word while the reader sleeps.
const SLEEPING: u64 = u64::MAX;

struct Shared<T> {
    queue: SegQueue<T>,
    /// Total number of elements published, or `SLEEPING`.
    state: AtomicU64,
}

/// Creates a connected writer/reader endpoint pair.
pub fn pair<T>() -> (Writer<T>, Reader<T>) {
    let shared = Arc::new(Shared {
        queue: SegQueue::new(),
        state: AtomicU64::new(0),
    });
    let writer = Writer {
        shared: Arc::clone(&shared),
        unflushed: Vec::new(),
        complete: 0,
        flushed: 0,
    };
    let reader = Reader {
        shared,
        read: 0,
        lookahead: None,
    };
    (writer, reader)
}

/// The producing end. At most one thread may use it at a time.
pub struct Writer<T> {
    shared: Arc<Shared<T>>,
    unflushed: Vec<T>,
    /// Prefix of `unflushed` belonging to completed items; only these may
    /// be published, so a flush can never expose a torn batch.
    complete: usize,
    flushed: u64,
}

impl<T> Writer<T> {
    /// Enqueues locally; invisible to the reader until `flush`. With
    /// `incomplete`, the element stays private even across a flush, until
    /// a later write completes the batch.
    pub fn write(&mut self, value: T, incomplete: bool) {
        self.unflushed.push(value);
        if !incomplete {
            self.complete = self.unflushed.len();
        }
    }

    /// Takes back the most recent incomplete write, if any is still held.
    pub fn unwrite(&mut self) -> Option<T> {
        if self.unflushed.len() > self.complete {
            self.unflushed.pop()
        } else {
            None
        }
    }

    /// Publishes the completed writes. Returns `true` if the reader is
    /// awake; `false` if it had gone to sleep, in which case the caller
    /// must wake it explicitly.
    pub fn flush(&mut self) -> bool {
        if self.complete == 0 {
            return true;
        }
        let previous = self.flushed;
        for value in self.unflushed.drain(..self.complete) {
            self.shared.queue.push(value);
            self.flushed += 1;
        }
        self.complete = 0;
        match self.shared.state.compare_exchange(
            previous,
            self.flushed,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(observed) => {
                // The only other value the reader can install is the sleep
                // marker. Publish the new count and report the sleep.
                debug_assert_eq!(SLEEPING, observed);
                self.shared.state.store(self.flushed, Ordering::Release);
                false
            }
        }
    }

    /// Reclaims every element the reader has not consumed, both published
    /// and unflushed. Only meaningful once the reader end has been (or is
    /// about to be) discarded.
    pub fn salvage(mut self) -> Vec<T> {
        let mut left: Vec<T> = Vec::new();
        while let Some(value) = self.shared.queue.pop() {
            left.push(value);
        }
        left.append(&mut self.unflushed);
        left
    }
}

/// The consuming end. At most one thread may use it at a time.
pub struct Reader<T> {
    shared: Arc<Shared<T>>,
    /// Number of elements taken off the shared queue.
    read: u64,
    lookahead: Option<T>,
}

impl<T> Reader<T> {
    /// Pops one element. On empty, the reader transitions to the sleep
    /// state as a side effect; the next writer flush will report it.
    pub fn read(&mut self) -> Option<T> {
        if let Some(value) = self.lookahead.take() {
            return Some(value);
        }
        self.pop_published()
    }

    /// Peeks at the next element without consuming it. Same sleep
    /// transition as `read` when empty.
    pub fn peek(&mut self) -> Option<&T> {
        if self.lookahead.is_none() {
            self.lookahead = self.pop_published();
        }
        self.lookahead.as_ref()
    }

    pub fn check_read(&mut self) -> bool {
        self.peek().is_some()
    }

    fn pop_published(&mut self) -> Option<T> {
        loop {
            if let Some(value) = self.shared.queue.pop() {
                self.read += 1;
                return Some(value);
            }
            let published = self.shared.state.load(Ordering::Acquire);
            if published == SLEEPING {
                return None;
            }
            if published == self.read {
                let gone_to_sleep = self
                    .shared
                    .state
                    .compare_exchange(self.read, SLEEPING, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if gone_to_sleep {
                    return None;
                }
            }
            // A flush landed between the pop and the state check; retry.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pair;
    use std::thread;

    #[test]
    fn unflushed_writes_are_invisible() {
        let (mut tx, mut rx) = pair::<u32>();
        tx.write(1, false);
        assert_eq!(None, rx.read());
        assert!(!tx.flush());
        assert_eq!(Some(1), rx.read());
    }

    #[test]
    fn unwrite_takes_back_the_tail() {
        let (mut tx, mut rx) = pair::<u32>();
        tx.write(1, false);
        tx.write(2, true);
        assert_eq!(Some(2), tx.unwrite());
        tx.flush();
        assert_eq!(Some(1), rx.read());
        assert_eq!(None, tx.unwrite());
    }

    #[test]
    fn flush_reports_sleeping_reader_once() {
        let (mut tx, mut rx) = pair::<u32>();

        // Reader finds the pipe empty and falls asleep.
        assert_eq!(None, rx.read());

        tx.write(1, false);
        assert!(!tx.flush());

        // The reader has a wake pending; further flushes need no signal.
        tx.write(2, false);
        assert!(tx.flush());

        assert_eq!(Some(1), rx.read());
        assert_eq!(Some(2), rx.read());
        assert_eq!(None, rx.read());
    }

    #[test]
    fn peek_does_not_consume() {
        let (mut tx, mut rx) = pair::<u32>();
        tx.write(7, false);
        tx.flush();
        assert_eq!(Some(&7), rx.peek());
        assert_eq!(Some(&7), rx.peek());
        assert_eq!(Some(7), rx.read());
    }

    #[test]
    fn salvage_returns_published_and_unflushed() {
        let (mut tx, mut rx) = pair::<u32>();
        tx.write(1, false);
        tx.write(2, false);
        tx.flush();
        tx.write(3, true);
        assert_eq!(Some(1), rx.read());
        assert_eq!(vec![2, 3], tx.salvage());
    }

    #[test]
    fn conserves_order_and_count_across_threads() {
        let (mut tx, mut rx) = pair::<u64>();
        let total: u64 = 100_000;

        let producer = thread::spawn(move || {
            let mut n = 0;
            while n < total {
                let batch = 1 + n % 7;
                for _ in 0..batch {
                    if n == total {
                        break;
                    }
                    tx.write(n, false);
                    n += 1;
                }
                tx.flush();
            }
        });

        let mut expected = 0;
        while expected < total {
            if let Some(value) = rx.read() {
                assert_eq!(expected, value);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
