// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Per-object command queue: a command Y-pipe whose writer end sits behind a
//! short mutex (many producers), paired with a signaler so the single
//! consumer can wait on a descriptor alongside its network sockets.

use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::command::Command;
use crate::signaler::{self, SignalReceiver, SignalSender};
use crate::ypipe;

/// Creates a connected sender/receiver mailbox pair.
pub fn mailbox() -> io::Result<(MailboxSender, Mailbox)> {
    let (signal_tx, signal_rx) = signaler::new()?;
    let (cmd_tx, cmd_rx) = ypipe::pair();
    Ok((
        MailboxSender {
            tx: Arc::new(Mutex::new(cmd_tx)),
            signal: signal_tx,
        },
        Mailbox {
            rx: cmd_rx,
            signal: signal_rx,
        },
    ))
}

/// The producing half; clonable, any thread may send.
#[derive(Clone)]
pub struct MailboxSender {
    tx: Arc<Mutex<ypipe::Writer<Command>>>,
    signal: SignalSender,
}

impl MailboxSender {
    /// Enqueues a command. Wakes the consumer if it had gone to sleep.
    /// Never blocks beyond the internal mutex.
    pub fn send(&self, cmd: Command) {
        let reader_awake = {
            let mut writer = self.tx.lock().unwrap();
            writer.write(cmd, false);
            writer.flush()
        };
        if !reader_awake {
            self.signal.send();
        }
    }
}

/// The consuming half; owned by exactly one thread at a time.
pub struct Mailbox {
    rx: ypipe::Reader<Command>,
    signal: SignalReceiver,
}

impl Mailbox {
    /// Descriptor that becomes readable when the queue is non-empty;
    /// registered with the owner's reactor.
    pub fn fd(&self) -> RawFd {
        self.signal.fd()
    }

    /// Returns the next command, or `None` once the timeout elapses.
    /// `Some(ZERO)` polls without waiting; `None` waits forever.
    /// Interrupted waits are resumed with the remaining time.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Option<Command> {
        if let Some(cmd) = self.rx.read() {
            return Some(cmd);
        }
        // Consume wake-up tokens left over from earlier sleep cycles, or
        // the descriptor would stay readable forever; a token is only ever
        // posted after its commands were published, so a second look at
        // the queue cannot miss anything.
        self.signal.drain();
        if let Some(cmd) = self.rx.read() {
            return Some(cmd);
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = match deadline {
                None => None,
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return None;
                    }
                    Some(left)
                }
            };
            match self.signal.wait(remaining) {
                Ok(true) => {
                    self.signal.drain();
                    if let Some(cmd) = self.rx.read() {
                        return Some(cmd);
                    }
                    // Stale wake-up token; keep waiting.
                }
                Ok(false) => return None,
                Err(e) => panic!("mailbox wait failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mailbox;
    use crate::command::{Command, CommandKind};
    use crate::global::ObjectId;
    use std::thread;
    use std::time::{Duration, Instant};

    fn stop(dest: u32) -> Command {
        Command {
            dest: ObjectId(dest),
            kind: CommandKind::Stop,
        }
    }

    #[test]
    fn delivers_in_order() {
        let (tx, mut rx) = mailbox().unwrap();
        tx.send(stop(1));
        tx.send(stop(2));
        assert_eq!(ObjectId(1), rx.recv(Some(Duration::ZERO)).unwrap().dest);
        assert_eq!(ObjectId(2), rx.recv(Some(Duration::ZERO)).unwrap().dest);
        assert!(rx.recv(Some(Duration::ZERO)).is_none());
    }

    #[test]
    fn recv_times_out() {
        let (_tx, mut rx) = mailbox().unwrap();
        let started = Instant::now();
        assert!(rx.recv(Some(Duration::from_millis(60))).is_none());
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn wakes_sleeping_receiver() {
        let (tx, mut rx) = mailbox().unwrap();

        let handle = thread::spawn(move || {
            let cmd = rx.recv(Some(Duration::from_secs(5)));
            cmd.map(|c| c.dest)
        });

        thread::sleep(Duration::from_millis(50));
        tx.send(stop(9));
        assert_eq!(Some(ObjectId(9)), handle.join().unwrap());
    }

    #[test]
    fn many_producers_one_consumer() {
        let (tx, mut rx) = mailbox().unwrap();
        let mut handles = Vec::new();
        for t in 0..4 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    tx.send(stop(t * 100 + i));
                }
            }));
        }
        let mut seen = 0;
        while seen < 400 {
            if rx.recv(Some(Duration::from_secs(5))).is_some() {
                seen += 1;
            }
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
