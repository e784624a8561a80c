// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Self-pipe wake-up primitive backing the mailboxes: a nonblocking pipe
//! whose read end becomes readable when a signal is pending, so it can be
//! registered with a reactor poll set alongside network descriptors.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::pipe2;

/// Creates a connected signaler pair.
pub fn new() -> io::Result<(SignalSender, SignalReceiver)> {
    let (read_fd, write_fd) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
    Ok((
        SignalSender {
            writer: Arc::new(File::from(write_fd)),
        },
        SignalReceiver {
            reader: File::from(read_fd),
        },
    ))
}

#[derive(Clone)]
pub struct SignalSender {
    writer: Arc<File>,
}

impl SignalSender {
    /// Posts one wake-up token. Never blocks: a full pipe already carries
    /// enough pending tokens to wake the receiver.
    pub fn send(&self) {
        loop {
            match (&*self.writer).write(&[1u8]) {
                Ok(_) => return,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => panic!("signaler write failed: {}", e),
            }
        }
    }
}

pub struct SignalReceiver {
    reader: File,
}

impl SignalReceiver {
    /// The waitable descriptor; readable whenever a token is pending.
    pub fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Waits until a token is pending or the timeout elapses. `None` waits
    /// forever. Interrupts are retried with the remaining time.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = match deadline {
                None => None,
                Some(d) => Some(d.saturating_duration_since(Instant::now())),
            };
            let mut fds = [PollFd::new(self.reader.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, poll_timeout(remaining)) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(nix::errno::Errno::EINTR) => {
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return Ok(false);
                        }
                    }
                }
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    /// Consumes every pending token.
    pub fn drain(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => panic!("signaler read failed: {}", e),
            }
        }
    }
}

/// Converts an optional duration into a poll(2) timeout, clamping overlong
/// waits instead of overflowing.
pub(crate) fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(t) => {
            let millis = t.as_millis().min(i32::MAX as u128) as i32;
            PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::new;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_sees_posted_token() {
        let (tx, rx) = new().unwrap();
        tx.send();
        assert!(rx.wait(Some(Duration::from_millis(100))).unwrap());
    }

    #[test]
    fn wait_times_out_when_idle() {
        let (_tx, rx) = new().unwrap();
        let started = Instant::now();
        assert!(!rx.wait(Some(Duration::from_millis(50))).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn drain_clears_pending_tokens() {
        let (tx, mut rx) = new().unwrap();
        tx.send();
        tx.send();
        rx.drain();
        assert!(!rx.wait(Some(Duration::from_millis(10))).unwrap());
    }
}
