// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Readiness polling over a mixed set of sockets and raw descriptors.
//! Socket readiness comes from the pattern state; between evaluations the
//! wait rides on each socket's mailbox descriptor, which signals whenever
//! new activity may have changed the answer.

use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use nix::poll::{poll as os_poll, PollFd, PollFlags, PollTimeout};

use crate::error::{Error, Result};
use crate::signaler::poll_timeout;
use crate::socket::Socket;

pub const POLLIN: i16 = 1;
pub const POLLOUT: i16 = 2;
pub const POLLERR: i16 = 4;

enum PollTarget<'a> {
    Socket(&'a mut Socket),
    Fd(RawFd),
}

/// One entry in a poll set: a socket or a raw descriptor, the events of
/// interest, and the events observed.
pub struct PollItem<'a> {
    target: PollTarget<'a>,
    events: i16,
    revents: i16,
}

impl<'a> PollItem<'a> {
    pub fn socket(socket: &'a mut Socket, events: i16) -> PollItem<'a> {
        PollItem {
            target: PollTarget::Socket(socket),
            events,
            revents: 0,
        }
    }

    /// Caller keeps the descriptor valid for the duration of the poll.
    pub fn fd(fd: RawFd, events: i16) -> PollItem<'a> {
        PollItem {
            target: PollTarget::Fd(fd),
            events,
            revents: 0,
        }
    }

    /// Events observed by the most recent `poll` call.
    pub fn revents(&self) -> i16 {
        self.revents
    }
}

fn flags_of(events: i16) -> PollFlags {
    let mut flags = PollFlags::empty();
    if events & POLLIN != 0 {
        flags |= PollFlags::POLLIN;
    }
    if events & POLLOUT != 0 {
        flags |= PollFlags::POLLOUT;
    }
    flags
}

fn revents_of(flags: PollFlags) -> i16 {
    let mut events = 0;
    if flags.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
        events |= POLLIN;
    }
    if flags.contains(PollFlags::POLLOUT) {
        events |= POLLOUT;
    }
    if flags.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        events |= POLLERR;
    }
    events
}

/// Waits until at least one item is ready or the timeout elapses; `None`
/// waits forever. Returns the number of ready items.
pub fn poll(items: &mut [PollItem], timeout: Option<Duration>) -> Result<usize> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        // Evaluate current readiness: pattern state for sockets, a
        // zero-timeout kernel poll for raw descriptors.
        let mut ready = 0;
        for item in items.iter_mut() {
            item.revents = 0;
            match item.target {
                PollTarget::Socket(ref mut socket) => {
                    let (has_in, has_out) = socket.events()?;
                    if has_in && item.events & POLLIN != 0 {
                        item.revents |= POLLIN;
                    }
                    if has_out && item.events & POLLOUT != 0 {
                        item.revents |= POLLOUT;
                    }
                }
                PollTarget::Fd(fd) => {
                    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                    let mut fds = [PollFd::new(borrowed, flags_of(item.events))];
                    match os_poll(&mut fds, PollTimeout::ZERO) {
                        Ok(0) => {}
                        Ok(_) => {
                            item.revents = revents_of(fds[0].revents().unwrap_or(PollFlags::empty()));
                        }
                        Err(nix::errno::Errno::EINTR) => {}
                        Err(e) => return Err(Error::Io(std::io::Error::from(e))),
                    }
                }
            }
            if item.revents != 0 {
                ready += 1;
            }
        }
        if ready > 0 || timeout == Some(Duration::ZERO) {
            return Ok(ready);
        }

        let remaining = match deadline {
            None => None,
            Some(at) => {
                let left = at.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(0);
                }
                Some(left)
            }
        };

        // Nothing ready: sleep on every descriptor involved. A socket's
        // mailbox descriptor wakes us whenever a command may have changed
        // its readiness.
        let raw_fds: Vec<(RawFd, PollFlags)> = items
            .iter_mut()
            .map(|item| match item.target {
                PollTarget::Socket(ref mut socket) => (socket.fd(), PollFlags::POLLIN),
                PollTarget::Fd(fd) => (fd, flags_of(item.events)),
            })
            .collect();
        let borrowed: Vec<BorrowedFd> = raw_fds
            .iter()
            .map(|(fd, _)| unsafe { BorrowedFd::borrow_raw(*fd) })
            .collect();
        let mut fds: Vec<PollFd> = borrowed
            .iter()
            .zip(raw_fds.iter())
            .map(|(fd, (_, flags))| PollFd::new(*fd, *flags))
            .collect();
        match os_poll(&mut fds, poll_timeout(remaining)) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => {
                // Retry with whatever time is left.
            }
            Err(e) => return Err(Error::Io(std::io::Error::from(e))),
        }
    }
}
