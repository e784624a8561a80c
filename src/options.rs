// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Per-socket options and the typed option enum the application sets them
//! through.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::global::SocketType;

/// Longest identity blob a socket may carry.
const MAX_IDENTITY_SIZE: usize = 255;

/// Options settable on a socket.
///
/// Timeouts of `None` mean "wait forever"; `Linger(None)` defers context
/// termination until all pending outbound messages are delivered.
pub enum SocketOption {
    /// High-water mark, in whole messages, applied to both directions.
    Hwm(u32),
    /// Bitmask restricting which I/O threads may run this socket's
    /// sessions; zero means any.
    Affinity(u64),
    /// Identity presented to router-style peers; at most 255 bytes.
    Identity(Vec<u8>),
    /// Add a topic prefix (subscriber sockets only).
    Subscribe(Vec<u8>),
    /// Remove a previously added topic prefix.
    Unsubscribe(Vec<u8>),
    /// Multicast data rate in kilobits per second. Accepted for
    /// compatibility; no multicast engine consumes it here.
    Rate(u32),
    /// Multicast recovery interval. Accepted for compatibility.
    RecoveryIvl(Duration),
    /// Kernel send buffer size; zero leaves the kernel default.
    SndBuf(usize),
    /// Kernel receive buffer size; zero leaves the kernel default.
    RcvBuf(usize),
    /// How long a closed socket's pending outbound messages may delay
    /// context termination.
    Linger(Option<Duration>),
    /// Initial delay between reconnection attempts.
    ReconnectIvl(Duration),
    /// Upper bound for the exponential reconnect back-off.
    ReconnectIvlMax(Duration),
    /// Listen backlog for stream transports.
    Backlog(u32),
    /// Send timeout; `Some(ZERO)` makes sends non-blocking.
    SendTimeout(Option<Duration>),
    /// Receive timeout; `Some(ZERO)` makes receives non-blocking.
    RecvTimeout(Option<Duration>),
    /// How long a surveyor gathers responses (surveyor sockets only).
    SurveyDeadline(Duration),
}

#[derive(Clone)]
pub(crate) struct Options {
    pub socket_type: SocketType,
    pub sndhwm: u32,
    pub rcvhwm: u32,
    pub affinity: u64,
    pub identity: Vec<u8>,
    pub rate: u32,
    pub recovery_ivl: Duration,
    pub sndbuf: usize,
    pub rcvbuf: usize,
    pub linger: Option<Duration>,
    pub reconnect_ivl: Duration,
    pub reconnect_ivl_max: Option<Duration>,
    pub backlog: u32,
    pub sndtimeo: Option<Duration>,
    pub rcvtimeo: Option<Duration>,
    /// Keep undelivered outbound messages across a peer's clean close.
    pub delay_on_close: bool,
    /// Keep undelivered outbound messages across a disconnect.
    pub delay_on_disconnect: bool,
    pub send_identity: bool,
    pub recv_identity: bool,
}

impl Options {
    pub fn new(socket_type: SocketType) -> Options {
        let identity_exchange = socket_type.uses_identity();
        Options {
            socket_type,
            sndhwm: 1000,
            rcvhwm: 1000,
            affinity: 0,
            identity: Vec::new(),
            rate: 100,
            recovery_ivl: Duration::from_secs(10),
            sndbuf: 0,
            rcvbuf: 0,
            linger: None,
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: None,
            backlog: 100,
            sndtimeo: None,
            rcvtimeo: None,
            delay_on_close: true,
            delay_on_disconnect: true,
            send_identity: identity_exchange,
            recv_identity: identity_exchange,
        }
    }

    /// Applies an option the pattern did not claim.
    pub fn apply(&mut self, option: SocketOption) -> Result<()> {
        match option {
            SocketOption::Hwm(hwm) => {
                self.sndhwm = hwm;
                self.rcvhwm = hwm;
            }
            SocketOption::Affinity(affinity) => self.affinity = affinity,
            SocketOption::Identity(identity) => {
                if identity.len() > MAX_IDENTITY_SIZE {
                    return Err(Error::InvalidArgument);
                }
                self.identity = identity;
            }
            SocketOption::Rate(rate) => {
                if rate == 0 {
                    return Err(Error::InvalidArgument);
                }
                self.rate = rate;
            }
            SocketOption::RecoveryIvl(ivl) => self.recovery_ivl = ivl,
            SocketOption::SndBuf(size) => self.sndbuf = size,
            SocketOption::RcvBuf(size) => self.rcvbuf = size,
            SocketOption::Linger(linger) => self.linger = linger,
            SocketOption::ReconnectIvl(ivl) => {
                if ivl.is_zero() {
                    return Err(Error::InvalidArgument);
                }
                self.reconnect_ivl = ivl;
            }
            SocketOption::ReconnectIvlMax(ivl) => {
                self.reconnect_ivl_max = if ivl.is_zero() { None } else { Some(ivl) };
            }
            SocketOption::Backlog(backlog) => self.backlog = backlog,
            SocketOption::SendTimeout(timeout) => self.sndtimeo = timeout,
            SocketOption::RecvTimeout(timeout) => self.rcvtimeo = timeout,
            // Pattern-specific options reaching the generic table mean the
            // socket type does not support them.
            SocketOption::Subscribe(_)
            | SocketOption::Unsubscribe(_)
            | SocketOption::SurveyDeadline(_) => return Err(Error::NotSupported),
        }
        Ok(())
    }
}
