// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Built-in devices: tiny forwarding loops that shovel messages between
//! two sockets until the context terminates.

use crate::error::{Error, Result};
use crate::global::{DONTWAIT, SNDMORE};
use crate::poll::{poll, PollItem, POLLIN};
use crate::socket::Socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Unidirectional pipeline relay (PULL in, PUSH out).
    Streamer,
    /// Unidirectional pub/sub relay (XSUB in, XPUB out).
    Forwarder,
    /// Bidirectional request/reply relay (ROUTER and DEALER).
    Queue,
}

/// Moves one complete logical message from `from` to `to`.
/// Blocks on the sending side if the destination is over its watermark.
fn forward(from: &mut Socket, to: &mut Socket) -> Result<()> {
    loop {
        let msg = match from.recv_msg(DONTWAIT) {
            Ok(msg) => msg,
            // Readiness can evaporate (e.g. a filtered subscription);
            // simply go back to polling.
            Err(Error::WouldBlock) => return Ok(()),
            Err(e) => return Err(e),
        };
        let more = msg.has_more();
        to.send_msg(msg, if more { SNDMORE } else { 0 })?;
        if !more {
            return Ok(());
        }
    }
}

/// Runs the forwarding loop. Returns with `Error::Terminated` once the
/// context shuts down; any other error is passed through.
pub fn device(kind: Device, a: &mut Socket, b: &mut Socket) -> Result<()> {
    let bidirectional = kind == Device::Queue;
    loop {
        {
            let mut items = [
                PollItem::socket(a, POLLIN),
                PollItem::socket(b, POLLIN),
            ];
            poll(&mut items, None)?;
        }
        if a.events()?.0 {
            forward(a, b)?;
        }
        if bidirectional && b.events()?.0 {
            forward(b, a)?;
        }
    }
}
