// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::os::fd::RawFd;
use std::sync::Arc;

use crate::command::{Address, Command, CommandKind};
use crate::ctx::Context;
use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType};
use crate::mailbox::mailbox;
use crate::msg::Message;
use crate::options::SocketOption;
use crate::socket_impl::SocketCore;

/// A typed messaging endpoint.
///
/// Sockets are not shareable: exactly one thread may use a socket at a
/// time, which the `&mut` receivers enforce. They are `Send`, so ownership
/// may move between threads. Dropping the socket closes it; pending
/// outbound messages are drained in the background, bounded by the linger
/// option.
pub struct Socket {
    core: Option<Box<SocketCore>>,
    ctx: Context,
}

impl Socket {
    pub(crate) fn create(ctx: Context, socket_type: SocketType) -> Result<Socket> {
        let inner = Arc::clone(ctx.ctx());
        if inner.is_terminating() {
            return Err(Error::Terminated);
        }
        let (tx, rx) = mailbox()?;
        let oid = inner.next_oid();
        let addr = Address::new(tx, oid);
        let slot = inner.register_socket(addr.clone())?;
        let core = SocketCore::new(Arc::clone(&inner), socket_type, slot, oid, addr, rx);
        Ok(Socket {
            core: Some(Box::new(core)),
            ctx,
        })
    }

    fn core(&mut self) -> &mut SocketCore {
        self.core.as_mut().expect("socket already closed")
    }

    /// Adds a local endpoint. The address is `scheme://address` with
    /// scheme one of `inproc`, `ipc`, `tcp`.
    /// Note that bind and connect may each be called multiple times on the
    /// same socket, so one socket can serve several heterogeneous
    /// endpoints.
    pub fn bind(&mut self, endpoint: &str) -> Result<()> {
        self.core().bind(endpoint)
    }

    /// Adds a remote endpoint the socket keeps (re)connecting to.
    pub fn connect(&mut self, endpoint: &str) -> Result<()> {
        self.core().connect(endpoint)
    }

    /// Sends one message part carrying `data`.
    /// See [`SNDMORE`](crate::SNDMORE) and [`DONTWAIT`](crate::DONTWAIT)
    /// for the accepted flags.
    pub fn send(&mut self, data: &[u8], flags: i32) -> Result<()> {
        self.send_msg(Message::from_slice(data), flags)
    }

    pub fn send_msg(&mut self, msg: Message, flags: i32) -> Result<()> {
        self.core().send(msg, flags)
    }

    /// Receives one message part as raw bytes.
    pub fn recv(&mut self, flags: i32) -> Result<Vec<u8>> {
        self.recv_msg(flags).map(|msg| msg.to_vec())
    }

    pub fn recv_msg(&mut self, flags: i32) -> Result<Message> {
        self.core().recv(flags)
    }

    pub fn set_option(&mut self, option: SocketOption) -> Result<()> {
        self.core().set_option(option)
    }

    /// Whether the part returned by the last receive has further parts
    /// following it.
    pub fn recv_more(&mut self) -> bool {
        self.core().recv_more()
    }

    pub fn socket_type(&mut self) -> SocketType {
        self.core().socket_type()
    }

    /// Descriptor that becomes readable when the socket has pending
    /// activity; usable with an external event loop together with
    /// [`events`](Socket::events).
    pub fn fd(&mut self) -> RawFd {
        self.core().mailbox_fd()
    }

    /// Current (readable, writable) readiness.
    pub fn events(&mut self) -> Result<(bool, bool)> {
        self.core().events()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            // The reaper thread finishes the shutdown so this thread never
            // blocks on draining pipes.
            self.ctx.ctx().reaper().send(Command {
                dest: ObjectId(0),
                kind: CommandKind::Reap { socket: core },
            });
        }
    }
}
