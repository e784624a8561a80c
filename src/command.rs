// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Commands flowing through the mailboxes so components can communicate
//! across threads without sharing state.

use std::time::Duration;

use crate::engine::Engine;
use crate::global::ObjectId;
use crate::io_thread::IoObject;
use crate::mailbox::MailboxSender;
use crate::msg::Message;
use crate::pipe::Pipe;
use crate::socket_impl::SocketCore;
use crate::ypipe;

/// A command addressed to one object within the destination mailbox.
pub struct Command {
    pub dest: ObjectId,
    pub kind: CommandKind,
}

pub enum CommandKind {
    /// Stop the receiving thread's loop (I/O thread, reaper) or interrupt a
    /// blocked socket when the context terminates.
    Stop,
    /// Adopt a freshly created object into the receiving I/O thread.
    Plug { object: Box<dyn IoObject> },
    /// Hand a transport engine to its session.
    Attach { engine: Box<dyn Engine> },
    /// Deliver one end of a new pipe pair to the receiving socket.
    Bind { pipe: Pipe, inproc: bool },
    /// The writer published messages while this reader end was asleep.
    ActivateRead,
    /// The reader consumed messages; carries its running read count so the
    /// writer can refresh its high-water-mark window.
    ActivateWrite { msgs_read: u64 },
    /// The peer reconnected; swap in a fresh outbound queue.
    Hiccup { writer: ypipe::Writer<Message> },
    /// Phase 1 of pipe shutdown: the peer asks this end to terminate.
    PipeTerm,
    /// Phase 2 of pipe shutdown: the peer acknowledged termination.
    PipeTermAck,
    /// A child asks its parent to tear down its subtree.
    TermReq { child: ObjectId },
    /// The parent orders the receiving object to terminate.
    Term { linger: Option<Duration> },
    /// A child reports that its subtree finished terminating.
    TermAck { child: ObjectId },
    /// A closed socket hands itself over to the reaper thread.
    Reap { socket: Box<SocketCore> },
    /// A reaped socket finished dying; the reaper frees its slot.
    Reaped { slot: u32 },
    /// The reaper reports that the last socket is gone; releases `term`.
    Done,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match *self {
            CommandKind::Stop => "Stop",
            CommandKind::Plug { .. } => "Plug",
            CommandKind::Attach { .. } => "Attach",
            CommandKind::Bind { .. } => "Bind",
            CommandKind::ActivateRead => "ActivateRead",
            CommandKind::ActivateWrite { .. } => "ActivateWrite",
            CommandKind::Hiccup { .. } => "Hiccup",
            CommandKind::PipeTerm => "PipeTerm",
            CommandKind::PipeTermAck => "PipeTermAck",
            CommandKind::TermReq { .. } => "TermReq",
            CommandKind::Term { .. } => "Term",
            CommandKind::TermAck { .. } => "TermAck",
            CommandKind::Reap { .. } => "Reap",
            CommandKind::Reaped { .. } => "Reaped",
            CommandKind::Done => "Done",
        }
    }
}

/// A command-addressable object: the mailbox it drains plus its id there.
#[derive(Clone)]
pub struct Address {
    pub tx: MailboxSender,
    pub oid: ObjectId,
}

impl Address {
    pub fn new(tx: MailboxSender, oid: ObjectId) -> Address {
        Address { tx, oid }
    }

    pub fn send(&self, kind: CommandKind) {
        self.tx.send(Command {
            dest: self.oid,
            kind,
        });
    }
}
