// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Listener: owned by a socket, accepts stream connections and spawns a
//! transient session plus engine for each one.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use mio::Interest;

use crate::command::{Address, Command, CommandKind};
use crate::ctx::Ctx;
use crate::engine::StreamEngine;
use crate::global::ObjectId;
use crate::io_thread::{EventLoop, IoObject, TimerId};
use crate::options::Options;
use crate::own::Own;
use crate::session::SessionBase;
use crate::transport::ListenerSock;

pub struct Listener {
    oid: ObjectId,
    own: Own,
    ctx: Arc<Ctx>,
    /// The socket transient sessions bind their pipes to.
    socket: Address,
    options: Options,
    listener: ListenerSock,
    registered: bool,
}

impl Listener {
    /// The accept socket is bound by the caller (on the application
    /// thread) so bind errors surface synchronously.
    pub fn new(
        oid: ObjectId,
        ctx: Arc<Ctx>,
        socket: Address,
        options: Options,
        listener: ListenerSock,
    ) -> Listener {
        Listener {
            oid,
            own: Own::child_of(socket.clone()),
            ctx,
            socket,
            options,
            listener,
            registered: false,
        }
    }

    fn accept_one(&mut self, el: &mut EventLoop) -> io::Result<()> {
        let stream = self.listener.accept()?;
        crate::transport::tune_stream(&stream, &self.options);
        let io_tx = self.ctx.choose_io_thread(self.options.affinity);
        let session_oid = self.ctx.next_oid();
        let session_addr = Address::new(io_tx.clone(), session_oid);

        let session = SessionBase::new_transient(
            Arc::clone(&self.ctx),
            session_oid,
            session_addr.clone(),
            Address::new(el.sender(), self.oid),
            self.socket.clone(),
            self.options.clone(),
        );
        self.own.launch_child(session_addr);

        let pids = (
            self.options.socket_type.wire_id(),
            self.options.socket_type.peer_wire_id(),
        );
        let engine = Box::new(StreamEngine::new(stream, pids));

        debug!("[{:?}] accepted connection, session [{:?}]", self.oid, session_oid);
        io_tx.send(Command {
            dest: session_oid,
            kind: CommandKind::Plug {
                object: Box::new(session),
            },
        });
        io_tx.send(Command {
            dest: session_oid,
            kind: CommandKind::Attach { engine },
        });
        Ok(())
    }
}

impl IoObject for Listener {
    fn plugged(&mut self, el: &mut EventLoop) {
        if let Err(e) = el.register(&mut self.listener, self.oid, Interest::READABLE) {
            error!("[{:?}] failed to register listener: {}", self.oid, e);
            return;
        }
        self.registered = true;
    }

    fn process_command(&mut self, el: &mut EventLoop, kind: CommandKind) {
        match kind {
            CommandKind::Term { linger } => {
                if self.registered {
                    el.deregister(&mut self.listener);
                    self.registered = false;
                }
                if self.own.process_term(linger) {
                    self.own.send_term_ack(self.oid);
                    el.retire(self.oid);
                }
            }
            CommandKind::TermReq { child } => {
                self.own.process_term_req(child, Some(Duration::ZERO));
            }
            CommandKind::TermAck { child } => {
                if self.own.process_term_ack(child) {
                    self.own.send_term_ack(self.oid);
                    el.retire(self.oid);
                }
            }
            other => debug!(
                "[{:?}] listener ignoring command {}",
                self.oid,
                other.name()
            ),
        }
    }

    fn in_event(&mut self, el: &mut EventLoop) {
        loop {
            match self.accept_one(el) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // Transient accept failures (e.g. the peer vanished
                    // between accept and here) are not fatal.
                    debug!("[{:?}] accept failed: {}", self.oid, e);
                    return;
                }
            }
        }
    }

    fn out_event(&mut self, _el: &mut EventLoop) {}

    fn timer_event(&mut self, _el: &mut EventLoop, _timer: TimerId) {}
}
