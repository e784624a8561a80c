// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! A session represents one logical connection: it owns the transport
//! engine, bridges it to the pipe leading to its socket, exchanges the
//! identity handshake, and survives reconnects by hiccuping the pipe.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::command::{Address, CommandKind};
use crate::ctx::Ctx;
use crate::engine::{Engine, EngineSink};
use crate::global::ObjectId;
use crate::io_thread::{EventLoop, IoObject, TimerId};
use crate::msg::Message;
use crate::options::Options;
use crate::own::Own;
use crate::pipe::{pipepair, Pipe, PipeEvent};
use crate::transport::connecter::Connecter;
use crate::transport::Scheme;

enum EngineOp {
    In,
    Out,
    ActivateIn,
    ActivateOut,
}

pub struct SessionBase {
    ctx: Arc<Ctx>,
    oid: ObjectId,
    own: Own,
    /// This I/O thread's mailbox; pipe peers and children address us here.
    self_addr: Address,
    /// The socket this session belongs to.
    socket: Address,
    options: Options,
    pipe: Option<Pipe>,
    engine: Option<Box<dyn Engine>>,
    /// Set for sessions that initiated the connection and reconnect on
    /// failure; cleared for transient sessions accepted by a listener.
    connect: bool,
    endpoint: Option<(Scheme, String)>,
    /// Identity exchange state for the current connection.
    identity_sent: bool,
    identity_received: bool,
    /// The engine pulled part of a multipart message whose tail is still
    /// in the pipe.
    incomplete_in: bool,
    engine_failed: bool,
    /// Termination was ordered but waits for the pipe to drain.
    pending: bool,
    linger_timer: Option<TimerId>,
}

impl SessionBase {
    /// Session for an outgoing endpoint; the socket already attached its
    /// end of the pipe and hands ours in.
    #[allow(clippy::too_many_arguments)]
    pub fn new_connect(
        ctx: Arc<Ctx>,
        oid: ObjectId,
        self_addr: Address,
        parent: Address,
        socket: Address,
        options: Options,
        scheme: Scheme,
        address: String,
        pipe: Pipe,
    ) -> SessionBase {
        SessionBase {
            ctx,
            oid,
            own: Own::child_of(parent),
            self_addr,
            socket,
            options,
            pipe: Some(pipe),
            engine: None,
            connect: true,
            endpoint: Some((scheme, address)),
            identity_sent: false,
            identity_received: false,
            incomplete_in: false,
            engine_failed: false,
            pending: false,
            linger_timer: None,
        }
    }

    /// Transient session for an accepted connection; the pipe to the
    /// socket is created once the engine attaches.
    pub fn new_transient(
        ctx: Arc<Ctx>,
        oid: ObjectId,
        self_addr: Address,
        parent: Address,
        socket: Address,
        options: Options,
    ) -> SessionBase {
        SessionBase {
            ctx,
            oid,
            own: Own::child_of(parent),
            self_addr,
            socket,
            options,
            pipe: None,
            engine: None,
            connect: false,
            endpoint: None,
            identity_sent: false,
            identity_received: false,
            incomplete_in: false,
            engine_failed: false,
            pending: false,
            linger_timer: None,
        }
    }

    fn start_connecting(&mut self, el: &mut EventLoop, wait: bool) {
        let (scheme, address) = match self.endpoint {
            Some((scheme, ref address)) => (scheme, address.clone()),
            None => return,
        };
        let coid = self.ctx.next_oid();
        let connecter = Connecter::new(
            coid,
            Address::new(self.self_addr.tx.clone(), self.oid),
            scheme,
            address,
            self.options.clone(),
            wait,
        );
        self.own
            .launch_child(Address::new(self.self_addr.tx.clone(), coid));
        el.add_object(coid, Box::new(connecter));
    }

    fn process_attach(&mut self, el: &mut EventLoop, engine: Box<dyn Engine>) {
        if self.own.is_terminating() {
            // Arrived too late; the connection is dropped on the floor.
            return;
        }
        if self.pipe.is_none() {
            let socket_end_oid = self.ctx.next_oid();
            let (socket_end, session_end) = pipepair(
                Address::new(self.socket.tx.clone(), socket_end_oid),
                Address::new(self.self_addr.tx.clone(), self.oid),
                (self.options.sndhwm, self.options.rcvhwm),
                (
                    self.options.delay_on_disconnect,
                    self.options.delay_on_close,
                ),
            );
            self.pipe = Some(session_end);
            self.socket.send(CommandKind::Bind {
                pipe: socket_end,
                inproc: false,
            });
        }
        debug!("[{:?}] engine attached", self.oid);
        let oid = self.oid;
        let mut engine = engine;
        engine.plug(el, self, oid);
        self.engine = Some(engine);
        // Kick the output path so the greeting and any queued messages go
        // out without waiting for a poll edge.
        self.engine_op(el, EngineOp::Out);
    }

    fn engine_op(&mut self, el: &mut EventLoop, op: EngineOp) {
        let mut engine = match self.engine.take() {
            Some(engine) => engine,
            None => return,
        };
        match op {
            EngineOp::In => engine.in_event(el, self),
            EngineOp::Out => engine.out_event(el, self),
            EngineOp::ActivateIn => engine.activate_in(el, self),
            EngineOp::ActivateOut => engine.activate_out(el, self),
        }
        if self.engine_failed {
            self.engine_failed = false;
            engine.unplug(el);
            drop(engine);
            self.detached(el);
        } else {
            self.engine = Some(engine);
        }
    }

    /// The engine died. Transient sessions follow it; connecting sessions
    /// reset the pipe and try again.
    fn detached(&mut self, el: &mut EventLoop) {
        debug!("[{:?}] engine detached", self.oid);
        self.identity_sent = false;
        self.identity_received = false;
        if !self.connect {
            self.own.request_termination(self.oid);
            return;
        }
        self.clean_pipe();
        if let Some(ref mut pipe) = self.pipe {
            pipe.hiccup();
        }
        self.start_connecting(el, true);
    }

    /// Remove any half-transferred messages left by the dead engine.
    fn clean_pipe(&mut self) {
        if let Some(ref mut pipe) = self.pipe {
            pipe.rollback();
            pipe.flush();
            while self.incomplete_in {
                match pipe.read() {
                    Some(msg) => {
                        if !msg.has_more() {
                            self.incomplete_in = false;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    fn process_term(&mut self, el: &mut EventLoop, linger: Option<Duration>) {
        debug_assert!(!self.pending);
        self.pending = true;
        match self.pipe {
            Some(ref mut pipe) => {
                // A positive linger bounds the drain with a timer; zero
                // drops pending messages straight away.
                if let Some(duration) = linger {
                    if !duration.is_zero() {
                        self.linger_timer = Some(el.add_timer(duration, self.oid));
                    }
                }
                pipe.terminate(linger != Some(Duration::ZERO));
            }
            None => self.proceed_with_term(el),
        }
    }

    fn proceed_with_term(&mut self, el: &mut EventLoop) {
        if !self.pending {
            return;
        }
        self.pending = false;
        if self.own.process_term(Some(Duration::ZERO)) {
            self.finalize(el);
        }
    }

    fn finalize(&mut self, el: &mut EventLoop) {
        if let Some(timer) = self.linger_timer.take() {
            el.cancel_timer(timer);
        }
        if let Some(mut engine) = self.engine.take() {
            engine.unplug(el);
        }
        debug!("[{:?}] session retired", self.oid);
        self.own.send_term_ack(self.oid);
        el.retire(self.oid);
    }

    fn pipe_event(&mut self, el: &mut EventLoop, event: PipeEvent) {
        match event {
            PipeEvent::ReadActivated => self.engine_op(el, EngineOp::ActivateOut),
            PipeEvent::WriteActivated => self.engine_op(el, EngineOp::ActivateIn),
            PipeEvent::Hiccuped => {}
            PipeEvent::Terminated => {
                self.pipe = None;
                if self.pending {
                    self.proceed_with_term(el);
                }
            }
            PipeEvent::None => {}
        }
    }
}

impl IoObject for SessionBase {
    fn plugged(&mut self, el: &mut EventLoop) {
        if self.connect {
            self.start_connecting(el, false);
        }
    }

    fn process_command(&mut self, el: &mut EventLoop, kind: CommandKind) {
        match kind {
            CommandKind::Attach { engine } => self.process_attach(el, engine),
            CommandKind::ActivateRead => {
                let event = match self.pipe {
                    Some(ref mut pipe) => pipe.process_activate_read(),
                    None => return,
                };
                self.pipe_event(el, event);
            }
            CommandKind::ActivateWrite { msgs_read } => {
                let event = match self.pipe {
                    Some(ref mut pipe) => pipe.process_activate_write(msgs_read),
                    None => return,
                };
                self.pipe_event(el, event);
            }
            CommandKind::Hiccup { writer } => {
                let event = match self.pipe {
                    Some(ref mut pipe) => pipe.process_hiccup(writer),
                    None => return,
                };
                self.pipe_event(el, event);
            }
            CommandKind::PipeTerm => {
                let event = match self.pipe {
                    Some(ref mut pipe) => pipe.process_pipe_term(),
                    None => return,
                };
                self.pipe_event(el, event);
            }
            CommandKind::PipeTermAck => {
                let event = match self.pipe {
                    Some(ref mut pipe) => pipe.process_pipe_term_ack(),
                    None => return,
                };
                self.pipe_event(el, event);
            }
            CommandKind::Term { linger } => self.process_term(el, linger),
            CommandKind::TermReq { child } => {
                self.own.process_term_req(child, Some(Duration::ZERO));
            }
            CommandKind::TermAck { child } => {
                if self.own.process_term_ack(child) {
                    self.finalize(el);
                }
            }
            other => debug!(
                "[{:?}] session ignoring command {}",
                self.oid,
                other.name()
            ),
        }
    }

    fn in_event(&mut self, el: &mut EventLoop) {
        self.engine_op(el, EngineOp::In);
    }

    fn out_event(&mut self, el: &mut EventLoop) {
        self.engine_op(el, EngineOp::Out);
    }

    fn timer_event(&mut self, el: &mut EventLoop, _timer: TimerId) {
        // Linger deadline: stop waiting for the drain.
        self.linger_timer = None;
        if let Some(ref mut pipe) = self.pipe {
            pipe.terminate(false);
        }
    }
}

impl EngineSink for SessionBase {
    fn push_msg(&mut self, mut msg: Message) -> std::result::Result<(), Message> {
        if self.options.recv_identity && !self.identity_received {
            msg.set_identity();
            self.identity_received = true;
        }
        match self.pipe {
            Some(ref mut pipe) => pipe.write(msg),
            None => Err(msg),
        }
    }

    fn flush_msgs(&mut self) {
        if let Some(ref mut pipe) = self.pipe {
            pipe.flush();
        }
    }

    fn pull_msg(&mut self) -> Option<Message> {
        if self.options.send_identity && !self.identity_sent {
            self.identity_sent = true;
            let mut msg = Message::from_slice(&self.options.identity);
            msg.set_identity();
            return Some(msg);
        }
        let msg = self.pipe.as_mut()?.read()?;
        // Remember whether the tail of this message is still in the pipe,
        // so a reconnect can discard the half-transferred remainder.
        self.incomplete_in = msg.has_more();
        Some(msg)
    }

    fn engine_error(&mut self) {
        self.engine_failed = true;
    }
}
