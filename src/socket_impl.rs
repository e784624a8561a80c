// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The socket core: owns the mailbox, the attached pipes and the pattern
//! state; runs the blocking send/receive loops on the application thread;
//! and, after close, finishes its life on the reaper thread.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::command::{Address, Command, CommandKind};
use crate::ctx::{Ctx, InprocEndpoint};
use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType, DONTWAIT, INBOUND_POLL_RATE, SNDMORE};
use crate::mailbox::Mailbox;
use crate::msg::Message;
use crate::options::{Options, SocketOption};
use crate::own::Own;
use crate::pipe::{pipepair, Pipe, PipeEvent};
use crate::protocol::{self, Pattern, PipeMap, SendError};
use crate::session::SessionBase;
use crate::transport::listener::Listener;
use crate::transport::{self, ListenerSock, Scheme};

pub struct SocketCore {
    ctx: Arc<Ctx>,
    slot: u32,
    oid: ObjectId,
    addr: Address,
    mailbox: Mailbox,
    options: Options,
    pattern: Box<dyn Pattern>,
    pipes: PipeMap,
    own: Own,
    /// The context was terminated while this socket was alive.
    ctx_terminated: bool,
    /// Terminated and ready for deallocation by the reaper.
    destroyed: bool,
    /// MORE flag of the part most recently handed to the application.
    rcvmore: bool,
    /// Messages received since commands were last processed.
    ticks: u32,
    /// Inproc connects handed out by the endpoint registry; all of them
    /// must be processed before the socket may die.
    inproc_pending: Arc<AtomicU64>,
    inproc_processed: u64,
}

impl SocketCore {
    pub fn new(
        ctx: Arc<Ctx>,
        socket_type: SocketType,
        slot: u32,
        oid: ObjectId,
        addr: Address,
        mailbox: Mailbox,
    ) -> SocketCore {
        let pattern = protocol::create(socket_type);
        debug!(
            "[{:?}] created {:?} socket in slot {}",
            oid,
            pattern.socket_type(),
            slot
        );
        SocketCore {
            ctx,
            slot,
            oid,
            addr,
            mailbox,
            options: Options::new(socket_type),
            pattern,
            pipes: PipeMap::new(),
            own: Own::root(),
            ctx_terminated: false,
            destroyed: false,
            rcvmore: false,
            ticks: 0,
            inproc_pending: Arc::new(AtomicU64::new(0)),
            inproc_processed: 0,
        }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn socket_type(&self) -> SocketType {
        self.options.socket_type
    }

    pub fn mailbox_fd(&self) -> RawFd {
        self.mailbox.fd()
    }

    pub fn recv_more(&self) -> bool {
        self.rcvmore
    }

    pub fn set_option(&mut self, option: SocketOption) -> Result<()> {
        if self.ctx_terminated {
            return Err(Error::Terminated);
        }
        if self.pattern.set_option(&mut self.pipes, &option)? {
            return Ok(());
        }
        self.options.apply(option)
    }

    /// POLLIN/POLLOUT readiness, with pending commands processed first.
    pub fn events(&mut self) -> Result<(bool, bool)> {
        self.process_commands(Some(Duration::ZERO))?;
        Ok((
            self.pattern.has_in(&mut self.pipes),
            self.pattern.has_out(&mut self.pipes),
        ))
    }

    pub fn bind(&mut self, endpoint: &str) -> Result<()> {
        if self.ctx_terminated {
            return Err(Error::Terminated);
        }
        let (scheme, address) = transport::parse_endpoint(endpoint)?;
        match scheme {
            Scheme::Inproc => self.ctx.register_endpoint(
                endpoint.to_string(),
                InprocEndpoint {
                    socket: self.addr.clone(),
                    options: self.options.clone(),
                    pending: Arc::clone(&self.inproc_pending),
                },
            ),
            Scheme::Tcp | Scheme::Ipc => {
                // Bind here so the error surfaces synchronously, then hand
                // the accept socket to an I/O thread.
                let sock = ListenerSock::bind(scheme, address)?;
                let io_tx = self.ctx.choose_io_thread(self.options.affinity);
                let loid = self.ctx.next_oid();
                let listener = Listener::new(
                    loid,
                    Arc::clone(&self.ctx),
                    self.addr.clone(),
                    self.options.clone(),
                    sock,
                );
                self.own.launch_child(Address::new(io_tx.clone(), loid));
                debug!("[{:?}] bound '{}', listener [{:?}]", self.oid, endpoint, loid);
                io_tx.send(Command {
                    dest: loid,
                    kind: CommandKind::Plug {
                        object: Box::new(listener),
                    },
                });
                Ok(())
            }
        }
    }

    pub fn connect(&mut self, endpoint: &str) -> Result<()> {
        if self.ctx_terminated {
            return Err(Error::Terminated);
        }
        let (scheme, address) = transport::parse_endpoint(endpoint)?;
        if scheme == Scheme::Inproc {
            return self.connect_inproc(endpoint);
        }

        let io_tx = self.ctx.choose_io_thread(self.options.affinity);
        let session_oid = self.ctx.next_oid();
        let local_oid = self.ctx.next_oid();
        let (local, session_end) = pipepair(
            Address::new(self.addr.tx.clone(), local_oid),
            Address::new(io_tx.clone(), session_oid),
            (self.options.sndhwm, self.options.rcvhwm),
            (
                self.options.delay_on_disconnect,
                self.options.delay_on_close,
            ),
        );
        let session = SessionBase::new_connect(
            Arc::clone(&self.ctx),
            session_oid,
            Address::new(io_tx.clone(), session_oid),
            self.addr.clone(),
            self.addr.clone(),
            self.options.clone(),
            scheme,
            address.to_string(),
            session_end,
        );
        self.attach_pipe(local);
        self.own
            .launch_child(Address::new(io_tx.clone(), session_oid));
        debug!(
            "[{:?}] connecting '{}', session [{:?}]",
            self.oid, endpoint, session_oid
        );
        io_tx.send(Command {
            dest: session_oid,
            kind: CommandKind::Plug {
                object: Box::new(session),
            },
        });
        Ok(())
    }

    fn connect_inproc(&mut self, endpoint: &str) -> Result<()> {
        let peer = self
            .ctx
            .find_endpoint(endpoint)
            .ok_or(Error::ConnectionRefused)?;

        // The effective limit on an inproc connection is the sum of the
        // two sockets' watermarks; zero on either side means unbounded.
        let sndhwm = if self.options.sndhwm == 0 || peer.options.rcvhwm == 0 {
            0
        } else {
            self.options.sndhwm + peer.options.rcvhwm
        };
        let rcvhwm = if self.options.rcvhwm == 0 || peer.options.sndhwm == 0 {
            0
        } else {
            self.options.rcvhwm + peer.options.sndhwm
        };

        let local_oid = self.ctx.next_oid();
        let remote_oid = self.ctx.next_oid();
        let (mut local, mut remote) = pipepair(
            Address::new(self.addr.tx.clone(), local_oid),
            Address::new(peer.socket.tx.clone(), remote_oid),
            (sndhwm, rcvhwm),
            (
                self.options.delay_on_disconnect,
                self.options.delay_on_close,
            ),
        );

        // Exchange identities directly through the fresh pipe pair.
        if self.options.send_identity {
            let mut identity = Message::from_slice(&self.options.identity);
            identity.set_identity();
            let _ = local.write(identity);
        }
        if peer.options.send_identity {
            let mut identity = Message::from_slice(&peer.options.identity);
            identity.set_identity();
            let _ = remote.write(identity);
        }

        self.attach_pipe(local);
        peer.socket.send(CommandKind::Bind {
            pipe: remote,
            inproc: true,
        });
        debug!("[{:?}] connected '{}' in-process", self.oid, endpoint);
        Ok(())
    }

    fn attach_pipe(&mut self, pipe: Pipe) {
        let oid = pipe.oid();
        self.pipes.insert(oid, pipe);
        self.pattern.attach(&mut self.pipes, oid);

        // A socket already shutting down turns new pipes right around.
        if self.own.is_terminating() {
            self.own.register_term_acks(1);
            if let Some(pipe) = self.pipes.get_mut(&oid) {
                pipe.terminate(false);
            }
        }
    }

    pub fn send(&mut self, mut msg: Message, flags: i32) -> Result<()> {
        if self.ctx_terminated {
            return Err(Error::Terminated);
        }
        self.process_commands(Some(Duration::ZERO))?;

        if flags & SNDMORE != 0 {
            msg.set_more();
        } else {
            msg.clear_more();
        }

        let dont_wait = flags & DONTWAIT != 0 || self.options.sndtimeo == Some(Duration::ZERO);
        let deadline = match self.options.sndtimeo {
            Some(timeout) if !timeout.is_zero() => Some(Instant::now() + timeout),
            _ => None,
        };

        loop {
            msg = match self.pattern.send(&mut self.pipes, msg) {
                Ok(()) => return Ok(()),
                Err(SendError::Rejected(e)) => return Err(e),
                Err(SendError::Again(msg)) => msg,
            };
            if dont_wait {
                // The pipe looked full, but an activation command may be
                // sitting unprocessed; one forced pass, then give up.
                self.process_commands(Some(Duration::ZERO))?;
                return match self.pattern.send(&mut self.pipes, msg) {
                    Ok(()) => Ok(()),
                    Err(SendError::Rejected(e)) => Err(e),
                    Err(SendError::Again(_)) => Err(Error::WouldBlock),
                };
            }
            let timeout = match deadline {
                None => None,
                Some(at) => {
                    let left = at.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(Error::WouldBlock);
                    }
                    Some(left)
                }
            };
            self.process_commands(timeout)?;
        }
    }

    pub fn recv(&mut self, flags: i32) -> Result<Message> {
        if self.ctx_terminated {
            return Err(Error::Terminated);
        }

        // Once in a while check for commands even if messages keep
        // arriving, so activation and termination are not starved.
        self.ticks += 1;
        if self.ticks == INBOUND_POLL_RATE {
            self.process_commands(Some(Duration::ZERO))?;
            self.ticks = 0;
        }

        match self.pattern.recv(&mut self.pipes) {
            Ok(msg) => return Ok(self.extract_flags(msg)),
            Err(Error::WouldBlock) => {}
            Err(e) => return Err(e),
        }

        let dont_wait = flags & DONTWAIT != 0 || self.options.rcvtimeo == Some(Duration::ZERO);
        if dont_wait {
            self.process_commands(Some(Duration::ZERO))?;
            self.ticks = 0;
            let got = self.pattern.recv(&mut self.pipes);
            return got.map(|msg| self.extract_flags(msg));
        }

        let deadline = match self.options.rcvtimeo {
            Some(timeout) => Some(Instant::now() + timeout),
            None => None,
        };
        let mut block = self.ticks != 0;
        loop {
            // The pattern's own deadline (survey expiry) also bounds the
            // wait.
            let now = Instant::now();
            let effective = match (deadline, self.pattern.recv_deadline()) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.min(b)),
            };
            let timeout = match effective {
                None => None,
                Some(at) => {
                    let left = at.saturating_duration_since(now);
                    if left.is_zero() {
                        // One last look, then report the timeout.
                        return match self.pattern.recv(&mut self.pipes) {
                            Ok(msg) => Ok(self.extract_flags(msg)),
                            Err(Error::WouldBlock) => Err(Error::WouldBlock),
                            Err(e) => Err(e),
                        };
                    }
                    Some(left)
                }
            };
            self.process_commands(if block { timeout } else { Some(Duration::ZERO) })?;
            block = true;
            match self.pattern.recv(&mut self.pipes) {
                Ok(msg) => {
                    self.ticks = 0;
                    return Ok(self.extract_flags(msg));
                }
                Err(Error::WouldBlock) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn extract_flags(&mut self, msg: Message) -> Message {
        self.rcvmore = msg.has_more();
        msg
    }

    /// Drains the mailbox, waiting up to `timeout` for the first command
    /// (`None` waits forever).
    fn process_commands(&mut self, timeout: Option<Duration>) -> Result<()> {
        let mut cmd = self.mailbox.recv(timeout);
        while let Some(command) = cmd {
            self.process_command(command);
            cmd = self.mailbox.recv(Some(Duration::ZERO));
        }
        if self.ctx_terminated {
            return Err(Error::Terminated);
        }
        Ok(())
    }

    fn process_command(&mut self, cmd: Command) {
        match cmd.kind {
            CommandKind::Stop => {
                // The context is going down; wake any blocked caller.
                self.ctx_terminated = true;
            }
            CommandKind::Bind { pipe, inproc } => {
                if inproc {
                    self.inproc_processed += 1;
                }
                self.attach_pipe(pipe);
            }
            CommandKind::ActivateRead => {
                self.pipe_event(cmd.dest, |pipe| pipe.process_activate_read());
            }
            CommandKind::ActivateWrite { msgs_read } => {
                self.pipe_event(cmd.dest, |pipe| pipe.process_activate_write(msgs_read));
            }
            CommandKind::Hiccup { writer } => {
                self.pipe_event(cmd.dest, |pipe| pipe.process_hiccup(writer));
            }
            CommandKind::PipeTerm => {
                self.pipe_event(cmd.dest, |pipe| pipe.process_pipe_term());
            }
            CommandKind::PipeTermAck => {
                self.pipe_event(cmd.dest, |pipe| pipe.process_pipe_term_ack());
            }
            CommandKind::TermReq { child } => {
                self.own.process_term_req(child, self.options.linger);
            }
            CommandKind::Term { linger } => {
                self.process_term(linger);
            }
            CommandKind::TermAck { child } => {
                self.own.process_term_ack(child);
            }
            other => {
                debug!("[{:?}] socket ignoring command {}", self.oid, other.name());
            }
        }
    }

    fn pipe_event<F>(&mut self, oid: ObjectId, action: F)
    where
        F: FnOnce(&mut Pipe) -> PipeEvent,
    {
        let event = match self.pipes.get_mut(&oid) {
            Some(pipe) => action(pipe),
            None => return,
        };
        match event {
            PipeEvent::ReadActivated => self.pattern.read_activated(&mut self.pipes, oid),
            PipeEvent::WriteActivated => self.pattern.write_activated(&mut self.pipes, oid),
            PipeEvent::Hiccuped => self.pattern.hiccuped(&mut self.pipes, oid),
            PipeEvent::Terminated => {
                self.pipes.remove(&oid);
                self.pattern.terminated(&mut self.pipes, oid);
                if self.own.is_terminating() {
                    self.own.unregister_term_ack();
                }
            }
            PipeEvent::None => {}
        }
    }

    fn process_term(&mut self, linger: Option<Duration>) {
        // No new inproc peers may appear from here on.
        self.ctx.unregister_endpoints(self.oid);

        let oids: Vec<ObjectId> = self.pipes.keys().copied().collect();
        self.own.register_term_acks(oids.len() as u32);
        for oid in oids {
            if let Some(pipe) = self.pipes.get_mut(&oid) {
                pipe.terminate(false);
            }
        }
        self.own.process_term(linger);
    }

    /// First step on the reaper thread: begin the shutdown of the whole
    /// ownership subtree, then drain whatever is already queued.
    pub fn start_reaping(&mut self) {
        debug!("[{:?}] reaping starts", self.oid);
        self.process_term(self.options.linger);
        self.reaper_poll();
    }

    /// One reaper iteration: process pending commands, then check whether
    /// the socket can be deallocated.
    pub fn reaper_poll(&mut self) {
        while let Some(cmd) = self.mailbox.recv(Some(Duration::ZERO)) {
            self.process_command(cmd);
        }
        self.check_destroy();
    }

    fn check_destroy(&mut self) {
        if self.destroyed || !self.own.is_done() {
            return;
        }
        // Connects handed out by the registry must all have been turned
        // into Bind commands and processed, or they would be lost.
        if self.inproc_processed != self.inproc_pending.load(Ordering::SeqCst) {
            return;
        }
        self.destroyed = true;
        debug!("[{:?}] socket destroyed", self.oid);
        self.ctx.reaper().send(Command {
            dest: ObjectId(0),
            kind: CommandKind::Reaped { slot: self.slot },
        });
    }
}
