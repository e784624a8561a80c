// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Connecter: owned by a session, repeatedly tries to establish its stream
//! connection, backing off between attempts. On success it hands a fresh
//! engine to the session and retires.

use std::time::Duration;

use log::debug;
use mio::Interest;

use crate::command::{Address, CommandKind};
use crate::engine::StreamEngine;
use crate::global::ObjectId;
use crate::io_thread::{EventLoop, IoObject, TimerId};
use crate::options::Options;
use crate::own::Own;
use crate::transport::{Scheme, StreamSock};

pub struct Connecter {
    oid: ObjectId,
    own: Own,
    /// The owning session; receives the engine when the connect lands.
    session: Address,
    scheme: Scheme,
    address: String,
    options: Options,
    stream: Option<StreamSock>,
    timer: Option<TimerId>,
    current_ivl: Duration,
    /// Delay the first attempt; set when recovering from a dropped
    /// connection so reconnect storms are spaced out.
    wait_first: bool,
}

impl Connecter {
    pub fn new(
        oid: ObjectId,
        session: Address,
        scheme: Scheme,
        address: String,
        options: Options,
        wait_first: bool,
    ) -> Connecter {
        let current_ivl = options.reconnect_ivl;
        Connecter {
            oid,
            own: Own::child_of(session.clone()),
            session,
            scheme,
            address,
            options,
            stream: None,
            timer: None,
            current_ivl,
            wait_first,
        }
    }

    fn start_connecting(&mut self, el: &mut EventLoop) {
        match StreamSock::connect(self.scheme, &self.address) {
            Ok(mut stream) => {
                if el
                    .register(&mut stream, self.oid, Interest::WRITABLE)
                    .is_err()
                {
                    self.schedule_retry(el);
                    return;
                }
                debug!("[{:?}] connecting to '{}'", self.oid, self.address);
                self.stream = Some(stream);
            }
            Err(_) => self.schedule_retry(el),
        }
    }

    fn schedule_retry(&mut self, el: &mut EventLoop) {
        debug!(
            "[{:?}] connect to '{}' failed, retrying in {:?}",
            self.oid, self.address, self.current_ivl
        );
        self.timer = Some(el.add_timer(self.current_ivl, self.oid));
        if let Some(max) = self.options.reconnect_ivl_max {
            self.current_ivl = std::cmp::min(self.current_ivl * 2, max);
        }
    }

    fn check_connect_result(&mut self, el: &mut EventLoop) {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => return,
        };
        el.deregister(&mut stream);
        match stream.connect_result() {
            Ok(()) => {
                debug!("[{:?}] connected to '{}'", self.oid, self.address);
                self.current_ivl = self.options.reconnect_ivl;
                crate::transport::tune_stream(&stream, &self.options);
                let pids = (
                    self.options.socket_type.wire_id(),
                    self.options.socket_type.peer_wire_id(),
                );
                let engine = Box::new(StreamEngine::new(stream, pids));
                self.session.send(CommandKind::Attach { engine });
                // Job done; ask the session to reap this connecter.
                self.own.request_termination(self.oid);
            }
            Err(_) => self.schedule_retry(el),
        }
    }

    fn process_term(&mut self, el: &mut EventLoop) {
        if let Some(timer) = self.timer.take() {
            el.cancel_timer(timer);
        }
        if let Some(mut stream) = self.stream.take() {
            el.deregister(&mut stream);
        }
        self.own.process_term(None);
        self.own.send_term_ack(self.oid);
        el.retire(self.oid);
    }
}

impl IoObject for Connecter {
    fn plugged(&mut self, el: &mut EventLoop) {
        if self.wait_first {
            self.schedule_retry(el);
        } else {
            self.start_connecting(el);
        }
    }

    fn process_command(&mut self, el: &mut EventLoop, kind: CommandKind) {
        match kind {
            CommandKind::Term { .. } => self.process_term(el),
            other => debug!(
                "[{:?}] connecter ignoring command {}",
                self.oid,
                other.name()
            ),
        }
    }

    fn in_event(&mut self, el: &mut EventLoop) {
        self.check_connect_result(el);
    }

    fn out_event(&mut self, el: &mut EventLoop) {
        self.check_connect_result(el);
    }

    fn timer_event(&mut self, el: &mut EventLoop, _timer: TimerId) {
        self.timer = None;
        self.start_connecting(el);
    }
}
