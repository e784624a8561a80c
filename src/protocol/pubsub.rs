// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Publish/subscribe. Subscriptions are byte-prefix topics carried
//! upstream as control frames (`[1, topic…]` subscribe, `[0, topic…]`
//! unsubscribe); the publisher filters on its side and fans out to the
//! matching subset only. The X variants expose the control frames to the
//! application.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::dispatch::dist::Dist;
use crate::dispatch::fq::Fq;
use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType};
use crate::msg::Message;
use crate::options::SocketOption;
use crate::protocol::{Pattern, PipeMap, SendError};

const SUBSCRIBE: u8 = 1;
const UNSUBSCRIBE: u8 = 0;

fn matches_any(subscriptions: &[Vec<u8>], data: &[u8]) -> bool {
    subscriptions
        .iter()
        .any(|topic| data.len() >= topic.len() && &data[..topic.len()] == topic.as_slice())
}

/// Publisher side, shared by PUB and XPUB.
pub struct XPub {
    socket_type: SocketType,
    dist: Dist,
    /// Topic prefixes per subscriber pipe.
    subscriptions: HashMap<ObjectId, Vec<Vec<u8>>>,
    /// Control frames waiting for the application (XPUB only).
    pending: VecDeque<Message>,
    /// A multipart message is being published.
    more: bool,
}

impl XPub {
    pub fn new(socket_type: SocketType) -> XPub {
        XPub {
            socket_type,
            dist: Dist::new(),
            subscriptions: HashMap::new(),
            pending: VecDeque::new(),
            more: false,
        }
    }

    fn expose_control(&self) -> bool {
        self.socket_type == SocketType::XPub
    }

    /// Control frames are applied eagerly, whether or not the application
    /// ever reads them.
    fn drain_control(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        loop {
            let msg = match pipes.get_mut(&oid).and_then(|pipe| pipe.read()) {
                Some(msg) => msg,
                None => return,
            };
            let data = msg.data();
            if data.is_empty() {
                debug!("[{:?}] empty subscription frame dropped", oid);
                continue;
            }
            let topics = self.subscriptions.entry(oid).or_default();
            match data[0] {
                SUBSCRIBE => topics.push(data[1..].to_vec()),
                UNSUBSCRIBE => {
                    if let Some(at) = topics.iter().position(|t| t[..] == data[1..]) {
                        topics.remove(at);
                    }
                }
                other => {
                    debug!("[{:?}] malformed subscription frame ({})", oid, other);
                    continue;
                }
            }
            if self.expose_control() {
                self.pending.push_back(msg);
            }
        }
    }
}

impl Pattern for XPub {
    fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.dist.attach(oid);
        self.subscriptions.entry(oid).or_default();
        // The subscriber may have forwarded subscriptions before we ever
        // poll this pipe.
        self.drain_control(pipes, oid);
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.dist.terminated(oid);
        self.subscriptions.remove(&oid);
    }

    fn read_activated(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.drain_control(pipes, oid);
    }

    fn write_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.dist.activated(oid);
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        // The first part picks the matching subset; the rest follow it.
        if !self.more {
            for (oid, topics) in self.subscriptions.iter() {
                if matches_any(topics, msg.data()) {
                    self.dist.match_pipe(*oid);
                }
            }
        }
        self.more = msg.has_more();
        self.dist.send_to_matching(pipes, msg);
        if !self.more {
            self.dist.unmatch();
        }
        Ok(())
    }

    fn recv(&mut self, _pipes: &mut PipeMap) -> Result<Message> {
        if !self.expose_control() {
            return Err(Error::NotSupported);
        }
        self.pending.pop_front().ok_or(Error::WouldBlock)
    }

    fn has_in(&mut self, _pipes: &mut PipeMap) -> bool {
        self.expose_control() && !self.pending.is_empty()
    }

    fn has_out(&mut self, _pipes: &mut PipeMap) -> bool {
        self.dist.has_out()
    }
}

/// Subscriber side, shared by SUB and XSUB.
pub struct XSub {
    socket_type: SocketType,
    fq: Fq,
    dist: Dist,
    subscriptions: Vec<Vec<u8>>,
    /// Matched message prefetched by a readiness check.
    prefetched: Option<Message>,
    /// Mid-multipart delivery; parts bypass the filter.
    more: bool,
}

impl XSub {
    pub fn new(socket_type: SocketType) -> XSub {
        XSub {
            socket_type,
            fq: Fq::new(false),
            dist: Dist::new(),
            subscriptions: Vec::new(),
            prefetched: None,
            more: false,
        }
    }

    fn control_frame(kind: u8, topic: &[u8]) -> Message {
        let mut frame = Vec::with_capacity(topic.len() + 1);
        frame.push(kind);
        frame.extend_from_slice(topic);
        Message::from_vec(frame)
    }

    fn apply(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }
        match data[0] {
            SUBSCRIBE => self.subscriptions.push(data[1..].to_vec()),
            UNSUBSCRIBE => {
                if let Some(at) = self.subscriptions.iter().position(|t| t[..] == data[1..]) {
                    self.subscriptions.remove(at);
                }
            }
            _ => return Err(Error::InvalidArgument),
        }
        Ok(())
    }
}

impl Pattern for XSub {
    fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.attach(oid);
        self.dist.attach(oid);
        // Replay the subscription set to the new publisher.
        for topic in self.subscriptions.clone() {
            let frame = XSub::control_frame(SUBSCRIBE, &topic);
            if let Some(pipe) = pipes.get_mut(&oid) {
                let _ = pipe.write(frame);
            }
        }
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.terminated(oid);
        self.dist.terminated(oid);
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.activated(oid);
    }

    fn write_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.dist.activated(oid);
    }

    fn hiccuped(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        // The reconnected peer lost our subscription set; send it again.
        for topic in self.subscriptions.clone() {
            let frame = XSub::control_frame(SUBSCRIBE, &topic);
            if let Some(pipe) = pipes.get_mut(&oid) {
                let _ = pipe.write(frame);
            }
        }
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        if self.socket_type == SocketType::Sub {
            return Err(SendError::Rejected(Error::NotSupported));
        }
        if let Err(e) = self.apply(msg.data()) {
            return Err(SendError::Rejected(e));
        }
        self.dist.send_to_all(pipes, msg);
        Ok(())
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        if let Some(msg) = self.prefetched.take() {
            self.more = msg.has_more();
            return Ok(msg);
        }
        loop {
            let (msg, _) = self.fq.recvpipe(pipes)?;
            if self.more || matches_any(&self.subscriptions, msg.data()) {
                self.more = msg.has_more();
                return Ok(msg);
            }
            // Doesn't match any subscription: discard the whole message.
            let mut tail = msg;
            while tail.has_more() {
                tail = self.fq.recvpipe(pipes)?.0;
            }
        }
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        if self.more || self.prefetched.is_some() {
            return true;
        }
        loop {
            let (msg, _) = match self.fq.recvpipe(pipes) {
                Ok(got) => got,
                Err(_) => return false,
            };
            if matches_any(&self.subscriptions, msg.data()) {
                self.prefetched = Some(msg);
                return true;
            }
            let mut tail = msg;
            while tail.has_more() {
                tail = match self.fq.recvpipe(pipes) {
                    Ok((msg, _)) => msg,
                    Err(_) => return false,
                };
            }
        }
    }

    fn set_option(&mut self, pipes: &mut PipeMap, option: &SocketOption) -> Result<bool> {
        let frame = match option {
            SocketOption::Subscribe(topic) => {
                self.subscriptions.push(topic.clone());
                XSub::control_frame(SUBSCRIBE, topic)
            }
            SocketOption::Unsubscribe(topic) => {
                match self.subscriptions.iter().position(|t| t == topic) {
                    Some(at) => {
                        self.subscriptions.remove(at);
                    }
                    None => return Err(Error::InvalidArgument),
                }
                XSub::control_frame(UNSUBSCRIBE, topic)
            }
            _ => return Ok(false),
        };
        self.dist.send_to_all(pipes, frame);
        Ok(true)
    }
}
