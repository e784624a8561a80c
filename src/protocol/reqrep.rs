// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Request/reply family. DEALER load-balances requests out and fair-queues
//! replies in; ROUTER prefixes inbound messages with the peer identity and
//! routes outbound ones by their identity frame; REQ and REP wrap these
//! with the strict alternation state machine and the empty delimiter
//! envelope.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::dispatch::fq::Fq;
use crate::dispatch::lb::Lb;
use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType};
use crate::msg::Message;
use crate::protocol::{Pattern, PipeMap, SendError};

pub struct Dealer {
    fq: Fq,
    lb: Lb,
}

impl Dealer {
    pub fn new() -> Dealer {
        Dealer {
            fq: Fq::new(false),
            lb: Lb::new(),
        }
    }
}

impl Pattern for Dealer {
    fn socket_type(&self) -> SocketType {
        SocketType::Dealer
    }

    fn attach(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.attach(oid);
        self.lb.attach(oid);
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.terminated(oid);
        self.lb.terminated(oid);
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.activated(oid);
    }

    fn write_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.lb.activated(oid);
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        self.lb
            .sendpipe(pipes, msg)
            .map(|_| ())
            .map_err(SendError::Again)
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        self.fq.recvpipe(pipes).map(|(msg, _)| msg)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        self.fq.has_in(pipes)
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        pipes.values_mut().any(|pipe| pipe.check_write())
    }
}

/// REQ: a DEALER with strict request/reply alternation and the empty
/// delimiter frame marking the bottom of the routing envelope.
pub struct Req {
    inner: Dealer,
    /// A request is out; nothing may be sent until the reply arrives.
    receiving_reply: bool,
    /// The next transferred part starts a logical message.
    message_begins: bool,
}

impl Req {
    pub fn new() -> Req {
        Req {
            inner: Dealer::new(),
            receiving_reply: false,
            message_begins: true,
        }
    }
}

impl Pattern for Req {
    fn socket_type(&self) -> SocketType {
        SocketType::Req
    }

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.attach(pipes, oid);
    }

    fn terminated(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.terminated(pipes, oid);
    }

    fn read_activated(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.read_activated(pipes, oid);
    }

    fn write_activated(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.write_activated(pipes, oid);
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        if self.receiving_reply {
            return Err(SendError::Rejected(Error::InvalidState));
        }
        if self.message_begins {
            let mut bottom = Message::new();
            bottom.set_more();
            match self.inner.send(pipes, bottom) {
                Ok(()) => self.message_begins = false,
                // Nothing was routed; the caller retries with its part.
                Err(SendError::Again(_)) => return Err(SendError::Again(msg)),
                Err(e) => return Err(e),
            }
        }
        let final_part = !msg.has_more();
        self.inner.send(pipes, msg)?;
        if final_part {
            self.receiving_reply = true;
            self.message_begins = true;
        }
        Ok(())
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        if !self.receiving_reply {
            return Err(Error::InvalidState);
        }
        if self.message_begins {
            let bottom = self.inner.recv(pipes)?;
            if !bottom.has_more() || !bottom.is_empty() {
                // Malformed reply: discard it wholesale and keep waiting.
                debug!("request socket dropping a reply with no envelope bottom");
                let mut tail = bottom;
                while tail.has_more() {
                    tail = self.inner.recv(pipes)?;
                }
                return Err(Error::WouldBlock);
            }
            self.message_begins = false;
        }
        let msg = self.inner.recv(pipes)?;
        if !msg.has_more() {
            self.receiving_reply = false;
            self.message_begins = true;
        }
        Ok(msg)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        self.receiving_reply && self.inner.has_in(pipes)
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        !self.receiving_reply && self.inner.has_out(pipes)
    }
}

struct RouterPeer {
    oid: ObjectId,
    /// Accepts writes; cleared when the pipe refuses, restored by its
    /// write activation.
    active: bool,
}

/// ROUTER: keyed outbound routing plus identity-prefixed inbound parts.
pub struct Router {
    socket_type: SocketType,
    fq: Fq,
    outpipes: HashMap<Vec<u8>, RouterPeer>,
    identities: HashMap<ObjectId, Vec<u8>>,
    /// 0 = none, 1 = message, 2 = identity-then-message.
    prefetched: u8,
    prefetched_id: Vec<u8>,
    prefetched_msg: Option<Message>,
    more_in: bool,
    current_out: Option<ObjectId>,
    more_out: bool,
    next_peer_id: u32,
}

impl Router {
    pub fn new(socket_type: SocketType) -> Router {
        Router {
            socket_type,
            fq: Fq::new(true),
            outpipes: HashMap::new(),
            identities: HashMap::new(),
            prefetched: 0,
            prefetched_id: Vec::new(),
            prefetched_msg: None,
            more_in: false,
            current_out: None,
            more_out: false,
            next_peer_id: rand::random(),
        }
    }

    fn generated_identity(&mut self) -> Vec<u8> {
        let mut identity = vec![0u8; 5];
        BigEndian::write_u32(&mut identity[1..], self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1);
        identity
    }

    fn insert_peer(&mut self, identity: Vec<u8>, oid: ObjectId) {
        self.identities.insert(oid, identity.clone());
        self.outpipes
            .insert(identity, RouterPeer { oid, active: true });
    }

    /// Abandon a partially routed reply.
    pub fn rollback(&mut self, pipes: &mut PipeMap) {
        if let Some(oid) = self.current_out.take() {
            if let Some(pipe) = pipes.get_mut(&oid) {
                pipe.rollback();
            }
            self.more_out = false;
        }
    }

    fn recv_part(&mut self, pipes: &mut PipeMap) -> Result<(Message, ObjectId)> {
        loop {
            let (msg, oid) = self.fq.recvpipe(pipes)?;
            if !msg.is_identity() {
                return Ok((msg, oid));
            }
            debug_assert!(!self.more_in);

            // An empty identity keeps the auto-generated one.
            if msg.is_empty() {
                continue;
            }
            let identity = msg.to_vec();
            if self.outpipes.contains_key(&identity) {
                // Duplicate identity: the newcomer is cut off.
                debug!("duplicate peer identity, terminating pipe [{:?}]", oid);
                if let Some(pipe) = pipes.get_mut(&oid) {
                    pipe.terminate(false);
                }
                continue;
            }
            // Rekey the peer under its self-declared identity.
            if let Some(old) = self.identities.remove(&oid) {
                self.outpipes.remove(&old);
            }
            if let Some(pipe) = pipes.get_mut(&oid) {
                pipe.set_identity(identity.clone());
            }
            self.insert_peer(identity, oid);
        }
    }
}

impl Pattern for Router {
    fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        let identity = self.generated_identity();
        if let Some(pipe) = pipes.get_mut(&oid) {
            pipe.set_identity(identity.clone());
        }
        self.insert_peer(identity, oid);
        self.fq.attach(oid);
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.terminated(oid);
        if let Some(identity) = self.identities.remove(&oid) {
            self.outpipes.remove(&identity);
        }
        if self.current_out == Some(oid) {
            self.current_out = None;
        }
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.activated(oid);
    }

    fn write_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        if let Some(identity) = self.identities.get(&oid) {
            if let Some(peer) = self.outpipes.get_mut(identity) {
                peer.active = true;
            }
        }
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        // The first part is the identity of the destination peer.
        if !self.more_out {
            debug_assert!(self.current_out.is_none());
            if !msg.has_more() {
                // An identity with no body to follow is a protocol
                // violation by the caller.
                return Err(SendError::Rejected(Error::InvalidState));
            }
            self.more_out = true;
            if let Some(peer) = self.outpipes.get_mut(msg.data()) {
                let oid = peer.oid;
                let writable = pipes
                    .get_mut(&oid)
                    .map(|pipe| pipe.check_write())
                    .unwrap_or(false);
                if writable {
                    self.current_out = Some(oid);
                } else {
                    peer.active = false;
                    self.more_out = false;
                }
            }
            // Unknown peer: the message body is silently dropped.
            return Ok(());
        }

        self.more_out = msg.has_more();
        match self.current_out {
            Some(oid) => {
                let ok = pipes
                    .get_mut(&oid)
                    .map(|pipe| pipe.write(msg).is_ok())
                    .unwrap_or(false);
                if !ok {
                    self.current_out = None;
                } else if !self.more_out {
                    self.current_out = None;
                }
            }
            None => {}
        }
        Ok(())
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        if self.prefetched == 2 {
            let mut msg = Message::from_slice(&self.prefetched_id);
            msg.set_more();
            self.prefetched = 1;
            return Ok(msg);
        }
        if self.prefetched == 1 {
            let msg = self.prefetched_msg.take().expect("prefetched message");
            self.more_in = msg.has_more();
            self.prefetched = 0;
            return Ok(msg);
        }

        let (msg, oid) = self.recv_part(pipes)?;

        // Mid-message: hand out the next part as is.
        if self.more_in {
            self.more_in = msg.has_more();
            return Ok(msg);
        }

        // Start of a new message: prefetch the body and return the peer
        // identity first.
        self.prefetched_msg = Some(msg);
        self.prefetched = 1;
        let identity = pipes
            .get(&oid)
            .map(|pipe| pipe.identity().to_vec())
            .unwrap_or_default();
        let mut id_msg = Message::from_vec(identity);
        id_msg.set_more();
        Ok(id_msg)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        if self.more_in || self.prefetched > 0 {
            return true;
        }
        // Try to prefetch the start of the next message; the identity
        // frame it will be prefixed with is remembered too.
        match self.recv(pipes) {
            Ok(id_msg) => {
                self.prefetched_id = id_msg.to_vec();
                self.prefetched = 2;
                true
            }
            Err(_) => false,
        }
    }

    fn has_out(&mut self, _pipes: &mut PipeMap) -> bool {
        // Routing readiness depends on the destination; reported per send.
        true
    }
}

/// REP: a ROUTER that saves the routing envelope of each request and
/// replays it in front of the reply.
pub struct Rep {
    inner: Router,
    sending_reply: bool,
    request_begins: bool,
}

impl Rep {
    pub fn new() -> Rep {
        Rep {
            inner: Router::new(SocketType::Rep),
            sending_reply: false,
            request_begins: true,
        }
    }
}

impl Pattern for Rep {
    fn socket_type(&self) -> SocketType {
        SocketType::Rep
    }

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.attach(pipes, oid);
    }

    fn terminated(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.terminated(pipes, oid);
    }

    fn read_activated(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.read_activated(pipes, oid);
    }

    fn write_activated(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        self.inner.write_activated(pipes, oid);
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        if !self.sending_reply {
            return Err(SendError::Rejected(Error::InvalidState));
        }
        let final_part = !msg.has_more();
        self.inner.send(pipes, msg)?;
        if final_part {
            self.sending_reply = false;
        }
        Ok(())
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        if self.sending_reply {
            return Err(Error::InvalidState);
        }
        if self.request_begins {
            // Feed the routing envelope straight into the reply path,
            // down to the empty delimiter frame.
            loop {
                let part = self.inner.recv(pipes)?;
                if part.has_more() {
                    let bottom = part.is_empty();
                    let _ = self.inner.send(pipes, part);
                    if bottom {
                        break;
                    }
                } else {
                    // Malformed envelope: drop whatever was staged.
                    self.inner.rollback(pipes);
                }
            }
            self.request_begins = false;
        }
        let msg = self.inner.recv(pipes)?;
        if !msg.has_more() {
            self.sending_reply = true;
            self.request_begins = true;
        }
        Ok(msg)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        !self.sending_reply && self.inner.has_in(pipes)
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        self.sending_reply && self.inner.has_out(pipes)
    }
}
