// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Survey pattern. The surveyor stamps each survey with a fresh 4-byte id
//! and fans it out to every respondent; responses carry the id back and
//! stale ones are discarded. A deadline bounds how long responses are
//! gathered. Respondents route their responses back over the peer that
//! delivered the survey, using the same identity prefixing as ROUTER but
//! keyed by a 4-byte peer number.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::dispatch::dist::Dist;
use crate::dispatch::fq::Fq;
use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType};
use crate::msg::Message;
use crate::options::SocketOption;
use crate::protocol::{Pattern, PipeMap, SendError};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(1);

fn id_frame(id: u32) -> Message {
    let mut data = [0u8; 4];
    BigEndian::write_u32(&mut data, id);
    let mut msg = Message::from_slice(&data);
    msg.set_more();
    msg
}

/// Raw surveyor: fan-out requests, fair-queued responses, no state.
pub struct XSurveyor {
    socket_type: SocketType,
    dist: Dist,
    fq: Fq,
}

impl XSurveyor {
    pub fn new(socket_type: SocketType) -> XSurveyor {
        XSurveyor {
            socket_type,
            dist: Dist::new(),
            fq: Fq::new(false),
        }
    }
}

impl Pattern for XSurveyor {
    fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    fn attach(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.dist.attach(oid);
        self.fq.attach(oid);
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.dist.terminated(oid);
        self.fq.terminated(oid);
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.activated(oid);
    }

    fn write_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.dist.activated(oid);
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        self.dist.send_to_all(pipes, msg);
        Ok(())
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        self.fq.recvpipe(pipes).map(|(msg, _)| msg)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        self.fq.has_in(pipes)
    }

    fn has_out(&mut self, _pipes: &mut PipeMap) -> bool {
        self.dist.has_out()
    }
}

pub struct Surveyor {
    inner: XSurveyor,
    survey_id: u32,
    /// Set while a survey is open for responses.
    expires_at: Option<Instant>,
    deadline: Duration,
    /// Multipart survey being sent out.
    more_out: bool,
    /// Multipart response being handed to the application.
    more_in: bool,
}

impl Surveyor {
    pub fn new() -> Surveyor {
        Surveyor {
            inner: XSurveyor::new(SocketType::Surveyor),
            survey_id: rand::random(),
            expires_at: None,
            deadline: DEFAULT_DEADLINE,
            more_out: false,
            more_in: false,
        }
    }
}

impl Pattern for Surveyor {
    fn socket_type(&self) -> SocketType {
        SocketType::Surveyor
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
        if !self.more_out {
            // A new survey obsoletes the previous one.
            self.survey_id = self.survey_id.wrapping_add(1);
            self.expires_at = None;
            self.inner.send(pipes, id_frame(self.survey_id))?;
        }
        self.more_out = msg.has_more();
        self.inner.send(pipes, msg)?;
        if !self.more_out {
            self.expires_at = Some(Instant::now() + self.deadline);
        }
        Ok(())
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        if self.more_in {
            let msg = self.inner.recv(pipes)?;
            self.more_in = msg.has_more();
            return Ok(msg);
        }
        let expires_at = self.expires_at.ok_or(Error::InvalidState)?;
        loop {
            if Instant::now() >= expires_at {
                // The survey is over; further responses are void.
                self.expires_at = None;
                return Err(Error::WouldBlock);
            }
            let head = self.inner.recv(pipes)?;
            let current = head.size() == 4 && BigEndian::read_u32(head.data()) == self.survey_id;
            if current && head.has_more() {
                let msg = self.inner.recv(pipes)?;
                self.more_in = msg.has_more();
                return Ok(msg);
            }
            // Stale or malformed response: drop all of it.
            debug!("discarding a response to an expired survey");
            let mut tail = head;
            while tail.has_more() {
                tail = self.inner.recv(pipes)?;
            }
        }
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        if self.more_in {
            return true;
        }
        match self.expires_at {
            Some(at) => Instant::now() < at && self.inner.has_in(pipes),
            None => false,
        }
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        self.inner.has_out(pipes)
    }

    fn set_option(&mut self, _pipes: &mut PipeMap, option: &SocketOption) -> Result<bool> {
        if let SocketOption::SurveyDeadline(deadline) = option {
            self.deadline = *deadline;
            return Ok(true);
        }
        Ok(false)
    }

    fn recv_deadline(&self) -> Option<Instant> {
        if self.more_in {
            None
        } else {
            self.expires_at
        }
    }
}

struct RespondentPeer {
    oid: ObjectId,
    active: bool,
}

/// Raw respondent: inbound surveys are prefixed with a 4-byte peer number,
/// outbound responses are routed by the same prefix.
pub struct XRespondent {
    socket_type: SocketType,
    fq: Fq,
    outpipes: HashMap<u32, RespondentPeer>,
    peers: HashMap<ObjectId, u32>,
    prefetched: u8,
    prefetched_id: Vec<u8>,
    prefetched_msg: Option<Message>,
    more_in: bool,
    current_out: Option<ObjectId>,
    more_out: bool,
    next_peer_id: u32,
}

impl XRespondent {
    pub fn new(socket_type: SocketType) -> XRespondent {
        XRespondent {
            socket_type,
            fq: Fq::new(false),
            outpipes: HashMap::new(),
            peers: HashMap::new(),
            prefetched: 0,
            prefetched_id: Vec::new(),
            prefetched_msg: None,
            more_in: false,
            current_out: None,
            more_out: false,
            next_peer_id: rand::random(),
        }
    }

    pub fn rollback(&mut self, pipes: &mut PipeMap) {
        if let Some(oid) = self.current_out.take() {
            if let Some(pipe) = pipes.get_mut(&oid) {
                pipe.rollback();
            }
            self.more_out = false;
        }
    }
}

impl Pattern for XRespondent {
    fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        let peer_id = self.next_peer_id;
        self.next_peer_id = self.next_peer_id.wrapping_add(1);
        let mut identity = vec![0u8; 4];
        BigEndian::write_u32(&mut identity, peer_id);
        if let Some(pipe) = pipes.get_mut(&oid) {
            pipe.set_identity(identity);
        }
        self.outpipes
            .insert(peer_id, RespondentPeer { oid, active: true });
        self.peers.insert(oid, peer_id);
        self.fq.attach(oid);
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.terminated(oid);
        if let Some(peer_id) = self.peers.remove(&oid) {
            self.outpipes.remove(&peer_id);
        }
        if self.current_out == Some(oid) {
            self.current_out = None;
        }
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.activated(oid);
    }

    fn write_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        if let Some(peer_id) = self.peers.get(&oid) {
            if let Some(peer) = self.outpipes.get_mut(peer_id) {
                peer.active = true;
            }
        }
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        if !self.more_out {
            debug_assert!(self.current_out.is_none());
            // The first part must carry the 4-byte peer number the survey
            // arrived with.
            if !msg.has_more() || msg.size() != 4 {
                return Err(SendError::Rejected(Error::InvalidState));
            }
            self.more_out = true;
            let peer_id = BigEndian::read_u32(msg.data());
            if let Some(peer) = self.outpipes.get_mut(&peer_id) {
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
            // The surveyor may be gone; its response evaporates.
            return Ok(());
        }

        self.more_out = msg.has_more();
        if let Some(oid) = self.current_out {
            let ok = pipes
                .get_mut(&oid)
                .map(|pipe| pipe.write(msg).is_ok())
                .unwrap_or(false);
            if !ok || !self.more_out {
                self.current_out = None;
            }
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

        let (msg, oid) = self.fq.recvpipe(pipes)?;
        if self.more_in {
            self.more_in = msg.has_more();
            return Ok(msg);
        }

        // Start of a new survey: prefix it with the peer number.
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
        true
    }
}

/// RESPONDENT: strict receive-then-respond alternation over XRESPONDENT,
/// with the routing prefix and survey id carried behind the scenes.
pub struct Respondent {
    inner: XRespondent,
    responding: bool,
    survey_begins: bool,
}

impl Respondent {
    pub fn new() -> Respondent {
        Respondent {
            inner: XRespondent::new(SocketType::Respondent),
            responding: false,
            survey_begins: true,
        }
    }
}

impl Pattern for Respondent {
    fn socket_type(&self) -> SocketType {
        SocketType::Respondent
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
        if !self.responding {
            return Err(SendError::Rejected(Error::InvalidState));
        }
        let final_part = !msg.has_more();
        self.inner.send(pipes, msg)?;
        if final_part {
            self.responding = false;
            self.survey_begins = true;
        }
        Ok(())
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        if self.responding {
            return Err(Error::InvalidState);
        }
        if self.survey_begins {
            // Route the peer number and survey id straight back into the
            // response path; the application only ever sees the body.
            loop {
                let peer = self.inner.recv(pipes)?;
                if !peer.has_more() {
                    // Survey with no body; nothing to respond to.
                    continue;
                }
                let _ = self.inner.send(pipes, peer);
                let id = self.inner.recv(pipes)?;
                if !id.has_more() || id.size() != 4 {
                    // Malformed survey: unwind the prefix and drop the rest.
                    self.inner.rollback(pipes);
                    let mut tail = id;
                    while tail.has_more() {
                        tail = self.inner.recv(pipes)?;
                    }
                    continue;
                }
                let _ = self.inner.send(pipes, id);
                break;
            }
            self.survey_begins = false;
        }
        let msg = self.inner.recv(pipes)?;
        if !msg.has_more() {
            self.responding = true;
            self.survey_begins = true;
        }
        Ok(msg)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        !self.responding && self.inner.has_in(pipes)
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        self.responding && self.inner.has_out(pipes)
    }
}
