// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The messaging patterns. Each socket type plugs one `Pattern`
//! implementation over the shared pipe table; the socket core routes pipe
//! lifecycle events into it and delegates send/recv semantics to it.

pub mod pair;
pub mod pipeline;
pub mod pubsub;
pub mod reqrep;
pub mod survey;

use std::collections::HashMap;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType};
use crate::msg::Message;
use crate::options::SocketOption;
use crate::pipe::Pipe;

/// The socket core owns the pipes; patterns address them by id.
pub type PipeMap = HashMap<ObjectId, Pipe>;

/// Why a send did not complete.
pub enum SendError {
    /// Back-pressure; the message is handed back for a retry.
    Again(Message),
    /// The pattern refuses the operation outright.
    Rejected(Error),
}

pub trait Pattern: Send {
    fn socket_type(&self) -> SocketType;

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId);
    fn terminated(&mut self, pipes: &mut PipeMap, oid: ObjectId);
    fn read_activated(&mut self, pipes: &mut PipeMap, oid: ObjectId);
    fn write_activated(&mut self, pipes: &mut PipeMap, oid: ObjectId);

    fn hiccuped(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        let _ = (pipes, oid);
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        let _ = pipes;
        let _ = msg;
        Err(SendError::Rejected(Error::NotSupported))
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        let _ = pipes;
        Err(Error::NotSupported)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        let _ = pipes;
        false
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        let _ = pipes;
        false
    }

    /// First shot at an option; `Ok(false)` passes it to the generic
    /// option table.
    fn set_option(&mut self, pipes: &mut PipeMap, option: &SocketOption) -> Result<bool> {
        let _ = (pipes, option);
        Ok(false)
    }

    /// Patterns with their own receive deadline (surveys) bound the
    /// blocking receive loop through this hint.
    fn recv_deadline(&self) -> Option<Instant> {
        None
    }
}

pub fn create(socket_type: SocketType) -> Box<dyn Pattern> {
    match socket_type {
        SocketType::Pair => Box::new(pair::Pair::new()),
        SocketType::Pub => Box::new(pubsub::XPub::new(SocketType::Pub)),
        SocketType::XPub => Box::new(pubsub::XPub::new(SocketType::XPub)),
        SocketType::Sub => Box::new(pubsub::XSub::new(SocketType::Sub)),
        SocketType::XSub => Box::new(pubsub::XSub::new(SocketType::XSub)),
        SocketType::Push => Box::new(pipeline::Push::new()),
        SocketType::Pull => Box::new(pipeline::Pull::new()),
        SocketType::Req => Box::new(reqrep::Req::new()),
        SocketType::Rep => Box::new(reqrep::Rep::new()),
        SocketType::Dealer => Box::new(reqrep::Dealer::new()),
        SocketType::Router => Box::new(reqrep::Router::new(SocketType::Router)),
        SocketType::Surveyor => Box::new(survey::Surveyor::new()),
        SocketType::XSurveyor => Box::new(survey::XSurveyor::new(SocketType::XSurveyor)),
        SocketType::Respondent => Box::new(survey::Respondent::new()),
        SocketType::XRespondent => Box::new(survey::XRespondent::new(SocketType::XRespondent)),
    }
}
