// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Exclusive pair: both directions bound to a single peer pipe. Extra
//! peers are turned away at attach time.

use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType};
use crate::msg::Message;
use crate::protocol::{Pattern, PipeMap, SendError};

pub struct Pair {
    pipe: Option<ObjectId>,
}

impl Pair {
    pub fn new() -> Pair {
        Pair { pipe: None }
    }
}

impl Pattern for Pair {
    fn socket_type(&self) -> SocketType {
        SocketType::Pair
    }

    fn attach(&mut self, pipes: &mut PipeMap, oid: ObjectId) {
        if self.pipe.is_none() {
            self.pipe = Some(oid);
        } else if let Some(pipe) = pipes.get_mut(&oid) {
            // One peer at a time.
            pipe.terminate(false);
        }
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        if self.pipe == Some(oid) {
            self.pipe = None;
        }
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, _oid: ObjectId) {}

    fn write_activated(&mut self, _pipes: &mut PipeMap, _oid: ObjectId) {}

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        let pipe = self.pipe.and_then(|oid| pipes.get_mut(&oid));
        match pipe {
            Some(pipe) => pipe.write(msg).map_err(SendError::Again),
            None => Err(SendError::Again(msg)),
        }
    }

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        self.pipe
            .and_then(|oid| pipes.get_mut(&oid))
            .and_then(|pipe| pipe.read())
            .ok_or(Error::WouldBlock)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        self.pipe
            .and_then(|oid| pipes.get_mut(&oid))
            .map(|pipe| pipe.check_read())
            .unwrap_or(false)
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        self.pipe
            .and_then(|oid| pipes.get_mut(&oid))
            .map(|pipe| pipe.check_write())
            .unwrap_or(false)
    }
}
