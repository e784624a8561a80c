// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Pipeline pattern: push distributes over downstream nodes, pull fair
//! queues from upstream ones.

use crate::error::Result;
use crate::global::{ObjectId, SocketType};
use crate::msg::Message;
use crate::dispatch::fq::Fq;
use crate::dispatch::lb::Lb;
use crate::protocol::{Pattern, PipeMap, SendError};

pub struct Push {
    lb: Lb,
}

impl Push {
    pub fn new() -> Push {
        Push { lb: Lb::new() }
    }
}

impl Pattern for Push {
    fn socket_type(&self) -> SocketType {
        SocketType::Push
    }

    fn attach(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.lb.attach(oid);
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.lb.terminated(oid);
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, _oid: ObjectId) {}

    fn write_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.lb.activated(oid);
    }

    fn send(&mut self, pipes: &mut PipeMap, msg: Message) -> std::result::Result<(), SendError> {
        self.lb
            .sendpipe(pipes, msg)
            .map(|_| ())
            .map_err(SendError::Again)
    }

    fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
        has_writable(pipes)
    }
}

fn has_writable(pipes: &mut PipeMap) -> bool {
    pipes.values_mut().any(|pipe| pipe.check_write())
}

pub struct Pull {
    fq: Fq,
}

impl Pull {
    pub fn new() -> Pull {
        Pull { fq: Fq::new(false) }
    }
}

impl Pattern for Pull {
    fn socket_type(&self) -> SocketType {
        SocketType::Pull
    }

    fn attach(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.attach(oid);
    }

    fn terminated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.terminated(oid);
    }

    fn read_activated(&mut self, _pipes: &mut PipeMap, oid: ObjectId) {
        self.fq.activated(oid);
    }

    fn write_activated(&mut self, _pipes: &mut PipeMap, _oid: ObjectId) {}

    fn recv(&mut self, pipes: &mut PipeMap) -> Result<Message> {
        self.fq.recvpipe(pipes).map(|(msg, _)| msg)
    }

    fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        self.fq.has_in(pipes)
    }
}
