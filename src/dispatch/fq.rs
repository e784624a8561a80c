// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Fair queueing: round-robin inbound dispatch over the active pipes,
//! advancing only at logical message boundaries so multipart messages are
//! never interleaved.

use crate::dispatch::PipeList;
use crate::error::{Error, Result};
use crate::global::ObjectId;
use crate::msg::Message;
use crate::protocol::PipeMap;

pub struct Fq {
    pipes: PipeList,
    /// Pipes in `[0, active)` may have messages; the rest are asleep.
    active: usize,
    current: usize,
    /// The last returned part had MORE set; stay on the same pipe.
    more: bool,
    /// Hand identity frames to the caller instead of recording them on
    /// the pipe; router-family patterns rekey on them.
    expose_identity: bool,
}

impl Fq {
    pub fn new(expose_identity: bool) -> Fq {
        Fq {
            pipes: PipeList::new(),
            active: 0,
            current: 0,
            more: false,
            expose_identity,
        }
    }

    pub fn attach(&mut self, oid: ObjectId) {
        self.pipes.push(oid);
        self.pipes.swap(self.active, self.pipes.len() - 1);
        self.active += 1;
    }

    pub fn terminated(&mut self, oid: ObjectId) {
        if let Some(position) = self.pipes.position(oid) {
            if position < self.active {
                self.active -= 1;
                self.pipes.swap(position, self.active);
                if self.current == self.active {
                    self.current = 0;
                }
            }
            self.pipes.remove(oid);
        }
    }

    pub fn activated(&mut self, oid: ObjectId) {
        if let Some(position) = self.pipes.position(oid) {
            if position >= self.active {
                self.pipes.swap(position, self.active);
                self.active += 1;
            }
        }
    }

    /// Pops the next message part and the pipe it came from.
    pub fn recvpipe(&mut self, pipes: &mut PipeMap) -> Result<(Message, ObjectId)> {
        while self.active > 0 {
            let oid = self.pipes.at(self.current);
            let msg = pipes.get_mut(&oid).and_then(|pipe| pipe.read());
            match msg {
                Some(msg) => {
                    if msg.is_identity() && !self.expose_identity {
                        // Out-of-band frame; record it and keep reading
                        // from the same pipe.
                        if let Some(pipe) = pipes.get_mut(&oid) {
                            pipe.set_identity(msg.to_vec());
                        }
                        continue;
                    }
                    self.more = msg.has_more();
                    if !self.more {
                        self.current = (self.current + 1) % self.active;
                    }
                    return Ok((msg, oid));
                }
                None => {
                    // All parts of a logical message are published
                    // atomically, so a dry pipe mid-message is a bug.
                    debug_assert!(!self.more);
                    self.active -= 1;
                    self.pipes.swap(self.current, self.active);
                    if self.current == self.active {
                        self.current = 0;
                    }
                }
            }
        }
        Err(Error::WouldBlock)
    }

    pub fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
        if self.more {
            return true;
        }
        // Skipping dry pipes here does not break fairness: either nothing
        // is readable and current ends up where it started, or it stops at
        // the first pipe with messages.
        while self.active > 0 {
            let oid = self.pipes.at(self.current);
            let readable = pipes
                .get_mut(&oid)
                .map(|pipe| pipe.check_read())
                .unwrap_or(false);
            if readable {
                return true;
            }
            self.active -= 1;
            self.pipes.swap(self.current, self.active);
            if self.current == self.active {
                self.current = 0;
            }
        }
        false
    }
}
