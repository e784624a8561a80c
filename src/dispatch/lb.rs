// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Load balancing: outbound messages rotate over the writable pipes, and
//! once a pipe accepts the first part of a multipart message it receives
//! every remaining part.

use crate::dispatch::PipeList;
use crate::global::ObjectId;
use crate::msg::Message;
use crate::protocol::PipeMap;

pub struct Lb {
    pipes: PipeList,
    /// Pipes in `[0, active)` accept writes; the rest are blocked.
    active: usize,
    current: usize,
    /// Mid-multipart: subsequent parts stick to `current`.
    more: bool,
    /// The pipe carrying the current multipart message died; swallow the
    /// remaining parts.
    dropping: bool,
}

impl Lb {
    pub fn new() -> Lb {
        Lb {
            pipes: PipeList::new(),
            active: 0,
            current: 0,
            more: false,
            dropping: false,
        }
    }

    pub fn attach(&mut self, oid: ObjectId) {
        self.pipes.push(oid);
        self.pipes.swap(self.active, self.pipes.len() - 1);
        self.active += 1;
    }

    pub fn terminated(&mut self, oid: ObjectId) {
        if let Some(position) = self.pipes.position(oid) {
            if position == self.current && self.more {
                self.dropping = true;
            }
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

    /// Routes one part; `Err` returns the message for a later retry.
    pub fn sendpipe(
        &mut self,
        pipes: &mut PipeMap,
        msg: Message,
    ) -> std::result::Result<Option<ObjectId>, Message> {
        if self.dropping {
            self.more = msg.has_more();
            self.dropping = self.more;
            return Ok(None);
        }

        let mut msg = msg;
        let part_has_more = msg.has_more();
        loop {
            if self.active == 0 {
                return Err(msg);
            }
            let oid = self.pipes.at(self.current);
            match pipes.get_mut(&oid) {
                Some(pipe) => match pipe.write(msg) {
                    Ok(()) => {
                        self.more = part_has_more;
                        if !self.more {
                            self.current = (self.current + 1) % self.active;
                        }
                        return Ok(Some(oid));
                    }
                    Err(back) => {
                        debug_assert!(!self.more);
                        msg = back;
                        self.active -= 1;
                        self.pipes.swap(self.current, self.active);
                        if self.current == self.active {
                            self.current = 0;
                        }
                    }
                },
                None => return Err(msg),
            }
        }
    }
}
