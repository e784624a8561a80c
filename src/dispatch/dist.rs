// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Fan-out distribution over three nested partitions of the pipe list:
//! `matching` ⊆ `active` ⊆ `eligible`. Publishing to the matching subset
//! is a prefix write; refusals demote a pipe through all three partitions;
//! pipes attached mid-multipart park in `eligible` until the message
//! boundary so they never observe a torn logical message.

use crate::dispatch::PipeList;
use crate::global::ObjectId;
use crate::msg::Message;
use crate::protocol::PipeMap;

pub struct Dist {
    pipes: PipeList,
    matching: usize,
    active: usize,
    eligible: usize,
    /// A multipart message is in flight.
    more: bool,
}

impl Dist {
    pub fn new() -> Dist {
        Dist {
            pipes: PipeList::new(),
            matching: 0,
            active: 0,
            eligible: 0,
            more: false,
        }
    }

    pub fn attach(&mut self, oid: ObjectId) {
        self.pipes.push(oid);
        if self.more {
            // Joins the active set at the next message boundary.
            self.pipes.swap(self.eligible, self.pipes.len() - 1);
            self.eligible += 1;
        } else {
            self.pipes.swap(self.active, self.pipes.len() - 1);
            self.active += 1;
            self.eligible += 1;
        }
    }

    /// Marks a pipe as receiving the message being sent.
    pub fn match_pipe(&mut self, oid: ObjectId) {
        let position = match self.pipes.position(oid) {
            Some(position) => position,
            None => return,
        };
        if position < self.matching || position >= self.eligible {
            return;
        }
        self.pipes.swap(position, self.matching);
        self.matching += 1;
    }

    pub fn unmatch(&mut self) {
        self.matching = 0;
    }

    pub fn terminated(&mut self, oid: ObjectId) {
        let mut position = match self.pipes.position(oid) {
            Some(position) => position,
            None => return,
        };
        if position < self.matching {
            self.pipes.swap(position, self.matching - 1);
            self.matching -= 1;
            position = self.matching;
        }
        if position < self.active {
            self.pipes.swap(position, self.active - 1);
            self.active -= 1;
            position = self.active;
        }
        if position < self.eligible {
            self.pipes.swap(position, self.eligible - 1);
            self.eligible -= 1;
        }
        self.pipes.remove(oid);
    }

    pub fn activated(&mut self, oid: ObjectId) {
        let position = match self.pipes.position(oid) {
            Some(position) => position,
            None => return,
        };
        if position < self.eligible {
            return;
        }
        self.pipes.swap(position, self.eligible);
        self.eligible += 1;
        if !self.more {
            self.pipes.swap(self.eligible - 1, self.active);
            self.active += 1;
        }
    }

    pub fn send_to_all(&mut self, pipes: &mut PipeMap, msg: Message) {
        self.matching = self.active;
        self.send_to_matching(pipes, msg);
    }

    pub fn send_to_matching(&mut self, pipes: &mut PipeMap, msg: Message) {
        let msg_more = msg.has_more();
        self.distribute(pipes, msg);
        // Once the whole message is out, eligible pipes rejoin the active
        // set.
        if !msg_more {
            self.active = self.eligible;
        }
        self.more = msg_more;
    }

    fn distribute(&mut self, pipes: &mut PipeMap, msg: Message) {
        // No matching subscribers: the message is dropped.
        if self.matching == 0 {
            return;
        }
        let mut msg = msg;
        let mut i = 0;
        while i < self.matching {
            let oid = self.pipes.at(i);
            // One shared reference per recipient; a refused write hands
            // the reference back and it is released on the spot.
            let part = msg.copy();
            let accepted = match pipes.get_mut(&oid) {
                Some(pipe) => pipe.write(part).is_ok(),
                None => false,
            };
            if accepted {
                i += 1;
            } else {
                self.write_failed(oid);
                // The pipe that swapped into slot i is examined next.
            }
        }
    }

    /// Demotes a pipe that refused a write out of matching, active and
    /// eligible; it returns through `activated`.
    fn write_failed(&mut self, oid: ObjectId) {
        if let Some(position) = self.pipes.position(oid) {
            self.pipes.swap(position, self.matching - 1);
            self.matching -= 1;
        }
        if let Some(position) = self.pipes.position(oid) {
            self.pipes.swap(position, self.active - 1);
            self.active -= 1;
        }
        self.pipes.swap(self.active, self.eligible - 1);
        self.eligible -= 1;
    }

    pub fn has_out(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::Dist;
    use crate::command::Address;
    use crate::global::ObjectId;
    use crate::mailbox::{mailbox, Mailbox};
    use crate::msg::Message;
    use crate::pipe::{pipepair, Pipe};
    use crate::protocol::PipeMap;

    fn fanout_fixture(n: u32, hwm: u32) -> (PipeMap, Vec<(Pipe, Mailbox)>, Mailbox) {
        let (owner_tx, owner_rx) = mailbox().unwrap();
        let mut map = PipeMap::new();
        let mut remotes = Vec::new();
        for i in 0..n {
            let (remote_tx, remote_rx) = mailbox().unwrap();
            let (local, remote) = pipepair(
                Address::new(owner_tx.clone(), ObjectId(i * 2)),
                Address::new(remote_tx, ObjectId(i * 2 + 1)),
                (hwm, hwm),
                (true, true),
            );
            map.insert(local.oid(), local);
            remotes.push((remote, remote_rx));
        }
        (map, remotes, owner_rx)
    }

    #[test]
    fn delivers_one_reference_per_recipient() {
        let (mut map, mut remotes, _rx) = fanout_fixture(3, 10);
        let mut dist = Dist::new();
        let oids: Vec<ObjectId> = map.keys().copied().collect();
        for oid in oids {
            dist.attach(oid);
        }

        let mut msg = Message::from_slice(&[9u8; 64]);
        dist.send_to_all(&mut map, msg.copy());
        // One reference went to each pipe; only our probe remains here.
        for (remote, _) in remotes.iter_mut() {
            let got = remote.read().expect("fan-out lost a recipient");
            assert_eq!(&[9u8; 64][..], got.data());
        }
        drop(map);
        drop(remotes);
        assert!(msg.is_shared());
    }

    #[test]
    fn refusing_pipe_is_skipped_without_leaking() {
        let (mut map, mut remotes, _rx) = fanout_fixture(2, 1);
        let mut dist = Dist::new();
        let oids: Vec<ObjectId> = map.keys().copied().collect();
        for oid in &oids {
            dist.attach(*oid);
        }

        // First fan-out fills every pipe to its watermark of 1.
        dist.send_to_all(&mut map, Message::from_slice(b"first"));
        // Second fan-out finds them all full and drops every reference.
        dist.send_to_all(&mut map, Message::from_slice(b"second"));

        for (remote, _) in remotes.iter_mut() {
            assert_eq!(b"first", remote.read().unwrap().data());
            assert!(remote.read().is_none());
        }
    }
}
