// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Ownership-tree bookkeeping embedded by every long-lived object (socket,
//! session, listener, connecter). Parents own children; children hold a
//! non-owning address of the parent; all tree mutation happens through
//! commands processed on the owning thread.

use std::collections::HashMap;
use std::time::Duration;

use crate::command::{Address, CommandKind};
use crate::global::ObjectId;

pub struct Own {
    parent: Option<Address>,
    children: HashMap<ObjectId, Address>,
    /// Set once the terminate command has been processed.
    terminating: bool,
    /// Acknowledgements still outstanding before this node may die:
    /// one per child plus whatever the composite registered on top
    /// (sockets add one per attached pipe).
    term_acks: u32,
}

impl Own {
    pub fn root() -> Own {
        Own {
            parent: None,
            children: HashMap::new(),
            terminating: false,
            term_acks: 0,
        }
    }

    pub fn child_of(parent: Address) -> Own {
        Own {
            parent: Some(parent),
            children: HashMap::new(),
            terminating: false,
            term_acks: 0,
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    /// Records a child this node now owns. The caller is responsible for
    /// plugging the child object into its thread.
    pub fn launch_child(&mut self, child: Address) {
        self.children.insert(child.oid, child);
    }

    /// Asks the parent to tear this subtree down.
    pub fn request_termination(&self, self_oid: ObjectId) {
        if let Some(ref parent) = self.parent {
            parent.send(CommandKind::TermReq { child: self_oid });
        }
    }

    /// A child asked to be torn down: untrack it, order the termination and
    /// expect one more ack.
    pub fn process_term_req(&mut self, child: ObjectId, linger: Option<Duration>) {
        if self.terminating {
            // The subtree is going down anyway; the child will get its term
            // command through the regular fan-out.
            return;
        }
        if let Some(addr) = self.children.remove(&child) {
            self.register_term_acks(1);
            addr.send(CommandKind::Term { linger });
        }
    }

    /// Propagates termination to every child and starts counting acks.
    /// Returns whether the node is already free to die.
    pub fn process_term(&mut self, linger: Option<Duration>) -> bool {
        debug_assert!(!self.terminating);
        self.terminating = true;
        self.term_acks += self.children.len() as u32;
        for (_, child) in self.children.drain() {
            child.send(CommandKind::Term { linger });
        }
        self.is_done()
    }

    /// A child (or a pipe standing in for one) finished dying.
    /// Returns whether the node is now free to die.
    pub fn process_term_ack(&mut self, child: ObjectId) -> bool {
        self.children.remove(&child);
        self.unregister_term_ack()
    }

    /// Composite nodes add extra acks for resources that must drain before
    /// death, e.g. one per attached pipe.
    pub fn register_term_acks(&mut self, count: u32) {
        self.term_acks += count;
    }

    pub fn unregister_term_ack(&mut self) -> bool {
        debug_assert!(self.term_acks > 0);
        self.term_acks -= 1;
        self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.terminating && self.term_acks == 0
    }

    /// Final duty of a dying node: report up the tree.
    pub fn send_term_ack(&self, self_oid: ObjectId) {
        if let Some(ref parent) = self.parent {
            parent.send(CommandKind::TermAck { child: self_oid });
        }
    }
}
