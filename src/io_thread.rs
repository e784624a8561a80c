// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The reactor: one cooperative event loop per I/O thread, driving file
//! descriptors, timers and the thread's own mailbox. Sessions, listeners
//! and connecters live here; they never block and mutate nothing outside
//! their thread except by sending commands.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};
use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::command::CommandKind;
use crate::global::ObjectId;
use crate::mailbox::{Mailbox, MailboxSender};

/// Token 0 is the thread's own mailbox; object ids start at 1.
const MAILBOX_TOKEN: Token = Token(0);

/// Opaque timer handle, usable to cancel the timer before it fires.
pub type TimerId = (Instant, u64);

/// An object resident on an I/O thread, addressed through the thread's
/// mailbox and its registered descriptors.
pub trait IoObject: Send {
    /// Called once, after the object arrived on its thread.
    fn plugged(&mut self, el: &mut EventLoop);
    fn process_command(&mut self, el: &mut EventLoop, kind: CommandKind);
    fn in_event(&mut self, el: &mut EventLoop);
    fn out_event(&mut self, el: &mut EventLoop);
    fn timer_event(&mut self, el: &mut EventLoop, timer: TimerId);
}

enum PendingOp {
    Add(ObjectId, Box<dyn IoObject>),
    Retire(ObjectId),
}

/// Services the resident objects may use while handling an event. Object
/// creation and retirement are deferred until the current dispatch ends.
pub struct EventLoop {
    registry: mio::Registry,
    timers: BTreeMap<TimerId, ObjectId>,
    timer_seq: u64,
    pending: Vec<PendingOp>,
    load: Arc<AtomicUsize>,
    sender: MailboxSender,
}

impl EventLoop {
    /// This thread's mailbox; used to build addresses for objects that are
    /// being created here.
    pub fn sender(&self) -> MailboxSender {
        self.sender.clone()
    }

    pub fn register(
        &mut self,
        source: &mut impl Source,
        oid: ObjectId,
        interests: Interest,
    ) -> io::Result<()> {
        self.registry
            .register(source, Token(oid.0 as usize), interests)?;
        self.load.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn reregister(
        &mut self,
        source: &mut impl Source,
        oid: ObjectId,
        interests: Interest,
    ) -> io::Result<()> {
        self.registry
            .reregister(source, Token(oid.0 as usize), interests)
    }

    pub fn deregister(&mut self, source: &mut impl Source) {
        if self.registry.deregister(source).is_ok() {
            self.load.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn add_timer(&mut self, after: Duration, oid: ObjectId) -> TimerId {
        self.timer_seq += 1;
        let id = (Instant::now() + after, self.timer_seq);
        self.timers.insert(id, oid);
        id
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    /// Adopts a new object once the current dispatch finishes; `plugged`
    /// runs at that point.
    pub fn add_object(&mut self, oid: ObjectId, object: Box<dyn IoObject>) {
        self.pending.push(PendingOp::Add(oid, object));
    }

    /// Removes an object once the current dispatch finishes.
    pub fn retire(&mut self, oid: ObjectId) {
        self.pending.push(PendingOp::Retire(oid));
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.timers
            .keys()
            .next()
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
    }

    fn take_due(&mut self) -> Vec<(TimerId, ObjectId)> {
        let now = Instant::now();
        let mut due = Vec::new();
        loop {
            let next = self
                .timers
                .iter()
                .next()
                .map(|(&id, &oid)| (id, oid));
            match next {
                Some((id, oid)) if id.0 <= now => {
                    self.timers.remove(&id);
                    due.push((id, oid));
                }
                _ => break,
            }
        }
        due
    }
}

pub struct IoThread {
    mailbox: Mailbox,
    poll: Poll,
    objects: HashMap<ObjectId, Box<dyn IoObject>>,
    el: EventLoop,
    name: String,
}

impl IoThread {
    /// Spawns the thread. `load` is shared with the context so new sessions
    /// can be placed on the least busy thread.
    pub fn spawn(
        name: String,
        mailbox: Mailbox,
        sender: MailboxSender,
        load: Arc<AtomicUsize>,
    ) -> io::Result<JoinHandle<()>> {
        let poll = Poll::new()?;
        let el = EventLoop {
            registry: poll.registry().try_clone()?,
            timers: BTreeMap::new(),
            timer_seq: 0,
            pending: Vec::new(),
            load,
            sender,
        };
        let mut io_thread = IoThread {
            mailbox,
            poll,
            objects: HashMap::new(),
            el,
            name: name.clone(),
        };
        thread::Builder::new()
            .name(name)
            .spawn(move || io_thread.run())
    }

    fn run(&mut self) {
        let fd = self.mailbox.fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), MAILBOX_TOKEN, Interest::READABLE)
            .expect("failed to register the io thread mailbox");
        debug!("[{}] reactor running", self.name);

        let mut events = Events::with_capacity(256);
        loop {
            let timeout = self.el.next_timeout();
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                panic!("[{}] poll failed: {}", self.name, e);
            }

            for (id, oid) in self.el.take_due() {
                if let Some(object) = self.objects.get_mut(&oid) {
                    object.timer_event(&mut self.el, id);
                }
            }

            let mut stop = false;
            for event in events.iter() {
                if event.token() == MAILBOX_TOKEN {
                    stop |= self.drain_mailbox();
                    continue;
                }
                let oid = ObjectId(event.token().0 as u32);
                if event.is_writable() {
                    if let Some(object) = self.objects.get_mut(&oid) {
                        object.out_event(&mut self.el);
                    }
                }
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    if let Some(object) = self.objects.get_mut(&oid) {
                        object.in_event(&mut self.el);
                    }
                }
            }

            self.apply_pending();
            if stop {
                debug!("[{}] reactor stopping", self.name);
                return;
            }
        }
    }

    fn drain_mailbox(&mut self) -> bool {
        let mut stop = false;
        while let Some(cmd) = self.mailbox.recv(Some(Duration::ZERO)) {
            trace!("[{}] command {} for [{:?}]", self.name, cmd.kind.name(), cmd.dest);
            match cmd.kind {
                CommandKind::Stop => stop = true,
                CommandKind::Plug { object } => {
                    // Adopt immediately: a command for the object (say, an
                    // engine attach) may already be next in the queue.
                    self.objects.insert(cmd.dest, object);
                    if let Some(object) = self.objects.get_mut(&cmd.dest) {
                        object.plugged(&mut self.el);
                    }
                }
                kind => match self.objects.get_mut(&cmd.dest) {
                    Some(object) => object.process_command(&mut self.el, kind),
                    None => {
                        // The object died while the command was in flight.
                        debug!(
                            "[{}] dropping {} for retired object [{:?}]",
                            self.name,
                            kind.name(),
                            cmd.dest
                        );
                    }
                },
            }
        }
        stop
    }

    fn apply_pending(&mut self) {
        while !self.el.pending.is_empty() {
            let batch: Vec<PendingOp> = self.el.pending.drain(..).collect();
            for op in batch {
                match op {
                    PendingOp::Add(oid, mut object) => {
                        object.plugged(&mut self.el);
                        self.objects.insert(oid, object);
                    }
                    PendingOp::Retire(oid) => {
                        self.objects.remove(&oid);
                        self.el.timers.retain(|_, owner| *owner != oid);
                    }
                }
            }
        }
    }
}
