// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The reaper thread adopts closed sockets so the application thread never
//! blocks on shutdown: it keeps draining each adopted socket's mailbox
//! until the socket's termination handshakes complete, then frees the slot
//! and, once the terminating context holds no more sockets, releases
//! `term`.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::command::{Command, CommandKind};
use crate::ctx::Ctx;
use crate::global::ObjectId;
use crate::mailbox::Mailbox;
use crate::socket_impl::SocketCore;

const MAILBOX_TOKEN: Token = Token(0);

pub struct Reaper {
    mailbox: Mailbox,
    poll: Poll,
    sockets: HashMap<u32, Box<SocketCore>>,
    ctx: Arc<Ctx>,
    terminating: bool,
}

impl Reaper {
    pub fn spawn(mailbox: Mailbox, ctx: Arc<Ctx>) -> io::Result<JoinHandle<()>> {
        let mut reaper = Reaper {
            mailbox,
            poll: Poll::new()?,
            sockets: HashMap::new(),
            ctx,
            terminating: false,
        };
        thread::Builder::new()
            .name("crossio-reaper".into())
            .spawn(move || reaper.run())
    }

    fn run(&mut self) {
        let fd = self.mailbox.fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), MAILBOX_TOKEN, Interest::READABLE)
            .expect("failed to register the reaper mailbox");

        let mut events = Events::with_capacity(64);
        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                panic!("reaper poll failed: {}", e);
            }
            for event in events.iter() {
                if event.token() == MAILBOX_TOKEN {
                    if self.drain_mailbox() {
                        debug!("reaper done");
                        self.ctx.term_sender().send(Command {
                            dest: ObjectId(0),
                            kind: CommandKind::Done,
                        });
                        return;
                    }
                } else {
                    let slot = event.token().0 as u32;
                    if let Some(socket) = self.sockets.get_mut(&slot) {
                        socket.reaper_poll();
                    }
                }
            }
        }
    }

    /// Returns true once the context is terminating and nothing is left
    /// to reap.
    fn drain_mailbox(&mut self) -> bool {
        while let Some(cmd) = self.mailbox.recv(Some(Duration::ZERO)) {
            match cmd.kind {
                CommandKind::Stop => {
                    self.terminating = true;
                }
                CommandKind::Reap { socket } => self.adopt(socket),
                CommandKind::Reaped { slot } => self.bury(slot),
                other => {
                    debug!("reaper ignoring command {}", other.name());
                }
            }
        }
        self.terminating && self.sockets.is_empty()
    }

    fn adopt(&mut self, socket: Box<SocketCore>) {
        let slot = socket.slot();
        let fd = socket.mailbox_fd();
        debug!("reaper adopting socket in slot {}", slot);
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(slot as usize), Interest::READABLE)
            .expect("failed to register a reaped socket");
        self.sockets.insert(slot, socket);
        self.sockets
            .get_mut(&slot)
            .expect("socket just inserted")
            .start_reaping();
    }

    fn bury(&mut self, slot: u32) {
        if let Some(socket) = self.sockets.remove(&slot) {
            let fd = socket.mailbox_fd();
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
            drop(socket);
            self.ctx.destroy_socket(slot);
        }
    }
}
