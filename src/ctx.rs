// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The context: top-level holder of the I/O threads, the reaper, the
//! in-process endpoint registry and the socket slot table. Terminating it
//! interrupts every blocked call and waits until each owned object has
//! acknowledged teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::debug;

use crate::command::{Address, Command, CommandKind};
use crate::error::{Error, Result};
use crate::global::{ObjectId, SocketType, MAX_SOCKETS};
use crate::io_thread::IoThread;
use crate::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::options::Options;
use crate::reaper::Reaper;
use crate::socket::Socket;

/// An in-process endpoint registered by `bind("inproc://…")`.
#[derive(Clone)]
pub(crate) struct InprocEndpoint {
    /// The binding socket's mailbox address.
    pub socket: Address,
    /// Snapshot of the binder's options at bind time.
    pub options: Options,
    /// Connects handed out but possibly not yet processed by the binder;
    /// the binder may not be destroyed before it drains them.
    pub pending: Arc<AtomicU64>,
}

struct Slots {
    free: Vec<u32>,
    live: HashMap<u32, Address>,
}

pub(crate) struct Ctx {
    oid_seq: AtomicU32,
    terminating: AtomicBool,
    slots: Mutex<Slots>,
    endpoints: Mutex<HashMap<String, InprocEndpoint>>,
    term_tx: MailboxSender,
    term_rx: Mutex<Option<Mailbox>>,
    reaper_tx: MailboxSender,
    io_senders: Vec<MailboxSender>,
    io_loads: Vec<Arc<AtomicUsize>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Ctx {
    pub fn new(io_threads: usize) -> Result<Arc<Ctx>> {
        let (term_tx, term_rx) = mailbox()?;
        let (reaper_tx, reaper_rx) = mailbox()?;

        let mut io_senders = Vec::with_capacity(io_threads);
        let mut io_loads = Vec::with_capacity(io_threads);
        let mut io_mailboxes = Vec::with_capacity(io_threads);
        for _ in 0..io_threads {
            let (tx, rx) = mailbox()?;
            io_senders.push(tx);
            io_loads.push(Arc::new(AtomicUsize::new(0)));
            io_mailboxes.push(rx);
        }

        let ctx = Arc::new(Ctx {
            oid_seq: AtomicU32::new(1),
            terminating: AtomicBool::new(false),
            slots: Mutex::new(Slots {
                free: (1..=MAX_SOCKETS as u32).rev().collect(),
                live: HashMap::new(),
            }),
            endpoints: Mutex::new(HashMap::new()),
            term_tx,
            term_rx: Mutex::new(Some(term_rx)),
            reaper_tx,
            io_senders,
            io_loads,
            handles: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(io_threads + 1);
        handles.push(Reaper::spawn(reaper_rx, Arc::clone(&ctx))?);
        for (index, rx) in io_mailboxes.into_iter().enumerate() {
            handles.push(IoThread::spawn(
                format!("crossio-io-{}", index),
                rx,
                ctx.io_senders[index].clone(),
                Arc::clone(&ctx.io_loads[index]),
            )?);
        }
        *ctx.handles.lock().unwrap() = handles;
        Ok(ctx)
    }

    pub fn next_oid(&self) -> ObjectId {
        ObjectId(self.oid_seq.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    pub fn reaper(&self) -> MailboxSender {
        self.reaper_tx.clone()
    }

    pub fn term_sender(&self) -> MailboxSender {
        self.term_tx.clone()
    }

    /// Least-loaded I/O thread whose affinity bit is set; bit i selects
    /// thread i, zero means any.
    pub fn choose_io_thread(&self, affinity: u64) -> MailboxSender {
        let mut best = 0;
        let mut best_load = usize::MAX;
        for (index, load) in self.io_loads.iter().enumerate() {
            let allowed = affinity == 0 || (index < 64 && affinity & (1u64 << index) != 0);
            if !allowed {
                continue;
            }
            let load = load.load(Ordering::Relaxed);
            if load < best_load {
                best = index;
                best_load = load;
            }
        }
        self.io_senders[best].clone()
    }

    pub fn register_socket(&self, addr: Address) -> Result<u32> {
        let mut slots = self.slots.lock().unwrap();
        // Under the same lock `term` uses for its stop broadcast, so a
        // socket is either refused here or guaranteed to receive the stop.
        if self.is_terminating() {
            return Err(Error::Terminated);
        }
        let slot = slots.free.pop().ok_or(Error::TooManySockets)?;
        slots.live.insert(slot, addr);
        Ok(slot)
    }

    /// Called from the reaper when a socket finished dying.
    pub fn destroy_socket(&self, slot: u32) {
        let mut slots = self.slots.lock().unwrap();
        slots.live.remove(&slot);
        slots.free.push(slot);
        debug!("socket slot {} released, {} live", slot, slots.live.len());
        if slots.live.is_empty() && self.is_terminating() {
            self.reaper_tx.send(Command {
                dest: ObjectId(0),
                kind: CommandKind::Stop,
            });
        }
    }

    pub fn register_endpoint(&self, name: String, endpoint: InprocEndpoint) -> Result<()> {
        let mut endpoints = self.endpoints.lock().unwrap();
        if endpoints.contains_key(&name) {
            return Err(Error::AddrInUse);
        }
        endpoints.insert(name, endpoint);
        Ok(())
    }

    /// Looks up an inproc endpoint, bumping the binder's pending-connect
    /// counter under the registry lock so a racing close cannot lose the
    /// bind command that follows.
    pub fn find_endpoint(&self, name: &str) -> Option<InprocEndpoint> {
        let endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints.get(name)?;
        endpoint.pending.fetch_add(1, Ordering::SeqCst);
        Some(endpoint.clone())
    }

    /// Drops every endpoint registered by the given socket; called when
    /// that socket starts terminating.
    pub fn unregister_endpoints(&self, socket_oid: ObjectId) {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.retain(|_, endpoint| endpoint.socket.oid != socket_oid);
    }

    /// Terminate the context: interrupt every socket, wait until all of
    /// them have been reaped, then stop and join the worker threads.
    pub fn term(&self) -> Result<()> {
        let term_rx = self.term_rx.lock().unwrap().take();
        let mut term_rx = match term_rx {
            Some(rx) => rx,
            // Already terminated (or termination is running elsewhere).
            None => return Ok(()),
        };

        self.terminating.store(true, Ordering::SeqCst);
        {
            let slots = self.slots.lock().unwrap();
            for addr in slots.live.values() {
                addr.send(CommandKind::Stop);
            }
            if slots.live.is_empty() {
                self.reaper_tx.send(Command {
                    dest: ObjectId(0),
                    kind: CommandKind::Stop,
                });
            }
        }

        // The reaper releases us once the last socket is gone.
        loop {
            match term_rx.recv(None) {
                Some(cmd) if matches!(cmd.kind, CommandKind::Done) => break,
                Some(_) => continue,
                None => unreachable!("term mailbox wait cannot time out"),
            }
        }

        for sender in &self.io_senders {
            sender.send(Command {
                dest: ObjectId(0),
                kind: CommandKind::Stop,
            });
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        debug!("context terminated");
        Ok(())
    }
}

/// Process-wide entry point: create one, derive sockets from it, terminate
/// it when done. Cloning is cheap; the last clone to go away terminates
/// the context implicitly (sockets hold a clone, so that can only happen
/// after every socket is closed).
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextHandle>,
}

struct ContextHandle {
    ctx: Arc<Ctx>,
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        let _ = self.ctx.term();
    }
}

impl Context {
    /// Context with a single I/O thread.
    pub fn new() -> Result<Context> {
        Context::with_io_threads(1)
    }

    pub fn with_io_threads(io_threads: usize) -> Result<Context> {
        if io_threads == 0 {
            return Err(Error::InvalidArgument);
        }
        let ctx = Ctx::new(io_threads)?;
        Ok(Context {
            inner: Arc::new(ContextHandle { ctx }),
        })
    }

    /// Creates a socket of the given pattern type.
    pub fn socket(&self, socket_type: SocketType) -> Result<Socket> {
        Socket::create(self.clone(), socket_type)
    }

    /// Explicit termination. Blocks until every socket created from this
    /// context has been closed and has finished lingering.
    pub fn term(&self) -> Result<()> {
        self.inner.ctx.term()
    }

    pub(crate) fn ctx(&self) -> &Arc<Ctx> {
        &self.inner.ctx
    }
}
