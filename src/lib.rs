// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Brokerless message transport: typed pattern sockets over in-process,
//! Unix-domain and TCP transports.
//!
//! Create a [`Context`], derive [`Socket`]s of the pattern you need, bind
//! or connect them to `scheme://address` endpoints, then exchange discrete,
//! possibly multipart [`Message`]s:
//!
//! ```no_run
//! use crossio::{Context, SocketType};
//!
//! let ctx = Context::new().unwrap();
//! let mut rep = ctx.socket(SocketType::Rep).unwrap();
//! rep.bind("inproc://service").unwrap();
//! let mut req = ctx.socket(SocketType::Req).unwrap();
//! req.connect("inproc://service").unwrap();
//!
//! req.send(b"ping", 0).unwrap();
//! let request = rep.recv(0).unwrap();
//! rep.send(&request, 0).unwrap();
//! assert_eq!(b"ping".to_vec(), req.recv(0).unwrap());
//! ```
//!
//! Each socket type implements one messaging pattern: exclusive pair,
//! publish/subscribe with upstream topic filtering, request/reply with
//! envelope routing, pipeline push/pull, survey, and the raw router/dealer
//! variants underneath. Cross-thread coordination inside the library is
//! done exclusively by passing commands between per-object mailboxes; the
//! only structure two threads ever touch on the message path is a
//! lock-free single-producer single-consumer queue.

mod command;
mod ctx;
mod device;
mod dispatch;
mod engine;
mod error;
mod global;
mod io_thread;
mod mailbox;
mod msg;
mod options;
mod own;
mod pipe;
mod poll;
mod protocol;
mod reaper;
mod session;
mod signaler;
mod socket;
mod socket_impl;
mod transport;
mod ypipe;

pub use crate::ctx::Context;
pub use crate::device::{device, Device};
pub use crate::error::{Error, Result};
pub use crate::global::{SocketType, DONTWAIT, SNDMORE};
pub use crate::msg::Message;
pub use crate::options::SocketOption;
pub use crate::poll::{poll, PollItem, POLLERR, POLLIN, POLLOUT};
pub use crate::socket::Socket;
