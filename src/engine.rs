// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The stream engine: frames messages over a connected byte stream and
//! pumps them between the wire and its session's pipe. The session sees it
//! only through the `Engine` trait, so other transports can plug into the
//! same seam.
//!
//! Wire format: an 8-byte greeting `[0, 'S', 'P', 0, pattern-id:u16, 0, 0]`
//! checked against the expected peer pattern, then length-prefixed frames:
//! payload length as a big-endian u64, one flags byte (bit 0 = more),
//! payload bytes.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, error};
use mio::Interest;

use crate::global::ObjectId;
use crate::io_thread::EventLoop;
use crate::msg::Message;
use crate::transport::StreamSock;

/// Limit on a single incoming frame, to bound a malformed peer.
const MAX_FRAME_SIZE: u64 = 1 << 31;

/// Encoder output is batched up to roughly this size before writing.
const OUT_BATCH_SIZE: usize = 8192;

const GREETING_SIZE: usize = 8;
const FRAME_PREFIX_SIZE: usize = 9;

const WIRE_FLAG_MORE: u8 = 1;

/// What an engine needs from its session.
pub trait EngineSink {
    /// Hands a decoded message to the session. On back-pressure the message
    /// comes back and the engine must stall its input.
    fn push_msg(&mut self, msg: Message) -> std::result::Result<(), Message>;
    /// Publishes pushed messages to the socket.
    fn flush_msgs(&mut self);
    /// Fetches the next outbound message, if any.
    fn pull_msg(&mut self) -> Option<Message>;
    /// Reports a fatal transport failure; the session will detach.
    fn engine_error(&mut self);
}

/// A transport codec attached to a session. All calls happen on the
/// session's I/O thread.
pub trait Engine: Send {
    fn plug(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink, oid: ObjectId);
    fn unplug(&mut self, el: &mut EventLoop);
    fn in_event(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink);
    fn out_event(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink);
    /// The session's pipe has room again; resume pushing input.
    fn activate_in(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink);
    /// The session's pipe has messages again; resume writing output.
    fn activate_out(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink);
}

enum DecodeStep {
    Prefix { buf: [u8; FRAME_PREFIX_SIZE], got: usize },
    Payload { msg: Message, got: usize },
}

pub struct StreamEngine {
    stream: StreamSock,
    oid: ObjectId,
    pids: (u16, u16),
    greet_in: [u8; GREETING_SIZE],
    greet_in_got: usize,
    decode: DecodeStep,
    /// Decoded but refused by the pipe; retried on activate-in.
    pending_in: Option<Message>,
    encode_buf: Vec<u8>,
    encode_pos: usize,
    want_read: bool,
    want_write: bool,
    registered: Option<Interest>,
}

impl StreamEngine {
    pub fn new(stream: StreamSock, pids: (u16, u16)) -> StreamEngine {
        StreamEngine {
            stream,
            oid: ObjectId(0),
            pids,
            greet_in: [0; GREETING_SIZE],
            greet_in_got: 0,
            decode: DecodeStep::Prefix {
                buf: [0; FRAME_PREFIX_SIZE],
                got: 0,
            },
            pending_in: None,
            encode_buf: Vec::new(),
            encode_pos: 0,
            want_read: true,
            want_write: true,
            registered: None,
        }
    }

    fn greeting(pattern_id: u16) -> [u8; GREETING_SIZE] {
        let mut greeting = [0, 83, 80, 0, 0, 0, 0, 0];
        BigEndian::write_u16(&mut greeting[4..6], pattern_id);
        greeting
    }

    fn update_interests(&mut self, el: &mut EventLoop) {
        let wanted = match (self.want_read, self.want_write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };
        if wanted == self.registered {
            return;
        }
        match (self.registered, wanted) {
            (None, Some(interest)) => {
                if el.register(&mut self.stream, self.oid, interest).is_ok() {
                    self.registered = Some(interest);
                }
            }
            (Some(_), Some(interest)) => {
                if el.reregister(&mut self.stream, self.oid, interest).is_ok() {
                    self.registered = Some(interest);
                }
            }
            (Some(_), None) => {
                el.deregister(&mut self.stream);
                self.registered = None;
            }
            (None, None) => {}
        }
    }

    fn encode_frame(buf: &mut Vec<u8>, msg: &Message) {
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        BigEndian::write_u64(&mut prefix[..8], msg.size() as u64);
        if msg.has_more() {
            prefix[8] |= WIRE_FLAG_MORE;
        }
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(msg.data());
    }

    fn fill_encode_buf(&mut self, sink: &mut dyn EngineSink) {
        self.encode_buf.clear();
        self.encode_pos = 0;
        while self.encode_buf.len() < OUT_BATCH_SIZE {
            match sink.pull_msg() {
                Some(msg) => StreamEngine::encode_frame(&mut self.encode_buf, &msg),
                None => break,
            }
        }
    }

    fn read_handshake(&mut self, sink: &mut dyn EngineSink) -> bool {
        while self.greet_in_got < GREETING_SIZE {
            match self.stream.read(&mut self.greet_in[self.greet_in_got..]) {
                Ok(0) => {
                    sink.engine_error();
                    return false;
                }
                Ok(n) => self.greet_in_got += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    sink.engine_error();
                    return false;
                }
            }
        }
        let expected = StreamEngine::greeting(self.pids.1);
        if self.greet_in != expected {
            error!(
                "[{:?}] expected handshake '{:?}' but received '{:?}'",
                self.oid, expected, self.greet_in
            );
            sink.engine_error();
            return false;
        }
        debug!("[{:?}] handshake received", self.oid);
        true
    }
}

impl Engine for StreamEngine {
    fn plug(&mut self, el: &mut EventLoop, _sink: &mut dyn EngineSink, oid: ObjectId) {
        self.oid = oid;
        self.encode_buf = StreamEngine::greeting(self.pids.0).to_vec();
        self.encode_pos = 0;
        self.want_read = true;
        self.want_write = true;
        self.update_interests(el);
    }

    fn unplug(&mut self, el: &mut EventLoop) {
        if self.registered.is_some() {
            el.deregister(&mut self.stream);
            self.registered = None;
        }
    }

    fn in_event(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink) {
        if self.greet_in_got < GREETING_SIZE {
            if !self.read_handshake(sink) {
                return;
            }
        }
        if self.pending_in.is_some() {
            return;
        }
        loop {
            match self.decode {
                DecodeStep::Prefix { ref mut buf, ref mut got } => {
                    match self.stream.read(&mut buf[*got..]) {
                        Ok(0) => {
                            sink.engine_error();
                            return;
                        }
                        Ok(n) => *got += n,
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => {
                            sink.engine_error();
                            return;
                        }
                    }
                    if *got < FRAME_PREFIX_SIZE {
                        continue;
                    }
                    let size = BigEndian::read_u64(&buf[..8]);
                    if size > MAX_FRAME_SIZE {
                        error!("[{:?}] oversized frame of {} bytes", self.oid, size);
                        sink.engine_error();
                        return;
                    }
                    let mut msg = Message::with_size(size as usize);
                    if buf[8] & WIRE_FLAG_MORE != 0 {
                        msg.set_more();
                    }
                    self.decode = DecodeStep::Payload { msg, got: 0 };
                }
                DecodeStep::Payload { ref mut msg, ref mut got } => {
                    if *got < msg.size() {
                        match self.stream.read(&mut msg.data_mut()[*got..]) {
                            Ok(0) => {
                                sink.engine_error();
                                return;
                            }
                            Ok(n) => *got += n,
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(_) => {
                                sink.engine_error();
                                return;
                            }
                        }
                    }
                    if let DecodeStep::Payload { ref msg, got } = self.decode {
                        if got < msg.size() {
                            continue;
                        }
                    }
                    let complete = std::mem::replace(
                        &mut self.decode,
                        DecodeStep::Prefix {
                            buf: [0; FRAME_PREFIX_SIZE],
                            got: 0,
                        },
                    );
                    let msg = match complete {
                        DecodeStep::Payload { msg, .. } => msg,
                        DecodeStep::Prefix { .. } => unreachable!(),
                    };
                    if let Err(refused) = sink.push_msg(msg) {
                        // Pipe over its watermark: park the message and stop
                        // reading until the socket catches up.
                        self.pending_in = Some(refused);
                        self.want_read = false;
                        self.update_interests(el);
                        break;
                    }
                }
            }
        }
        sink.flush_msgs();
    }

    fn out_event(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink) {
        loop {
            if self.encode_pos == self.encode_buf.len() {
                self.fill_encode_buf(sink);
                if self.encode_buf.is_empty() {
                    // Nothing to send; sleep until the session re-activates.
                    self.want_write = false;
                    self.update_interests(el);
                    return;
                }
            }
            match self.stream.write(&self.encode_buf[self.encode_pos..]) {
                Ok(0) => {
                    sink.engine_error();
                    return;
                }
                Ok(n) => self.encode_pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.want_write = true;
                    self.update_interests(el);
                    return;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    sink.engine_error();
                    return;
                }
            }
        }
    }

    fn activate_in(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink) {
        if let Some(msg) = self.pending_in.take() {
            if let Err(refused) = sink.push_msg(msg) {
                self.pending_in = Some(refused);
                return;
            }
            sink.flush_msgs();
        }
        if !self.want_read {
            self.want_read = true;
            self.update_interests(el);
        }
        self.in_event(el, sink);
    }

    fn activate_out(&mut self, el: &mut EventLoop, sink: &mut dyn EngineSink) {
        if !self.want_write {
            self.want_write = true;
            self.update_interests(el);
            self.out_event(el, sink);
        }
    }
}
