// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! One end of a bidirectional message pipe linking two sockets, or a socket
//! and a session. Built from two Y-pipes; bounded by high/low water marks;
//! torn down through an asynchronous three-phase handshake that lets the
//! peer drain pending messages first.

use log::debug;

use crate::command::{Address, CommandKind};
use crate::global::ObjectId;
use crate::msg::Message;
use crate::ypipe;

fn compute_lwm(hwm: u32) -> u64 {
    if hwm == 0 {
        0
    } else {
        (hwm as u64 + 1) / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    /// The delimiter arrived before the peer's termination request.
    DelimiterReceived,
    /// The peer asked us to terminate; we keep reading up to the delimiter.
    WaitingForDelimiter,
    /// We acknowledged the peer's request and await nothing but deletion.
    TermAckSent,
    /// We asked the peer to terminate and await its acknowledgement.
    TermReqSent1,
    /// Both ends asked in parallel; we acknowledged and still await ours.
    TermReqSent2,
}

/// Reported back to the owner after a pipe command was processed.
#[derive(Debug, PartialEq, Eq)]
pub enum PipeEvent {
    None,
    ReadActivated,
    WriteActivated,
    Hiccuped,
    /// The handshake completed; the owner must drop the pipe now.
    Terminated,
}

pub struct Pipe {
    oid: ObjectId,
    peer: Address,
    inpipe: Option<ypipe::Reader<Message>>,
    outpipe: Option<ypipe::Writer<Message>>,
    /// False while the inbound Y-pipe reports empty; set again by the
    /// peer's activate-read command.
    in_active: bool,
    /// False while the outbound direction is over its high-water mark; set
    /// again by the peer's activate-write command.
    out_active: bool,
    /// Whole messages this end may keep in flight; 0 means unbounded.
    hwm: u32,
    /// Reader-side boundary at which the peer writer is re-activated.
    lwm: u64,
    msgs_read: u64,
    msgs_written: u64,
    peers_msgs_read: u64,
    state: State,
    /// Whether a peer-initiated termination waits for pending reads.
    delay: bool,
    identity: Option<Vec<u8>>,
}

/// Creates both ends of a pipe. `hwms.0` bounds messages flowing out of the
/// first end, `hwms.1` those flowing out of the second. `delays` configure
/// whether each end drains pending inbound messages before acknowledging a
/// peer-initiated termination.
pub fn pipepair(
    a: Address,
    b: Address,
    hwms: (u32, u32),
    delays: (bool, bool),
) -> (Pipe, Pipe) {
    let (to_b, from_a) = ypipe::pair();
    let (to_a, from_b) = ypipe::pair();
    let end_a = Pipe {
        oid: a.oid,
        peer: b.clone(),
        inpipe: Some(from_b),
        outpipe: Some(to_b),
        in_active: true,
        out_active: true,
        hwm: hwms.0,
        lwm: compute_lwm(hwms.1),
        msgs_read: 0,
        msgs_written: 0,
        peers_msgs_read: 0,
        state: State::Active,
        delay: delays.0,
        identity: None,
    };
    let end_b = Pipe {
        oid: b.oid,
        peer: a,
        inpipe: Some(from_a),
        outpipe: Some(to_a),
        in_active: true,
        out_active: true,
        hwm: hwms.1,
        lwm: compute_lwm(hwms.0),
        msgs_read: 0,
        msgs_written: 0,
        peers_msgs_read: 0,
        state: State::Active,
        delay: delays.1,
        identity: None,
    };
    (end_a, end_b)
}

impl Pipe {
    pub fn oid(&self) -> ObjectId {
        self.oid
    }

    pub fn set_identity(&mut self, identity: Vec<u8>) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> &[u8] {
        self.identity.as_deref().unwrap_or(&[])
    }

    fn readable_state(&self) -> bool {
        self.state == State::Active || self.state == State::WaitingForDelimiter
    }

    /// Whether a read would currently yield a message.
    pub fn check_read(&mut self) -> bool {
        if !self.in_active || !self.readable_state() {
            return false;
        }
        let inpipe = match self.inpipe {
            Some(ref mut inpipe) => inpipe,
            None => return false,
        };
        match inpipe.peek() {
            None => {
                self.in_active = false;
                false
            }
            Some(msg) if msg.is_delimiter() => {
                let _ = inpipe.read();
                self.process_delimiter();
                false
            }
            Some(_) => true,
        }
    }

    /// Pops one message. Crossing the low-water-mark boundary re-activates
    /// the peer writer through its mailbox.
    pub fn read(&mut self) -> Option<Message> {
        if !self.in_active || !self.readable_state() {
            return None;
        }
        let msg = match self.inpipe.as_mut().and_then(|p| p.read()) {
            Some(msg) => msg,
            None => {
                self.in_active = false;
                return None;
            }
        };
        if msg.is_delimiter() {
            self.process_delimiter();
            return None;
        }
        if msg.counts_as_whole() {
            self.msgs_read += 1;
            if self.lwm > 0 && self.msgs_read % self.lwm == 0 {
                self.peer.send(CommandKind::ActivateWrite {
                    msgs_read: self.msgs_read,
                });
            }
        }
        Some(msg)
    }

    /// Whether a write would neither overflow the high-water mark nor land
    /// in a terminating pipe.
    pub fn check_write(&mut self) -> bool {
        if !self.out_active || self.state != State::Active {
            return false;
        }
        let full = self.hwm > 0 && self.msgs_written - self.peers_msgs_read >= self.hwm as u64;
        if full {
            self.out_active = false;
            return false;
        }
        true
    }

    /// Buffers a message part. The final part of a logical message is
    /// published to the peer immediately. A refused message is handed
    /// back so the caller can reroute or retry it.
    pub fn write(&mut self, msg: Message) -> std::result::Result<(), Message> {
        if !self.check_write() || self.outpipe.is_none() {
            return Err(msg);
        }
        let whole = msg.counts_as_whole();
        let final_part = !msg.has_more();
        if let Some(ref mut outpipe) = self.outpipe {
            // Middle parts stay private to the writer, so a flush can
            // never publish half a logical message.
            outpipe.write(msg, !final_part);
        }
        if whole {
            self.msgs_written += 1;
        }
        if final_part {
            self.flush();
        }
        Ok(())
    }

    /// Discards the unflushed tail: the incomplete part of a multipart
    /// message being composed.
    pub fn rollback(&mut self) {
        if let Some(ref mut outpipe) = self.outpipe {
            while outpipe.unwrite().is_some() {}
        }
    }

    /// Publishes buffered writes, waking the peer if it fell asleep.
    pub fn flush(&mut self) {
        if self.state == State::TermAckSent {
            return;
        }
        if let Some(ref mut outpipe) = self.outpipe {
            if !outpipe.flush() {
                self.peer.send(CommandKind::ActivateRead);
            }
        }
    }

    /// Reader side of a transport reconnect: installs a fresh inbound
    /// Y-pipe and ships its writer end to the peer, discarding whatever was
    /// in flight.
    pub fn hiccup(&mut self) {
        if self.state != State::Active {
            return;
        }
        let (writer, reader) = ypipe::pair();
        self.inpipe = Some(reader);
        self.in_active = true;
        debug!("[{:?}] pipe hiccup, new inbound queue installed", self.oid);
        self.peer.send(CommandKind::Hiccup { writer });
    }

    pub fn process_activate_read(&mut self) -> PipeEvent {
        if !self.in_active && self.readable_state() {
            self.in_active = true;
            PipeEvent::ReadActivated
        } else {
            PipeEvent::None
        }
    }

    pub fn process_activate_write(&mut self, msgs_read: u64) -> PipeEvent {
        self.peers_msgs_read = msgs_read;
        if !self.out_active && self.state == State::Active {
            self.out_active = true;
            PipeEvent::WriteActivated
        } else {
            PipeEvent::None
        }
    }

    /// Writer side of a reconnect: swap in the fresh outbound queue and
    /// reclaim the abandoned one, uncounting the whole messages it held.
    pub fn process_hiccup(&mut self, mut writer: ypipe::Writer<Message>) -> PipeEvent {
        if let Some(old) = self.outpipe.take() {
            for msg in old.salvage() {
                if msg.counts_as_whole() {
                    self.msgs_written -= 1;
                }
            }
        }
        match self.state {
            State::Active => {
                self.outpipe = Some(writer);
                PipeEvent::Hiccuped
            }
            State::DelimiterReceived | State::WaitingForDelimiter => {
                self.outpipe = Some(writer);
                PipeEvent::None
            }
            State::TermReqSent1 => {
                // A termination already under way had its delimiter in the
                // old queue; the peer still drains towards it, so write it
                // again.
                writer.write(Message::delimiter(), false);
                if !writer.flush() {
                    self.peer.send(CommandKind::ActivateRead);
                }
                self.outpipe = Some(writer);
                PipeEvent::None
            }
            // Outbound flow was already renounced; the fresh queue is
            // never used.
            State::TermAckSent | State::TermReqSent2 => PipeEvent::None,
        }
    }

    fn process_delimiter(&mut self) {
        match self.state {
            State::Active => self.state = State::DelimiterReceived,
            State::WaitingForDelimiter => {
                self.rollback();
                self.outpipe = None;
                self.peer.send(CommandKind::PipeTermAck);
                self.state = State::TermAckSent;
            }
            _ => debug_assert!(false, "delimiter in state {:?}", self.state),
        }
    }

    /// Phase-2 handler: the peer asked this end to shut down.
    pub fn process_pipe_term(&mut self) -> PipeEvent {
        match self.state {
            State::Active => {
                if self.delay {
                    // Keep delivering pending inbound messages; the ack goes
                    // out once the delimiter comes around.
                    self.state = State::WaitingForDelimiter;
                } else {
                    self.state = State::TermAckSent;
                    self.outpipe = None;
                    self.peer.send(CommandKind::PipeTermAck);
                }
            }
            State::DelimiterReceived => {
                self.state = State::TermAckSent;
                self.outpipe = None;
                self.peer.send(CommandKind::PipeTermAck);
            }
            State::TermReqSent1 => {
                // Both ends terminating in parallel.
                self.state = State::TermReqSent2;
                self.outpipe = None;
                self.peer.send(CommandKind::PipeTermAck);
            }
            _ => debug_assert!(false, "pipe-term in state {:?}", self.state),
        }
        PipeEvent::None
    }

    /// Phase-3 handler: the peer acknowledged; release storage. The owner
    /// must drop the pipe on `Terminated`.
    pub fn process_pipe_term_ack(&mut self) -> PipeEvent {
        match self.state {
            State::TermReqSent1 => {
                self.outpipe = None;
                self.peer.send(CommandKind::PipeTermAck);
            }
            State::TermAckSent | State::TermReqSent2 => {}
            _ => debug_assert!(false, "pipe-term-ack in state {:?}", self.state),
        }
        self.inpipe = None;
        self.outpipe = None;
        PipeEvent::Terminated
    }

    /// Starts the termination handshake. With `delay`, phase 1 is deferred
    /// until pending inbound messages have been read up to the delimiter.
    pub fn terminate(&mut self, delay: bool) {
        self.delay = delay;
        match self.state {
            State::TermReqSent1 | State::TermReqSent2 | State::TermAckSent => return,
            State::Active => {
                self.peer.send(CommandKind::PipeTerm);
                self.state = State::TermReqSent1;
            }
            State::WaitingForDelimiter if !delay => {
                self.rollback();
                self.outpipe = None;
                self.peer.send(CommandKind::PipeTermAck);
                self.state = State::TermAckSent;
            }
            State::WaitingForDelimiter => return,
            State::DelimiterReceived => {
                self.peer.send(CommandKind::PipeTerm);
                self.state = State::TermReqSent1;
            }
        }

        self.out_active = false;
        if let Some(ref mut outpipe) = self.outpipe {
            // Unfinished parts are dropped; the delimiter is written past
            // the watermark so the peer always finds the end of stream.
            while outpipe.unwrite().is_some() {}
            outpipe.write(Message::delimiter(), false);
            let awake = outpipe.flush();
            if !awake {
                self.peer.send(CommandKind::ActivateRead);
            }
        }
    }

    /// True once the termination handshake has begun on this end.
    pub fn is_terminating(&self) -> bool {
        self.state != State::Active && self.state != State::DelimiterReceived
    }
}

#[cfg(test)]
mod tests {
    use super::{pipepair, PipeEvent};
    use crate::command::{Address, CommandKind};
    use crate::global::ObjectId;
    use crate::mailbox::{mailbox, Mailbox};
    use crate::msg::Message;
    use std::time::Duration;

    fn pair_with_boxes() -> (super::Pipe, super::Pipe, Mailbox, Mailbox) {
        let (tx_a, rx_a) = mailbox().unwrap();
        let (tx_b, rx_b) = mailbox().unwrap();
        let (a, b) = pipepair(
            Address::new(tx_a, ObjectId(1)),
            Address::new(tx_b, ObjectId(2)),
            (4, 4),
            (true, true),
        );
        (a, b, rx_a, rx_b)
    }

    fn pump(pipe: &mut super::Pipe, mailbox: &mut Mailbox) -> Vec<PipeEvent> {
        let mut events = Vec::new();
        while let Some(cmd) = mailbox.recv(Some(Duration::ZERO)) {
            let event = match cmd.kind {
                CommandKind::ActivateRead => pipe.process_activate_read(),
                CommandKind::ActivateWrite { msgs_read } => {
                    pipe.process_activate_write(msgs_read)
                }
                CommandKind::PipeTerm => pipe.process_pipe_term(),
                CommandKind::PipeTermAck => pipe.process_pipe_term_ack(),
                CommandKind::Hiccup { writer } => pipe.process_hiccup(writer),
                other => panic!("unexpected command {}", other.name()),
            };
            if event != PipeEvent::None {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn messages_cross_in_order_without_loss() {
        let (mut a, mut b, _ra, mut rb) = pair_with_boxes();
        for i in 0..3u8 {
            assert!(a.write(Message::from_slice(&[i])).is_ok());
        }
        pump(&mut b, &mut rb);
        for i in 0..3u8 {
            let msg = b.read().expect("message missing");
            assert_eq!(&[i][..], msg.data());
        }
        assert!(b.read().is_none());
    }

    #[test]
    fn hwm_blocks_writer_until_lwm_crossed() {
        let (mut a, mut b, mut ra, mut rb) = pair_with_boxes();

        for i in 0..4u8 {
            assert!(a.write(Message::from_slice(&[i])).is_ok());
        }
        // Window full at HWM = 4.
        assert!(!a.check_write());
        assert!(a.write(Message::from_slice(b"x")).is_err());

        pump(&mut b, &mut rb);
        // One read is below the LWM boundary; the writer stays blocked.
        b.read().unwrap();
        assert!(pump(&mut a, &mut ra).is_empty());
        assert!(!a.check_write());

        // The second read crosses LWM = (4 + 1) / 2 = 2.
        b.read().unwrap();
        assert_eq!(vec![PipeEvent::WriteActivated], pump(&mut a, &mut ra));
        assert!(a.check_write());
        assert!(a.write(Message::from_slice(b"x")).is_ok());
    }

    #[test]
    fn multipart_counts_as_one_message() {
        let (mut a, _b, _ra, _rb) = pair_with_boxes();
        for _ in 0..4 {
            let mut head = Message::from_slice(b"h");
            head.set_more();
            assert!(a.write(head).is_ok());
            assert!(a.write(Message::from_slice(b"t")).is_ok());
        }
        assert!(!a.check_write());
    }

    #[test]
    fn termination_delivers_pending_then_acks() {
        let (mut a, mut b, mut ra, mut rb) = pair_with_boxes();

        assert!(a.write(Message::from_slice(b"last words")).is_ok());
        a.terminate(false);
        assert!(a.write(Message::from_slice(b"too late")).is_err());

        // Peer receives the request and, configured to delay, keeps
        // draining until the delimiter.
        pump(&mut b, &mut rb);
        let msg = b.read().expect("pending message lost by termination");
        assert_eq!(b"last words", msg.data());
        assert!(b.read().is_none());

        // Delimiter reached; the ack travels back and both ends retire.
        assert_eq!(vec![PipeEvent::Terminated], pump(&mut a, &mut ra));
        assert_eq!(vec![PipeEvent::Terminated], pump(&mut b, &mut rb));
    }

    #[test]
    fn parallel_termination_resolves() {
        let (mut a, mut b, mut ra, mut rb) = pair_with_boxes();
        a.terminate(false);
        b.terminate(false);
        let mut done_a = Vec::new();
        let mut done_b = Vec::new();
        for _ in 0..3 {
            done_a.extend(pump(&mut a, &mut ra));
            done_b.extend(pump(&mut b, &mut rb));
        }
        assert_eq!(vec![PipeEvent::Terminated], done_a);
        assert_eq!(vec![PipeEvent::Terminated], done_b);
    }

    #[test]
    fn hiccup_resets_in_flight_and_window() {
        let (mut a, mut b, mut ra, mut rb) = pair_with_boxes();
        for i in 0..4u8 {
            assert!(a.write(Message::from_slice(&[i])).is_ok());
        }
        assert!(!a.check_write());

        // Reader reconnects; in-flight messages are abandoned and the
        // writer's window opens again.
        b.hiccup();
        let events = pump(&mut a, &mut ra);
        assert_eq!(vec![PipeEvent::Hiccuped], events);
        assert!(a.check_write());

        assert!(a.write(Message::from_slice(b"fresh")).is_ok());
        pump(&mut b, &mut rb);
        assert_eq!(b"fresh", b.read().unwrap().data());
    }
}
