// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::fmt;

/// Pass to send/recv to fail with `WouldBlock` instead of waiting.
pub const DONTWAIT: i32 = 1;
/// Pass to send to mark the part as non-final; more parts follow.
pub const SNDMORE: i32 = 2;

/// Maximum number of sockets a context can hold at any one time.
pub const MAX_SOCKETS: usize = 512;

/// Number of messages received in a row before a blocking receive loop
/// checks the mailbox for pending commands.
pub const INBOUND_POLL_RATE: u32 = 100;

/// Defines the socket types, which in turn determines the exact semantics of the socket.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SocketType {
    /// **Exclusive pair protocol**
    /// Socket for communication with exactly one peer. Each party can send
    /// messages at any time. If the peer is not available or its buffers are
    /// full, subsequent sends block until it is possible to send the message.
    Pair,

    /// **Publish/subscribe protocol**
    /// Broadcasts messages to every connected subscriber whose subscription
    /// matches. A topic is an arbitrary byte prefix of the message body; the
    /// matching is performed against the subscriptions each subscriber has
    /// forwarded upstream. When no subscription matches, the message is
    /// dropped. Receive is not defined on this socket.
    Pub,

    /// Receives messages from publishers. Only messages matching one of the
    /// registered subscriptions are delivered; a freshly created socket has
    /// no subscriptions and receives nothing. Send is not defined.
    Sub,

    /// Like [`Pub`](SocketType::Pub), but subscription control frames sent by
    /// peers are also delivered to the application.
    XPub,

    /// Like [`Sub`](SocketType::Sub), but subscriptions are issued by sending
    /// raw control frames instead of setting options.
    XSub,

    /// **Request/reply protocol**
    /// Sends requests and receives replies in strict alternation. Used to
    /// implement the client side of a stateless service.
    Req,

    /// Receives requests and sends replies in strict alternation, carrying
    /// the routing envelope back automatically. The worker side.
    Rep,

    /// Raw request-side socket: load-balances outgoing messages and
    /// fair-queues incoming ones with no state machine imposed.
    Dealer,

    /// Raw reply-side socket: prefixes every received message with the
    /// originating peer's identity and routes outgoing messages by their
    /// identity prefix.
    Router,

    /// **Pipeline protocol**
    /// Pushes messages to a cluster of load-balanced downstream nodes.
    /// Receive is not defined.
    Push,

    /// Pulls messages from upstream nodes, fair-queued. Send is not defined.
    Pull,

    /// **Survey protocol**
    /// Broadcasts a survey to all connected respondents and gathers the
    /// responses until the survey deadline passes.
    Surveyor,

    /// Receives surveys and sends back responses, one at a time.
    Respondent,

    /// Raw surveyor without the deadline/state machinery.
    XSurveyor,

    /// Raw respondent: exposes the survey routing prefix to the application.
    XRespondent,
}

impl SocketType {
    /// Wire identifier exchanged during the stream handshake.
    /// Encoded as pattern-group * 16 + role.
    pub fn wire_id(self) -> u16 {
        match self {
            SocketType::Pair => 16,
            SocketType::Pub | SocketType::XPub => 2 * 16,
            SocketType::Sub | SocketType::XSub => 2 * 16 + 1,
            SocketType::Req | SocketType::Dealer => 3 * 16,
            SocketType::Rep | SocketType::Router => 3 * 16 + 1,
            SocketType::Push => 5 * 16,
            SocketType::Pull => 5 * 16 + 1,
            SocketType::Surveyor | SocketType::XSurveyor => 6 * 16 + 2,
            SocketType::Respondent | SocketType::XRespondent => 6 * 16 + 3,
        }
    }

    /// Wire identifier this socket expects from its peer.
    pub fn peer_wire_id(self) -> u16 {
        match self {
            SocketType::Pair => 16,
            SocketType::Pub | SocketType::XPub => 2 * 16 + 1,
            SocketType::Sub | SocketType::XSub => 2 * 16,
            SocketType::Req | SocketType::Dealer => 3 * 16 + 1,
            SocketType::Rep | SocketType::Router => 3 * 16,
            SocketType::Push => 5 * 16 + 1,
            SocketType::Pull => 5 * 16,
            SocketType::Surveyor | SocketType::XSurveyor => 6 * 16 + 3,
            SocketType::Respondent | SocketType::XRespondent => 6 * 16 + 2,
        }
    }

    /// Whether a connection between the two types is admissible.
    pub fn matches(self, other: SocketType) -> bool {
        self.peer_wire_id() == other.wire_id() && other.peer_wire_id() == self.wire_id()
    }

    /// True for the router-family types that exchange identity frames.
    pub(crate) fn uses_identity(self) -> bool {
        matches!(
            self,
            SocketType::Req | SocketType::Rep | SocketType::Dealer | SocketType::Router
        )
    }
}

/// Identifies one command-addressable object: a socket, a session, a
/// listener, a connecter, or one end of a pipe. Unique per context.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl fmt::Debug for ObjectId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

#[cfg(test)]
mod tests {
    use super::SocketType;

    #[test]
    fn socket_types_match_their_peers() {
        assert!(SocketType::Pair.matches(SocketType::Pair));
        assert!(SocketType::Pub.matches(SocketType::Sub));
        assert!(SocketType::Req.matches(SocketType::Router));
        assert!(SocketType::Dealer.matches(SocketType::Rep));
        assert!(SocketType::Surveyor.matches(SocketType::XRespondent));
        assert!(!SocketType::Push.matches(SocketType::Push));
        assert!(!SocketType::Pub.matches(SocketType::Pull));
    }
}
