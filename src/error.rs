// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io;

use thiserror::Error;

/// Operational errors surfaced through the public API.
///
/// Programmer errors (double close, protocol misuse inside the library)
/// are asserted instead and never reach this type.
#[derive(Debug, Error)]
pub enum Error {
    /// An argument was rejected: unknown option, malformed endpoint URI,
    /// oversized identity and the like.
    #[error("invalid argument")]
    InvalidArgument,

    /// The endpoint scheme is not one this library can speak.
    #[error("protocol not supported")]
    ProtocolNotSupported,

    /// The operation is not defined for this socket type,
    /// e.g. receiving on a publisher.
    #[error("operation not supported by socket type")]
    NotSupported,

    /// The socket state machine forbids the operation right now,
    /// e.g. a second send on a request socket awaiting its reply.
    #[error("operation cannot be performed in the current socket state")]
    InvalidState,

    /// The owning context has been terminated.
    #[error("context was terminated")]
    Terminated,

    /// The operation would block, or a send/receive timeout elapsed.
    #[error("operation would block")]
    WouldBlock,

    /// The wait was interrupted by a signal.
    #[error("interrupted")]
    Interrupted,

    /// The endpoint is already bound, here or by another process.
    #[error("address in use")]
    AddrInUse,

    /// The endpoint address cannot be assigned on this host.
    #[error("address not available")]
    AddrNotAvailable,

    /// The peer refused the connection. Also reported when connecting to an
    /// inproc name nobody has bound.
    #[error("connection refused")]
    ConnectionRefused,

    /// No route to the peer.
    #[error("host unreachable")]
    HostUnreachable,

    /// The context-wide socket slot table is exhausted.
    #[error("too many open sockets")]
    TooManySockets,

    /// Transport-level failure that maps to none of the kinds above.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Classify an I/O error from bind/connect into the taxonomy.
    pub(crate) fn from_endpoint_io(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::AddrInUse => Error::AddrInUse,
            io::ErrorKind::AddrNotAvailable => Error::AddrNotAvailable,
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::InvalidInput => Error::InvalidArgument,
            _ => Error::Io(err),
        }
    }

    /// True for the transient kind a blocking loop may retry.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;
    use std::io;

    #[test]
    fn endpoint_io_errors_map_to_their_kinds() {
        let err = Error::from_endpoint_io(io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(err, Error::AddrInUse));

        let err = Error::from_endpoint_io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(err, Error::ConnectionRefused));

        // Anything unclassified is carried through unchanged.
        let err = Error::from_endpoint_io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn would_block_is_the_only_retryable_kind() {
        assert!(Error::WouldBlock.is_would_block());
        assert!(!Error::Terminated.is_would_block());
        assert!(!Error::InvalidState.is_would_block());
    }
}
