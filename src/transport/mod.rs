// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Stream transports: endpoint parsing plus the TCP and Unix-domain socket
//! primitives the listeners, connecters and engines are built from.

pub mod connecter;
pub mod listener;

use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::PathBuf;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use mio::{Interest, Registry, Token};
use nix::sys::socket::{setsockopt, sockopt};

use crate::error::{Error, Result};
use crate::options::Options;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Inproc,
    Ipc,
    Tcp,
}

/// Splits `scheme://address`, rejecting schemes this build cannot speak.
pub fn parse_endpoint(addr: &str) -> Result<(Scheme, &str)> {
    let (scheme, rest) = addr.split_once("://").ok_or(Error::InvalidArgument)?;
    if rest.is_empty() {
        return Err(Error::InvalidArgument);
    }
    match scheme {
        "inproc" => Ok((Scheme::Inproc, rest)),
        "ipc" => Ok((Scheme::Ipc, rest)),
        "tcp" => Ok((Scheme::Tcp, rest)),
        // Recognized by the lineage, but there is no multicast engine here.
        "pgm" | "epgm" | "udp" => Err(Error::ProtocolNotSupported),
        _ => Err(Error::ProtocolNotSupported),
    }
}

fn resolve_tcp(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(|_| Error::InvalidArgument)?
        .next()
        .ok_or(Error::AddrNotAvailable)
}

/// A connected, nonblocking byte stream.
pub enum StreamSock {
    Tcp(TcpStream),
    Ipc(UnixStream),
}

impl StreamSock {
    /// Starts a nonblocking connect; completion is reported through the
    /// poller (writable, then `take_error`/`peer_addr`).
    pub fn connect(scheme: Scheme, address: &str) -> Result<StreamSock> {
        match scheme {
            Scheme::Tcp => {
                let addr = resolve_tcp(address)?;
                let stream = TcpStream::connect(addr).map_err(Error::from_endpoint_io)?;
                Ok(StreamSock::Tcp(stream))
            }
            Scheme::Ipc => {
                let stream = UnixStream::connect(address).map_err(Error::from_endpoint_io)?;
                Ok(StreamSock::Ipc(stream))
            }
            Scheme::Inproc => Err(Error::ProtocolNotSupported),
        }
    }

    /// Whether an in-progress connect finished successfully. Meaningful
    /// once the stream polls writable.
    pub fn connect_result(&self) -> io::Result<()> {
        let err = match self {
            StreamSock::Tcp(s) => s.take_error()?,
            StreamSock::Ipc(s) => s.take_error()?,
        };
        if let Some(e) = err {
            return Err(e);
        }
        match self {
            StreamSock::Tcp(s) => s.peer_addr().map(|_| ()),
            StreamSock::Ipc(s) => s.peer_addr().map(|_| ()),
        }
    }

    fn raw_fd(&self) -> RawFd {
        match self {
            StreamSock::Tcp(s) => s.as_raw_fd(),
            StreamSock::Ipc(s) => s.as_raw_fd(),
        }
    }
}

/// Applies the socket-level tuning options to an established stream.
/// Failures are ignored; the options are hints.
pub fn tune_stream(sock: &StreamSock, options: &Options) {
    if let StreamSock::Tcp(s) = sock {
        let _ = s.set_nodelay(true);
    }
    // The stream outlives this call; borrowing its descriptor is sound.
    let fd = unsafe { BorrowedFd::borrow_raw(sock.raw_fd()) };
    if options.sndbuf > 0 {
        let _ = setsockopt(&fd, sockopt::SndBuf, &options.sndbuf);
    }
    if options.rcvbuf > 0 {
        let _ = setsockopt(&fd, sockopt::RcvBuf, &options.rcvbuf);
    }
}

impl Read for StreamSock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamSock::Tcp(s) => s.read(buf),
            StreamSock::Ipc(s) => s.read(buf),
        }
    }
}

impl Write for StreamSock {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamSock::Tcp(s) => s.write(buf),
            StreamSock::Ipc(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamSock::Tcp(s) => s.flush(),
            StreamSock::Ipc(s) => s.flush(),
        }
    }
}

impl Source for StreamSock {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            StreamSock::Tcp(s) => s.register(registry, token, interests),
            StreamSock::Ipc(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            StreamSock::Tcp(s) => s.reregister(registry, token, interests),
            StreamSock::Ipc(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            StreamSock::Tcp(s) => s.deregister(registry),
            StreamSock::Ipc(s) => s.deregister(registry),
        }
    }
}

/// A bound, nonblocking accept socket. The Unix-domain variant unlinks its
/// filesystem node when dropped.
pub enum ListenerSock {
    Tcp(TcpListener),
    Ipc {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl ListenerSock {
    pub fn bind(scheme: Scheme, address: &str) -> Result<ListenerSock> {
        match scheme {
            Scheme::Tcp => {
                let addr = resolve_tcp(address)?;
                let listener = TcpListener::bind(addr).map_err(Error::from_endpoint_io)?;
                Ok(ListenerSock::Tcp(listener))
            }
            Scheme::Ipc => {
                let listener = UnixListener::bind(address).map_err(Error::from_endpoint_io)?;
                Ok(ListenerSock::Ipc {
                    listener,
                    path: PathBuf::from(address),
                })
            }
            Scheme::Inproc => Err(Error::ProtocolNotSupported),
        }
    }

    pub fn accept(&self) -> io::Result<StreamSock> {
        match self {
            ListenerSock::Tcp(l) => l.accept().map(|(s, _)| StreamSock::Tcp(s)),
            ListenerSock::Ipc { listener, .. } => {
                listener.accept().map(|(s, _)| StreamSock::Ipc(s))
            }
        }
    }
}

impl Drop for ListenerSock {
    fn drop(&mut self) {
        if let ListenerSock::Ipc { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Source for ListenerSock {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenerSock::Tcp(l) => l.register(registry, token, interests),
            ListenerSock::Ipc { listener, .. } => listener.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenerSock::Tcp(l) => l.reregister(registry, token, interests),
            ListenerSock::Ipc { listener, .. } => listener.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ListenerSock::Tcp(l) => l.deregister(registry),
            ListenerSock::Ipc { listener, .. } => listener.deregister(registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_endpoint, Scheme};
    use crate::error::Error;

    #[test]
    fn parses_known_schemes() {
        assert_eq!(
            (Scheme::Inproc, "a"),
            parse_endpoint("inproc://a").unwrap()
        );
        assert_eq!(
            (Scheme::Tcp, "127.0.0.1:5555"),
            parse_endpoint("tcp://127.0.0.1:5555").unwrap()
        );
        assert_eq!(
            (Scheme::Ipc, "/tmp/sock"),
            parse_endpoint("ipc:///tmp/sock").unwrap()
        );
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(matches!(
            parse_endpoint("tcp:127.0.0.1"),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            parse_endpoint("pgm://eth0;239.0.0.1:5555"),
            Err(Error::ProtocolNotSupported)
        ));
        assert!(matches!(
            parse_endpoint("carrier-pigeon://coop"),
            Err(Error::ProtocolNotSupported)
        ));
        assert!(matches!(
            parse_endpoint("tcp://"),
            Err(Error::InvalidArgument)
        ));
    }
}
