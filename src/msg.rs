// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::fmt;
use std::mem;
use std::sync::Arc;

/// Payloads up to this size are stored inline in the message handle,
/// avoiding any allocation.
pub const MAX_INLINE_SIZE: usize = 30;

const FLAG_MORE: u8 = 1;
const FLAG_IDENTITY: u8 = 64;

/// Deallocation hook invoked when the last reference to a foreign buffer
/// is released.
pub type FreeFn = Box<dyn FnOnce(Box<[u8]>) + Send + Sync>;

/// Heap storage behind a non-inline message.
struct Content {
    data: Box<[u8]>,
    ffn: Option<FreeFn>,
}

impl Drop for Content {
    fn drop(&mut self) {
        if let Some(ffn) = self.ffn.take() {
            ffn(mem::take(&mut self.data));
        }
    }
}

enum Body {
    /// Very small message, payload held in the handle itself.
    Inline { len: u8, data: [u8; MAX_INLINE_SIZE] },
    /// Heap buffer with a single owner. The reference count is implicit
    /// and non-atomic until the message is first copied.
    Exclusive(Box<Content>),
    /// Heap buffer shared between handles; atomic reference count.
    Shared(Arc<Content>),
    /// Borrowed storage with static lifetime; copies are free.
    Static(&'static [u8]),
    /// Marks the end of the message stream inside a terminating pipe.
    /// Never observable through the public API.
    Delimiter,
}

/// A discrete message, or one part of a multipart message.
///
/// Move semantics are Rust moves; `copy` yields a second handle to the same
/// payload, promoting the storage to the shared, atomically counted form on
/// first use. Dropping a handle releases its reference; the buffer is freed
/// with the last one.
pub struct Message {
    body: Body,
    flags: u8,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Message {
        Message {
            body: Body::Inline {
                len: 0,
                data: [0; MAX_INLINE_SIZE],
            },
            flags: 0,
        }
    }

    /// Creates a zero-filled message of the given size.
    pub fn with_size(size: usize) -> Message {
        if size <= MAX_INLINE_SIZE {
            Message {
                body: Body::Inline {
                    len: size as u8,
                    data: [0; MAX_INLINE_SIZE],
                },
                flags: 0,
            }
        } else {
            Message {
                body: Body::Exclusive(Box::new(Content {
                    data: vec![0; size].into_boxed_slice(),
                    ffn: None,
                })),
                flags: 0,
            }
        }
    }

    /// Creates a message holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Message {
        let mut msg = Message::with_size(data.len());
        msg.data_mut().copy_from_slice(data);
        msg
    }

    /// Creates a message taking ownership of `data`.
    pub fn from_vec(data: Vec<u8>) -> Message {
        if data.len() <= MAX_INLINE_SIZE {
            Message::from_slice(&data)
        } else {
            Message {
                body: Body::Exclusive(Box::new(Content {
                    data: data.into_boxed_slice(),
                    ffn: None,
                })),
                flags: 0,
            }
        }
    }

    /// Creates a message borrowing static storage. No copy is ever made.
    pub fn from_static(data: &'static [u8]) -> Message {
        Message {
            body: Body::Static(data),
            flags: 0,
        }
    }

    /// Wraps a foreign buffer. `ffn` runs when the last handle referring to
    /// the buffer is dropped, receiving the buffer back.
    pub fn with_deallocator(data: Box<[u8]>, ffn: FreeFn) -> Message {
        Message {
            body: Body::Exclusive(Box::new(Content {
                data,
                ffn: Some(ffn),
            })),
            flags: 0,
        }
    }

    /// End-of-stream marker written into a pipe when it starts terminating.
    pub(crate) fn delimiter() -> Message {
        Message {
            body: Body::Delimiter,
            flags: 0,
        }
    }

    pub(crate) fn is_delimiter(&self) -> bool {
        matches!(self.body, Body::Delimiter)
    }

    /// Message payload.
    pub fn data(&self) -> &[u8] {
        match self.body {
            Body::Inline { len, ref data } => &data[..len as usize],
            Body::Exclusive(ref content) => &content.data,
            Body::Shared(ref content) => &content.data,
            Body::Static(data) => data,
            Body::Delimiter => &[],
        }
    }

    /// Mutable access to the payload. Only legal while the buffer has a
    /// single owner; call right after construction, before any copy.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match self.body {
            Body::Inline { len, ref mut data } => &mut data[..len as usize],
            Body::Exclusive(ref mut content) => &mut content.data,
            _ => panic!("mutating a shared message buffer"),
        }
    }

    pub fn size(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Copies the message: inline payloads are duplicated, heap payloads are
    /// promoted to shared storage and reference-counted. This is the fan-out
    /// primitive; one copy costs one atomic increment.
    pub fn copy(&mut self) -> Message {
        let body = match self.body {
            Body::Inline { len, data } => Body::Inline { len, data },
            Body::Static(data) => Body::Static(data),
            Body::Delimiter => Body::Delimiter,
            Body::Shared(ref content) => Body::Shared(Arc::clone(content)),
            Body::Exclusive(_) => {
                // Lazy promotion: first copy turns the exclusive buffer into
                // a shared one without touching the payload.
                let old = mem::replace(&mut self.body, Body::Delimiter);
                let content = match old {
                    Body::Exclusive(content) => Arc::from(content),
                    _ => unreachable!(),
                };
                self.body = Body::Shared(Arc::clone(&content));
                Body::Shared(content)
            }
        };
        Message {
            body,
            flags: self.flags,
        }
    }

    /// Whether the payload is in the shared, atomically counted state.
    pub fn is_shared(&self) -> bool {
        matches!(self.body, Body::Shared(_))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }

    /// True when another part of the same logical message follows.
    pub fn has_more(&self) -> bool {
        self.flags & FLAG_MORE != 0
    }

    pub fn set_more(&mut self) {
        self.flags |= FLAG_MORE;
    }

    pub fn clear_more(&mut self) {
        self.flags &= !FLAG_MORE;
    }

    /// True for out-of-band identity handshake parts.
    pub fn is_identity(&self) -> bool {
        self.flags & FLAG_IDENTITY != 0
    }

    pub(crate) fn set_identity(&mut self) {
        self.flags |= FLAG_IDENTITY;
    }

    /// Counts toward pipe watermarks only as the final part of a logical
    /// message, and never as an identity or delimiter frame.
    pub(crate) fn counts_as_whole(&self) -> bool {
        !self.has_more() && !self.is_identity() && !self.is_delimiter()
    }

    #[cfg(test)]
    fn shared_refs(&self) -> usize {
        match self.body {
            Body::Shared(ref content) => Arc::strong_count(content),
            _ => 1,
        }
    }
}

impl Default for Message {
    fn default() -> Message {
        Message::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Message")
            .field("size", &self.size())
            .field("more", &self.has_more())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MAX_INLINE_SIZE};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn small_payload_stays_inline() {
        let mut msg = Message::from_slice(&[7u8; MAX_INLINE_SIZE]);
        let copy = msg.copy();
        assert!(!msg.is_shared());
        assert!(!copy.is_shared());
        assert_eq!(msg.data(), copy.data());
    }

    #[test]
    fn first_copy_promotes_to_shared() {
        let mut msg = Message::from_slice(&[7u8; MAX_INLINE_SIZE + 1]);
        assert!(!msg.is_shared());

        let copy = msg.copy();
        assert!(msg.is_shared());
        assert!(copy.is_shared());
        assert_eq!(2, msg.shared_refs());

        drop(copy);
        assert_eq!(1, msg.shared_refs());
        assert_eq!(&[7u8; MAX_INLINE_SIZE + 1][..], msg.data());
    }

    #[test]
    fn deallocator_runs_on_last_release() {
        let freed = Arc::new(AtomicBool::new(false));
        let probe = Arc::clone(&freed);
        let buffer = vec![1u8; 64].into_boxed_slice();
        let mut msg = Message::with_deallocator(
            buffer,
            Box::new(move |buf| {
                assert_eq!(64, buf.len());
                probe.store(true, Ordering::SeqCst);
            }),
        );

        let copy = msg.copy();
        drop(msg);
        assert!(!freed.load(Ordering::SeqCst));
        drop(copy);
        assert!(freed.load(Ordering::SeqCst));
    }

    #[test]
    fn flags_travel_with_copies() {
        let mut msg = Message::from_slice(b"topic");
        msg.set_more();
        let copy = msg.copy();
        assert!(copy.has_more());
        assert!(!copy.is_identity());
    }
}
