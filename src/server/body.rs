//! Tracking of request-body framing in the read buffer
//!
//! After `parse()` the first `check_buf().0` bytes at the front of the
//! buffer are plain body bytes regardless of the wire framing.

use httparse::InvalidChunkSize;
use tk_bufstream::Buf;

use chunked;
use server::codec::BodyKind;


#[derive(Debug, Clone)]
pub enum BodyProgress {
    /// Bytes left of a `Content-Length` framed body
    Fixed(u64),
    Chunked(chunked::State),
}

impl BodyProgress {
    pub fn new(kind: BodyKind) -> BodyProgress {
        match kind {
            BodyKind::Fixed(n) => BodyProgress::Fixed(n),
            BodyKind::Chunked => {
                BodyProgress::Chunked(chunked::State::new())
            }
        }
    }

    /// Strip framing that arrived since the last call
    pub fn parse(&mut self, buf: &mut Buf) -> Result<(), InvalidChunkSize> {
        match *self {
            BodyProgress::Fixed(_) => Ok(()),
            BodyProgress::Chunked(ref mut state) => state.parse(buf),
        }
    }

    /// Number of body bytes ready at the buffer front, and the end flag
    pub fn check_buf(&self, buf: &Buf) -> (usize, bool) {
        match *self {
            BodyProgress::Fixed(left) if left <= buf.len() as u64 => {
                (left as usize, true)
            }
            BodyProgress::Fixed(_) => (buf.len(), false),
            BodyProgress::Chunked(ref state) => {
                (state.buffered(), state.is_done())
            }
        }
    }

    /// Account for `n` body bytes consumed from the buffer front
    pub fn consume(&mut self, buf: &mut Buf, n: usize) {
        buf.consume(n);
        match *self {
            BodyProgress::Fixed(ref mut left) => {
                assert!(*left >= n as u64);
                *left -= n as u64;
            }
            BodyProgress::Chunked(ref mut state) => state.consume(n),
        }
    }
}
