//! Incremental decoder for chunked transfer encoding
//!
//! The decoder strips chunk framing in place: after `parse()` the first
//! `buffered()` bytes of the buffer are decoded body bytes, everything
//! behind them is framing or data not yet decodable. Trailer headers after
//! the terminal zero chunk are consumed and discarded, so that with
//! keep-alive the next pipelined request starts at buffer offset zero.

use httparse::{InvalidChunkSize, parse_chunk_size};
use tk_bufstream::Buf;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading chunk-size lines and chunk data
    Chunks,
    /// Terminal chunk seen, discarding trailer lines
    Trailers,
    /// The final blank line is consumed
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Number of decoded body bytes at the front of the buffer
    buffered: usize,
    /// Bytes of the current chunk that have not arrived yet
    pending: usize,
    phase: Phase,
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|pair| pair == b"\r\n")
}

impl State {
    pub fn new() -> State {
        State {
            buffered: 0,
            pending: 0,
            phase: Phase::Chunks,
        }
    }

    pub fn parse(&mut self, buf: &mut Buf) -> Result<(), InvalidChunkSize> {
        use httparse::Status::{Complete, Partial};
        while self.phase == Phase::Chunks && self.buffered < buf.len() {
            if self.pending == 0 {
                match parse_chunk_size(&buf[self.buffered..])? {
                    Complete((bytes, 0)) => {
                        buf.remove_range(
                            self.buffered..self.buffered + bytes);
                        self.phase = Phase::Trailers;
                    }
                    Complete((bytes, chunk_size)) => {
                        buf.remove_range(
                            self.buffered..self.buffered + bytes);
                        self.pending = chunk_size as usize;
                    }
                    Partial => return Ok(()),
                }
            } else if self.buffered + self.pending + 2 <= buf.len() {
                // whole chunk and its closing CRLF are in the buffer
                self.buffered += self.pending;
                self.pending = 0;
                buf.remove_range(self.buffered..self.buffered + 2);
            } else {
                let available = buf.len() - self.buffered;
                if available >= self.pending {
                    // only the closing CRLF is incomplete
                    return Ok(());
                }
                self.pending -= available;
                self.buffered = buf.len();
            }
        }
        while self.phase == Phase::Trailers {
            match find_crlf(&buf[self.buffered..]) {
                Some(0) => {
                    buf.remove_range(self.buffered..self.buffered + 2);
                    self.phase = Phase::Done;
                }
                Some(end) => {
                    // a trailer header we don't keep
                    buf.remove_range(self.buffered..self.buffered + end + 2);
                }
                None => return Ok(()),
            }
        }
        Ok(())
    }

    /// Decoded bytes ready at the front of the buffer
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// True once the terminal chunk and its trailers are fully consumed
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Account for `n` decoded bytes consumed from the buffer front
    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n);
        self.buffered -= n;
    }
}

#[cfg(test)]
mod test {
    use tk_bufstream::Buf;
    use super::State;

    #[test]
    fn simple() {
        let mut state = State::new();
        let mut buf = Buf::new();
        buf.extend(b"4\r\nhell\r\n");
        state.parse(&mut buf).unwrap();
        assert_eq!(state.buffered(), 4);
        assert!(!state.is_done());
        state.consume(4);
        buf.consume(4);
        assert_eq!(state.buffered(), 0);
        buf.extend(b"0\r\n\r\n");
        state.parse(&mut buf).unwrap();
        assert_eq!(state.buffered(), 0);
        assert!(state.is_done());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn byte_by_byte() {
        let mut state = State::new();
        let mut buf = Buf::new();
        let wire = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        for &b in wire.iter() {
            buf.extend(&[b]);
            state.parse(&mut buf).unwrap();
        }
        assert!(state.is_done());
        assert_eq!(state.buffered(), 11);
        assert_eq!(&buf[..11], b"hello world");
    }

    #[test]
    fn trailers_discarded() {
        let mut state = State::new();
        let mut buf = Buf::new();
        buf.extend(b"3\r\nabc\r\n0\r\nX-Checksum: 900150983cd2\r\n\r\nGET");
        state.parse(&mut buf).unwrap();
        assert!(state.is_done());
        assert_eq!(state.buffered(), 3);
        // the next pipelined request follows the decoded bytes directly
        assert_eq!(&buf[..], b"abcGET");
    }

    #[test]
    fn partial_trailer() {
        let mut state = State::new();
        let mut buf = Buf::new();
        buf.extend(b"1\r\nx\r\n0\r\nX-Part");
        state.parse(&mut buf).unwrap();
        assert!(!state.is_done());
        buf.extend(b"ial: yes\r\n\r\n");
        state.parse(&mut buf).unwrap();
        assert!(state.is_done());
        assert_eq!(state.buffered(), 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn bad_chunk_size() {
        let mut state = State::new();
        let mut buf = Buf::new();
        buf.extend(b"zz\r\nhello");
        assert!(state.parse(&mut buf).is_err());
    }
}
