//! The response value produced by a codec
//!
//! A `Response` is data, not a writer: status, headers and one of the
//! body variants. Ownership of body bytes is expressed in the variant
//! itself: borrowed static data, a shared buffer, an owned buffer whose
//! destructor releases it, a file range, or a pull callback for content
//! generated on the fly.

use std::fmt;
use std::fs::File;
use std::sync::Arc;

use enums::Status;

/// Result of one pull from a streamed body reader
pub enum StreamChunk {
    /// `n` bytes were written into the front of the block buffer
    Data(usize),
    /// The stream is finished; trailer headers to append, usually empty
    ///
    /// Trailers reach the peer only with chunked framing (HTTP/1.1 and
    /// unknown size); with any other framing they are dropped.
    End(Vec<(String, String)>),
}

/// The reader callback of a streamed response
///
/// Called with the current byte position and a scratch block to fill.
/// The buffer is never smaller than the `block_size` the response was
/// created with.
pub type Reader = Box<FnMut(u64, &mut [u8]) -> StreamChunk + 'static>;

pub enum Body {
    /// Borrowed bytes with `'static` lifetime, nothing to release
    Static(&'static [u8]),
    /// Shared immutable buffer; the caller keeps its own reference
    Shared(Arc<Vec<u8>>),
    /// Uniquely owned buffer, released when the response is dropped
    Owned(Vec<u8>),
    /// A byte range streamed from a file without buffering it whole
    File {
        file: File,
        offset: u64,
        length: u64,
    },
    /// Content pulled from a callback as the socket drains
    Stream {
        size: Option<u64>,
        block_size: usize,
        reader: Reader,
    },
}

impl Body {
    pub fn length(&self) -> Option<u64> {
        match *self {
            Body::Static(data) => Some(data.len() as u64),
            Body::Shared(ref data) => Some(data.len() as u64),
            Body::Owned(ref data) => Some(data.len() as u64),
            Body::File { length, .. } => Some(length),
            Body::Stream { size, .. } => size,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Body::Static(data) => {
                write!(f, "Body::Static({} bytes)", data.len())
            }
            Body::Shared(ref data) => {
                write!(f, "Body::Shared({} bytes)", data.len())
            }
            Body::Owned(ref data) => {
                write!(f, "Body::Owned({} bytes)", data.len())
            }
            Body::File { offset, length, .. } => {
                write!(f, "Body::File({}+{})", offset, length)
            }
            Body::Stream { size, block_size, .. } => {
                write!(f, "Body::Stream(size: {:?}, block: {})",
                    size, block_size)
            }
        }
    }
}

/// A complete response, queued for sending exactly once
///
/// The response is mutable until it is returned from
/// `Codec::end_of_body`; passing it to the connection moves it, so
/// late header mutation is unrepresentable (trailers on a streamed
/// body being the one sanctioned exception).
#[derive(Debug)]
pub struct Response {
    status: Status,
    headers: Vec<(String, String)>,
    body: Body,
}

impl Response {
    /// An empty response with the given status
    pub fn new(status: Status) -> Response {
        Response {
            status: status,
            headers: Vec::new(),
            body: Body::Static(b""),
        }
    }

    /// A response borrowing bytes that live as long as the program
    pub fn from_static(status: Status, data: &'static [u8]) -> Response {
        Response {
            status: status,
            headers: Vec::new(),
            body: Body::Static(data),
        }
    }

    /// A response sharing an immutable buffer with its producer
    pub fn from_shared(status: Status, data: Arc<Vec<u8>>) -> Response {
        Response {
            status: status,
            headers: Vec::new(),
            body: Body::Shared(data),
        }
    }

    /// A response owning its buffer; dropped (freed) after sending
    pub fn from_buffer<B: Into<Vec<u8>>>(status: Status, data: B)
        -> Response
    {
        Response {
            status: status,
            headers: Vec::new(),
            body: Body::Owned(data.into()),
        }
    }

    /// A response copying the caller's bytes eagerly
    ///
    /// The caller's buffer can be reused or freed right away.
    pub fn copy_from(status: Status, data: &[u8]) -> Response {
        Response::from_buffer(status, data.to_vec())
    }

    /// A response streaming `length` bytes of `file` starting at `offset`
    ///
    /// The file is read in bounded blocks while the response is written,
    /// never buffered whole.
    pub fn from_file(status: Status, file: File, offset: u64, length: u64)
        -> Response
    {
        Response {
            status: status,
            headers: Vec::new(),
            body: Body::File {
                file: file,
                offset: offset,
                length: length,
            },
        }
    }

    /// A response pulling its body from `reader` as the socket drains
    ///
    /// `size` of `None` means the total length is unknown: the body is
    /// sent chunked to HTTP/1.1 peers and close-delimited to HTTP/1.0
    /// peers. The reader is called with the current position and a block
    /// of at least `block_size` bytes to fill; it finishes by returning
    /// `StreamChunk::End`, optionally carrying trailer headers.
    ///
    /// With a known `size`, filling less than a full block before the
    /// declared length is reached is a contract violation in the handler
    /// and panics while the response is written.
    pub fn from_reader<F>(status: Status, size: Option<u64>,
        block_size: usize, reader: F)
        -> Response
        where F: FnMut(u64, &mut [u8]) -> StreamChunk + 'static
    {
        assert!(block_size > 0);
        Response {
            status: status,
            headers: Vec::new(),
            body: Body::Stream {
                size: size,
                block_size: block_size,
                reader: Box::new(reader),
            },
        }
    }

    /// Replace the status
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Append a header
    ///
    /// `Content-Length` and `Transfer-Encoding` are derived from the
    /// body variant and rejected here (at send time, with a panic in the
    /// serializer), same as adding them through the low-level writer.
    pub fn add_header<N, V>(&mut self, name: N, value: V) -> &mut Response
        where N: Into<String>, V: Into<String>
    {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a `Set-Cookie` header
    ///
    /// Repeated calls produce repeated headers, one cookie each.
    pub fn set_cookie(&mut self, name: &str, value: &str, params: &str)
        -> &mut Response
    {
        let cookie = if params.is_empty() {
            format!("{}={}", name, value)
        } else {
            format!("{}={}; {}", name, value, params)
        };
        self.headers.push(("Set-Cookie".to_string(), cookie));
        self
    }

    /// Status this response will be sent with
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Headers accumulated so far
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub(crate) fn into_parts(self)
        -> (Status, Vec<(String, String)>, Body)
    {
        (self.status, self.headers, self.body)
    }
}
