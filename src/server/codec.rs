//! The low-level handler interface of the server
//!
//! A `Dispatcher` is created once per connection and asked for a fresh
//! `Codec` when a request head has been parsed. The codec is the typed
//! per-request state: it survives across the (possibly many) body
//! deliveries of one request and is dropped when the response is queued.

use server::{Error, Request, Response};


/// How the body of a request is framed on the wire
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    /// `Content-Length` framing; no body is `Fixed(0)`
    Fixed(u64),
    /// `Transfer-Encoding: chunked` framing
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    BufferedUpfront(usize),
    Progressive(usize),
}

/// How the request body should be delivered to the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvMode {
    pub(crate) mode: Mode,
}

impl RecvMode {
    /// Download the whole message body into memory before the first
    /// `data_received` call
    ///
    /// The argument is the maximum size of the body. Works equally well
    /// for chunked encoding, where the size isn't known in advance; it is
    /// an upper limit, not a buffer size.
    pub fn buffered_upfront(max_body_size: usize) -> RecvMode {
        RecvMode { mode: Mode::BufferedUpfront(max_body_size) }
    }
    /// Deliver the body chunk by chunk, as network reads arrive
    ///
    /// The parameter is the minimum number of bytes that will be passed
    /// in one `data_received` call (except for the final one). This is a
    /// wake-up tuning knob, not a buffer size; `progressive(1)` is
    /// perfectly okay.
    pub fn progressive(min_chunk_size_hint: usize) -> RecvMode {
        RecvMode { mode: Mode::Progressive(min_chunk_size_hint) }
    }
}

/// An object that creates a codec for each incoming request
///
/// There is one dispatcher per connection, so request-independent
/// connection state (like the peer address, or an application handle)
/// lives here.
pub trait Dispatcher {
    /// The codec type for this dispatcher
    ///
    /// In many cases the type is just `Box<Codec>`, but an associated
    /// type makes middleware layers cheaper.
    type Codec: Codec;

    /// A request head was received
    ///
    /// This is the first invocation for every request, before any body
    /// byte is read. The place to allocate per-request state is
    /// exactly the returned codec object. Returning an error aborts the
    /// connection with a best-effort error response and without reading
    /// the body.
    fn headers_received(&mut self, request: &Request)
        -> Result<Self::Codec, Error>;
}

/// A consumer of a single request that eventually yields a `Response`
pub trait Codec {
    /// Return the mode used to receive the request body
    ///
    /// Called once, right after `headers_received`.
    fn recv_mode(&mut self) -> RecvMode;

    /// A chunk of the request body was received
    ///
    /// `end` is true for the last chunk of data. Returns the number of
    /// bytes consumed; bytes left unconsumed are passed in again on the
    /// next call. Returning `0` while the connection's read buffer is
    /// full (or after `end`) means no forward progress is possible and
    /// aborts the connection with an application error.
    ///
    /// Requests without a body still get exactly one call with
    /// `data = b""` and `end = true`.
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<usize, Error>;

    /// The body is fully consumed; produce the response
    ///
    /// This is the moment to finalize whatever the codec accumulated
    /// and queue exactly one response. After this call the codec is
    /// dropped.
    fn end_of_body(&mut self) -> Result<Response, Error>;
}

impl<C: Codec + ?Sized> Codec for Box<C> {
    fn recv_mode(&mut self) -> RecvMode {
        (**self).recv_mode()
    }
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<usize, Error>
    {
        (**self).data_received(data, end)
    }
    fn end_of_body(&mut self) -> Result<Response, Error> {
        (**self).end_of_body()
    }
}
