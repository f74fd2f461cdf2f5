//! The response-message serializer
//!
//! `MessageState` tracks one response from status line to completion and
//! writes the wire form into the connection's output buffer. The state
//! machine makes protocol violations (body length headers added twice,
//! body bytes after completion, short fixed-size bodies) either a
//! `HeaderError` or a panic: a panic means a bug in the handler code,
//! not a recoverable I/O condition.

use std::fmt::Display;
use std::io::Write;

use tk_bufstream::Buf;

use enums::Version;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("header value contains invalid characters")
        }
        TransferEncodingAfterContentLength {
            description("Transfer-Encoding added when Content-Length is \
                already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        CantDetermineBodySize {
            description("neither Content-Length nor Transfer-Encoding \
                is present in the headers")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
        RequireBodyless {
            description("this message must not contain body length fields")
        }
    }
}

/// State of a single response message
///
/// Note: while we pass the buffer to each method, we expect that the same
/// buffer is passed every time.
#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been sent.
    ResponseStart { version: Version, body: Body, close: bool },
    /// A `100 Continue` line has been sent, final status is pending.
    FinalResponseStart { version: Version, body: Body, close: bool },
    /// Status line is already in the buffer.
    Headers { body: Body, close: bool },
    /// The message contains a fixed size body.
    FixedHeaders { is_head: bool, close: bool, content_length: u64 },
    /// The message contains a chunked body.
    ChunkedHeaders { is_head: bool, close: bool },
    /// The message body is delimited by connection close (HTTP/1.0
    /// fallback for unknown-length streams).
    EofHeaders { is_head: bool },
    /// The message contains no body: all 1xx (Informational),
    /// 204 (No Content), and 304 (Not Modified) responses.
    Bodyless,
    /// The message contains a body with the given number of bytes left.
    FixedBody { is_head: bool, content_length: u64 },
    /// The message contains a chunked body.
    ChunkedBody { is_head: bool },
    /// The message body runs until the connection is closed.
    EofBody { is_head: bool },
    /// A message in final state.
    Done,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Body {
    /// Message contains a body.
    Normal,
    /// Message body is ignored: responses to HEAD requests.
    Head,
    /// Message must not have a body: all 1xx (Informational),
    /// 204 (No Content), and 304 (Not Modified) responses.
    Denied,
}

fn invalid_header(value: &[u8]) -> bool {
    value.iter().any(|&x| x == b'\r' || x == b'\n')
}

fn write_header(buf: &mut Buf, name: &str, value: &[u8])
    -> Result<(), HeaderError>
{
    if invalid_header(name.as_bytes()) {
        return Err(HeaderError::InvalidHeaderName);
    }
    let start = buf.len();
    buf.write_all(name.as_bytes()).unwrap();
    buf.write_all(b": ").unwrap();

    let value_start = buf.len();
    buf.write_all(value).unwrap();
    if invalid_header(&buf[value_start..]) {
        buf.remove_range(start..);
        return Err(HeaderError::InvalidHeaderValue);
    }

    buf.write_all(b"\r\n").unwrap();
    Ok(())
}

fn write_formatted<D: Display>(buf: &mut Buf, name: &str, value: D)
    -> Result<(), HeaderError>
{
    if invalid_header(name.as_bytes()) {
        return Err(HeaderError::InvalidHeaderName);
    }
    let start = buf.len();
    buf.write_all(name.as_bytes()).unwrap();
    buf.write_all(b": ").unwrap();

    let value_start = buf.len();
    write!(buf, "{}", value).unwrap();
    if invalid_header(&buf[value_start..]) {
        buf.remove_range(start..);
        return Err(HeaderError::InvalidHeaderValue);
    }

    buf.write_all(b"\r\n").unwrap();
    Ok(())
}

impl MessageState {
    /// Start a response for a request with the given properties
    ///
    /// `close` is the connection-level decision the caller already made
    /// (HTTP/1.0 without keep-alive, an explicit `Connection: close`);
    /// it controls the `Connection: close` header and nothing else.
    pub fn response_start(version: Version, is_head: bool, close: bool)
        -> MessageState
    {
        MessageState::ResponseStart {
            version: version,
            body: if is_head { Body::Head } else { Body::Normal },
            close: close,
        }
    }

    /// Write a 100 (Continue) interim response.
    ///
    /// A server should respond with the 100 status code if it receives a
    /// 100-continue expectation.
    ///
    /// # Panics
    ///
    /// When the final response is already started.
    pub fn response_continue(&mut self, buf: &mut Buf) {
        use self::MessageState::*;
        match *self {
            ResponseStart { version, body, close } => {
                write!(buf, "{} 100 Continue\r\n\r\n", version).unwrap();
                *self = FinalResponseStart {
                    version: version,
                    body: body,
                    close: close,
                };
            }
            ref state => {
                panic!("called response_continue() on response in state {:?}",
                    state)
            }
        }
    }

    /// Write the status line.
    ///
    /// This puts the status line into the buffer immediately.
    ///
    /// # Panics
    ///
    /// When the status line is already written, and when the code is 100:
    /// 100 (Continue) is not allowed as a final status.
    pub fn response_status(&mut self, buf: &mut Buf, code: u16, reason: &str) {
        use self::Body::*;
        use self::MessageState::*;
        match *self {
            ResponseStart { version, mut body, close } |
            FinalResponseStart { version, mut body, close } => {
                assert!(code != 100);
                write!(buf, "{} {} {}\r\n", version, code, reason).unwrap();
                // Responses without body:
                //
                // * 1xx (Informational)
                // * 204 (No Content)
                // * 304 (Not Modified)
                if (code >= 100 && code < 200) || code == 204 || code == 304 {
                    body = Denied;
                }
                *self = Headers { body: body, close: close };
            }
            ref state => {
                panic!("called response_status() on response in state {:?}",
                    state)
            }
        }
    }

    /// Add a header to the message.
    ///
    /// `Content-Length` must be set with `add_length` and
    /// `Transfer-Encoding: chunked` with `add_chunked`; these two headers
    /// determine body framing and are important for protocol security.
    ///
    /// It's okay to `unwrap()` the result in a request handler; the error
    /// is then a meaningful assertion failure.
    ///
    /// # Panics
    ///
    /// Panics when called before the status line or after the headers are
    /// finished.
    pub fn add_header(&mut self, buf: &mut Buf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            return Err(HeaderError::BodyLengthHeader);
        }
        match *self {
            Headers { .. } | FixedHeaders { .. } | ChunkedHeaders { .. } |
            EofHeaders { .. } => {
                write_header(buf, name, value)
            }
            ref state => {
                panic!("called add_header() on a message in state {:?}",
                    state)
            }
        }
    }

    /// Same as `add_header` but formats the value into the buffer
    ///
    /// Useful for dates and numeric headers.
    pub fn format_header<D: Display>(&mut self, buf: &mut Buf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            return Err(HeaderError::BodyLengthHeader);
        }
        match *self {
            Headers { .. } | FixedHeaders { .. } | ChunkedHeaders { .. } |
            EofHeaders { .. } => {
                write_formatted(buf, name, value)
            }
            ref state => {
                panic!("called format_header() on a message in state {:?}",
                    state)
            }
        }
    }

    /// Add a `Content-Length` header to the message.
    ///
    /// # Panics
    ///
    /// Panics when called in the wrong state.
    pub fn add_length(&mut self, buf: &mut Buf, n: u64)
        -> Result<(), HeaderError>
    {
        use self::Body::*;
        use self::HeaderError::*;
        use self::MessageState::*;
        match *self {
            FixedHeaders { .. } => Err(DuplicateContentLength),
            ChunkedHeaders { .. } | EofHeaders { .. }
            => Err(ContentLengthAfterTransferEncoding),
            Headers { body: Denied, .. } => Err(RequireBodyless),
            Headers { body, close } => {
                write_formatted(buf, "Content-Length", n)?;
                *self = FixedHeaders {
                    is_head: body == Head,
                    close: close,
                    content_length: n,
                };
                Ok(())
            }
            ref state => {
                panic!("called add_length() on message in state {:?}", state)
            }
        }
    }

    /// Set the transfer encoding to chunked.
    ///
    /// Writes `Transfer-Encoding: chunked` into the buffer immediately.
    ///
    /// # Panics
    ///
    /// Panics when called in the wrong state.
    pub fn add_chunked(&mut self, buf: &mut Buf)
        -> Result<(), HeaderError>
    {
        use self::Body::*;
        use self::HeaderError::*;
        use self::MessageState::*;
        match *self {
            FixedHeaders { .. } => Err(TransferEncodingAfterContentLength),
            ChunkedHeaders { .. } | EofHeaders { .. }
            => Err(DuplicateTransferEncoding),
            Headers { body: Denied, .. } => Err(RequireBodyless),
            Headers { body, close } => {
                write_header(buf, "Transfer-Encoding", b"chunked")?;
                *self = ChunkedHeaders {
                    is_head: body == Head,
                    close: close,
                };
                Ok(())
            }
            ref state => {
                panic!("called add_chunked() on message in state {:?}", state)
            }
        }
    }

    /// Mark the body as delimited by connection close.
    ///
    /// No framing header is written; the peer reads until end of stream, so
    /// the connection is always closed afterwards. This is the only way to
    /// send a body of unknown length to an HTTP/1.0 client.
    ///
    /// # Panics
    ///
    /// Panics when called in the wrong state.
    pub fn add_close_delimited(&mut self, _buf: &mut Buf)
        -> Result<(), HeaderError>
    {
        use self::Body::*;
        use self::HeaderError::*;
        use self::MessageState::*;
        match *self {
            FixedHeaders { .. } => Err(TransferEncodingAfterContentLength),
            ChunkedHeaders { .. } | EofHeaders { .. }
            => Err(DuplicateTransferEncoding),
            Headers { body: Denied, .. } => Err(RequireBodyless),
            Headers { body, .. } => {
                *self = EofHeaders { is_head: body == Head };
                Ok(())
            }
            ref state => {
                panic!("called add_close_delimited() on message \
                    in state {:?}", state)
            }
        }
    }

    /// Close the header section; returns `true` if a body is expected.
    ///
    /// Specifically `false` is returned when the status is 1xx, 204, 304
    /// or the response answers a HEAD request, but not when the body just
    /// has zero length.
    ///
    /// # Panics
    ///
    /// Panics when the response is in the wrong state.
    pub fn done_headers(&mut self, buf: &mut Buf)
        -> Result<bool, HeaderError>
    {
        use self::Body::*;
        use self::MessageState::*;
        if matches!(*self,
            Headers { close: true, .. } |
            FixedHeaders { close: true, .. } |
            ChunkedHeaders { close: true, .. } |
            EofHeaders { .. })
        {
            write_header(buf, "Connection", b"close").unwrap();
        }
        let expect_body = match *self {
            Headers { body: Denied, .. } => {
                *self = Bodyless;
                false
            }
            Headers { .. } => {
                return Err(HeaderError::CantDetermineBodySize);
            }
            FixedHeaders { is_head, content_length, .. } => {
                *self = FixedBody {
                    is_head: is_head,
                    content_length: content_length,
                };
                !is_head
            }
            ChunkedHeaders { is_head, .. } => {
                *self = ChunkedBody { is_head: is_head };
                !is_head
            }
            EofHeaders { is_head } => {
                *self = EofBody { is_head: is_head };
                !is_head
            }
            ref state => {
                panic!("called done_headers() on message in state {:?}",
                    state)
            }
        };
        buf.write(b"\r\n").unwrap();
        Ok(expect_body)
    }

    /// Write a chunk of the message body.
    ///
    /// Works for fixed-size, chunked and close-delimited bodies. For the
    /// chunked body each chunk is put into the buffer immediately,
    /// prefixed by the chunk size; empty chunks are ignored.
    ///
    /// Body bytes written for a HEAD response are silently dropped.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state, or when more bytes are
    /// written than the declared `Content-Length` allows.
    pub fn write_body(&mut self, buf: &mut Buf, data: &[u8]) {
        use self::MessageState::*;
        match *self {
            Bodyless => panic!("message must not contain a body"),
            FixedBody { is_head, ref mut content_length } => {
                if data.len() as u64 > *content_length {
                    panic!("fixed-size response overflow: \
                        {} bytes left but got {} more",
                        content_length, data.len());
                }
                if !is_head {
                    buf.write(data).unwrap();
                }
                *content_length -= data.len() as u64;
            }
            ChunkedBody { is_head } => if !is_head && data.len() > 0 {
                write!(buf, "{:x}\r\n", data.len()).unwrap();
                buf.write(data).unwrap();
                buf.write(b"\r\n").unwrap();
            },
            EofBody { is_head } => if !is_head {
                buf.write(data).unwrap();
            },
            ref state => {
                panic!("called write_body() on message in state {:?}", state)
            }
        }
    }

    /// Returns true if `done()` was already called successfully
    pub fn is_complete(&self) -> bool {
        matches!(*self, MessageState::Done)
    }

    /// Write the finalization data into the buffer.
    ///
    /// The method may be called multiple times.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or a fixed-size body is
    /// short.
    pub fn done(&mut self, buf: &mut Buf) {
        self.finish(buf, &[])
    }

    /// Like `done()`, but appends trailer headers after the terminal
    /// chunk of a chunked body.
    ///
    /// Trailers are silently dropped for non-chunked framing, which has
    /// no place to put them.
    pub fn done_with_trailers(&mut self, buf: &mut Buf,
        trailers: &[(String, String)])
    {
        self.finish(buf, trailers)
    }

    fn finish(&mut self, buf: &mut Buf, trailers: &[(String, String)]) {
        use self::MessageState::*;
        match *self {
            Bodyless => *self = Done,
            // Don't check responses to HEAD requests for completeness.
            FixedBody { is_head: true, .. } |
            ChunkedBody { is_head: true } |
            EofBody { is_head: true } => *self = Done,
            FixedBody { is_head: false, content_length: 0 } => *self = Done,
            FixedBody { is_head: false, content_length } => {
                panic!("tried to close message with {} bytes remaining",
                    content_length)
            }
            ChunkedBody { is_head: false } => {
                buf.write(b"0\r\n").unwrap();
                for &(ref name, ref value) in trailers {
                    // A bad trailer here is a handler bug, same as a
                    // panic from add_header
                    write_header(buf, name, value.as_bytes())
                        .expect("valid trailer header");
                }
                buf.write(b"\r\n").unwrap();
                *self = Done;
            }
            EofBody { is_head: false } => *self = Done,
            Done => {}  // multiple invocations are okay
            ref state => {
                panic!("called done() on response in state {:?}", state)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use tk_bufstream::Buf;

    use enums::Version;
    use super::MessageState;

    fn do_response10<F>(fun: F) -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::response_start(Version::Http10, false, false),
            &mut buf);
        buf
    }

    fn do_response11<F>(close: bool, fun: F) -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::response_start(Version::Http11, false, close),
            &mut buf);
        buf
    }

    fn do_head_response11<F>(fun: F) -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::response_start(Version::Http11, true, false),
            &mut buf);
        buf
    }

    #[test]
    fn minimal_response() {
        assert_eq!(&do_response10(|mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], "HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n".as_bytes());
    }

    #[test]
    fn minimal_response11() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".as_bytes());
    }

    #[test]
    fn close_response11() {
        assert_eq!(&do_response11(true, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], concat!("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n",
                        "Connection: close\r\n\r\n").as_bytes());
    }

    #[test]
    fn fixed_body() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 5).unwrap();
            msg.done_headers(buf).unwrap();
            msg.write_body(buf, b"Hello");
            msg.done(buf);
        })[..], "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello"
            .as_bytes());
    }

    #[test]
    #[should_panic(expected="bytes remaining")]
    fn short_fixed_body() {
        do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 5).unwrap();
            msg.done_headers(buf).unwrap();
            msg.write_body(buf, b"He");
            msg.done(buf);
        });
    }

    #[test]
    fn head_response() {
        // The response to a HEAD request may declare the real body length
        // but must not send the body itself.
        assert_eq!(&do_head_response11(|mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 500).unwrap();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], "HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n".as_bytes());
    }

    #[test]
    fn informational_response() {
        // No response with an 1xx status code may declare a body length.
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 142, "Foo");
            msg.add_length(buf, 500).unwrap_err();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], "HTTP/1.1 142 Foo\r\n\r\n".as_bytes());
    }

    #[test]
    fn chunked_with_trailers() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_chunked(buf).unwrap();
            msg.done_headers(buf).unwrap();
            msg.write_body(buf, b"hello");
            msg.write_body(buf, b"");  // empty chunks are dropped
            msg.done_with_trailers(buf,
                &[("X-Total".to_string(), "5".to_string())]);
        })[..], concat!("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n",
                        "\r\n5\r\nhello\r\n0\r\nX-Total: 5\r\n\r\n")
            .as_bytes());
    }

    #[test]
    fn close_delimited() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_close_delimited(buf).unwrap();
            msg.done_headers(buf).unwrap();
            msg.write_body(buf, b"stream");
            msg.done(buf);
        })[..], "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nstream"
            .as_bytes());
    }

    #[test]
    fn continue_then_response() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_continue(buf);
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], concat!("HTTP/1.1 100 Continue\r\n\r\n",
                        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .as_bytes());
    }

    #[test]
    fn bad_header_value() {
        do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_header(buf, "X-Evil", b"a\r\nInjected: yes")
                .unwrap_err();
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        });
    }
}
