//! The per-connection protocol future
//!
//! One `Proto` owns one accepted socket and its buffers. Requests on the
//! connection are serviced strictly in arrival order: parse the head,
//! feed the body to the codec, write the queued response, and only then
//! look at the next pipelined request. The only blocking point is the
//! reactor; all reads and writes here are non-blocking and the wait is
//! bounded by the connection's idle deadline.

use std::cmp::min;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures::{Async, Future, Poll};
use tk_bufstream::IoBuf;
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};

use enums::Version;
use serializer::MessageState;
use server::body::BodyProgress;
use server::codec::{BodyKind, Mode};
use server::error_page::write_error_page;
use server::response::{Body, Reader, StreamChunk};
use server::{Codec, Config, Dispatcher, Error, Termination};
use server::request::parse_request;

/// Block size for pumping file responses through the output buffer
const FILE_BLOCK: usize = 16384;


enum Sending {
    /// An in-memory body (static, shared or owned) being written out
    Buffer { body: Body, written: usize },
    /// A file range pumped in bounded blocks
    File { file: File, remaining: u64, block: Box<[u8]> },
    /// A pull-callback body
    Stream {
        reader: Reader,
        block: Box<[u8]>,
        position: u64,
    },
    /// Everything serialized, waiting for the socket to drain
    Flush,
}

enum State<C> {
    /// Waiting for (the rest of) a request head
    ReadHeaders,
    /// Streaming the request body into the codec
    ReadBody {
        codec: C,
        progress: BodyProgress,
        mode: Mode,
        close: bool,
        msg: MessageState,
    },
    /// Writing the queued response
    Respond {
        msg: MessageState,
        sending: Sending,
        close: bool,
    },
    /// No more requests will be read; flush and finish
    Closed,
}

/// A low-level HTTP/1.x server protocol handler for one connection
///
/// This is a future that resolves when the connection is closed. Wrap
/// it with your own logging `map_err` when spawning, the way the daemon
/// module does.
pub struct Proto<S, D: Dispatcher> {
    io: IoBuf<S>,
    peer_addr: SocketAddr,
    dispatcher: D,
    config: Arc<Config>,
    state: State<D::Codec>,
    handle: Handle,
    timeout: Option<Timeout>,
    deadline: Instant,
    last_version: Version,
    response_started: bool,
    in_flight: bool,
}

fn buffer_bytes(body: &Body) -> &[u8] {
    match *body {
        Body::Static(data) => data,
        Body::Shared(ref data) => &data[..],
        Body::Owned(ref data) => &data[..],
        Body::File { .. } | Body::Stream { .. } => {
            unreachable!("file and stream bodies are pumped separately")
        }
    }
}

// Serialize as much of the response body as fits under the watermark.
// Returns true if anything was produced.
fn pump_body<S>(io: &mut IoBuf<S>, msg: &mut MessageState,
    sending: &mut Sending, watermark: usize)
    -> Result<bool, Error>
{
    let mut progress = false;
    loop {
        if io.out_buf.len() >= watermark {
            return Ok(progress);
        }
        let next = match *sending {
            Sending::Buffer { ref body, ref mut written } => {
                let data = buffer_bytes(body);
                if *written == data.len() {
                    msg.done(&mut io.out_buf);
                    Some(Sending::Flush)
                } else {
                    let room = watermark - io.out_buf.len();
                    let chunk = min(room, data.len() - *written);
                    msg.write_body(&mut io.out_buf,
                        &data[*written..*written + chunk]);
                    *written += chunk;
                    progress = true;
                    None
                }
            }
            Sending::File {
                ref mut file, ref mut remaining, ref mut block,
            } => {
                if *remaining == 0 {
                    msg.done(&mut io.out_buf);
                    Some(Sending::Flush)
                } else {
                    let want = min(*remaining, block.len() as u64) as usize;
                    let bytes = file.read(&mut block[..want])?;
                    if bytes == 0 {
                        return Err(Error::Application(
                            "file is shorter than the declared length"));
                    }
                    msg.write_body(&mut io.out_buf, &block[..bytes]);
                    *remaining -= bytes as u64;
                    progress = true;
                    None
                }
            }
            Sending::Stream {
                ref mut reader, ref mut block, ref mut position,
            } => {
                match reader(*position, &mut block[..]) {
                    StreamChunk::Data(bytes) => {
                        assert!(bytes > 0,
                            "stream reader returned an empty block");
                        assert!(bytes <= block.len(),
                            "stream reader overflowed its block");
                        msg.write_body(&mut io.out_buf, &block[..bytes]);
                        *position += bytes as u64;
                        progress = true;
                        None
                    }
                    StreamChunk::End(trailers) => {
                        msg.done_with_trailers(&mut io.out_buf, &trailers);
                        Some(Sending::Flush)
                    }
                }
            }
            Sending::Flush => return Ok(progress),
        };
        if let Some(next) = next {
            *sending = next;
            progress = true;
        }
    }
}

impl<S: AsyncRead + AsyncWrite, D: Dispatcher> Proto<S, D> {
    /// Wrap an accepted connection
    ///
    /// The handle is used for the idle timeout of this connection.
    pub fn new(conn: S, peer_addr: SocketAddr, cfg: &Arc<Config>,
        dispatcher: D, handle: &Handle)
        -> Proto<S, D>
    {
        Proto {
            io: IoBuf::new(conn),
            peer_addr: peer_addr,
            dispatcher: dispatcher,
            config: cfg.clone(),
            state: State::ReadHeaders,
            handle: handle.clone(),
            timeout: None,
            deadline: Instant::now() + cfg.connection_timeout,
            last_version: Version::Http10,
            response_started: false,
            in_flight: false,
        }
    }

    fn finish_request(&mut self, termination: Termination) {
        if self.in_flight {
            self.in_flight = false;
            self.response_started = false;
            if let Some(ref callback) = self.config.notify_completed {
                callback(&self.peer_addr, termination);
            }
        }
    }

    fn wants_input(&self) -> bool {
        matches!(self.state, State::ReadHeaders | State::ReadBody { .. })
    }

    fn read_limit(&self) -> usize {
        match self.state {
            State::ReadBody { mode: Mode::BufferedUpfront(max), .. } => {
                // the buffered body intentionally exceeds the memory
                // limit; leave room for chunk framing on top
                max.saturating_add(self.config.memory_limit)
            }
            _ => self.config.memory_limit,
        }
    }

    // Take the response from the codec and serialize status, headers and
    // framing. Body bytes flow later, bounded by the output watermark.
    fn queue_response(&mut self, mut codec: D::Codec,
        mut msg: MessageState, close: bool)
        -> Result<State<D::Codec>, Error>
    {
        let response = codec.end_of_body()?;
        let (status, headers, body) = response.into_parts();
        self.response_started = true;
        let version = self.last_version;
        // an unknown-length stream to a 1.0 peer has no framing and
        // must be delimited by closing the connection
        let eof_body = version == Version::Http10
            && matches!(body, Body::Stream { size: None, .. });
        let out = &mut self.io.out_buf;
        msg.response_status(out, status.code(), status.reason());
        if version == Version::Http10 && !close && !eof_body {
            // an HTTP/1.0 client only reuses the connection when told so
            msg.add_header(out, "Connection", b"keep-alive")
                .expect("a literal header is valid");
        }
        let mut date_present = false;
        for &(ref name, ref value) in &headers {
            if name.eq_ignore_ascii_case("Date") {
                date_present = true;
            }
            msg.add_header(out, name, value.as_bytes())
                .map_err(|_| Error::Application("invalid response header"))?;
        }
        #[cfg(feature="date_header")]
        {
            if !date_present {
                use std::time::SystemTime;
                use httpdate::HttpDate;
                msg.format_header(out, "Date",
                        HttpDate::from(SystemTime::now()))
                    .expect("a date header is always valid");
            }
        }
        let _ = date_present;
        let mut force_close = false;
        let sending = if !status.response_has_body() {
            let expect_body = msg.done_headers(out)
                .expect("bodyless responses need no framing");
            debug_assert!(!expect_body);
            msg.done(out);
            Sending::Flush
        } else {
            match body {
                body @ Body::Static(..) |
                body @ Body::Shared(..) |
                body @ Body::Owned(..) => {
                    let length = body.length().unwrap();
                    msg.add_length(out, length)
                        .expect("a fresh response takes a length");
                    if msg.done_headers(out).expect("framing is set") {
                        Sending::Buffer { body: body, written: 0 }
                    } else {
                        msg.done(out);
                        Sending::Flush
                    }
                }
                Body::File { mut file, offset, length } => {
                    msg.add_length(out, length)
                        .expect("a fresh response takes a length");
                    if msg.done_headers(out).expect("framing is set") {
                        file.seek(SeekFrom::Start(offset))?;
                        Sending::File {
                            file: file,
                            remaining: length,
                            block: vec![0; FILE_BLOCK].into_boxed_slice(),
                        }
                    } else {
                        msg.done(out);
                        Sending::Flush
                    }
                }
                Body::Stream { size, block_size, reader } => {
                    match size {
                        Some(length) => {
                            msg.add_length(out, length)
                                .expect("a fresh response takes a length");
                        }
                        None => match version {
                            Version::Http11 => {
                                msg.add_chunked(out)
                                    .expect("a fresh response can chunk");
                            }
                            Version::Http10 => {
                                // no chunked framing before HTTP/1.1;
                                // stream until close
                                msg.add_close_delimited(out)
                                    .expect("a fresh response can stream");
                                force_close = true;
                            }
                        }
                    }
                    if msg.done_headers(out).expect("framing is set") {
                        Sending::Stream {
                            reader: reader,
                            block: vec![0; block_size].into_boxed_slice(),
                            position: 0,
                        }
                    } else {
                        msg.done(out);
                        Sending::Flush
                    }
                }
            }
        };
        Ok(State::Respond {
            msg: msg,
            sending: sending,
            close: close || force_close,
        })
    }

    // One attempt to advance the state machine on buffered data.
    // Returns the new state and whether anything happened.
    fn step(&mut self, state: State<D::Codec>)
        -> Result<(State<D::Codec>, bool), Error>
    {
        match state {
            State::ReadHeaders => {
                match parse_request(&self.io.in_buf, self.peer_addr)? {
                    None => {
                        if self.io.in_buf.len() > self.config.memory_limit {
                            return Err(Error::HeadersTooLarge);
                        }
                        Ok((State::ReadHeaders, false))
                    }
                    Some((request, bytes)) => {
                        self.io.in_buf.consume(bytes);
                        self.last_version = request.version();
                        if let Some(ref log) = self.config.uri_log {
                            log(&self.peer_addr, request.raw_path());
                        }
                        self.in_flight = true;
                        let close = request.connection_close();
                        let mut msg = MessageState::response_start(
                            request.version(), request.is_head(), close);
                        let mut codec =
                            self.dispatcher.headers_received(&request)?;
                        let mode = codec.recv_mode().mode;
                        if let Mode::BufferedUpfront(max) = mode {
                            if let BodyKind::Fixed(length)
                                = request.body_kind()
                            {
                                if length > max as u64 {
                                    return Err(Error::RequestTooLong);
                                }
                            }
                        }
                        if request.expect_continue()
                            && request.body_kind() != BodyKind::Fixed(0)
                        {
                            msg.response_continue(&mut self.io.out_buf);
                        }
                        let progress =
                            BodyProgress::new(request.body_kind());
                        Ok((State::ReadBody {
                            codec: codec,
                            progress: progress,
                            mode: mode,
                            close: close,
                            msg: msg,
                        }, true))
                    }
                }
            }
            State::ReadBody { mut codec, mut progress, mode, close, msg }
            => {
                progress.parse(&mut self.io.in_buf)?;
                let (bytes, end) = progress.check_buf(&self.io.in_buf);
                let mut stepped = false;
                match mode {
                    Mode::BufferedUpfront(max) => {
                        if bytes > max {
                            return Err(Error::RequestTooLong);
                        }
                        if end {
                            let consumed = codec.data_received(
                                &self.io.in_buf[..bytes], true)?;
                            assert!(consumed <= bytes,
                                "codec consumed more than it was given");
                            if consumed != bytes {
                                return Err(Error::Application(
                                    "buffered request body \
                                     was not consumed"));
                            }
                            progress.consume(&mut self.io.in_buf, consumed);
                            let next =
                                self.queue_response(codec, msg, close)?;
                            return Ok((next, true));
                        }
                    }
                    Mode::Progressive(hint) => {
                        // a full read buffer overrides the chunk-size
                        // hint, otherwise a hint above the memory limit
                        // could never be satisfied
                        if end || bytes >= hint
                            || self.io.in_buf.len()
                                >= self.config.memory_limit
                        {
                            let consumed = codec.data_received(
                                &self.io.in_buf[..bytes], end)?;
                            assert!(consumed <= bytes,
                                "codec consumed more than it was given");
                            progress.consume(&mut self.io.in_buf, consumed);
                            if end && consumed == bytes {
                                let next =
                                    self.queue_response(codec, msg, close)?;
                                return Ok((next, true));
                            }
                            if consumed > 0 {
                                stepped = true;
                            } else if end {
                                return Err(Error::Application(
                                    "no progress on request body"));
                            } else if self.io.in_buf.len()
                                >= self.config.memory_limit
                            {
                                return Err(Error::Application(
                                    "request body consumer stalled"));
                            }
                        }
                    }
                }
                Ok((State::ReadBody {
                    codec: codec,
                    progress: progress,
                    mode: mode,
                    close: close,
                    msg: msg,
                }, stepped))
            }
            State::Respond { mut msg, mut sending, close } => {
                let watermark = self.config.output_watermark;
                let pumped = pump_body(&mut self.io, &mut msg,
                    &mut sending, watermark)?;
                if msg.is_complete() && self.io.out_buf.len() == 0 {
                    // response fully flushed; only now may the next
                    // pipelined request start
                    self.finish_request(Termination::Completed);
                    if close {
                        Ok((State::Closed, true))
                    } else {
                        Ok((State::ReadHeaders, true))
                    }
                } else {
                    Ok((State::Respond {
                        msg: msg,
                        sending: sending,
                        close: close,
                    }, pumped))
                }
            }
            State::Closed => Ok((State::Closed, false)),
        }
    }

    fn turn(&mut self) -> Poll<(), Error> {
        let mut activity = false;
        loop {
            let mut progress = false;

            let buffered = self.io.out_buf.len();
            self.io.flush()?;
            if self.io.out_buf.len() < buffered {
                activity = true;
            }

            if matches!(self.state, State::Closed)
                && self.io.out_buf.len() == 0
            {
                return Ok(Async::Ready(()));
            }

            let state = mem::replace(&mut self.state, State::Closed);
            let (state, stepped) = self.step(state)?;
            self.state = state;
            if stepped {
                progress = true;
            }

            if self.wants_input()
                && self.io.in_buf.len() < self.read_limit()
            {
                if self.io.read()? > 0 {
                    progress = true;
                    activity = true;
                } else if self.io.done() {
                    // end of stream from the peer
                    match self.state {
                        State::ReadHeaders => {
                            if self.io.in_buf.len() == 0 {
                                self.state = State::Closed;
                                progress = true;
                            } else {
                                return Err(Error::ConnectionReset);
                            }
                        }
                        State::ReadBody { .. } => {
                            return Err(Error::ConnectionReset);
                        }
                        _ => {}
                    }
                }
            }

            if !progress {
                break;
            }
        }

        // idle reaping: the blocking wait is bounded by this deadline
        if activity {
            self.deadline = Instant::now()
                + self.config.connection_timeout;
            if let Some(ref mut timeout) = self.timeout {
                timeout.reset(self.deadline);
            }
        }
        if self.timeout.is_none() {
            self.timeout = Some(
                Timeout::new_at(self.deadline, &self.handle)?);
        }
        loop {
            match self.timeout.as_mut().unwrap().poll()? {
                Async::Ready(()) => {
                    if Instant::now() >= self.deadline {
                        debug!("connection from {} timed out",
                            self.peer_addr);
                        self.finish_request(Termination::TimedOut);
                        return Ok(Async::Ready(()));
                    }
                    let deadline = self.deadline;
                    self.timeout.as_mut().unwrap().reset(deadline);
                }
                Async::NotReady => break,
            }
        }
        Ok(Async::NotReady)
    }

    fn emit_error(&mut self, error: &Error) {
        if let Some(status) = error.error_status() {
            if !self.response_started {
                write_error_page(status, &mut self.io.out_buf,
                    self.last_version);
                // best effort: whatever the socket takes right now
                let _ = self.io.flush();
            }
        }
        self.finish_request(Termination::WithError);
    }
}

impl<S: AsyncRead + AsyncWrite, D: Dispatcher> Future for Proto<S, D> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        match self.turn() {
            Ok(value) => Ok(value),
            Err(error) => {
                debug!("connection from {} errored: {}",
                    self.peer_addr, error);
                self.emit_error(&error);
                Err(error)
            }
        }
    }
}

impl<S, D: Dispatcher> Drop for Proto<S, D> {
    fn drop(&mut self) {
        // dropped mid-request means the daemon is going away
        if self.in_flight {
            self.in_flight = false;
            if let Some(ref callback) = self.config.notify_completed {
                callback(&self.peer_addr, Termination::Shutdown);
            }
        }
    }
}
