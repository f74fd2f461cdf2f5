extern crate futures;
extern crate tk_bufstream;
extern crate tk_httpd;
extern crate tokio_core;
#[macro_use] extern crate matches;

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{lazy, Async, Future};
use tk_bufstream::MockData;
use tokio_core::reactor::Core;

use tk_httpd::server::buffered::BufferedDispatcher;
use tk_httpd::server::{Codec, Config, Dispatcher, Error, Proto};
use tk_httpd::server::{RecvMode, Request, Response, StreamChunk};
use tk_httpd::server::Termination;
use tk_httpd::Status;

fn addr() -> SocketAddr {
    "127.0.0.1:1234".parse().unwrap()
}

fn output(mock: &MockData) -> String {
    String::from_utf8_lossy(&mock.output(..)).to_string()
}

#[test]
fn get_http10_closes() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |req: &Request, _: &[u8]| {
        Ok(Response::copy_from(Status::Ok, req.path().as_bytes()))
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("GET /hello HTTP/1.0\r\n\r\n");
        let done = proto.poll()?;
        assert!(matches!(done, Async::Ready(())));
        Ok(())
    })).unwrap();
    let out = output(&mock);
    assert!(out.starts_with("HTTP/1.0 200 OK\r\n"), "got: {}", out);
    assert!(out.contains("Content-Length: 6\r\n"), "got: {}", out);
    assert!(out.contains("Connection: close\r\n"), "got: {}", out);
    assert!(out.ends_with("\r\n\r\n/hello"), "got: {}", out);
}

#[test]
fn keep_alive_and_pipelining() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |req: &Request, _: &[u8]| {
        Ok(Response::copy_from(Status::Ok, req.path().as_bytes()))
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        // both requests arrive at once; responses must come back in
        // order, each fully flushed before the next one is parsed
        mock.add_input("GET /one HTTP/1.1\r\nHost: a\r\n\r\n\
                        GET /two HTTP/1.1\r\nHost: a\r\n\r\n");
        let state = proto.poll()?;
        assert!(matches!(state, Async::NotReady));  // keep-alive
        mock.add_input("GET /three HTTP/1.1\r\nHost: a\r\n\
                        Connection: close\r\n\r\n");
        let state = proto.poll()?;
        assert!(matches!(state, Async::Ready(())));
        Ok(())
    })).unwrap();
    let out = output(&mock);
    let one = out.find("/one").expect("first response");
    let two = out.find("/two").expect("second response");
    let three = out.find("/three").expect("third response");
    assert!(one < two && two < three);
    assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 3);
    assert_eq!(out.matches("Connection: close\r\n").count(), 1);
}

#[test]
fn http10_keep_alive() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |req: &Request, _: &[u8]| {
        Ok(Response::copy_from(Status::Ok, req.path().as_bytes()))
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("GET /first HTTP/1.0\r\n\
                        Connection: keep-alive\r\n\r\n");
        let state = proto.poll()?;
        assert!(matches!(state, Async::NotReady));  // stayed open
        mock.add_input("GET /second HTTP/1.0\r\n\r\n");
        let state = proto.poll()?;
        assert!(matches!(state, Async::Ready(())));
        Ok(())
    })).unwrap();
    let out = output(&mock);
    assert!(out.contains("Connection: keep-alive\r\n"), "got: {}", out);
    assert!(out.contains("/first"));
    assert!(out.ends_with("\r\n\r\n/second"), "got: {}", out);
    assert_eq!(out.matches("Connection: close\r\n").count(), 1);
}

#[test]
fn query_string_decoding() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |req: &Request, _: &[u8]| {
        assert_eq!(req.query_value("a"), Some("&"));
        assert_eq!(req.query_value("b"), Some("c"));
        let echoed = format!("a={}", req.query_value("a").unwrap());
        Ok(Response::from_buffer(Status::Ok, echoed))
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("GET /echo?a=%26&b=c HTTP/1.0\r\n\r\n");
        proto.poll()?;
        Ok(())
    })).unwrap();
    assert!(output(&mock).ends_with("a=&"));
}

struct CollectDispatcher {
    data: Rc<RefCell<Vec<u8>>>,
    chunks: Rc<Cell<usize>>,
}

struct CollectCodec {
    data: Rc<RefCell<Vec<u8>>>,
    chunks: Rc<Cell<usize>>,
}

impl Dispatcher for CollectDispatcher {
    type Codec = CollectCodec;
    fn headers_received(&mut self, _request: &Request)
        -> Result<CollectCodec, Error>
    {
        Ok(CollectCodec {
            data: self.data.clone(),
            chunks: self.chunks.clone(),
        })
    }
}

impl Codec for CollectCodec {
    fn recv_mode(&mut self) -> RecvMode {
        RecvMode::progressive(1)
    }
    fn data_received(&mut self, data: &[u8], _end: bool)
        -> Result<usize, Error>
    {
        if data.len() > 0 {
            self.chunks.set(self.chunks.get() + 1);
        }
        self.data.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }
    fn end_of_body(&mut self) -> Result<Response, Error> {
        let total = self.data.borrow().len();
        Ok(Response::from_buffer(Status::Ok, format!("{}", total)))
    }
}

#[test]
fn chunked_body_delivered_progressively() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let data = Rc::new(RefCell::new(Vec::new()));
    let chunks = Rc::new(Cell::new(0));
    let disp = CollectDispatcher {
        data: data.clone(),
        chunks: chunks.clone(),
    };
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("POST /up HTTP/1.1\r\n\
                        Transfer-Encoding: chunked\r\n\r\n");
        proto.poll()?;
        // the body dribbles in across event-loop turns
        mock.add_input("5\r\nhello\r\n");
        proto.poll()?;
        mock.add_input("6\r\n world\r\n");
        proto.poll()?;
        mock.add_input("0\r\n\r\n");
        proto.poll()?;
        Ok(())
    })).unwrap();
    assert_eq!(&data.borrow()[..], b"hello world");
    assert!(chunks.get() >= 2, "delivered incrementally");
    let out = output(&mock);
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\n11"), "got: {}", out);
}

struct StreamDispatcher;

struct StreamCodec;

impl Dispatcher for StreamDispatcher {
    type Codec = StreamCodec;
    fn headers_received(&mut self, _request: &Request)
        -> Result<StreamCodec, Error>
    {
        Ok(StreamCodec)
    }
}

impl Codec for StreamCodec {
    fn recv_mode(&mut self) -> RecvMode {
        RecvMode::buffered_upfront(0)
    }
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<usize, Error>
    {
        assert!(end);
        Ok(data.len())
    }
    fn end_of_body(&mut self) -> Result<Response, Error> {
        let chunks: Vec<&'static [u8]> = vec![b"hello", b" world"];
        let mut iter = chunks.into_iter();
        let mut sent = 0u64;
        Ok(Response::from_reader(Status::Ok, None, 4096,
            move |position, buf| {
                assert_eq!(position, sent);
                match iter.next() {
                    Some(chunk) => {
                        buf[..chunk.len()].copy_from_slice(chunk);
                        sent += chunk.len() as u64;
                        StreamChunk::Data(chunk.len())
                    }
                    None => StreamChunk::End(vec![
                        ("X-Total".to_string(), sent.to_string()),
                    ]),
                }
            }))
    }
}

#[test]
fn streamed_response_chunked_with_trailers() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let mut proto = Proto::new(mock.clone(), addr(), &cfg,
        StreamDispatcher, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("GET /stream HTTP/1.1\r\n\
                        Connection: close\r\n\r\n");
        let done = proto.poll()?;
        assert!(matches!(done, Async::Ready(())));
        Ok(())
    })).unwrap();
    let out = output(&mock);
    assert!(out.contains("Transfer-Encoding: chunked\r\n"),
        "got: {}", out);
    assert!(out.ends_with(
        "5\r\nhello\r\n6\r\n world\r\n0\r\nX-Total: 11\r\n\r\n"),
        "got: {}", out);
}

#[test]
fn head_has_no_body() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |_req: &Request, _: &[u8]| {
        Ok(Response::from_static(Status::Ok, b"should not appear"))
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("HEAD /x HTTP/1.0\r\n\r\n");
        proto.poll()?;
        Ok(())
    })).unwrap();
    let out = output(&mock);
    assert!(out.contains("Content-Length: 17\r\n"), "got: {}", out);
    assert!(out.ends_with("\r\n\r\n"), "got: {}", out);
    assert!(!out.contains("should not appear"));
}

#[test]
fn expect_continue() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |_req: &Request, body: &[u8]| {
        assert_eq!(body, b"hello");
        Ok(Response::from_static(Status::Ok, b"ok"))
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("PUT /u HTTP/1.1\r\nContent-Length: 5\r\n\
                        Expect: 100-continue\r\n\r\n");
        proto.poll()?;
        mock.add_input("hello");
        proto.poll()?;
        Ok(())
    })).unwrap();
    let out = output(&mock);
    assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\n\
                             HTTP/1.1 200 OK\r\n"),
        "got: {}", out);
}

#[test]
fn malformed_request_never_reaches_handler() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().done();
    let mock = MockData::new();
    let invoked = Rc::new(Cell::new(false));
    let invoked2 = invoked.clone();
    let disp = BufferedDispatcher::new(move || {
        let invoked = invoked2.clone();
        move |_req: &Request, _: &[u8]| {
            invoked.set(true);
            Ok(Response::from_static(Status::Ok, b"nope"))
        }
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    let result = core.run(lazy(|| -> Result<(), Error> {
        mock.add_input("BOGUS\r\n\r\n");
        proto.poll()?;
        Ok(())
    }));
    assert!(result.is_err());
    assert!(!invoked.get());
    let out = output(&mock);
    assert!(out.starts_with("HTTP/1.0 400 Bad Request\r\n"),
        "got: {}", out);
}

#[test]
fn oversized_headers_rejected() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let cfg = Config::new().memory_limit(64).done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |_req: &Request, _: &[u8]| {
        Ok(Response::from_static(Status::Ok, b"nope"))
    });
    let mut proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    let big = format!("GET / HTTP/1.1\r\nX-Filler: {}\r\n",
        "a".repeat(200));
    let result = core.run(lazy(|| -> Result<(), Error> {
        mock.add_input(&big);
        proto.poll()?;
        Ok(())
    }));
    assert!(result.is_err());
    let out = output(&mock);
    assert!(out.starts_with(
        "HTTP/1.0 431 Request Header Fields Too Large\r\n"),
        "got: {}", out);
}

#[test]
fn idle_connection_reaped() {
    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let terminations = Arc::new(AtomicUsize::new(0));
    let timed_out = Arc::new(AtomicUsize::new(0));
    let t1 = terminations.clone();
    let t2 = timed_out.clone();
    let cfg = Config::new()
        .connection_timeout(Duration::from_millis(50))
        .notify_completed(move |_addr, termination| {
            t1.fetch_add(1, Ordering::SeqCst);
            if termination == Termination::TimedOut {
                t2.fetch_add(1, Ordering::SeqCst);
            }
        })
        .done();
    let mock = MockData::new();
    let disp = BufferedDispatcher::new(|| |_req: &Request, _: &[u8]| {
        Ok(Response::from_static(Status::Ok, b"nope"))
    });
    // headers complete but the body never arrives: the request is in
    // flight when the reaper hits, so the callback sees the timeout
    mock.add_input("PUT /slow HTTP/1.1\r\nContent-Length: 10\r\n\r\nhel");
    let proto = Proto::new(mock.clone(), addr(), &cfg, disp, &handle);
    core.run(proto).unwrap();
    assert_eq!(terminations.load(Ordering::SeqCst), 1);
    assert_eq!(timed_out.load(Ordering::SeqCst), 1);
}
