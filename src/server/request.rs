//! Request head parsing and the owned `Request` structure
//!
//! Parsing is incremental: `parse_request` is called whenever new bytes
//! arrive and returns `None` until a full head is buffered. The returned
//! `Request` owns all its data, so the read buffer can be consumed
//! immediately and reused for the body.

use std::net::SocketAddr;
use std::str::{self, FromStr};

use httparse;
use tk_bufstream::Buf;
use url::form_urlencoded;
use url::percent_encoding::percent_decode;

use enums::{Method, Version};
use headers as tokens;
use server::codec::BodyKind;
use server::Error;

/// Number of headers to allocate on the stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;


/// A fully parsed request head
///
/// This is passed to `Dispatcher::headers_received` and stays available
/// to the codec for the whole request. Hop-by-hop headers
/// (`Connection`, `Transfer-Encoding`) are not stripped from `headers()`;
/// skip them if you proxy the request somewhere.
#[derive(Debug, Clone)]
pub struct Request {
    peer_addr: SocketAddr,
    method: Method,
    raw_path: String,
    path: String,
    query: Vec<(String, String)>,
    version: Version,
    headers: Vec<(String, Vec<u8>)>,
    host: Option<String>,
    body_kind: BodyKind,
    connection_close: bool,
    expect_continue: bool,
}

impl Request {
    /// Address of the peer the request came from
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
    /// Request method
    pub fn method(&self) -> &Method {
        &self.method
    }
    /// Request target exactly as it appeared on the request line
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }
    /// Percent-decoded path without the query string
    pub fn path(&self) -> &str {
        &self.path
    }
    /// HTTP version of the request
    pub fn version(&self) -> Version {
        self.version
    }
    /// Value of the Host header or of the authority in an absolute URI
    pub fn host(&self) -> Option<&str> {
        self.host.as_ref().map(|x| &x[..])
    }
    /// All headers in arrival order, values as stored on the wire
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }
    /// First value of the header `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }
    /// Same as `header()` but additionally requires the value to be utf-8
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(|v| str::from_utf8(v).ok())
    }
    /// Decoded query-string pairs in arrival order
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }
    /// Value of the first query-string argument named `key` (decoded)
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter()
            .find(|&&(ref k, _)| k == key)
            .map(|&(_, ref v)| &v[..])
    }
    /// All query pairs whose key starts with `prefix`
    pub fn query_values_with_prefix(&self, prefix: &str)
        -> Vec<(&str, &str)>
    {
        self.query.iter()
            .filter(|&&(ref k, _)| k.starts_with(prefix))
            .map(|&(ref k, ref v)| (&k[..], &v[..]))
            .collect()
    }
    /// Value of the cookie `name` from the `Cookie` request header(s)
    pub fn cookie(&self, name: &str) -> Option<&str> {
        for &(ref hname, ref value) in &self.headers {
            if !hname.eq_ignore_ascii_case("Cookie") {
                continue;
            }
            let value = match str::from_utf8(value) {
                Ok(v) => v,
                Err(_) => continue,
            };
            for pair in value.split(';') {
                let pair = pair.trim();
                if let Some(eq) = pair.find('=') {
                    if &pair[..eq] == name {
                        return Some(&pair[eq + 1..]);
                    }
                }
            }
        }
        None
    }
    /// How the request body is framed
    pub fn body_kind(&self) -> BodyKind {
        self.body_kind
    }
    /// True if this request forbids reusing the connection
    pub fn connection_close(&self) -> bool {
        self.connection_close
    }
    /// True if the client sent an `Expect: 100-continue` header
    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }
    /// True for HEAD requests (response body bytes will be dropped)
    pub fn is_head(&self) -> bool {
        self.method == Method::Head
    }
}

// Splits the request target into a decoded path and parsed query pairs.
// Origin form (`/a/b?x=y`), absolute form (`http://host/a/b`) and the
// bare asterisk are accepted; the authority form is only used by CONNECT
// which is rejected earlier.
fn parse_target(target: &str)
    -> Result<(String, Vec<(String, String)>, Option<String>), Error>
{
    let (authority, rest) = if target.starts_with("/") || target == "*" {
        (None, target)
    } else if target.starts_with("http://") {
        let tail = &target[7..];
        match tail.find(|c| c == '/' || c == '?') {
            Some(idx) => (Some(&tail[..idx]), &tail[idx..]),
            None => (Some(tail), "/"),
        }
    } else if target.starts_with("https://") {
        let tail = &target[8..];
        match tail.find(|c| c == '/' || c == '?') {
            Some(idx) => (Some(&tail[..idx]), &tail[idx..]),
            None => (Some(tail), "/"),
        }
    } else {
        return Err(Error::BadRequestTarget);
    };
    if let Some(auth) = authority {
        if auth.is_empty() || auth.contains('@') || auth.contains('#') {
            return Err(Error::BadRequestTarget);
        }
    }
    let (path, query) = match rest.find('?') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };
    let path = if path.is_empty() { "/" } else { path };
    let path = percent_decode(path.as_bytes())
        .decode_utf8()
        .map_err(|_| Error::BadRequestTarget)?
        .into_owned();
    let query = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    Ok((path, query, authority.map(|x| x.to_string())))
}

// Implements the body length algorithm for requests:
// http://httpwg.github.io/specs/rfc7230.html#message.body.length
//
// The length of a request body is determined by one of the following
// (in order of precedence):
//
// 1. If the request contains a valid `Transfer-Encoding` header
//    with `chunked` as the last encoding the request is chunked.
// 2. If the request contains a valid `Content-Length` header
//    the request has the given length in octets.
// 3. If neither `Transfer-Encoding` nor `Content-Length` is
//    present the request has an empty body.
fn build_request(raw: &httparse::Request, peer_addr: SocketAddr)
    -> Result<Request, Error>
{
    let method = Method::from(raw.method.unwrap());
    if method == Method::Connect {
        return Err(Error::UnsupportedBody);
    }
    let version = Version::from_httparse(raw.version.unwrap());

    let mut body = BodyKind::Fixed(0);
    let mut has_content_length = false;
    let mut close_token = false;
    let mut keep_alive_token = false;
    let mut host = None;
    let mut host_header_seen = false;
    let mut expect_continue = false;

    for header in raw.headers.iter() {
        if header.name.eq_ignore_ascii_case("Transfer-Encoding") {
            if let Some(enc) = header.value.split(|&x| x == b',').last() {
                if tokens::is_chunked(enc) {
                    if has_content_length {
                        // chunked overrides, but don't allow keep-alive
                        close_token = true;
                    }
                    body = BodyKind::Chunked;
                }
            }
        } else if header.name.eq_ignore_ascii_case("Content-Length") {
            if has_content_length {
                return Err(Error::DuplicateContentLength);
            }
            has_content_length = true;
            if body != BodyKind::Chunked {
                let s = str::from_utf8(header.value)
                    .map_err(|_| Error::ContentLengthInvalid)?;
                let len = u64::from_str(s.trim())
                    .map_err(|_| Error::ContentLengthInvalid)?;
                body = BodyKind::Fixed(len);
            } else {
                // transfer-encoding has precedence, forbid keep-alive
                close_token = true;
            }
        } else if header.name.eq_ignore_ascii_case("Connection") {
            for token in header.value.split(|&x| x == b',') {
                if tokens::is_close(token) {
                    close_token = true;
                } else if tokens::is_keep_alive(token) {
                    keep_alive_token = true;
                }
            }
        } else if header.name.eq_ignore_ascii_case("Host") {
            if host_header_seen {
                return Err(Error::DuplicateHost);
            }
            host_header_seen = true;
            let value = str::from_utf8(header.value)
                .map_err(|_| Error::HostInvalid)?;
            host = Some(value.to_string());
        } else if header.name.eq_ignore_ascii_case("Expect") {
            if tokens::is_continue(header.value) {
                expect_continue = true;
            }
        }
    }

    let target = raw.path.unwrap();
    let (path, query, authority) = parse_target(target)?;
    if let Some(authority) = authority {
        // the request-line authority wins over the Host header
        host = Some(authority);
    }

    let connection_close = match version {
        Version::Http11 => close_token,
        Version::Http10 => close_token || !keep_alive_token,
    };

    Ok(Request {
        peer_addr: peer_addr,
        method: method,
        raw_path: target.to_string(),
        path: path,
        query: query,
        version: version,
        headers: raw.headers.iter()
            .map(|h| (h.name.to_string(), h.value.to_vec()))
            .collect(),
        host: host,
        body_kind: body,
        connection_close: connection_close,
        expect_continue: expect_continue,
    })
}

/// Try to parse a request head from the front of `buf`
///
/// Returns the request and the number of bytes it occupied, or `None`
/// when the head is not complete yet. The caller consumes the bytes.
pub fn parse_request(buf: &Buf, peer_addr: SocketAddr)
    -> Result<Option<(Request, usize)>, Error>
{
    let mut vec;
    let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut raw = httparse::Request::new(&mut headers);
    let mut result = raw.parse(&buf[..]);
    if matches!(result, Err(httparse::Error::TooManyHeaders)) {
        vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Request::new(&mut vec);
        result = raw.parse(&buf[..]);
    }
    match result? {
        httparse::Status::Complete(bytes) => {
            let req = build_request(&raw, peer_addr)?;
            Ok(Some((req, bytes)))
        }
        httparse::Status::Partial => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use tk_bufstream::Buf;

    use enums::{Method, Version};
    use server::Error;
    use server::codec::BodyKind;
    use super::{Request, parse_request};

    fn addr() -> SocketAddr {
        "127.0.0.1:1234".parse().unwrap()
    }

    fn parse(data: &str) -> Result<Option<(Request, usize)>, Error> {
        let mut buf = Buf::new();
        buf.extend(data.as_bytes());
        parse_request(&buf, addr())
    }

    fn parse_ok(data: &str) -> Request {
        parse(data).unwrap().unwrap().0
    }

    #[test]
    fn simple_get() {
        let req = parse_ok(
            "GET /path HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(*req.method(), Method::Get);
        assert_eq!(req.path(), "/path");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.host(), Some("example.com"));
        assert_eq!(req.body_kind(), BodyKind::Fixed(0));
        assert!(!req.connection_close());
    }

    #[test]
    fn partial() {
        let res = parse("HEAD /path?with=query HTTP/1.1\r\n");
        assert!(res.unwrap().is_none());
    }

    #[test]
    fn query_decoding() {
        let req = parse_ok("GET /echo?a=%26&b=c HTTP/1.0\r\n\r\n");
        assert_eq!(req.query_value("a"), Some("&"));
        assert_eq!(req.query_value("b"), Some("c"));
        assert_eq!(req.query_value("c"), None);
        assert_eq!(req.path(), "/echo");
    }

    #[test]
    fn path_decoding() {
        let req = parse_ok("GET /a%20dir/file%2Btwo HTTP/1.1\r\n\r\n");
        assert_eq!(req.path(), "/a dir/file+two");
        assert_eq!(req.raw_path(), "/a%20dir/file%2Btwo");
    }

    #[test]
    fn query_prefix_lookup() {
        let req = parse_ok(
            "GET /?user_a=1&user_b=2&admin=3 HTTP/1.1\r\n\r\n");
        let users = req.query_values_with_prefix("user_");
        assert_eq!(users, vec![("user_a", "1"), ("user_b", "2")]);
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let req = parse_ok(
            "GET / HTTP/1.1\r\ncOntent-tYpe: text/plain\r\n\r\n");
        assert_eq!(req.header_str("Content-Type"), Some("text/plain"));
        // stored as sent
        assert_eq!(req.headers()[0].0, "cOntent-tYpe");
    }

    #[test]
    fn cookies() {
        let req = parse_ok(
            "GET / HTTP/1.1\r\nCookie: a=1; session=deadbeef\r\n\r\n");
        assert_eq!(req.cookie("session"), Some("deadbeef"));
        assert_eq!(req.cookie("a"), Some("1"));
        assert_eq!(req.cookie("b"), None);
    }

    #[test]
    fn content_length() {
        let req = parse_ok(
            "PUT /u HTTP/1.1\r\nContent-Length: 42\r\n\r\n");
        assert_eq!(req.body_kind(), BodyKind::Fixed(42));
    }

    #[test]
    fn chunked_body() {
        let req = parse_ok(
            "POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(req.body_kind(), BodyKind::Chunked);
    }

    #[test]
    fn duplicate_content_length() {
        let err = parse("PUT / HTTP/1.1\r\nContent-Length: 1\r\n\
                         Content-Length: 2\r\n\r\n").unwrap_err();
        assert_matches!(err, Error::DuplicateContentLength);
    }

    #[test]
    fn keep_alive_defaults() {
        assert!(parse_ok("GET / HTTP/1.0\r\n\r\n").connection_close());
        assert!(!parse_ok("GET / HTTP/1.1\r\n\r\n").connection_close());
        assert!(!parse_ok("GET / HTTP/1.0\r\n\
            Connection: keep-alive\r\n\r\n").connection_close());
        assert!(parse_ok("GET / HTTP/1.1\r\n\
            Connection: close\r\n\r\n").connection_close());
    }

    #[test]
    fn absolute_form() {
        let req = parse_ok(
            "GET http://example.com:8080/hello?x=1 HTTP/1.1\r\n\r\n");
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.host(), Some("example.com:8080"));
        assert_eq!(req.query_value("x"), Some("1"));
    }

    #[test]
    fn connect_rejected() {
        let err = parse("CONNECT example.com:443 HTTP/1.1\r\n\r\n")
            .unwrap_err();
        assert_matches!(err, Error::UnsupportedBody);
    }

    #[test]
    fn bad_target() {
        let err = parse("GET ftp://example.com/x HTTP/1.1\r\n\r\n")
            .unwrap_err();
        assert_matches!(err, Error::BadRequestTarget);
    }
}
