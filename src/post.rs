//! Streaming decoder for POST request bodies
//!
//! `PostProcessor` turns an `application/x-www-form-urlencoded` or
//! `multipart/form-data` body into a sequence of field events without
//! ever buffering a whole field. Feed it body chunks exactly as they
//! arrive from `Codec::data_received`; the iterator callback sees
//! `(name, data, offset)` tuples whose cumulative data reassembles each
//! field value, while internal memory stays bounded by the configured
//! buffer size no matter how large the upload is.
//!
//! The buffer size must leave room for the multipart boundary machinery
//! and for the largest part-header block; too small a buffer fails
//! loudly (`BufferTooSmall` at creation, `FieldTooLarge` while
//! processing), it never truncates silently.

use std::str;

use httparse;
use tk_bufstream::Buf;

const PART_HEADERS_MAX: usize = 32;


quick_error! {
    /// Error decoding a POST body
    #[derive(Debug)]
    pub enum PostError {
        /// The buffer size can't even hold the boundary machinery
        BufferTooSmall {
            description("post buffer is too small for the boundary")
        }
        /// Content type is neither urlencoded nor multipart/form-data
        UnsupportedContentType {
            description("unsupported content type for post processing")
        }
        /// Multipart structure is broken
        Malformed {
            description("malformed post body")
        }
        /// A field name or part-header block exceeds the buffer size
        FieldTooLarge {
            description("post field does not fit the buffer")
        }
        /// The iterator callback asked to stop
        Aborted {
            description("post processing aborted by the iterator")
        }
        /// The body ended before the closing multipart boundary
        Truncated {
            description("post body ended prematurely")
        }
    }
}

/// One slice of one field's value, as passed to the iterator
///
/// `offset` is the cumulative byte offset of `data` within the decoded
/// value of this field, so multi-call reassembly needs no buffering.
#[derive(Debug)]
pub struct FieldData<'a> {
    /// Field name (the `name` parameter of the form field)
    pub name: &'a str,
    /// Original file name, for file-upload fields
    pub filename: Option<&'a str>,
    /// Content type of the part, when the client sent one
    pub content_type: Option<&'a str>,
    /// Content transfer encoding of the part, when sent
    pub transfer_encoding: Option<&'a str>,
    /// The bytes of this slice of the value
    pub data: &'a [u8],
    /// Offset of `data` within the whole value
    pub offset: u64,
}

#[derive(Debug, Clone, Default)]
struct FieldMeta {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    transfer_encoding: Option<String>,
}

enum UrlPhase {
    Key,
    Value { emitted: bool },
}

struct UrlState {
    phase: UrlPhase,
    key: String,
    offset: u64,
}

enum MultipartPhase {
    Preamble,
    PartHeaders,
    PartData { emitted: bool },
    Epilogue,
}

struct MultipartState {
    boundary: Vec<u8>,
    phase: MultipartPhase,
    field: FieldMeta,
    offset: u64,
}

enum Kind {
    UrlEncoded(UrlState),
    Multipart(MultipartState),
}

/// Incremental decoder of one request body
///
/// Created per request, fed with `process()` once per arriving chunk,
/// finished with `complete()` when the body ends.
pub struct PostProcessor<F> {
    buffer_size: usize,
    scratch: Buf,
    kind: Kind,
    iterator: F,
}

impl<F> std::fmt::Debug for PostProcessor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PostProcessor")
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

// Decode a complete urlencoded slice: '+' and %XX escapes; an invalid
// escape is passed through literally. Callers hold back a trailing
// partial escape (see `partial_escape_len`), so completeness is given.
fn decode_whole(data: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < data.len() => {
                match (hex_value(data[i + 1]), hex_value(data[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
}

// Matches an ASCII prefix of a header value case-insensitively
fn value_starts_with(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()]
            .eq_ignore_ascii_case(prefix.as_bytes())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..haystack.len() - needle.len() + 1)
        .position(|i| &haystack[i..i + needle.len()] == needle)
}

// Strips `value` of surrounding double quotes, if any
fn unquote(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn content_disposition(value: &str) -> Option<FieldMeta> {
    let mut parts = value.split(';');
    let kind = parts.next().unwrap_or("").trim();
    if !kind.eq_ignore_ascii_case("form-data") {
        return None;
    }
    let mut meta = FieldMeta::default();
    let mut has_name = false;
    for param in parts {
        let param = param.trim();
        if let Some(eq) = param.find('=') {
            let key = param[..eq].trim();
            let value = unquote(&param[eq + 1..]);
            if key.eq_ignore_ascii_case("name") {
                meta.name = value.to_string();
                has_name = true;
            } else if key.eq_ignore_ascii_case("filename") {
                meta.filename = Some(value.to_string());
            }
        }
    }
    if has_name { Some(meta) } else { None }
}

// The boundary parameter of a multipart content type, unquoted
fn boundary_param(content_type: &str) -> Option<Vec<u8>> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if let Some(eq) = param.find('=') {
            if param[..eq].trim().eq_ignore_ascii_case("boundary") {
                let value = unquote(&param[eq + 1..]);
                if !value.is_empty() && value.len() <= 70 {
                    return Some(value.as_bytes().to_vec());
                }
            }
        }
    }
    None
}

impl<F> PostProcessor<F>
    where F: FnMut(&FieldData) -> bool,
{
    /// Create a processor for a body of the given content type
    ///
    /// `buffer_size` bounds all internal buffering. For multipart bodies
    /// it must fit the boundary plus a small margin, and every
    /// part-header block must fit it too.
    pub fn new(content_type: &str, buffer_size: usize, iterator: F)
        -> Result<PostProcessor<F>, PostError>
    {
        let trimmed = content_type.trim();
        let kind = if value_starts_with(trimmed,
            "application/x-www-form-urlencoded")
        {
            Kind::UrlEncoded(UrlState {
                phase: UrlPhase::Key,
                key: String::new(),
                offset: 0,
            })
        } else if value_starts_with(trimmed, "multipart/form-data") {
            let boundary = boundary_param(trimmed)
                .ok_or(PostError::Malformed)?;
            if buffer_size < boundary.len() + 8 {
                return Err(PostError::BufferTooSmall);
            }
            Kind::Multipart(MultipartState {
                boundary: boundary,
                phase: MultipartPhase::Preamble,
                field: FieldMeta::default(),
                offset: 0,
            })
        } else {
            return Err(PostError::UnsupportedContentType);
        };
        if buffer_size < 8 {
            return Err(PostError::BufferTooSmall);
        }
        Ok(PostProcessor {
            buffer_size: buffer_size,
            scratch: Buf::new(),
            kind: kind,
            iterator: iterator,
        })
    }

    /// Feed the next chunk of the body
    ///
    /// Chunking is arbitrary: one call for the whole body and one call
    /// per byte decode identically.
    pub fn process(&mut self, data: &[u8]) -> Result<(), PostError> {
        let mut rest = data;
        loop {
            self.advance(false)?;
            if rest.is_empty() {
                return Ok(());
            }
            let free = self.buffer_size - self.scratch.len();
            if free == 0 {
                // advance() drained what it could; a full buffer now
                // means a single element doesn't fit
                return Err(PostError::FieldTooLarge);
            }
            let take = ::std::cmp::min(free, rest.len());
            self.scratch.extend(&rest[..take]);
            rest = &rest[take..];
        }
    }

    /// Finish the body
    ///
    /// Matches the classic "process the empty tail, then destroy"
    /// sequence: flushes the final field of an urlencoded body and
    /// verifies a multipart body reached its closing boundary.
    pub fn complete(mut self) -> Result<(), PostError> {
        self.advance(true)?;
        match self.kind {
            Kind::UrlEncoded(..) => Ok(()),
            Kind::Multipart(ref state) => {
                match state.phase {
                    MultipartPhase::Epilogue => Ok(()),
                    // an empty body has no fields and no closing
                    // boundary to miss
                    MultipartPhase::Preamble
                        if self.scratch.len() == 0 => Ok(()),
                    _ => Err(PostError::Truncated),
                }
            }
        }
    }

    fn advance(&mut self, at_end: bool) -> Result<(), PostError> {
        let PostProcessor {
            ref mut scratch,
            ref mut kind,
            ref mut iterator,
            buffer_size,
        } = *self;
        match *kind {
            Kind::UrlEncoded(ref mut state) => {
                urlencoded_advance(
                    state, scratch, iterator, buffer_size, at_end)
            }
            Kind::Multipart(ref mut state) => {
                multipart_advance(
                    state, scratch, iterator, buffer_size, at_end)
            }
        }
    }
}

fn emit_url_field<F>(iterator: &mut F, key: &str, data: &[u8], offset: u64)
    -> Result<(), PostError>
    where F: FnMut(&FieldData) -> bool,
{
    let go = iterator(&FieldData {
        name: key,
        filename: None,
        content_type: None,
        transfer_encoding: None,
        data: data,
        offset: offset,
    });
    if go { Ok(()) } else { Err(PostError::Aborted) }
}

fn urlencoded_advance<F>(state: &mut UrlState, scratch: &mut Buf,
    iterator: &mut F, buffer_size: usize, at_end: bool)
    -> Result<(), PostError>
    where F: FnMut(&FieldData) -> bool,
{
    loop {
        match state.phase {
            UrlPhase::Key => {
                let split = scratch[..].iter()
                    .position(|&b| b == b'=' || b == b'&');
                match split {
                    Some(idx) => {
                        let separator = scratch[..][idx];
                        {
                            let mut key_bytes = Vec::new();
                            decode_whole(&scratch[..idx], &mut key_bytes);
                            state.key = String::from_utf8_lossy(&key_bytes)
                                .into_owned();
                        }
                        scratch.consume(idx + 1);
                        if separator == b'=' {
                            state.offset = 0;
                            state.phase = UrlPhase::Value {
                                emitted: false,
                            };
                        } else if !state.key.is_empty() {
                            // a key without '=': a flag-style field
                            emit_url_field(iterator, &state.key, b"", 0)?;
                        }
                    }
                    None => {
                        if scratch.len() >= buffer_size {
                            return Err(PostError::FieldTooLarge);
                        }
                        if at_end && scratch.len() > 0 {
                            let mut key_bytes = Vec::new();
                            decode_whole(&scratch[..], &mut key_bytes);
                            let len = scratch.len();
                            scratch.consume(len);
                            state.key = String::from_utf8_lossy(&key_bytes)
                                .into_owned();
                            emit_url_field(iterator, &state.key, b"", 0)?;
                        }
                        return Ok(());
                    }
                }
            }
            UrlPhase::Value { emitted } => {
                let split = scratch[..].iter().position(|&b| b == b'&');
                let (end, is_final) = match split {
                    Some(idx) => (idx, true),
                    None => (scratch.len(), at_end),
                };
                // a %-escape cut off at the edge stays for next time
                let decodable = if is_final {
                    end
                } else {
                    end - partial_escape_len(&scratch[..end])
                };
                let mut decoded = Vec::new();
                decode_whole(&scratch[..decodable], &mut decoded);
                if decoded.len() > 0 || (is_final && !emitted) {
                    emit_url_field(iterator, &state.key, &decoded,
                        state.offset)?;
                    state.offset += decoded.len() as u64;
                    state.phase = UrlPhase::Value { emitted: true };
                }
                scratch.consume(decodable);
                if is_final && split.is_some() {
                    scratch.consume(1);  // the '&'
                    state.phase = UrlPhase::Key;
                } else {
                    return Ok(());
                }
            }
        }
    }
}

// Number of bytes at the end of `data` that form an incomplete %XX
fn partial_escape_len(data: &[u8]) -> usize {
    let len = data.len();
    if len >= 1 && data[len - 1] == b'%' {
        1
    } else if len >= 2 && data[len - 2] == b'%' {
        2
    } else {
        0
    }
}

fn emit_part_data<F>(iterator: &mut F, field: &FieldMeta, data: &[u8],
    offset: u64)
    -> Result<(), PostError>
    where F: FnMut(&FieldData) -> bool,
{
    let go = iterator(&FieldData {
        name: &field.name,
        filename: field.filename.as_ref().map(|x| &x[..]),
        content_type: field.content_type.as_ref().map(|x| &x[..]),
        transfer_encoding:
            field.transfer_encoding.as_ref().map(|x| &x[..]),
        data: data,
        offset: offset,
    });
    if go { Ok(()) } else { Err(PostError::Aborted) }
}

fn multipart_advance<F>(state: &mut MultipartState, scratch: &mut Buf,
    iterator: &mut F, buffer_size: usize, at_end: bool)
    -> Result<(), PostError>
    where F: FnMut(&FieldData) -> bool,
{
    let _ = at_end;
    loop {
        match state.phase {
            MultipartPhase::Preamble => {
                // the first boundary line: "--boundary", at the start
                // of the body or of a line
                let opening_len = 2 + state.boundary.len();
                let decision = {
                    let data = &scratch[..];
                    let mut decision = None;
                    let mut from = 0;
                    while let Some(rel) = find_boundary(
                        &data[from..], &state.boundary)
                    {
                        let idx = from + rel;
                        let at_line_start = idx == 0 || (idx >= 2
                            && &data[idx - 2..idx] == b"\r\n");
                        if at_line_start {
                            match after_boundary(
                                &data[idx + opening_len..])
                            {
                                // a boundary-looking line that isn't
                                // one is still preamble
                                AfterBoundary::Garbage => {}
                                other => {
                                    decision = Some((idx, other));
                                    break;
                                }
                            }
                        }
                        from = idx + 1;
                    }
                    decision
                };
                match decision {
                    None => {
                        // drop preamble bytes that can't begin the
                        // boundary anymore
                        let keep = opening_len + 2;
                        if scratch.len() > keep {
                            let drop = scratch.len() - keep;
                            scratch.consume(drop);
                        }
                        return Ok(());
                    }
                    Some((idx, AfterBoundary::More)) => {
                        // the line is cut off; the junk before it can
                        // go already
                        scratch.consume(idx);
                        return Ok(());
                    }
                    Some((idx, AfterBoundary::NextPart(skip))) => {
                        scratch.consume(idx + opening_len + skip);
                        state.phase = MultipartPhase::PartHeaders;
                    }
                    Some((idx, AfterBoundary::Final(skip))) => {
                        scratch.consume(idx + opening_len + skip);
                        state.phase = MultipartPhase::Epilogue;
                    }
                    Some((_, AfterBoundary::Garbage)) => unreachable!(),
                }
            }
            MultipartPhase::PartHeaders => {
                let block_end = find(&scratch[..], b"\r\n\r\n");
                let block_end = match block_end {
                    Some(idx) => idx + 4,
                    None => {
                        if scratch.len() >= buffer_size {
                            return Err(PostError::FieldTooLarge);
                        }
                        return Ok(());
                    }
                };
                state.field = parse_part_headers(&scratch[..block_end])?;
                state.offset = 0;
                scratch.consume(block_end);
                state.phase = MultipartPhase::PartData { emitted: false };
            }
            MultipartPhase::PartData { emitted } => {
                // the delimiter that ends this part's data
                let marker_len = 4 + state.boundary.len();
                let found = find_delimiter(&scratch[..], &state.boundary);
                match found {
                    Some(idx) => {
                        // everything before the delimiter is data
                        match after_boundary(&scratch[idx + marker_len..])
                        {
                            AfterBoundary::More => return Ok(()),
                            AfterBoundary::NextPart(skip) => {
                                if idx > 0 || !emitted {
                                    emit_part_data(iterator, &state.field,
                                        &scratch[..idx], state.offset)?;
                                }
                                scratch.consume(idx + marker_len + skip);
                                state.phase = MultipartPhase::PartHeaders;
                            }
                            AfterBoundary::Final(skip) => {
                                if idx > 0 || !emitted {
                                    emit_part_data(iterator, &state.field,
                                        &scratch[..idx], state.offset)?;
                                }
                                scratch.consume(idx + marker_len + skip);
                                state.phase = MultipartPhase::Epilogue;
                            }
                            AfterBoundary::Garbage => {
                                // it looked like a delimiter but isn't
                                // one; the bytes are part data
                                emit_part_data(iterator, &state.field,
                                    &scratch[..idx + 1], state.offset)?;
                                state.offset += (idx + 1) as u64;
                                state.phase = MultipartPhase::PartData {
                                    emitted: true,
                                };
                                scratch.consume(idx + 1);
                            }
                        }
                    }
                    None => {
                        // emit all bytes that can't be part of a
                        // delimiter yet
                        let keep = marker_len + 1;
                        if scratch.len() > keep {
                            let safe = scratch.len() - keep;
                            emit_part_data(iterator, &state.field,
                                &scratch[..safe], state.offset)?;
                            state.offset += safe as u64;
                            state.phase = MultipartPhase::PartData {
                                emitted: true,
                            };
                            scratch.consume(safe);
                        }
                        return Ok(());
                    }
                }
            }
            MultipartPhase::Epilogue => {
                // everything after the closing boundary is ignored
                let len = scratch.len();
                scratch.consume(len);
                return Ok(());
            }
        }
    }
}

enum AfterBoundary {
    /// Not enough bytes to decide yet
    More,
    /// CRLF seen; skip this many bytes, a part follows
    NextPart(usize),
    /// `--` seen; skip this many bytes, the body is over
    Final(usize),
    /// Neither a delimiter nor transport padding
    Garbage,
}

// Looks at the bytes right after "--boundary" to classify the line.
// Transport padding (spaces and tabs) before the CRLF is allowed.
fn after_boundary(data: &[u8]) -> AfterBoundary {
    if data.len() >= 2 && &data[..2] == b"--" {
        return AfterBoundary::Final(2);
    }
    if data.len() < 2 && (data.is_empty() || data[0] == b'-') {
        return AfterBoundary::More;
    }
    let mut skip = 0;
    while skip < data.len()
        && (data[skip] == b' ' || data[skip] == b'\t')
    {
        skip += 1;
    }
    if data.len() - skip < 2 {
        return AfterBoundary::More;
    }
    if &data[skip..skip + 2] == b"\r\n" {
        AfterBoundary::NextPart(skip + 2)
    } else {
        AfterBoundary::Garbage
    }
}

fn find_boundary(data: &[u8], boundary: &[u8]) -> Option<usize> {
    let mut needle = Vec::with_capacity(2 + boundary.len());
    needle.extend_from_slice(b"--");
    needle.extend_from_slice(boundary);
    find(data, &needle)
}

fn find_delimiter(data: &[u8], boundary: &[u8]) -> Option<usize> {
    let mut needle = Vec::with_capacity(4 + boundary.len());
    needle.extend_from_slice(b"\r\n--");
    needle.extend_from_slice(boundary);
    find(data, &needle)
}

fn parse_part_headers(block: &[u8]) -> Result<FieldMeta, PostError> {
    let mut headers = [httparse::EMPTY_HEADER; PART_HEADERS_MAX];
    let parsed = httparse::parse_headers(block, &mut headers)
        .map_err(|_| PostError::Malformed)?;
    let headers = match parsed {
        httparse::Status::Complete((_, headers)) => headers,
        httparse::Status::Partial => return Err(PostError::Malformed),
    };
    let mut meta = None;
    let mut content_type = None;
    let mut transfer_encoding = None;
    for header in headers {
        let value = str::from_utf8(header.value)
            .map_err(|_| PostError::Malformed)?;
        if header.name.eq_ignore_ascii_case("Content-Disposition") {
            meta = content_disposition(value);
        } else if header.name.eq_ignore_ascii_case("Content-Type") {
            content_type = Some(value.trim().to_string());
        } else if header.name
            .eq_ignore_ascii_case("Content-Transfer-Encoding")
        {
            transfer_encoding = Some(value.trim().to_string());
        }
    }
    let mut meta = meta.ok_or(PostError::Malformed)?;
    meta.content_type = content_type;
    meta.transfer_encoding = transfer_encoding;
    Ok(meta)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{PostError, PostProcessor};

    #[derive(Debug, PartialEq, Clone)]
    struct Event {
        name: String,
        filename: Option<String>,
        content_type: Option<String>,
        data: Vec<u8>,
        offset: u64,
    }

    fn collect(content_type: &str, buffer_size: usize, chunks: &[&[u8]])
        -> Result<Vec<Event>, PostError>
    {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let mut proc = PostProcessor::new(content_type, buffer_size,
            move |field| {
                sink.borrow_mut().push(Event {
                    name: field.name.to_string(),
                    filename: field.filename.map(|x| x.to_string()),
                    content_type: field.content_type.map(|x| x.to_string()),
                    data: field.data.to_vec(),
                    offset: field.offset,
                });
                true
            })?;
        for chunk in chunks {
            proc.process(chunk)?;
        }
        proc.process(b"")?;
        proc.complete()?;
        let events = events.borrow();
        Ok(events.clone())
    }

    // reassemble per-field values from the event stream, checking offsets
    fn fields(events: &[Event]) -> Vec<(String, Vec<u8>)> {
        let mut result: Vec<(String, Vec<u8>)> = Vec::new();
        for event in events {
            let fresh = match result.last() {
                Some(&(ref name, ref value)) => {
                    name != &event.name
                        || event.offset != value.len() as u64
                }
                None => true,
            };
            if fresh {
                assert_eq!(event.offset, 0);
                result.push((event.name.clone(), event.data.clone()));
            } else {
                let last = result.last_mut().unwrap();
                assert_eq!(event.offset, last.1.len() as u64);
                last.1.extend_from_slice(&event.data);
            }
        }
        result
    }

    const URLENCODED: &'static str = "application/x-www-form-urlencoded";

    #[test]
    fn urlencoded_simple() {
        let events = collect(URLENCODED, 64, &[b"a=%26&b=c"]).unwrap();
        assert_eq!(fields(&events), vec![
            ("a".to_string(), b"&".to_vec()),
            ("b".to_string(), b"c".to_vec()),
        ]);
    }

    #[test]
    fn urlencoded_byte_by_byte() {
        let body = b"name=hello+world&empty=&flag&pct=100%25";
        let chunks = body.iter()
            .map(|b| ::std::slice::from_ref(b))
            .collect::<Vec<_>>();
        let events = collect(URLENCODED, 16, &chunks).unwrap();
        assert_eq!(fields(&events), vec![
            ("name".to_string(), b"hello world".to_vec()),
            ("empty".to_string(), b"".to_vec()),
            ("flag".to_string(), b"".to_vec()),
            ("pct".to_string(), b"100%".to_vec()),
        ]);
    }

    #[test]
    fn urlencoded_large_value_bounded() {
        let mut body = b"key=".to_vec();
        body.extend(vec![b'x'; 10000]);
        let events = collect(URLENCODED, 32, &[&body]).unwrap();
        let total: usize = events.iter().map(|e| e.data.len()).sum();
        assert_eq!(total, 10000);
        for event in &events {
            assert!(event.data.len() <= 32);
            assert_eq!(event.name, "key");
        }
    }

    #[test]
    fn urlencoded_key_too_large() {
        let mut body = vec![b'k'; 100];
        body.push(b'=');
        let err = collect(URLENCODED, 32, &[&body]).unwrap_err();
        assert_matches!(err, PostError::FieldTooLarge);
    }

    const MULTIPART: &'static str =
        "multipart/form-data; boundary=AaB03x";

    fn multipart_body() -> Vec<u8> {
        b"--AaB03x\r\n\
          Content-Disposition: form-data; name=\"field1\"\r\n\
          \r\n\
          value1\r\n\
          --AaB03x\r\n\
          Content-Disposition: form-data; name=\"pics\"; \
              filename=\"file1.txt\"\r\n\
          Content-Type: text/plain\r\n\
          \r\n\
          file contents\r\nwith a line break\r\n\
          --AaB03x--\r\n".to_vec()
    }

    #[test]
    fn multipart_whole_body() {
        let body = multipart_body();
        let events = collect(MULTIPART, 64, &[&body]).unwrap();
        assert_eq!(fields(&events), vec![
            ("field1".to_string(), b"value1".to_vec()),
            ("pics".to_string(),
             b"file contents\r\nwith a line break".to_vec()),
        ]);
        let pic = events.iter().find(|e| e.name == "pics").unwrap();
        assert_eq!(pic.filename.as_ref().unwrap(), "file1.txt");
        assert_eq!(pic.content_type.as_ref().unwrap(), "text/plain");
    }

    #[test]
    fn multipart_byte_by_byte() {
        let body = multipart_body();
        let chunks = body.iter()
            .map(|b| ::std::slice::from_ref(b))
            .collect::<Vec<_>>();
        let events = collect(MULTIPART, 64, &chunks).unwrap();
        assert_eq!(fields(&events), vec![
            ("field1".to_string(), b"value1".to_vec()),
            ("pics".to_string(),
             b"file contents\r\nwith a line break".to_vec()),
        ]);
    }

    #[test]
    fn multipart_large_upload_bounded() {
        let mut body = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"file\"; \
                filename=\"big.bin\"\r\n\
            \r\n".to_vec();
        let payload = (0..100000u32)
            .map(|i| (i % 251) as u8)
            .filter(|&b| b != b'\r')
            .collect::<Vec<_>>();
        body.extend_from_slice(&payload);
        body.extend_from_slice(b"\r\n--AaB03x--\r\n");
        let buffer_size = 128;
        let events = collect(MULTIPART, buffer_size,
            &body.chunks(977).collect::<Vec<_>>()).unwrap();
        let mut reassembled = Vec::new();
        for event in &events {
            assert!(event.data.len() <= buffer_size);
            assert_eq!(event.offset, reassembled.len() as u64);
            reassembled.extend_from_slice(&event.data);
        }
        assert_eq!(reassembled.len(), payload.len());
        assert!(reassembled == payload);
    }

    #[test]
    fn multipart_empty_field_emits_once() {
        let body = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"empty\"\r\n\
            \r\n\
            \r\n\
            --AaB03x--\r\n";
        let events = collect(MULTIPART, 64, &[&body[..]]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "empty");
        assert_eq!(events[0].data, b"");
        assert_eq!(events[0].offset, 0);
    }

    #[test]
    fn multipart_buffer_too_small() {
        let err = PostProcessor::new(MULTIPART, 4, |_| true).unwrap_err();
        assert_matches!(err, PostError::BufferTooSmall);
    }

    #[test]
    fn multipart_headers_too_large() {
        let mut body = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"x\"; filename=\""
            .to_vec();
        body.extend(vec![b'a'; 500]);
        body.extend_from_slice(b"\"\r\n\r\nv\r\n--AaB03x--\r\n");
        let err = collect(MULTIPART, 64, &[&body]).unwrap_err();
        assert_matches!(err, PostError::FieldTooLarge);
    }

    #[test]
    fn multipart_truncated() {
        let body = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"x\"\r\n\
            \r\n\
            oops";
        let err = collect(MULTIPART, 64, &[&body[..]]).unwrap_err();
        assert_matches!(err, PostError::Truncated);
    }

    #[test]
    fn abort_from_iterator() {
        let mut proc = PostProcessor::new(URLENCODED, 64,
            |_| false).unwrap();
        let err = proc.process(b"a=1&b=2").unwrap_err();
        assert_matches!(err, PostError::Aborted);
    }

    #[test]
    fn missing_boundary_param() {
        let err = PostProcessor::new("multipart/form-data", 64, |_| true)
            .unwrap_err();
        assert_matches!(err, PostError::Malformed);
    }

    #[test]
    fn unsupported_content_type() {
        let err = PostProcessor::new("application/json", 64, |_| true)
            .unwrap_err();
        assert_matches!(err, PostError::UnsupportedContentType);
    }
}
