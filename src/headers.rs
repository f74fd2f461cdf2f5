//! Helpers for matching well-known header names and values
//!
//! Header values come in as raw byte sequences, so the matchers here
//! compare case-insensitively and tolerate surrounding whitespace without
//! allocating or decoding first.

fn is_lws(ch: u8) -> bool {
    matches!(ch, b'\r' | b'\n' | b' ' | b'\t')
}

// Matches a single token, i.e. `val` must be the token surrounded by
// nothing but (linear) whitespace. Comma-separated lists are split by
// the callers.
fn token_is(val: &[u8], token: &str) -> bool {
    let start = match val.iter().position(|&ch| !is_lws(ch)) {
        Some(idx) => idx,
        None => return false,
    };
    let end = val.iter().rposition(|&ch| !is_lws(ch)).unwrap() + 1;
    let val = &val[start..end];
    if val.len() != token.len() {
        return false;
    }
    val.iter().zip(token.as_bytes().iter())
        .all(|(&a, &b)| a.to_ascii_lowercase() == b)
}

pub fn is_chunked(val: &[u8]) -> bool {
    token_is(val, "chunked")
}

pub fn is_close(val: &[u8]) -> bool {
    token_is(val, "close")
}

pub fn is_keep_alive(val: &[u8]) -> bool {
    token_is(val, "keep-alive")
}

pub fn is_continue(val: &[u8]) -> bool {
    token_is(val, "100-continue")
}
