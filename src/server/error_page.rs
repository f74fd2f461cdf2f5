//! The built-in minimal error page
//!
//! Sent on a best-effort basis when a request fails before the handler
//! produced a response. If the output buffer already holds part of a
//! real response it's too late and the connection is just closed.

use std::io::Write;

use tk_bufstream::Buf;

use enums::{Status, Version};
use serializer::MessageState;

const PART1: &'static str = "\
    <!DOCTYPE html>\
    <html>\
        <head>\
            <title>\
    ";
const PART2: &'static str = "\
            </title>\
        </head>\
        <body>\
            <h1>\
    ";
const PART3: &'static str = concat!("\
            </h1>\
            <hr>\
            <p>Yours faithfully,<br>\
                tk-httpd/", env!("CARGO_PKG_VERSION"), "\
            </p>\
        </body>\
    </html>\
    ");

/// Write a full error response into the output buffer
///
/// The page always carries `Connection: close`; the caller closes the
/// connection after flushing whatever the socket accepts.
pub fn write_error_page(status: Status, buf: &mut Buf, version: Version) {
    let code = status.code();
    let reason = status.reason();
    let content_length = PART1.len() + PART2.len() + PART3.len()
        + 2 * (4 + reason.len());
    let mut msg = MessageState::response_start(version, false, true);
    msg.response_status(buf, code, reason);
    msg.add_length(buf, content_length as u64).unwrap();
    msg.add_header(buf, "Content-Type", b"text/html").unwrap();
    if msg.done_headers(buf).unwrap() {
        write!(buf, "{p1}{code:03} {reason}{p2}{code:03} {reason}{p3}",
               code=code, reason=reason, p1=PART1, p2=PART2, p3=PART3)
            .expect("writing to a buffer always succeeds");
    }
    msg.done(buf);
}
