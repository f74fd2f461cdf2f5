use std::io;

use httparse;

use enums::Status;


quick_error! {
    /// Connection-level error
    ///
    /// Any of these is fatal to the connection it happened on and to
    /// nothing else.
    #[derive(Debug)]
    pub enum Error {
        /// Socket IO error
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        /// Error parsing http headers
        ParseError(err: httparse::Error) {
            description("parse error")
            display("parse error: {:?}", err)
            from()
        }
        /// Error parsing http chunk
        ChunkParseError(err: httparse::InvalidChunkSize) {
            description("chunk size parse error")
            display("chunk size parse error")
            from()
        }
        /// Peer closed the connection in the middle of a request
        ConnectionReset {
            description("connection reset")
        }
        /// Bad request target (middle part of the request line)
        BadRequestTarget {
            description("error parsing request target")
        }
        /// Host header is invalid (non-utf-8 for example)
        HostInvalid {
            description("invalid host header")
        }
        /// Duplicate host header in request
        DuplicateHost {
            description("duplicate host header")
        }
        /// Content length header is invalid (non-integer, or > 64bit)
        ContentLengthInvalid {
            description("invalid content-length header")
        }
        /// Duplicate content-length header, prohibited for security
        DuplicateContentLength {
            description("duplicate content-length header")
        }
        /// Unsupported kind of request body (CONNECT, upgrades)
        UnsupportedBody {
            description("this kind of request body is not supported")
        }
        /// Request headers don't fit the connection memory limit
        HeadersTooLarge {
            description("request headers are too large")
        }
        /// Request body is larger than the limit given to
        /// `RecvMode::buffered_upfront`
        RequestTooLong {
            description("request body is too big")
        }
        /// The handler signalled an unrecoverable application condition
        Application(reason: &'static str) {
            description("application error")
            display("application error: {}", reason)
        }
    }
}

impl Error {
    /// Best-effort status for the error page sent before closing
    ///
    /// `None` means the connection is beyond replying (I/O failed or the
    /// peer is gone).
    pub fn error_status(&self) -> Option<Status> {
        use self::Error::*;
        match *self {
            Io(..) | ConnectionReset => None,
            ParseError(..) | ChunkParseError(..) | BadRequestTarget |
            HostInvalid | DuplicateHost | ContentLengthInvalid |
            DuplicateContentLength => Some(Status::BadRequest),
            UnsupportedBody => Some(Status::NotImplemented),
            HeadersTooLarge => Some(Status::RequestHeaderFieldsTooLarge),
            RequestTooLong => Some(Status::PayloadTooLarge),
            Application(..) => Some(Status::InternalServerError),
        }
    }
}

/// The reason a request stopped being serviced
///
/// Passed to the completion-notification callback configured with
/// `Config::notify_completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Response was sent completely
    Completed,
    /// Connection-level or application error ended the exchange
    WithError,
    /// The idle reaper closed the connection
    TimedOut,
    /// The daemon was stopped while the request was in flight
    Shutdown,
}
