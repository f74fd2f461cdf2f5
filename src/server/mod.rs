//! HTTP server protocol implementation
//!
//! The entry point here is `Proto`: a future that owns one accepted
//! socket and services requests on it until the connection closes. Most
//! applications don't create it directly but let the
//! [`daemon`](../daemon/index.html) module do it; implementing a
//! [`Dispatcher`](trait.Dispatcher.html) (or using the
//! [`buffered`](buffered/index.html) shortcut) is the part that's always
//! yours.

mod body;
mod codec;
mod config;
mod error;
mod error_page;
mod proto;
mod request;
mod response;
pub mod buffered;

pub use self::codec::{Dispatcher, Codec, RecvMode, BodyKind};
pub use self::config::Config;
pub use self::error::{Error, Termination};
pub use self::proto::Proto;
pub use self::request::Request;
pub use self::response::{Response, Body, StreamChunk};
