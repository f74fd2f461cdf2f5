//! An embeddable HTTP/1.x serving daemon based on `tokio` tools
//!
//! The crate is split in three layers:
//!
//! * [`server`](server/index.html): the per-connection protocol core,
//!   incremental request parsing, the `Dispatcher`/`Codec` handler traits
//!   and the `Response` sum type
//! * [`daemon`](daemon/index.html): socket ownership and threading
//!   strategies (external reactor, internal thread, thread per connection,
//!   worker pool), all driving the same connection routine
//! * [`post`](post/index.html): a bounded-memory streaming decoder for
//!   `application/x-www-form-urlencoded` and `multipart/form-data` bodies
#![recursion_limit="100"]

extern crate futures;
extern crate url;
extern crate httparse;
extern crate tokio_core;
extern crate tokio_io;
extern crate netbuf;
extern crate tk_bufstream;
extern crate tk_listen;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;
#[cfg(feature="date_header")] extern crate httpdate;

pub mod server;
pub mod daemon;
pub mod post;
pub mod timer;
mod enums;
mod headers;
mod serializer;
mod chunked;

pub use enums::{Version, Status, Method};
