use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use server::Termination;

/// Callback deciding whether a connection from the address is accepted
pub type AcceptPolicy = Arc<Fn(&SocketAddr) -> bool + Send + Sync>;
/// Callback receiving the raw request target of every parsed request
pub type UriLog = Arc<Fn(&SocketAddr, &str) + Send + Sync>;
/// Callback receiving the fate of every request that reached a handler
pub type NotifyCompleted = Arc<Fn(&SocketAddr, Termination) + Send + Sync>;

/// Fine-grained configuration of the HTTP server
///
/// Shared between the daemon and every connection; build one with the
/// setters and freeze it with `done()`.
#[derive(Clone)]
pub struct Config {
    pub(crate) memory_limit: usize,
    pub(crate) connection_timeout: Duration,
    pub(crate) output_watermark: usize,
    pub(crate) connection_limit: usize,
    pub(crate) accept_policy: Option<AcceptPolicy>,
    pub(crate) uri_log: Option<UriLog>,
    pub(crate) notify_completed: Option<NotifyCompleted>,
}

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            memory_limit: 32768,
            connection_timeout: Duration::new(90, 0),
            output_watermark: 65536,
            connection_limit: 1000,
            accept_policy: None,
            uri_log: None,
            notify_completed: None,
        }
    }
    /// Per-connection memory limit in bytes
    ///
    /// Bounds the read buffer: request heads larger than this are
    /// rejected with a 431-class error, and progressive body deliveries
    /// never buffer more than this at once.
    pub fn memory_limit(&mut self, value: usize) -> &mut Self {
        self.memory_limit = value;
        self
    }
    /// Close connections with no socket activity for this long
    pub fn connection_timeout(&mut self, value: Duration) -> &mut Self {
        self.connection_timeout = value;
        self
    }
    /// High-water mark for the output buffer
    ///
    /// Streamed and file responses stop pulling data while this many
    /// bytes are waiting for the socket.
    pub fn output_watermark(&mut self, value: usize) -> &mut Self {
        self.output_watermark = value;
        self
    }
    /// Maximum number of simultaneously open connections
    ///
    /// Connections over the limit are not accepted until others close.
    pub fn connection_limit(&mut self, value: usize) -> &mut Self {
        self.connection_limit = value;
        self
    }
    /// Accept or refuse connections by peer address, before any read
    pub fn accept_policy<F>(&mut self, f: F) -> &mut Self
        where F: Fn(&SocketAddr) -> bool + Send + Sync + 'static
    {
        self.accept_policy = Some(Arc::new(f));
        self
    }
    /// Log the raw request target of every request that parses
    pub fn uri_log<F>(&mut self, f: F) -> &mut Self
        where F: Fn(&SocketAddr, &str) + Send + Sync + 'static
    {
        self.uri_log = Some(Arc::new(f));
        self
    }
    /// Get notified when a request stops being serviced, with the reason
    pub fn notify_completed<F>(&mut self, f: F) -> &mut Self
        where F: Fn(&SocketAddr, Termination) + Send + Sync + 'static
    {
        self.notify_completed = Some(Arc::new(f));
        self
    }
    /// Create an Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

// Callbacks have no useful Debug form, so this lists the scalar knobs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("memory_limit", &self.memory_limit)
            .field("connection_timeout", &self.connection_timeout)
            .field("output_watermark", &self.output_watermark)
            .field("connection_limit", &self.connection_limit)
            .field("accept_policy", &self.accept_policy.is_some())
            .field("uri_log", &self.uri_log.is_some())
            .field("notify_completed", &self.notify_completed.is_some())
            .finish()
    }
}
