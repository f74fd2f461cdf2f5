//! Socket ownership and threading strategies
//!
//! A `Daemon` binds the listen socket and runs one of four scheduling
//! strategies over the same connection routine (`server::Proto`):
//!
//! * [`start_external`](struct.Daemon.html#method.start_external): no
//!   internal threads; the caller's reactor drives accepts and
//!   connections, one `core.turn()` at a time
//! * `Mode::InternalThread`: one background thread with its own reactor
//!   multiplexing all connections
//! * `Mode::ThreadPerConnection`: a blocking accept thread plus one
//!   thread per live connection
//! * `Mode::ThreadPool(n)`: `n` threads, each with its own reactor and
//!   its own clone of the listen socket, so every thread serves a
//!   disjoint shard of the connections
//!
//! Stopping the daemon closes all in-flight connections immediately;
//! their requests are reported as `Termination::Shutdown`.

use std::collections::HashMap;
use std::io;
use std::net::{self, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use futures::future::{ok, Either};
use futures::task::{self, Task};
use futures::{Async, Future, Poll, Stream};
use tk_listen::ListenExt;
use tokio_core::net::{TcpListener, TcpStream};
use tokio_core::reactor::{Core, Handle};

use server::{Config, Dispatcher, Error, Proto};

/// How long the accept loop sleeps after an accept error before retrying
const ACCEPT_ERROR_SLEEP_MS: u64 = 100;


quick_error! {
    /// Error starting the daemon
    #[derive(Debug)]
    pub enum StartError {
        /// The listen socket could not be created, bound or listened
        Bind(err: io::Error) {
            description("error binding listen socket")
            display("error binding listen socket: {}", err)
        }
        /// Worker threads or per-thread reactors could not be set up
        Io(err: io::Error) {
            description("error setting up daemon threads")
            display("error setting up daemon threads: {}", err)
        }
    }
}

/// Threading strategy of a daemon started with `Daemon::start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One internal thread multiplexing all connections
    InternalThread,
    /// One OS thread per live connection, blocking on its socket
    ThreadPerConnection,
    /// A fixed pool of threads, each polling its own connection shard
    ThreadPool(usize),
}

struct ShutdownInner {
    stopping: AtomicBool,
    next_id: AtomicUsize,
    tasks: Mutex<HashMap<usize, Task>>,
}

/// Shared stop flag plus the registry of tasks to wake on stop
#[derive(Clone)]
struct Shutdown(Arc<ShutdownInner>);

impl Shutdown {
    fn new() -> Shutdown {
        Shutdown(Arc::new(ShutdownInner {
            stopping: AtomicBool::new(false),
            next_id: AtomicUsize::new(0),
            tasks: Mutex::new(HashMap::new()),
        }))
    }
    fn stopping(&self) -> bool {
        self.0.stopping.load(Ordering::SeqCst)
    }
    fn begin_stop(&self) {
        self.0.stopping.store(true, Ordering::SeqCst);
        let tasks = {
            let mut lock = self.0.tasks.lock()
                .expect("shutdown registry is never poisoned");
            lock.drain().map(|(_, task)| task).collect::<Vec<_>>()
        };
        for task in tasks {
            task.notify();
        }
    }
    fn register(&self) -> usize {
        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
        self.update(id);
        id
    }
    fn update(&self, id: usize) {
        let mut lock = self.0.tasks.lock()
            .expect("shutdown registry is never poisoned");
        lock.insert(id, task::current());
    }
    fn unregister(&self, id: usize) {
        let mut lock = self.0.tasks.lock()
            .expect("shutdown registry is never poisoned");
        lock.remove(&id);
    }
}

/// Runs the inner future until the daemon stops, then drops it
///
/// Dropping a `Proto` mid-request is what reports
/// `Termination::Shutdown` to the completion callback.
struct Supervised<F> {
    inner: Option<F>,
    shutdown: Shutdown,
    id: Option<usize>,
}

impl<F> Supervised<F> {
    fn new(inner: F, shutdown: &Shutdown) -> Supervised<F> {
        Supervised {
            inner: Some(inner),
            shutdown: shutdown.clone(),
            id: None,
        }
    }
}

impl<F: Future> Future for Supervised<F> {
    type Item = ();
    type Error = F::Error;

    fn poll(&mut self) -> Poll<(), F::Error> {
        match self.id {
            Some(id) => self.shutdown.update(id),
            None => self.id = Some(self.shutdown.register()),
        }
        // checked after registration, so a stop racing with it is
        // either seen here or notifies the task we just registered
        if self.shutdown.stopping() {
            self.inner.take();
            return Ok(Async::Ready(()));
        }
        let result = match self.inner {
            Some(ref mut inner) => inner.poll(),
            None => return Ok(Async::Ready(())),
        };
        match result {
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Ok(Async::Ready(_)) => {
                self.inner.take();
                Ok(Async::Ready(()))
            }
            Err(e) => {
                self.inner.take();
                Err(e)
            }
        }
    }
}

impl<F> Drop for Supervised<F> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.shutdown.unregister(id);
        }
    }
}

/// Resolves when the daemon starts stopping
struct WaitStop {
    shutdown: Shutdown,
    id: Option<usize>,
}

impl WaitStop {
    fn new(shutdown: &Shutdown) -> WaitStop {
        WaitStop { shutdown: shutdown.clone(), id: None }
    }
}

impl Future for WaitStop {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        match self.id {
            Some(id) => self.shutdown.update(id),
            None => self.id = Some(self.shutdown.register()),
        }
        if self.shutdown.stopping() {
            return Ok(Async::Ready(()));
        }
        Ok(Async::NotReady)
    }
}

impl Drop for WaitStop {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.shutdown.unregister(id);
        }
    }
}

/// Count of live connection threads, waited on during stop
#[derive(Clone)]
struct ConnCounter(Arc<(Mutex<usize>, Condvar)>);

impl ConnCounter {
    fn new() -> ConnCounter {
        ConnCounter(Arc::new((Mutex::new(0), Condvar::new())))
    }
    fn count(&self) -> usize {
        *(self.0).0.lock().expect("counter is never poisoned")
    }
    fn inc(&self) {
        *(self.0).0.lock().expect("counter is never poisoned") += 1;
    }
    fn dec(&self) {
        let mut lock = (self.0).0.lock()
            .expect("counter is never poisoned");
        *lock -= 1;
        if *lock == 0 {
            (self.0).1.notify_all();
        }
    }
    fn wait_zero(&self) {
        let mut lock = (self.0).0.lock()
            .expect("counter is never poisoned");
        while *lock > 0 {
            lock = (self.0).1.wait(lock)
                .expect("counter is never poisoned");
        }
    }
}

/// Decrements the counter when a connection thread ends, however it ends
struct CounterGuard(ConnCounter);

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

// The per-reactor accept loop shared by all strategies that multiplex.
// Accept errors are logged and throttled, they never end the loop; a
// connection refused by the accept policy is dropped before any read.
fn accept_loop<D, F>(listener: TcpListener, cfg: &Arc<Config>,
    factory: &Arc<F>, handle: &Handle, shutdown: &Shutdown)
    -> Box<Future<Item=(), Error=()>>
    where D: Dispatcher + 'static,
          F: Fn(SocketAddr) -> D + 'static,
{
    let cfg = cfg.clone();
    let factory = factory.clone();
    let handle = handle.clone();
    let shutdown = shutdown.clone();
    let connection_limit = cfg.connection_limit;
    Box::new(listener.incoming()
        .sleep_on_error(
            Duration::from_millis(ACCEPT_ERROR_SLEEP_MS), &handle)
        .map(move |(socket, addr)| {
            if let Some(ref policy) = cfg.accept_policy {
                if !policy(&addr) {
                    debug!("connection from {} refused by policy", addr);
                    return Either::A(ok(()));
                }
            }
            trace!("accepted connection from {}", addr);
            let proto = Proto::new(
                socket, addr, &cfg, factory(addr), &handle);
            Either::B(Supervised::new(proto, &shutdown)
                .map_err(move |e: Error| {
                    debug!("connection from {} closed: {}", addr, e);
                }))
        })
        .listen(connection_limit))
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(a) if *a.ip() == Ipv4Addr::new(0, 0, 0, 0) => {
            SocketAddr::V4(
                SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), a.port()))
        }
        SocketAddr::V6(a)
            if *a.ip() == Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0) =>
        {
            SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1), a.port(), 0, 0))
        }
        a => a,
    }
}

/// A running HTTP daemon
///
/// Returned by `start` / `start_external`; keeps the bound address
/// queryable and owns the worker threads. Dropping the daemon stops it.
pub struct Daemon {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    threads: Vec<thread::JoinHandle<()>>,
    conn_counter: Option<ConnCounter>,
    wake_accept: bool,
    stopped: bool,
}

impl Daemon {
    /// Bind `addr` and serve it with the given threading strategy
    ///
    /// A port of 0 binds an ephemeral port; query it with `port()`. The
    /// factory is called once per connection, on the thread that will
    /// service it.
    pub fn start<D, F>(addr: SocketAddr, mode: Mode, cfg: &Arc<Config>,
        factory: F)
        -> Result<Daemon, StartError>
        where D: Dispatcher + 'static,
              F: Fn(SocketAddr) -> D + Send + Sync + 'static,
    {
        let listener = net::TcpListener::bind(&addr)
            .map_err(StartError::Bind)?;
        let local_addr = listener.local_addr()
            .map_err(StartError::Bind)?;
        let shutdown = Shutdown::new();
        let factory = Arc::new(factory);
        let mut daemon = Daemon {
            local_addr: local_addr,
            shutdown: shutdown.clone(),
            threads: Vec::new(),
            conn_counter: None,
            wake_accept: false,
            stopped: false,
        };
        match mode {
            Mode::InternalThread => {
                daemon.spawn_reactor_workers(1, listener, cfg, &factory)?;
            }
            Mode::ThreadPool(size) => {
                let size = if size == 0 { 1 } else { size };
                daemon.spawn_reactor_workers(
                    size, listener, cfg, &factory)?;
            }
            Mode::ThreadPerConnection => {
                daemon.spawn_accept_thread(listener, cfg, &factory)?;
            }
        }
        info!("daemon listening on {} ({:?})", local_addr, mode);
        Ok(daemon)
    }

    /// Serve on the caller's reactor, with no internal threads
    ///
    /// The accept loop and every connection run as tasks of `handle`'s
    /// core; the caller drives them by turning that core, which also
    /// bounds each wait by the nearest connection timeout. `stop()` (or
    /// dropping the daemon) cancels all of them on the next turn.
    pub fn start_external<D, F>(addr: SocketAddr, cfg: &Arc<Config>,
        factory: F, handle: &Handle)
        -> Result<Daemon, StartError>
        where D: Dispatcher + 'static,
              F: Fn(SocketAddr) -> D + 'static,
    {
        let listener = net::TcpListener::bind(&addr)
            .map_err(StartError::Bind)?;
        let local_addr = listener.local_addr()
            .map_err(StartError::Bind)?;
        listener.set_nonblocking(true).map_err(StartError::Io)?;
        let listener =
            TcpListener::from_listener(listener, &local_addr, handle)
            .map_err(StartError::Io)?;
        let shutdown = Shutdown::new();
        let factory = Arc::new(factory);
        let accept = accept_loop(
            listener, cfg, &factory, handle, &shutdown);
        let stop = WaitStop::new(&shutdown);
        handle.spawn(accept.select(stop).map(|_| ()).map_err(|_| ()));
        info!("daemon listening on {} (external reactor)", local_addr);
        Ok(Daemon {
            local_addr: local_addr,
            shutdown: shutdown,
            threads: Vec::new(),
            conn_counter: None,
            wake_accept: false,
            stopped: false,
        })
    }

    fn spawn_reactor_workers<D, F>(&mut self, count: usize,
        listener: net::TcpListener, cfg: &Arc<Config>, factory: &Arc<F>)
        -> Result<(), StartError>
        where D: Dispatcher + 'static,
              F: Fn(SocketAddr) -> D + Send + Sync + 'static,
    {
        listener.set_nonblocking(true).map_err(StartError::Io)?;
        let mut listener = Some(listener);
        for index in 0..count {
            let socket = if index + 1 == count {
                listener.take().expect("one listener per worker")
            } else {
                listener.as_ref().expect("one listener per worker")
                    .try_clone().map_err(StartError::Io)?
            };
            let local_addr = self.local_addr;
            let cfg = cfg.clone();
            let factory = factory.clone();
            let shutdown = self.shutdown.clone();
            let thread = thread::Builder::new()
                .name(format!("tk-httpd-worker-{}", index))
                .spawn(move || {
                    let mut core = match Core::new() {
                        Ok(core) => core,
                        Err(e) => {
                            error!("worker reactor failed: {}", e);
                            return;
                        }
                    };
                    let handle = core.handle();
                    let listener = match TcpListener::from_listener(
                        socket, &local_addr, &handle)
                    {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!("worker listener failed: {}", e);
                            return;
                        }
                    };
                    let accept = accept_loop(listener, &cfg, &factory,
                        &handle, &shutdown);
                    let stop = WaitStop::new(&shutdown);
                    let _ = core.run(accept.select(stop));
                })
                .map_err(StartError::Io)?;
            self.threads.push(thread);
        }
        Ok(())
    }

    fn spawn_accept_thread<D, F>(&mut self,
        listener: net::TcpListener, cfg: &Arc<Config>, factory: &Arc<F>)
        -> Result<(), StartError>
        where D: Dispatcher + 'static,
              F: Fn(SocketAddr) -> D + Send + Sync + 'static,
    {
        let counter = ConnCounter::new();
        self.conn_counter = Some(counter.clone());
        self.wake_accept = true;
        let cfg = cfg.clone();
        let factory = factory.clone();
        let shutdown = self.shutdown.clone();
        let thread = thread::Builder::new()
            .name("tk-httpd-accept".to_string())
            .spawn(move || {
                for result in listener.incoming() {
                    if shutdown.stopping() {
                        break;
                    }
                    let socket = match result {
                        Ok(socket) => socket,
                        Err(e) => {
                            error!("accept error: {}", e);
                            continue;
                        }
                    };
                    let peer = match socket.peer_addr() {
                        Ok(peer) => peer,
                        Err(_) => continue,
                    };
                    if let Some(ref policy) = cfg.accept_policy {
                        if !policy(&peer) {
                            debug!("connection from {} refused by policy",
                                peer);
                            continue;
                        }
                    }
                    if counter.count() >= cfg.connection_limit {
                        debug!("refusing {}: connection limit reached",
                            peer);
                        continue;
                    }
                    counter.inc();
                    let guard = CounterGuard(counter.clone());
                    let cfg = cfg.clone();
                    let factory = factory.clone();
                    let shutdown = shutdown.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("tk-httpd-conn-{}", peer))
                        .spawn(move || {
                            let _guard = guard;
                            serve_single(socket, peer, &cfg, &factory,
                                &shutdown);
                        });
                    if let Err(e) = spawned {
                        // refuse this one connection, the daemon lives
                        error!("can't spawn thread for {}: {}", peer, e);
                    }
                }
            })
            .map_err(StartError::Io)?;
        self.threads.push(thread);
        Ok(())
    }

    /// The address the daemon is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound port; useful after requesting port 0
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop the daemon: cancel connections, join threads
    ///
    /// In-flight requests are reported as `Termination::Shutdown`; there
    /// is no grace period. Consumes the daemon, so stopping twice is
    /// unrepresentable.
    pub fn stop(mut self) {
        self.do_stop();
    }

    fn do_stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("stopping daemon on {}", self.local_addr);
        self.shutdown.begin_stop();
        if self.wake_accept {
            // unblock the accept() call
            let _ = net::TcpStream::connect(&wake_addr(self.local_addr));
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        if let Some(counter) = self.conn_counter.take() {
            counter.wait_zero();
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.do_stop();
    }
}

fn serve_single<D, F>(socket: net::TcpStream, peer: SocketAddr,
    cfg: &Arc<Config>, factory: &Arc<F>, shutdown: &Shutdown)
    where D: Dispatcher + 'static,
          F: Fn(SocketAddr) -> D,
{
    let mut core = match Core::new() {
        Ok(core) => core,
        Err(e) => {
            error!("connection reactor failed: {}", e);
            return;
        }
    };
    let handle = core.handle();
    if let Err(e) = socket.set_nonblocking(true) {
        debug!("connection from {} failed: {}", peer, e);
        return;
    }
    let socket = match TcpStream::from_stream(socket, &handle) {
        Ok(socket) => socket,
        Err(e) => {
            debug!("connection from {} failed: {}", peer, e);
            return;
        }
    };
    let proto = Proto::new(socket, peer, cfg, factory(peer), &handle);
    let serve = Supervised::new(proto, shutdown)
        .map_err(move |e: Error| {
            debug!("connection from {} closed: {}", peer, e);
        });
    let stop = WaitStop::new(shutdown);
    let _ = core.run(serve.select(stop));
}
