//! Cookie-keyed sessions with a shared table and a periodic expiry
//! sweep. The table is explicit shared state (`Arc<Mutex<..>>`) because
//! handler callbacks run from whatever thread services the connection;
//! the sweep runs as a reschedulable timer task on the same reactor.

extern crate argparse;
extern crate env_logger;
extern crate futures;
extern crate tk_httpd;
extern crate tokio_core;

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use argparse::{ArgumentParser, Parse};
use tokio_core::reactor::Core;

use tk_httpd::daemon::Daemon;
use tk_httpd::server::buffered::BufferedDispatcher;
use tk_httpd::server::{Config, Request, Response};
use tk_httpd::{timer, Method, Status};

const COOKIE: &'static str = "SID";
const SESSION_TTL: Duration = Duration::from_secs(300);

struct Session {
    counter: u32,
    last_seen: Instant,
}

type SessionTable = Arc<Mutex<HashMap<String, Session>>>;

fn fresh_session_id(serial: &AtomicUsize, started: Instant) -> String {
    // not guessable enough for production, plenty for a demo
    format!("{:x}-{:x}",
        serial.fetch_add(1, Ordering::SeqCst),
        started.elapsed().subsec_nanos())
}

fn handle(sessions: &SessionTable, serial: &AtomicUsize,
    started: Instant, req: &Request)
    -> Response
{
    let mut table = sessions.lock().expect("session table healthy");
    let known = req.cookie(COOKIE)
        .map(|sid| sid.to_string())
        .into_iter()
        .find(|sid| table.contains_key(sid));
    let (sid, is_new) = match known {
        Some(sid) => (sid, false),
        None => {
            let sid = fresh_session_id(serial, started);
            table.insert(sid.clone(), Session {
                counter: 0,
                last_seen: Instant::now(),
            });
            (sid, true)
        }
    };
    let session = table.get_mut(&sid).expect("session just ensured");
    session.last_seen = Instant::now();
    if *req.method() == Method::Post {
        session.counter += 1;
    }
    let page = format!("<html><body>\
        <p>Session {} visited {} times.</p>\
        <form method=\"post\"><input type=\"submit\" \
        value=\"Increment\"></form>\
        </body></html>", sid, session.counter);
    let mut resp = Response::from_buffer(Status::Ok, page);
    resp.add_header("Content-Type", "text/html");
    if is_new {
        resp.set_cookie(COOKIE, &sid, "Path=/");
    }
    resp
}

fn main() {
    let mut addr = "127.0.0.1:8080".parse::<SocketAddr>().unwrap();
    {
        let mut ap = ArgumentParser::new();
        ap.set_description("Session counter with expiry sweep");
        ap.refer(&mut addr)
            .add_option(&["-l", "--listen"], Parse, "Listening address");
        ap.parse_args_or_exit();
    }

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let mut lp = Core::new().unwrap();
    let sessions: SessionTable = Arc::new(Mutex::new(HashMap::new()));
    let serial = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let sweep_table = sessions.clone();
    let sweeper = timer::spawn(&lp.handle(), Duration::from_secs(60),
        move || {
            let mut table = sweep_table.lock()
                .expect("session table healthy");
            let before = table.len();
            table.retain(|_, session| {
                session.last_seen.elapsed() < SESSION_TTL
            });
            if table.len() < before {
                println!("swept {} idle sessions", before - table.len());
            }
            true
        });

    let cfg = Config::new().done();
    let daemon = Daemon::start_external(addr, &cfg,
        move |_| {
            let sessions = sessions.clone();
            let serial = serial.clone();
            BufferedDispatcher::new(move || {
                let sessions = sessions.clone();
                let serial = serial.clone();
                move |req: &Request, _body: &[u8]| {
                    Ok(handle(&sessions, &serial, started, req))
                }
            })
        },
        &lp.handle()).expect("daemon starts");
    println!("sessions served on {}", daemon.local_addr());

    lp.run(futures::empty::<(), ()>()).unwrap();
    sweeper.cancel();
}
