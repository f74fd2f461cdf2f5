extern crate argparse;
extern crate env_logger;
extern crate futures;
extern crate tk_httpd;
extern crate tokio_core;

use std::env;
use std::net::SocketAddr;

use argparse::{ArgumentParser, Parse};
use tokio_core::reactor::Core;

use tk_httpd::Status;
use tk_httpd::daemon::Daemon;
use tk_httpd::server::buffered::BufferedDispatcher;
use tk_httpd::server::{Config, Request, Response};

fn main() {
    let mut addr = "127.0.0.1:8080".parse::<SocketAddr>().unwrap();
    {
        let mut ap = ArgumentParser::new();
        ap.set_description("Echo the request path on any connection");
        ap.refer(&mut addr)
            .add_option(&["-l", "--listen"], Parse, "Listening address");
        ap.parse_args_or_exit();
    }

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let mut lp = Core::new().unwrap();
    let cfg = Config::new()
        .uri_log(|peer, uri| println!("{} {}", peer, uri))
        .done();
    let daemon = Daemon::start_external(addr, &cfg,
        |_| BufferedDispatcher::new(|| |req: &Request, _body: &[u8]| {
            Ok(Response::copy_from(Status::Ok, req.path().as_bytes()))
        }),
        &lp.handle()).expect("daemon starts");
    println!("listening on {}", daemon.local_addr());

    lp.run(futures::empty::<(), ()>()).unwrap();
}
