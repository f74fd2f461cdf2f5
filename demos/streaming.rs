//! Generates a large response on the fly, chunked, with a trailer
//! header carrying a checksum of what was actually sent.

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
use tk_httpd::server::{Config, Request, Response, StreamChunk};

const TOTAL: u64 = 100 * 1024 * 1024;
const PATTERN: &'static [u8] = b"all work and no play \
    makes jack a dull boy\n";

fn main() {
    let mut addr = "127.0.0.1:8080".parse::<SocketAddr>().unwrap();
    {
        let mut ap = ArgumentParser::new();
        ap.set_description(
            "Stream 100MiB of generated text to any request");
        ap.refer(&mut addr)
            .add_option(&["-l", "--listen"], Parse, "Listening address");
        ap.parse_args_or_exit();
    }

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let mut lp = Core::new().unwrap();
    let cfg = Config::new().done();
    let daemon = Daemon::start_external(addr, &cfg,
        |_| BufferedDispatcher::new(|| |_req: &Request, _body: &[u8]| {
            let mut checksum = 0u64;
            let mut resp = Response::from_reader(Status::Ok, None, 8192,
                move |position, buf| {
                    if position >= TOTAL {
                        return StreamChunk::End(vec![
                            ("X-Checksum".to_string(),
                             format!("{:016x}", checksum)),
                        ]);
                    }
                    let mut filled = 0;
                    while filled < buf.len() && position + (filled as u64)
                        < TOTAL
                    {
                        let byte = PATTERN[
                            ((position as usize) + filled)
                                % PATTERN.len()];
                        buf[filled] = byte;
                        checksum = checksum.wrapping_mul(31)
                            .wrapping_add(byte as u64);
                        filled += 1;
                    }
                    StreamChunk::Data(filled)
                });
            resp.add_header("Content-Type", "text/plain");
            Ok(resp)
        }),
        &lp.handle()).expect("daemon starts");
    println!("streaming on {}", daemon.local_addr());

    lp.run(futures::empty::<(), ()>()).unwrap();
}
