//! Accepts uploads without ever holding a whole body in memory:
//! raw PUT/POST bodies are counted as they arrive, form posts are fed
//! through the streaming post processor field by field.

extern crate argparse;
extern crate env_logger;
extern crate tk_httpd;

use std::cell::RefCell;
use std::env;
use std::mem;
use std::net::SocketAddr;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use argparse::{ArgumentParser, Parse};

use tk_httpd::daemon::{Daemon, Mode};
use tk_httpd::post::{FieldData, PostProcessor};
use tk_httpd::server::{Codec, Config, Dispatcher, Error};
use tk_httpd::server::{RecvMode, Request, Response};
use tk_httpd::{Method, Status};

const ASK_PAGE: &'static str = "<html><body>\
    Upload a file, please!<br>\
    <form method=\"post\" enctype=\"multipart/form-data\">\
    <input name=\"file\" type=\"file\">\
    <input type=\"submit\" value=\" Send \"></form>\
    </body></html>";

/// How much the post processor may buffer at once
const POST_BUFFER: usize = 1024;

struct UploadApp;

type FieldCounts = Rc<RefCell<Vec<(String, u64)>>>;

enum Upload {
    /// GET: serve the form page
    Page,
    /// A raw body; we only count it
    Raw { bytes: u64 },
    /// A form body going through the post processor
    Form {
        post: PostProcessor<Box<FnMut(&FieldData) -> bool>>,
        counts: FieldCounts,
    },
}

struct UploadCodec {
    upload: Upload,
}

fn form_counter(counts: &FieldCounts)
    -> Box<FnMut(&FieldData) -> bool>
{
    let sink = counts.clone();
    Box::new(move |field: &FieldData| {
        let mut counts = sink.borrow_mut();
        let appended = match counts.last_mut() {
            Some(entry) if entry.0 == field.name => {
                entry.1 += field.data.len() as u64;
                true
            }
            _ => false,
        };
        if !appended {
            counts.push(
                (field.name.to_string(), field.data.len() as u64));
        }
        true
    })
}

impl Dispatcher for UploadApp {
    type Codec = UploadCodec;

    fn headers_received(&mut self, req: &Request)
        -> Result<UploadCodec, Error>
    {
        let upload = if *req.method() == Method::Get {
            Upload::Page
        } else {
            match req.header_str("Content-Type") {
                Some(ctype) if ctype.starts_with("multipart/")
                    || ctype.starts_with("application/x-www-form")
                => {
                    let counts: FieldCounts =
                        Rc::new(RefCell::new(Vec::new()));
                    let post = PostProcessor::new(
                            ctype, POST_BUFFER, form_counter(&counts))
                        .map_err(|_| {
                            Error::Application("unusable form post")
                        })?;
                    Upload::Form { post: post, counts: counts }
                }
                _ => Upload::Raw { bytes: 0 },
            }
        };
        Ok(UploadCodec { upload: upload })
    }
}

impl Codec for UploadCodec {
    fn recv_mode(&mut self) -> RecvMode {
        RecvMode::progressive(4096)
    }

    fn data_received(&mut self, data: &[u8], _end: bool)
        -> Result<usize, Error>
    {
        match self.upload {
            Upload::Page => {}
            Upload::Raw { ref mut bytes } => {
                *bytes += data.len() as u64;
            }
            Upload::Form { ref mut post, .. } => {
                post.process(data).map_err(|_| {
                    Error::Application("malformed form upload")
                })?;
            }
        }
        Ok(data.len())
    }

    fn end_of_body(&mut self) -> Result<Response, Error> {
        let upload = mem::replace(&mut self.upload, Upload::Page);
        let mut resp = match upload {
            Upload::Page => {
                let mut resp = Response::from_static(
                    Status::Ok, ASK_PAGE.as_bytes());
                resp.add_header("Content-Type", "text/html");
                resp
            }
            Upload::Raw { bytes } => {
                Response::from_buffer(Status::Ok,
                    format!("{} bytes received\n", bytes))
            }
            Upload::Form { post, counts } => {
                post.complete().map_err(|_| {
                    Error::Application("truncated form upload")
                })?;
                let mut page = String::new();
                for &(ref name, total) in counts.borrow().iter() {
                    page.push_str(
                        &format!("{}: {} bytes\n", name, total));
                }
                Response::from_buffer(Status::Ok, page)
            }
        };
        resp.add_header("Server", concat!("tk-httpd/",
            env!("CARGO_PKG_VERSION")));
        Ok(resp)
    }
}

fn main() {
    let mut addr = "127.0.0.1:8080".parse::<SocketAddr>().unwrap();
    {
        let mut ap = ArgumentParser::new();
        ap.set_description("Count uploaded bytes, bounded memory");
        ap.refer(&mut addr)
            .add_option(&["-l", "--listen"], Parse, "Listening address");
        ap.parse_args_or_exit();
    }

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let cfg = Config::new()
        .memory_limit(16384)
        .done();
    let daemon = Daemon::start(addr, Mode::InternalThread, &cfg,
        |_| UploadApp).expect("daemon starts");
    println!("accepting uploads on {}", daemon.local_addr());

    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}
