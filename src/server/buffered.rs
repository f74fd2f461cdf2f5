//! A buffered shortcut over the codec machinery
//!
//! For handlers that don't care about incremental uploads: the whole
//! request body is collected up front (bounded by `max_request_length`)
//! and the service is one call from `(request, body)` to `Response`.
//!
//! ```rust,ignore
//! let dispatcher = BufferedDispatcher::new(|| |req: &Request, _: &[u8]| {
//!     Ok(Response::copy_from(Status::Ok, req.path().as_bytes()))
//! });
//! ```

use server::{Codec, Dispatcher, Error, RecvMode, Request, Response};


/// A factory creating one `Service` instance per request
pub trait NewService {
    /// The service type this factory builds
    type Instance: Service;
    /// Build a service for one request
    fn new_service(&self) -> Self::Instance;
}

/// A whole-request handler: full body in, response out
pub trait Service {
    /// Handle one request
    fn call(&mut self, request: &Request, body: &[u8])
        -> Result<Response, Error>;
}

impl<T, R> NewService for T
    where T: Fn() -> R,
          R: Service,
{
    type Instance = R;
    fn new_service(&self) -> R {
        (self)()
    }
}

impl<T> Service for T
    where T: FnMut(&Request, &[u8]) -> Result<Response, Error>,
{
    fn call(&mut self, request: &Request, body: &[u8])
        -> Result<Response, Error>
    {
        (self)(request, body)
    }
}

/// Dispatcher adapter that buffers request bodies for a `NewService`
pub struct BufferedDispatcher<N: NewService> {
    max_request_length: usize,
    service: N,
}

pub struct BufferedCodec<R> {
    max_request_length: usize,
    service: R,
    request: Option<Request>,
    body: Vec<u8>,
}

impl<N: NewService> BufferedDispatcher<N> {
    /// New dispatcher with the default 10 MiB body limit
    pub fn new(service: N) -> BufferedDispatcher<N> {
        BufferedDispatcher {
            max_request_length: 10_485_760,
            service: service,
        }
    }
    /// Cap accepted request bodies at `value` bytes
    pub fn max_request_length(&mut self, value: usize) -> &mut Self {
        self.max_request_length = value;
        self
    }
}

impl<N: NewService> Dispatcher for BufferedDispatcher<N> {
    type Codec = BufferedCodec<N::Instance>;

    fn headers_received(&mut self, request: &Request)
        -> Result<Self::Codec, Error>
    {
        Ok(BufferedCodec {
            max_request_length: self.max_request_length,
            service: self.service.new_service(),
            request: Some(request.clone()),
            body: Vec::new(),
        })
    }
}

impl<R: Service> Codec for BufferedCodec<R> {
    fn recv_mode(&mut self) -> RecvMode {
        RecvMode::buffered_upfront(self.max_request_length)
    }
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<usize, Error>
    {
        assert!(end);
        self.body = data.to_vec();
        Ok(data.len())
    }
    fn end_of_body(&mut self) -> Result<Response, Error> {
        let request = self.request.take()
            .expect("end_of_body is called once");
        self.service.call(&request, &self.body)
    }
}
