//! Interceptor chain the mock plugs into.
//!
//! A [`Client`] runs every request through its interceptors in registration
//! order. Each interceptor either answers the call itself or hands the
//! request further down with [`Chain::proceed`]; the last link is a
//! [`Transport`]. Bodies are fully buffered [`Bytes`], so a request can be
//! read any number of times while it travels through the chain.

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Request type flowing through the chain.
pub type Request = http::Request<Bytes>;

/// Response type flowing through the chain.
pub type Response = http::Response<Bytes>;

/// Error type of every chain step. Errors raised by interceptors or the
/// transport travel upstream unchanged.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the chain itself.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The request reached a [`NoNetwork`] transport.
    #[error("network access is disabled: {method} {uri} reached the transport")]
    NetworkDisabled { method: http::Method, uri: http::Uri },
}

/// The view an [`Interceptor`] gets of an in-flight call.
pub trait Chain {
    /// The request being processed.
    fn request(&self) -> &Request;

    /// Pass `request` to the next interceptor, or to the transport when this
    /// is the last one.
    fn proceed(&mut self, request: Request) -> Result<Response, BoxError>;
}

/// A hook that observes or short-circuits calls.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, chain: &mut dyn Chain) -> Result<Response, BoxError>;
}

/// Terminal step performing the actual exchange.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> Result<Response, BoxError>;
}

impl<F> Transport for F
where
    F: Fn(Request) -> Result<Response, BoxError> + Send + Sync,
{
    fn send(&self, request: Request) -> Result<Response, BoxError> {
        self(request)
    }
}

/// Transport that refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNetwork;

impl Transport for NoNetwork {
    fn send(&self, request: Request) -> Result<Response, BoxError> {
        Err(Box::new(ChainError::NetworkDisabled {
            method: request.method().clone(),
            uri: request.uri().clone(),
        }))
    }
}

/// Minimal client driving the interceptor chain.
#[derive(Clone)]
pub struct Client {
    interceptors: Vec<Arc<dyn Interceptor>>,
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Execute a request through all interceptors and the transport.
    pub fn execute(&self, request: Request) -> Result<Response, BoxError> {
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            interceptors = self.interceptors.len(),
            "Executing request"
        );
        let mut chain = RealChain {
            interceptors: &self.interceptors,
            transport: self.transport.as_ref(),
            index: 0,
            request,
        };
        chain.run()
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
    transport: Arc<dyn Transport>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
            transport: Arc::new(NoNetwork),
        }
    }
}

impl ClientBuilder {
    /// Append an interceptor. Interceptors run in the order they are added.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Replace the terminal transport (defaults to [`NoNetwork`]).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn build(self) -> Client {
        Client {
            interceptors: self.interceptors,
            transport: self.transport,
        }
    }
}

struct RealChain<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    transport: &'a dyn Transport,
    index: usize,
    request: Request,
}

impl RealChain<'_> {
    fn run(&mut self) -> Result<Response, BoxError> {
        match self.interceptors.get(self.index) {
            Some(interceptor) => {
                let interceptor = Arc::clone(interceptor);
                interceptor.intercept(self)
            }
            None => {
                let request = std::mem::replace(&mut self.request, Request::default());
                self.transport.send(request)
            }
        }
    }
}

impl Chain for RealChain<'_> {
    fn request(&self) -> &Request {
        &self.request
    }

    fn proceed(&mut self, request: Request) -> Result<Response, BoxError> {
        let mut next = RealChain {
            interceptors: self.interceptors,
            transport: self.transport,
            index: self.index + 1,
            request,
        };
        next.run()
    }
}
