use crate::error::BoxError;
use http::header::{self, AsHeaderName, HeaderMap, HeaderValue, IntoHeaderName};
use http::{Request, StatusCode, request};
use std::any::Any;
use std::fmt;
use std::io::Write;

/// The body-transport half of a response.
///
/// Any `Write + Send + 'static` type is a sink. The `Any` accessors let a
/// middleware recognise and take back a sink it installed earlier.
pub trait ResponseSink: Write + Send {
    /// Returns the sink as `Any`.
    fn as_any(&self) -> &dyn Any;

    /// Converts the boxed sink into `Box<dyn Any>`.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Write + Send + 'static> ResponseSink for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Per-request state handed down a handler chain.
///
/// Holds the request head, the response status and headers, and the sink
/// the response body is written to.
pub struct Context {
    request: request::Parts,
    status: StatusCode,
    headers: HeaderMap,
    response: Box<dyn ResponseSink>,
}

impl Context {
    /// Creates a context for `request` whose body is written to `sink`.
    pub fn new<B>(request: Request<B>, sink: impl ResponseSink + 'static) -> Self {
        let (request, _) = request.into_parts();
        Self {
            request,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            response: Box::new(sink),
        }
    }

    /// Returns the request head.
    pub fn request(&self) -> &request::Parts {
        &self.request
    }

    /// Returns a request header as a string.
    ///
    /// Missing headers and values that are not visible ASCII yield `None`.
    pub fn req_header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the request host as sent, port included.
    ///
    /// Taken from the `Host` header, falling back to the URI authority.
    pub fn host(&self) -> &str {
        request_host(&self.request.headers, &self.request.uri)
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the response status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Returns the response headers.
    pub fn resp_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the response headers mutably.
    pub fn resp_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Appends a response header, keeping existing values.
    pub fn add_resp_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.headers.append(name, value);
    }

    /// Sets a response header, replacing existing values.
    pub fn set_resp_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Returns the active response sink.
    pub fn response(&self) -> &dyn ResponseSink {
        self.response.as_ref()
    }

    /// Returns the active response sink mutably.
    pub fn response_mut(&mut self) -> &mut dyn ResponseSink {
        self.response.as_mut()
    }

    /// Installs `sink` as the active response sink, returning the previous one.
    pub fn set_response(&mut self, sink: Box<dyn ResponseSink>) -> Box<dyn ResponseSink> {
        std::mem::replace(&mut self.response, sink)
    }

    /// Splits the context into the response status, headers and sink.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Box<dyn ResponseSink>) {
        (self.status, self.headers, self.response)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Returns the host of a request: the `Host` header, else the URI authority.
pub(crate) fn request_host<'a>(headers: &'a HeaderMap, uri: &'a http::Uri) -> &'a str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or_default()
}

/// A request handler.
pub trait Handler {
    /// Handles one request.
    fn call(&self, ctx: &mut Context) -> Result<(), BoxError>;
}

impl<H: Handler + ?Sized> Handler for &H {
    fn call(&self, ctx: &mut Context) -> Result<(), BoxError> {
        (**self).call(ctx)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn call(&self, ctx: &mut Context) -> Result<(), BoxError> {
        (**self).call(ctx)
    }
}

impl<H: Handler + ?Sized> Handler for std::sync::Arc<H> {
    fn call(&self, ctx: &mut Context) -> Result<(), BoxError> {
        (**self).call(ctx)
    }
}

/// Returns a [`Handler`] that calls `f`.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut Context) -> Result<(), BoxError>,
{
    HandlerFn { f }
}

/// A [`Handler`] backed by a closure, see [`handler_fn`].
#[derive(Clone, Copy)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut Context) -> Result<(), BoxError>,
{
    fn call(&self, ctx: &mut Context) -> Result<(), BoxError> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn")
            .field("f", &std::any::type_name::<F>())
            .finish()
    }
}
