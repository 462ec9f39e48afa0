use crate::context::{Context, Handler, ResponseSink, request_host};
use crate::domain::{DomainMatcher, split_host};
use crate::error::BoxError;
use crate::future::{ResponseFuture, add_vary_accept_encoding};
use crate::pool::GzipPool;
use crate::response::GzipResponse;
use http::header::{self, HeaderValue};
use http::Request;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tower::Service;
use tracing::{debug, warn};

type SinkResponse = GzipResponse<Box<dyn ResponseSink>>;

/// Middleware that gzips response bodies.
///
/// As a [`Handler`] it swaps the context's sink for a [`GzipResponse`] for
/// the duration of the inner handler. As a `tower::Service` it wraps the
/// response body instead.
#[derive(Debug, Clone)]
pub struct Gzip<S> {
    inner: S,
    matcher: Arc<DomainMatcher>,
    pool: Arc<GzipPool>,
}

impl<S> Gzip<S> {
    /// Creates the middleware around `inner`.
    pub fn new(inner: S, matcher: Arc<DomainMatcher>, pool: Arc<GzipPool>) -> Self {
        Self {
            inner,
            matcher,
            pool,
        }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Returns the encoder pool.
    pub fn pool(&self) -> &Arc<GzipPool> {
        &self.pool
    }

    /// Decides whether a request is compressed.
    ///
    /// The raw `Accept-Encoding` bytes must contain `gzip` (case-sensitive)
    /// and the host, once its port is stripped, must pass the domain rules.
    fn should_compress(&self, accept_encoding: Option<&HeaderValue>, host: &str) -> bool {
        let accepts_gzip = accept_encoding
            .is_some_and(|v| v.as_bytes().windows(4).any(|w| w == b"gzip"));
        accepts_gzip && self.matcher.matches(split_host(host))
    }
}

impl<H: Handler> Handler for Gzip<H> {
    fn call(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let accept_encoding = ctx.request().headers.get(header::ACCEPT_ENCODING);
        if !self.should_compress(accept_encoding, ctx.host()) {
            return self.inner.call(ctx);
        }

        add_vary_accept_encoding(ctx.resp_headers_mut());
        ctx.set_resp_header(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let sink = ctx.set_response(Box::new(io::sink()));
        let response: SinkResponse = GzipResponse::new(self.pool.acquire(sink));
        ctx.set_response(Box::new(response));

        // The encoder goes back to the pool whatever the inner handler does.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(ctx)));
        let released = restore_response(ctx);

        match outcome {
            Err(payload) => panic::resume_unwind(payload),
            Ok(Err(err)) => {
                if let Err(e) = released {
                    warn!(cause = %e, "failed to finish gzip response after handler error");
                }
                Err(err)
            }
            Ok(Ok(())) => released.map_err(Into::into),
        }
    }
}

/// Takes the [`GzipResponse`] out of `ctx`, finishes it and reinstalls the
/// sink it decorated.
fn restore_response(ctx: &mut Context) -> io::Result<()> {
    let current = ctx.set_response(Box::new(io::sink()));

    // Deref past the box so the check sees the installed sink itself.
    if !(*current).as_any().is::<SinkResponse>() {
        debug!("response sink replaced downstream of gzip, it releases on drop");
        ctx.set_response(current);
        return Ok(());
    }
    let Ok(response) = current.into_any().downcast::<SinkResponse>() else {
        return Ok(());
    };

    match response.release() {
        Ok(sink) => {
            ctx.set_response(sink);
            Ok(())
        }
        Err(err) => {
            let (error, sink) = err.into_parts();
            ctx.set_response(sink);
            Err(error)
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Gzip<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
{
    type Response = http::Response<crate::body::GzipBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let accept_encoding = req.headers().get(header::ACCEPT_ENCODING);
        let host = request_host(req.headers(), req.uri());
        let compress = self.should_compress(accept_encoding, host);
        let pool = compress.then(|| Arc::clone(&self.pool));

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GzipConfig;
    use crate::context::handler_fn;
    use crate::layer::GzipLayer;
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use http::{Response, StatusCode};
    use http_body::Body;
    use http_body_util::Full;
    use std::convert::Infallible;
    use std::future::Future;
    use std::io::{Read, Write};
    use std::pin::pin;
    use tower::{Layer, ServiceBuilder, service_fn};

    const BODY: &[u8] = b"{\"items\": [1, 2, 3], \"items_again\": [1, 2, 3]}";

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    fn request(host: &str, accept_encoding: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/items").header(header::HOST, host);
        if let Some(value) = accept_encoding {
            builder = builder.header(header::ACCEPT_ENCODING, value);
        }
        builder.body(()).unwrap()
    }

    fn write_body(ctx: &mut Context) -> Result<(), BoxError> {
        ctx.set_resp_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        ctx.response_mut().write_all(BODY)?;
        Ok(())
    }

    /// Runs `handler` and returns the headers and the raw bytes it sent.
    fn serve<H: Handler>(
        handler: &H,
        req: Request<()>,
    ) -> (Result<(), BoxError>, http::HeaderMap, Vec<u8>) {
        let mut ctx = Context::new(req, Vec::new());
        let result = handler.call(&mut ctx);
        let (_, headers, sink) = ctx.into_parts();
        let body = *sink.into_any().downcast::<Vec<u8>>().unwrap();
        (result, headers, body)
    }

    fn gzip_handler<H: Handler>(config: GzipConfig, inner: H) -> Gzip<H> {
        GzipLayer::new(&config).unwrap().layer(inner)
    }

    #[test]
    fn test_compresses_when_gzip_accepted() {
        let handler = gzip_handler(GzipConfig::default(), handler_fn(write_body));
        let req = request("api.example.com", Some("gzip, deflate, br"));
        let (result, headers, body) = serve(&handler, req);

        result.unwrap();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(headers.get(header::VARY).unwrap(), "accept-encoding");
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(gunzip(&body), BODY);
        assert_eq!(handler.pool().idle(), 1);
    }

    #[test]
    fn test_passthrough_without_accept_encoding() {
        let handler = gzip_handler(GzipConfig::default(), handler_fn(write_body));
        let (result, headers, body) = serve(&handler, request("api.example.com", None));

        result.unwrap();
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(headers.get(header::VARY).is_none());
        assert_eq!(body, BODY);
        assert_eq!(handler.pool().idle(), 0);
    }

    #[test]
    fn test_accept_encoding_match_is_case_sensitive() {
        let handler = gzip_handler(GzipConfig::default(), handler_fn(write_body));
        let (_, headers, body) = serve(&handler, request("a.com", Some("GZIP")));
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body, BODY);

        // Substring test: any value containing the token qualifies.
        let (_, headers, _) = serve(&handler, request("a.com", Some("x-gzip")));
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
    }

    /// Builds a request whose `Accept-Encoding` is not visible ASCII.
    fn request_with_raw_accept_encoding(value: &'static [u8]) -> Request<()> {
        let mut req = request("a.com", None);
        req.headers_mut().insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_bytes(value).unwrap(),
        );
        req
    }

    #[test]
    fn test_accept_encoding_with_opaque_bytes() {
        let handler = gzip_handler(GzipConfig::default(), handler_fn(write_body));

        let req = request_with_raw_accept_encoding(b"gzip, caf\xe9");
        let (result, headers, body) = serve(&handler, req);
        result.unwrap();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(&body), BODY);

        let req = request_with_raw_accept_encoding(b"caf\xe9, br");
        let (_, headers, body) = serve(&handler, req);
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body, BODY);
    }

    #[test]
    fn test_domain_allowlist() {
        let config =
            GzipConfig::new().domains(["static.example.com", "*.cdn.example.com", "beta.*"]);
        let handler = gzip_handler(config, handler_fn(write_body));

        for (host, compressed) in [
            ("static.example.com", true),
            ("static.example.com:8443", true),
            ("img.cdn.example.com", true),
            ("beta.example.org", true),
            ("cdn.example.com", false),
            ("api.example.com", false),
            ("[::1]:8080", false),
        ] {
            let (result, headers, body) = serve(&handler, request(host, Some("gzip")));
            result.unwrap();
            assert_eq!(headers.contains_key(header::CONTENT_ENCODING), compressed, "{host}");
            if compressed {
                assert_eq!(gunzip(&body), BODY, "{host}");
            } else {
                assert_eq!(body, BODY, "{host}");
            }
        }
    }

    #[test]
    fn test_double_wildcard_domain_does_not_match() {
        let config = GzipConfig::new().domain("*.internal.*");
        let handler = gzip_handler(config, handler_fn(write_body));
        let (_, headers, body) = serve(&handler, request("foo.internal.net", Some("gzip")));
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body, BODY);
    }

    #[test]
    fn test_vary_not_duplicated() {
        let inner = handler_fn(write_body);
        let handler = gzip_handler(GzipConfig::default(), inner);

        let mut ctx = Context::new(request("a.com", Some("gzip")), Vec::new());
        ctx.add_resp_header(header::VARY, HeaderValue::from_static("accept-encoding"));
        Handler::call(&handler, &mut ctx).unwrap();

        assert_eq!(ctx.resp_headers().get_all(header::VARY).iter().count(), 1);
    }

    #[test]
    fn test_empty_body_is_valid_gzip() {
        let handler = gzip_handler(GzipConfig::default(), handler_fn(|_| Ok(())));
        let (result, headers, body) = serve(&handler, request("a.com", Some("gzip")));

        result.unwrap();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert!(!body.is_empty());
        assert!(gunzip(&body).is_empty());
    }

    #[test]
    fn test_streaming_flush() {
        let handler = gzip_handler(
            GzipConfig::default(),
            handler_fn(|ctx| {
                let sink = ctx.response_mut();
                sink.write_all(b"data: 1\n\n")?;
                sink.flush()?;
                sink.write_all(b"data: 2\n\n")?;
                sink.flush()?;
                Ok(())
            }),
        );
        let (result, _, body) = serve(&handler, request("a.com", Some("gzip")));
        result.unwrap();
        assert_eq!(gunzip(&body), b"data: 1\n\ndata: 2\n\n");
    }

    #[test]
    fn test_handler_error_still_releases() {
        let handler = gzip_handler(
            GzipConfig::default(),
            handler_fn(|ctx| {
                ctx.response_mut().write_all(b"partial")?;
                Err("database unavailable".into())
            }),
        );
        let (result, _, body) = serve(&handler, request("a.com", Some("gzip")));

        assert_eq!(result.unwrap_err().to_string(), "database unavailable");
        assert_eq!(gunzip(&body), b"partial");
        assert_eq!(handler.pool().idle(), 1);
    }

    #[test]
    fn test_panic_still_releases() {
        let handler = gzip_handler(
            GzipConfig::default(),
            handler_fn(|ctx| {
                ctx.response_mut().write_all(b"before panic")?;
                panic!("handler bug");
            }),
        );

        let mut ctx = Context::new(request("a.com", Some("gzip")), Vec::new());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| Handler::call(&handler, &mut ctx)));

        assert!(outcome.is_err());
        assert_eq!(handler.pool().idle(), 1);
        let (_, _, sink) = ctx.into_parts();
        let body = sink.into_any().downcast::<Vec<u8>>().unwrap();
        assert_eq!(gunzip(&body), b"before panic");
    }

    #[test]
    fn test_sink_write_error_propagates() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let handler = gzip_handler(GzipConfig::default(), handler_fn(write_body));
        let mut ctx = Context::new(request("a.com", Some("gzip")), Closed);
        let err = Handler::call(&handler, &mut ctx).unwrap_err();

        let err = err.downcast::<io::Error>().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(handler.pool().idle(), 1);
        assert!(ctx.response().as_any().is::<Closed>());
    }

    #[test]
    fn test_release_error_after_successful_handler() {
        struct Gone;
        impl Write for Gone {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        // Nothing is written before release, so finishing the stream is
        // the first write to reach the sink.
        let handler = gzip_handler(GzipConfig::default(), handler_fn(|_| Ok(())));
        let mut ctx = Context::new(request("a.com", Some("gzip")), Gone);
        let err = Handler::call(&handler, &mut ctx).unwrap_err();

        let err = err.downcast::<io::Error>().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(err.to_string(), "gone");
        assert_eq!(handler.pool().idle(), 1);
        assert!(ctx.response().as_any().is::<Gone>());
    }

    #[test]
    fn test_error_translation_inside_gzip_is_compressed() {
        struct TranslateErrors<H>(H);

        impl<H: Handler> Handler for TranslateErrors<H> {
            fn call(&self, ctx: &mut Context) -> Result<(), BoxError> {
                if let Err(err) = self.0.call(ctx) {
                    ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                    write!(ctx.response_mut(), "error: {err}")?;
                }
                Ok(())
            }
        }

        let handler = ServiceBuilder::new()
            .layer(GzipLayer::default())
            .service(TranslateErrors(handler_fn(|_| Err("not found".into()))));

        let mut ctx = Context::new(request("a.com", Some("gzip")), Vec::new());
        Handler::call(&handler, &mut ctx).unwrap();

        let (status, headers, sink) = ctx.into_parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        let body = sink.into_any().downcast::<Vec<u8>>().unwrap();
        assert_eq!(gunzip(&body), b"error: not found");
    }

    #[test]
    fn test_sink_replaced_downstream_releases_on_drop() {
        /// Wraps whatever sink it finds, like a second body filter would.
        struct Tee(Box<dyn ResponseSink>);
        impl Write for Tee {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                self.0.flush()
            }
        }

        let handler = gzip_handler(
            GzipConfig::default(),
            handler_fn(|ctx| {
                let current = ctx.set_response(Box::new(io::sink()));
                ctx.set_response(Box::new(Tee(current)));
                ctx.response_mut().write_all(b"through tee")?;
                Ok(())
            }),
        );

        let mut ctx = Context::new(request("a.com", Some("gzip")), Vec::new());
        Handler::call(&handler, &mut ctx).unwrap();
        assert_eq!(handler.pool().idle(), 0);
        assert!(ctx.response().as_any().is::<Tee>());

        drop(ctx);
        assert_eq!(handler.pool().idle(), 1);
    }

    #[test]
    fn test_concurrent_requests() {
        let handler = gzip_handler(
            GzipConfig::default(),
            handler_fn(|ctx| {
                let body = ctx.req_header("x-body").unwrap_or_default().repeat(100);
                ctx.response_mut().write_all(body.as_bytes())?;
                Ok(())
            }),
        );

        std::thread::scope(|s| {
            for i in 0..8 {
                let handler = &handler;
                s.spawn(move || {
                    for round in 0..25 {
                        let marker = format!("t{i}r{round};");
                        let req = Request::builder()
                            .header(header::HOST, "a.com")
                            .header(header::ACCEPT_ENCODING, "gzip")
                            .header("x-body", marker.as_str())
                            .body(())
                            .unwrap();
                        let (result, _, body) = serve(handler, req);
                        result.unwrap();
                        assert_eq!(gunzip(&body), marker.repeat(100).as_bytes());
                    }
                });
            }
        });

        assert!(handler.pool().idle() <= 8);
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        let waker = std::task::Waker::noop();
        let mut cx = TaskContext::from_waker(waker);
        match pin!(future).poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("future was not ready"),
        }
    }

    fn collect<B>(body: B) -> Vec<u8>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Debug,
    {
        let waker = std::task::Waker::noop();
        let mut cx = TaskContext::from_waker(waker);
        let mut body = body;
        let mut out = Vec::new();
        loop {
            match std::pin::Pin::new(&mut body).poll_frame(&mut cx) {
                Poll::Ready(Some(frame)) => {
                    if let Ok(data) = frame.unwrap().into_data() {
                        out.extend_from_slice(&data);
                    }
                }
                Poll::Ready(None) => return out,
                Poll::Pending => panic!("body was not ready"),
            }
        }
    }

    fn tower_service(
        config: GzipConfig,
    ) -> Gzip<impl Service<Request<()>, Response = Response<Full<Bytes>>, Error = Infallible>> {
        GzipLayer::new(&config).unwrap().layer(service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(BODY))))
        }))
    }

    #[test]
    fn test_tower_service_compresses() {
        let mut svc = tower_service(GzipConfig::default());
        let req = request("api.example.com", Some("gzip"));
        let response = block_on(Service::call(&mut svc, req)).unwrap();

        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers().get(header::VARY).unwrap(), "accept-encoding");
        assert_eq!(gunzip(&collect(response.into_body())), BODY);
        assert_eq!(svc.pool().idle(), 1);
    }

    #[test]
    fn test_tower_service_respects_domains() {
        let mut svc = tower_service(GzipConfig::new().domain("*.example.com"));

        let req = request("other.org:80", Some("gzip"));
        let response = block_on(Service::call(&mut svc, req)).unwrap();
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(collect(response.into_body()), BODY);

        let req = request("www.example.com:80", Some("gzip"));
        let response = block_on(Service::call(&mut svc, req)).unwrap();
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(&collect(response.into_body())), BODY);
    }

    #[test]
    fn test_tower_service_passthrough() {
        let mut svc = tower_service(GzipConfig::default());
        let req = request("a.com", Some("identity"));
        let response = block_on(Service::call(&mut svc, req)).unwrap();
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(collect(response.into_body()), BODY);
    }

    #[test]
    fn test_tower_service_accept_encoding_with_opaque_bytes() {
        let mut svc = tower_service(GzipConfig::default());
        let req = request_with_raw_accept_encoding(b"br, gzip;q=0.5, caf\xe9");
        let response = block_on(Service::call(&mut svc, req)).unwrap();

        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(&collect(response.into_body())), BODY);
    }
}
