use crate::body::{BodyWriter, GzipBody};
use crate::pool::GzipPool;
use http::header::{self, HeaderMap, HeaderValue};
use http::Response;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Response future of [`Gzip`](crate::Gzip) used as a `tower::Service`.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        pool: Option<Arc<GzipPool>>,
    }
}

impl<F> ResponseFuture<F> {
    /// `pool` is set when the request qualified for compression.
    pub(crate) fn new(inner: F, pool: Option<Arc<GzipPool>>) -> Self {
        Self { inner, pool }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<GzipBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let response = std::task::ready!(this.inner.poll(cx))?;
        Poll::Ready(Ok(gzip_response(response, this.pool.take())))
    }
}

/// Swaps the body for a gzip stream when the request qualified and the
/// response is neither encoded already nor a range.
fn gzip_response<B>(response: Response<B>, pool: Option<Arc<GzipPool>>) -> Response<GzipBody<B>> {
    let (mut parts, body) = response.into_parts();

    let Some(pool) = pool.filter(|_| is_compressible(&parts.headers)) else {
        return Response::from_parts(parts, GzipBody::passthrough(body));
    };

    let always_flush = wants_flush(&parts.headers);

    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    // The compressed length is unknown and byte ranges no longer apply.
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::ACCEPT_RANGES);
    add_vary_accept_encoding(&mut parts.headers);

    let writer = pool.acquire(BodyWriter::new());
    Response::from_parts(parts, GzipBody::compressed(body, writer, always_flush))
}

fn is_compressible(headers: &HeaderMap) -> bool {
    !headers.contains_key(header::CONTENT_ENCODING) && !headers.contains_key(header::CONTENT_RANGE)
}

/// Streaming responses get every chunk flushed through the encoder.
fn wants_flush(headers: &HeaderMap) -> bool {
    let header_str = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    let unbuffered = header_str(header::HeaderName::from_static("x-accel-buffering"))
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));
    let streaming = header_str(header::CONTENT_TYPE).is_some_and(|ct| {
        ["text/event-stream", "application/grpc-web"]
            .iter()
            .any(|prefix| ct.starts_with(prefix))
    });

    unbuffered || streaming
}

/// Appends `accept-encoding` to `Vary` unless a value already covers it.
pub(crate) fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    let covered = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|token| token == "*" || token.eq_ignore_ascii_case("accept-encoding"));

    if !covered {
        headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
    }
}
