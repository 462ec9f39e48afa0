use crate::pool::PooledWriter;
use bytes::{Buf, Bytes, BytesMut};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that may be gzipped.
    ///
    /// Either compresses the inner body through a pooled encoder or passes
    /// it through unchanged.
    #[project = GzipBodyProj]
    #[allow(missing_docs)]
    pub enum GzipBody<B> {
        /// Compressed body with its pooled encoder.
        Compressed {
            #[pin]
            inner: B,
            state: CompressedBody,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

/// In-memory sink the pooled encoder of a body writes into.
pub(crate) struct BodyWriter {
    buf: BytesMut,
}

impl BodyWriter {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// State of an actively compressed body.
pub(crate) struct CompressedBody {
    /// Released once the inner body ends; dropping it releases too.
    writer: Option<PooledWriter<BodyWriter>>,
    always_flush: bool,
    state: CompressState,
    pending_trailers: Option<http::HeaderMap>,
}

/// State machine for compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Reading data from inner body and compressing.
    Reading,
    /// Finishing the gzip stream after the inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Compression is complete.
    Done,
}

impl CompressedBody {
    fn new(writer: PooledWriter<BodyWriter>, always_flush: bool) -> Self {
        Self {
            writer: Some(writer),
            always_flush,
            state: CompressState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current compression state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Returns whether every chunk is flushed as it is compressed.
    #[allow(dead_code)]
    pub(crate) fn always_flush(&self) -> bool {
        self.always_flush
    }

    /// Polls the inner body and compresses data.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    if let Some(trailers) = self.pending_trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                    return Poll::Ready(None);
                }

                CompressState::Finishing => {
                    self.state = if self.pending_trailers.is_some() {
                        CompressState::Trailers
                    } else {
                        CompressState::Done
                    };

                    let Some(writer) = self.writer.take() else {
                        continue;
                    };
                    match writer.release() {
                        Ok(mut sink) => {
                            let data = sink.take();
                            if !data.is_empty() {
                                return Poll::Ready(Some(Ok(Frame::data(data))));
                            }
                        }
                        Err(e) => {
                            self.state = CompressState::Done;
                            return Poll::Ready(Some(Err(e.into())));
                        }
                    }
                }

                CompressState::Reading => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        // Inner body is done, transition to finishing
                        self.state = CompressState::Finishing;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(data) => {
                            let compressed = match self.compress_chunk(data) {
                                Ok(compressed) => compressed,
                                Err(e) => return Poll::Ready(Some(Err(e))),
                            };
                            if !compressed.is_empty() {
                                return Poll::Ready(Some(Ok(Frame::data(compressed))));
                            }
                            // Nothing came out yet, keep reading
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                // Buffer trailers and finish compression first
                                self.pending_trailers = Some(trailers);
                                self.state = CompressState::Finishing;
                            }
                        }
                    },
                },
            }
        }
    }

    /// Compresses one data frame, returning whatever output is ready.
    fn compress_chunk<D: Buf>(&mut self, mut data: D) -> io::Result<Bytes> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(Bytes::new());
        };

        while data.has_remaining() {
            let chunk = data.chunk();
            writer.write_all(chunk)?;
            let len = chunk.len();
            data.advance(len);
        }

        if self.always_flush {
            writer.flush()?;
        }

        Ok(writer.get_mut().take())
    }
}

impl<B> GzipBody<B> {
    /// Creates a compressed body writing through `writer`.
    pub(crate) fn compressed(
        inner: B,
        writer: PooledWriter<BodyWriter>,
        always_flush: bool,
    ) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(writer, always_flush),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }
}

impl<B> Body for GzipBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            GzipBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
            },
            GzipBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            GzipBody::Passthrough { inner } => inner.is_end_stream(),
            GzipBody::Compressed { state, .. } => state.state() == CompressState::Done,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            GzipBody::Passthrough { inner } => inner.size_hint(),
            // Compressed size is unknown
            GzipBody::Compressed { .. } => http_body::SizeHint::default(),
        }
    }
}
