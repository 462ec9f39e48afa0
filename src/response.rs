use crate::error::ReleaseError;
use crate::pool::PooledWriter;
use std::fmt;
use std::io::{self, Write};

/// A response sink that gzips everything written through it.
///
/// Only the body path is intercepted: `write` and `flush` go through the
/// pooled encoder, and the underlying sink stays reachable through
/// [`get_ref`](Self::get_ref) and [`get_mut`](Self::get_mut).
pub struct GzipResponse<W: Write> {
    writer: PooledWriter<W>,
}

impl<W: Write> GzipResponse<W> {
    /// Decorates the sink `writer` is bound to.
    pub fn new(writer: PooledWriter<W>) -> Self {
        Self { writer }
    }

    /// Returns the underlying sink.
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    /// Returns the underlying sink mutably.
    pub fn get_mut(&mut self) -> &mut W {
        self.writer.get_mut()
    }

    /// Finishes the gzip stream and returns the underlying sink.
    pub fn release(self) -> Result<W, ReleaseError<W>> {
        self.writer.release()
    }
}

impl<W: Write> Write for GzipResponse<W> {
    /// Returns the number of uncompressed bytes accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    /// Flushes buffered compressed data into the underlying sink, then
    /// flushes the sink itself.
    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write> fmt::Debug for GzipResponse<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipResponse")
            .field("writer", &self.writer)
            .finish()
    }
}
