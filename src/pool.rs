use crate::codec::{GzipEncoder, Level};
use crate::error::ReleaseError;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{trace, warn};

/// Default number of idle encoders a pool retains.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// A pool of reusable gzip encoders.
///
/// Deflate state is large, so encoders are kept across requests and
/// rebound to each request's sink rather than rebuilt. Idle encoders hold no
/// sink, which lets a single pool serve sinks of any type.
pub struct GzipPool {
    level: Level,
    max_idle: usize,
    idle: Mutex<Vec<Box<GzipEncoder>>>,
}

impl GzipPool {
    /// Creates an empty pool whose encoders compress at `level`.
    ///
    /// At most `max_idle` released encoders are retained; extra ones are
    /// dropped.
    pub fn new(level: Level, max_idle: usize) -> Self {
        Self {
            level,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Returns the level of every encoder this pool hands out.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Returns the number of idle encoders.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Leases an encoder and binds it to `sink`.
    ///
    /// An idle encoder is reused when one exists; otherwise a new one is
    /// allocated. Either way the stream is reset before binding, so nothing
    /// from a previous request survives.
    pub fn acquire<W: Write>(self: &Arc<Self>, sink: W) -> PooledWriter<W> {
        let reused = self.idle.lock().pop();
        let mut encoder = match reused {
            Some(encoder) => encoder,
            None => {
                trace!(level = self.level.get(), "allocating gzip encoder");
                Box::new(GzipEncoder::new(self.level))
            }
        };
        encoder.reset();

        PooledWriter {
            pool: Arc::clone(self),
            encoder: Some(encoder),
            sink: Some(sink),
        }
    }

    fn put(&self, encoder: Box<GzipEncoder>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(encoder);
        } else {
            trace!(max_idle = self.max_idle, "idle set full, dropping gzip encoder");
        }
    }
}

impl fmt::Debug for GzipPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipPool")
            .field("level", &self.level)
            .field("max_idle", &self.max_idle)
            .field("idle", &self.idle())
            .finish()
    }
}

/// A pooled gzip encoder bound to a sink.
///
/// Writes are compressed into the sink. [`release`](Self::release) finishes
/// the stream, unbinds the sink and returns the encoder to its pool.
/// Dropping the writer without releasing it does the same, logging any
/// error instead of returning it.
pub struct PooledWriter<W: Write> {
    pool: Arc<GzipPool>,
    encoder: Option<Box<GzipEncoder>>,
    sink: Option<W>,
}

impl<W: Write> PooledWriter<W> {
    /// Returns the bound sink.
    pub fn get_ref(&self) -> &W {
        self.sink.as_ref().expect("sink is bound until release")
    }

    /// Returns the bound sink mutably.
    ///
    /// Writing to it directly interleaves raw bytes with the gzip stream.
    pub fn get_mut(&mut self) -> &mut W {
        self.sink.as_mut().expect("sink is bound until release")
    }

    /// Finishes the stream into the sink and returns the encoder to the pool.
    ///
    /// The encoder goes back to the pool even when finishing fails; it is
    /// reset on its next acquisition.
    pub fn release(mut self) -> Result<W, ReleaseError<W>> {
        let finished = self.finish();
        let sink = self.sink.take().expect("sink is bound until release");
        self.recycle();
        match finished {
            Ok(()) => Ok(sink),
            Err(error) => Err(ReleaseError::new(error, sink)),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match (self.encoder.as_deref_mut(), self.sink.as_mut()) {
            (Some(encoder), Some(sink)) => encoder.finish(sink),
            _ => Ok(()),
        }
    }

    fn recycle(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.pool.put(encoder);
        }
    }

    fn parts(&mut self) -> io::Result<(&mut GzipEncoder, &mut W)> {
        match (self.encoder.as_deref_mut(), self.sink.as_mut()) {
            (Some(encoder), Some(sink)) => Ok((encoder, sink)),
            _ => Err(io::Error::other("gzip: writer already released")),
        }
    }
}

impl<W: Write> Write for PooledWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (encoder, sink) = self.parts()?;
        encoder.write(sink, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let (encoder, sink) = self.parts()?;
        encoder.flush(sink)
    }
}

impl<W: Write> Drop for PooledWriter<W> {
    fn drop(&mut self) {
        if self.encoder.is_none() {
            return;
        }
        if let Err(e) = self.finish() {
            warn!(cause = %e, "failed to finish gzip stream of a dropped writer");
        }
        self.sink.take();
        self.recycle();
    }
}

impl<W: Write> fmt::Debug for PooledWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledWriter")
            .field("level", &self.pool.level)
            .field("released", &self.encoder.is_none())
            .finish_non_exhaustive()
    }
}
