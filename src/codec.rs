use crate::error::ConfigError;
use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use std::io::{self, Write};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_DEFLATE: u8 = 8;
const GZIP_OS_UNKNOWN: u8 = 255;

/// Gzip compression level, from store-only (`0`) to best compression (`9`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Level(u32);

impl Level {
    /// No compression; deflate emits stored blocks.
    pub const STORE_ONLY: Level = Level(0);
    /// Fastest compression.
    pub const BEST_SPEED: Level = Level(1);
    /// The zlib default.
    pub const DEFAULT: Level = Level(6);
    /// Smallest output.
    pub const BEST_COMPRESSION: Level = Level(9);

    /// Validates a configured level.
    pub fn new(level: i32) -> Result<Self, ConfigError> {
        match u32::try_from(level) {
            Ok(level) if level <= Self::BEST_COMPRESSION.0 => Ok(Level(level)),
            _ => Err(ConfigError::InvalidLevel(level)),
        }
    }

    /// Returns the numeric level.
    pub fn get(self) -> u32 {
        self.0
    }

    fn compression(self) -> Compression {
        Compression::new(self.0)
    }

    /// The XFL byte of the gzip header.
    fn extra_flags(self) -> u8 {
        match self {
            Self::BEST_COMPRESSION => 2,
            Self::BEST_SPEED => 4,
            _ => 0,
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i32> for Level {
    type Error = ConfigError;

    fn try_from(level: i32) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Nothing emitted yet; the header goes out on first use.
    Fresh,
    /// Header written, deflate stream open.
    Open,
    /// Trailer written.
    Finished,
}

/// A resettable gzip stream.
///
/// The encoder never owns its output: every call names the sink the
/// compressed bytes go to. That keeps the deflate state, CRC and output
/// buffer free of any sink type, so one encoder can serve any sink in turn
/// and is reused with [`reset`](Self::reset) instead of being rebuilt.
pub struct GzipEncoder {
    level: Level,
    compress: Compress,
    crc: Crc,
    output_buffer: Vec<u8>,
    state: StreamState,
}

impl GzipEncoder {
    /// Creates an encoder at the given level.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            compress: Compress::new(level.compression(), false),
            crc: Crc::new(),
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
            state: StreamState::Fresh,
        }
    }

    /// Returns the level this encoder compresses at.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Restarts the stream, keeping every allocated buffer.
    pub fn reset(&mut self) {
        self.compress.reset();
        self.crc.reset();
        self.state = StreamState::Fresh;
    }

    /// Compresses `input` into `sink`.
    ///
    /// Returns the number of input bytes consumed, not the number of
    /// compressed bytes produced.
    pub fn write<W: Write + ?Sized>(&mut self, sink: &mut W, input: &[u8]) -> io::Result<usize> {
        self.begin(sink)?;

        let mut remaining = input;
        while !remaining.is_empty() {
            let (consumed, produced, _) = self.deflate(sink, remaining, FlushCompress::None)?;
            self.crc.update(&remaining[..consumed]);
            remaining = &remaining[consumed..];

            // Safety check to prevent infinite loop
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        Ok(input.len() - remaining.len())
    }

    /// Pushes everything written so far into `sink` as decodable output,
    /// then flushes the sink.
    pub fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.begin(sink)?;
        loop {
            let (_, produced, _) = self.deflate(sink, &[], FlushCompress::Sync)?;
            if produced < self.output_buffer.len() {
                break;
            }
        }
        sink.flush()
    }

    /// Ends the deflate stream and writes the gzip trailer into `sink`.
    ///
    /// Finishing an untouched stream yields a valid empty gzip member.
    /// Finishing twice is a no-op.
    pub fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        if self.state == StreamState::Finished {
            return Ok(());
        }
        self.begin(sink)?;
        loop {
            let (_, _, status) = self.deflate(sink, &[], FlushCompress::Finish)?;
            if matches!(status, Status::StreamEnd) {
                break;
            }
        }

        let mut trailer = [0u8; 8];
        trailer[..4].copy_from_slice(&self.crc.sum().to_le_bytes());
        trailer[4..].copy_from_slice(&self.crc.amount().to_le_bytes());
        sink.write_all(&trailer)?;
        self.state = StreamState::Finished;
        Ok(())
    }

    /// Returns whether the trailer has been written.
    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    /// Writes the gzip header if the stream is fresh.
    fn begin<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        match self.state {
            StreamState::Open => Ok(()),
            StreamState::Finished => Err(io::Error::other("gzip: write after finish")),
            StreamState::Fresh => {
                let header = [
                    GZIP_MAGIC[0],
                    GZIP_MAGIC[1],
                    GZIP_DEFLATE,
                    0, // FLG
                    0, // MTIME
                    0,
                    0,
                    0,
                    self.level.extra_flags(),
                    GZIP_OS_UNKNOWN,
                ];
                sink.write_all(&header)?;
                self.state = StreamState::Open;
                Ok(())
            }
        }
    }

    /// Runs one deflate step and forwards its output to `sink`.
    ///
    /// Returns `(consumed, produced, status)`.
    fn deflate<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        input: &[u8],
        flush: FlushCompress,
    ) -> io::Result<(usize, usize, Status)> {
        let before_in = self.compress.total_in();
        let before_out = self.compress.total_out();

        let status = self
            .compress
            .compress(input, &mut self.output_buffer, flush)
            .map_err(io::Error::other)?;

        let consumed = (self.compress.total_in() - before_in) as usize;
        let produced = (self.compress.total_out() - before_out) as usize;
        if produced > 0 {
            sink.write_all(&self.output_buffer[..produced])?;
        }

        Ok((consumed, produced, status))
    }
}
