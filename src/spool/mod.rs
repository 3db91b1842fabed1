use std::io::{self, Read};

use chrono::NaiveDateTime;
use thiserror::Error;

/// Spools whose header declares every plane length upfront.
pub mod declared;

/// Spools made of self-describing command blocks that end with a terminal tag.
pub mod tagged;

/// Declared lengths are never trusted for a single allocation; buffers grow in steps of this size.
const READ_CHUNK: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The spool holds no further job.")]
    EndOfStream,

    #[error("The spool header has a bad magic value (expected {expected:02x?}, got {found:02x?}).")]
    BadMagic { expected: Vec<u8>, found: Vec<u8> },

    #[error("The spool is truncated (expected {expected} bytes, only {available} available).")]
    Truncated { expected: usize, available: usize },

    #[error("The spool ended after {consumed} bytes, before the terminal {terminal} block.")]
    Incomplete {
        terminal: &'static str,
        consumed: u64,
    },

    #[error("The spool declares a zero-length {0}.")]
    ZeroLength(String),

    #[error("The spool is inconsistent: {0}")]
    Inconsistent(String),

    #[error("The print size {columns}x{rows} is not supported on media {media:#06x}.")]
    UnsupportedSize { columns: u32, rows: u32, media: u32 },

    #[error("Malformed command block: {0}")]
    MalformedBlock(String),

    #[error("Reading the spool failed: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// In a command-tagged stream, running out of data anywhere before the
    /// terminal block means the job is incomplete, not merely truncated.
    pub(crate) fn into_incomplete(self, terminal: &'static str, consumed: u64) -> Self {
        match self {
            Error::EndOfStream | Error::Truncated { .. } => Error::Incomplete { terminal, consumed },
            other => other,
        }
    }
}

/// Per-run knobs that influence how a spool is rewritten while it is read.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Replaces the copy count found in the spool.
    pub copies_override: Option<u16>,

    /// Injected into families that stamp the job with the print time.
    pub timestamp: NaiveDateTime,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            copies_override: None,
            timestamp: chrono::Local::now().naive_local(),
        }
    }
}

/// Incremental reader over the job file descriptor.
/// It counts every byte it hands out, so parsers can report where a stream broke off.
pub struct SpoolCursor<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> SpoolCursor<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Read until `buf` is full or the stream ends.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        self.consumed += filled as u64;
        Ok(filled)
    }

    /// Read the leading record of a job.
    /// A stream that is already exhausted yields `EndOfStream`, a partial record `Truncated`.
    pub fn read_record(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut record = vec![0u8; len];
        let got = self.fill(&mut record)?;

        match got {
            0 if len > 0 => Err(Error::EndOfStream),
            n if n < len => Err(Error::Truncated {
                expected: len,
                available: n,
            }),
            _ => Ok(record),
        }
    }

    /// Read exactly `len` payload bytes into a buffer that grows as data arrives.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut data = Vec::with_capacity(len.min(READ_CHUNK));

        while data.len() < len {
            let start = data.len();
            let step = (len - start).min(READ_CHUNK);
            data.resize(start + step, 0);

            let got = self.fill(&mut data[start..])?;

            if got < step {
                return Err(Error::Truncated {
                    expected: len,
                    available: start + got,
                });
            }
        }

        Ok(data)
    }

    /// Consume and drop `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        let skipped = io::copy(&mut (&mut self.inner).take(len as u64), &mut io::sink())?;
        self.consumed += skipped;

        if (skipped as usize) < len {
            return Err(Error::Truncated {
                expected: len,
                available: skipped as usize,
            });
        }

        Ok(())
    }
}
