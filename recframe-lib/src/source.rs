use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::prelude::*;

/// An ordered, seekable provider of input bytes.
///
/// Implementations never retry; any I/O error is returned to the caller as fatal.
pub trait Source {
    /// Read up to `max` bytes.
    ///
    /// Fewer than `max` bytes are returned only at end of input, and an empty result is
    /// the canonical end-of-input signal.
    ///
    /// # Errors
    /// [Error::Io] if the underlying read fails.
    fn read(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Offset of the next byte [Source::read] will return.
    fn tell(&self) -> u64;

    /// Reposition to an absolute offset.
    ///
    /// # Errors
    /// [Error::Io] if the underlying seek fails.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// True once a read has observed end of input at the current position.
    fn at_eof(&self) -> bool;

    /// Total input length, when known up front. The position is left unchanged.
    ///
    /// # Errors
    /// [Error::Io] if the length cannot be determined.
    fn size(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// [Source] over any [Read] + [Seek], e.g., a file or an in-memory cursor.
pub struct ReaderSource<R>
where
    R: Read + Seek,
{
    reader: R,
    offset: u64,
    eof: bool,
}

impl<R> ReaderSource<R>
where
    R: Read + Seek,
{
    pub fn new(reader: R) -> Self {
        ReaderSource {
            reader,
            offset: 0,
            eof: false,
        }
    }
}

impl ReaderSource<BufReader<File>> {
    /// Open a file for reading from its first byte.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(ReaderSource::new(BufReader::new(File::open(path)?)))
    }
}

impl<R> Source for ReaderSource<R>
where
    R: Read + Seek,
{
    fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let mut filled = 0;
        while filled < max {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Io(err)),
            }
        }
        buf.truncate(filled);
        self.offset += filled as u64;
        Ok(buf)
    }

    fn tell(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        self.eof = false;
        Ok(())
    }

    fn at_eof(&self) -> bool {
        self.eof
    }

    fn size(&mut self) -> Result<Option<u64>> {
        let end = self.reader.seek(SeekFrom::End(0))?;
        self.reader.seek(SeekFrom::Start(self.offset))?;
        Ok(Some(end))
    }
}
