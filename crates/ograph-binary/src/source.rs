//! Positioned access to the bytes of a file being loaded.

use std::fmt;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use ograph_format::FormatError;

use crate::error::{LoadError, LoadResult};

/// Random-access reads over a loaded file.
///
/// Shared between the loader and the latent buffers it hands out, so a
/// buffer body can still be read after the load has returned.
pub trait FileSource: Send + Sync + fmt::Debug {
    /// Stream length in bytes, counted from the start of the stream.
    fn len(&self) -> u64;

    /// Read exactly `size` bytes at absolute `offset`.
    fn read_at(&self, offset: u64, size: usize) -> io::Result<Bytes>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory file. Reads are zero-copy slices.
impl FileSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    fn read_at(&self, offset: u64, size: usize) -> io::Result<Bytes> {
        let start = usize::try_from(offset).map_err(|_| io::Error::from(ErrorKind::UnexpectedEof))?;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= Bytes::len(self))
            .ok_or_else(|| io::Error::from(ErrorKind::UnexpectedEof))?;
        Ok(self.slice(start..end))
    }
}

/// Any seekable reader, shared behind a mutex.
pub struct ReaderSource<R> {
    reader: Mutex<R>,
    len: u64,
}

impl<R: Read + Seek> ReaderSource<R> {
    /// Wrap `reader`, leaving its position unchanged.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let position = reader.stream_position()?;
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(position))?;
        Ok(Self {
            reader: Mutex::new(reader),
            len,
        })
    }
}

impl<R: Read + Seek + Send> FileSource for ReaderSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, size: usize) -> io::Result<Bytes> {
        if offset.checked_add(size as u64).map_or(true, |end| end > self.len) {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| io::Error::from(ErrorKind::OutOfMemory))?;
        data.resize(size, 0);
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }
}

impl<R> fmt::Debug for ReaderSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSource").field("len", &self.len).finish()
    }
}

/// `Read + Seek` view of a source, for the table reader.
pub(crate) struct SourceCursor<'a> {
    source: &'a dyn FileSource,
    position: u64,
}

impl<'a> SourceCursor<'a> {
    pub(crate) fn new(source: &'a dyn FileSource, position: u64) -> Self {
        Self { source, position }
    }
}

impl Read for SourceCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.source.len().saturating_sub(self.position);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        let data = self.source.read_at(self.position, n)?;
        buf[..n].copy_from_slice(&data);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SourceCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.source.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        self.position = target
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "seek before the start of the file"))?;
        Ok(self.position)
    }
}

/// Read `size` bytes at absolute `offset`, reporting allocation failure and
/// short reads as load errors.
pub(crate) fn read_block(source: &dyn FileSource, offset: u64, size: u64) -> LoadResult<Bytes> {
    let len = usize::try_from(size).map_err(|_| LoadError::AllocationFailed { size })?;
    source.read_at(offset, len).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => LoadError::Format(FormatError::Truncated {
            offset,
            reason: format!("{size} bytes expected"),
        }),
        ErrorKind::OutOfMemory => LoadError::AllocationFailed { size },
        _ => LoadError::Io(e),
    })
}
