//! Low-level byte transfer for the binary codecs.
//!
//! Both wrappers track the stream offset and verify that every transfer moves exactly the
//! number of bytes requested. A stream that stops early produces
//! [`ArchiveError::ShortWrite`] / [`ArchiveError::ShortRead`] carrying both counts.

use crate::error::{ArchiveError, Result};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

/// A writer that tracks the current offset and rejects partial writes.
#[derive(Debug)]
pub struct CountingWriter<W> {
    writer: W,
    current_offset: u64,
}

impl<W: Write> CountingWriter<W> {
    /// Wraps `writer`; offsets are counted from zero.
    pub fn new(writer: W) -> Self {
        Self { writer, current_offset: 0 }
    }

    /// Writes the complete buffer or fails with the number of bytes that made it out.
    pub fn write_exact(&mut self, buffer: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buffer.len() {
            match self.writer.write(&buffer[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.current_offset += written as u64;

        if written != buffer.len() {
            return Err(ArchiveError::ShortWrite {
                requested: buffer.len() as u64,
                written: written as u64,
            });
        }
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Bytes written so far.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }
}

/// A reader that tracks the current offset and rejects partial reads.
///
/// When the stream length is known (see [`CountingReader::measured`]) the reader can also
/// report how many bytes remain.
#[derive(Debug)]
pub struct CountingReader<R> {
    reader: R,
    current_offset: u64,
    end_offset: Option<u64>,
}

impl<R: Read> CountingReader<R> {
    /// Wraps a stream of unknown length.
    pub fn new(reader: R) -> Self {
        Self { reader, current_offset: 0, end_offset: None }
    }

    /// Fills `buffer` completely or fails with the number of bytes that were available.
    pub fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let mut read = 0;
        while read < buffer.len() {
            match self.reader.read(&mut buffer[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.current_offset += read as u64;

        if read != buffer.len() {
            return Err(ArchiveError::ShortRead {
                requested: buffer.len() as u64,
                read: read as u64,
            });
        }
        Ok(())
    }

    /// Reads `len` bytes into a new vector.
    ///
    /// The vector grows with the data actually read, so a corrupted length costs at most one
    /// chunk of allocation beyond the end of the stream.
    pub fn read_to_vec(&mut self, len: u64) -> Result<Vec<u8>> {
        const CHUNK: u64 = 64 * 1024;
        let mut out = Vec::with_capacity(len.min(CHUNK) as usize);
        let mut left = len;
        while left > 0 {
            let step = left.min(CHUNK) as usize;
            let start = out.len();
            out.resize(start + step, 0);
            if let Err(err) = self.read_exact(&mut out[start..]) {
                return Err(match err {
                    ArchiveError::ShortRead { read, .. } => ArchiveError::ShortRead {
                        requested: len,
                        read: start as u64 + read,
                    },
                    other => other,
                });
            }
            left -= step as u64;
        }
        Ok(out)
    }

    /// Offset of the next byte to be read.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Bytes left before the end of the stream, if the length was measured.
    pub fn remaining(&self) -> Option<u64> {
        self.end_offset.map(|end| end.saturating_sub(self.current_offset))
    }
}

impl<R: Read + Seek> CountingReader<R> {
    /// Wraps a seekable stream and measures its length once by seeking to the end and back.
    pub fn measured(mut reader: R) -> Result<Self> {
        let start = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start))?;
        Ok(Self {
            reader,
            current_offset: 0,
            end_offset: Some(end.saturating_sub(start)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn full_slice_rejects_overflow() {
        let mut storage = [0u8; 3];
        let mut writer = CountingWriter::new(&mut storage[..]);
        let err = writer.write_exact(&[1, 2, 3, 4, 5]);
        assert!(matches!(err, Err(ArchiveError::ShortWrite { requested: 5, written: 3 })));
    }

    #[test]
    fn truncated_stream_reports_bytes_read() {
        let mut reader = CountingReader::new(Cursor::new(vec![9u8, 9]));
        let mut buf = [0u8; 4];
        let err = reader.read_exact(&mut buf);
        assert!(matches!(err, Err(ArchiveError::ShortRead { requested: 4, read: 2 })));
    }

    #[test]
    fn measured_reader_counts_down() -> Result<()> {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        cursor.set_position(2);
        let mut reader = CountingReader::measured(cursor)?;
        assert_eq!(reader.remaining(), Some(8));
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf)?;
        assert_eq!(reader.remaining(), Some(3));
        assert_eq!(reader.current_offset(), 5);
        Ok(())
    }
}
