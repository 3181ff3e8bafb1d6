//! Native binary codec.
//!
//! Scalars travel as their raw in-memory bytes; names and nodes are ignored. Strings and blobs
//! are a `u64` size tag followed by the bytes. Both ends must agree on the schema and on the
//! machine byte order.

use super::{Format, InputCodec, OutputCodec, Primitive, PrimitiveKind};
use crate::error::{ArchiveError, Result};
use crate::io::{CountingReader, CountingWriter};
use crate::wrappers::SizeTag;
use std::io::{Read, Write};

/// Writes values as raw native-endian bytes.
#[derive(Debug)]
pub struct BinaryOutput<W: Write> {
    sink: CountingWriter<W>,
}

impl<W: Write> BinaryOutput<W> {
    /// Creates a codec writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { sink: CountingWriter::new(writer) }
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.sink.current_offset()
    }
}

impl<W: Write> OutputCodec for BinaryOutput<W> {
    fn format(&self) -> Format {
        Format::Binary
    }

    fn write_primitive(&mut self, value: Primitive) -> Result<()> {
        let mut buf = [0u8; 16];
        let width = value.write_ne(&mut buf);
        self.sink.write_exact(&buf[..width])
    }

    fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_blob(value.as_bytes())
    }

    fn write_blob(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_size_tag(SizeTag(bytes.len() as u64))?;
        self.sink.write_exact(bytes)
    }

    fn write_size_tag(&mut self, tag: SizeTag) -> Result<()> {
        self.sink.write_exact(&tag.0.to_ne_bytes())
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.flush()
    }
}

/// Reads values written by [`BinaryOutput`].
#[derive(Debug)]
pub struct BinaryInput<R: Read> {
    source: CountingReader<R>,
}

impl<R: Read> BinaryInput<R> {
    /// Creates a codec reading from `reader`.
    pub fn new(reader: R) -> Self {
        Self { source: CountingReader::new(reader) }
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.source.current_offset()
    }
}

impl<R: Read> InputCodec for BinaryInput<R> {
    fn format(&self) -> Format {
        Format::Binary
    }

    fn read_primitive(&mut self, kind: PrimitiveKind) -> Result<Primitive> {
        let mut buf = [0u8; 16];
        let width = kind.width();
        let offset = self.source.current_offset();
        self.source.read_exact(&mut buf[..width])?;
        Primitive::read_ne(kind, &buf[..width], offset)
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes).map_err(|e| ArchiveError::Malformed(format!("string is not UTF-8: {e}")))
    }

    fn read_blob(&mut self) -> Result<Vec<u8>> {
        let SizeTag(len) = self.read_size_tag()?;
        self.source.read_to_vec(len)
    }

    fn read_size_tag(&mut self) -> Result<SizeTag> {
        let mut buf = [0u8; 8];
        self.source.read_exact(&mut buf)?;
        Ok(SizeTag(u64::from_ne_bytes(buf)))
    }
}
