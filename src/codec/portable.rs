//! Portable binary codec.
//!
//! Identical to the native binary codec except for two things:
//!
//! 1. The stream starts with one byte: `1` if the fields that follow are little-endian.
//! 2. Every scalar is byte-swapped during transfer when producer and consumer orders differ.
//!
//! The input side also measures the stream up front and refuses size fields that ask for more
//! bytes than remain.

use super::{Format, InputCodec, OutputCodec, Primitive, PrimitiveKind};
use crate::config::PortableOptions;
use crate::error::{ArchiveError, Result};
use crate::format::Endianness;
use crate::io::{CountingReader, CountingWriter};
use crate::wrappers::SizeTag;
use std::io::{Read, Seek, Write};

/// Reservations may claim up to this many bytes per byte left in the stream.
pub const RESERVE_BUDGET_MULTIPLIER: u64 = 8;

/// Reverses each `width`-byte element of `bytes` in place.
fn swap_elements(bytes: &mut [u8], width: usize) {
    if width > 1 {
        for chunk in bytes.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }
}

/// Writes a portable binary stream in the configured byte order.
#[derive(Debug)]
pub struct PortableBinaryOutput<W: Write> {
    sink: CountingWriter<W>,
    swap: bool,
}

impl<W: Write> PortableBinaryOutput<W> {
    /// Creates the codec and writes the endianness header.
    pub fn new(writer: W, options: PortableOptions) -> Result<Self> {
        let mut sink = CountingWriter::new(writer);
        sink.write_exact(&[options.endianness.to_flag()])?;
        Ok(Self {
            sink,
            swap: Endianness::native() != options.endianness,
        })
    }

    fn write_swapped(&mut self, bytes: &mut [u8], width: usize) -> Result<()> {
        if self.swap {
            swap_elements(bytes, width);
        }
        self.sink.write_exact(bytes)
    }
}

impl<W: Write> OutputCodec for PortableBinaryOutput<W> {
    fn format(&self) -> Format {
        Format::PortableBinary
    }

    fn write_primitive(&mut self, value: Primitive) -> Result<()> {
        let mut buf = [0u8; 16];
        let width = value.write_ne(&mut buf);
        self.write_swapped(&mut buf[..width], width)
    }

    fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_blob(value.as_bytes())
    }

    fn write_blob(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_size_tag(SizeTag(bytes.len() as u64))?;
        // Single-byte elements never need swapping.
        self.sink.write_exact(bytes)
    }

    fn write_size_tag(&mut self, tag: SizeTag) -> Result<()> {
        let mut buf = tag.0.to_ne_bytes();
        self.write_swapped(&mut buf, 8)
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.flush()
    }
}

/// Reads a portable binary stream, producing values in the requested byte order.
#[derive(Debug)]
pub struct PortableBinaryInput<R: Read> {
    source: CountingReader<R>,
    stream_endianness: Endianness,
    swap: bool,
}

impl<R: Read + Seek> PortableBinaryInput<R> {
    /// Measures the stream, reads the header and decides whether to swap.
    pub fn new(reader: R, options: PortableOptions) -> Result<Self> {
        let mut source = CountingReader::measured(reader)?;
        let mut flag = [0u8; 1];
        source.read_exact(&mut flag)?;
        let stream_endianness = Endianness::from_flag(flag[0])?;
        Ok(Self {
            source,
            stream_endianness,
            swap: options.endianness != stream_endianness,
        })
    }
}

impl<R: Read> PortableBinaryInput<R> {
    /// Byte order announced by the stream header.
    pub fn stream_endianness(&self) -> Endianness {
        self.stream_endianness
    }

    /// Bytes left in the stream.
    pub fn maximum_read_size(&self) -> u64 {
        self.source.remaining().unwrap_or(u64::MAX)
    }

    fn read_swapped(&mut self, bytes: &mut [u8], width: usize) -> Result<()> {
        self.source.read_exact(bytes)?;
        if self.swap {
            swap_elements(bytes, width);
        }
        Ok(())
    }
}

impl<R: Read> InputCodec for PortableBinaryInput<R> {
    fn format(&self) -> Format {
        Format::PortableBinary
    }

    fn read_primitive(&mut self, kind: PrimitiveKind) -> Result<Primitive> {
        let mut buf = [0u8; 16];
        let width = kind.width();
        let offset = self.source.current_offset();
        self.read_swapped(&mut buf[..width], width)?;
        Primitive::read_ne(kind, &buf[..width], offset)
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes).map_err(|e| ArchiveError::Malformed(format!("string is not UTF-8: {e}")))
    }

    fn read_blob(&mut self) -> Result<Vec<u8>> {
        let SizeTag(len) = self.read_size_tag()?;
        self.validate_read_size(len, 1)?;
        self.source.read_to_vec(len)
    }

    fn read_size_tag(&mut self) -> Result<SizeTag> {
        let mut buf = [0u8; 8];
        self.read_swapped(&mut buf, 8)?;
        Ok(SizeTag(u64::from_ne_bytes(buf)))
    }

    fn validate_read_size(&self, count: u64, element_size: usize) -> Result<()> {
        let remaining = self.maximum_read_size();
        match count.checked_mul(element_size as u64) {
            Some(requested) if requested <= remaining => Ok(()),
            requested => Err(ArchiveError::OversizedRead {
                requested: requested.unwrap_or(u64::MAX),
                remaining,
            }),
        }
    }

    fn safe_to_reserve(&self, count: u64, element_size: usize) -> usize {
        let budget = self.maximum_read_size().saturating_mul(RESERVE_BUDGET_MULTIPLIER);
        let affordable = budget / element_size.max(1) as u64;
        count.min(affordable).min(usize::MAX as u64) as usize
    }
}
