//! High-level entry points: one call encodes or decodes one value in a single session.

use crate::codec::Format;
use crate::config::ArchiveOptions;
use crate::engine::{InputArchive, OutputArchive};
use crate::error::Result;
use crate::format::Endianness;
use crate::serializable::{Archive, Construct, Serializable};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

/// The main entry point: one call per value, native binary format.
///
/// ```rust
/// use archivist::Archivist;
///
/// let mut scores = vec![3u32, 1, 4];
/// let bytes = Archivist::to_bytes(&mut scores)?;
/// let back: Vec<u32> = Archivist::from_bytes(&bytes)?;
/// assert_eq!(back, scores);
/// # Ok::<(), archivist::ArchiveError>(())
/// ```
///
/// Other formats go through [`Archivist::builder`].
#[derive(Debug)]
pub struct Archivist;

impl Archivist {
    /// Configures a non-default format.
    pub fn builder() -> ArchivistBuilder {
        ArchivistBuilder::default()
    }

    /// Writes `value` to `writer`.
    pub fn write<T: Serializable, W: Write>(writer: W, value: &mut T) -> Result<()> {
        Archiver::default().write(writer, value)
    }

    /// Reads a `T` from `reader`.
    pub fn read<T: Construct, R: Read + Seek>(reader: R) -> Result<T> {
        Archiver::default().read(reader)
    }

    /// Encodes `value` into a new buffer.
    pub fn to_bytes<T: Serializable>(value: &mut T) -> Result<Vec<u8>> {
        Archiver::default().to_bytes(value)
    }

    /// Decodes a `T` from `bytes`.
    pub fn from_bytes<T: Construct>(bytes: &[u8]) -> Result<T> {
        Archiver::default().from_bytes(bytes)
    }

    /// Writes `value` to the file at `path`, replacing it.
    pub fn save<T: Serializable, P: AsRef<Path>>(path: P, value: &mut T) -> Result<()> {
        Archiver::default().save(path, value)
    }

    /// Reads a `T` from the file at `path`.
    pub fn load<T: Construct, P: AsRef<Path>>(path: P) -> Result<T> {
        Archiver::default().load(path)
    }
}

/// Collects [`ArchiveOptions`] for an [`Archiver`].
#[derive(Debug, Clone, Default)]
pub struct ArchivistBuilder {
    options: ArchiveOptions,
}

impl ArchivistBuilder {
    /// Wire format.
    pub fn format(mut self, format: Format) -> Self {
        self.options.format = format;
        self
    }

    /// Byte order of portable binary archives.
    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.options.endianness = endianness;
        self
    }

    /// Indentation width of tree archives.
    pub fn indent(mut self, width: usize) -> Self {
        self.options.indent = Some(width);
        self
    }

    /// Single-line tree archives.
    pub fn compact(mut self) -> Self {
        self.options.indent = None;
        self
    }

    /// Replaces every option at once, e.g. with options read from a configuration file.
    pub fn options(mut self, options: ArchiveOptions) -> Self {
        self.options = options;
        self
    }

    /// Finishes configuration.
    pub fn build(self) -> Archiver {
        Archiver { options: self.options }
    }
}

/// One-call encoding and decoding with fixed options.
///
/// Each call is one archive session: pointer identity is preserved within a value, the deferred
/// queue is flushed after the value, and the output is finished before returning.
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    options: ArchiveOptions,
}

impl Archiver {
    /// An archiver with the given options.
    pub fn new(options: ArchiveOptions) -> Self {
        Self { options }
    }

    /// The options in use.
    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Writes `value` to `writer`.
    pub fn write<T: Serializable, W: Write>(&self, writer: W, value: &mut T) -> Result<()> {
        let mut ar = OutputArchive::with_options(writer, &self.options)?;
        ar.process(value)?;
        ar.flush_deferred()?;
        ar.finish()
    }

    /// Reads a `T` from `reader`.
    pub fn read<T: Construct, R: Read + Seek>(&self, reader: R) -> Result<T> {
        let mut ar = InputArchive::with_options(reader, &self.options)?;
        let value = ar.construct::<T>()?;
        ar.flush_deferred()?;
        Ok(value)
    }

    /// Encodes `value` into a new buffer.
    pub fn to_bytes<T: Serializable>(&self, value: &mut T) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write(&mut bytes, value)?;
        Ok(bytes)
    }

    /// Decodes a `T` from `bytes`.
    pub fn from_bytes<T: Construct>(&self, bytes: &[u8]) -> Result<T> {
        self.read(Cursor::new(bytes))
    }

    /// Writes `value` to the file at `path`, replacing it.
    pub fn save<T: Serializable, P: AsRef<Path>>(&self, path: P, value: &mut T) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.write(BufWriter::new(file), value)?;
        tracing::debug!(path = %path.display(), format = %self.options.format, "saved archive");
        Ok(())
    }

    /// Reads a `T` from the file at `path`. The file is memory-mapped for the duration of the
    /// call.
    pub fn load<T: Construct, P: AsRef<Path>>(&self, path: P) -> Result<T> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return self.from_bytes(&[]);
        }
        let mmap = map_file(&file)?;
        tracing::debug!(path = %path.display(), bytes = mmap.len(), "loading archive");
        self.from_bytes(&mmap[..])
    }
}

#[allow(unsafe_code)]
fn map_file(file: &File) -> Result<Mmap> {
    // Safety: the mapping lives only for one load call; concurrent modification of the file by
    // another process is outside our control, as with any memory-mapped reader.
    let mmap = unsafe { Mmap::map(file)? };
    Ok(mmap)
}
