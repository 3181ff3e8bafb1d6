//! Archive configuration.
//!
//! Options are plain data and implement `serde` traits, so an application can keep them in its
//! own configuration files:
//!
//! ```rust
//! use archivist::{ArchiveOptions, Endianness, Format};
//!
//! let options: ArchiveOptions =
//!     serde_json::from_str(r#"{ "format": "portable_binary", "endianness": "big" }"#).unwrap();
//! assert_eq!(options.format, Format::PortableBinary);
//! assert_eq!(options.portable().endianness, Endianness::Big);
//! ```

use crate::codec::Format;
use crate::format::Endianness;
use serde::{Deserialize, Serialize};

/// Default indentation of tree documents, in spaces.
pub const DEFAULT_INDENT: usize = 4;

/// Options of the portable binary codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortableOptions {
    /// On output: the byte order written to the stream.
    /// On input: the byte order of the values handed back to the caller.
    pub endianness: Endianness,
}

impl PortableOptions {
    /// Options for an explicit byte order.
    pub fn new(endianness: Endianness) -> Self {
        Self { endianness }
    }

    /// Little-endian streams or values.
    pub fn little_endian() -> Self {
        Self::new(Endianness::Little)
    }

    /// Big-endian streams or values.
    pub fn big_endian() -> Self {
        Self::new(Endianness::Big)
    }
}

/// Options of the tree (JSON) codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeOptions {
    /// Indentation width; `None` renders a compact single-line document.
    pub indent: Option<usize>,
}

impl TreeOptions {
    /// Single-line output.
    pub fn compact() -> Self {
        Self { indent: None }
    }
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self { indent: Some(DEFAULT_INDENT) }
    }
}

/// Complete configuration of an archive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Wire format.
    pub format: Format,
    /// Byte order used by [`Format::PortableBinary`].
    pub endianness: Endianness,
    /// Indentation used by [`Format::Tree`].
    pub indent: Option<usize>,
}

impl ArchiveOptions {
    /// The portable-codec slice of these options.
    pub fn portable(&self) -> PortableOptions {
        PortableOptions::new(self.endianness)
    }

    /// The tree-codec slice of these options.
    pub fn tree(&self) -> TreeOptions {
        TreeOptions { indent: self.indent }
    }
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            format: Format::Binary,
            endianness: Endianness::native(),
            indent: TreeOptions::default().indent,
        }
    }
}
