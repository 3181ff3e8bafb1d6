//! Wire-level constants shared by every archive format.
//!
//! # Tracked Ids
//! Shared pointers and polymorphic type names are both written as a `u32` id:
//!
//! ```text
//! 0x0000_0000            null pointer / null polymorphic pointer
//! 0x8000_0000 | n        first sight of entry `n` (payload or name follows)
//!               n        back-reference to entry `n`
//! 0x4000_0000            polymorphic pointer whose runtime type is the declared static type
//! ```
//!
//! Entry numbers start at 1 and grow monotonically within a session.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Member name of the class version written once per versioned type.
pub const CLASS_VERSION_NAME: &str = "archivist_class_version";

/// Node wrapping the id protocol of a shared or unique pointer.
pub const PTR_WRAPPER_NAME: &str = "ptr_wrapper";
/// Pointer id member inside a [`PTR_WRAPPER_NAME`] node.
pub const PTR_ID_NAME: &str = "id";
/// Payload member inside a [`PTR_WRAPPER_NAME`] node.
pub const PTR_DATA_NAME: &str = "data";
/// Presence byte of a unique pointer.
pub const PTR_VALID_NAME: &str = "valid";
/// Type id member of a polymorphic pointer.
pub const POLYMORPHIC_ID_NAME: &str = "polymorphic_id";
/// Type name member written the first time a polymorphic type appears.
pub const POLYMORPHIC_NAME_NAME: &str = "polymorphic_name";

/// A pointer or polymorphic-name id together with its flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackedId(u32);

impl TrackedId {
    const NEW_ENTRY_MASK: u32 = 0x8000_0000; // Bit 31
    const INLINE_TYPE_MASK: u32 = 0x4000_0000; // Bit 30
    const INDEX_MASK: u32 = !(Self::NEW_ENTRY_MASK | Self::INLINE_TYPE_MASK);

    /// The null id.
    pub const NULL: Self = Self(0);

    /// Polymorphic sentinel: the runtime type equals the declared static type.
    pub const INLINE_TYPE: Self = Self(Self::INLINE_TYPE_MASK);

    /// Wraps a raw id read from a stream.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Id announcing the first appearance of entry `index`.
    pub fn new_entry(index: u32) -> Result<Self> {
        Self::check_index(index)?;
        Ok(Self(index | Self::NEW_ENTRY_MASK))
    }

    /// Id referring back to an entry announced earlier.
    pub fn reference(index: u32) -> Result<Self> {
        Self::check_index(index)?;
        Ok(Self(index))
    }

    fn check_index(index: u32) -> Result<()> {
        if index == 0 || index & !Self::INDEX_MASK != 0 {
            return Err(ArchiveError::Internal(format!(
                "entry index {index} does not fit the id space"
            )));
        }
        Ok(())
    }

    /// The raw value as written to the stream.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Returns true for the null id.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the payload (or type name) follows this id.
    pub fn is_new_entry(self) -> bool {
        self.0 & Self::NEW_ENTRY_MASK != 0
    }

    /// Returns true for the polymorphic "static type" sentinel.
    pub fn is_inline_type(self) -> bool {
        self.0 & Self::INLINE_TYPE_MASK != 0
    }

    /// The entry number with all flag bits stripped.
    pub fn index(self) -> u32 {
        self.0 & Self::INDEX_MASK
    }
}

impl fmt::Display for TrackedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_new_entry() {
            write!(f, "#{}*", self.index())
        } else {
            write!(f, "#{}", self.index())
        }
    }
}

/// Byte order of a portable binary stream or of the values an archive produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endianness {
    /// The byte order of the machine running this code.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }

    /// Returns true for [`Endianness::Little`].
    pub fn is_little(self) -> bool {
        self == Self::Little
    }

    /// The header byte a portable output archive writes for this order.
    pub fn to_flag(self) -> u8 {
        u8::from(self.is_little())
    }

    /// Decodes the header byte of a portable stream.
    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            1 => Ok(Self::Little),
            0 => Ok(Self::Big),
            other => Err(ArchiveError::Malformed(format!(
                "invalid endianness flag {other} in portable binary header"
            ))),
        }
    }
}

impl Default for Endianness {
    fn default() -> Self {
        Self::native()
    }
}
