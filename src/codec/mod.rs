//! Pluggable wire formats.
//!
//! An archive engine owns one codec for the whole session and calls back into it for every
//! leaf value and every structural event. Codecs never see user types: they only move
//! [`Primitive`] scalars, strings, byte blobs and size tags, and optionally react to node and
//! name events.
//!
//! Three codecs ship with the crate:
//!
//! | Format | Output | Input | Self-describing |
//! |--------|--------|-------|-----------------|
//! | [`Format::Binary`] | [`BinaryOutput`] | [`BinaryInput`] | no |
//! | [`Format::PortableBinary`] | [`PortableBinaryOutput`] | [`PortableBinaryInput`] | no (endianness header) |
//! | [`Format::Tree`] | [`TreeOutput`] | [`TreeInput`] | yes (JSON) |

mod binary;
mod portable;
mod tree;

pub use binary::{BinaryInput, BinaryOutput};
pub use portable::{PortableBinaryInput, PortableBinaryOutput};
pub use tree::{TreeInput, TreeOutput};

use crate::config::{PortableOptions, TreeOptions};
use crate::error::{ArchiveError, Result};
use crate::wrappers::SizeTag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Seek, Write};

/// Upper bound, in bytes, of what an input archive without a known stream length reserves
/// ahead of reading a sequence.
pub const DEFAULT_RESERVE_BUDGET: usize = 1 << 20;

/// The wire formats understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Raw native-endian fields, no self-description.
    #[default]
    Binary,
    /// Raw fields behind a one-byte endianness header, swapped on demand.
    PortableBinary,
    /// A JSON document of named members and implicit-length arrays.
    Tree,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::PortableBinary => f.write_str("portable binary"),
            Self::Tree => f.write_str("tree"),
        }
    }
}

macro_rules! define_primitives {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        /// A fixed-width scalar as moved by a codec.
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub enum Primitive {
            /// A boolean, one byte on binary wires.
            Bool(bool),
            /// A Unicode scalar value, four bytes on binary wires.
            Char(char),
            $(
                #[doc = concat!("A `", stringify!($ty), "`.")]
                $variant($ty),
            )*
        }

        /// The shape of a [`Primitive`], used to ask a codec for the next value.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PrimitiveKind {
            /// See [`Primitive::Bool`].
            Bool,
            /// See [`Primitive::Char`].
            Char,
            $(
                #[doc = concat!("See [`Primitive::", stringify!($variant), "`].")]
                $variant,
            )*
        }

        impl Primitive {
            /// The kind of this value.
            pub fn kind(&self) -> PrimitiveKind {
                match self {
                    Self::Bool(_) => PrimitiveKind::Bool,
                    Self::Char(_) => PrimitiveKind::Char,
                    $(Self::$variant(_) => PrimitiveKind::$variant,)*
                }
            }

            /// Writes the native-endian representation into `buf`, returning its width.
            pub(crate) fn write_ne(&self, buf: &mut [u8; 16]) -> usize {
                match self {
                    Self::Bool(v) => {
                        buf[0] = u8::from(*v);
                        1
                    }
                    Self::Char(v) => {
                        buf[..4].copy_from_slice(&u32::from(*v).to_ne_bytes());
                        4
                    }
                    $(
                        Self::$variant(v) => {
                            let bytes = v.to_ne_bytes();
                            buf[..bytes.len()].copy_from_slice(&bytes);
                            bytes.len()
                        }
                    )*
                }
            }

            /// Decodes a native-endian representation of `kind`.
            ///
            /// `offset` is the stream position of `bytes`, used in error messages.
            pub(crate) fn read_ne(kind: PrimitiveKind, bytes: &[u8], offset: u64) -> Result<Self> {
                let width_error = || {
                    ArchiveError::Internal(format!(
                        "{kind:?} needs {} bytes, got {}",
                        kind.width(),
                        bytes.len()
                    ))
                };
                match kind {
                    PrimitiveKind::Bool => match bytes {
                        [0] => Ok(Self::Bool(false)),
                        [1] => Ok(Self::Bool(true)),
                        [other] => Err(ArchiveError::Malformed(format!(
                            "Invalid bool value '{other}' at byte {offset}"
                        ))),
                        _ => Err(width_error()),
                    },
                    PrimitiveKind::Char => {
                        let raw = u32::from_ne_bytes(bytes.try_into().map_err(|_| width_error())?);
                        char::from_u32(raw).map(Self::Char).ok_or_else(|| {
                            ArchiveError::Malformed(format!(
                                "Invalid char value {raw:#x} at byte {offset}"
                            ))
                        })
                    }
                    $(
                        PrimitiveKind::$variant => Ok(Self::$variant(<$ty>::from_ne_bytes(
                            bytes.try_into().map_err(|_| width_error())?,
                        ))),
                    )*
                }
            }
        }

        impl PrimitiveKind {
            /// Width in bytes on binary wires.
            pub const fn width(self) -> usize {
                match self {
                    Self::Bool => 1,
                    Self::Char => 4,
                    $(Self::$variant => std::mem::size_of::<$ty>(),)*
                }
            }
        }

        $(
            impl PrimitiveType for $ty {
                const KIND: PrimitiveKind = PrimitiveKind::$variant;

                fn into_primitive(self) -> Primitive {
                    Primitive::$variant(self)
                }

                fn from_primitive(value: Primitive) -> Result<Self> {
                    match value {
                        Primitive::$variant(v) => Ok(v),
                        other => Err(mismatch(Self::KIND, other)),
                    }
                }
            }
        )*
    };
}

define_primitives! {
    I8 => i8,
    I16 => i16,
    I32 => i32,
    I64 => i64,
    I128 => i128,
    U8 => u8,
    U16 => u16,
    U32 => u32,
    U64 => u64,
    U128 => u128,
    F32 => f32,
    F64 => f64,
}

// Portable archives copy float bits verbatim.
const _: () = assert!(f32::RADIX == 2 && f32::MANTISSA_DIGITS == 24);
const _: () = assert!(f64::RADIX == 2 && f64::MANTISSA_DIGITS == 53);

fn mismatch(expected: PrimitiveKind, found: Primitive) -> ArchiveError {
    ArchiveError::Internal(format!("codec returned {:?} when {expected:?} was requested", found.kind()))
}

/// Rust types that map one-to-one onto a [`Primitive`] variant.
pub trait PrimitiveType: Copy + Sized {
    /// The variant this type travels as.
    const KIND: PrimitiveKind;

    /// Wraps the value.
    fn into_primitive(self) -> Primitive;

    /// Unwraps a value of the matching variant.
    fn from_primitive(value: Primitive) -> Result<Self>;
}

impl PrimitiveType for bool {
    const KIND: PrimitiveKind = PrimitiveKind::Bool;

    fn into_primitive(self) -> Primitive {
        Primitive::Bool(self)
    }

    fn from_primitive(value: Primitive) -> Result<Self> {
        match value {
            Primitive::Bool(v) => Ok(v),
            other => Err(mismatch(Self::KIND, other)),
        }
    }
}

impl PrimitiveType for char {
    const KIND: PrimitiveKind = PrimitiveKind::Char;

    fn into_primitive(self) -> Primitive {
        Primitive::Char(self)
    }

    fn from_primitive(value: Primitive) -> Result<Self> {
        match value {
            Primitive::Char(v) => Ok(v),
            other => Err(mismatch(Self::KIND, other)),
        }
    }
}

/// The compact surrogate produced by a minimal save routine.
#[derive(Debug, Clone, PartialEq)]
pub enum Minimal {
    /// A fixed-width scalar surrogate.
    Primitive(Primitive),
    /// A string surrogate.
    String(String),
}

impl Minimal {
    /// The kind of this surrogate.
    pub fn kind(&self) -> MinimalKind {
        match self {
            Self::Primitive(p) => MinimalKind::Primitive(p.kind()),
            Self::String(_) => MinimalKind::String,
        }
    }

    /// Unwraps a scalar surrogate of type `T`.
    pub fn into_primitive<T: PrimitiveType>(self) -> Result<T> {
        match self {
            Self::Primitive(p) => T::from_primitive(p),
            Self::String(_) => Err(ArchiveError::Internal(format!(
                "minimal surrogate is a string, {:?} was requested",
                T::KIND
            ))),
        }
    }

    /// Unwraps a string surrogate.
    pub fn into_string(self) -> Result<String> {
        match self {
            Self::String(s) => Ok(s),
            Self::Primitive(p) => Err(ArchiveError::Internal(format!(
                "minimal surrogate is {:?}, a string was requested",
                p.kind()
            ))),
        }
    }
}

impl<T: PrimitiveType> From<T> for Minimal {
    fn from(value: T) -> Self {
        Self::Primitive(value.into_primitive())
    }
}

impl From<String> for Minimal {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// The declared shape of a type's minimal surrogate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MinimalKind {
    /// The surrogate is a scalar of the given kind.
    Primitive(PrimitiveKind),
    /// The surrogate is a string.
    String,
}

impl MinimalKind {
    /// Shorthand for a string surrogate.
    pub const STRING: Self = Self::String;

    /// The surrogate kind of the primitive type `T`.
    pub const fn of<T: PrimitiveType>() -> Self {
        Self::Primitive(T::KIND)
    }
}

/// The encoding half of a wire format.
///
/// Structural hooks default to no-ops so that formats without self-description only have to
/// move bytes.
pub trait OutputCodec {
    /// Which format this codec writes.
    fn format(&self) -> Format;

    /// Writes one scalar.
    fn write_primitive(&mut self, value: Primitive) -> Result<()>;

    /// Writes a string.
    fn write_str(&mut self, value: &str) -> Result<()>;

    /// Writes a length-prefixed byte blob.
    fn write_blob(&mut self, bytes: &[u8]) -> Result<()>;

    /// Writes (or, for implicit-length formats, announces) the element count of a sequence.
    fn write_size_tag(&mut self, tag: SizeTag) -> Result<()>;

    /// Names the next value or node.
    fn set_next_name(&mut self, _name: &str) {}

    /// Removes and returns the pending name, if any.
    fn take_next_name(&mut self) -> Option<String> {
        None
    }

    /// Opens a node for a composite value.
    fn start_node(&mut self) -> Result<()> {
        Ok(())
    }

    /// Closes the innermost open node.
    fn finish_node(&mut self) -> Result<()> {
        Ok(())
    }

    /// Completes the session and flushes everything to the underlying writer.
    fn finish(&mut self) -> Result<()>;
}

/// The decoding half of a wire format.
pub trait InputCodec {
    /// Which format this codec reads.
    fn format(&self) -> Format;

    /// Reads one scalar of the requested kind.
    fn read_primitive(&mut self, kind: PrimitiveKind) -> Result<Primitive>;

    /// Reads a string.
    fn read_string(&mut self) -> Result<String>;

    /// Reads a length-prefixed byte blob.
    fn read_blob(&mut self) -> Result<Vec<u8>>;

    /// Reads the element count of the sequence that follows.
    fn read_size_tag(&mut self) -> Result<SizeTag>;

    /// Sets the name the next value or node is expected to have.
    fn set_next_name(&mut self, _name: &str) {}

    /// Removes and returns the pending name, if any.
    fn take_next_name(&mut self) -> Option<String> {
        None
    }

    /// Enters the node of a composite value.
    fn start_node(&mut self) -> Result<()> {
        Ok(())
    }

    /// Leaves the innermost node.
    fn finish_node(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fails if `count` elements of `element_size` bytes cannot fit in the rest of the stream.
    fn validate_read_size(&self, _count: u64, _element_size: usize) -> Result<()> {
        Ok(())
    }

    /// How many of `count` elements may be reserved up front without trusting the stream.
    fn safe_to_reserve(&self, count: u64, element_size: usize) -> usize {
        let budget = (DEFAULT_RESERVE_BUDGET / element_size.max(1)) as u64;
        count.min(budget) as usize
    }
}

/// Builds the output codec for `format`.
///
/// The portable codec writes its endianness header immediately.
pub fn output_codec<'w, W: Write + 'w>(
    format: Format,
    writer: W,
    portable: PortableOptions,
    tree: TreeOptions,
) -> Result<Box<dyn OutputCodec + 'w>> {
    Ok(match format {
        Format::Binary => Box::new(BinaryOutput::new(writer)),
        Format::PortableBinary => Box::new(PortableBinaryOutput::new(writer, portable)?),
        Format::Tree => Box::new(TreeOutput::new(writer, tree)),
    })
}

/// Builds the input codec for `format`.
///
/// The tree codec parses the whole document here; the portable codec reads its header and
/// measures the stream.
pub fn input_codec<'r, R: Read + Seek + 'r>(
    format: Format,
    reader: R,
    portable: PortableOptions,
) -> Result<Box<dyn InputCodec + 'r>> {
    Ok(match format {
        Format::Binary => Box::new(BinaryInput::new(reader)),
        Format::PortableBinary => Box::new(PortableBinaryInput::new(reader, portable)?),
        Format::Tree => Box::new(TreeInput::new(reader)?),
    })
}
