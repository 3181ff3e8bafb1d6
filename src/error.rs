//! Centralized error handling for archivist.
//!
//! Every failure during an archive session is reported through [`ArchiveError`]. Errors are
//! terminal for the operation that raised them: a failed `process` call leaves the session in an
//! unspecified state and the archive should be discarded.
//!
//! ## Error Categories
//!
//! - **Transfer** ([`ArchiveError::Io`], [`ArchiveError::ShortWrite`], [`ArchiveError::ShortRead`]):
//!   the underlying stream failed or moved fewer bytes than requested.
//! - **Registry** ([`ArchiveError::UnregisteredType`], [`ArchiveError::MissingStrategy`],
//!   [`ArchiveError::AmbiguousStrategy`], [`ArchiveError::Registration`]): a type was used
//!   without a usable registration, or registered twice in conflicting ways.
//! - **Stream content** ([`ArchiveError::UnknownPointer`], [`ArchiveError::UnknownPolymorphicType`],
//!   [`ArchiveError::NameNotFound`], [`ArchiveError::OversizedRead`], [`ArchiveError::Malformed`]):
//!   the encoded data does not describe a valid graph.
//! - **Internal** ([`ArchiveError::Internal`]): broken invariants inside the library.
//!
//! ## Usage
//!
//! ```rust
//! use archivist::{Archivist, ArchiveError};
//!
//! let bytes = [7u8];
//! assert!(matches!(
//!     Archivist::from_bytes::<u32>(&bytes),
//!     Err(ArchiveError::ShortRead { requested: 4, read: 1 })
//! ));
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// The error enum covering every failure an archive session can raise.
///
/// The type is `Clone`; I/O errors are wrapped in an `Arc` so cloning stays cheap.
#[derive(Debug, Clone)]
pub enum ArchiveError {
    /// Low-level I/O failure reported by the underlying stream.
    Io(Arc<io::Error>),

    /// The output stream accepted fewer bytes than requested.
    ShortWrite {
        /// Bytes the codec tried to write.
        requested: u64,
        /// Bytes actually accepted before the stream stopped.
        written: u64,
    },

    /// The input stream ended before the requested bytes were read.
    ShortRead {
        /// Bytes the codec tried to read.
        requested: u64,
        /// Bytes actually read before the stream ended.
        read: u64,
    },

    /// A polymorphic pointer referred to a type that has no binding in the registry.
    ///
    /// `action` names what was attempted (`"save"`, `"load"` or `"cast"`), `type_name` is the
    /// runtime type name on output or the transmitted name on input.
    UnregisteredType {
        /// What the engine was doing when the lookup failed.
        action: &'static str,
        /// The type (or relation) that was missing.
        type_name: String,
    },

    /// A back-reference named a pointer id that was never registered in this session.
    UnknownPointer(u32),

    /// A polymorphic id named a type that was never transmitted in this session.
    UnknownPolymorphicType(u32),

    /// A type was processed without declaring any serialization strategy.
    MissingStrategy(&'static str),

    /// A type declared more than one serialization strategy.
    AmbiguousStrategy {
        /// The offending type.
        type_name: &'static str,
        /// Human readable list of the strategies it declared.
        declared: String,
    },

    /// Two conflicting registrations were made for the same polymorphic name or type.
    Registration(String),

    /// A named field could not be found among the members of the current tree node.
    NameNotFound(String),

    /// A size field asked for more data than the remaining stream can hold.
    OversizedRead {
        /// Bytes the size field implies.
        requested: u64,
        /// Bytes left in the stream.
        remaining: u64,
    },

    /// The stream contains a value that cannot be decoded as the requested type.
    Malformed(String),

    /// Logic error inside the library.
    ///
    /// This error should not occur in practice; it signals a broken internal invariant.
    Internal(String),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::ShortWrite { requested, written } => write!(
                f,
                "Failed to write {requested} bytes to output stream! Wrote {written}"
            ),
            Self::ShortRead { requested, read } => write!(
                f,
                "Failed to read {requested} bytes from input stream! Read {read}"
            ),
            Self::UnregisteredType { action, type_name } => write!(
                f,
                "Trying to {action} an unregistered polymorphic type ({type_name}). \
                 Make sure it is registered with register_polymorphic!"
            ),
            Self::UnknownPointer(id) => {
                write!(f, "Error while trying to deserialize a shared pointer. Could not find id {id}")
            }
            Self::UnknownPolymorphicType(id) => {
                write!(f, "Error while trying to deserialize a polymorphic pointer. Could not find type id {id}")
            }
            Self::MissingStrategy(name) => write!(
                f,
                "No usable serialization strategy for `{name}`: declare and implement exactly \
                 one of serialize, save/load or save_minimal/load_minimal"
            ),
            Self::AmbiguousStrategy { type_name, declared } => write!(
                f,
                "`{type_name}` declares more than one serialization strategy ({declared})"
            ),
            Self::Registration(s) => write!(f, "Registration Error: {s}"),
            Self::NameNotFound(name) => write!(f, "provided NVP ({name}) not found"),
            Self::OversizedRead { requested, remaining } => write!(
                f,
                "Read of {requested} bytes exceeds the {remaining} bytes remaining in the stream"
            ),
            Self::Malformed(s) => write!(f, "Malformed Data: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io(Arc::new(io::Error::from(err)))
        } else {
            Self::Malformed(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ArchiveError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Malformed(format!("invalid base64 blob: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn short_write_message_names_both_counts() {
        let err = ArchiveError::ShortWrite { requested: 8, written: 3 };
        assert_eq!(err.to_string(), "Failed to write 8 bytes to output stream! Wrote 3");
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = ArchiveError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.source().is_some());
        assert!(err.clone().to_string().starts_with("I/O Error"));
    }

    #[test]
    fn json_syntax_errors_are_malformed() {
        let err = serde_json::from_str::<serde_json::Value>("{").map_err(ArchiveError::from);
        assert!(matches!(err, Err(ArchiveError::Malformed(_))));
    }
}
