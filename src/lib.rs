//! # Archivist
//!
//! An object-graph serialization engine. Given an in-memory value (scalar, container, owned or
//! shared pointer, or pointer to a trait object) it produces a byte or text encoding from which
//! an equivalent graph can be rebuilt later, preserving shared-ownership identity and letting
//! encoded schemas evolve through class versions.
//!
//! ## Overview
//!
//! Archivist separates *what* a type stores from *how* it is encoded:
//!
//! *   **Types** implement [`Serializable`] and declare exactly one [`Strategies`] entry: a
//!     symmetric `serialize`, split `save`/`load`, a `minimal` scalar/string surrogate, or
//!     `EMPTY`. Each comes in a versioned flavor.
//! *   **Archives** ([`OutputArchive`], [`InputArchive`]) drive one session: they dispatch to
//!     the declared strategy, track shared pointers and polymorphic type names, cache class
//!     versions and run deferred work.
//! *   **Codecs** move bytes. Three formats ship with the crate:
//!
//! | Format | Layout |
//! |--------|--------|
//! | [`Format::Binary`] | raw native-endian fields |
//! | [`Format::PortableBinary`] | endianness header, fields swapped to the chosen byte order |
//! | [`Format::Tree`] | JSON document of named members and implicit-length arrays |
//!
//! ## Usage
//!
//! ```rust
//! use archivist::{Archivist, Format, Serializable};
//!
//! #[derive(Serializable, Default, Debug, PartialEq)]
//! #[archivist(version = 2)]
//! struct Player {
//!     name: String,
//!     #[archivist(rename = "hp")]
//!     health: u32,
//!     position: (f32, f32),
//! }
//!
//! let mut player = Player { name: "ada".into(), health: 90, position: (1.0, 2.5) };
//!
//! let bytes = Archivist::to_bytes(&mut player)?;
//! assert_eq!(Archivist::from_bytes::<Player>(&bytes)?, player);
//!
//! let json = Archivist::builder().format(Format::Tree).compact().build().to_bytes(&mut player)?;
//! assert!(String::from_utf8_lossy(&json).contains("\"hp\":90"));
//! # Ok::<(), archivist::ArchiveError>(())
//! ```
//!
//! ## Shared and polymorphic pointers
//!
//! `Rc<RefCell<T>>` keeps its identity: the first occurrence carries the payload, every later
//! one refers back to it by id, and cycles through `Weak` resolve on load. Trait objects need
//! their base trait declared with [`polymorphic_base!`] and each concrete type registered with
//! [`register_polymorphic!`]; see [`pointer`] for the wire layout.
//!
//! ## Safety and error handling
//!
//! * **Encapsulated unsafe:** the only `unsafe` block memory-maps files in [`Archivist::load`].
//! * **No panics:** no `unwrap()` or `panic!()` in the library (enforced by clippy lints).
//! * **One error type:** every failure is an [`ArchiveError`]; decoding mismatched or truncated
//!   input fails with an error, never with undefined behavior.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod pointer;
pub mod registry;
pub mod serializable;
pub mod strategy;
pub mod wrappers;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod engine;
#[doc(hidden)]
pub mod io;

// Private modules
mod impls;

// --- RE-EXPORTS ---

pub use api::{Archiver, Archivist, ArchivistBuilder};
pub use codec::{Format, Minimal, MinimalKind, Primitive, PrimitiveKind};
pub use config::{ArchiveOptions, PortableOptions, TreeOptions};
pub use engine::{InputArchive, OutputArchive};
pub use error::{ArchiveError, Result};
pub use format::{Endianness, TrackedId};
pub use pointer::{Pointee, PolymorphicBase};
pub use serializable::{Archive, Construct, NodeKind, Polymorphic, Serializable};
pub use strategy::Strategies;
pub use wrappers::{Blob, DeferredData, NameValuePair, SizeTag, defer, make_nvp};

// Re-export the derive macro so it is accessible as `archivist::Serializable`
pub use archivist_derive::Serializable;
