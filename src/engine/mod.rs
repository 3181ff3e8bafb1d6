//! The archive engine.
//!
//! An archive is one serialization session. It owns the codec plus every table that must stay
//! consistent for the whole session:
//!
//! - **Pointer table**: shared-pointer identity to id (output) or id to instance (input).
//! - **Polymorphic name table**: type name to id (output) or id to name (input).
//! - **Version cache**: which types already had their class version written / read.
//! - **Base-class set**: `(type, address)` pairs of virtual bases already processed.
//! - **Deferred queue**: work postponed until [`crate::Archive::flush_deferred`].
//!
//! Every value goes through the same three steps:
//!
//! ```text
//! prologue   open a node (composite values only)
//! dispatch   class version (versioned strategies) + the declared routine
//! epilogue   close the node
//! ```

mod input;
mod output;

pub use input::InputArchive;
pub use output::OutputArchive;

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;
use twox_hash::XxHash64;

/// Hasher for the per-session tables.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SessionHasher;

impl BuildHasher for SessionHasher {
    type Hasher = XxHash64;

    fn build_hasher(&self) -> XxHash64 {
        XxHash64::with_seed(0)
    }
}

pub(crate) type SessionMap<K, V> = HashMap<K, V, SessionHasher>;
pub(crate) type SessionSet<K> = HashSet<K, SessionHasher>;

/// What the output pointer table knows about a shared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerIdentity {
    /// Address of the shared allocation.
    pub address: usize,
    /// Concrete type stored there.
    pub type_id: TypeId,
    /// Name of the concrete type, for diagnostics.
    pub type_name: &'static str,
}

/// Key of the virtual base-class set.
pub(crate) fn base_key<B: 'static>(base: &B) -> (TypeId, usize) {
    (TypeId::of::<B>(), std::ptr::from_ref(base) as usize)
}
