//! The traits user types implement to take part in an archive session.

use crate::codec::Minimal;
use crate::engine::{InputArchive, OutputArchive};
use crate::error::{ArchiveError, Result};
use crate::strategy::Strategies;
use crate::wrappers::{DeferredData, NameValuePair};
use std::any::{Any, TypeId, type_name};

/// How a value is laid out in self-describing formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The value gets its own node (object or array).
    Composite,
    /// The value is a single scalar or string written in place.
    Leaf,
}

fn not_implemented<T: ?Sized>(routine: &str) -> ArchiveError {
    tracing::debug!(type_name = type_name::<T>(), routine, "declared routine is not implemented");
    ArchiveError::MissingStrategy(type_name::<T>())
}

/// A type that can be written to and read from an archive.
///
/// Implementors set [`Serializable::STRATEGY`] and override the matching routine(s). Routines
/// that were not declared are never called; routines that were declared but not overridden
/// fail with [`ArchiveError::MissingStrategy`].
///
/// Saving goes through `&mut self` as well: a symmetric `serialize` routine is shared by both
/// directions and hands out mutable field references. Saving never modifies the value.
///
/// ```rust
/// use archivist::{Archive, Result, Serializable, Strategies};
///
/// #[derive(Default)]
/// struct Point { x: i32, y: i32 }
///
/// impl Serializable for Point {
///     const STRATEGY: Strategies = Strategies::SERIALIZE;
///
///     fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
///         ar.nvp("x", &mut self.x)?;
///         ar.nvp("y", &mut self.y)
///     }
/// }
/// ```
pub trait Serializable: 'static {
    /// The declared strategy set; must resolve to exactly one strategy.
    const STRATEGY: Strategies = Strategies::NONE;

    /// The class version written by versioned strategies, unless overridden at runtime through
    /// [`crate::registry::set_class_version`].
    const VERSION: u32 = 0;

    /// Layout in self-describing formats.
    const NODE: NodeKind = NodeKind::Composite;

    /// Encoded width of every value of this type in binary formats, if fixed.
    const WIRE_SIZE: Option<usize> = None;

    /// Symmetric routine, used for both saving and loading.
    fn serialize<A: Archive>(&mut self, ar: &mut A, version: u32) -> Result<()> {
        let _ = (ar, version);
        Err(not_implemented::<Self>("serialize"))
    }

    /// Saving half of the split strategy.
    fn save(&mut self, ar: &mut OutputArchive<'_>, version: u32) -> Result<()> {
        let _ = (ar, version);
        Err(not_implemented::<Self>("save"))
    }

    /// Loading half of the split strategy.
    fn load(&mut self, ar: &mut InputArchive<'_>, version: u32) -> Result<()> {
        let _ = (ar, version);
        Err(not_implemented::<Self>("load"))
    }

    /// Produces the surrogate written in place of this value.
    fn save_minimal(&self, version: u32) -> Result<Minimal> {
        let _ = version;
        Err(not_implemented::<Self>("save_minimal"))
    }

    /// Restores this value from its surrogate.
    fn load_minimal(&mut self, value: Minimal, version: u32) -> Result<()> {
        let _ = (value, version);
        Err(not_implemented::<Self>("load_minimal"))
    }
}

/// Creates fresh instances while loading (container elements, pointees).
///
/// Every `Default` type gets this for free: a default instance is created and the payload is
/// loaded into it, which also lets self-referencing pointer graphs resolve. Types without a
/// sensible default implement [`Construct::load_and_construct`] instead and build the value
/// from the archive directly.
pub trait Construct: Serializable + Sized {
    /// An instance to load the payload into, or `None` to use
    /// [`Construct::load_and_construct`].
    fn blank() -> Option<Self> {
        None
    }

    /// Reads the payload and builds the value from it.
    ///
    /// Runs inside the value's node, after the class version (if any) has been read.
    fn load_and_construct(ar: &mut InputArchive<'_>, version: u32) -> Result<Self> {
        let _ = (ar, version);
        Err(not_implemented::<Self>("load_and_construct"))
    }
}

impl<T: Serializable + Default> Construct for T {
    fn blank() -> Option<Self> {
        Some(T::default())
    }
}

/// Operations shared by output and input archives.
///
/// Symmetric `serialize` routines are written against this trait so the same body saves and
/// loads.
pub trait Archive {
    /// `true` for input archives.
    const IS_LOADING: bool;

    /// Processes one value: opens its node, dispatches to its strategy, closes the node.
    fn process<T: Serializable>(&mut self, value: &mut T) -> Result<()>;

    /// Processes a value under an explicit member name.
    fn name_value<T: Serializable>(&mut self, pair: NameValuePair<'_, T>) -> Result<()>;

    /// Shorthand for [`Archive::name_value`].
    fn nvp<T: Serializable>(&mut self, name: &str, value: &mut T) -> Result<()> {
        self.name_value(NameValuePair::new(name, value))
    }

    /// Writes `*size` as a size tag, or reads the next size tag into it.
    fn size_tag(&mut self, size: &mut u64) -> Result<()>;

    /// Processes the base-class part of a value.
    fn base_class<B: Serializable>(&mut self, base: &mut B) -> Result<()> {
        self.process(base)
    }

    /// Processes a base-class part that may be reached through several paths.
    ///
    /// The part is processed the first time this exact object (type and address) is seen in
    /// the session and skipped afterwards.
    fn virtual_base_class<B: Serializable>(&mut self, base: &mut B) -> Result<()>;

    /// Queues a value for processing when the deferred queue is flushed.
    fn defer<T: Serializable>(&mut self, data: DeferredData<T>) -> Result<()>;

    /// Runs queued work in enqueue order until the queue is empty, including work queued while
    /// flushing.
    fn flush_deferred(&mut self) -> Result<()>;
}

/// Runtime type information for values behind trait-object pointers.
///
/// Base traits used with polymorphic pointers must have this as a supertrait:
///
/// ```rust
/// use archivist::Polymorphic;
///
/// trait Shape: Polymorphic {
///     fn area(&self) -> f64;
/// }
/// ```
///
/// Every `'static` type implements it automatically.
pub trait Polymorphic: Any {
    /// The value as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// The value as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// `TypeId` of the concrete type.
    fn runtime_type_id(&self) -> TypeId;

    /// Name of the concrete type.
    fn runtime_type_name(&self) -> &'static str;
}

impl<T: Any> Polymorphic for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn runtime_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn runtime_type_name(&self) -> &'static str {
        type_name::<T>()
    }
}
