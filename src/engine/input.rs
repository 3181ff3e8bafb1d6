use super::{SessionMap, SessionSet, base_key};
use crate::codec::{
    self, BinaryInput, Format, InputCodec, Minimal, MinimalKind, PortableBinaryInput, Primitive,
    PrimitiveKind, PrimitiveType, TreeInput,
};
use crate::config::{ArchiveOptions, PortableOptions};
use crate::error::{ArchiveError, Result};
use crate::format::{CLASS_VERSION_NAME, TrackedId};
use crate::registry::TypeBinding;
use crate::serializable::{Archive, Construct, NodeKind, Serializable};
use crate::strategy::{self, Strategy, StrategyKind};
use crate::wrappers::{DeferredData, NameValuePair};
use std::any::{Any, TypeId, type_name};
use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Seek};

type InputThunk<'r> = Box<dyn FnOnce(&mut InputArchive<'r>) -> Result<()>>;

/// A decoding session.
///
/// Loads must mirror the saves that produced the stream: same types, same order, same
/// strategies. Mismatches surface as [`ArchiveError::ShortRead`], [`ArchiveError::Malformed`]
/// or [`ArchiveError::NameNotFound`] depending on the format.
///
/// ```rust
/// use archivist::{Archive, InputArchive};
///
/// let bytes = 9u16.to_ne_bytes();
/// let mut ar = InputArchive::binary(&bytes[..]);
/// let mut value = 0u16;
/// ar.process(&mut value)?;
/// assert_eq!(value, 9);
/// # Ok::<(), archivist::ArchiveError>(())
/// ```
pub struct InputArchive<'r> {
    codec: Box<dyn InputCodec + 'r>,
    /// Instances created for each pointer id, stored as `Rc<RefCell<T>>` behind `dyn Any`.
    shared_pointers: SessionMap<u32, Box<dyn Any>>,
    polymorphic_names: SessionMap<u32, String>,
    versions: SessionMap<TypeId, u32>,
    bases: SessionSet<(TypeId, usize)>,
    deferred: VecDeque<InputThunk<'r>>,
}

impl<'r> InputArchive<'r> {
    /// Starts a session on an arbitrary codec.
    pub fn new(codec: impl InputCodec + 'r) -> Self {
        Self::from_boxed(Box::new(codec))
    }

    /// Starts a session on an already boxed codec.
    pub fn from_boxed(codec: Box<dyn InputCodec + 'r>) -> Self {
        tracing::trace!(format = %codec.format(), "starting input archive");
        Self {
            codec,
            shared_pointers: SessionMap::default(),
            polymorphic_names: SessionMap::default(),
            versions: SessionMap::default(),
            bases: SessionSet::default(),
            deferred: VecDeque::new(),
        }
    }

    /// Native binary session.
    pub fn binary<R: Read + 'r>(reader: R) -> Self {
        Self::new(BinaryInput::new(reader))
    }

    /// Portable binary session; reads the endianness header and measures the stream.
    pub fn portable_binary<R: Read + Seek + 'r>(reader: R, options: PortableOptions) -> Result<Self> {
        Ok(Self::new(PortableBinaryInput::new(reader, options)?))
    }

    /// Tree (JSON) session; parses the whole document.
    pub fn tree<R: Read>(reader: R) -> Result<Self> {
        Ok(Self::new(TreeInput::new(reader)?))
    }

    /// Session in the format described by `options`.
    pub fn with_options<R: Read + Seek + 'r>(reader: R, options: &ArchiveOptions) -> Result<Self> {
        let codec = codec::input_codec(options.format, reader, options.portable())?;
        Ok(Self::from_boxed(codec))
    }

    /// The active wire format.
    pub fn format(&self) -> Format {
        self.codec.format()
    }

    /// Reads a scalar of the given kind.
    pub fn read_primitive(&mut self, kind: PrimitiveKind) -> Result<Primitive> {
        self.codec.read_primitive(kind)
    }

    /// Reads a scalar as its Rust type.
    pub fn read_value<T: PrimitiveType>(&mut self) -> Result<T> {
        T::from_primitive(self.codec.read_primitive(T::KIND)?)
    }

    /// Reads a string.
    pub fn read_string(&mut self) -> Result<String> {
        self.codec.read_string()
    }

    /// Reads a byte blob.
    pub fn read_blob(&mut self) -> Result<Vec<u8>> {
        self.codec.read_blob()
    }

    /// Sets the name of the next value or node.
    pub fn set_next_name(&mut self, name: &str) {
        self.codec.set_next_name(name);
    }

    /// Reads a pointer or polymorphic id stored under `name`.
    pub fn read_tracked_id(&mut self, name: &str) -> Result<TrackedId> {
        self.codec.set_next_name(name);
        Ok(TrackedId::from_raw(self.read_value::<u32>()?))
    }

    /// Fails if `count` elements of `element_size` bytes cannot be in the rest of the stream.
    pub fn validate_read_size(&self, count: u64, element_size: usize) -> Result<()> {
        self.codec.validate_read_size(count, element_size)
    }

    /// How many elements may be reserved before reading a sequence of `count`.
    pub fn safe_to_reserve(&self, count: u64, element_size: usize) -> usize {
        self.codec.safe_to_reserve(count, element_size)
    }

    /// Runs `body` inside a node, optionally named.
    pub fn node<F>(&mut self, name: Option<&str>, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if let Some(name) = name {
            self.codec.set_next_name(name);
        }
        self.codec.start_node()?;
        body(self)?;
        self.codec.finish_node()
    }

    /// Builds a fresh `T` from the stream.
    ///
    /// Types with a [`Construct::blank`] instance are loaded in place; the rest go through
    /// [`Construct::load_and_construct`].
    pub fn construct<T: Construct>(&mut self) -> Result<T> {
        if let Some(mut value) = T::blank() {
            self.process(&mut value)?;
            return Ok(value);
        }
        let (_, opens_node, version) = self.enter::<T>()?;
        let value = T::load_and_construct(self, version)?;
        if opens_node {
            self.codec.finish_node()?;
        }
        Ok(value)
    }

    /// [`InputArchive::construct`] under an explicit member name.
    pub fn construct_named<T: Construct>(&mut self, name: &str) -> Result<T> {
        self.codec.set_next_name(name);
        self.construct()
    }

    /// Records the instance created for a newly seen pointer id.
    pub fn register_shared_pointer(&mut self, id: TrackedId, instance: Box<dyn Any>) -> Result<()> {
        if self.shared_pointers.insert(id.index(), instance).is_some() {
            return Err(ArchiveError::Malformed(format!("pointer id {} defined twice", id.index())));
        }
        tracing::trace!(%id, "registered shared pointer");
        Ok(())
    }

    /// The instance registered for a back-referenced pointer id.
    ///
    /// `P` is the stored handle type, typically `Rc<RefCell<T>>`.
    pub fn shared_pointer<P: Clone + 'static>(&self, id: TrackedId) -> Result<P> {
        let instance = self
            .shared_pointers
            .get(&id.index())
            .ok_or(ArchiveError::UnknownPointer(id.index()))?;
        instance.downcast_ref::<P>().cloned().ok_or_else(|| {
            ArchiveError::Malformed(format!(
                "pointer id {} does not refer to a `{}`",
                id.index(),
                type_name::<P>()
            ))
        })
    }

    /// Records the type name sent with a newly seen polymorphic id.
    pub fn register_polymorphic_name(&mut self, id: TrackedId, name: String) {
        tracing::trace!(%id, name = name.as_str(), "registered polymorphic type");
        self.polymorphic_names.insert(id.index(), name);
    }

    /// The type name of a back-referenced polymorphic id.
    pub fn polymorphic_name(&self, id: TrackedId) -> Result<String> {
        self.polymorphic_names
            .get(&id.index())
            .cloned()
            .ok_or(ArchiveError::UnknownPolymorphicType(id.index()))
    }

    /// Loads a shared pointer through `binding`, returning the `Rc<RefCell<T>>` as `dyn Any`.
    pub fn load_via_binding(&mut self, binding: &TypeBinding) -> Result<Box<dyn Any>> {
        binding.load_shared(self)
    }

    /// Loads a uniquely owned value through `binding`, returning the `T` as `dyn Any`.
    pub fn load_unique_via_binding(&mut self, binding: &TypeBinding) -> Result<Box<dyn Any>> {
        binding.load_unique(self)
    }

    /// Work items waiting in the deferred queue.
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Forgets every pointer, type name, version and base class seen so far and drops
    /// pending deferred work.
    pub fn reset(&mut self) {
        self.shared_pointers.clear();
        self.polymorphic_names.clear();
        self.versions.clear();
        self.bases.clear();
        self.deferred.clear();
    }

    /// Reads the class version of `T` the first time `T` appears in the session.
    fn load_class_version<T: Serializable>(&mut self) -> Result<u32> {
        let key = TypeId::of::<T>();
        if let Some(version) = self.versions.get(&key) {
            return Ok(*version);
        }
        let pending = self.codec.take_next_name();
        self.codec.set_next_name(CLASS_VERSION_NAME);
        let version = self.read_value::<u32>()?;
        if let Some(name) = pending {
            self.codec.set_next_name(&name);
        }
        self.versions.insert(key, version);
        tracing::trace!(type_name = type_name::<T>(), version, "read class version");
        Ok(version)
    }

    fn read_minimal<T>(&mut self, kind: MinimalKind) -> Result<Minimal> {
        let surrogate = match kind {
            MinimalKind::Primitive(primitive) => Minimal::Primitive(self.codec.read_primitive(primitive)?),
            MinimalKind::String => Minimal::String(self.codec.read_string()?),
        };
        tracing::trace!(type_name = type_name::<T>(), ?kind, "read minimal surrogate");
        Ok(surrogate)
    }

    /// Prologue: validates the strategy, enters the node and reads the class version.
    fn enter<T: Serializable>(&mut self) -> Result<(Strategy, bool, u32)> {
        let strategy = strategy::validate::<T>()?;
        let opens_node = strategy.opens_node() && T::NODE == NodeKind::Composite;
        if opens_node {
            self.codec.start_node()?;
        }
        let version = if strategy.versioned { self.load_class_version::<T>()? } else { 0 };
        Ok((strategy, opens_node, version))
    }
}

impl<'r> Archive for InputArchive<'r> {
    const IS_LOADING: bool = true;

    fn process<T: Serializable>(&mut self, value: &mut T) -> Result<()> {
        let (strategy, opens_node, version) = self.enter::<T>()?;
        match strategy.kind {
            StrategyKind::Serialize => value.serialize(self, version)?,
            StrategyKind::SaveLoad => value.load(self, version)?,
            StrategyKind::Minimal(kind) => {
                let surrogate = self.read_minimal::<T>(kind)?;
                value.load_minimal(surrogate, version)?;
            }
            StrategyKind::Empty => {}
        }
        if opens_node {
            self.codec.finish_node()?;
        }
        Ok(())
    }

    fn name_value<T: Serializable>(&mut self, pair: NameValuePair<'_, T>) -> Result<()> {
        self.codec.set_next_name(pair.name);
        self.process(pair.value)
    }

    fn size_tag(&mut self, size: &mut u64) -> Result<()> {
        *size = self.codec.read_size_tag()?.0;
        Ok(())
    }

    fn virtual_base_class<B: Serializable>(&mut self, base: &mut B) -> Result<()> {
        if self.bases.insert(base_key(base)) {
            self.process(base)?;
        }
        Ok(())
    }

    fn defer<T: Serializable>(&mut self, data: DeferredData<T>) -> Result<()> {
        let target = data.target;
        self.deferred.push_back(Box::new(move |ar: &mut InputArchive<'r>| {
            let mut value = target.try_borrow_mut().map_err(|_| {
                ArchiveError::Internal(format!("deferred `{}` is borrowed while flushing", type_name::<T>()))
            })?;
            ar.process(&mut *value)
        }));
        Ok(())
    }

    fn flush_deferred(&mut self) -> Result<()> {
        let mut flushed = 0usize;
        while let Some(thunk) = self.deferred.pop_front() {
            thunk(self)?;
            flushed += 1;
        }
        tracing::trace!(flushed, "flushed deferred input queue");
        Ok(())
    }
}

impl fmt::Debug for InputArchive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputArchive")
            .field("format", &self.codec.format())
            .field("shared_pointers", &self.shared_pointers.len())
            .field("polymorphic_names", &self.polymorphic_names.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
