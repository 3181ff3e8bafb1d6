use super::{PointerIdentity, SessionMap, SessionSet, base_key};
use crate::codec::{
    self, BinaryOutput, Format, Minimal, MinimalKind, OutputCodec, PortableBinaryOutput, Primitive,
    TreeOutput,
};
use crate::config::{ArchiveOptions, PortableOptions, TreeOptions};
use crate::error::{ArchiveError, Result};
use crate::format::{CLASS_VERSION_NAME, POLYMORPHIC_ID_NAME, POLYMORPHIC_NAME_NAME, TrackedId};
use crate::registry::{self, SharedHandle, TypeBinding};
use crate::serializable::{Archive, NodeKind, Serializable};
use crate::strategy::{self, Strategy, StrategyKind};
use crate::wrappers::{DeferredData, NameValuePair, SizeTag};
use std::any::{Any, TypeId, type_name};
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;

type OutputThunk<'w> = Box<dyn FnOnce(&mut OutputArchive<'w>) -> Result<()>>;

/// An encoding session.
///
/// ```rust
/// use archivist::{Archive, OutputArchive, PortableOptions};
///
/// let mut bytes = Vec::new();
/// let mut ar = OutputArchive::portable_binary(&mut bytes, PortableOptions::little_endian())?;
/// ar.process(&mut 7u32)?;
/// ar.finish()?;
/// assert_eq!(bytes, [1, 7, 0, 0, 0]);
/// # Ok::<(), archivist::ArchiveError>(())
/// ```
///
/// Call [`OutputArchive::finish`] once everything is written; dropping an unfinished archive
/// finishes it on a best-effort basis and only logs failures.
pub struct OutputArchive<'w> {
    codec: Box<dyn OutputCodec + 'w>,
    shared_pointers: SessionMap<usize, (TrackedId, PointerIdentity)>,
    /// Clones of every registered shared pointer; their addresses stay unique for the session.
    keep_alive: Vec<Box<dyn Any>>,
    polymorphic_names: SessionMap<&'static str, TrackedId>,
    versioned_types: SessionSet<TypeId>,
    bases: SessionSet<(TypeId, usize)>,
    deferred: VecDeque<OutputThunk<'w>>,
    finished: bool,
}

impl<'w> OutputArchive<'w> {
    /// Starts a session on an arbitrary codec.
    pub fn new(codec: impl OutputCodec + 'w) -> Self {
        Self::from_boxed(Box::new(codec))
    }

    /// Starts a session on an already boxed codec.
    pub fn from_boxed(codec: Box<dyn OutputCodec + 'w>) -> Self {
        tracing::trace!(format = %codec.format(), "starting output archive");
        Self {
            codec,
            shared_pointers: SessionMap::default(),
            keep_alive: Vec::new(),
            polymorphic_names: SessionMap::default(),
            versioned_types: SessionSet::default(),
            bases: SessionSet::default(),
            deferred: VecDeque::new(),
            finished: false,
        }
    }

    /// Native binary session.
    pub fn binary<W: Write + 'w>(writer: W) -> Self {
        Self::new(BinaryOutput::new(writer))
    }

    /// Portable binary session; the endianness header is written immediately.
    pub fn portable_binary<W: Write + 'w>(writer: W, options: PortableOptions) -> Result<Self> {
        Ok(Self::new(PortableBinaryOutput::new(writer, options)?))
    }

    /// Tree (JSON) session; the document is written by [`OutputArchive::finish`].
    pub fn tree<W: Write + 'w>(writer: W, options: TreeOptions) -> Self {
        Self::new(TreeOutput::new(writer, options))
    }

    /// Session in the format described by `options`.
    pub fn with_options<W: Write + 'w>(writer: W, options: &ArchiveOptions) -> Result<Self> {
        let codec = codec::output_codec(options.format, writer, options.portable(), options.tree())?;
        Ok(Self::from_boxed(codec))
    }

    /// The active wire format.
    pub fn format(&self) -> Format {
        self.codec.format()
    }

    /// Writes a scalar through the codec.
    pub fn write_primitive(&mut self, value: Primitive) -> Result<()> {
        self.codec.write_primitive(value)
    }

    /// Writes a string through the codec.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        self.codec.write_str(value)
    }

    /// Writes a byte blob through the codec.
    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<()> {
        self.codec.write_blob(bytes)
    }

    /// Names the next value or node written.
    pub fn set_next_name(&mut self, name: &str) {
        self.codec.set_next_name(name);
    }

    /// Writes a pointer or polymorphic id under `name`.
    pub fn write_tracked_id(&mut self, name: &str, id: TrackedId) -> Result<()> {
        self.codec.set_next_name(name);
        self.codec.write_primitive(Primitive::U32(id.raw()))
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

    /// Returns the id of a shared object, allocating one on first sight.
    ///
    /// First sight yields a [`TrackedId::is_new_entry`] id; the caller then writes the payload.
    /// `keep_alive` is invoked once, on first sight, and the handle it returns is held until the
    /// session ends so the address cannot be reused by another object.
    pub fn register_shared_pointer<K>(&mut self, identity: PointerIdentity, keep_alive: K) -> Result<TrackedId>
    where
        K: FnOnce() -> Box<dyn Any>,
    {
        if let Some((id, _)) = self.shared_pointers.get(&identity.address) {
            return TrackedId::reference(id.index());
        }
        let index = u32::try_from(self.shared_pointers.len() + 1)
            .map_err(|_| ArchiveError::Internal("shared pointer ids exhausted".into()))?;
        let id = TrackedId::new_entry(index)?;
        self.shared_pointers.insert(identity.address, (id, identity));
        self.keep_alive.push(keep_alive());
        tracing::trace!(%id, type_name = identity.type_name, "registered shared pointer");
        Ok(id)
    }

    /// What was recorded for `address` when it was first registered.
    pub fn shared_pointer_identity(&self, address: usize) -> Option<PointerIdentity> {
        self.shared_pointers.get(&address).map(|(_, identity)| *identity)
    }

    /// Returns the session id of a polymorphic type name, allocating one on first sight.
    pub fn register_polymorphic_type(&mut self, name: &'static str) -> Result<TrackedId> {
        if let Some(id) = self.polymorphic_names.get(name) {
            return TrackedId::reference(id.index());
        }
        let index = u32::try_from(self.polymorphic_names.len() + 1)
            .map_err(|_| ArchiveError::Internal("polymorphic type ids exhausted".into()))?;
        let id = TrackedId::new_entry(index)?;
        self.polymorphic_names.insert(name, id);
        tracing::trace!(%id, name, "registered polymorphic type");
        Ok(id)
    }

    fn write_polymorphic_header(&mut self, name: &'static str) -> Result<()> {
        let id = self.register_polymorphic_type(name)?;
        self.write_tracked_id(POLYMORPHIC_ID_NAME, id)?;
        if id.is_new_entry() {
            self.codec.set_next_name(POLYMORPHIC_NAME_NAME);
            self.codec.write_str(name)?;
        }
        Ok(())
    }

    /// Writes a shared polymorphic pointer through `binding`: type id, type name on first
    /// sight, then the pointer protocol of the concrete type.
    pub fn save_via_binding(&mut self, binding: &TypeBinding, handle: &dyn SharedHandle) -> Result<()> {
        self.write_polymorphic_header(binding.name())?;
        binding.save_shared(self, handle)
    }

    /// Writes a uniquely owned polymorphic value through `binding`.
    pub fn save_unique_via_binding(&mut self, binding: &TypeBinding, instance: &mut dyn Any) -> Result<()> {
        self.write_polymorphic_header(binding.name())?;
        binding.save_unique(self, instance)
    }

    /// Work items waiting in the deferred queue.
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Forgets every pointer, type name, version and base class seen so far and drops
    /// pending deferred work. The codec keeps its position.
    pub fn reset(&mut self) {
        self.shared_pointers.clear();
        self.keep_alive.clear();
        self.polymorphic_names.clear();
        self.versioned_types.clear();
        self.bases.clear();
        self.deferred.clear();
    }

    /// Completes the session and flushes the codec.
    pub fn finish(mut self) -> Result<()> {
        self.finish_session()
    }

    fn finish_session(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.deferred.is_empty() {
            tracing::warn!(pending = self.deferred.len(), "finishing output archive with unflushed deferred data");
        }
        tracing::trace!(pointers = self.shared_pointers.len(), "finishing output archive");
        self.codec.finish()
    }

    /// Writes the class version of `T` the first time `T` appears in the session.
    fn register_class_version<T: Serializable>(&mut self) -> Result<u32> {
        let version = registry::class_version::<T>();
        if self.versioned_types.insert(TypeId::of::<T>()) {
            let pending = self.codec.take_next_name();
            self.codec.set_next_name(CLASS_VERSION_NAME);
            self.codec.write_primitive(Primitive::U32(version))?;
            if let Some(name) = pending {
                self.codec.set_next_name(&name);
            }
        }
        Ok(version)
    }

    fn write_minimal<T>(&mut self, declared: MinimalKind, surrogate: Minimal) -> Result<()> {
        if surrogate.kind() != declared {
            return Err(ArchiveError::Internal(format!(
                "`{}` declared a {declared:?} surrogate but save_minimal produced {:?}",
                type_name::<T>(),
                surrogate.kind()
            )));
        }
        match surrogate {
            Minimal::Primitive(value) => self.codec.write_primitive(value),
            Minimal::String(value) => self.codec.write_str(&value),
        }
    }

    /// Prologue: validates the strategy, opens the node and writes the class version.
    fn enter<T: Serializable>(&mut self) -> Result<(Strategy, bool, u32)> {
        let strategy = strategy::validate::<T>()?;
        let opens_node = strategy.opens_node() && T::NODE == NodeKind::Composite;
        if opens_node {
            self.codec.start_node()?;
        }
        let version = if strategy.versioned { self.register_class_version::<T>()? } else { 0 };
        Ok((strategy, opens_node, version))
    }
}

impl<'w> Archive for OutputArchive<'w> {
    const IS_LOADING: bool = false;

    fn process<T: Serializable>(&mut self, value: &mut T) -> Result<()> {
        let (strategy, opens_node, version) = self.enter::<T>()?;
        match strategy.kind {
            StrategyKind::Serialize => value.serialize(self, version)?,
            StrategyKind::SaveLoad => value.save(self, version)?,
            StrategyKind::Minimal(kind) => {
                let surrogate = value.save_minimal(version)?;
                self.write_minimal::<T>(kind, surrogate)?;
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
        self.codec.write_size_tag(SizeTag(*size))
    }

    fn virtual_base_class<B: Serializable>(&mut self, base: &mut B) -> Result<()> {
        if self.bases.insert(base_key(base)) {
            self.process(base)?;
        }
        Ok(())
    }

    fn defer<T: Serializable>(&mut self, data: DeferredData<T>) -> Result<()> {
        let target = data.target;
        self.deferred.push_back(Box::new(move |ar: &mut OutputArchive<'w>| {
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
        tracing::trace!(flushed, "flushed deferred output queue");
        Ok(())
    }
}

impl Drop for OutputArchive<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.finish_session() {
            tracing::warn!(%err, "failed to finish output archive on drop");
        }
    }
}

impl fmt::Debug for OutputArchive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputArchive")
            .field("format", &self.codec.format())
            .field("shared_pointers", &self.shared_pointers.len())
            .field("polymorphic_names", &self.polymorphic_names.len())
            .field("deferred", &self.deferred.len())
            .field("finished", &self.finished)
            .finish()
    }
}
