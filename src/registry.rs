//! Process-wide registry of polymorphic types.
//!
//! Saving a value through a trait-object pointer needs a name for its concrete type; loading it
//! back needs the reverse mapping plus a way to turn the freshly built concrete value into the
//! base trait object. Both live here:
//!
//! - **Bindings** ([`TypeBinding`]): name ⇄ `TypeId` plus the save/load routines of one concrete
//!   type, registered with [`register_type`].
//! - **Relations** ([`Caster`]): how to view a concrete type as a given base, registered with
//!   [`register_relation`] or the [`register_polymorphic!`](crate::register_polymorphic) macro.
//! - **Class version overrides** set with [`set_class_version`].
//!
//! Registration is expected during startup; the tables are read-mostly afterwards and guarded
//! by a `parking_lot` read-write lock.

use crate::engine::{InputArchive, OutputArchive};
use crate::error::{ArchiveError, Result};
use crate::pointer;
use crate::serializable::{Construct, Polymorphic, Serializable};
use parking_lot::RwLock;
use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

/// A shared pointer, erased down to what the pointer table and the save routines need.
pub trait SharedHandle {
    /// Address of the shared allocation.
    fn address(&self) -> usize;

    /// A type-erased clone keeping the allocation alive.
    fn keep_alive(&self) -> Box<dyn Any>;

    /// Runs `f` on the pointee, viewed as its concrete type.
    fn with_payload(&self, f: &mut dyn FnMut(&mut dyn Any) -> Result<()>) -> Result<()>;
}

impl<B: ?Sized + Polymorphic> SharedHandle for Rc<RefCell<B>> {
    fn address(&self) -> usize {
        Rc::as_ptr(self).cast::<()>() as usize
    }

    fn keep_alive(&self) -> Box<dyn Any> {
        Box::new(Rc::clone(self))
    }

    fn with_payload(&self, f: &mut dyn FnMut(&mut dyn Any) -> Result<()>) -> Result<()> {
        let mut guard = self.try_borrow_mut().map_err(|_| {
            ArchiveError::Internal(format!("`{}` is already borrowed while being saved", type_name::<B>()))
        })?;
        f(Polymorphic::as_any_mut(&mut *guard))
    }
}

type SaveShared = fn(&mut OutputArchive<'_>, &dyn SharedHandle) -> Result<()>;
type SaveUnique = fn(&mut OutputArchive<'_>, &mut dyn Any) -> Result<()>;
type LoadErased = fn(&mut InputArchive<'_>) -> Result<Box<dyn Any>>;

/// The registered name and pointer routines of one concrete type.
#[derive(Clone)]
pub struct TypeBinding {
    name: &'static str,
    type_id: TypeId,
    save_shared: SaveShared,
    save_unique: SaveUnique,
    load_shared: LoadErased,
    load_unique: LoadErased,
}

impl TypeBinding {
    /// The binding of `D` under `name`.
    pub fn new<D: Construct>(name: &'static str) -> Self {
        Self {
            name,
            type_id: TypeId::of::<D>(),
            save_shared: pointer::save_shared_thunk::<D>,
            save_unique: pointer::save_unique_thunk::<D>,
            load_shared: pointer::load_shared_thunk::<D>,
            load_unique: pointer::load_unique_thunk::<D>,
        }
    }

    /// The name written to the stream.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The concrete type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Writes a shared pointer to the concrete type.
    pub fn save_shared(&self, ar: &mut OutputArchive<'_>, handle: &dyn SharedHandle) -> Result<()> {
        (self.save_shared)(ar, handle)
    }

    /// Writes a uniquely owned value of the concrete type.
    pub fn save_unique(&self, ar: &mut OutputArchive<'_>, instance: &mut dyn Any) -> Result<()> {
        (self.save_unique)(ar, instance)
    }

    /// Reads a shared pointer, returned as `Rc<RefCell<T>>` behind `dyn Any`.
    pub fn load_shared(&self, ar: &mut InputArchive<'_>) -> Result<Box<dyn Any>> {
        (self.load_shared)(ar)
    }

    /// Reads a uniquely owned value, returned as `T` behind `dyn Any`.
    pub fn load_unique(&self, ar: &mut InputArchive<'_>) -> Result<Box<dyn Any>> {
        (self.load_unique)(ar)
    }
}

impl fmt::Debug for TypeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeBinding").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Converts erased instances of one concrete type into pointers to base `B`.
pub struct Caster<B: ?Sized> {
    /// `Rc<RefCell<D>>` behind `dyn Any` to `Rc<RefCell<B>>`.
    pub shared: fn(Box<dyn Any>) -> Option<Rc<RefCell<B>>>,
    /// `D` behind `dyn Any` to `Box<B>`.
    pub unique: fn(Box<dyn Any>) -> Option<Box<B>>,
}

impl<B: ?Sized> Clone for Caster<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ?Sized> Copy for Caster<B> {}

impl<B: ?Sized> fmt::Debug for Caster<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caster").field("base", &type_name::<B>()).finish_non_exhaustive()
    }
}

/// A concrete type known at compile time to be the most common pointee of base `B`.
///
/// Values of exactly this type are written without a type name and do not need to be
/// registered.
#[derive(Debug)]
pub struct StaticBinding<B: ?Sized> {
    /// Routines of the concrete type.
    pub binding: TypeBinding,
    /// Conversion to the base.
    pub caster: Caster<B>,
}

impl<B: ?Sized> StaticBinding<B> {
    /// The static binding of `D`.
    pub fn new<D: Construct>(caster: Caster<B>) -> Self {
        Self { binding: TypeBinding::new::<D>(type_name::<D>()), caster }
    }
}

#[derive(Default)]
struct RegistryState {
    by_name: HashMap<&'static str, Arc<TypeBinding>>,
    by_type: HashMap<TypeId, Arc<TypeBinding>>,
    /// `(base, derived)` to a boxed `Caster<base>`.
    casters: HashMap<(TypeId, TypeId), Arc<dyn Any + Send + Sync>>,
    versions: HashMap<TypeId, u32>,
}

/// The process-wide tables.
pub struct Registry {
    state: RwLock<RegistryState>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// The global registry, created on first use.
    pub fn global() -> &'static Self {
        REGISTRY.get_or_init(|| {
            tracing::debug!("initializing type registry");
            Self { state: RwLock::new(RegistryState::default()) }
        })
    }

    /// Adds a binding. Registering the same type under the same name again is a no-op.
    pub fn register_binding(&self, binding: TypeBinding) -> Result<Arc<TypeBinding>> {
        let mut state = self.state.write();
        if let Some(existing) = state.by_name.get(binding.name) {
            if existing.type_id == binding.type_id {
                return Ok(Arc::clone(existing));
            }
            return Err(ArchiveError::Registration(format!(
                "name `{}` is already bound to another type",
                binding.name
            )));
        }
        if let Some(existing) = state.by_type.get(&binding.type_id) {
            return Err(ArchiveError::Registration(format!(
                "type is already registered as `{}`, cannot register it as `{}`",
                existing.name, binding.name
            )));
        }
        tracing::debug!(name = binding.name, "registered polymorphic type");
        let binding = Arc::new(binding);
        state.by_name.insert(binding.name, Arc::clone(&binding));
        state.by_type.insert(binding.type_id, Arc::clone(&binding));
        Ok(binding)
    }

    /// Records how the concrete type `derived` converts to base `B`.
    pub fn register_caster<B: ?Sized + 'static>(&self, derived: TypeId, caster: Caster<B>) {
        let key = (TypeId::of::<B>(), derived);
        self.state.write().casters.insert(key, Arc::new(caster));
    }

    /// The binding of a concrete type.
    pub fn binding_by_type(&self, type_id: TypeId) -> Option<Arc<TypeBinding>> {
        self.state.read().by_type.get(&type_id).cloned()
    }

    /// The binding registered under `name`.
    pub fn binding_by_name(&self, name: &str) -> Option<Arc<TypeBinding>> {
        self.state.read().by_name.get(name).cloned()
    }

    /// The conversion from `derived` to base `B`, if the relation was registered.
    pub fn caster<B: ?Sized + 'static>(&self, derived: TypeId) -> Option<Caster<B>> {
        let state = self.state.read();
        let caster = state.casters.get(&(TypeId::of::<B>(), derived))?;
        caster.downcast_ref::<Caster<B>>().copied()
    }

    /// Overrides the class version written for a type.
    pub fn set_class_version(&self, type_id: TypeId, version: u32) {
        self.state.write().versions.insert(type_id, version);
    }

    /// The overridden class version of a type, if any.
    pub fn class_version(&self, type_id: TypeId) -> Option<u32> {
        self.state.read().versions.get(&type_id).copied()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Registry")
            .field("types", &state.by_name.keys().collect::<Vec<_>>())
            .field("relations", &state.casters.len())
            .finish()
    }
}

/// Registers `D` under `name` for polymorphic pointers.
pub fn register_type<D: Construct>(name: &'static str) -> Result<Arc<TypeBinding>> {
    Registry::global().register_binding(TypeBinding::new::<D>(name))
}

/// Registers that `D` can be viewed as base `B`.
pub fn register_relation<B: ?Sized + 'static, D: 'static>(caster: Caster<B>) {
    tracing::debug!(base = type_name::<B>(), derived = type_name::<D>(), "registered relation");
    Registry::global().register_caster::<B>(TypeId::of::<D>(), caster);
}

/// Overrides [`Serializable::VERSION`] for `T` in every later session.
pub fn set_class_version<T: Serializable>(version: u32) {
    Registry::global().set_class_version(TypeId::of::<T>(), version);
}

/// The class version written for `T`.
pub fn class_version<T: Serializable>() -> u32 {
    Registry::global().class_version(TypeId::of::<T>()).unwrap_or(T::VERSION)
}

/// Builds the [`Caster`] from concrete `$derived` to `dyn $base`.
#[macro_export]
macro_rules! caster {
    (dyn $base:path => $derived:ty) => {
        $crate::registry::Caster::<dyn $base> {
            shared: |any| {
                any.downcast::<::std::rc::Rc<::std::cell::RefCell<$derived>>>().ok().map(|rc| {
                    let rc: ::std::rc::Rc<::std::cell::RefCell<dyn $base>> = *rc;
                    rc
                })
            },
            unique: |any| {
                any.downcast::<$derived>().ok().map(|value| {
                    let value: ::std::boxed::Box<dyn $base> = value;
                    value
                })
            },
        }
    };
}

/// Registers a concrete type and its relation to a base trait in one step.
///
/// ```rust
/// use archivist::{Archive, Polymorphic, Result, Serializable, Strategies};
///
/// trait Shape: Polymorphic {}
/// archivist::polymorphic_base!(dyn Shape);
///
/// #[derive(Default)]
/// struct Square(f64);
/// impl Shape for Square {}
/// impl Serializable for Square {
///     const STRATEGY: Strategies = Strategies::SERIALIZE;
///     fn serialize<A: Archive>(&mut self, ar: &mut A, _: u32) -> Result<()> {
///         ar.nvp("side", &mut self.0)
///     }
/// }
///
/// archivist::register_polymorphic!(dyn Shape => Square, "Square")?;
/// # Ok::<(), archivist::ArchiveError>(())
/// ```
///
/// The name defaults to the type path as written.
#[macro_export]
macro_rules! register_polymorphic {
    (dyn $base:path => $derived:ty) => {
        $crate::register_polymorphic!(dyn $base => $derived, stringify!($derived))
    };
    (dyn $base:path => $derived:ty, $name:expr) => {
        $crate::registry::register_type::<$derived>($name).map(|binding| {
            $crate::registry::register_relation::<dyn $base, $derived>($crate::caster!(dyn $base => $derived));
            binding
        })
    };
}

/// Enables `Rc<RefCell<dyn Base>>`, `Weak<RefCell<dyn Base>>` and `Box<dyn Base>` for a base
/// trait. The trait must have [`Polymorphic`] as a supertrait.
///
/// With a second argument, values of that concrete type are written through a static fast path
/// without a type name, and the type needs no registration.
#[macro_export]
macro_rules! polymorphic_base {
    (dyn $base:path) => {
        $crate::polymorphic_base!(@impl [$base] ::std::option::Option::None);
    };
    (dyn $base:path, $concrete:ty) => {
        $crate::polymorphic_base!(@impl [$base] ::std::option::Option::Some(
            $crate::registry::StaticBinding::new::<$concrete>($crate::caster!(dyn $base => $concrete))
        ));
    };
    (@impl [$base:path] $binding:expr) => {
        impl $crate::pointer::PolymorphicBase for dyn $base {
            fn static_binding() -> ::std::option::Option<$crate::registry::StaticBinding<Self>> {
                $binding
            }
        }

        impl $crate::pointer::Pointee for dyn $base {
            fn save_shared(
                ar: &mut $crate::OutputArchive<'_>,
                pointer: ::std::option::Option<&::std::rc::Rc<::std::cell::RefCell<Self>>>,
            ) -> $crate::Result<()> {
                $crate::pointer::save_polymorphic_shared::<Self>(ar, pointer)
            }

            fn load_shared(
                ar: &mut $crate::InputArchive<'_>,
            ) -> $crate::Result<::std::option::Option<::std::rc::Rc<::std::cell::RefCell<Self>>>> {
                $crate::pointer::load_polymorphic_shared::<Self>(ar)
            }

            fn save_unique(
                ar: &mut $crate::OutputArchive<'_>,
                value: ::std::option::Option<&mut Self>,
            ) -> $crate::Result<()> {
                $crate::pointer::save_polymorphic_unique::<Self>(ar, value)
            }

            fn load_unique(
                ar: &mut $crate::InputArchive<'_>,
            ) -> $crate::Result<::std::option::Option<::std::boxed::Box<Self>>> {
                $crate::pointer::load_polymorphic_unique::<Self>(ar)
            }
        }
    };
}
