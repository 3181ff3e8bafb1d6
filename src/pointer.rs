//! Shared, weak, unique and polymorphic pointers.
//!
//! # Shared pointers
//! `Rc<RefCell<T>>` is written as a `ptr_wrapper` node holding the pointer id and, the first
//! time the pointee is seen in the session, its payload:
//!
//! ```text
//! ptr_wrapper { id: NEW|1, data: {...} }   first occurrence
//! ptr_wrapper { id: 1 }                    every later occurrence
//! ptr_wrapper { id: 0 }                    null (Option::None, expired Weak)
//! ```
//!
//! On load the instance is registered before its payload is read, so pointer cycles (through
//! `Weak` or `Option<Rc<..>>` fields) resolve to the same instance.
//!
//! # Unique pointers
//! `Box<T>` has no identity: a `valid` flag is followed by the payload.
//!
//! # Polymorphic pointers
//! For `dyn Base` pointees a `polymorphic_id` (plus `polymorphic_name` on first use of a type)
//! precedes the pointer body. The concrete type must be registered through
//! [`register_polymorphic!`](crate::register_polymorphic), unless it is the static type declared
//! with [`polymorphic_base!`](crate::polymorphic_base), which travels under
//! [`TrackedId::INLINE_TYPE`] without a name.

use crate::engine::{InputArchive, OutputArchive, PointerIdentity};
use crate::error::{ArchiveError, Result};
use crate::format::{
    POLYMORPHIC_ID_NAME, POLYMORPHIC_NAME_NAME, PTR_DATA_NAME, PTR_ID_NAME, PTR_VALID_NAME,
    PTR_WRAPPER_NAME, TrackedId,
};
use crate::registry::{Registry, SharedHandle, StaticBinding, TypeBinding};
use crate::serializable::{Archive, Construct, Polymorphic, Serializable};
use crate::strategy::Strategies;
use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// A type that can sit behind a serializable pointer.
///
/// Every [`Construct`] type is a pointee. Base traits become pointees through
/// [`polymorphic_base!`](crate::polymorphic_base).
pub trait Pointee: 'static {
    /// Writes a shared pointer, or the null id for `None`.
    fn save_shared(ar: &mut OutputArchive<'_>, pointer: Option<&Rc<RefCell<Self>>>) -> Result<()>;

    /// Reads a shared pointer; `None` for the null id.
    fn load_shared(ar: &mut InputArchive<'_>) -> Result<Option<Rc<RefCell<Self>>>>;

    /// Writes a uniquely owned value, or the invalid flag for `None`.
    fn save_unique(ar: &mut OutputArchive<'_>, value: Option<&mut Self>) -> Result<()>;

    /// Reads a uniquely owned value; `None` for the invalid flag.
    fn load_unique(ar: &mut InputArchive<'_>) -> Result<Option<Box<Self>>>;

    /// A weak pointer that never upgrades, if the type can express one.
    fn dangling() -> Option<Weak<RefCell<Self>>> {
        None
    }
}

impl<T: Construct> Pointee for T {
    fn save_shared(ar: &mut OutputArchive<'_>, pointer: Option<&Rc<RefCell<Self>>>) -> Result<()> {
        match pointer {
            Some(rc) => save_shared_thunk::<T>(ar, rc),
            None => ar.node(Some(PTR_WRAPPER_NAME), |ar| ar.write_tracked_id(PTR_ID_NAME, TrackedId::NULL)),
        }
    }

    fn load_shared(ar: &mut InputArchive<'_>) -> Result<Option<Rc<RefCell<Self>>>> {
        load_shared_pointer::<T>(ar)
    }

    fn save_unique(ar: &mut OutputArchive<'_>, value: Option<&mut Self>) -> Result<()> {
        save_unique_pointer(ar, value)
    }

    fn load_unique(ar: &mut InputArchive<'_>) -> Result<Option<Box<Self>>> {
        load_unique_pointer::<T>(ar)
    }

    fn dangling() -> Option<Weak<RefCell<Self>>> {
        Some(Weak::new())
    }
}

/// A base trait usable behind polymorphic pointers.
///
/// Implemented by [`polymorphic_base!`](crate::polymorphic_base).
pub trait PolymorphicBase: Polymorphic {
    /// The concrete type written through the static fast path, if one was declared.
    fn static_binding() -> Option<StaticBinding<Self>>;
}

fn busy<T: ?Sized>() -> ArchiveError {
    ArchiveError::Internal(format!("`{}` is already borrowed while being saved", type_name::<T>()))
}

fn wrong_payload<D>() -> ArchiveError {
    ArchiveError::Internal(format!("pointer payload is not a `{}`", type_name::<D>()))
}

pub(crate) fn save_shared_thunk<D: Construct>(ar: &mut OutputArchive<'_>, handle: &dyn SharedHandle) -> Result<()> {
    ar.node(Some(PTR_WRAPPER_NAME), |ar| {
        let identity = PointerIdentity {
            address: handle.address(),
            type_id: TypeId::of::<D>(),
            type_name: type_name::<D>(),
        };
        let id = ar.register_shared_pointer(identity, || handle.keep_alive())?;
        ar.write_tracked_id(PTR_ID_NAME, id)?;
        if id.is_new_entry() {
            handle.with_payload(&mut |payload: &mut dyn Any| {
                let value = payload.downcast_mut::<D>().ok_or_else(wrong_payload::<D>)?;
                ar.nvp(PTR_DATA_NAME, value)
            })?;
        }
        Ok(())
    })
}

pub(crate) fn save_unique_thunk<D: Construct>(ar: &mut OutputArchive<'_>, instance: &mut dyn Any) -> Result<()> {
    let value = instance.downcast_mut::<D>().ok_or_else(wrong_payload::<D>)?;
    save_unique_pointer(ar, Some(value))
}

pub(crate) fn load_shared_thunk<D: Construct>(ar: &mut InputArchive<'_>) -> Result<Box<dyn Any>> {
    let rc = load_shared_pointer::<D>(ar)?.ok_or_else(|| {
        ArchiveError::Malformed(format!("null pointer body for polymorphic `{}`", type_name::<D>()))
    })?;
    Ok(Box::new(rc))
}

pub(crate) fn load_unique_thunk<D: Construct>(ar: &mut InputArchive<'_>) -> Result<Box<dyn Any>> {
    let value = load_unique_pointer::<D>(ar)?.ok_or_else(|| {
        ArchiveError::Malformed(format!("invalid pointer body for polymorphic `{}`", type_name::<D>()))
    })?;
    let value: Box<dyn Any> = value;
    Ok(value)
}

fn load_shared_pointer<D: Construct>(ar: &mut InputArchive<'_>) -> Result<Option<Rc<RefCell<D>>>> {
    let mut loaded = None;
    ar.node(Some(PTR_WRAPPER_NAME), |ar| {
        let id = ar.read_tracked_id(PTR_ID_NAME)?;
        if id.is_null() {
            return Ok(());
        }
        if !id.is_new_entry() {
            loaded = Some(ar.shared_pointer::<Rc<RefCell<D>>>(id)?);
            return Ok(());
        }
        let rc = match D::blank() {
            Some(blank) => {
                let rc = Rc::new(RefCell::new(blank));
                ar.register_shared_pointer(id, Box::new(Rc::clone(&rc)))?;
                let mut value = rc.try_borrow_mut().map_err(|_| busy::<D>())?;
                ar.nvp(PTR_DATA_NAME, &mut *value)?;
                drop(value);
                rc
            }
            None => {
                let value = ar.construct_named::<D>(PTR_DATA_NAME)?;
                let rc = Rc::new(RefCell::new(value));
                ar.register_shared_pointer(id, Box::new(Rc::clone(&rc)))?;
                rc
            }
        };
        loaded = Some(rc);
        Ok(())
    })?;
    Ok(loaded)
}

fn save_unique_pointer<D: Serializable>(ar: &mut OutputArchive<'_>, value: Option<&mut D>) -> Result<()> {
    ar.node(Some(PTR_WRAPPER_NAME), |ar| {
        let mut valid = u8::from(value.is_some());
        ar.nvp(PTR_VALID_NAME, &mut valid)?;
        if let Some(value) = value {
            ar.nvp(PTR_DATA_NAME, value)?;
        }
        Ok(())
    })
}

fn load_unique_pointer<D: Construct>(ar: &mut InputArchive<'_>) -> Result<Option<Box<D>>> {
    let mut loaded = None;
    ar.node(Some(PTR_WRAPPER_NAME), |ar| {
        let mut valid = 0u8;
        ar.nvp(PTR_VALID_NAME, &mut valid)?;
        if valid != 0 {
            loaded = Some(Box::new(ar.construct_named::<D>(PTR_DATA_NAME)?));
        }
        Ok(())
    })?;
    Ok(loaded)
}

fn unregistered(action: &'static str, type_name: &str) -> ArchiveError {
    ArchiveError::UnregisteredType { action, type_name: type_name.to_owned() }
}

fn cast_failure<B: ?Sized>(binding: &TypeBinding) -> ArchiveError {
    unregistered("cast", &format!("{} as {}", binding.name(), type_name::<B>()))
}

/// The fast-path binding, if `type_id` is the declared static type of `B`.
fn static_binding_for<B: ?Sized + PolymorphicBase>(type_id: TypeId) -> Option<StaticBinding<B>> {
    B::static_binding().filter(|fast| fast.binding.type_id() == type_id)
}

/// Writes a shared pointer to a trait object.
pub fn save_polymorphic_shared<B: ?Sized + PolymorphicBase>(
    ar: &mut OutputArchive<'_>,
    pointer: Option<&Rc<RefCell<B>>>,
) -> Result<()> {
    let Some(rc) = pointer else {
        return ar.write_tracked_id(POLYMORPHIC_ID_NAME, TrackedId::NULL);
    };

    // A pointee being saved further up the stack is still borrowed; its type was recorded then.
    let (type_id, type_name) = match ar.shared_pointer_identity(rc.address()) {
        Some(identity) => (identity.type_id, identity.type_name),
        None => {
            let value = rc.try_borrow().map_err(|_| busy::<B>())?;
            (Polymorphic::runtime_type_id(&*value), Polymorphic::runtime_type_name(&*value))
        }
    };

    if let Some(fast) = static_binding_for::<B>(type_id) {
        ar.write_tracked_id(POLYMORPHIC_ID_NAME, TrackedId::INLINE_TYPE)?;
        return fast.binding.save_shared(ar, rc);
    }
    let binding = Registry::global()
        .binding_by_type(type_id)
        .ok_or_else(|| unregistered("save", type_name))?;
    ar.save_via_binding(&binding, rc)
}

/// Writes a uniquely owned trait object.
pub fn save_polymorphic_unique<B: ?Sized + PolymorphicBase>(
    ar: &mut OutputArchive<'_>,
    value: Option<&mut B>,
) -> Result<()> {
    let Some(value) = value else {
        return ar.write_tracked_id(POLYMORPHIC_ID_NAME, TrackedId::NULL);
    };
    let type_id = Polymorphic::runtime_type_id(&*value);

    if let Some(fast) = static_binding_for::<B>(type_id) {
        ar.write_tracked_id(POLYMORPHIC_ID_NAME, TrackedId::INLINE_TYPE)?;
        return fast.binding.save_unique(ar, Polymorphic::as_any_mut(value));
    }
    let binding = Registry::global()
        .binding_by_type(type_id)
        .ok_or_else(|| unregistered("save", Polymorphic::runtime_type_name(&*value)))?;
    ar.save_unique_via_binding(&binding, Polymorphic::as_any_mut(value))
}

/// Resolves a non-null, non-inline polymorphic id to the registered binding.
fn resolve_binding(ar: &mut InputArchive<'_>, id: TrackedId) -> Result<Arc<TypeBinding>> {
    let name = if id.is_new_entry() {
        ar.set_next_name(POLYMORPHIC_NAME_NAME);
        let name = ar.read_string()?;
        ar.register_polymorphic_name(id, name.clone());
        name
    } else {
        ar.polymorphic_name(id)?
    };
    Registry::global()
        .binding_by_name(&name)
        .ok_or_else(|| unregistered("load", &name))
}

/// Reads a shared pointer to a trait object.
pub fn load_polymorphic_shared<B: ?Sized + PolymorphicBase>(
    ar: &mut InputArchive<'_>,
) -> Result<Option<Rc<RefCell<B>>>> {
    let id = ar.read_tracked_id(POLYMORPHIC_ID_NAME)?;
    if id.is_null() {
        return Ok(None);
    }
    if id.is_inline_type() {
        let fast = B::static_binding().ok_or_else(|| {
            ArchiveError::Malformed(format!("`{}` has no static type for an inline pointer", type_name::<B>()))
        })?;
        let instance = fast.binding.load_shared(ar)?;
        return (fast.caster.shared)(instance).map(Some).ok_or_else(|| cast_failure::<B>(&fast.binding));
    }
    let binding = resolve_binding(ar, id)?;
    let caster = Registry::global()
        .caster::<B>(binding.type_id())
        .ok_or_else(|| cast_failure::<B>(&binding))?;
    let instance = ar.load_via_binding(&binding)?;
    (caster.shared)(instance).map(Some).ok_or_else(|| cast_failure::<B>(&binding))
}

/// Reads a uniquely owned trait object.
pub fn load_polymorphic_unique<B: ?Sized + PolymorphicBase>(ar: &mut InputArchive<'_>) -> Result<Option<Box<B>>> {
    let id = ar.read_tracked_id(POLYMORPHIC_ID_NAME)?;
    if id.is_null() {
        return Ok(None);
    }
    if id.is_inline_type() {
        let fast = B::static_binding().ok_or_else(|| {
            ArchiveError::Malformed(format!("`{}` has no static type for an inline pointer", type_name::<B>()))
        })?;
        let instance = fast.binding.load_unique(ar)?;
        return (fast.caster.unique)(instance).map(Some).ok_or_else(|| cast_failure::<B>(&fast.binding));
    }
    let binding = resolve_binding(ar, id)?;
    let caster = Registry::global()
        .caster::<B>(binding.type_id())
        .ok_or_else(|| cast_failure::<B>(&binding))?;
    let instance = ar.load_unique_via_binding(&binding)?;
    (caster.unique)(instance).map(Some).ok_or_else(|| cast_failure::<B>(&binding))
}

fn null_pointer<P>() -> ArchiveError {
    ArchiveError::Malformed(format!("null pointer loaded into non-nullable `{}`", type_name::<P>()))
}

impl<T: ?Sized + Pointee> Serializable for Rc<RefCell<T>> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        T::save_shared(ar, Some(self))
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        *self = T::load_shared(ar)?.ok_or_else(null_pointer::<Self>)?;
        Ok(())
    }
}

impl<T: ?Sized + Pointee> Serializable for Option<Rc<RefCell<T>>> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        T::save_shared(ar, self.as_ref())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        *self = T::load_shared(ar)?;
        Ok(())
    }
}

impl<T: ?Sized + Pointee> Serializable for Weak<RefCell<T>> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        let strong = self.upgrade();
        T::save_shared(ar, strong.as_ref())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        *self = match T::load_shared(ar)? {
            Some(rc) => Rc::downgrade(&rc),
            None => T::dangling().ok_or_else(|| {
                ArchiveError::Malformed(format!("expired weak pointer to unsized `{}`", type_name::<T>()))
            })?,
        };
        Ok(())
    }
}

impl<T: ?Sized + Pointee> Serializable for Box<T> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        T::save_unique(ar, Some(&mut **self))
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        *self = T::load_unique(ar)?.ok_or_else(null_pointer::<Self>)?;
        Ok(())
    }
}

impl<T: ?Sized + Pointee> Serializable for Option<Box<T>> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        T::save_unique(ar, self.as_deref_mut())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        *self = T::load_unique(ar)?;
        Ok(())
    }
}
