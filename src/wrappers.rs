//! Small wrapper types understood by every archive.

use std::cell::RefCell;
use std::rc::Rc;

/// The element count of the dynamically sized sequence that follows.
///
/// Binary formats write it as a `u64`. The tree format writes nothing and recovers the count
/// from the number of children of the sequence's node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SizeTag(pub u64);

/// A value together with the name it carries in self-describing formats.
///
/// Binary formats ignore the name and process the value directly.
#[derive(Debug)]
pub struct NameValuePair<'a, T> {
    /// Member name.
    pub name: &'a str,
    /// The value, borrowed mutably so the same pair works for saving and loading.
    pub value: &'a mut T,
}

impl<'a, T> NameValuePair<'a, T> {
    /// Pairs `name` with `value`.
    pub fn new(name: &'a str, value: &'a mut T) -> Self {
        Self { name, value }
    }
}

/// Shorthand for [`NameValuePair::new`].
pub fn make_nvp<'a, T>(name: &'a str, value: &'a mut T) -> NameValuePair<'a, T> {
    NameValuePair::new(name, value)
}

/// A value whose processing is postponed until the archive's deferred queue is flushed.
///
/// The value is held through a shared handle, so the queued work stays valid no matter how the
/// surrounding graph is borrowed when it finally runs.
#[derive(Debug)]
pub struct DeferredData<T> {
    pub(crate) target: Rc<RefCell<T>>,
}

impl<T> DeferredData<T> {
    /// Defers the value behind `target`.
    pub fn new(target: &Rc<RefCell<T>>) -> Self {
        Self { target: Rc::clone(target) }
    }
}

/// Shorthand for [`DeferredData::new`].
pub fn defer<T>(target: &Rc<RefCell<T>>) -> DeferredData<T> {
    DeferredData::new(target)
}

/// An opaque byte buffer.
///
/// Binary formats write it as a size tag followed by the raw bytes; the tree format writes a
/// base64 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
