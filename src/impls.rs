//! [`Serializable`] for primitives and standard collections.
//!
//! Collections are thin collaborators of the engine: a size tag followed by one processed
//! value per element. Maps write one `{key, value}` node per entry.

use crate::codec::{Primitive, PrimitiveType};
use crate::engine::{InputArchive, OutputArchive};
use crate::error::{ArchiveError, Result};
use crate::serializable::{Archive, Construct, NodeKind, Serializable};
use crate::strategy::Strategies;
use crate::wrappers::Blob;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

const MAP_KEY_NAME: &str = "key";
const MAP_VALUE_NAME: &str = "value";

macro_rules! impl_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl Serializable for $t {
                const STRATEGY: Strategies = Strategies::SAVE_LOAD;
                const NODE: NodeKind = NodeKind::Leaf;
                const WIRE_SIZE: Option<usize> = Some(<$t as PrimitiveType>::KIND.width());

                fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
                    ar.write_primitive(PrimitiveType::into_primitive(*self))
                }

                fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
                    *self = ar.read_value::<$t>()?;
                    Ok(())
                }
            }
        )*
    };
}

impl_primitive!(bool, char, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64);

// Pointer-sized integers travel as 64-bit values.
macro_rules! impl_pointer_sized {
    ($($t:ty => $wire:ty, $variant:ident);* $(;)?) => {
        $(
            impl Serializable for $t {
                const STRATEGY: Strategies = Strategies::SAVE_LOAD;
                const NODE: NodeKind = NodeKind::Leaf;
                const WIRE_SIZE: Option<usize> = Some(size_of::<$wire>());

                fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
                    let wide = <$wire>::try_from(*self)
                        .map_err(|_| ArchiveError::Internal(format!("{} does not fit in {}", self, stringify!($wire))))?;
                    ar.write_primitive(Primitive::$variant(wide))
                }

                fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
                    let wide = ar.read_value::<$wire>()?;
                    *self = <$t>::try_from(wide).map_err(|_| {
                        ArchiveError::Malformed(format!("{wide} does not fit in {}", stringify!($t)))
                    })?;
                    Ok(())
                }
            }
        )*
    };
}

impl_pointer_sized! {
    usize => u64, U64;
    isize => i64, I64;
}

impl Serializable for String {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;
    const NODE: NodeKind = NodeKind::Leaf;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        ar.write_str(self)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        *self = ar.read_string()?;
        Ok(())
    }
}

impl Serializable for Blob {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;
    const NODE: NodeKind = NodeKind::Leaf;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        ar.write_blob(&self.0)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        self.0 = ar.read_blob()?;
        Ok(())
    }
}

impl Serializable for () {
    const STRATEGY: Strategies = Strategies::EMPTY;
}

impl<T: 'static> Serializable for PhantomData<T> {
    const STRATEGY: Strategies = Strategies::EMPTY;
}

/// Writes the size tag and every element.
fn save_sequence<'a, T, I>(ar: &mut OutputArchive<'_>, len: usize, items: I) -> Result<()>
where
    T: Serializable,
    I: IntoIterator<Item = &'a mut T>,
{
    let mut size = len as u64;
    ar.size_tag(&mut size)?;
    for item in items {
        ar.process(item)?;
    }
    Ok(())
}

/// Reads the size tag; returns the element count and how many elements may be reserved.
fn load_sequence_len<T: Serializable>(ar: &mut InputArchive<'_>) -> Result<(u64, usize)> {
    let mut size = 0u64;
    ar.size_tag(&mut size)?;
    let element_size = match T::WIRE_SIZE {
        Some(width) => {
            ar.validate_read_size(size, width)?;
            width
        }
        None => size_of::<T>(),
    };
    Ok((size, ar.safe_to_reserve(size, element_size)))
}

impl<T: Construct> Serializable for Vec<T> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        save_sequence(ar, self.len(), self.iter_mut())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        let (count, reserve) = load_sequence_len::<T>(ar)?;
        self.clear();
        self.reserve(reserve);
        for _ in 0..count {
            self.push(ar.construct()?);
        }
        Ok(())
    }
}

impl<T: Construct> Serializable for VecDeque<T> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        save_sequence(ar, self.len(), self.iter_mut())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        let (count, reserve) = load_sequence_len::<T>(ar)?;
        self.clear();
        self.reserve(reserve);
        for _ in 0..count {
            self.push_back(ar.construct()?);
        }
        Ok(())
    }
}

impl<T: Construct + Clone + Ord> Serializable for BTreeSet<T> {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        let mut items: Vec<T> = self.iter().cloned().collect();
        save_sequence(ar, items.len(), items.iter_mut())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        let (count, _) = load_sequence_len::<T>(ar)?;
        self.clear();
        for _ in 0..count {
            self.insert(ar.construct()?);
        }
        Ok(())
    }
}

impl<T, S> Serializable for HashSet<T, S>
where
    T: Construct + Clone + Eq + Hash,
    S: BuildHasher + Default + 'static,
{
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        let mut items: Vec<T> = self.iter().cloned().collect();
        save_sequence(ar, items.len(), items.iter_mut())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        let (count, reserve) = load_sequence_len::<T>(ar)?;
        self.clear();
        self.reserve(reserve);
        for _ in 0..count {
            self.insert(ar.construct()?);
        }
        Ok(())
    }
}

impl<T: Serializable, const N: usize> Serializable for [T; N] {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        for item in self.iter_mut() {
            ar.process(item)?;
        }
        Ok(())
    }
}

impl<A0: Serializable, A1: Serializable> Serializable for (A0, A1) {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        ar.nvp("first", &mut self.0)?;
        ar.nvp("second", &mut self.1)
    }
}

impl<A0: Serializable, A1: Serializable, A2: Serializable> Serializable for (A0, A1, A2) {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        ar.nvp("tuple_element0", &mut self.0)?;
        ar.nvp("tuple_element1", &mut self.1)?;
        ar.nvp("tuple_element2", &mut self.2)
    }
}

fn save_map_entry<K: Serializable, V: Serializable>(
    ar: &mut OutputArchive<'_>,
    key: &mut K,
    value: &mut V,
) -> Result<()> {
    ar.node(None, |ar| {
        ar.nvp(MAP_KEY_NAME, key)?;
        ar.nvp(MAP_VALUE_NAME, value)
    })
}

fn load_map_entry<K: Construct, V: Construct>(ar: &mut InputArchive<'_>) -> Result<(K, V)> {
    let mut entry = None;
    ar.node(None, |ar| {
        let key = ar.construct_named::<K>(MAP_KEY_NAME)?;
        let value = ar.construct_named::<V>(MAP_VALUE_NAME)?;
        entry = Some((key, value));
        Ok(())
    })?;
    entry.ok_or_else(|| ArchiveError::Internal("map entry node produced no entry".into()))
}

impl<K, V> Serializable for BTreeMap<K, V>
where
    K: Construct + Clone + Ord,
    V: Construct,
{
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        let mut size = self.len() as u64;
        ar.size_tag(&mut size)?;
        for (key, value) in self.iter_mut() {
            save_map_entry(ar, &mut key.clone(), value)?;
        }
        Ok(())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        let mut size = 0u64;
        ar.size_tag(&mut size)?;
        self.clear();
        for _ in 0..size {
            let (key, value) = load_map_entry::<K, V>(ar)?;
            self.insert(key, value);
        }
        Ok(())
    }
}

impl<K, V, S> Serializable for HashMap<K, V, S>
where
    K: Construct + Clone + Eq + Hash,
    V: Construct,
    S: BuildHasher + Default + 'static,
{
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;

    fn save(&mut self, ar: &mut OutputArchive<'_>, _version: u32) -> Result<()> {
        let mut size = self.len() as u64;
        ar.size_tag(&mut size)?;
        for (key, value) in self.iter_mut() {
            save_map_entry(ar, &mut key.clone(), value)?;
        }
        Ok(())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        let mut size = 0u64;
        ar.size_tag(&mut size)?;
        self.clear();
        self.reserve(ar.safe_to_reserve(size, size_of::<(K, V)>()));
        for _ in 0..size {
            let (key, value) = load_map_entry::<K, V>(ar)?;
            self.insert(key, value);
        }
        Ok(())
    }
}
