//! Serialization strategy declaration and validation.
//!
//! Every [`Serializable`] type declares, through [`Serializable::STRATEGY`], which routine the
//! engine should call:
//!
//! | Declaration | Routine(s) |
//! |-------------|------------|
//! | [`Strategies::SERIALIZE`] | one symmetric `serialize` for both directions |
//! | [`Strategies::SAVE_LOAD`] | separate `save` and `load` |
//! | [`Strategies::minimal`] | `save_minimal` returns a scalar or string surrogate, `load_minimal` accepts it |
//! | [`Strategies::EMPTY`] | nothing: the type carries no data |
//!
//! Each of the first three has a `*_VERSIONED` twin which makes the engine record the type's
//! class version in the stream and pass it to the routine.
//!
//! A declaration must resolve to exactly one strategy. Zero or several is an error raised the
//! first time the type reaches an archive, or earlier through [`validate`].

use crate::codec::MinimalKind;
use crate::error::{ArchiveError, Result};
use crate::serializable::Serializable;
use std::any::type_name;

/// A set of declared strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategies {
    bits: u8,
    minimal: Option<MinimalKind>,
}

impl Strategies {
    const SERIALIZE_BIT: u8 = 1 << 0;
    const SERIALIZE_VERSIONED_BIT: u8 = 1 << 1;
    const SAVE_LOAD_BIT: u8 = 1 << 2;
    const SAVE_LOAD_VERSIONED_BIT: u8 = 1 << 3;
    const MINIMAL_BIT: u8 = 1 << 4;
    const MINIMAL_VERSIONED_BIT: u8 = 1 << 5;
    const EMPTY_BIT: u8 = 1 << 6;

    const NAMES: [(u8, &'static str); 7] = [
        (Self::SERIALIZE_BIT, "serialize"),
        (Self::SERIALIZE_VERSIONED_BIT, "versioned serialize"),
        (Self::SAVE_LOAD_BIT, "save/load"),
        (Self::SAVE_LOAD_VERSIONED_BIT, "versioned save/load"),
        (Self::MINIMAL_BIT, "minimal"),
        (Self::MINIMAL_VERSIONED_BIT, "versioned minimal"),
        (Self::EMPTY_BIT, "empty"),
    ];

    /// No strategy declared.
    pub const NONE: Self = Self::from_bits(0);
    /// One symmetric routine.
    pub const SERIALIZE: Self = Self::from_bits(Self::SERIALIZE_BIT);
    /// One symmetric routine, with class version.
    pub const SERIALIZE_VERSIONED: Self = Self::from_bits(Self::SERIALIZE_VERSIONED_BIT);
    /// Separate save and load routines.
    pub const SAVE_LOAD: Self = Self::from_bits(Self::SAVE_LOAD_BIT);
    /// Separate save and load routines, with class version.
    pub const SAVE_LOAD_VERSIONED: Self = Self::from_bits(Self::SAVE_LOAD_VERSIONED_BIT);
    /// A type without data; nothing but its (tree format) node is written.
    pub const EMPTY: Self = Self::from_bits(Self::EMPTY_BIT);

    const fn from_bits(bits: u8) -> Self {
        Self { bits, minimal: None }
    }

    /// A minimal surrogate of the given kind.
    pub const fn minimal(kind: MinimalKind) -> Self {
        Self { bits: Self::MINIMAL_BIT, minimal: Some(kind) }
    }

    /// A minimal surrogate of the given kind, with class version.
    pub const fn minimal_versioned(kind: MinimalKind) -> Self {
        Self { bits: Self::MINIMAL_VERSIONED_BIT, minimal: Some(kind) }
    }

    /// The union of two declarations.
    pub const fn with(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
            minimal: match self.minimal {
                Some(_) => self.minimal,
                None => other.minimal,
            },
        }
    }

    /// Returns true if nothing was declared.
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Resolves the declaration of `type_name` to a single strategy.
    pub fn resolve(self, type_name: &'static str) -> Result<Strategy> {
        match self.bits.count_ones() {
            0 => return Err(ArchiveError::MissingStrategy(type_name)),
            1 => {}
            _ => {
                let declared = Self::NAMES
                    .iter()
                    .filter(|(bit, _)| self.bits & bit != 0)
                    .map(|(_, name)| *name)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ArchiveError::AmbiguousStrategy { type_name, declared });
            }
        }

        let minimal = || self.minimal.ok_or(ArchiveError::MissingStrategy(type_name));
        let (kind, versioned) = match self.bits {
            Self::SERIALIZE_BIT => (StrategyKind::Serialize, false),
            Self::SERIALIZE_VERSIONED_BIT => (StrategyKind::Serialize, true),
            Self::SAVE_LOAD_BIT => (StrategyKind::SaveLoad, false),
            Self::SAVE_LOAD_VERSIONED_BIT => (StrategyKind::SaveLoad, true),
            Self::MINIMAL_BIT => (StrategyKind::Minimal(minimal()?), false),
            Self::MINIMAL_VERSIONED_BIT => (StrategyKind::Minimal(minimal()?), true),
            _ => (StrategyKind::Empty, false),
        };
        Ok(Strategy { kind, versioned })
    }
}

/// Which routine the engine calls for a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// [`Serializable::serialize`].
    Serialize,
    /// [`Serializable::save`] / [`Serializable::load`].
    SaveLoad,
    /// [`Serializable::save_minimal`] / [`Serializable::load_minimal`] with this surrogate.
    Minimal(MinimalKind),
    /// No routine.
    Empty,
}

/// A validated strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    /// The routine to call.
    pub kind: StrategyKind,
    /// Whether the class version travels with the value.
    pub versioned: bool,
}

impl Strategy {
    /// Unversioned minimal values are written in place of their owner, without a node of their
    /// own. A versioned one needs a node to hold its class version next to the value.
    pub fn opens_node(&self) -> bool {
        !matches!(self.kind, StrategyKind::Minimal(_)) || self.versioned
    }
}

/// Validates the declaration of `T`.
///
/// Call this during startup to surface declaration mistakes before any data is written.
pub fn validate<T: Serializable>() -> Result<Strategy> {
    T::STRATEGY.resolve(type_name::<T>()).inspect_err(|err| {
        tracing::debug!(type_name = type_name::<T>(), %err, "strategy validation failed");
    })
}
