//! Packed 32-bit handles for everything that lives in a sketch.
//!
//! Groups, requests and constraints are plain indices. Entities and params
//! belong to a request, equations belong to a constraint: the owner index sits
//! in the high 16 bits and the local sub-index in the low 16 bits, so getting
//! from a child back to its owner is a shift and never a lookup.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod idlist;
pub use idlist::{IdList, Keyed};

#[cfg(test)]
mod tests_handles;

/// Largest value either half of a packed handle can hold.
pub const MAX_INDEX: u32 = 0xFFFF;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    #[error("sub-index {index} does not fit in a 16-bit handle field")]
    SubIndexOverflow { index: u32 },

    #[error("owner index {index} does not fit in a 16-bit handle field")]
    OwnerOverflow { index: u32 },
}

/// Packs an owner index and a local sub-index into one handle value.
pub fn pack(owner: u32, sub: u32) -> Result<u32, HandleError> {
    if owner > MAX_INDEX {
        return Err(HandleError::OwnerOverflow { index: owner });
    }
    if sub > MAX_INDEX {
        return Err(HandleError::SubIndexOverflow { index: sub });
    }
    Ok((owner << 16) | sub)
}

/// Splits a packed handle value into `(owner, sub)`.
pub fn unpack(v: u32) -> (u32, u32) {
    (v >> 16, v & MAX_INDEX)
}

const fn packed(owner: u32, sub: u32) -> u32 {
    (owner << 16) | sub
}

fn checked_index(index: u32) -> Result<u32, HandleError> {
    if index > MAX_INDEX {
        Err(HandleError::OwnerOverflow { index })
    } else {
        Ok(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HGroup(pub u32);

impl HGroup {
    /// Holds the three reference planes. Always present, solved first.
    pub const REFERENCES: HGroup = HGroup(1);

    pub fn from_index(index: u32) -> Result<Self, HandleError> {
        checked_index(index).map(Self)
    }

    pub fn index(self) -> u32 {
        self.0 & MAX_INDEX
    }
}

impl fmt::Display for HGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{:03x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HRequest(pub u32);

impl HRequest {
    pub const REFERENCE_XY: HRequest = HRequest(1);
    pub const REFERENCE_YZ: HRequest = HRequest(2);
    pub const REFERENCE_ZX: HRequest = HRequest(3);

    /// First index handed out to user requests.
    pub const FIRST_USER_INDEX: u32 = 4;

    pub fn from_index(index: u32) -> Result<Self, HandleError> {
        checked_index(index).map(Self)
    }

    pub fn index(self) -> u32 {
        self.0 & MAX_INDEX
    }

    pub fn entity(self, i: u32) -> Result<HEntity, HandleError> {
        pack(self.0, i).map(HEntity)
    }

    pub fn param(self, i: u32) -> Result<HParam, HandleError> {
        pack(self.0, i).map(HParam)
    }

    pub fn is_from_references(self) -> bool {
        self == Self::REFERENCE_XY || self == Self::REFERENCE_YZ || self == Self::REFERENCE_ZX
    }
}

impl fmt::Display for HRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{:03x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HConstraint(pub u32);

impl HConstraint {
    pub fn from_index(index: u32) -> Result<Self, HandleError> {
        checked_index(index).map(Self)
    }

    pub fn index(self) -> u32 {
        self.0 & MAX_INDEX
    }

    pub fn equation(self, i: u32) -> Result<HEquation, HandleError> {
        pack(self.0, i).map(HEquation)
    }
}

impl fmt::Display for HConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{:03x}", self.0)
    }
}

macro_rules! derived_handle {
    ($(#[$meta:meta])* $name:ident, $owner:ident, $owner_fn:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn $owner_fn(self) -> $owner {
                $owner(unpack(self.0).0)
            }

            /// Sub-index within the owner.
            pub fn index(self) -> u32 {
                unpack(self.0).1
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let (owner, sub) = unpack(self.0);
                write!(f, concat!($prefix, "{:03x}.{:03x}"), owner, sub)
            }
        }
    };
}

derived_handle!(
    /// An entity generated by a request.
    HEntity, HRequest, request, "e"
);
derived_handle!(
    /// A scalar parameter generated by a request.
    HParam, HRequest, request, "p"
);
derived_handle!(
    /// One scalar equation compiled from a constraint.
    HEquation, HConstraint, constraint, "q"
);

impl HEntity {
    /// The 2D coordinate system entity of each reference plane.
    pub const REFERENCE_XY_CSYS: HEntity = HEntity(packed(1, 0));
    pub const REFERENCE_YZ_CSYS: HEntity = HEntity(packed(2, 0));
    pub const REFERENCE_ZX_CSYS: HEntity = HEntity(packed(3, 0));

    /// The shared origin point of the reference planes (owned by the XY request).
    pub const REFERENCE_ORIGIN: HEntity = HEntity(packed(1, 1));
}
