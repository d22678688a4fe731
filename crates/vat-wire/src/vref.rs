// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the vat-visible reference identifier and its text encoding.
// Author: Lukas Bower

//! Vat-visible reference identifiers.
//!
//! A vref names a kernel-mediated entity from a single vat's point of view.
//! It carries three coordinates (type, allocator, and kind) plus a numeric
//! id, and has a stable canonical text form:
//!
//! | form    | meaning                             |
//! |---------|-------------------------------------|
//! | `o+NN`  | object exported by this vat         |
//! | `o+vNN` | virtual object exported by this vat |
//! | `o-NN`  | object imported from the kernel     |
//! | `p+NN`  | promise allocated by this vat       |
//! | `p-NN`  | promise allocated by the kernel     |
//! | `d-NN`  | device node held by the kernel      |
//!
//! The coordinates of a vref never change over its lifetime. Ordering is
//! lexicographic over the canonical form, which is what the kernel expects
//! of GC syscall lists.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Entity type named by a vref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VrefType {
    /// A pass-by-capability object (remotable, presence, or virtual object).
    Object,
    /// A promise.
    Promise,
    /// A device node.
    Device,
}

/// Which side of the vat boundary allocated the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allocator {
    /// Allocated by this vat.
    Vat,
    /// Allocated by the kernel.
    Kernel,
}

/// A vat-visible reference identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vref {
    ty: VrefType,
    allocator: Allocator,
    virt: bool,
    id: u64,
}

/// Errors produced while parsing a vref from its text form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VrefParseError {
    /// The input was empty.
    #[error("empty vref")]
    Empty,
    /// The type character was not one of `o`, `p`, `d`.
    #[error("unknown vref type character '{0}'")]
    BadType(char),
    /// The allocator character was not `+` or `-`.
    #[error("unknown vref allocator character '{0}'")]
    BadAllocator(char),
    /// The id portion was missing or not a decimal u64.
    #[error("bad vref id in '{0}'")]
    BadId(String),
    /// A virtual marker appeared on a vref that cannot be virtual.
    #[error("virtual marker only valid on vat-allocated objects: '{0}'")]
    BadVirtual(String),
}

impl Vref {
    /// The root object's vref: object, vat-allocated, ordinary, id 0.
    pub const ROOT: Vref = Vref {
        ty: VrefType::Object,
        allocator: Allocator::Vat,
        virt: false,
        id: 0,
    };

    /// An ordinary object exported by this vat (`o+NN`).
    #[must_use]
    pub fn object_export(id: u64) -> Self {
        Self {
            ty: VrefType::Object,
            allocator: Allocator::Vat,
            virt: false,
            id,
        }
    }

    /// A virtual object exported by this vat (`o+vNN`).
    #[must_use]
    pub fn virtual_export(id: u64) -> Self {
        Self {
            ty: VrefType::Object,
            allocator: Allocator::Vat,
            virt: true,
            id,
        }
    }

    /// An object imported from the kernel (`o-NN`).
    #[must_use]
    pub fn object_import(id: u64) -> Self {
        Self {
            ty: VrefType::Object,
            allocator: Allocator::Kernel,
            virt: false,
            id,
        }
    }

    /// A promise allocated by this vat (`p+NN`).
    #[must_use]
    pub fn promise_vat(id: u64) -> Self {
        Self {
            ty: VrefType::Promise,
            allocator: Allocator::Vat,
            virt: false,
            id,
        }
    }

    /// A promise allocated by the kernel (`p-NN`).
    #[must_use]
    pub fn promise_kernel(id: u64) -> Self {
        Self {
            ty: VrefType::Promise,
            allocator: Allocator::Kernel,
            virt: false,
            id,
        }
    }

    /// A kernel-held device node (`d-NN`).
    #[must_use]
    pub fn device(id: u64) -> Self {
        Self {
            ty: VrefType::Device,
            allocator: Allocator::Kernel,
            virt: false,
            id,
        }
    }

    /// Entity type coordinate.
    #[must_use]
    pub fn ty(&self) -> VrefType {
        self.ty
    }

    /// Allocator coordinate.
    #[must_use]
    pub fn allocator(&self) -> Allocator {
        self.allocator
    }

    /// True for virtual objects (vat-allocated, paged state).
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.virt
    }

    /// Numeric id within the (type, allocator, kind) namespace.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True for object-typed vrefs.
    #[must_use]
    pub fn is_object(&self) -> bool {
        self.ty == VrefType::Object
    }

    /// True for promise-typed vrefs.
    #[must_use]
    pub fn is_promise(&self) -> bool {
        self.ty == VrefType::Promise
    }

    /// True for device-typed vrefs.
    #[must_use]
    pub fn is_device(&self) -> bool {
        self.ty == VrefType::Device
    }

    /// True if this vat allocated the identifier.
    #[must_use]
    pub fn is_vat_allocated(&self) -> bool {
        self.allocator == Allocator::Vat
    }

    /// Canonical text form.
    #[must_use]
    pub fn canonical(&self) -> String {
        use alloc::format;
        let ty = match self.ty {
            VrefType::Object => 'o',
            VrefType::Promise => 'p',
            VrefType::Device => 'd',
        };
        let alloc_ch = match self.allocator {
            Allocator::Vat => '+',
            Allocator::Kernel => '-',
        };
        if self.virt {
            format!("{ty}{alloc_ch}v{}", self.id)
        } else {
            format!("{ty}{alloc_ch}{}", self.id)
        }
    }
}

impl fmt::Display for Vref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Vref {
    type Err = VrefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let ty = match chars.next() {
            None => return Err(VrefParseError::Empty),
            Some('o') => VrefType::Object,
            Some('p') => VrefType::Promise,
            Some('d') => VrefType::Device,
            Some(c) => return Err(VrefParseError::BadType(c)),
        };
        let allocator = match chars.next() {
            Some('+') => Allocator::Vat,
            Some('-') => Allocator::Kernel,
            Some(c) => return Err(VrefParseError::BadAllocator(c)),
            None => return Err(VrefParseError::BadId(String::from(s))),
        };
        let rest = chars.as_str();
        let (virt, digits) = match rest.strip_prefix('v') {
            Some(d) => (true, d),
            None => (false, rest),
        };
        if virt && (ty != VrefType::Object || allocator != Allocator::Vat) {
            return Err(VrefParseError::BadVirtual(String::from(s)));
        }
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VrefParseError::BadId(String::from(s)));
        }
        let id: u64 = digits
            .parse()
            .map_err(|_| VrefParseError::BadId(String::from(s)))?;
        Ok(Self {
            ty,
            allocator,
            virt,
            id,
        })
    }
}

// Ordering is over the canonical text form: GC syscall lists are specified
// to arrive at the kernel lexicographically sorted.
impl Ord for Vref {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl PartialOrd for Vref {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Vref {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Vref {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Sort a vref list lexicographically and drop duplicates, the shape every
/// GC syscall requires.
#[must_use]
pub fn sorted_unique(mut vrefs: Vec<Vref>) -> Vec<Vref> {
    vrefs.sort();
    vrefs.dedup();
    vrefs
}
