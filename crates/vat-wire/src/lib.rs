// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide vat wire types shared between kernel-side and vat-side code.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! Wire-facing data model for the hivevat runtime: vat-visible reference
//! identifiers (vrefs), capability data payloads, kernel deliveries, and the
//! syscall vocabulary. This crate carries no runtime state; it exists so the
//! kernel shim, the liveslots runtime, and test harnesses agree on one
//! vocabulary.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod types;
mod vref;

pub use types::{CapData, Delivery, Resolution, SyscallOp};
pub use vref::{sorted_unique, Allocator, Vref, VrefParseError, VrefType};
