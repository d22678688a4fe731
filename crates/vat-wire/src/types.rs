// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define capdata, delivery, and syscall records shared across components.
// Author: Lukas Bower

//! Capability data, kernel delivery records, and the syscall vocabulary.

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::vref::Vref;

/// A serialized value paired with the vrefs it references.
///
/// Every capability or promise occurrence inside `body` refers to exactly one
/// entry of `slots` by index; maintaining that invariant is the marshaller's
/// job, not this type's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapData {
    /// Serialized body text.
    pub body: String,
    /// Vrefs referenced by the body, in index order.
    pub slots: Vec<Vref>,
}

impl CapData {
    /// Construct capdata from a body and its slot list.
    #[must_use]
    pub fn new(body: impl Into<String>, slots: Vec<Vref>) -> Self {
        Self {
            body: body.into(),
            slots,
        }
    }

    /// Capdata with no slots.
    #[must_use]
    pub fn plain(body: impl Into<String>) -> Self {
        Self::new(body, Vec::new())
    }
}

/// One settled promise inside a resolve batch or notify delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The promise vref being settled.
    pub vpid: Vref,
    /// True when the promise was rejected.
    pub rejected: bool,
    /// The settlement value or rejection reason.
    pub data: CapData,
}

impl Resolution {
    /// Construct a resolution record.
    #[must_use]
    pub fn new(vpid: Vref, rejected: bool, data: CapData) -> Self {
        Self {
            vpid,
            rejected,
            data,
        }
    }
}

/// A delivery record handed downward into a vat's dispatch entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Delivery {
    /// Invoke `method` on the value registered under `target`.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Target vref; must resolve to a registered in-vat value.
        target: Vref,
        /// Method name, already normalized to a string.
        method: String,
        /// Serialized arguments.
        args: CapData,
        /// Optional result promise the vat becomes decider of.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Vref>,
    },
    /// Settle a batch of kernel-decided promises this vat subscribed to.
    Notify {
        /// The settled promises, in kernel order.
        resolutions: Vec<Resolution>,
    },
    /// The kernel no longer reaches these exports; unpin them.
    DropExports {
        /// Vat-allocated object vrefs.
        vrefs: Vec<Vref>,
    },
    /// The kernel will never mention these exports again; forget them.
    RetireExports {
        /// Vat-allocated object vrefs.
        vrefs: Vec<Vref>,
    },
    /// These imports are gone for good; drop any recognizers.
    RetireImports {
        /// Kernel-allocated object vrefs.
        vrefs: Vec<Vref>,
    },
}

/// One syscall issued upward by a vat, as observed by the kernel.
///
/// The runtime speaks through a syscall trait; this record is the common
/// observation format used by recorders and the kernel shim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SyscallOp {
    /// Queue a message to `target`.
    #[serde(rename_all = "camelCase")]
    Send {
        /// Destination vref.
        target: Vref,
        /// Method name.
        method: String,
        /// Serialized arguments.
        args: CapData,
        /// Result promise vref allocated by the sending vat, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Vref>,
    },
    /// Settle promises this vat decides.
    Resolve {
        /// The settled promises, each vpid at most once.
        resolutions: Vec<Resolution>,
    },
    /// Ask to be notified when the kernel settles `vpid`.
    Subscribe {
        /// A kernel-decided promise vref.
        vpid: Vref,
    },
    /// Report imports this vat no longer reaches.
    DropImports {
        /// Sorted, duplicate-free object vrefs.
        vrefs: Vec<Vref>,
    },
    /// Report imports this vat can no longer even recognize.
    RetireImports {
        /// Sorted, duplicate-free object vrefs.
        vrefs: Vec<Vref>,
    },
    /// Report exports that have been dropped and collected.
    RetireExports {
        /// Sorted, duplicate-free object vrefs.
        vrefs: Vec<Vref>,
    },
    /// Synchronous device invocation.
    #[serde(rename_all = "camelCase")]
    CallNow {
        /// Device node vref.
        target: Vref,
        /// Method name.
        method: String,
        /// Serialized arguments; must not contain promise vrefs.
        args: CapData,
    },
    /// Terminate the vat.
    Exit {
        /// True when terminating due to failure.
        failure: bool,
        /// Completion or failure data.
        data: CapData,
    },
    /// Read a key from the vat's key-value store.
    VatstoreGet {
        /// Namespaced key.
        key: String,
    },
    /// Write a key to the vat's key-value store.
    VatstoreSet {
        /// Namespaced key.
        key: String,
        /// Value text.
        value: String,
    },
    /// Delete a key from the vat's key-value store.
    VatstoreDelete {
        /// Namespaced key.
        key: String,
    },
}
