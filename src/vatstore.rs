// CLASSIFICATION: COMMUNITY
// Filename: vatstore.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-26

//! Key-value access for the vat, namespaced by owner.
//!
//! All user keys travel under `uvs.`; virtual-object state travels under
//! `vom.`. The kernel only ever sees prefixed keys, so a vat cannot read
//! another subsystem's records by constructing clever names.

use crate::dispatch::VatCtx;
use crate::syscall::VatSyscall;

/// Prefix for user-visible store keys.
pub const USER_PREFIX: &str = "uvs.";
/// Prefix for virtual-object state keys.
pub(crate) const VOM_PREFIX: &str = "vom.";

/// Backing storage for virtual-object state: kernel vatstore when
/// provisioned, an in-memory table otherwise.
pub(crate) enum StateStore {
    /// In-memory fallback; state dies with the process, which is all a
    /// non-provisioned vat is promised.
    Memory(std::collections::HashMap<String, String>),
    /// Kernel vatstore syscalls.
    Kernel,
}

impl StateStore {
    pub(crate) fn new(enable_vatstore: bool) -> Self {
        if enable_vatstore {
            StateStore::Kernel
        } else {
            StateStore::Memory(std::collections::HashMap::new())
        }
    }

    pub(crate) fn get(&mut self, syscall: &mut dyn VatSyscall, key: &str) -> Option<String> {
        match self {
            StateStore::Memory(map) => map.get(key).cloned(),
            StateStore::Kernel => syscall.vatstore_get(key),
        }
    }

    pub(crate) fn set(&mut self, syscall: &mut dyn VatSyscall, key: &str, value: &str) {
        match self {
            StateStore::Memory(map) => {
                map.insert(key.to_owned(), value.to_owned());
            }
            StateStore::Kernel => syscall.vatstore_set(key, value),
        }
    }

    pub(crate) fn delete(&mut self, syscall: &mut dyn VatSyscall, key: &str) {
        match self {
            StateStore::Memory(map) => {
                map.remove(key);
            }
            StateStore::Kernel => syscall.vatstore_delete(key),
        }
    }
}

/// The user-facing store handle, handed out through vat powers when the
/// vatstore is provisioned.
#[derive(Clone)]
pub struct VatStore {
    ctx: VatCtx,
}

impl VatStore {
    pub(crate) fn new(ctx: VatCtx) -> Self {
        Self { ctx }
    }

    /// Read a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let namespaced = format!("{USER_PREFIX}{key}");
        self.ctx
            .with_core(|core| core.syscall.vatstore_get(&namespaced))
    }

    /// Write a key.
    pub fn set(&self, key: &str, value: &str) {
        let namespaced = format!("{USER_PREFIX}{key}");
        self.ctx
            .with_core(|core| core.syscall.vatstore_set(&namespaced, value));
    }

    /// Delete a key.
    pub fn delete(&self, key: &str) {
        let namespaced = format!("{USER_PREFIX}{key}");
        self.ctx
            .with_core(|core| core.syscall.vatstore_delete(&namespaced));
    }
}
