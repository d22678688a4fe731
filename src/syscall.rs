// CLASSIFICATION: COMMUNITY
// Filename: syscall.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! The downward interface: everything a vat may ask of its kernel.

use thiserror::Error;
use vat_wire::{CapData, Resolution, Vref};

/// Errors surfaced by the synchronous syscall paths.
#[derive(Debug, Error)]
pub enum SyscallError {
    /// A device invocation was refused or failed on the kernel side.
    #[error("device call failed: {0}")]
    DeviceFailure(String),
    /// The key-value store is not provisioned for this vat.
    #[error("vatstore is not enabled")]
    VatstoreDisabled,
}

/// The kernel as seen from inside one vat.
///
/// Message and resolution syscalls are fire-and-forget: the kernel queues
/// them and any downstream failure arrives later as a rejection or a
/// delivery. Only the synchronous paths (`call_now`, the vatstore) can fail
/// in place.
pub trait VatSyscall {
    /// Queue a message to `target`, with an optional vat-allocated result
    /// promise.
    fn send(&mut self, target: Vref, method: &str, args: CapData, result: Option<Vref>);

    /// Settle promises this vat decides.
    fn resolve(&mut self, resolutions: Vec<Resolution>);

    /// Request notification when the kernel settles `vpid`.
    fn subscribe(&mut self, vpid: Vref);

    /// Report imports this vat no longer reaches. Sorted, duplicate-free.
    fn drop_imports(&mut self, vrefs: Vec<Vref>);

    /// Report imports this vat can no longer recognize. Sorted,
    /// duplicate-free.
    fn retire_imports(&mut self, vrefs: Vec<Vref>);

    /// Report exports that were dropped and have been collected. Sorted,
    /// duplicate-free.
    fn retire_exports(&mut self, vrefs: Vec<Vref>);

    /// Synchronous device invocation.
    fn call_now(&mut self, target: Vref, method: &str, args: CapData)
        -> Result<CapData, SyscallError>;

    /// Terminate the vat, with failure when `failure` is set.
    fn exit(&mut self, failure: bool, data: CapData);

    /// Read a key from the vat's key-value store.
    fn vatstore_get(&mut self, key: &str) -> Option<String>;

    /// Write a key to the vat's key-value store.
    fn vatstore_set(&mut self, key: &str, value: &str);

    /// Delete a key from the vat's key-value store.
    fn vatstore_delete(&mut self, key: &str);
}
