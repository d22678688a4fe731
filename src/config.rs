// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! Build-time options for a liveslots instance.

/// Options fixed at vat construction; they never change over a vat's
/// lifetime.
#[derive(Debug, Clone, Copy)]
pub struct LiveSlotsOptions {
    /// Hand user code a `disavow` power for imported presences.
    pub enable_disavow: bool,
    /// Back the user store and virtual-object state with the kernel
    /// vatstore syscalls instead of in-memory tables.
    pub enable_vatstore: bool,
}

impl Default for LiveSlotsOptions {
    fn default() -> Self {
        Self {
            enable_disavow: false,
            enable_vatstore: false,
        }
    }
}
