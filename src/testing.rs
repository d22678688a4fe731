// CLASSIFICATION: COMMUNITY
// Filename: testing.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-27

//! Test doubles for the kernel side of the syscall boundary.
//!
//! `RecordingSyscall` captures every syscall in order as [`SyscallOp`]
//! records, answers device calls through a scripted handler, and backs the
//! vatstore with an in-memory map. Scenario tests hold a [`SyscallLog`]
//! clone and assert on the observed sequence.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use vat_wire::{CapData, Resolution, SyscallOp, Vref};

use crate::syscall::{SyscallError, VatSyscall};

/// Shared view over the recorded syscall sequence.
#[derive(Clone, Default)]
pub struct SyscallLog {
    ops: Rc<RefCell<Vec<SyscallOp>>>,
}

impl SyscallLog {
    /// Snapshot of all recorded syscalls, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<SyscallOp> {
        self.ops.borrow().clone()
    }

    /// Drain the recorded syscalls.
    #[must_use]
    pub fn take(&self) -> Vec<SyscallOp> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    /// Number of recorded syscalls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.borrow().len()
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.borrow().is_empty()
    }

    /// The recorded sends, in order.
    #[must_use]
    pub fn sends(&self) -> Vec<SyscallOp> {
        self.filtered(|op| matches!(op, SyscallOp::Send { .. }))
    }

    /// The recorded resolve batches, in order.
    #[must_use]
    pub fn resolves(&self) -> Vec<Vec<Resolution>> {
        self.ops
            .borrow()
            .iter()
            .filter_map(|op| match op {
                SyscallOp::Resolve { resolutions } => Some(resolutions.clone()),
                _ => None,
            })
            .collect()
    }

    /// The recorded GC syscalls (drops and retires), in order.
    #[must_use]
    pub fn gc_ops(&self) -> Vec<SyscallOp> {
        self.filtered(|op| {
            matches!(
                op,
                SyscallOp::DropImports { .. }
                    | SyscallOp::RetireImports { .. }
                    | SyscallOp::RetireExports { .. }
            )
        })
    }

    fn filtered(&self, keep: impl Fn(&SyscallOp) -> bool) -> Vec<SyscallOp> {
        self.ops.borrow().iter().filter(|op| keep(op)).cloned().collect()
    }

    fn push(&self, op: SyscallOp) {
        self.ops.borrow_mut().push(op);
    }
}

/// Scripted device responder.
pub type DeviceHandler = Box<dyn FnMut(Vref, &str, &CapData) -> Result<CapData, SyscallError>>;

/// A kernel double that records syscalls and answers the synchronous ones.
pub struct RecordingSyscall {
    log: SyscallLog,
    store: HashMap<String, String>,
    device: Option<DeviceHandler>,
}

impl RecordingSyscall {
    /// Create a recorder with no device handler; device calls answer with
    /// empty capdata.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: SyscallLog::default(),
            store: HashMap::new(),
            device: None,
        }
    }

    /// Create a recorder with a scripted device responder.
    #[must_use]
    pub fn with_device(handler: DeviceHandler) -> Self {
        Self {
            device: Some(handler),
            ..Self::new()
        }
    }

    /// A shared handle onto the recorded sequence.
    #[must_use]
    pub fn log(&self) -> SyscallLog {
        self.log.clone()
    }
}

impl Default for RecordingSyscall {
    fn default() -> Self {
        Self::new()
    }
}

impl VatSyscall for RecordingSyscall {
    fn send(&mut self, target: Vref, method: &str, args: CapData, result: Option<Vref>) {
        self.log.push(SyscallOp::Send {
            target,
            method: method.to_owned(),
            args,
            result,
        });
    }

    fn resolve(&mut self, resolutions: Vec<Resolution>) {
        self.log.push(SyscallOp::Resolve { resolutions });
    }

    fn subscribe(&mut self, vpid: Vref) {
        self.log.push(SyscallOp::Subscribe { vpid });
    }

    fn drop_imports(&mut self, vrefs: Vec<Vref>) {
        self.log.push(SyscallOp::DropImports { vrefs });
    }

    fn retire_imports(&mut self, vrefs: Vec<Vref>) {
        self.log.push(SyscallOp::RetireImports { vrefs });
    }

    fn retire_exports(&mut self, vrefs: Vec<Vref>) {
        self.log.push(SyscallOp::RetireExports { vrefs });
    }

    fn call_now(
        &mut self,
        target: Vref,
        method: &str,
        args: CapData,
    ) -> Result<CapData, SyscallError> {
        self.log.push(SyscallOp::CallNow {
            target,
            method: method.to_owned(),
            args: args.clone(),
        });
        match self.device.as_mut() {
            Some(handler) => handler(target, method, &args),
            None => Ok(CapData::plain("null")),
        }
    }

    fn exit(&mut self, failure: bool, data: CapData) {
        self.log.push(SyscallOp::Exit { failure, data });
    }

    fn vatstore_get(&mut self, key: &str) -> Option<String> {
        self.log.push(SyscallOp::VatstoreGet {
            key: key.to_owned(),
        });
        self.store.get(key).cloned()
    }

    fn vatstore_set(&mut self, key: &str, value: &str) {
        self.log.push(SyscallOp::VatstoreSet {
            key: key.to_owned(),
            value: value.to_owned(),
        });
        self.store.insert(key.to_owned(), value.to_owned());
    }

    fn vatstore_delete(&mut self, key: &str) {
        self.log.push(SyscallOp::VatstoreDelete {
            key: key.to_owned(),
        });
        self.store.remove(key);
    }
}
