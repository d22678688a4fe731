// CLASSIFICATION: COMMUNITY
// Filename: powers.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-27

//! The powers handed to user code when its root object is built: device
//! proxies, vat exit, optional disavow, the optional key-value store,
//! virtual-object kinds, and virtual-aware weak collections.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;
use vat_wire::{sorted_unique, Vref};

use crate::dispatch::VatCtx;
use crate::factory::{normalize_method, SendError};
use crate::marshal;
use crate::value::{CapValue, MethodName, SlotValue, ValKey, WeakSlotValue};
use crate::vatstore::VatStore;
use crate::vobj::{KindBehavior, KindHandle};

/// The user-facing capability bundle. Cheap to clone; behaviors capture it.
#[derive(Clone)]
pub struct VatPowers {
    ctx: VatCtx,
}

impl VatPowers {
    pub(crate) fn new(ctx: VatCtx) -> Self {
        Self { ctx }
    }

    /// The vat context, for sends and scheduling.
    #[must_use]
    pub fn ctx(&self) -> &VatCtx {
        &self.ctx
    }

    /// Wrap a device node in a synchronous-call proxy. Anything that is not
    /// a plain device node is refused.
    pub fn d(&self, node: &CapValue) -> Result<DeviceProxy, SendError> {
        match node.as_slot() {
            Some(SlotValue::Device(device)) => Ok(DeviceProxy {
                ctx: self.ctx.clone(),
                vref: device.vref(),
            }),
            _ => Err(SendError::DeviceOfDevice),
        }
    }

    /// Terminate the vat successfully with a completion value.
    pub fn exit_vat(&self, completion: &CapValue) {
        self.exit(false, completion);
    }

    /// Terminate the vat with a failure reason.
    pub fn exit_vat_with_failure(&self, reason: &CapValue) {
        self.exit(true, reason);
    }

    fn exit(&self, failure: bool, value: &CapValue) {
        let data = match marshal::serialize(&self.ctx, value) {
            Ok(data) => data,
            Err(err) => {
                log::error!("exit data failed to serialize: {err}");
                vat_wire::CapData::plain("\"vat exit\"")
            }
        };
        self.ctx.with_core(|core| {
            if !core.terminated {
                core.syscall.exit(failure, data);
                core.terminated = true;
            }
        });
    }

    /// Sever an imported presence: drop it from the tables, report
    /// `dropImports` immediately, and make any later use a fatal error.
    /// Available only when the vat was built with disavow enabled.
    pub fn disavow(&self, presence: &CapValue) -> Result<(), SendError> {
        if !self.ctx.with_core(|core| core.options.enable_disavow) {
            return Err(SendError::DisavowDisabled);
        }
        let Some(slot @ SlotValue::Presence(p)) = presence.as_slot() else {
            return Err(SendError::DisavowTarget);
        };
        let vref = p.vref();
        self.ctx.with_core(|core| {
            core.registry.disavow(slot.key());
            core.registry.forget_slot(&vref);
            core.report.dropped_imports += 1;
            core.syscall.drop_imports(sorted_unique(vec![vref]));
        });
        self.ctx.env.finalizers.unregister(&vref);
        self.ctx.env.dead.remove(&vref);
        debug!("disavowed {vref}");
        Ok(())
    }

    /// The namespaced key-value store, when provisioned.
    #[must_use]
    pub fn store(&self) -> Option<VatStore> {
        if self.ctx.with_core(|core| core.options.enable_vatstore) {
            Some(VatStore::new(self.ctx.clone()))
        } else {
            None
        }
    }

    /// Register a virtual-object kind.
    pub fn define_kind(&self, name: &str, behavior: Rc<dyn KindBehavior>) -> KindHandle {
        self.ctx
            .with_core(|core| core.vom.register_kind(name, behavior))
    }

    /// A weak collection that can key on presences and virtual
    /// representatives; keys register as recognizers so import retirement
    /// stays precise.
    #[must_use]
    pub fn make_weak_set(&self) -> VatWeakSet {
        VatWeakSet {
            ctx: self.ctx.clone(),
            entries: RefCell::new(HashMap::new()),
            tracked: RefCell::new(Vec::new()),
        }
    }
}

/// Synchronous-call proxy for one device node.
pub struct DeviceProxy {
    ctx: VatCtx,
    vref: Vref,
}

impl DeviceProxy {
    /// The device vref this proxy targets.
    #[must_use]
    pub fn vref(&self) -> Vref {
        self.vref
    }

    /// Invoke a device method synchronously. Promises are forbidden in the
    /// arguments; the call happens in place via `syscall.callNow`.
    pub fn call(
        &self,
        method: impl Into<MethodName>,
        args: Vec<CapValue>,
    ) -> Result<CapValue, SendError> {
        let method = normalize_method(method.into())?;
        let args_value = CapValue::List(args);
        if args_value.contains_promise() {
            return Err(SendError::PromiseInDeviceCall);
        }
        let argdata = match marshal::serialize(&self.ctx, &args_value) {
            Ok(data) => data,
            Err(err) => return Err(SendError::Marshal(err.to_string())),
        };
        debug_assert!(
            argdata.slots.iter().all(|slot| !slot.is_promise()),
            "promise slot survived the device-argument check"
        );
        let result = self
            .ctx
            .with_core(|core| core.syscall.call_now(self.vref, &method, argdata));
        match result {
            Ok(data) => {
                marshal::deserialize(&self.ctx, &data).map_err(|err| SendError::Marshal(err.to_string()))
            }
            Err(err) => Err(SendError::Device(err.to_string())),
        }
    }
}

/// A weak set keyed by capability identity. Presence and representative
/// keys are tracked as recognizers in the virtual-object store.
pub struct VatWeakSet {
    ctx: VatCtx,
    entries: RefCell<HashMap<ValKey, WeakSlotValue>>,
    tracked: RefCell<Vec<Vref>>,
}

impl VatWeakSet {
    fn recognizable_vref(slot: &SlotValue) -> Option<Vref> {
        match slot {
            SlotValue::Presence(p) => Some(p.vref()),
            SlotValue::Representative(r) => Some(r.vref()),
            _ => None,
        }
    }

    /// Add a capability key. Plain data is refused; returns whether the key
    /// was newly added.
    pub fn add(&self, value: &CapValue) -> Result<bool, SendError> {
        let slot = value.as_slot().ok_or(SendError::NotACapability)?;
        let key = slot.key();
        let mut entries = self.entries.borrow_mut();
        let fresh = match entries.get(&key) {
            Some(weak) if !weak.is_gone() => false,
            _ => {
                entries.insert(key, slot.downgrade());
                true
            }
        };
        if fresh {
            if let Some(vref) = Self::recognizable_vref(slot) {
                self.ctx.with_core(|core| core.vom.add_recognizer(vref));
                self.tracked.borrow_mut().push(vref);
            }
        }
        Ok(fresh)
    }

    /// True when the key is present and its referent is still alive.
    #[must_use]
    pub fn has(&self, value: &CapValue) -> bool {
        let Some(slot) = value.as_slot() else {
            return false;
        };
        self.entries
            .borrow()
            .get(&slot.key())
            .map(|weak| !weak.is_gone())
            .unwrap_or(false)
    }

    /// Remove a key; returns whether it was present.
    pub fn delete(&self, value: &CapValue) -> bool {
        let Some(slot) = value.as_slot() else {
            return false;
        };
        let removed = self.entries.borrow_mut().remove(&slot.key()).is_some();
        if removed {
            if let Some(vref) = Self::recognizable_vref(slot) {
                self.ctx
                    .with_core(|core| core.vom.remove_recognizer(&vref));
                let mut tracked = self.tracked.borrow_mut();
                if let Some(pos) = tracked.iter().position(|v| *v == vref) {
                    tracked.swap_remove(pos);
                }
            }
        }
        removed
    }
}

impl Drop for VatWeakSet {
    fn drop(&mut self) {
        let tracked = std::mem::take(&mut *self.tracked.borrow_mut());
        self.ctx.with_core(|core| {
            for vref in tracked {
                core.vom.remove_recognizer(&vref);
            }
        });
    }
}
