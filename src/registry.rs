// CLASSIFICATION: COMMUNITY
// Filename: registry.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-07-24

//! The slot registry: the bidirectional mapping between in-vat values and
//! kernel-visible vrefs.
//!
//! Strength discipline, by table:
//!
//! | table                | holds                         | strength |
//! |----------------------|-------------------------------|----------|
//! | `val_to_slot`        | value identity → vref         | weak     |
//! | `slot_to_val`        | vref → value                  | weak     |
//! | `exported_remotables`| pinned exports                | strong   |
//! | `pending_promises`   | exposed unresolved promises   | strong   |
//! | `imported_resolvers` | kernel-decided promise settle | strong   |
//! | `disavowed`          | revoked import identities     | keys only|
//!
//! `val_to_slot` is keyed by pointer identity. Rust reuses addresses, so a
//! hit is only trusted after verifying the paired `slot_to_val` weak entry
//! still upgrades to the same allocation; stale entries are dropped lazily.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use vat_wire::Vref;

use crate::promise::{PromiseHandle, ResolverHandle};
use crate::value::{SlotValue, ValKey, WeakSlotValue};

/// Errors raised while translating values to slots and back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    /// A vat-allocated vref arrived that this vat never issued or has
    /// already retired.
    #[error("unknown export {0}")]
    UnknownExport(Vref),
    /// User code touched a disavowed presence.
    #[error("reference has been disavowed")]
    DisavowedReference,
}

/// A promise known to the registry.
pub(crate) struct PromiseRecord {
    /// Strong pin for the exposed promise.
    pub handle: PromiseHandle,
    /// True when this vat decides the promise.
    pub vat_is_decider: bool,
}

/// The registry tables plus the vat's allocation counters.
pub(crate) struct SlotRegistry {
    val_to_slot: HashMap<ValKey, Vref>,
    slot_to_val: HashMap<Vref, WeakSlotValue>,
    exported_remotables: HashMap<Vref, SlotValue>,
    pending_promises: HashMap<Vref, PromiseRecord>,
    imported_resolvers: HashMap<Vref, ResolverHandle>,
    disavowed: HashSet<ValKey>,
    subscribe_queue: Vec<Vref>,
    subscribed: HashSet<Vref>,
    next_export_id: u64,
    next_promise_id: u64,
}

impl SlotRegistry {
    pub(crate) fn new() -> Self {
        Self {
            val_to_slot: HashMap::new(),
            slot_to_val: HashMap::new(),
            exported_remotables: HashMap::new(),
            pending_promises: HashMap::new(),
            imported_resolvers: HashMap::new(),
            disavowed: HashSet::new(),
            subscribe_queue: Vec::new(),
            subscribed: HashSet::new(),
            // The root export claims id 0 at boot; promise ids leave room
            // for the kernel's bootstrap allocations.
            next_export_id: 1,
            next_promise_id: 5,
        }
    }

    /// Allocate the next ordinary export vref (`o+NN`).
    pub(crate) fn allocate_export(&mut self) -> Vref {
        let id = self.next_export_id;
        self.next_export_id += 1;
        Vref::object_export(id)
    }

    /// Allocate the next vat promise vref (`p+NN`).
    pub(crate) fn allocate_promise(&mut self) -> Vref {
        let id = self.next_promise_id;
        self.next_promise_id += 1;
        Vref::promise_vat(id)
    }

    /// Register both directions of a value↔vref binding.
    pub(crate) fn register(&mut self, vref: Vref, value: &SlotValue) {
        self.val_to_slot.insert(value.key(), vref);
        self.slot_to_val.insert(vref, value.downgrade());
    }

    /// The vref bound to a value, verified against address reuse.
    pub(crate) fn slot_for_val(&mut self, value: &SlotValue) -> Option<Vref> {
        let key = value.key();
        let vref = *self.val_to_slot.get(&key)?;
        let live = self
            .slot_to_val
            .get(&vref)
            .and_then(WeakSlotValue::upgrade)
            .map(|v| v.key() == key)
            .unwrap_or(false);
        if live {
            Some(vref)
        } else {
            self.val_to_slot.remove(&key);
            None
        }
    }

    /// The live value bound to a vref, if any.
    pub(crate) fn val_for_slot(&self, vref: &Vref) -> Option<SlotValue> {
        self.slot_to_val.get(vref).and_then(WeakSlotValue::upgrade)
    }

    /// True when `slot_to_val` has an entry whose weak reference is live.
    pub(crate) fn has_live(&self, vref: &Vref) -> bool {
        self.val_for_slot(vref).is_some()
    }

    /// True when `slot_to_val` has any entry for the vref, live or dead.
    pub(crate) fn has_entry(&self, vref: &Vref) -> bool {
        self.slot_to_val.contains_key(vref)
    }

    /// Pin an exported remotable strongly until the kernel drops it.
    pub(crate) fn pin_export(&mut self, vref: Vref, value: SlotValue) {
        self.exported_remotables.insert(vref, value);
    }

    /// Release an export pin; returns whether one existed.
    pub(crate) fn unpin_export(&mut self, vref: &Vref) -> bool {
        self.exported_remotables.remove(vref).is_some()
    }

    /// True while the kernel may still reach this export.
    pub(crate) fn is_export_pinned(&self, vref: &Vref) -> bool {
        self.exported_remotables.contains_key(vref)
    }

    /// Record a promise binding: tables, strong pin, decider flag, and the
    /// resolver when the kernel decides it.
    pub(crate) fn register_promise(
        &mut self,
        vref: Vref,
        handle: &PromiseHandle,
        vat_is_decider: bool,
        resolver: Option<ResolverHandle>,
    ) {
        let value = SlotValue::Promise(handle.clone());
        self.register(vref, &value);
        self.pending_promises.insert(
            vref,
            PromiseRecord {
                handle: handle.clone(),
                vat_is_decider,
            },
        );
        if let Some(resolver) = resolver {
            self.imported_resolvers.insert(vref, resolver);
        }
    }

    /// The handle of a vat-decided promise, if the vref is one.
    pub(crate) fn vat_decided_promise(&self, vref: &Vref) -> Option<PromiseHandle> {
        self.pending_promises
            .get(vref)
            .filter(|record| record.vat_is_decider)
            .map(|record| record.handle.clone())
    }

    /// True when the vref is a registered promise this vat exposed.
    pub(crate) fn is_registered_promise(&self, vref: &Vref) -> bool {
        self.pending_promises.contains_key(vref)
    }

    /// The resolver for a kernel-decided promise.
    pub(crate) fn imported_resolver(&self, vref: &Vref) -> Option<ResolverHandle> {
        self.imported_resolvers.get(vref).cloned()
    }

    /// Drop every trace of a settled promise vref.
    pub(crate) fn retire_promise(&mut self, vref: &Vref) {
        if let Some(record) = self.pending_promises.remove(vref) {
            self.val_to_slot.remove(&record.handle.key());
        }
        self.imported_resolvers.remove(vref);
        if let Some(value) = self.val_for_slot(vref) {
            self.val_to_slot.remove(&value.key());
        }
        self.slot_to_val.remove(vref);
    }

    /// Remove the tables for a collected (weak-dead) vref.
    pub(crate) fn forget_collected(&mut self, vref: &Vref) {
        self.slot_to_val.remove(vref);
        // The val_to_slot twin is keyed by a dead pointer; it gets dropped
        // lazily by the reuse check in slot_for_val.
    }

    /// Remove both table entries for a live vref (retire-exports path).
    pub(crate) fn forget_slot(&mut self, vref: &Vref) {
        if let Some(value) = self.val_for_slot(vref) {
            self.val_to_slot.remove(&value.key());
        }
        self.slot_to_val.remove(vref);
    }

    /// Mark a presence identity as disavowed.
    pub(crate) fn disavow(&mut self, key: ValKey) {
        self.disavowed.insert(key);
    }

    /// True when the identity was disavowed.
    pub(crate) fn is_disavowed(&self, key: &ValKey) -> bool {
        self.disavowed.contains(key)
    }

    /// Queue a subscribe for end-of-crank flushing.
    pub(crate) fn queue_subscribe(&mut self, vref: Vref) {
        self.subscribe_queue.push(vref);
    }

    /// Drain the subscribe queue: vrefs never subscribed before, in queue
    /// order, skipping any retired in the meantime.
    pub(crate) fn drain_subscribes(&mut self) -> Vec<Vref> {
        let queued = std::mem::take(&mut self.subscribe_queue);
        let mut out = Vec::new();
        for vref in queued {
            if self.subscribed.contains(&vref) {
                continue;
            }
            if !self.slot_to_val.contains_key(&vref) {
                continue;
            }
            self.subscribed.insert(vref);
            out.push(vref);
        }
        out
    }
}

impl crate::dispatch::VatCtx {
    /// Translate an in-vat value to its vref, allocating on first export.
    ///
    /// Slot values are pass-by-capability by construction, so no shape
    /// assertion is needed beyond the type. Promises are pinned and
    /// followed so their eventual settlement reaches the kernel; object
    /// exports get a finalizer watch so post-drop collection is observable.
    pub(crate) fn convert_val_to_slot(&self, value: &SlotValue) -> Result<Vref, SlotError> {
        if self.with_core(|core| core.registry.is_disavowed(&value.key())) {
            return Err(SlotError::DisavowedReference);
        }
        if let Some(vref) = self.with_core(|core| core.registry.slot_for_val(value)) {
            return Ok(vref);
        }
        match value {
            SlotValue::Promise(handle) => {
                let vref = self.with_core(|core| {
                    let vref = core.registry.allocate_promise();
                    core.registry.register_promise(vref, handle, true, None);
                    vref
                });
                handle.when(self, move |ctx, settled| {
                    let (rejected, value) = match settled {
                        Ok(value) => (false, value),
                        Err(reason) => (true, reason),
                    };
                    crate::dispatch::resolve_to_kernel(ctx, vref, rejected, value);
                });
                Ok(vref)
            }
            SlotValue::Remotable(_) => {
                let vref = self.with_core(|core| {
                    let vref = core.registry.allocate_export();
                    core.registry.register(vref, value);
                    vref
                });
                self.env.finalizers.register(vref, value.downgrade());
                Ok(vref)
            }
            SlotValue::Representative(rep) => {
                // Representatives carry the vref assigned at instantiation;
                // a miss just means the weak entry lapsed.
                let vref = rep.vref();
                self.with_core(|core| core.registry.register(vref, value));
                self.env.finalizers.register(vref, value.downgrade());
                self.env.dead.remove(&vref);
                Ok(vref)
            }
            SlotValue::Presence(presence) => {
                // Presences are always registered at import; a live value
                // with no entry means the tables lapsed. Self-heal.
                let vref = presence.vref();
                log::error!("internal: live presence {vref} missing from tables; re-registering");
                self.with_core(|core| core.registry.register(vref, value));
                self.env.finalizers.register(vref, value.downgrade());
                self.env.dead.remove(&vref);
                Ok(vref)
            }
            SlotValue::Device(node) => {
                let vref = node.vref();
                self.with_core(|core| core.registry.register(vref, value));
                Ok(vref)
            }
        }
    }

    /// Translate an incoming vref to an in-vat value, materializing
    /// presences, imported promises, device nodes, and virtual
    /// representatives as needed.
    pub(crate) fn convert_slot_to_val(
        &self,
        vref: Vref,
        iface: Option<&str>,
    ) -> Result<SlotValue, SlotError> {
        if let Some(existing) = self.with_core(|core| core.registry.val_for_slot(&vref)) {
            if vref.is_virtual() {
                // A throwaway representative keeps reanimation invisible:
                // the cached-hit path does the same work as the miss path.
                let _ = self.with_core(|core| core.make_throwaway_representative(&vref));
            }
            return Ok(existing);
        }
        use vat_wire::VrefType;
        let value = match (vref.ty(), vref.is_vat_allocated()) {
            (VrefType::Object, true) if vref.is_virtual() => {
                let rep = self.with_core(|core| core.reanimate_virtual(vref))?;
                SlotValue::Representative(rep)
            }
            (VrefType::Object, true) => return Err(SlotError::UnknownExport(vref)),
            (VrefType::Object, false) => {
                SlotValue::Presence(crate::value::Presence::new(vref, iface.map(str::to_owned)))
            }
            (VrefType::Promise, false) => {
                let (handle, resolver) = crate::promise::promise_kit();
                self.with_core(|core| {
                    core.registry.register_promise(vref, &handle, false, Some(resolver));
                    core.registry.queue_subscribe(vref);
                });
                self.env.dead.remove(&vref);
                return Ok(SlotValue::Promise(handle));
            }
            (VrefType::Promise, true) => return Err(SlotError::UnknownExport(vref)),
            (VrefType::Device, _) => {
                let node = crate::value::DeviceNode::new(vref);
                let value = SlotValue::Device(node);
                self.with_core(|core| core.registry.register(vref, &value));
                return Ok(value);
            }
        };
        // Object paths: register, watch for finalization, and clear any
        // dead-set record from an earlier incarnation.
        self.with_core(|core| core.registry.register(vref, &value));
        self.env.finalizers.register(vref, value.downgrade());
        self.env.dead.remove(&vref);
        Ok(value)
    }

    /// Strongly pin an export so the kernel can rely on it. Virtual
    /// exports are tracked by the virtual-object store instead.
    pub(crate) fn retain_exported_remotable(&self, vref: Vref) {
        if !(vref.is_object() && vref.is_vat_allocated()) {
            return;
        }
        self.with_core(|core| {
            if vref.is_virtual() {
                core.vom.set_export_reachable(vref);
                return;
            }
            if core.registry.is_export_pinned(&vref) {
                return;
            }
            match core.registry.val_for_slot(&vref) {
                Some(value @ SlotValue::Remotable(_)) => core.registry.pin_export(vref, value),
                Some(other) => {
                    log::error!("internal: export {vref} backed by non-remotable {other:?}");
                }
                None => {
                    log::error!("internal: missing remotable for export {vref}");
                }
            }
        });
    }
}
