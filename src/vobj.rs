// CLASSIFICATION: COMMUNITY
// Filename: vobj.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-27

//! Virtual objects: vat exports whose canonical state is paged out.
//!
//! A virtual object is a `o+vNN` export whose state lives in the state
//! store as a serialized record. In-vat handles are transient
//! representatives; collecting one loses nothing. A virtual object stays
//! alive while the kernel reaches it (export-reachable), other virtual
//! state references it (refcount), or a representative is in memory.
//! Imports referenced from virtual state are held reachable by refcount
//! even with no in-memory presence; weak-collection keys are tracked as
//! recognizers so retirement can be reported precisely.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use log::{debug, error};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vat_wire::{CapData, Vref};

use crate::dispatch::{VatCore, VatCtx};
use crate::gctools::DeadSet;
use crate::marshal::{self, MarshalError};
use crate::registry::SlotError;
use crate::value::{CapValue, MethodOutcome, SlotValue};
use crate::vatstore::VOM_PREFIX;

/// Errors raised by virtual-object state access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No state record exists for the vref.
    #[error("no virtual state for {0}")]
    Missing(Vref),
    /// The state record failed to parse.
    #[error("corrupt virtual state for {0}: {1}")]
    Corrupt(Vref, String),
    /// State serialization failed.
    #[error("virtual state marshal failure: {0}")]
    Marshal(String),
}

/// Identifier of a registered virtual-object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KindId(u64);

/// Behavior seam for virtual objects: like `ObjectBehavior` but handed the
/// representative so state can be loaded and saved.
pub trait KindBehavior {
    /// Handle a method invocation on a representative of this kind.
    fn invoke(
        &self,
        rep: &Representative,
        method: &str,
        args: Vec<CapValue>,
        ctx: &VatCtx,
    ) -> MethodOutcome;
}

/// A transient in-vat handle for a virtual object.
pub struct Representative {
    vref: Vref,
    kind: KindId,
    iface: String,
}

impl Representative {
    fn new(vref: Vref, kind: KindId, iface: String) -> Rc<Self> {
        Rc::new(Self { vref, kind, iface })
    }

    /// The virtual export vref.
    #[must_use]
    pub fn vref(&self) -> Vref {
        self.vref
    }

    /// The kind this representative belongs to.
    #[must_use]
    pub fn kind(&self) -> KindId {
        self.kind
    }

    /// Interface hint (the kind name).
    #[must_use]
    pub fn iface(&self) -> &str {
        &self.iface
    }
}

impl fmt::Debug for Representative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Representative({}, {})", self.vref, self.iface)
    }
}

/// Handle returned by kind registration; instantiates virtual objects.
#[derive(Clone)]
pub struct KindHandle {
    id: KindId,
    name: String,
}

impl KindHandle {
    /// Create a new instance of this kind with the given initial state.
    pub fn new_instance(&self, ctx: &VatCtx, state: &CapValue) -> Result<CapValue, StoreError> {
        let data = marshal::serialize(ctx, state).map_err(marshal_store_err)?;
        let vref = ctx.with_core(|core| {
            let vref = core.vom.allocate_instance();
            for slot in &data.slots {
                core.vom.increment_ref(*slot);
            }
            core.store_virtual_record(vref, self.id, &data);
            vref
        });
        let rep = Representative::new(vref, self.id, self.name.clone());
        let value = SlotValue::Representative(rep);
        ctx.with_core(|core| core.registry.register(vref, &value));
        ctx.env.finalizers.register(vref, value.downgrade());
        Ok(CapValue::Slot(value))
    }
}

fn marshal_store_err(err: MarshalError) -> StoreError {
    match err {
        MarshalError::Slot(SlotError::DisavowedReference) => {
            StoreError::Marshal("disavowed reference in virtual state".into())
        }
        other => StoreError::Marshal(other.to_string()),
    }
}

struct KindInfo {
    name: String,
    behavior: Rc<dyn KindBehavior>,
}

/// On-store shape of one virtual object's state.
#[derive(Serialize, Deserialize)]
struct VirtualRecord {
    kind: u64,
    body: String,
    slots: Vec<Vref>,
}

/// Reachability bookkeeping for the virtual-object subsystem.
pub(crate) struct VirtualObjectManager {
    kinds: HashMap<u64, KindInfo>,
    next_kind: u64,
    next_instance: u64,
    /// References from virtual state to a vref.
    refcounts: HashMap<Vref, u64>,
    /// Virtual exports the kernel still reaches.
    export_reachable: HashSet<Vref>,
    /// Weak-collection keys per vref.
    recognizers: HashMap<Vref, u64>,
    /// Virtual exports awaiting a deadness check.
    possibly_dead: Vec<Vref>,
    pub(crate) store: crate::vatstore::StateStore,
}

impl VirtualObjectManager {
    pub(crate) fn new(enable_vatstore: bool) -> Self {
        Self {
            kinds: HashMap::new(),
            next_kind: 1,
            next_instance: 1,
            refcounts: HashMap::new(),
            export_reachable: HashSet::new(),
            recognizers: HashMap::new(),
            possibly_dead: Vec::new(),
            store: crate::vatstore::StateStore::new(enable_vatstore),
        }
    }

    pub(crate) fn register_kind(
        &mut self,
        name: &str,
        behavior: Rc<dyn KindBehavior>,
    ) -> KindHandle {
        let id = self.next_kind;
        self.next_kind += 1;
        self.kinds.insert(
            id,
            KindInfo {
                name: name.to_owned(),
                behavior,
            },
        );
        KindHandle {
            id: KindId(id),
            name: name.to_owned(),
        }
    }

    pub(crate) fn kind_behavior(&self, kind: KindId) -> Option<Rc<dyn KindBehavior>> {
        self.kinds.get(&kind.0).map(|info| Rc::clone(&info.behavior))
    }

    fn kind_name(&self, kind: KindId) -> Option<&str> {
        self.kinds.get(&kind.0).map(|info| info.name.as_str())
    }

    pub(crate) fn allocate_instance(&mut self) -> Vref {
        let id = self.next_instance;
        self.next_instance += 1;
        Vref::virtual_export(id)
    }

    pub(crate) fn increment_ref(&mut self, vref: Vref) {
        *self.refcounts.entry(vref).or_insert(0) += 1;
    }

    /// Decrement; returns true when the count just hit zero.
    pub(crate) fn decrement_ref(&mut self, vref: &Vref) -> bool {
        match self.refcounts.get_mut(vref) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.refcounts.remove(vref);
                true
            }
            None => {
                error!("internal: refcount underflow for {vref}");
                false
            }
        }
    }

    pub(crate) fn set_export_reachable(&mut self, vref: Vref) {
        self.export_reachable.insert(vref);
    }

    pub(crate) fn clear_export_reachable(&mut self, vref: &Vref) {
        self.export_reachable.remove(vref);
    }

    /// True while the kernel still reaches this virtual export.
    pub(crate) fn is_export_reachable(&self, vref: &Vref) -> bool {
        self.export_reachable.contains(vref)
    }

    pub(crate) fn add_recognizer(&mut self, vref: Vref) {
        *self.recognizers.entry(vref).or_insert(0) += 1;
    }

    pub(crate) fn remove_recognizer(&mut self, vref: &Vref) {
        match self.recognizers.get_mut(vref) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.recognizers.remove(vref);
            }
            None => {}
        }
    }

    /// Forget all recognizers for a retired import.
    pub(crate) fn retire_recognizers(&mut self, vref: &Vref) {
        self.recognizers.remove(vref);
    }

    /// True while virtual state holds a reference to the vref.
    pub(crate) fn is_import_reachable(&self, vref: &Vref) -> bool {
        self.refcounts.get(vref).copied().unwrap_or(0) > 0
    }

    /// True while any weak collection keys on the vref.
    pub(crate) fn is_import_recognizable(&self, vref: &Vref) -> bool {
        self.recognizers.get(vref).copied().unwrap_or(0) > 0
    }

    pub(crate) fn note_possibly_dead(&mut self, vref: Vref) {
        self.possibly_dead.push(vref);
    }

    pub(crate) fn has_pending_work(&self) -> bool {
        !self.possibly_dead.is_empty()
    }
}

impl VatCore {
    fn vom_key(vref: &Vref) -> String {
        format!("{VOM_PREFIX}{vref}")
    }

    pub(crate) fn store_virtual_record(&mut self, vref: Vref, kind: KindId, data: &CapData) {
        let record = VirtualRecord {
            kind: kind.0,
            body: data.body.clone(),
            slots: data.slots.clone(),
        };
        let text = serde_json::to_string(&record).expect("virtual record serializes");
        self.vom
            .store
            .set(self.syscall.as_mut(), &Self::vom_key(&vref), &text);
    }

    pub(crate) fn load_virtual_record(&mut self, vref: &Vref) -> Option<(KindId, CapData)> {
        let text = self.vom.store.get(self.syscall.as_mut(), &Self::vom_key(vref))?;
        match serde_json::from_str::<VirtualRecord>(&text) {
            Ok(record) => Some((KindId(record.kind), CapData::new(record.body, record.slots))),
            Err(err) => {
                error!("corrupt virtual state for {vref}: {err}");
                None
            }
        }
    }

    pub(crate) fn delete_virtual_record(&mut self, vref: &Vref) {
        self.vom
            .store
            .delete(self.syscall.as_mut(), &Self::vom_key(vref));
    }

    /// Materialize a fresh representative from stored state.
    pub(crate) fn reanimate_virtual(&mut self, vref: Vref) -> Result<Rc<Representative>, SlotError> {
        let (kind, _data) = self
            .load_virtual_record(&vref)
            .ok_or(SlotError::UnknownExport(vref))?;
        let name = self
            .vom
            .kind_name(kind)
            .ok_or(SlotError::UnknownExport(vref))?
            .to_owned();
        Ok(Representative::new(vref, kind, name))
    }

    /// A representative that is created and immediately discarded; used so
    /// cache hits and reanimation are indistinguishable to user code.
    pub(crate) fn make_throwaway_representative(&mut self, vref: &Vref) -> Option<Rc<Representative>> {
        let (kind, _data) = self.load_virtual_record(vref)?;
        let name = self.vom.kind_name(kind)?.to_owned();
        Some(Representative::new(*vref, kind, name))
    }

    /// Release virtual-state references; newly-freed imports with no live
    /// presence land in the dead set, newly-freed virtual objects queue a
    /// deadness check. Returns true when more drain work was generated.
    pub(crate) fn release_virtual_refs(&mut self, slots: &[Vref], dead: &DeadSet) -> bool {
        let mut more = false;
        for slot in slots {
            if !self.vom.decrement_ref(slot) {
                continue;
            }
            if slot.is_virtual() {
                self.vom.note_possibly_dead(*slot);
                more = true;
            } else if slot.is_object()
                && !slot.is_vat_allocated()
                && !self.registry.has_live(slot)
            {
                dead.insert(*slot);
                more = true;
            }
        }
        more
    }

    /// Process queued virtual deadness checks: delete state for virtual
    /// objects with no representative, no export pin, and no references,
    /// cascading releases. Returns true when another drain pass is needed.
    pub(crate) fn process_virtual_deaths(&mut self, dead: &DeadSet) -> bool {
        let mut more = false;
        while !self.vom.possibly_dead.is_empty() {
            let queue = std::mem::take(&mut self.vom.possibly_dead);
            for vref in queue {
                if self.registry.has_live(&vref) {
                    continue;
                }
                if self.vom.is_export_reachable(&vref) {
                    continue;
                }
                if self.vom.is_import_reachable(&vref) {
                    continue;
                }
                let Some((_kind, data)) = self.load_virtual_record(&vref) else {
                    continue;
                };
                debug!("deleting state of dead virtual object {vref}");
                self.delete_virtual_record(&vref);
                self.registry.forget_collected(&vref);
                more |= self.release_virtual_refs(&data.slots, dead);
                more = true;
            }
        }
        more
    }
}

impl VatCtx {
    /// Load a representative's current state.
    pub fn load_virtual_state(&self, rep: &Representative) -> Result<CapValue, StoreError> {
        let vref = rep.vref();
        let data = self
            .with_core(|core| core.load_virtual_record(&vref))
            .ok_or(StoreError::Missing(vref))?
            .1;
        marshal::deserialize(self, &data).map_err(|err| StoreError::Corrupt(vref, err.to_string()))
    }

    /// Replace a representative's state, adjusting reference counts for
    /// anything the old state released.
    pub fn save_virtual_state(
        &self,
        rep: &Representative,
        state: &CapValue,
    ) -> Result<(), StoreError> {
        let data = marshal::serialize(self, state).map_err(marshal_store_err)?;
        let vref = rep.vref();
        let kind = rep.kind();
        self.with_core(|core| {
            let old_slots = core
                .load_virtual_record(&vref)
                .map(|(_, old)| old.slots)
                .unwrap_or_default();
            for slot in &data.slots {
                core.vom.increment_ref(*slot);
            }
            core.store_virtual_record(vref, kind, &data);
            core.release_virtual_refs(&old_slots, &self.env.dead);
        });
        Ok(())
    }
}
