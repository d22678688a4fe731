// CLASSIFICATION: COMMUNITY
// Filename: gctools.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! Weak-reference and finalization plumbing.
//!
//! The registry holds values weakly; observing their collection requires a
//! finalization hook. Host Rust has no between-turns finalizer callbacks,
//! so the book simulates them: each registration pairs a vref with a weak
//! handle, and a sweep between turns fires the "finalizer" for every
//! registration whose referent is gone, inserting the vref into the dead
//! set. Re-introduction replaces the registration with a fresh weak handle,
//! which is exactly the stale-callback tolerance the lifecycle requires.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::rc::Rc;

use vat_wire::Vref;

use crate::value::WeakSlotValue;

/// The set of vrefs whose values have been observed finalized.
///
/// Shared between the finalization sweep and the GC drain; inserts are
/// additive and commutative, so sweep order never matters.
#[derive(Clone, Default)]
pub struct DeadSet {
    inner: Rc<RefCell<BTreeSet<Vref>>>,
}

impl DeadSet {
    /// Create an empty dead set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finalized vref.
    pub fn insert(&self, vref: Vref) {
        self.inner.borrow_mut().insert(vref);
    }

    /// Remove a vref, returning whether it was present. Used on
    /// re-introduction.
    pub fn remove(&self, vref: &Vref) -> bool {
        self.inner.borrow_mut().remove(vref)
    }

    /// True when the vref is currently recorded dead.
    #[must_use]
    pub fn contains(&self, vref: &Vref) -> bool {
        self.inner.borrow().contains(vref)
    }

    /// True when nothing is recorded dead.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Drain the whole set in sorted order.
    #[must_use]
    pub fn take_all(&self) -> Vec<Vref> {
        let mut set = self.inner.borrow_mut();
        let drained: Vec<Vref> = set.iter().copied().collect();
        set.clear();
        drained
    }
}

/// Finalization registry: vref → weak handle watch.
///
/// `sweep` plays the role of the engine finalizer pass: dead registrations
/// are removed and their vrefs land in the dead set.
#[derive(Default)]
pub struct FinalizationBook {
    watches: RefCell<HashMap<Vref, WeakSlotValue>>,
}

impl FinalizationBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the watch for a vref. Replacing discards any
    /// stale watch from an earlier incarnation of the same vref.
    pub fn register(&self, vref: Vref, watch: WeakSlotValue) {
        self.watches.borrow_mut().insert(vref, watch);
    }

    /// Remove the watch for a vref, if any.
    pub fn unregister(&self, vref: &Vref) {
        self.watches.borrow_mut().remove(vref);
    }

    /// True when a watch exists for the vref.
    #[must_use]
    pub fn is_watched(&self, vref: &Vref) -> bool {
        self.watches.borrow().contains_key(vref)
    }

    /// Fire finalizers for every dead watch; returns how many fired.
    pub fn sweep(&self, dead: &DeadSet) -> usize {
        let mut fired = 0;
        self.watches.borrow_mut().retain(|vref, watch| {
            if watch.is_gone() {
                log::debug!("finalized {vref}");
                dead.insert(*vref);
                fired += 1;
                false
            } else {
                true
            }
        });
        fired
    }
}
