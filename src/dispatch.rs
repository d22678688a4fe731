// CLASSIFICATION: COMMUNITY
// Filename: dispatch.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-07-27

//! The dispatch core: one `LiveSlots` record per vat, one crank per
//! delivery.
//!
//! A crank schedules the user-visible work for a delivery as a turn, runs
//! the turn queue to quiescence, flushes the subscribe batch, and then
//! drives the GC drain to a fixed point. Errors never propagate upward out
//! of `dispatch`: user failures flow back through `syscall.resolve`,
//! protocol-breaking kernel input terminates the vat via `syscall.exit`,
//! and everything else is logged.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, error, warn};
use thiserror::Error;
use vat_wire::{CapData, Delivery, Resolution, Vref};

use crate::config::LiveSlotsOptions;
use crate::gc;
use crate::gctools::{DeadSet, FinalizationBook};
use crate::marshal;
use crate::powers::VatPowers;
use crate::promise::{promise_kit, PromiseHandle, ResolverHandle};
use crate::registry::SlotRegistry;
use crate::syscall::VatSyscall;
use crate::turns::TurnQueue;
use crate::value::{CapValue, MethodOutcome, Remotable, SlotValue};
use crate::vobj::VirtualObjectManager;

/// Per-crank activity summary returned by `dispatch`. The kernel is free to
/// ignore it; hosts use it for metering.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrankReport {
    /// Turns executed, including GC-drain turns.
    pub turns: usize,
    /// `send` syscalls issued.
    pub sends: usize,
    /// `resolve` syscalls issued.
    pub resolves: usize,
    /// `subscribe` syscalls issued.
    pub subscribes: usize,
    /// Vrefs reported via `dropImports`.
    pub dropped_imports: usize,
    /// Vrefs reported via `retireImports`.
    pub retired_imports: usize,
    /// Vrefs reported via `retireExports`.
    pub retired_exports: usize,
}

/// Faults detected while processing a delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryFault {
    /// The result slot of a message was not a promise vref.
    #[error("message result {0} is not a promise vref")]
    ResultNotPromise(Vref),
    /// The kernel reused a result vref that is already registered.
    #[error("message result {0} is already in use")]
    ResultReused(Vref),
    /// Argument or resolution capdata failed to unserialize.
    #[error("malformed capdata: {0}")]
    MalformedCapdata(String),
    /// A GC delivery named a vref of the wrong type or allocator.
    #[error("gc delivery names unexpected vref {0}")]
    BadGcVref(Vref),
    /// A notify arrived for a vpid with no registered resolver.
    #[error("notify for unknown vpid {0}")]
    UnknownNotify(Vref),
}

impl DeliveryFault {
    /// Benign faults are logged and skipped; the rest terminate the vat.
    fn is_benign(&self) -> bool {
        matches!(
            self,
            DeliveryFault::UnknownNotify(_) | DeliveryFault::BadGcVref(_)
        )
    }
}

/// All mutable state of one vat instance; threaded, never global.
pub(crate) struct VatCore {
    pub(crate) options: LiveSlotsOptions,
    pub(crate) syscall: Box<dyn VatSyscall>,
    pub(crate) registry: SlotRegistry,
    pub(crate) vom: VirtualObjectManager,
    pub(crate) report: CrankReport,
    pub(crate) terminated: bool,
}

/// The shared environment a vat runs in: core state, the turn queue, and
/// the GC observation channels.
pub(crate) struct VatEnv {
    pub(crate) core: RefCell<VatCore>,
    pub(crate) turns: TurnQueue,
    pub(crate) finalizers: FinalizationBook,
    pub(crate) dead: DeadSet,
}

/// Handle user code and runtime internals use to reach the vat: schedule
/// turns, translate slots, issue sends. Cheap to clone.
#[derive(Clone)]
pub struct VatCtx {
    pub(crate) env: Rc<VatEnv>,
}

impl VatCtx {
    /// Schedule a turn on the vat's single execution stream.
    pub fn schedule(&self, turn: impl FnOnce(&VatCtx) + 'static) {
        self.env.turns.push(Box::new(turn));
    }

    /// Run a closure against the core state under a short borrow. Never
    /// call back into user code from inside.
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut VatCore) -> R) -> R {
        f(&mut self.env.core.borrow_mut())
    }

    /// True once the vat has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.env.core.borrow().terminated
    }

    /// Terminate the vat with a failure reason.
    pub(crate) fn terminate_failure(&self, reason: &str) {
        error!("vat terminating: {reason}");
        self.with_core(|core| {
            if !core.terminated {
                let body = serde_json::Value::String(reason.to_owned()).to_string();
                core.syscall.exit(true, CapData::plain(body));
                core.terminated = true;
            }
        });
    }

    fn note_fault(&self, fault: &DeliveryFault) {
        if fault.is_benign() {
            warn!("ignoring benign protocol fault: {fault}");
        } else {
            self.terminate_failure(&fault.to_string());
        }
    }
}

/// The per-vat liveslots instance: owns the vat state and exposes the
/// upward dispatch interface.
pub struct LiveSlots {
    env: Rc<VatEnv>,
}

impl LiveSlots {
    /// Build a vat: construct the environment, hand the user's builder its
    /// powers, and register the returned root object as `o+0`.
    pub fn new<F>(options: LiveSlotsOptions, syscall: Box<dyn VatSyscall>, build_root: F) -> Self
    where
        F: FnOnce(&VatCtx, &VatPowers) -> Rc<Remotable>,
    {
        let env = Rc::new(VatEnv {
            core: RefCell::new(VatCore {
                vom: VirtualObjectManager::new(options.enable_vatstore),
                options,
                syscall,
                registry: SlotRegistry::new(),
                report: CrankReport::default(),
                terminated: false,
            }),
            turns: TurnQueue::new(),
            finalizers: FinalizationBook::new(),
            dead: DeadSet::new(),
        });
        let ctx = VatCtx {
            env: Rc::clone(&env),
        };
        let powers = VatPowers::new(ctx.clone());
        let root = build_root(&ctx, &powers);
        let root_value = SlotValue::Remotable(root);
        ctx.with_core(|core| {
            core.registry.register(Vref::ROOT, &root_value);
            core.registry.pin_export(Vref::ROOT, root_value.clone());
        });
        env.finalizers.register(Vref::ROOT, root_value.downgrade());
        Self { env }
    }

    /// A context handle for host-side integration (demo drivers, tests).
    #[must_use]
    pub fn ctx(&self) -> VatCtx {
        VatCtx {
            env: Rc::clone(&self.env),
        }
    }

    /// Process one delivery to quiescence, then run the GC drain. Never
    /// returns an error; see the module docs for the fault policy.
    pub fn dispatch(&mut self, delivery: Delivery) -> CrankReport {
        let ctx = self.ctx();
        if ctx.is_terminated() {
            warn!("dispatch after termination ignored: {delivery:?}");
            return CrankReport::default();
        }
        ctx.with_core(|core| core.report = CrankReport::default());

        match delivery {
            Delivery::Message {
                target,
                method,
                args,
                result,
            } => ctx.schedule(move |ctx| deliver_message(ctx, target, &method, &args, result)),
            Delivery::Notify { resolutions } => {
                ctx.schedule(move |ctx| deliver_notify(ctx, resolutions));
            }
            Delivery::DropExports { vrefs } => {
                ctx.schedule(move |ctx| deliver_drop_exports(ctx, &vrefs));
            }
            Delivery::RetireExports { vrefs } => {
                ctx.schedule(move |ctx| deliver_retire_exports(ctx, &vrefs));
            }
            Delivery::RetireImports { vrefs } => {
                ctx.schedule(move |ctx| deliver_retire_imports(ctx, &vrefs));
            }
        }

        run_turns(&ctx);
        flush_subscribes(&ctx);
        gc::run_drain(&ctx);
        ctx.with_core(|core| std::mem::take(&mut core.report))
    }
}

/// Drain the turn queue; this is the quiescence wait.
pub(crate) fn run_turns(ctx: &VatCtx) {
    while let Some(turn) = ctx.env.turns.pop() {
        ctx.with_core(|core| core.report.turns += 1);
        turn(ctx);
    }
}

/// Emit the end-of-crank subscribe batch: queue order, once per vpid,
/// skipping vpids retired since they were queued.
pub(crate) fn flush_subscribes(ctx: &VatCtx) {
    ctx.with_core(|core| {
        if core.terminated {
            return;
        }
        for vpid in core.registry.drain_subscribes() {
            core.report.subscribes += 1;
            core.syscall.subscribe(vpid);
        }
    });
}

/// Settle a vat-decided promise toward the kernel: build the transitive
/// resolution batch, retire every mentioned vpid, then emit one `resolve`.
pub(crate) fn resolve_to_kernel(ctx: &VatCtx, vpid: Vref, rejected: bool, value: CapValue) {
    if ctx.is_terminated() {
        return;
    }
    let decided = ctx.with_core(|core| core.registry.vat_decided_promise(&vpid).is_some());
    if !decided {
        debug!("skipping resolve for already-retired {vpid}");
        return;
    }
    match marshal::collect_resolution_batch(ctx, vpid, rejected, &value) {
        Ok(batch) => {
            ctx.with_core(|core| {
                for resolution in &batch {
                    core.registry.retire_promise(&resolution.vpid);
                }
                core.report.resolves += 1;
                core.syscall.resolve(batch);
            });
        }
        Err(err) => {
            ctx.terminate_failure(&format!("failed to serialize resolution of {vpid}: {err}"));
        }
    }
}

/// Settle a delivery's result promise locally and toward the kernel.
pub(crate) fn settle_result(
    ctx: &VatCtx,
    vpid: Vref,
    resolver: &ResolverHandle,
    rejected: bool,
    value: CapValue,
) {
    resolver.settle(ctx, rejected, value.clone());
    resolve_to_kernel(ctx, vpid, rejected, value);
}

/// Wire a method outcome into an optional result promise.
pub(crate) fn connect_outcome(
    ctx: &VatCtx,
    result: Option<(Vref, ResolverHandle)>,
    outcome: MethodOutcome,
) {
    match (result, outcome) {
        (Some((vpid, resolver)), MethodOutcome::Fulfill(value)) => {
            settle_result(ctx, vpid, &resolver, false, value);
        }
        (Some((vpid, resolver)), MethodOutcome::Reject(reason)) => {
            settle_result(ctx, vpid, &resolver, true, reason);
        }
        (Some((vpid, resolver)), MethodOutcome::Defer(promise)) => {
            promise.when(ctx, move |ctx, settled| match settled {
                Ok(value) => settle_result(ctx, vpid, &resolver, false, value),
                Err(reason) => settle_result(ctx, vpid, &resolver, true, reason),
            });
        }
        (None, MethodOutcome::Reject(reason)) => {
            debug!("rejection with no result promise: {reason:?}");
        }
        (None, MethodOutcome::Defer(promise)) => {
            promise.when(ctx, |_, settled| {
                if let Err(reason) = settled {
                    debug!("rejection with no result promise: {reason:?}");
                }
            });
        }
        (None, MethodOutcome::Fulfill(_)) => {}
    }
}

fn register_result(
    ctx: &VatCtx,
    vpid: Vref,
) -> Result<(PromiseHandle, ResolverHandle), DeliveryFault> {
    if !vpid.is_promise() {
        return Err(DeliveryFault::ResultNotPromise(vpid));
    }
    let reused = ctx.with_core(|core| {
        core.registry.has_entry(&vpid) || core.registry.is_registered_promise(&vpid)
    });
    if reused {
        return Err(DeliveryFault::ResultReused(vpid));
    }
    let (handle, resolver) = promise_kit();
    ctx.with_core(|core| core.registry.register_promise(vpid, &handle, true, None));
    Ok((handle, resolver))
}

fn deliver_message(ctx: &VatCtx, target: Vref, method: &str, args: &CapData, result: Option<Vref>) {
    let result_pair = match result {
        Some(vpid) => match register_result(ctx, vpid) {
            Ok((_handle, resolver)) => Some((vpid, resolver)),
            Err(fault) => {
                ctx.note_fault(&fault);
                return;
            }
        },
        None => None,
    };

    let args = match marshal::deserialize(ctx, args) {
        Ok(CapValue::List(items)) => items,
        Ok(other) => {
            ctx.note_fault(&DeliveryFault::MalformedCapdata(format!(
                "message args must be a list, got {other:?}"
            )));
            return;
        }
        Err(err) => {
            ctx.note_fault(&DeliveryFault::MalformedCapdata(err.to_string()));
            return;
        }
    };

    // Vat-allocated object targets go through slot translation so a
    // collected virtual representative reanimates from paged state.
    let target_value = if target.is_object() && target.is_vat_allocated() {
        match ctx.convert_slot_to_val(target, None) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("message target {target} did not resolve: {err}");
                None
            }
        }
    } else {
        ctx.with_core(|core| core.registry.val_for_slot(&target))
    };
    let outcome = match target_value {
        Some(SlotValue::Remotable(remotable)) => {
            remotable.behavior().invoke(method, args, ctx)
        }
        Some(SlotValue::Representative(rep)) => {
            let behavior = ctx.with_core(|core| core.vom.kind_behavior(rep.kind()));
            match behavior {
                Some(behavior) => behavior.invoke(&rep, method, args, ctx),
                None => {
                    error!("no kind behavior for representative {}", rep.vref());
                    MethodOutcome::Reject(CapValue::string("internal: unknown virtual kind"))
                }
            }
        }
        Some(other) => {
            warn!("message target {target} is not deliverable: {other:?}");
            MethodOutcome::Reject(CapValue::string(format!("target {target} not deliverable")))
        }
        None => {
            warn!("message for unknown target {target}");
            MethodOutcome::Reject(CapValue::string(format!("no such target {target}")))
        }
    };
    connect_outcome(ctx, result_pair, outcome);
}

fn deliver_notify(ctx: &VatCtx, resolutions: Vec<Resolution>) {
    let mut retired = Vec::new();
    for Resolution {
        vpid,
        rejected,
        data,
    } in resolutions
    {
        let Some(resolver) = ctx.with_core(|core| core.registry.imported_resolver(&vpid)) else {
            ctx.note_fault(&DeliveryFault::UnknownNotify(vpid));
            continue;
        };
        let value = match marshal::deserialize(ctx, &data) {
            Ok(value) => value,
            Err(err) => {
                ctx.note_fault(&DeliveryFault::MalformedCapdata(err.to_string()));
                return;
            }
        };
        resolver.settle(ctx, rejected, value);
        retired.push(vpid);
    }
    ctx.with_core(|core| {
        for vpid in &retired {
            core.registry.retire_promise(vpid);
        }
    });
}

fn deliver_drop_exports(ctx: &VatCtx, vrefs: &[Vref]) {
    for vref in vrefs {
        if !(vref.is_object() && vref.is_vat_allocated()) {
            ctx.note_fault(&DeliveryFault::BadGcVref(*vref));
            continue;
        }
        ctx.with_core(|core| {
            if vref.is_virtual() {
                core.vom.clear_export_reachable(vref);
                if !core.registry.has_live(vref) {
                    core.vom.note_possibly_dead(*vref);
                }
            } else if !core.registry.unpin_export(vref) {
                debug!("dropExports for already-unpinned {vref}");
            }
        });
    }
}

fn deliver_retire_exports(ctx: &VatCtx, vrefs: &[Vref]) {
    for vref in vrefs {
        if !(vref.is_object() && vref.is_vat_allocated()) {
            ctx.note_fault(&DeliveryFault::BadGcVref(*vref));
            continue;
        }
        // Virtual exports pin through the virtual-object store, ordinary
        // ones through the registry; both count as still-pinned here.
        let still_pinned = ctx.with_core(|core| {
            if core.registry.is_export_pinned(vref) || core.vom.is_export_reachable(vref) {
                true
            } else {
                core.registry.forget_slot(vref);
                false
            }
        });
        if still_pinned {
            // Kernel protocol violation; the export never saw dropExports.
            warn!("retireExports for still-pinned {vref}; ignoring");
            continue;
        }
        ctx.env.finalizers.unregister(vref);
        ctx.env.dead.remove(vref);
    }
}

fn deliver_retire_imports(ctx: &VatCtx, vrefs: &[Vref]) {
    for vref in vrefs {
        if !(vref.is_object() && !vref.is_vat_allocated()) {
            ctx.note_fault(&DeliveryFault::BadGcVref(*vref));
            continue;
        }
        ctx.with_core(|core| core.vom.retire_recognizers(vref));
    }
}
