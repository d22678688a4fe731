// CLASSIFICATION: COMMUNITY
// Filename: gc.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-27

//! The distributed-GC drain.
//!
//! After a crank quiesces, the drain forces finalization, classifies every
//! vref the finalizers observed dead, and reports to the kernel:
//!
//! | dead vref                      | report                              |
//! |--------------------------------|-------------------------------------|
//! | virtual export                 | none; refcount check queued         |
//! | ordinary export (remotable)    | `retireExports`                     |
//! | import (presence)              | `dropImports` unless state-reachable|
//! | import, also unrecognizable    | `retireImports` too                 |
//!
//! Lists are emitted sorted and duplicate-free, one syscall each, after all
//! user-initiated syscalls of the crank. The drain iterates while the
//! virtual-object store keeps generating work; there is no iteration bound.

use log::debug;
use vat_wire::sorted_unique;

use crate::dispatch::{run_turns, VatCtx};

/// Force a collection-and-finalization pass: run pending turns, sweep the
/// finalization book, and repeat until no finalizer fires.
pub(crate) fn gc_and_finalize(ctx: &VatCtx) {
    run_turns(ctx);
    loop {
        let fired = ctx.env.finalizers.sweep(&ctx.env.dead);
        run_turns(ctx);
        if fired == 0 {
            break;
        }
    }
}

/// Run the GC drain to a fixed point.
pub(crate) fn run_drain(ctx: &VatCtx) {
    if ctx.is_terminated() {
        return;
    }
    let mut iteration = 0usize;
    loop {
        iteration += 1;
        if iteration > 1 {
            debug!("gc drain iteration {iteration}");
        }
        gc_and_finalize(ctx);

        let dead = ctx.env.dead.take_all();
        let pending_virtual = ctx.with_core(|core| core.vom.has_pending_work());
        if dead.is_empty() && !pending_virtual {
            break;
        }

        let mut drop_imports = Vec::new();
        let mut retire_imports = Vec::new();
        let mut retire_exports = Vec::new();

        for vref in dead {
            // Re-introduced since finalization: the stale observation is
            // simply dropped.
            if ctx.with_core(|core| core.registry.has_live(&vref)) {
                continue;
            }
            if !vref.is_object() {
                debug!("ignoring non-object {vref} in dead set");
                continue;
            }
            if vref.is_vat_allocated() {
                if vref.is_virtual() {
                    ctx.with_core(|core| core.vom.note_possibly_dead(vref));
                } else {
                    ctx.with_core(|core| core.registry.forget_collected(&vref));
                    retire_exports.push(vref);
                }
            } else {
                let reachable = ctx.with_core(|core| {
                    core.registry.forget_collected(&vref);
                    core.vom.is_import_reachable(&vref)
                });
                if !reachable {
                    drop_imports.push(vref);
                    let recognizable =
                        ctx.with_core(|core| core.vom.is_import_recognizable(&vref));
                    if !recognizable {
                        retire_imports.push(vref);
                    }
                }
            }
        }

        let more = ctx.with_core(|core| {
            let dead = ctx.env.dead.clone();
            core.process_virtual_deaths(&dead)
        });

        ctx.with_core(|core| {
            if !drop_imports.is_empty() {
                let list = sorted_unique(drop_imports);
                core.report.dropped_imports += list.len();
                core.syscall.drop_imports(list);
            }
            if !retire_imports.is_empty() {
                let list = sorted_unique(retire_imports);
                core.report.retired_imports += list.len();
                core.syscall.retire_imports(list);
            }
            if !retire_exports.is_empty() {
                let list = sorted_unique(retire_exports);
                core.report.retired_exports += list.len();
                core.syscall.retire_exports(list);
            }
        });

        let done = !more
            && ctx.env.dead.is_empty()
            && ctx.env.turns.is_empty()
            && !ctx.with_core(|core| core.vom.has_pending_work());
        if done {
            break;
        }
    }
}
