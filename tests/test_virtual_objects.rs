// CLASSIFICATION: COMMUNITY
// Filename: test_virtual_objects.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-29

//! Virtual objects: paged state keeps imports reachable without in-memory
//! presences, representatives reanimate on demand, and deleting dead
//! virtual state cascades import drops.

use std::cell::RefCell;
use std::rc::Rc;

use hivevat::testing::RecordingSyscall;
use hivevat::{
    CapData, CapValue, Delivery, KindBehavior, KindHandle, LiveSlots, LiveSlotsOptions,
    MethodOutcome, ObjectBehavior, Remotable, Representative, SyscallOp, VatCtx, Vref,
};

/// A virtual "cell" kind: holds one value in paged state.
struct CellKind;

impl KindBehavior for CellKind {
    fn invoke(
        &self,
        rep: &Representative,
        method: &str,
        mut args: Vec<CapValue>,
        ctx: &VatCtx,
    ) -> MethodOutcome {
        match method {
            "get" => match ctx.load_virtual_state(rep) {
                Ok(state) => MethodOutcome::Fulfill(state),
                Err(err) => MethodOutcome::Reject(CapValue::string(err.to_string())),
            },
            "set" => {
                let value = args.remove(0);
                match ctx.save_virtual_state(rep, &value) {
                    Ok(()) => MethodOutcome::Fulfill(CapValue::Bool(true)),
                    Err(err) => MethodOutcome::Reject(CapValue::string(err.to_string())),
                }
            }
            other => MethodOutcome::Reject(CapValue::string(format!("no such method {other}"))),
        }
    }
}

struct CellRoot {
    kind: RefCell<Option<KindHandle>>,
}

impl ObjectBehavior for CellRoot {
    fn invoke(&self, method: &str, mut args: Vec<CapValue>, ctx: &VatCtx) -> MethodOutcome {
        match method {
            "makeCell" => {
                let initial = args.remove(0);
                let kind = self.kind.borrow();
                let kind = kind.as_ref().expect("kind defined at build");
                match kind.new_instance(ctx, &initial) {
                    Ok(cell) => MethodOutcome::Fulfill(cell),
                    Err(err) => MethodOutcome::Reject(CapValue::string(err.to_string())),
                }
            }
            other => MethodOutcome::Reject(CapValue::string(format!("no such method {other}"))),
        }
    }
}

fn cell_vat() -> (LiveSlots, hivevat::testing::SyscallLog) {
    let syscall = RecordingSyscall::new();
    let log = syscall.log();
    let vat = LiveSlots::new(LiveSlotsOptions::default(), Box::new(syscall), |_ctx, powers| {
        let kind = powers.define_kind("cell", Rc::new(CellKind));
        Remotable::new(
            "cell root",
            Rc::new(CellRoot {
                kind: RefCell::new(Some(kind)),
            }),
        )
    });
    (vat, log)
}

fn make_cell_with_import(import: Vref, result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: "makeCell".into(),
        args: CapData::new(r#"[{"@slot": 0}]"#, vec![import]),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

#[test]
fn virtual_export_uses_virtual_vref_space() {
    let (mut vat, log) = cell_vat();
    vat.dispatch(make_cell_with_import(Vref::object_import(10), 1));
    let resolves = log.resolves();
    assert_eq!(resolves[0][0].data.slots, vec![Vref::virtual_export(1)]);
}

#[test]
fn paged_state_keeps_an_import_reachable_without_a_presence() {
    let (mut vat, log) = cell_vat();
    vat.dispatch(make_cell_with_import(Vref::object_import(10), 1));
    let _ = log.take();

    // Nothing in the vat holds the presence in memory any more (the cell's
    // state holds it on the page), and no representative is alive either.
    // The import must NOT be dropped: paged state reaches it.
    vat.dispatch(Delivery::Message {
        target: Vref::ROOT,
        method: "noop".into(),
        args: CapData::plain("[]"),
        result: None,
    });
    assert!(
        log.ops()
            .iter()
            .all(|op| !matches!(op, SyscallOp::DropImports { .. })),
        "state-reachable import must not be dropped: {:?}",
        log.ops()
    );
}

#[test]
fn representative_reanimates_and_reads_state() {
    let (mut vat, log) = cell_vat();
    vat.dispatch(make_cell_with_import(Vref::object_import(10), 1));
    let _ = log.take();

    // Message the virtual object directly: the representative reanimates
    // from paged state and returns the stored presence.
    vat.dispatch(Delivery::Message {
        target: Vref::virtual_export(1),
        method: "get".into(),
        args: CapData::plain("[]"),
        result: Some(Vref::promise_kernel(2)),
    });
    let resolves = log.resolves();
    assert_eq!(resolves[0][0].data.slots, vec![Vref::object_import(10)]);
    assert!(!resolves[0][0].rejected);
}

#[test]
fn dead_virtual_state_cascades_import_drop() {
    let (mut vat, log) = cell_vat();
    vat.dispatch(make_cell_with_import(Vref::object_import(10), 1));
    let _ = log.take();

    // The kernel stops reaching the cell. No representative is alive, no
    // other state references it: the cell's page is deleted, which frees
    // the import, which the same drain then reports.
    vat.dispatch(Delivery::DropExports {
        vrefs: vec![Vref::virtual_export(1)],
    });
    let ops = log.ops();
    let dropped: Vec<&SyscallOp> = ops
        .iter()
        .filter(|op| matches!(op, SyscallOp::DropImports { .. }))
        .collect();
    assert_eq!(
        dropped,
        vec![&SyscallOp::DropImports {
            vrefs: vec![Vref::object_import(10)]
        }]
    );
}

#[test]
fn retire_exports_for_reachable_virtual_export_is_logged_not_fatal() {
    let (mut vat, log) = cell_vat();
    vat.dispatch(make_cell_with_import(Vref::object_import(10), 1));
    let _ = log.take();

    // Protocol violation: retire without a preceding drop. The virtual
    // export is still kernel-reachable, so the vat warns and keeps its
    // state intact.
    vat.dispatch(Delivery::RetireExports {
        vrefs: vec![Vref::virtual_export(1)],
    });
    assert!(log
        .take()
        .iter()
        .all(|op| !matches!(op, SyscallOp::Exit { .. })));

    vat.dispatch(Delivery::Message {
        target: Vref::virtual_export(1),
        method: "get".into(),
        args: CapData::plain("[]"),
        result: Some(Vref::promise_kernel(2)),
    });
    let resolves = log.resolves();
    assert!(!resolves[0][0].rejected, "cell must survive the violation");
    assert_eq!(resolves[0][0].data.slots, vec![Vref::object_import(10)]);
}

#[test]
fn updating_state_releases_replaced_references() {
    let (mut vat, log) = cell_vat();
    vat.dispatch(make_cell_with_import(Vref::object_import(10), 1));
    let _ = log.take();

    // Overwrite the cell's state with plain data: the old state's import
    // reference is released and the drain reports the drop.
    vat.dispatch(Delivery::Message {
        target: Vref::virtual_export(1),
        method: "set".into(),
        args: CapData::plain(r#"["fresh"]"#),
        result: Some(Vref::promise_kernel(2)),
    });
    let dropped: Vec<SyscallOp> = log
        .ops()
        .into_iter()
        .filter(|op| matches!(op, SyscallOp::DropImports { .. }))
        .collect();
    assert_eq!(
        dropped,
        vec![SyscallOp::DropImports {
            vrefs: vec![Vref::object_import(10)]
        }]
    );
}
