// CLASSIFICATION: COMMUNITY
// Filename: test_import_drop.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-28

//! Import lifecycle: a presence delivered in message args is held, then
//! dropped; the GC drain reports the drop and, with no weak-collection
//! recognizers, the retirement in the same drain.

use std::cell::RefCell;
use std::rc::Rc;

use hivevat::testing::RecordingSyscall;
use hivevat::{
    CapData, CapValue, Delivery, LiveSlots, LiveSlotsOptions, MethodOutcome, ObjectBehavior,
    Remotable, SyscallOp, VatCtx, VatWeakSet, Vref,
};

struct KeeperRoot {
    kept: RefCell<Option<CapValue>>,
    weak: RefCell<Option<VatWeakSet>>,
}

impl ObjectBehavior for KeeperRoot {
    fn invoke(&self, method: &str, mut args: Vec<CapValue>, _ctx: &VatCtx) -> MethodOutcome {
        match method {
            "keep" => {
                *self.kept.borrow_mut() = Some(args.remove(0));
                MethodOutcome::Fulfill(CapValue::Bool(true))
            }
            "track" => {
                // Key the held import into the weak collection.
                let kept = self.kept.borrow();
                let weak = self.weak.borrow();
                match (kept.as_ref(), weak.as_ref()) {
                    (Some(value), Some(set)) => match set.add(value) {
                        Ok(fresh) => MethodOutcome::Fulfill(CapValue::Bool(fresh)),
                        Err(err) => MethodOutcome::Reject(CapValue::string(err.to_string())),
                    },
                    _ => MethodOutcome::Reject(CapValue::string("nothing to track")),
                }
            }
            "release" => {
                let had = self.kept.borrow_mut().take().is_some();
                MethodOutcome::Fulfill(CapValue::Bool(had))
            }
            other => MethodOutcome::Reject(CapValue::string(format!("no such method {other}"))),
        }
    }
}

fn keeper_vat() -> (LiveSlots, hivevat::testing::SyscallLog) {
    let syscall = RecordingSyscall::new();
    let log = syscall.log();
    let vat = LiveSlots::new(LiveSlotsOptions::default(), Box::new(syscall), |_ctx, powers| {
        Remotable::new(
            "keeper",
            Rc::new(KeeperRoot {
                kept: RefCell::new(None),
                weak: RefCell::new(Some(powers.make_weak_set())),
            }),
        )
    });
    (vat, log)
}

fn keep_message(result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: "keep".into(),
        args: CapData::new(r#"[{"@slot": 0}]"#, vec![Vref::object_import(10)]),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

fn release_message(result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: "release".into(),
        args: CapData::plain("[]"),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

#[test]
fn dropped_import_is_reported_and_retired_in_one_drain() {
    let (mut vat, log) = keeper_vat();

    vat.dispatch(keep_message(1));
    // Held import: no GC syscalls yet.
    assert!(log.gc_ops().is_empty(), "held import must not be dropped");
    let _ = log.take();

    let report = vat.dispatch(release_message(2));
    let gc = log.gc_ops();
    assert_eq!(
        gc,
        vec![
            SyscallOp::DropImports {
                vrefs: vec![Vref::object_import(10)]
            },
            SyscallOp::RetireImports {
                vrefs: vec![Vref::object_import(10)]
            },
        ]
    );
    assert_eq!(report.dropped_imports, 1);
    assert_eq!(report.retired_imports, 1);
}

#[test]
fn gc_syscalls_follow_user_syscalls_within_a_crank() {
    let (mut vat, log) = keeper_vat();
    vat.dispatch(keep_message(1));
    let _ = log.take();

    vat.dispatch(release_message(2));
    let ops = log.ops();
    let first_gc = ops
        .iter()
        .position(|op| matches!(op, SyscallOp::DropImports { .. }))
        .expect("drain must report the drop");
    let last_resolve = ops
        .iter()
        .rposition(|op| matches!(op, SyscallOp::Resolve { .. }))
        .expect("release resolves its result");
    assert!(
        last_resolve < first_gc,
        "GC syscalls must trail user syscalls: {ops:?}"
    );
}

#[test]
fn recognizable_import_is_dropped_but_not_retired() {
    let (mut vat, log) = keeper_vat();
    vat.dispatch(keep_message(1));
    vat.dispatch(release_message_named("track", 2));
    let _ = log.take();

    vat.dispatch(release_message(3));
    let gc = log.gc_ops();
    // The weak-collection key makes the vref still recognizable: the drop
    // is reported, the retirement is not.
    assert_eq!(
        gc,
        vec![SyscallOp::DropImports {
            vrefs: vec![Vref::object_import(10)]
        }]
    );

    // Kernel-side retirement of the import is tolerated afterwards.
    let _ = log.take();
    vat.dispatch(Delivery::RetireImports {
        vrefs: vec![Vref::object_import(10)],
    });
    assert!(log.ops().iter().all(|op| !matches!(op, SyscallOp::Exit { .. })));
}

fn release_message_named(method: &str, result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: method.into(),
        args: CapData::plain("[]"),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

#[test]
fn reintroduction_after_drop_uses_the_same_vref() {
    let (mut vat, log) = keeper_vat();

    vat.dispatch(keep_message(1));
    vat.dispatch(release_message(2));
    let first_drops: Vec<SyscallOp> = log
        .take()
        .into_iter()
        .filter(|op| matches!(op, SyscallOp::DropImports { .. }))
        .collect();
    assert_eq!(first_drops.len(), 1);

    // Same kernel vref arrives again: a fresh presence is registered under
    // the identical identifier and the next drop reports it again.
    vat.dispatch(keep_message(3));
    assert!(log.gc_ops().is_empty());
    vat.dispatch(release_message(4));
    let second_drops: Vec<SyscallOp> = log
        .ops()
        .into_iter()
        .filter(|op| matches!(op, SyscallOp::DropImports { .. }))
        .collect();
    assert_eq!(
        second_drops,
        vec![SyscallOp::DropImports {
            vrefs: vec![Vref::object_import(10)]
        }]
    );
}
