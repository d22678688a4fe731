// CLASSIFICATION: COMMUNITY
// Filename: test_notify.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-28

//! Notify handling: imported promises settle through their saved resolver
//! pair, vpids retire after the batch, and embedded presences materialize
//! without a subscribe.

use std::cell::RefCell;
use std::rc::Rc;

use hivevat::testing::RecordingSyscall;
use hivevat::{
    CapData, CapValue, Delivery, LiveSlots, LiveSlotsOptions, MethodOutcome, ObjectBehavior,
    Remotable, Resolution, SlotValue, SyscallOp, VatCtx, Vref,
};

/// Root that watches any promise handed to it and records settlements.
struct WatcherRoot {
    seen: Rc<RefCell<Vec<Result<CapValue, CapValue>>>>,
}

impl ObjectBehavior for WatcherRoot {
    fn invoke(&self, method: &str, mut args: Vec<CapValue>, ctx: &VatCtx) -> MethodOutcome {
        match method {
            "watch" => {
                let CapValue::Slot(SlotValue::Promise(promise)) = args.remove(0) else {
                    return MethodOutcome::Reject(CapValue::string("watch needs a promise"));
                };
                let seen = Rc::clone(&self.seen);
                promise.when(ctx, move |_ctx, settled| {
                    seen.borrow_mut().push(settled);
                });
                MethodOutcome::Fulfill(CapValue::Bool(true))
            }
            other => MethodOutcome::Reject(CapValue::string(format!("no such method {other}"))),
        }
    }
}

type Seen = Rc<RefCell<Vec<Result<CapValue, CapValue>>>>;

fn watcher_vat() -> (LiveSlots, hivevat::testing::SyscallLog, Seen) {
    let seen: Seen = Rc::new(RefCell::new(Vec::new()));
    let captured = Rc::clone(&seen);
    let syscall = RecordingSyscall::new();
    let log = syscall.log();
    let vat = LiveSlots::new(LiveSlotsOptions::default(), Box::new(syscall), move |_ctx, _powers| {
        Remotable::new("watcher", Rc::new(WatcherRoot { seen: captured }))
    });
    (vat, log, seen)
}

fn watch_message(vpid: Vref, result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: "watch".into(),
        args: CapData::new(r#"[{"@slot": 0}]"#, vec![vpid]),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

#[test]
fn imported_promise_subscribes_once() {
    let (mut vat, log, _seen) = watcher_vat();
    vat.dispatch(watch_message(Vref::promise_kernel(3), 1));

    let subscribes: Vec<SyscallOp> = log
        .ops()
        .into_iter()
        .filter(|op| matches!(op, SyscallOp::Subscribe { .. }))
        .collect();
    assert_eq!(
        subscribes,
        vec![SyscallOp::Subscribe {
            vpid: Vref::promise_kernel(3)
        }]
    );
    let _ = log.take();

    // Watching the same vpid again re-uses the registration: no second
    // subscribe ever goes out.
    vat.dispatch(watch_message(Vref::promise_kernel(3), 2));
    assert!(log
        .ops()
        .iter()
        .all(|op| !matches!(op, SyscallOp::Subscribe { .. })));
}

#[test]
fn notify_with_embedded_presence() {
    let (mut vat, log, seen) = watcher_vat();
    vat.dispatch(watch_message(Vref::promise_kernel(3), 1));
    let _ = log.take();

    vat.dispatch(Delivery::Notify {
        resolutions: vec![Resolution::new(
            Vref::promise_kernel(3),
            false,
            CapData::new(r#"{"@slot": 0}"#, vec![Vref::object_import(11)]),
        )],
    });

    // The resolver fired with a presence for o-11.
    let settled = seen.borrow();
    assert_eq!(settled.len(), 1);
    match &settled[0] {
        Ok(CapValue::Slot(SlotValue::Presence(presence))) => {
            assert_eq!(presence.vref(), Vref::object_import(11));
        }
        other => panic!("expected a presence settlement, got {other:?}"),
    }
    drop(settled);

    // Objects do not subscribe, and the settled vpid is retired, so the
    // crank emits no subscribe at all.
    assert!(log
        .ops()
        .iter()
        .all(|op| !matches!(op, SyscallOp::Subscribe { .. })));
}

#[test]
fn notify_for_unknown_vpid_is_benign() {
    let (mut vat, log, _seen) = watcher_vat();
    vat.dispatch(Delivery::Notify {
        resolutions: vec![Resolution::new(
            Vref::promise_kernel(99),
            false,
            CapData::plain("null"),
        )],
    });
    // Logged and ignored: no exit, no other syscalls.
    assert!(log.ops().iter().all(|op| !matches!(op, SyscallOp::Exit { .. })));
}

#[test]
fn settled_vpid_never_reappears() {
    let (mut vat, log, seen) = watcher_vat();
    vat.dispatch(watch_message(Vref::promise_kernel(3), 1));
    vat.dispatch(Delivery::Notify {
        resolutions: vec![Resolution::new(
            Vref::promise_kernel(3),
            true,
            CapData::plain("\"boom\""),
        )],
    });
    assert!(matches!(seen.borrow()[0], Err(_)));
    let _ = log.take();

    // A duplicate notify for the retired vpid is a benign protocol fault.
    vat.dispatch(Delivery::Notify {
        resolutions: vec![Resolution::new(
            Vref::promise_kernel(3),
            false,
            CapData::plain("null"),
        )],
    });
    assert!(log.ops().iter().all(|op| !matches!(op, SyscallOp::Exit { .. })));
    assert_eq!(seen.borrow().len(), 1, "resolver must not fire twice");
}
