// CLASSIFICATION: COMMUNITY
// Filename: test_roundtrip.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-29

//! Round-trip laws: a presence keeps its identity across serialization
//! within one vat lifetime, and an exported remotable never gains a second
//! vref however many times it crosses the boundary.

use std::cell::RefCell;
use std::rc::Rc;

use hivevat::testing::RecordingSyscall;
use hivevat::{
    CapData, CapValue, Delivery, LiveSlots, LiveSlotsOptions, MethodOutcome, ObjectBehavior,
    Remotable, VatCtx, Vref,
};

struct EchoRoot {
    first_seen: RefCell<Option<CapValue>>,
    identity_matches: Rc<RefCell<Vec<bool>>>,
    export: RefCell<Option<Rc<Remotable>>>,
}

struct NullObject;

impl ObjectBehavior for NullObject {
    fn invoke(&self, _method: &str, _args: Vec<CapValue>, _ctx: &VatCtx) -> MethodOutcome {
        MethodOutcome::Fulfill(CapValue::Null)
    }
}

impl ObjectBehavior for EchoRoot {
    fn invoke(&self, method: &str, mut args: Vec<CapValue>, _ctx: &VatCtx) -> MethodOutcome {
        match method {
            "see" => {
                let value = args.remove(0);
                let mut first = self.first_seen.borrow_mut();
                match first.as_ref() {
                    None => {
                        *first = Some(value);
                    }
                    Some(previous) => {
                        let same = match (previous.as_slot(), value.as_slot()) {
                            (Some(a), Some(b)) => a.same(b),
                            _ => false,
                        };
                        self.identity_matches.borrow_mut().push(same);
                    }
                }
                MethodOutcome::Fulfill(CapValue::Bool(true))
            }
            "echo" => match self.first_seen.borrow().as_ref() {
                Some(value) => MethodOutcome::Fulfill(value.clone()),
                None => MethodOutcome::Reject(CapValue::string("nothing seen")),
            },
            "export" => {
                let remotable = self
                    .export
                    .borrow_mut()
                    .get_or_insert_with(|| Remotable::new("stable", Rc::new(NullObject)))
                    .clone();
                MethodOutcome::Fulfill(CapValue::remotable(remotable))
            }
            other => MethodOutcome::Reject(CapValue::string(format!("no such method {other}"))),
        }
    }
}

type Matches = Rc<RefCell<Vec<bool>>>;

fn echo_vat() -> (LiveSlots, hivevat::testing::SyscallLog, Matches) {
    let matches: Matches = Rc::new(RefCell::new(Vec::new()));
    let captured = Rc::clone(&matches);
    let syscall = RecordingSyscall::new();
    let log = syscall.log();
    let vat = LiveSlots::new(LiveSlotsOptions::default(), Box::new(syscall), move |_ctx, _powers| {
        Remotable::new(
            "echo root",
            Rc::new(EchoRoot {
                first_seen: RefCell::new(None),
                identity_matches: captured,
                export: RefCell::new(None),
            }),
        )
    });
    (vat, log, matches)
}

fn see(import: Vref, result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: "see".into(),
        args: CapData::new(r#"[{"@slot": 0}]"#, vec![import]),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

fn call(method: &str, result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: method.into(),
        args: CapData::plain("[]"),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

#[test]
fn presence_identity_is_stable_within_a_lifetime() {
    let (mut vat, _log, matches) = echo_vat();
    vat.dispatch(see(Vref::object_import(10), 1));
    vat.dispatch(see(Vref::object_import(10), 2));
    assert_eq!(*matches.borrow(), vec![true], "same vref must deserialize to the same value");
}

#[test]
fn echoed_presence_serializes_to_its_original_vref() {
    let (mut vat, log, _matches) = echo_vat();
    vat.dispatch(see(Vref::object_import(10), 1));
    let _ = log.take();

    vat.dispatch(call("echo", 2));
    let resolves = log.resolves();
    assert_eq!(resolves[0][0].data.slots, vec![Vref::object_import(10)]);
}

#[test]
fn exported_remotable_never_gains_a_second_vref() {
    let (mut vat, log, _matches) = echo_vat();
    for crank in 0..4u64 {
        vat.dispatch(call("export", crank + 1));
    }
    let mut slot_lists = Vec::new();
    for batch in log.resolves() {
        for resolution in batch {
            slot_lists.push(resolution.data.slots);
        }
    }
    assert_eq!(slot_lists.len(), 4);
    for slots in &slot_lists {
        assert_eq!(*slots, vec![Vref::object_export(1)]);
    }
}

#[test]
fn plain_data_round_trips_through_echo() {
    let (mut vat, log, _matches) = echo_vat();
    vat.dispatch(Delivery::Message {
        target: Vref::ROOT,
        method: "see".into(),
        args: CapData::plain(r#"[{"n": 3, "ok": true, "tags": ["a", "b"], "none": null}]"#),
        result: Some(Vref::promise_kernel(1)),
    });
    let _ = log.take();
    vat.dispatch(call("echo", 2));
    let resolves = log.resolves();
    let body: serde_json::Value = serde_json::from_str(&resolves[0][0].data.body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"n": 3, "ok": true, "tags": ["a", "b"], "none": null})
    );
    assert!(resolves[0][0].data.slots.is_empty());
}
