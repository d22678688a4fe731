// CLASSIFICATION: COMMUNITY
// Filename: test_vatstore.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-29

//! The vat key-value store: provisioned by configuration, transparently
//! namespaced, absent otherwise.

use std::cell::RefCell;
use std::rc::Rc;

use hivevat::testing::RecordingSyscall;
use hivevat::{
    CapData, CapValue, Delivery, LiveSlots, LiveSlotsOptions, MethodOutcome, ObjectBehavior,
    Remotable, SyscallOp, VatCtx, VatPowers, Vref,
};

struct StoreUser {
    powers: RefCell<Option<VatPowers>>,
    reads: Rc<RefCell<Vec<Option<String>>>>,
}

impl ObjectBehavior for StoreUser {
    fn invoke(&self, method: &str, _args: Vec<CapValue>, _ctx: &VatCtx) -> MethodOutcome {
        let powers = self.powers.borrow();
        let powers = powers.as_ref().expect("powers installed");
        match method {
            "exercise" => {
                let Some(store) = powers.store() else {
                    return MethodOutcome::Reject(CapValue::string("store not provisioned"));
                };
                store.set("color", "blue");
                self.reads.borrow_mut().push(store.get("color"));
                store.delete("color");
                self.reads.borrow_mut().push(store.get("color"));
                MethodOutcome::Fulfill(CapValue::Null)
            }
            other => MethodOutcome::Reject(CapValue::string(format!("no such method {other}"))),
        }
    }
}

type Reads = Rc<RefCell<Vec<Option<String>>>>;

fn store_vat(enable: bool) -> (LiveSlots, hivevat::testing::SyscallLog, Reads) {
    let reads: Reads = Rc::new(RefCell::new(Vec::new()));
    let captured = Rc::clone(&reads);
    let syscall = RecordingSyscall::new();
    let log = syscall.log();
    let options = LiveSlotsOptions {
        enable_vatstore: enable,
        ..LiveSlotsOptions::default()
    };
    let vat = LiveSlots::new(options, Box::new(syscall), move |_ctx, powers| {
        Remotable::new(
            "store user",
            Rc::new(StoreUser {
                powers: RefCell::new(Some(powers.clone())),
                reads: captured,
            }),
        )
    });
    (vat, log, reads)
}

fn exercise(result_id: u64) -> Delivery {
    Delivery::Message {
        target: Vref::ROOT,
        method: "exercise".into(),
        args: CapData::plain("[]"),
        result: Some(Vref::promise_kernel(result_id)),
    }
}

#[test]
fn user_keys_are_transparently_namespaced() {
    let (mut vat, log, reads) = store_vat(true);
    vat.dispatch(exercise(1));

    assert_eq!(*reads.borrow(), vec![Some("blue".to_owned()), None]);
    let store_ops: Vec<SyscallOp> = log
        .ops()
        .into_iter()
        .filter(|op| {
            matches!(
                op,
                SyscallOp::VatstoreGet { .. }
                    | SyscallOp::VatstoreSet { .. }
                    | SyscallOp::VatstoreDelete { .. }
            )
        })
        .collect();
    assert_eq!(
        store_ops,
        vec![
            SyscallOp::VatstoreSet {
                key: "uvs.color".into(),
                value: "blue".into()
            },
            SyscallOp::VatstoreGet {
                key: "uvs.color".into()
            },
            SyscallOp::VatstoreDelete {
                key: "uvs.color".into()
            },
            SyscallOp::VatstoreGet {
                key: "uvs.color".into()
            },
        ]
    );
}

#[test]
fn store_is_absent_without_the_flag() {
    let (mut vat, log, reads) = store_vat(false);
    vat.dispatch(exercise(1));

    assert!(reads.borrow().is_empty());
    assert!(log
        .ops()
        .iter()
        .all(|op| !matches!(op, SyscallOp::VatstoreSet { .. })));
    let resolves = log.resolves();
    assert!(resolves[0][0].rejected, "exercise must reject without a store");
}
