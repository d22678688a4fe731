// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate vref text-form stability and delivery serde contracts.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use vat_wire::{sorted_unique, CapData, Delivery, Resolution, SyscallOp, Vref};

#[test]
fn root_vref_is_fixed() {
    assert_eq!(Vref::ROOT.to_string(), "o+0");
    assert_eq!("o+0".parse::<Vref>().unwrap(), Vref::ROOT);
    assert!(Vref::ROOT.is_vat_allocated());
    assert!(!Vref::ROOT.is_virtual());
}

#[test]
fn coordinates_survive_text_round_trips() {
    for text in ["o+7", "o+v7", "o-7", "p+7", "p-7", "d-7"] {
        let vref: Vref = text.parse().unwrap();
        let again: Vref = vref.to_string().parse().unwrap();
        assert_eq!(vref, again);
        assert_eq!(vref.ty(), again.ty());
        assert_eq!(vref.allocator(), again.allocator());
        assert_eq!(vref.is_virtual(), again.is_virtual());
        assert_eq!(vref.id(), again.id());
    }
}

#[test]
fn gc_list_shape_is_sorted_unique() {
    let list = sorted_unique(vec![
        Vref::object_import(2),
        Vref::object_import(10),
        Vref::object_import(2),
        Vref::object_export(3),
    ]);
    let text: Vec<String> = list.iter().map(Vref::to_string).collect();
    assert_eq!(text, ["o+3", "o-10", "o-2"]);
}

#[test]
fn delivery_and_syscall_records_round_trip_through_json() {
    let records = vec![
        Delivery::Message {
            target: Vref::ROOT,
            method: "boot".into(),
            args: CapData::new("[]", vec![]),
            result: Some(Vref::promise_kernel(1)),
        },
        Delivery::Notify {
            resolutions: vec![Resolution::new(
                Vref::promise_kernel(2),
                true,
                CapData::plain("\"no\""),
            )],
        },
        Delivery::DropExports {
            vrefs: vec![Vref::object_export(1)],
        },
        Delivery::RetireExports {
            vrefs: vec![Vref::object_export(1)],
        },
        Delivery::RetireImports {
            vrefs: vec![Vref::object_import(4)],
        },
    ];
    for record in records {
        let text = serde_json::to_string(&record).unwrap();
        let back: Delivery = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    let op = SyscallOp::Send {
        target: Vref::object_import(5),
        method: "foo".into(),
        args: CapData::new("[]", vec![]),
        result: Some(Vref::promise_vat(5)),
    };
    let text = serde_json::to_string(&op).unwrap();
    let back: SyscallOp = serde_json::from_str(&text).unwrap();
    assert_eq!(back, op);
}
