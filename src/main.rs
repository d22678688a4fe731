// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-27

//! Demo host: boots one vat with a sample root object, feeds it a
//! JSON-scripted delivery sequence, and logs the syscall trace each crank.
//!
//! Usage: `hivevat [script.json]`. The script is a JSON array of delivery
//! records; without one, a built-in script exercises a send, an import, and
//! the GC drain.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use log::info;

use hivevat::testing::RecordingSyscall;
use hivevat::{
    CapValue, Delivery, LiveSlots, LiveSlotsOptions, MethodOutcome, ObjectBehavior, Remotable,
    VatCtx,
};

/// Built-in demo script: greet the root, hand it an import, drop it again.
const DEMO_SCRIPT: &str = r#"[
  { "type": "message", "target": "o+0",
    "method": "greet",
    "args": { "body": "[\"kernel\"]", "slots": [] },
    "result": "p-1" },
  { "type": "message", "target": "o+0",
    "method": "keep",
    "args": { "body": "[{\"@slot\": 0}]", "slots": ["o-10"] },
    "result": "p-2" },
  { "type": "message", "target": "o+0",
    "method": "release",
    "args": { "body": "[]", "slots": [] },
    "result": "p-3" }
]"#;

/// Root object for the demo vat: greets, keeps one import, releases it.
struct DemoRoot {
    kept: RefCell<Option<CapValue>>,
}

impl ObjectBehavior for DemoRoot {
    fn invoke(&self, method: &str, mut args: Vec<CapValue>, _ctx: &VatCtx) -> MethodOutcome {
        match method {
            "greet" => {
                let who = match args.first() {
                    Some(CapValue::Str(name)) => name.clone(),
                    _ => "stranger".to_owned(),
                };
                MethodOutcome::Fulfill(CapValue::string(format!("hello, {who}")))
            }
            "keep" => {
                if args.is_empty() {
                    return MethodOutcome::Reject(CapValue::string("keep needs an argument"));
                }
                *self.kept.borrow_mut() = Some(args.remove(0));
                MethodOutcome::Fulfill(CapValue::Bool(true))
            }
            "release" => {
                let had = self.kept.borrow_mut().take().is_some();
                MethodOutcome::Fulfill(CapValue::Bool(had))
            }
            other => MethodOutcome::Reject(CapValue::string(format!("no such method {other}"))),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let script = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading delivery script {path}"))?,
        None => DEMO_SCRIPT.to_owned(),
    };
    let deliveries: Vec<Delivery> =
        serde_json::from_str(&script).context("parsing delivery script")?;

    let syscall = RecordingSyscall::new();
    let log = syscall.log();
    let mut vat = LiveSlots::new(LiveSlotsOptions::default(), Box::new(syscall), |_ctx, _powers| {
        Remotable::new(
            "demo root",
            Rc::new(DemoRoot {
                kept: RefCell::new(None),
            }),
        )
    });

    for (crank, delivery) in deliveries.into_iter().enumerate() {
        info!("crank {crank}: {delivery:?}");
        let report = vat.dispatch(delivery);
        for op in log.take() {
            info!("  syscall: {op:?}");
        }
        info!(
            "  report: {} turns, {} sends, {} resolves, {} drops",
            report.turns, report.sends, report.resolves, report.dropped_imports
        );
    }
    Ok(())
}
