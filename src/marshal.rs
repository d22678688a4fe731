// CLASSIFICATION: COMMUNITY
// Filename: marshal.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-26

//! The marshaller bridge: value trees to capdata and back.
//!
//! Bodies are JSON. Plain data serializes directly; capability leaves
//! become `{"@slot": N}` markers (with an optional `"iface"` hint) pointing
//! into the slots list, each distinct vref appearing once. Records whose
//! keys could collide with the markers are wrapped as `{"@rec": {...}}`.
//!
//! The slot-translation callbacks are the registry's `convert_val_to_slot`
//! and `convert_slot_to_val`; every emitted slot additionally passes
//! through `retain_exported_remotable` so the kernel can rely on exports it
//! sees.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{json, Map, Number, Value};
use thiserror::Error;
use vat_wire::{CapData, Resolution, Vref};

use crate::dispatch::VatCtx;
use crate::registry::SlotError;
use crate::value::CapValue;

/// Errors raised while marshalling values to capdata or back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Slot translation failed.
    #[error(transparent)]
    Slot(#[from] SlotError),
    /// The body text was not well-formed.
    #[error("malformed body: {0}")]
    Body(String),
    /// A slot marker pointed outside the slots list.
    #[error("body slot index {0} out of range")]
    BadSlotIndex(usize),
}

struct SlotTable {
    slots: Vec<Vref>,
    index: HashMap<Vref, usize>,
}

impl SlotTable {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, vref: Vref) -> usize {
        *self.index.entry(vref).or_insert_with(|| {
            self.slots.push(vref);
            self.slots.len() - 1
        })
    }
}

/// Serialize a value tree into capdata, allocating export slots for
/// previously-unseen pass-by-capability values.
pub(crate) fn serialize(ctx: &VatCtx, value: &CapValue) -> Result<CapData, MarshalError> {
    let mut table = SlotTable::new();
    let body = build_body(ctx, &mut table, value)?;
    for vref in &table.slots {
        ctx.retain_exported_remotable(*vref);
    }
    Ok(CapData::new(body.to_string(), table.slots))
}

fn build_body(ctx: &VatCtx, table: &mut SlotTable, value: &CapValue) -> Result<Value, MarshalError> {
    Ok(match value {
        CapValue::Null => Value::Null,
        CapValue::Bool(b) => Value::Bool(*b),
        CapValue::Int(n) => Value::Number(Number::from(*n)),
        CapValue::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| MarshalError::Body(format!("non-finite float {f}")))?,
        CapValue::Str(s) => Value::String(s.clone()),
        CapValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(build_body(ctx, table, item)?);
            }
            Value::Array(out)
        }
        CapValue::Record(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field) in fields {
                out.insert(key.clone(), build_body(ctx, table, field)?);
            }
            if fields.keys().any(|k| k.starts_with('@')) {
                json!({ "@rec": Value::Object(out) })
            } else {
                Value::Object(out)
            }
        }
        CapValue::Slot(slot) => {
            let vref = ctx.convert_val_to_slot(slot)?;
            let idx = table.intern(vref);
            match slot.iface() {
                Some(iface) => json!({ "@slot": idx, "iface": iface }),
                None => json!({ "@slot": idx }),
            }
        }
    })
}

/// Deserialize capdata into a value tree, materializing imports through the
/// registry as needed.
pub(crate) fn deserialize(ctx: &VatCtx, data: &CapData) -> Result<CapValue, MarshalError> {
    let body: Value =
        serde_json::from_str(&data.body).map_err(|err| MarshalError::Body(err.to_string()))?;
    read_body(ctx, &data.slots, &body)
}

fn read_body(ctx: &VatCtx, slots: &[Vref], body: &Value) -> Result<CapValue, MarshalError> {
    Ok(match body {
        Value::Null => CapValue::Null,
        Value::Bool(b) => CapValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => CapValue::Int(i),
            None => CapValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => CapValue::Str(s.clone()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(read_body(ctx, slots, item)?);
            }
            CapValue::List(out)
        }
        Value::Object(fields) => {
            if let Some(marker) = fields.get("@slot") {
                let idx = marker
                    .as_u64()
                    .ok_or_else(|| MarshalError::Body("non-numeric @slot index".into()))?
                    as usize;
                let vref = *slots.get(idx).ok_or(MarshalError::BadSlotIndex(idx))?;
                let iface = fields.get("iface").and_then(Value::as_str);
                CapValue::Slot(ctx.convert_slot_to_val(vref, iface)?)
            } else if let Some(inner) = fields.get("@rec") {
                match read_body(ctx, slots, inner)? {
                    CapValue::Record(rec) => CapValue::Record(rec),
                    _ => return Err(MarshalError::Body("@rec must wrap a record".into())),
                }
            } else {
                let mut out = std::collections::BTreeMap::new();
                for (key, field) in fields {
                    out.insert(key.clone(), read_body(ctx, slots, field)?);
                }
                CapValue::Record(out)
            }
        }
    })
}

/// Build a resolution batch for a settling vat-decided promise: the seed
/// settlement plus every transitively-known settlement reachable through
/// the serialized slots. Each vpid appears at most once, in insertion order
/// of first discovery.
pub(crate) fn collect_resolution_batch(
    ctx: &VatCtx,
    vpid: Vref,
    rejected: bool,
    value: &CapValue,
) -> Result<Vec<Resolution>, MarshalError> {
    let mut seen = HashSet::new();
    seen.insert(vpid);
    let data = serialize(ctx, value)?;
    let mut queue: VecDeque<Vref> = data.slots.iter().copied().collect();
    let mut out = vec![Resolution::new(vpid, rejected, data)];
    append_known_resolutions(ctx, &mut queue, &mut seen, &mut out)?;
    Ok(out)
}

/// Gather the settlements already known for promise vrefs among `slots`,
/// recursing over the slots of each serialized settlement.
pub(crate) fn collect_known_resolutions(
    ctx: &VatCtx,
    slots: &[Vref],
) -> Result<Vec<Resolution>, MarshalError> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<Vref> = slots.iter().copied().collect();
    let mut out = Vec::new();
    append_known_resolutions(ctx, &mut queue, &mut seen, &mut out)?;
    Ok(out)
}

fn append_known_resolutions(
    ctx: &VatCtx,
    queue: &mut VecDeque<Vref>,
    seen: &mut HashSet<Vref>,
    out: &mut Vec<Resolution>,
) -> Result<(), MarshalError> {
    while let Some(vref) = queue.pop_front() {
        if !vref.is_promise() || !seen.insert(vref) {
            continue;
        }
        let settlement = ctx
            .with_core(|core| core.registry.vat_decided_promise(&vref))
            .and_then(|handle| handle.settlement());
        let Some((rejected, value)) = settlement else {
            continue;
        };
        let data = serialize(ctx, &value)?;
        queue.extend(data.slots.iter().copied());
        out.push(Resolution::new(vref, rejected, data));
    }
    Ok(())
}
