// CLASSIFICATION: COMMUNITY
// Filename: value.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-18

//! In-vat value model.
//!
//! A `CapValue` is the tree user code passes around: plain data plus
//! capability leaves. The capability leaves are `SlotValue` handles, the
//! five registrable shapes the slot registry knows how to map to vrefs.
//! Identity of a slot value is pointer identity of its backing allocation,
//! captured as a [`ValKey`].

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use vat_wire::Vref;

use crate::dispatch::VatCtx;
use crate::promise::{PromiseHandle, WeakPromiseHandle};
use crate::vobj::Representative;

/// Behavior seam for pass-by-capability objects.
///
/// The runtime does not require host-language dynamic dispatch; user code
/// supplies one `invoke` entry point per object and routes on the method
/// name itself.
pub trait ObjectBehavior {
    /// Handle a method invocation. Rejections are modeled as
    /// [`MethodOutcome::Reject`]; panics are bugs, not user errors.
    fn invoke(&self, method: &str, args: Vec<CapValue>, ctx: &VatCtx) -> MethodOutcome;
}

/// Result of invoking a method on an in-vat object.
pub enum MethodOutcome {
    /// The method settled immediately with a value.
    Fulfill(CapValue),
    /// The method will settle the given promise later.
    Defer(PromiseHandle),
    /// The method failed; the value is the rejection reason.
    Reject(CapValue),
}

/// A sealed in-vat pass-by-capability object exported by this vat.
pub struct Remotable {
    iface: String,
    behavior: Rc<dyn ObjectBehavior>,
}

impl Remotable {
    /// Create a remotable with an interface hint and a behavior.
    #[must_use]
    pub fn new(iface: impl Into<String>, behavior: Rc<dyn ObjectBehavior>) -> Rc<Self> {
        Rc::new(Self {
            iface: iface.into(),
            behavior,
        })
    }

    /// Interface hint carried through serialization.
    #[must_use]
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// The behavior implementing this object's methods.
    #[must_use]
    pub fn behavior(&self) -> Rc<dyn ObjectBehavior> {
        Rc::clone(&self.behavior)
    }
}

impl fmt::Debug for Remotable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remotable").field("iface", &self.iface).finish()
    }
}

/// An in-vat proxy for a kernel-held object in some other vat.
#[derive(Debug)]
pub struct Presence {
    vref: Vref,
    iface: Option<String>,
}

impl Presence {
    pub(crate) fn new(vref: Vref, iface: Option<String>) -> Rc<Self> {
        Rc::new(Self { vref, iface })
    }

    /// The import vref this presence stands for.
    #[must_use]
    pub fn vref(&self) -> Vref {
        self.vref
    }

    /// Interface hint, when the exporting side provided one.
    #[must_use]
    pub fn iface(&self) -> Option<&str> {
        self.iface.as_deref()
    }
}

/// An in-vat proxy for a synchronous kernel device.
#[derive(Debug)]
pub struct DeviceNode {
    vref: Vref,
}

impl DeviceNode {
    pub(crate) fn new(vref: Vref) -> Rc<Self> {
        Rc::new(Self { vref })
    }

    /// The device vref.
    #[must_use]
    pub fn vref(&self) -> Vref {
        self.vref
    }
}

/// Method name as supplied by user code.
///
/// The kernel protocol carries method names as strings. Symbol-named
/// methods are not expressible on the wire, with one exception: the
/// asynchronous-iteration symbol, which is bridged as the literal string
/// `"Symbol.asyncIterator"` on both the send and receive paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodName {
    /// An ordinary string method name.
    Str(String),
    /// The asynchronous-iteration symbol.
    AsyncIteratorSymbol,
    /// Any other symbol-named method; refused at send time.
    Symbol(String),
}

/// Wire form of the asynchronous-iteration symbol.
pub const ASYNC_ITERATOR_METHOD: &str = "Symbol.asyncIterator";

impl From<&str> for MethodName {
    fn from(name: &str) -> Self {
        MethodName::Str(name.to_owned())
    }
}

impl From<String> for MethodName {
    fn from(name: String) -> Self {
        MethodName::Str(name)
    }
}

/// A registrable capability handle: the union of value shapes the slot
/// registry maps to vrefs.
#[derive(Clone)]
pub enum SlotValue {
    /// A local pass-by-capability object.
    Remotable(Rc<Remotable>),
    /// A proxy for a kernel-held object.
    Presence(Rc<Presence>),
    /// A promise, local or imported.
    Promise(PromiseHandle),
    /// A device-node proxy.
    Device(Rc<DeviceNode>),
    /// A transient representative of a virtual object.
    Representative(Rc<Representative>),
}

impl SlotValue {
    /// Pointer identity of the backing allocation.
    #[must_use]
    pub fn key(&self) -> ValKey {
        let addr = match self {
            SlotValue::Remotable(r) => Rc::as_ptr(r) as *const () as usize,
            SlotValue::Presence(p) => Rc::as_ptr(p) as *const () as usize,
            SlotValue::Promise(p) => p.key().0,
            SlotValue::Device(d) => Rc::as_ptr(d) as *const () as usize,
            SlotValue::Representative(r) => Rc::as_ptr(r) as *const () as usize,
        };
        ValKey(addr)
    }

    /// Downgrade to a weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakSlotValue {
        match self {
            SlotValue::Remotable(r) => WeakSlotValue::Remotable(Rc::downgrade(r)),
            SlotValue::Presence(p) => WeakSlotValue::Presence(Rc::downgrade(p)),
            SlotValue::Promise(p) => WeakSlotValue::Promise(p.downgrade()),
            SlotValue::Device(d) => WeakSlotValue::Device(Rc::downgrade(d)),
            SlotValue::Representative(r) => WeakSlotValue::Representative(Rc::downgrade(r)),
        }
    }

    /// True for promise handles.
    #[must_use]
    pub fn is_promise(&self) -> bool {
        matches!(self, SlotValue::Promise(_))
    }

    /// Interface hint for serialization, when the shape carries one.
    #[must_use]
    pub fn iface(&self) -> Option<&str> {
        match self {
            SlotValue::Remotable(r) => Some(r.iface()),
            SlotValue::Presence(p) => p.iface(),
            SlotValue::Representative(r) => Some(r.iface()),
            SlotValue::Promise(_) | SlotValue::Device(_) => None,
        }
    }

    /// True when both handles name the same allocation.
    #[must_use]
    pub fn same(&self, other: &SlotValue) -> bool {
        self.key() == other.key()
    }
}

impl fmt::Debug for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Remotable(r) => write!(f, "Remotable({})", r.iface()),
            SlotValue::Presence(p) => write!(f, "Presence({})", p.vref()),
            SlotValue::Promise(p) => write!(f, "Promise@{:#x}", p.key().0),
            SlotValue::Device(d) => write!(f, "Device({})", d.vref()),
            SlotValue::Representative(r) => write!(f, "Representative({})", r.vref()),
        }
    }
}

/// Weak counterpart of [`SlotValue`]; upgrade fails once the backing
/// allocation is gone.
#[derive(Clone)]
pub enum WeakSlotValue {
    /// Weak remotable handle.
    Remotable(Weak<Remotable>),
    /// Weak presence handle.
    Presence(Weak<Presence>),
    /// Weak promise handle.
    Promise(WeakPromiseHandle),
    /// Weak device handle.
    Device(Weak<DeviceNode>),
    /// Weak representative handle.
    Representative(Weak<Representative>),
}

impl WeakSlotValue {
    /// Attempt to recover the strong handle.
    #[must_use]
    pub fn upgrade(&self) -> Option<SlotValue> {
        match self {
            WeakSlotValue::Remotable(w) => w.upgrade().map(SlotValue::Remotable),
            WeakSlotValue::Presence(w) => w.upgrade().map(SlotValue::Presence),
            WeakSlotValue::Promise(w) => w.upgrade().map(SlotValue::Promise),
            WeakSlotValue::Device(w) => w.upgrade().map(SlotValue::Device),
            WeakSlotValue::Representative(w) => w.upgrade().map(SlotValue::Representative),
        }
    }

    /// True once the referent has been collected.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        self.upgrade().is_none()
    }
}

impl fmt::Debug for WeakSlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(v) => write!(f, "Weak({v:?})"),
            None => f.write_str("Weak(<gone>)"),
        }
    }
}

/// Pointer identity of a slot value; the key of the value→vref table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValKey(pub usize);

/// The value tree user code exchanges with the runtime: plain data with
/// capability leaves.
#[derive(Debug, Clone)]
pub enum CapValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Text.
    Str(String),
    /// Ordered list.
    List(Vec<CapValue>),
    /// String-keyed record.
    Record(BTreeMap<String, CapValue>),
    /// Capability leaf.
    Slot(SlotValue),
}

impl CapValue {
    /// Text convenience constructor.
    #[must_use]
    pub fn string(text: impl Into<String>) -> Self {
        CapValue::Str(text.into())
    }

    /// Wrap a remotable.
    #[must_use]
    pub fn remotable(value: Rc<Remotable>) -> Self {
        CapValue::Slot(SlotValue::Remotable(value))
    }

    /// Wrap a presence.
    #[must_use]
    pub fn presence(value: Rc<Presence>) -> Self {
        CapValue::Slot(SlotValue::Presence(value))
    }

    /// Wrap a promise.
    #[must_use]
    pub fn promise(value: PromiseHandle) -> Self {
        CapValue::Slot(SlotValue::Promise(value))
    }

    /// Wrap a device node.
    #[must_use]
    pub fn device(value: Rc<DeviceNode>) -> Self {
        CapValue::Slot(SlotValue::Device(value))
    }

    /// The capability leaf, when this value is one.
    #[must_use]
    pub fn as_slot(&self) -> Option<&SlotValue> {
        match self {
            CapValue::Slot(s) => Some(s),
            _ => None,
        }
    }

    /// True when any leaf of the tree is a promise.
    #[must_use]
    pub fn contains_promise(&self) -> bool {
        match self {
            CapValue::Slot(s) => s.is_promise(),
            CapValue::List(items) => items.iter().any(CapValue::contains_promise),
            CapValue::Record(fields) => fields.values().any(CapValue::contains_promise),
            _ => false,
        }
    }
}
