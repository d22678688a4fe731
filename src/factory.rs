// CLASSIFICATION: COMMUNITY
// Filename: factory.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-07-27

//! Eventual sends: presences, pipelined promises, and local delivery.
//!
//! Every kernel-bound send allocates a fresh result promise, emits
//! `syscall.send`, queues a subscribe for the result, and then sweeps the
//! serialized argument slots for settlements the kernel does not know yet.
//! Subscribes batch up and flush at end of crank, after all the crank's
//! sends.

use std::rc::Rc;

use log::debug;
use thiserror::Error;
use vat_wire::Vref;

use crate::dispatch::VatCtx;
use crate::marshal::{self, MarshalError};
use crate::promise::{promise_kit, PromiseHandle, ResolverHandle};
use crate::registry::SlotError;
use crate::value::{
    CapValue, MethodName, MethodOutcome, Remotable, SlotValue, ASYNC_ITERATOR_METHOD,
};

/// Errors surfaced synchronously to user code by the send and device paths.
#[derive(Debug, Error)]
pub enum SendError {
    /// Symbol-named methods (other than async iteration) cannot cross the
    /// wire.
    #[error("method names must be strings; got symbol '{0}'")]
    BadMethodName(String),
    /// The send target was plain data.
    #[error("eventual send target must be a capability")]
    NotACapability,
    /// Device nodes only take synchronous calls.
    #[error("device nodes take synchronous calls only")]
    EventualSendToDevice,
    /// Promises may not appear in device-call arguments.
    #[error("promises may not be passed to device calls")]
    PromiseInDeviceCall,
    /// A device proxy was requested for something that is not a device
    /// node.
    #[error("cannot make a device proxy from a non-device")]
    DeviceOfDevice,
    /// The pre-resolution pipelining handler was used after resolution.
    #[error("pipelining handler used after resolution")]
    HandlerAfterResolution,
    /// Slot translation failed; a disavowed reference also terminates the
    /// vat.
    #[error(transparent)]
    Slot(#[from] SlotError),
    /// The disavow power is not enabled for this vat.
    #[error("disavow power is not enabled")]
    DisavowDisabled,
    /// Disavow targets must be imported presences.
    #[error("disavow target must be an imported presence")]
    DisavowTarget,
    /// The kernel refused or failed a device call.
    #[error("device call failed: {0}")]
    Device(String),
    /// Serialization failed for a reason other than slot translation.
    #[error("marshal failure: {0}")]
    Marshal(String),
}

/// Normalize a method name to its wire form.
pub(crate) fn normalize_method(method: MethodName) -> Result<String, SendError> {
    match method {
        MethodName::Str(name) => Ok(name),
        MethodName::AsyncIteratorSymbol => Ok(ASYNC_ITERATOR_METHOD.to_owned()),
        MethodName::Symbol(name) => Err(SendError::BadMethodName(name)),
    }
}

impl VatCtx {
    /// Eventual send: invoke `method` on `target` in a later turn,
    /// returning a promise for the result.
    ///
    /// Presences and registered promises forward through the kernel
    /// (pipelining, for promises). Local objects are delivered locally;
    /// settled promises shorten through their recorded resolution.
    pub fn send(
        &self,
        target: &CapValue,
        method: impl Into<MethodName>,
        args: Vec<CapValue>,
    ) -> Result<PromiseHandle, SendError> {
        let method = normalize_method(method.into())?;
        let slot = target.as_slot().ok_or(SendError::NotACapability)?;
        match slot {
            SlotValue::Presence(_) => {
                let target_vref = self.target_vref(slot)?;
                self.kernel_send(target_vref, &method, args)
            }
            SlotValue::Promise(promise) => self.send_to_promise(promise, &method, args),
            SlotValue::Remotable(remotable) => {
                Ok(self.local_send(Rc::clone(remotable), method, args))
            }
            SlotValue::Representative(_) => {
                let target_vref = self.target_vref(slot)?;
                // Virtual objects are local, but routing through the vref
                // keeps representative identity out of the schedule path.
                let value = self.convert_slot_to_val(target_vref, None)?;
                match value {
                    SlotValue::Representative(rep) => Ok(self.local_send_virtual(rep, method, args)),
                    other => {
                        debug!("virtual send target degenerated to {other:?}");
                        Err(SendError::NotACapability)
                    }
                }
            }
            SlotValue::Device(_) => Err(SendError::EventualSendToDevice),
        }
    }

    /// Resolve a send target to its vref, terminating the vat on a
    /// disavowed reference.
    fn target_vref(&self, slot: &SlotValue) -> Result<Vref, SendError> {
        match self.convert_val_to_slot(slot) {
            Ok(vref) => Ok(vref),
            Err(SlotError::DisavowedReference) => {
                self.terminate_failure("method invoked on disavowed presence");
                Err(SendError::Slot(SlotError::DisavowedReference))
            }
            Err(err) => Err(SendError::Slot(err)),
        }
    }

    /// Queue a message through the kernel and return its result promise.
    pub(crate) fn kernel_send(
        &self,
        target: Vref,
        method: &str,
        args: Vec<CapValue>,
    ) -> Result<PromiseHandle, SendError> {
        let (result_vref, handle) = self.with_core(|core| {
            let vref = core.registry.allocate_promise();
            let (handle, resolver) = promise_kit();
            core.registry.register_promise(vref, &handle, false, Some(resolver));
            (vref, handle)
        });
        let argdata = self.serialize_for_send(&CapValue::List(args))?;
        let slots = argdata.slots.clone();
        self.with_core(|core| {
            core.report.sends += 1;
            core.syscall.send(target, method, argdata, Some(result_vref));
            core.registry.queue_subscribe(result_vref);
        });
        self.emit_known_resolutions(&slots);
        Ok(handle)
    }

    fn serialize_for_send(&self, value: &CapValue) -> Result<vat_wire::CapData, SendError> {
        match marshal::serialize(self, value) {
            Ok(data) => Ok(data),
            Err(MarshalError::Slot(SlotError::DisavowedReference)) => {
                self.terminate_failure("disavowed presence in send arguments");
                Err(SendError::Slot(SlotError::DisavowedReference))
            }
            Err(MarshalError::Slot(err)) => Err(SendError::Slot(err)),
            Err(err) => Err(SendError::Marshal(err.to_string())),
        }
    }

    /// Opportunistically tell the kernel about settlements it has not seen,
    /// discovered among the given slots.
    pub(crate) fn emit_known_resolutions(&self, slots: &[Vref]) {
        match marshal::collect_known_resolutions(self, slots) {
            Ok(batch) if !batch.is_empty() => {
                self.with_core(|core| {
                    for resolution in &batch {
                        core.registry.retire_promise(&resolution.vpid);
                    }
                    core.report.resolves += 1;
                    core.syscall.resolve(batch);
                });
            }
            Ok(_) => {}
            Err(err) => {
                self.terminate_failure(&format!("failed to serialize known resolutions: {err}"));
            }
        }
    }

    fn send_to_promise(
        &self,
        promise: &PromiseHandle,
        method: &str,
        args: Vec<CapValue>,
    ) -> Result<PromiseHandle, SendError> {
        if let Some((rejected, value)) = promise.settlement() {
            // Shorten through the recorded resolution.
            let (handle, resolver) = promise_kit();
            if rejected {
                resolver.reject(self, value);
            } else if value.as_slot().is_some() {
                return self.send(&value, MethodName::Str(method.to_owned()), args);
            } else {
                resolver.reject(
                    self,
                    CapValue::string("cannot deliver to a non-capability resolution"),
                );
            }
            return Ok(handle);
        }
        let registered = self.with_core(|core| {
            core.registry
                .slot_for_val(&SlotValue::Promise(promise.clone()))
        });
        if let Some(vpid) = registered {
            return self.pipeline_send(vpid, promise, method, args);
        }
        // Unregistered local promise: hold the send until it settles.
        let (handle, resolver) = promise_kit();
        let method = method.to_owned();
        promise.when(self, move |ctx, settled| match settled {
            Ok(value) => forward_send(ctx, &resolver, &value, method, args),
            Err(reason) => resolver.reject(ctx, reason),
        });
        Ok(handle)
    }

    /// Pipelining: target the send at the unresolved promise's own vref.
    /// Using this handler after resolution is a programming error.
    fn pipeline_send(
        &self,
        vpid: Vref,
        promise: &PromiseHandle,
        method: &str,
        args: Vec<CapValue>,
    ) -> Result<PromiseHandle, SendError> {
        if promise.is_settled() {
            return Err(SendError::HandlerAfterResolution);
        }
        self.kernel_send(vpid, method, args)
    }

    /// Deliver locally to a remotable in a fresh turn.
    fn local_send(
        &self,
        remotable: Rc<Remotable>,
        method: String,
        args: Vec<CapValue>,
    ) -> PromiseHandle {
        let (handle, resolver) = promise_kit();
        self.schedule(move |ctx| {
            let outcome = remotable.behavior().invoke(&method, args, ctx);
            connect_local(ctx, resolver, outcome);
        });
        handle
    }

    /// Deliver locally to a virtual representative in a fresh turn.
    fn local_send_virtual(
        &self,
        rep: Rc<crate::vobj::Representative>,
        method: String,
        args: Vec<CapValue>,
    ) -> PromiseHandle {
        let (handle, resolver) = promise_kit();
        self.schedule(move |ctx| {
            let behavior = ctx.with_core(|core| core.vom.kind_behavior(rep.kind()));
            let outcome = match behavior {
                Some(behavior) => behavior.invoke(&rep, &method, args, ctx),
                None => MethodOutcome::Reject(CapValue::string("internal: unknown virtual kind")),
            };
            connect_local(ctx, resolver, outcome);
        });
        handle
    }
}

/// Re-issue a held send once its promise target settles.
fn forward_send(
    ctx: &VatCtx,
    resolver: &ResolverHandle,
    value: &CapValue,
    method: String,
    args: Vec<CapValue>,
) {
    match ctx.send(value, MethodName::Str(method), args) {
        Ok(result) => {
            let resolver = resolver.clone();
            result.when(ctx, move |ctx, settled| match settled {
                Ok(value) => resolver.fulfill(ctx, value),
                Err(reason) => resolver.reject(ctx, reason),
            });
        }
        Err(err) => resolver.reject(ctx, CapValue::string(err.to_string())),
    }
}

/// Wire a local method outcome into a resolver.
pub(crate) fn connect_local(ctx: &VatCtx, resolver: ResolverHandle, outcome: MethodOutcome) {
    match outcome {
        MethodOutcome::Fulfill(value) => resolver.fulfill(ctx, value),
        MethodOutcome::Reject(reason) => resolver.reject(ctx, reason),
        MethodOutcome::Defer(promise) => {
            promise.when(ctx, move |ctx, settled| match settled {
                Ok(value) => resolver.fulfill(ctx, value),
                Err(reason) => resolver.reject(ctx, reason),
            });
        }
    }
}
