// CLASSIFICATION: COMMUNITY
// Filename: promise.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-18

//! Local promise machinery.
//!
//! A vat promise is a single-threaded settle-once cell. Reactions registered
//! before settlement are queued; settlement schedules every reaction as its
//! own turn, preserving the one-logical-stream execution model. Once
//! settled, the recorded outcome stays readable synchronously; the
//! resolution collector depends on that.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dispatch::VatCtx;
use crate::value::{CapValue, ValKey};

/// A reaction to promise settlement, run as its own turn.
pub type Reaction = Box<dyn FnOnce(&VatCtx, Result<CapValue, CapValue>)>;

enum PromiseBody {
    Unresolved { reactions: Vec<Reaction> },
    Fulfilled(CapValue),
    Rejected(CapValue),
}

struct PromiseState {
    body: PromiseBody,
}

/// A strong handle to a vat promise.
#[derive(Clone)]
pub struct PromiseHandle(Rc<RefCell<PromiseState>>);

/// A weak handle to a vat promise.
#[derive(Clone)]
pub struct WeakPromiseHandle(Weak<RefCell<PromiseState>>);

impl WeakPromiseHandle {
    /// Attempt to recover the strong handle.
    #[must_use]
    pub fn upgrade(&self) -> Option<PromiseHandle> {
        self.0.upgrade().map(PromiseHandle)
    }
}

/// The settle side of a promise; held by whoever decides it.
#[derive(Clone)]
pub struct ResolverHandle(Rc<RefCell<PromiseState>>);

/// Create a promise together with its resolver.
#[must_use]
pub fn promise_kit() -> (PromiseHandle, ResolverHandle) {
    let state = Rc::new(RefCell::new(PromiseState {
        body: PromiseBody::Unresolved {
            reactions: Vec::new(),
        },
    }));
    (PromiseHandle(Rc::clone(&state)), ResolverHandle(state))
}

impl PromiseHandle {
    /// Pointer identity of the promise cell.
    #[must_use]
    pub fn key(&self) -> ValKey {
        ValKey(Rc::as_ptr(&self.0) as *const () as usize)
    }

    /// Downgrade to a weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakPromiseHandle {
        WeakPromiseHandle(Rc::downgrade(&self.0))
    }

    /// True once the promise has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.0.borrow().body, PromiseBody::Unresolved { .. })
    }

    /// The recorded outcome: `(rejected, value)` once settled.
    #[must_use]
    pub fn settlement(&self) -> Option<(bool, CapValue)> {
        match &self.0.borrow().body {
            PromiseBody::Unresolved { .. } => None,
            PromiseBody::Fulfilled(v) => Some((false, v.clone())),
            PromiseBody::Rejected(v) => Some((true, v.clone())),
        }
    }

    /// Register a settlement reaction. Runs as its own turn; if the promise
    /// has already settled the reaction is scheduled immediately.
    pub fn when(
        &self,
        ctx: &VatCtx,
        reaction: impl FnOnce(&VatCtx, Result<CapValue, CapValue>) + 'static,
    ) {
        let mut reaction = Some(reaction);
        let outcome = {
            let mut state = self.0.borrow_mut();
            match &mut state.body {
                PromiseBody::Unresolved { reactions } => {
                    reactions.push(Box::new(reaction.take().unwrap()));
                    None
                }
                PromiseBody::Fulfilled(v) => Some(Ok(v.clone())),
                PromiseBody::Rejected(v) => Some(Err(v.clone())),
            }
        };
        if let Some(outcome) = outcome {
            let reaction = reaction.take().unwrap();
            ctx.schedule(move |ctx| reaction(ctx, outcome));
        }
    }
}

impl ResolverHandle {
    /// A handle to the promise this resolver settles.
    #[must_use]
    pub fn promise(&self) -> PromiseHandle {
        PromiseHandle(Rc::clone(&self.0))
    }

    /// Settle with a value. Settling twice is a no-op.
    pub fn fulfill(&self, ctx: &VatCtx, value: CapValue) {
        self.settle(ctx, false, value);
    }

    /// Settle with a rejection reason. Settling twice is a no-op.
    pub fn reject(&self, ctx: &VatCtx, reason: CapValue) {
        self.settle(ctx, true, reason);
    }

    /// Settle with an explicit rejection flag.
    pub fn settle(&self, ctx: &VatCtx, rejected: bool, value: CapValue) {
        let reactions = {
            let mut state = self.0.borrow_mut();
            let prev = std::mem::replace(
                &mut state.body,
                PromiseBody::Unresolved {
                    reactions: Vec::new(),
                },
            );
            match prev {
                PromiseBody::Unresolved { reactions } => {
                    state.body = if rejected {
                        PromiseBody::Rejected(value.clone())
                    } else {
                        PromiseBody::Fulfilled(value.clone())
                    };
                    reactions
                }
                settled => {
                    state.body = settled;
                    log::debug!("promise settled twice; second settlement ignored");
                    return;
                }
            }
        };
        for reaction in reactions {
            let outcome = if rejected {
                Err(value.clone())
            } else {
                Ok(value.clone())
            };
            ctx.schedule(move |ctx| reaction(ctx, outcome));
        }
    }
}

impl fmt::Debug for PromiseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.0.borrow().body {
            PromiseBody::Unresolved { .. } => "unresolved",
            PromiseBody::Fulfilled(_) => "fulfilled",
            PromiseBody::Rejected(_) => "rejected",
        };
        write!(f, "PromiseHandle({state})")
    }
}

impl fmt::Debug for ResolverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResolverHandle")
    }
}

impl fmt::Debug for WeakPromiseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakPromiseHandle")
    }
}
