// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Cooperative cancellation shared by stream consumption, tool execution,
//! and agent delegation.
//!
//! Tokens compose hierarchically: a child token observes its parent's
//! signal, but signalling a child never affects the parent.  Signalling is
//! idempotent and the first reason wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Why a token was signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit cancellation by a caller or a parent scope.
    Cancelled,
    /// A deadline elapsed; surfaced with the same mechanics as cancellation.
    TimedOut,
}

/// Error returned by [`CancellationToken::check`] once the token is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled ({reason:?})")]
pub struct Cancelled {
    pub reason: CancelReason,
}

#[derive(Debug)]
struct Inner {
    aborted: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn is_aborted(&self) -> bool {
        if self.aborted.load(Ordering::SeqCst) {
            return true;
        }
        match &self.parent {
            Some(p) => p.is_aborted(),
            None => false,
        }
    }

    fn reason(&self) -> Option<CancelReason> {
        if self.aborted.load(Ordering::SeqCst) {
            return *self.reason.lock().unwrap();
        }
        self.parent.as_ref().and_then(|p| p.reason())
    }
}

/// Shared cancellation flag with parent→child propagation.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                parent: None,
            }),
        }
    }

    /// Derive a child token.  The child observes this token's signal; the
    /// reverse does not hold.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                parent: Some(Arc::clone(&self.inner)),
            }),
        }
    }

    /// Signal cancellation.  Idempotent; the first reason recorded wins.
    pub fn signal(&self, reason: CancelReason) {
        let mut r = self.inner.reason.lock().unwrap();
        if r.is_none() {
            *r = Some(reason);
        }
        drop(r);
        self.inner.aborted.store(true, Ordering::SeqCst);
    }

    /// Signal plain cancellation.
    pub fn cancel(&self) {
        self.signal(CancelReason::Cancelled);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.is_aborted()
    }

    /// The recorded reason, walking up to the nearest signalled ancestor.
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason()
    }

    /// Return `Err(Cancelled)` once the token (or an ancestor) is signalled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_aborted() {
            Err(Cancelled {
                reason: self.reason().unwrap_or(CancelReason::Cancelled),
            })
        } else {
            Ok(())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
