// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed fan-out for intra-agent telemetry.
//!
//! Dispatch is synchronous, per kind, in registration order.  A panicking
//! handler is caught and logged so its siblings still run.  Listener lists
//! are bounded; when a kind is full the oldest listener is dropped.  The
//! bus never persists anything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::events::{Event, EventKind};

const MAX_LISTENERS_PER_KIND: usize = 64;

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; dropping it does nothing,
/// call [`Subscription::unsubscribe`] to detach the handler.
pub struct Subscription {
    bus: Arc<Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut listeners = self.bus.lock().unwrap();
        if let Some(list) = listeners.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: Arc<Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.  Handlers run synchronously in
    /// registration order on the emitter's task.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap();
        let list = listeners.entry(kind).or_default();
        if list.len() >= MAX_LISTENERS_PER_KIND {
            warn!(kind = kind.as_str(), "listener list full; dropping oldest");
            list.remove(0);
        }
        list.push((id, Arc::new(handler)));
        Subscription {
            bus: Arc::clone(&self.listeners),
            kind,
            id,
        }
    }

    /// Dispatch `event` to every subscriber of its kind.  A panicking
    /// handler does not affect its siblings.
    pub fn emit(&self, event: &Event) {
        let handlers: Vec<Handler> = {
            let listeners = self.listeners.lock().unwrap();
            match listeners.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(event);
            }));
            if result.is_err() {
                warn!(kind = event.kind().as_str(), "event handler panicked");
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(&kind)
            .map_or(0, |l| l.len())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
