// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Object identity and named event hooks shared by pipeline components.
//!
//! # Event hooks
//!
//! An [`EventHooks`] table maps event names to ordered lists of async
//! handlers. Tables are filled in while the bot is being assembled; at run
//! time the owning stage hands each occurrence to an [`EventDispatcher`],
//! which awaits the handlers one after another on its own task. Handlers run
//! in registration order, occurrences run in the order they were emitted, and
//! the emitting stage never waits for a handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Global counters
// ---------------------------------------------------------------------------

static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-wide unique object identifier.
pub fn obj_id() -> u64 {
    OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Event hooks
// ---------------------------------------------------------------------------

/// Type-erased async event handler. Receives the event payload.
pub type EventHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// How long [`EventDispatcher::shutdown`] waits for queued handlers.
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A table of named events and their handlers, shared by clones.
#[derive(Clone)]
pub struct EventHooks {
    owner: Arc<str>,
    table: Arc<Mutex<HashMap<String, Vec<EventHandler>>>>,
}

impl EventHooks {
    /// Create a table for `owner` that accepts the given event names.
    pub fn new(owner: impl Into<String>, events: &[&str]) -> Self {
        let table = events
            .iter()
            .map(|name| (name.to_string(), Vec::new()))
            .collect();
        Self {
            owner: Arc::from(owner.into()),
            table: Arc::new(Mutex::new(table)),
        }
    }

    /// Name of the component that owns the table.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Append `handler` to the list for `event`.
    ///
    /// Unknown event names are logged and ignored.
    pub fn add_event_handler<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |arg| Box::pin(handler(arg)));
        let mut table = self.lock();
        match table.get_mut(event) {
            Some(handlers) => handlers.push(handler),
            None => warn!(owner = %self.owner, event, "event handler for unknown event ignored"),
        }
    }

    /// Whether `event` is one of the table's event names.
    pub fn has_event(&self, event: &str) -> bool {
        self.lock().contains_key(event)
    }

    /// Number of handlers registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Snapshot of the handlers for `event`, in registration order.
    pub fn handlers(&self, event: &str) -> Vec<EventHandler> {
        self.lock().get(event).cloned().unwrap_or_default()
    }

    /// Run every handler for `event` in order, awaiting each.
    pub async fn call_event_handler(&self, event: &str, arg: Value) {
        let handlers = self.handlers(event);
        if handlers.is_empty() {
            trace!(owner = %self.owner, event, "no handlers registered");
            return;
        }
        debug!(owner = %self.owner, event, count = handlers.len(), "calling event handlers");
        for handler in handlers {
            handler(arg.clone()).await;
        }
    }

    /// Spawn a dispatcher task that runs occurrences in emission order.
    pub fn start_dispatcher(&self) -> EventDispatcher {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
        let hooks = self.clone();
        let task = tokio::spawn(async move {
            while let Some((event, arg)) = rx.recv().await {
                hooks.call_event_handler(&event, arg).await;
            }
        });
        EventDispatcher {
            owner: self.owner.clone(),
            tx: Some(tx),
            task: Some(task),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<EventHandler>>> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.lock();
        let mut events: Vec<(&String, usize)> =
            table.iter().map(|(name, list)| (name, list.len())).collect();
        events.sort();
        f.debug_struct("EventHooks")
            .field("owner", &self.owner)
            .field("events", &events)
            .finish()
    }
}

/// Sequential runner for event occurrences, owned by the emitting stage.
pub struct EventDispatcher {
    owner: Arc<str>,
    tx: Option<mpsc::UnboundedSender<(String, Value)>>,
    task: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Queue one occurrence of `event`. Never blocks.
    pub fn emit(&self, event: &str, arg: Value) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send((event.to_string(), arg)).is_err() {
            warn!(owner = %self.owner, event, "event dispatcher stopped; occurrence dropped");
        }
    }

    /// Stop accepting occurrences and let queued handlers finish.
    ///
    /// Handlers still running after a short grace period are aborted.
    pub async fn shutdown(&mut self) {
        self.tx.take();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!(owner = %self.owner, "event handlers did not finish; aborting");
                task.abort();
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("owner", &self.owner)
            .field("running", &self.task.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn obj_id_increments() {
        let a = obj_id();
        let b = obj_id();
        assert!(b > a);
    }

    #[test]
    fn unknown_event_is_ignored() {
        let hooks = EventHooks::new("test", &["on_ready"]);
        hooks.add_event_handler("on_missing", |_| async {});
        assert!(!hooks.has_event("on_missing"));
        assert_eq!(hooks.handler_count("on_ready"), 0);
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let hooks = EventHooks::new("test", &["on_ready"]);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            hooks.add_event_handler("on_ready", move |_| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(i);
                }
            });
        }
        hooks.call_event_handler("on_ready", Value::Null).await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn dispatcher_preserves_emission_order() {
        let hooks = EventHooks::new("test", &["a", "b"]);
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let log = log.clone();
            hooks.add_event_handler(name, move |arg| {
                let log = log.clone();
                async move {
                    // Slow handler to prove later events wait.
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().unwrap().push(format!("{name}:{arg}"));
                }
            });
        }

        let mut dispatcher = hooks.start_dispatcher();
        dispatcher.emit("a", Value::from(1));
        dispatcher.emit("b", Value::from(2));
        dispatcher.emit("a", Value::from(3));
        dispatcher.shutdown().await;

        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:2", "a:3"]);
    }

    #[tokio::test]
    async fn each_occurrence_runs_handlers_once() {
        let hooks = EventHooks::new("test", &["a"]);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        hooks.add_event_handler("a", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut dispatcher = hooks.start_dispatcher();
        dispatcher.emit("a", Value::Null);
        dispatcher.emit("a", Value::Null);
        dispatcher.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // After shutdown, emits are dropped silently.
        dispatcher.emit("a", Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
