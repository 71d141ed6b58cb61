//! Synchronous named-topic publish/subscribe (spec C1).
//!
//! A handler panic is caught and logged; it never prevents later handlers in
//! the same emission from running.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

pub type Handler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Vec<Handler>>,
}

/// Synchronous event bus shared by every component that needs to report a
/// state change (`user:authenticated`, `access:denied`, `security:pattern_error`, ...).
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`. Returns a token usable with `off`.
    pub fn on<F>(&self, topic: &str, handler: F) -> Handler
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut reg = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        reg.handlers
            .entry(topic.to_string())
            .or_default()
            .push(handler.clone());
        handler
    }

    /// Unsubscribe a handler previously returned by `on`.
    pub fn off(&self, topic: &str, handler: &Handler) {
        let mut reg = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = reg.handlers.get_mut(topic) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Remove every handler for `topic`, or every handler on every topic when
    /// `topic` is `None`.
    pub fn remove_all(&self, topic: Option<&str>) {
        let mut reg = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match topic {
            Some(topic) => {
                reg.handlers.remove(topic);
            }
            None => reg.handlers.clear(),
        }
    }

    /// Emit `payload` to every handler subscribed to `topic`, in registration
    /// order. Takes a snapshot first so a handler may (un)subscribe mid-dispatch.
    pub fn emit(&self, topic: &str, payload: serde_json::Value) {
        let snapshot: Vec<Handler> = {
            let reg = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            reg.handlers.get(topic).cloned().unwrap_or_default()
        };
        for handler in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&payload)));
            if result.is_err() {
                crate::log(&format!("event handler for '{topic}' panicked"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_runs_handlers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.on("topic", move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.on("topic", move |_| o2.lock().unwrap().push(2));
        bus.emit("topic", serde_json::json!({}));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on("topic", |_| panic!("boom"));
        let c = count.clone();
        bus.on("topic", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("topic", serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_only_the_given_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let h1 = bus.on("topic", move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        bus.on("topic", move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });
        bus.off("topic", &h1);
        bus.emit("topic", serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn remove_all_clears_topic() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.on("topic", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.remove_all(Some("topic"));
        bus.emit("topic", serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
