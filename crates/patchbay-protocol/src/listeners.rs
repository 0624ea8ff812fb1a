//! Ordered listener registry keyed by event type.
//!
//! The registry is an ordered multimap: duplicates are allowed, removal
//! takes the first match, and dispatch works on a snapshot so callbacks may
//! add or remove listeners mid-dispatch without affecting the current
//! round. Single-use listeners deregister themselves before their callback
//! runs, so they fire at most once no matter how often their event type is
//! dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// Identity of one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

enum Callback {
    Repeating(Box<dyn FnMut(&Value) + Send>),
    /// Taken on first dispatch; `None` afterwards.
    Once(Option<Box<dyn FnOnce(&Value) + Send>>),
}

struct Entry {
    handle: ListenerHandle,
    single_use: bool,
    callback: Mutex<Callback>,
}

/// Keyed multimap of callback subscriptions.
#[derive(Default)]
pub struct EventListenerList {
    listeners: Mutex<HashMap<String, Vec<Arc<Entry>>>>,
    next_handle: AtomicU64,
}

impl EventListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event_type`. No dedup; each add needs a
    /// matching remove.
    pub fn add(
        &self,
        event_type: &str,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> ListenerHandle {
        self.insert(event_type, false, Callback::Repeating(Box::new(callback)))
    }

    /// Append a listener that removes itself before its first invocation.
    pub fn add_single_use(
        &self,
        event_type: &str,
        callback: impl FnOnce(&Value) + Send + 'static,
    ) -> ListenerHandle {
        self.insert(event_type, true, Callback::Once(Some(Box::new(callback))))
    }

    fn insert(&self, event_type: &str, single_use: bool, callback: Callback) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            handle,
            single_use,
            callback: Mutex::new(callback),
        });
        self.listeners
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push(entry);
        handle
    }

    /// Remove the first listener matching `handle`. Idempotent.
    pub fn remove(&self, event_type: &str, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event_type) else {
            return false;
        };
        let Some(index) = entries.iter().position(|e| e.handle == handle) else {
            return false;
        };
        entries.remove(index);
        if entries.is_empty() {
            listeners.remove(event_type);
        }
        true
    }

    /// Invoke every listener registered for `event_type`, in insertion
    /// order, against a snapshot of the current list. The registry lock is
    /// not held while callbacks run.
    pub fn dispatch(&self, event_type: &str, payload: &Value) {
        let snapshot: Vec<Arc<Entry>> = match self.listeners.lock().get(event_type) {
            Some(entries) => entries.clone(),
            None => return,
        };

        for entry in snapshot {
            if entry.single_use {
                // Deregister first so a reply arriving twice is dropped.
                self.remove(event_type, entry.handle);
            }
            let mut callback = entry.callback.lock();
            match &mut *callback {
                Callback::Repeating(cb) => cb(payload),
                Callback::Once(cb) => {
                    if let Some(cb) = cb.take() {
                        cb(payload);
                    }
                }
            }
        }
    }

    /// Current number of listeners for `event_type`.
    pub fn count_for(&self, event_type: &str) -> usize {
        self.listeners
            .lock()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Drop every registration, severing listener/owner reference cycles.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}
