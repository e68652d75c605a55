//! Field value store with synchronous change notification
//!
//! A [`FormValueStore`] holds the current externalized value of every field in one
//! form-filling session. Each session constructs its own store; clones of a store are
//! handles to the same values.
//!
//! # Invariants
//!
//! 1. [`FormValueStore::set_value`] notifies every listener registered at the time of
//!    the call before it returns.
//! 2. A listener invoked for a write observes that write in [`FormValueStore::get_values`].
//! 3. Snapshots returned by `get_values` never change after they are returned; writes
//!    produce a fresh map whenever a snapshot is still held.
//! 4. Listeners may write to the store from inside their callback (nested notification).

use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Field identifier to current externalized value
pub type FieldValues = AHashMap<String, String>;

/// Immutable snapshot of all field values
pub type Snapshot = Rc<FieldValues>;

type Listener = Rc<dyn Fn(&FormValueStore)>;

#[derive(Default)]
struct StoreInner {
    values: RefCell<Snapshot>,
    listeners: RefCell<Vec<(u64, Listener)>>,
    next_listener_id: Cell<u64>,
}

/// Shared, single-threaded field value store
#[derive(Clone, Default)]
pub struct FormValueStore {
    inner: Rc<StoreInner>,
}

impl FormValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with persisted values (no notification)
    pub fn with_values(values: FieldValues) -> Self {
        let store = Self::new();
        *store.inner.values.borrow_mut() = Rc::new(values);
        store
    }

    /// Replace the value of `id` and synchronously notify all listeners
    pub fn set_value(&self, id: impl Into<String>, value: impl Into<String>) {
        let id = id.into();
        let value = value.into();
        log::trace!("store: {} = {:?}", id, value);

        {
            let mut values = self.inner.values.borrow_mut();
            Rc::make_mut(&mut values).insert(id, value);
        }

        self.emit();
    }

    /// Write `value` only when `id` has no entry yet. Returns whether it was written.
    pub fn set_default(&self, id: &str, value: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.set_value(id, value);
        true
    }

    /// Snapshot of all values at call time
    pub fn get_values(&self) -> Snapshot {
        Rc::clone(&self.inner.values.borrow())
    }

    /// Current value of a single field
    pub fn get_value(&self, id: &str) -> Option<String> {
        self.inner.values.borrow().get(id).cloned()
    }

    /// Whether `id` has an entry
    pub fn contains(&self, id: &str) -> bool {
        self.inner.values.borrow().contains_key(id)
    }

    /// Register a listener invoked after every future [`set_value`](Self::set_value).
    ///
    /// The listener stays registered until the returned [`Subscription`] is dropped or
    /// [`Subscription::unsubscribe`] is called. Notification order between listeners is
    /// unspecified.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&FormValueStore) + 'static,
    {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));

        Subscription {
            store: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn emit(&self) {
        // Listeners may subscribe, unsubscribe or write while being notified
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        for listener in listeners {
            listener(self);
        }
    }
}

impl fmt::Debug for FormValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormValueStore")
            .field("values", &*self.inner.values.borrow())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration handle returned by [`FormValueStore::subscribe`]; unsubscribes on drop
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner
                .listeners
                .borrow_mut()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let store = FormValueStore::new();
        assert!(store.get_values().is_empty());

        store.set_value("a", "1");
        store.set_value("a", "2");
        store.set_value("b", "x");

        assert_eq!(store.get_value("a").as_deref(), Some("2"));
        assert_eq!(store.get_values().len(), 2);
        assert!(store.contains("b"));
        assert!(!store.contains("c"));
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let store = FormValueStore::new();
        store.set_value("x", "1");
        let before = store.get_values();
        store.set_value("x", "2");

        assert_eq!(before.get("x").map(String::as_str), Some("1"));
        assert_eq!(store.get_values().get("x").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_listeners_observe_the_write() {
        let store = FormValueStore::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        let _first = store.subscribe(move |s| {
            log.borrow_mut().push(s.get_values().get("x").cloned());
        });
        let log = Rc::clone(&seen);
        let _second = store.subscribe(move |s| {
            log.borrow_mut().push(s.get_value("x"));
        });

        store.set_value("x", "5");

        assert_eq!(
            *seen.borrow(),
            vec![Some("5".to_string()), Some("5".to_string())]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let store = FormValueStore::new();
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        let sub = store.subscribe(move |_| counter.set(counter.get() + 1));
        store.set_value("a", "1");
        assert_eq!(store.listener_count(), 1);

        sub.unsubscribe();
        store.set_value("a", "2");

        assert_eq!(calls.get(), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let store = FormValueStore::new();
        {
            let _sub = store.subscribe(|_| {});
            assert_eq!(store.listener_count(), 1);
        }
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_nested_writes_from_listener() {
        let store = FormValueStore::new();
        let _derive = store.subscribe(|s| {
            let source = s.get_value("source").unwrap_or_default();
            let doubled = format!("{}{}", source, source);
            if s.get_value("derived").as_deref() != Some(doubled.as_str()) {
                s.set_value("derived", doubled);
            }
        });

        store.set_value("source", "ab");
        assert_eq!(store.get_value("derived").as_deref(), Some("abab"));
    }

    #[test]
    fn test_set_default() {
        let store = FormValueStore::new();
        assert!(store.set_default("f", "persisted"));
        assert!(!store.set_default("f", "other"));
        assert_eq!(store.get_value("f").as_deref(), Some("persisted"));
    }

    #[test]
    fn test_clones_share_values() {
        let store = FormValueStore::new();
        let handle = store.clone();
        handle.set_value("k", "v");
        assert_eq!(store.get_value("k").as_deref(), Some("v"));

        let other_session = FormValueStore::new();
        assert!(!other_session.contains("k"));
    }

    #[test]
    fn test_with_values() {
        let mut values = FieldValues::new();
        values.insert("a".into(), "1".into());
        let store = FormValueStore::with_values(values);
        assert_eq!(store.get_value("a").as_deref(), Some("1"));
    }
}
