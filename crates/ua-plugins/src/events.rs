//! System event subscriptions
//!
//! Events are flat key/value sets where each key may carry a namespace
//! (`tns1`, `tnsaxis`). A subscriber's callback receives its own copy of each
//! matching event and owns it until it is dropped.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use ua_core::{Error, Result};

pub const TNS1: &str = "tns1";
pub const TNSAXIS: &str = "tnsaxis";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        EventValue::String(v.to_string())
    }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self {
        EventValue::String(v)
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        EventValue::Int(v)
    }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        EventValue::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EventEntry {
    namespace: Option<String>,
    value: EventValue,
}

/// One delivered event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    entries: BTreeMap<String, EventEntry>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, namespace: Option<&str>, value: impl Into<EventValue>) -> Self {
        self.insert(key, namespace, value);
        self
    }

    pub fn insert(&mut self, key: &str, namespace: Option<&str>, value: impl Into<EventValue>) {
        self.entries.insert(
            key.to_string(),
            EventEntry {
                namespace: namespace.map(str::to_string),
                value: value.into(),
            },
        );
    }

    pub fn value(&self, key: &str) -> Option<&EventValue> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn namespace(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|e| e.namespace.as_deref())
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.value(key) {
            Some(EventValue::String(s)) => Ok(s),
            Some(_) => Err(Error::invalid_argument(format!("event key '{}' is not a string", key))),
            None => Err(Error::not_found(format!("event key '{}'", key))),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.value(key) {
            Some(EventValue::Int(v)) => Ok(*v),
            Some(_) => Err(Error::invalid_argument(format!("event key '{}' is not an integer", key))),
            None => Err(Error::not_found(format!("event key '{}'", key))),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.value(key) {
            Some(EventValue::Bool(v)) => Ok(*v),
            Some(_) => Err(Error::invalid_argument(format!("event key '{}' is not a boolean", key))),
            None => Err(Error::not_found(format!("event key '{}'", key))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterEntry {
    key: String,
    namespace: Option<String>,
    value: Option<EventValue>,
}

/// Conjunction of key matches; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    entries: Vec<FilterEntry>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to be present, optionally with a namespace and value
    pub fn with(mut self, key: &str, namespace: Option<&str>, value: Option<EventValue>) -> Self {
        self.entries.push(FilterEntry {
            key: key.to_string(),
            namespace: namespace.map(str::to_string),
            value,
        });
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.entries.iter().all(|f| match event.entries.get(&f.key) {
            None => false,
            Some(entry) => {
                let ns_ok = f.namespace.is_none() || f.namespace == entry.namespace;
                let value_ok = f.value.as_ref().map(|v| *v == entry.value).unwrap_or(true);
                ns_ok && value_ok
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type EventCallback = Arc<dyn Fn(SubscriptionId, Event) + Send + Sync>;

/// Subscribe/callback interface of the system event bus
pub trait EventService: Send + Sync {
    fn subscribe(&self, filter: EventFilter, callback: EventCallback) -> Result<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// In-process event bus
#[derive(Default)]
pub struct LocalEventBus {
    subscriptions: Mutex<HashMap<SubscriptionId, (EventFilter, EventCallback)>>,
    next_id: AtomicU64,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every matching subscriber on the calling thread,
    /// returning how many received it
    pub fn publish(&self, event: &Event) -> usize {
        let targets: Vec<(SubscriptionId, EventCallback)> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, (filter, _))| filter.matches(event))
            .map(|(id, (_, callback))| (*id, callback.clone()))
            .collect();

        for (id, callback) in &targets {
            callback(*id, event.clone());
        }
        targets.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl EventService for LocalEventBus {
    fn subscribe(&self, filter: EventFilter, callback: EventCallback) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.subscriptions.lock().insert(id, (filter, callback));
        debug!("Event subscription {} added", id);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.subscriptions
            .lock()
            .remove(&id)
            .map(|_| debug!("Event subscription {} removed", id))
            .ok_or_else(|| Error::not_found(format!("subscription {}", id)))
    }
}
