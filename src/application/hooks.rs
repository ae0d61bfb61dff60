//! Process-local extension registry.
//!
//! Filters thread an accumulating value through every subscriber of a hook in
//! registration order; notifications fan an event out to every subscriber.
//! A subscriber that errors or panics contributes nothing and the pass goes
//! on with the value it was given.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use thiserror::Error;
use tracing::{trace, warn};

use crate::cache::{rw_read, rw_write};
use crate::domain::entities::Record;
use crate::domain::types::Capability;

use super::authz::GrantContext;

const SOURCE: &str = "application::hooks";
pub(crate) const METRIC_HOOK_SUBSCRIBER_ERROR: &str = "tenantry_hook_subscriber_error_total";

/// Event suffix of a hook name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeInsert,
    Created,
    Updated,
    Deleted,
    Can(Capability),
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::BeforeInsert => "beforeInsert",
            HookEvent::Created => "created",
            HookEvent::Updated => "updated",
            HookEvent::Deleted => "deleted",
            HookEvent::Can(capability) => capability.hook_suffix(),
        }
    }
}

/// `<entity>.<event>`; namespacing by entity keeps unrelated types apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookName(String);

impl HookName {
    pub fn new(entity: &str, event: HookEvent) -> Self {
        Self(format!("{entity}.{}", event.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("subscriber `{subscriber}` failed: {message}")]
    Subscriber { subscriber: String, message: String },
}

impl HookError {
    pub fn failed(subscriber: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Subscriber {
            subscriber: subscriber.into(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait Filter<V, C>: Send + Sync
where
    V: Send + 'static,
    C: Sync,
{
    fn name(&self) -> &str;

    /// Returns the value for the next subscriber.
    async fn apply(&self, value: V, context: &C) -> Result<V, HookError>;
}

#[async_trait]
pub trait Listener<E>: Send + Sync
where
    E: Sync,
{
    fn name(&self) -> &str;

    async fn notify(&self, event: &E) -> Result<(), HookError>;
}

struct FnFilter<F> {
    name: &'static str,
    f: F,
}

#[async_trait]
impl<V, C, F> Filter<V, C> for FnFilter<F>
where
    V: Send + 'static,
    C: Sync,
    F: Fn(V, &C) -> Result<V, HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn apply(&self, value: V, context: &C) -> Result<V, HookError> {
        (self.f)(value, context)
    }
}

struct FnListener<F> {
    name: &'static str,
    f: F,
}

#[async_trait]
impl<E, F> Listener<E> for FnListener<F>
where
    E: Sync,
    F: Fn(&E) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn notify(&self, event: &E) -> Result<(), HookError> {
        (self.f)(event)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "subscriber panicked".to_string()
    }
}

fn subscriber_failure(hook: &HookName, subscriber: &str, message: &str) {
    counter!(METRIC_HOOK_SUBSCRIBER_ERROR, "hook" => hook.to_string()).increment(1);
    warn!(
        hook = %hook,
        subscriber,
        error = message,
        result = "no_contribution",
        "Extension subscriber failed"
    );
}

/// Ordered filter chains keyed by hook name.
pub struct FilterRegistry<V, C>
where
    V: Clone + Send + 'static,
    C: Sync,
{
    chains: RwLock<HashMap<HookName, Vec<Arc<dyn Filter<V, C>>>>>,
}

impl<V, C> Default for FilterRegistry<V, C>
where
    V: Clone + Send + 'static,
    C: Sync,
{
    fn default() -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
        }
    }
}

impl<V, C> FilterRegistry<V, C>
where
    V: Clone + Send + 'static,
    C: Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter(&self, hook: HookName, filter: Arc<dyn Filter<V, C>>) {
        rw_write(&self.chains, SOURCE, "add_filter")
            .entry(hook)
            .or_default()
            .push(filter);
    }

    pub fn add_filter_fn<F>(&self, hook: HookName, name: &'static str, f: F)
    where
        F: Fn(V, &C) -> Result<V, HookError> + Send + Sync + 'static,
        C: 'static,
    {
        self.add_filter(hook, Arc::new(FnFilter { name, f }));
    }

    pub fn subscriber_count(&self, hook: &HookName) -> usize {
        rw_read(&self.chains, SOURCE, "subscriber_count")
            .get(hook)
            .map_or(0, Vec::len)
    }

    fn snapshot(&self, hook: &HookName) -> Vec<Arc<dyn Filter<V, C>>> {
        rw_read(&self.chains, SOURCE, "snapshot")
            .get(hook)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs the chain, passing each subscriber's output to the next.
    pub async fn publish(&self, hook: &HookName, initial: V, context: &C) -> V {
        self.publish_with(hook, initial, context, |_, _, next| next)
            .await
    }

    /// Runs the chain with `merge(subscriber, previous, output)` deciding the
    /// value handed on after each subscriber.
    pub async fn publish_with<M>(&self, hook: &HookName, initial: V, context: &C, merge: M) -> V
    where
        M: Fn(&str, V, V) -> V + Send,
    {
        let mut current = initial;
        for filter in self.snapshot(hook) {
            let outcome = AssertUnwindSafe(filter.apply(current.clone(), context))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(next)) => {
                    trace!(hook = %hook, subscriber = filter.name(), "Filter applied");
                    current = merge(filter.name(), current, next);
                }
                Ok(Err(err)) => subscriber_failure(hook, filter.name(), &err.to_string()),
                Err(panic) => subscriber_failure(hook, filter.name(), &panic_message(&*panic)),
            }
        }
        current
    }
}

/// Fan-out notifications keyed by hook name.
pub struct NotificationRegistry<E>
where
    E: Sync,
{
    listeners: RwLock<HashMap<HookName, Vec<Arc<dyn Listener<E>>>>>,
}

impl<E> Default for NotificationRegistry<E>
where
    E: Sync,
{
    fn default() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }
}

impl<E> NotificationRegistry<E>
where
    E: Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, hook: HookName, listener: Arc<dyn Listener<E>>) {
        rw_write(&self.listeners, SOURCE, "add_listener")
            .entry(hook)
            .or_default()
            .push(listener);
    }

    pub fn add_listener_fn<F>(&self, hook: HookName, name: &'static str, f: F)
    where
        F: Fn(&E) -> Result<(), HookError> + Send + Sync + 'static,
        E: 'static,
    {
        self.add_listener(hook, Arc::new(FnListener { name, f }));
    }

    pub fn subscriber_count(&self, hook: &HookName) -> usize {
        rw_read(&self.listeners, SOURCE, "subscriber_count")
            .get(hook)
            .map_or(0, Vec::len)
    }

    /// Notifies every listener; returns how many completed without failure.
    pub async fn publish(&self, hook: &HookName, event: &E) -> usize {
        let listeners = rw_read(&self.listeners, SOURCE, "publish")
            .get(hook)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for listener in listeners {
            match AssertUnwindSafe(listener.notify(event)).catch_unwind().await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => subscriber_failure(hook, listener.name(), &err.to_string()),
                Err(panic) => {
                    subscriber_failure(hook, listener.name(), &panic_message(&*panic))
                }
            }
        }
        delivered
    }
}

/// Context of `<entity>.beforeInsert`: the caller's unrestricted data.
#[derive(Debug, Clone)]
pub struct InsertContext {
    pub entity: &'static str,
    pub data: Record,
}

/// Payload of `<entity>.created|updated|deleted`.
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub entity: &'static str,
    pub id: i64,
    pub record: Record,
}

/// Every hook the core publishes, constructed once and injected.
#[derive(Default)]
pub struct ExtensionRegistry {
    pub payloads: FilterRegistry<Record, InsertContext>,
    pub grants: FilterRegistry<bool, GrantContext>,
    pub events: NotificationRegistry<EntityEvent>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn hook() -> HookName {
        HookName::new("widget", HookEvent::BeforeInsert)
    }

    #[test]
    fn hook_names_are_namespaced_by_entity() {
        assert_eq!(hook().as_str(), "widget.beforeInsert");
        assert_eq!(
            HookName::new("customer", HookEvent::Can(Capability::View)).as_str(),
            "customer.canView"
        );
        assert_eq!(
            HookName::new("customer", HookEvent::Created).as_str(),
            "customer.created"
        );
    }

    #[tokio::test]
    async fn filters_run_in_registration_order() {
        let registry: FilterRegistry<Vec<u8>, ()> = FilterRegistry::new();
        registry.add_filter_fn(hook(), "one", |mut value, _| {
            value.push(1);
            Ok(value)
        });
        registry.add_filter_fn(hook(), "two", |mut value, _| {
            value.push(2);
            Ok(value)
        });

        assert_eq!(registry.publish(&hook(), Vec::new(), &()).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn failing_filter_passes_previous_value_on() {
        let registry: FilterRegistry<i32, ()> = FilterRegistry::new();
        registry.add_filter_fn(hook(), "double", |value, _| Ok(value * 2));
        registry.add_filter_fn(hook(), "broken", |_, _| Err(HookError::failed("broken", "nope")));
        registry.add_filter_fn(hook(), "panics", |_, _| panic!("subscriber bug"));
        registry.add_filter_fn(hook(), "increment", |value, _| Ok(value + 1));

        assert_eq!(registry.publish(&hook(), 5, &()).await, 11);
    }

    #[tokio::test]
    async fn filters_receive_context() {
        let registry: FilterRegistry<String, String> = FilterRegistry::new();
        registry.add_filter_fn(hook(), "append", |value, context: &String| {
            Ok(format!("{value}{context}"))
        });
        assert_eq!(
            registry
                .publish(&hook(), "a".to_string(), &"b".to_string())
                .await,
            "ab"
        );
    }

    #[tokio::test]
    async fn unknown_hook_returns_initial_value() {
        let registry: FilterRegistry<i32, ()> = FilterRegistry::new();
        assert_eq!(registry.publish(&hook(), 3, &()).await, 3);
        assert_eq!(registry.subscriber_count(&hook()), 0);
    }

    #[tokio::test]
    async fn notifications_reach_every_listener() {
        let registry: NotificationRegistry<i64> = NotificationRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let hook = HookName::new("widget", HookEvent::Created);

        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            registry.add_listener_fn(hook.clone(), name, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        registry.add_listener_fn(hook.clone(), "broken", |_| {
            Err(HookError::failed("broken", "unavailable"))
        });

        assert_eq!(registry.publish(&hook, &7).await, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
