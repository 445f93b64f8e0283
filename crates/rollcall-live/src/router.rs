//! Typed pub/sub registry.
//!
//! Subscribers register for one event kind or for [`Topic::Any`]. Dispatch
//! is synchronous: exact-kind subscribers first, then wildcard subscribers,
//! each group in registration order. A callback that errors or panics is
//! logged and counted; the remaining subscribers still run.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use rollcall_core::ids::SubscriptionId;
use rollcall_core::{EventKind, LiveEvent};
use tracing::{debug, warn};

/// Anything the router can fan out.
pub trait Routable: Send + Sync + 'static {
    type Kind: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// `None` for kinds the application does not know about. Such events
    /// only reach [`Topic::Any`] subscribers.
    fn kind(&self) -> Option<Self::Kind>;

    /// Wire name, for logs.
    fn label(&self) -> &str;
}

impl Routable for LiveEvent {
    type Kind = EventKind;

    fn kind(&self) -> Option<EventKind> {
        LiveEvent::kind(self)
    }

    fn label(&self) -> &str {
        self.event_type()
    }
}

/// What a subscriber listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topic<K> {
    Kind(K),
    /// Every event, including kinds unknown to this build.
    Any,
}

impl<K: Copy + Eq> Topic<K> {
    fn is_exact(&self, kind: Option<K>) -> bool {
        matches!((self, kind), (Topic::Kind(k), Some(actual)) if *k == actual)
    }
}

impl From<EventKind> for Topic<EventKind> {
    fn from(kind: EventKind) -> Self {
        Topic::Kind(kind)
    }
}

pub type Callback<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

struct Entry<E: Routable> {
    id: SubscriptionId,
    topic: Topic<<E as Routable>::Kind>,
    callback: Callback<E>,
    active: Arc<AtomicBool>,
}

impl<E: Routable> Entry<E> {
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

struct Registry<E: Routable> {
    next_id: u64,
    entries: Vec<Entry<E>>,
}

impl<E: Routable> Registry<E> {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                let entry = self.entries.remove(pos);
                entry.deactivate();
                true
            }
            None => false,
        }
    }
}

/// Outcome of one [`EventRouter::dispatch`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Callbacks that returned `Err` or panicked.
    pub failed: usize,
    /// Snapshot entries unsubscribed before their turn came.
    pub skipped: usize,
}

impl DispatchReport {
    pub fn invoked(&self) -> usize {
        self.delivered + self.failed
    }
}

pub struct EventRouter<E: Routable> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: Routable> Default for EventRouter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Routable> EventRouter<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                entries: Vec::new(),
            })),
        }
    }

    /// Register `callback` for `topic`.
    ///
    /// The returned guard removes exactly this registration when dropped,
    /// even if an identical callback is registered elsewhere.
    pub fn subscribe<F>(&self, topic: Topic<E::Kind>, callback: F) -> Subscription<E>
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut reg = self.registry.lock();
            let id = SubscriptionId::from_raw(reg.next_id);
            reg.next_id += 1;
            reg.entries.push(Entry {
                id,
                topic,
                callback: Arc::new(callback),
                active: Arc::clone(&active),
            });
            id
        };
        debug!(subscription_id = %id, ?topic, "subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active,
        }
    }

    /// Remove a registration by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.lock().remove(id);
        if removed {
            debug!(subscription_id = %id, "unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// Works on a snapshot taken at entry: registrations added by a callback
    /// do not see this event, registrations removed by a callback are
    /// skipped if not reached yet.
    pub fn dispatch(&self, event: &E) -> DispatchReport {
        let kind = event.kind();
        let snapshot: Vec<(SubscriptionId, Arc<AtomicBool>, Callback<E>)> = {
            let reg = self.registry.lock();
            let exact = reg.entries.iter().filter(|e| e.topic.is_exact(kind));
            let wildcard = reg.entries.iter().filter(|e| e.topic == Topic::Any);
            exact
                .chain(wildcard)
                .map(|e| (e.id, Arc::clone(&e.active), Arc::clone(&e.callback)))
                .collect()
        };

        let mut report = DispatchReport::default();
        for (id, active, callback) in snapshot {
            if !active.load(Ordering::Acquire) {
                report.skipped += 1;
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    report.failed += 1;
                    counter!("rollcall_router_callback_failures_total", "reason" => "error")
                        .increment(1);
                    warn!(
                        subscription_id = %id,
                        event_type = event.label(),
                        error = %error,
                        "subscriber failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    counter!("rollcall_router_callback_failures_total", "reason" => "panic")
                        .increment(1);
                    warn!(
                        subscription_id = %id,
                        event_type = event.label(),
                        panic = %panic_message(&panic),
                        "subscriber panicked"
                    );
                }
            }
        }
        counter!("rollcall_router_dispatch_total").increment(1);
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.registry.lock().entries.iter().any(|e| e.id == id)
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Scoped registration returned by [`EventRouter::subscribe`].
///
/// Dropping it unsubscribes. Outliving the router is fine; the guard then
/// does nothing.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<E: Routable> {
    id: SubscriptionId,
    registry: Weak<Mutex<Registry<E>>>,
    active: Arc<AtomicBool>,
}

impl<E: Routable> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the registration now. Idempotent.
    pub fn unsubscribe(&mut self) -> bool {
        self.active.store(false, Ordering::Release);
        match self.registry.upgrade() {
            Some(registry) => {
                let removed = registry.lock().remove(self.id);
                if removed {
                    debug!(subscription_id = %self.id, "unsubscribed");
                }
                removed
            }
            None => false,
        }
    }
}

impl<E: Routable> Drop for Subscription<E> {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

impl<E: Routable> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
