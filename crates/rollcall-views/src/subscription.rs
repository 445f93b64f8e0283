//! The per-view live subscription pattern.
//!
//! A mounted view holds one [`LiveSubscription`] per relevant topic. Every
//! delivered event triggers one re-fetch of the view's data with the
//! parameters current at delivery time. Results are applied only if the
//! view is still mounted, its parameters have not changed since the fetch
//! started, and no newer fetch has already been applied.
//!
//! Lifecycle:
//! 1. `mount(params)`: connect, subscribe, eager fetch
//! 2. `set_params(params)`: drop subscriptions, resubscribe, eager fetch
//! 3. `unmount()` (or drop): drop subscriptions, discard in-flight results

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use rollcall_core::ids::ViewId;
use rollcall_core::{ApiError, LiveEvent};
use rollcall_live::{LiveHandle, LiveSubscription, LiveTopic};
use tracing::{debug, warn};

use crate::api::AttendanceApi;
use crate::notify::{Notice, NotificationSink};

/// A view whose data comes from the REST collaborator and whose freshness
/// is driven by live events.
#[async_trait]
pub trait LiveView: Send + Sync + 'static {
    type Params: Clone + fmt::Debug + Send + Sync + 'static;
    type Data: Send + 'static;

    fn name(&self) -> &'static str;

    /// Topics that should trigger a re-fetch for these parameters.
    fn topics(&self, params: &Self::Params) -> Vec<LiveTopic>;

    async fn fetch(
        &self,
        api: &dyn AttendanceApi,
        params: &Self::Params,
    ) -> Result<Self::Data, ApiError>;

    /// Replace the view's state with freshly fetched data.
    fn apply(&self, params: &Self::Params, data: Self::Data);

    /// Toast to show for an event, if any.
    fn notice(&self, _event: &LiveEvent) -> Option<Notice> {
        None
    }
}

/// What happened to one fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    Applied,
    /// Superseded by unmount, new parameters, or a newer fetch.
    Discarded,
    Failed(ApiError),
}

impl FetchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

struct ViewCore<V: LiveView> {
    id: ViewId,
    view: V,
    api: Arc<dyn AttendanceApi>,
    notifier: Arc<dyn NotificationSink>,
    params: RwLock<Option<V::Params>>,
    /// Bumped on every parameter change and on unmount.
    generation: AtomicU64,
    /// Ticket of the newest fetch started / applied.
    issued: AtomicU64,
    applied: AtomicU64,
    mounted: AtomicBool,
}

impl<V: LiveView> ViewCore<V> {
    fn on_event(self: &Arc<Self>, event: &LiveEvent) -> anyhow::Result<()> {
        if !self.mounted.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(notice) = self.view.notice(event) {
            self.notifier.notify(notice);
        }

        let (params, generation) = {
            let guard = self.params.read();
            match guard.as_ref() {
                Some(params) => (params.clone(), self.generation.load(Ordering::Acquire)),
                None => return Ok(()),
            }
        };

        let runtime = tokio::runtime::Handle::try_current()?;
        let core = Arc::clone(self);
        debug!(
            view = self.view.name(),
            view_id = %self.id,
            event_type = event.event_type(),
            "re-fetching"
        );
        drop(runtime.spawn(async move {
            let _ = core.refresh(params, generation).await;
        }));
        Ok(())
    }

    async fn refresh(&self, params: V::Params, generation: u64) -> FetchOutcome {
        let ticket = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        let result = self.view.fetch(self.api.as_ref(), &params).await;

        // Held across the checks and `apply` so a parameter change cannot
        // slip in between.
        let _params = self.params.read();
        if !self.mounted.load(Ordering::Acquire)
            || self.generation.load(Ordering::Acquire) != generation
        {
            counter!("rollcall_view_fetch_discarded_total", "view" => self.view.name())
                .increment(1);
            debug!(view = self.view.name(), view_id = %self.id, "discarding stale fetch");
            return FetchOutcome::Discarded;
        }

        match result {
            Ok(data) => {
                if self.applied.fetch_max(ticket, Ordering::AcqRel) > ticket {
                    debug!(view = self.view.name(), ticket, "newer data already applied");
                    return FetchOutcome::Discarded;
                }
                self.view.apply(&params, data);
                FetchOutcome::Applied
            }
            Err(error) => {
                if self.applied.load(Ordering::Acquire) > ticket {
                    debug!(view = self.view.name(), ticket, error = %error, "superseded fetch failed");
                    return FetchOutcome::Discarded;
                }
                counter!("rollcall_view_fetch_failures_total", "view" => self.view.name())
                    .increment(1);
                warn!(
                    view = self.view.name(),
                    view_id = %self.id,
                    error = %error,
                    "view refresh failed"
                );
                self.notifier.notify(Notice::error(format!(
                    "Failed to refresh {}: {}",
                    self.view.name(),
                    error.user_message()
                )));
                FetchOutcome::Failed(error)
            }
        }
    }
}

/// A mounted (or mountable) view bound to the shared live connection.
pub struct ViewSubscription<V: LiveView> {
    core: Arc<ViewCore<V>>,
    live: LiveHandle,
    subscriptions: Vec<LiveSubscription>,
}

impl<V: LiveView> ViewSubscription<V> {
    pub fn new(
        view: V,
        live: LiveHandle,
        api: Arc<dyn AttendanceApi>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            core: Arc::new(ViewCore {
                id: ViewId::new(),
                view,
                api,
                notifier,
                params: RwLock::new(None),
                generation: AtomicU64::new(0),
                issued: AtomicU64::new(0),
                applied: AtomicU64::new(0),
                mounted: AtomicBool::new(false),
            }),
            live,
            subscriptions: Vec::new(),
        }
    }

    pub fn id(&self) -> &ViewId {
        &self.core.id
    }

    pub fn view(&self) -> &V {
        &self.core.view
    }

    pub fn params(&self) -> Option<V::Params> {
        self.core.params.read().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.core.mounted.load(Ordering::Acquire)
    }

    /// Number of live registrations this view currently holds.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Activate the view: ensure the connection, subscribe, fetch once.
    pub async fn mount(&mut self, params: V::Params) -> FetchOutcome {
        self.live.connect();
        self.core.mounted.store(true, Ordering::Release);
        debug!(view = self.core.view.name(), view_id = %self.core.id, ?params, "mounting");
        self.activate(params).await
    }

    /// Switch to new parameters. Earlier in-flight fetches are discarded.
    pub async fn set_params(&mut self, params: V::Params) -> FetchOutcome {
        if !self.is_mounted() {
            return self.mount(params).await;
        }
        debug!(view = self.core.view.name(), view_id = %self.core.id, ?params, "parameters changed");
        self.activate(params).await
    }

    /// Fetch again with the current parameters.
    pub async fn refresh(&self) -> FetchOutcome {
        let Some(params) = self.params() else {
            return FetchOutcome::Discarded;
        };
        let generation = self.core.generation.load(Ordering::Acquire);
        self.core.refresh(params, generation).await
    }

    /// Stop reacting to events and discard any in-flight fetch. Idempotent.
    pub fn unmount(&mut self) {
        self.subscriptions.clear();
        let was_mounted = self.core.mounted.swap(false, Ordering::AcqRel);
        let _ = self.core.generation.fetch_add(1, Ordering::AcqRel);
        if was_mounted {
            debug!(view = self.core.view.name(), view_id = %self.core.id, "unmounted");
        }
    }

    async fn activate(&mut self, params: V::Params) -> FetchOutcome {
        self.subscriptions.clear();

        let generation = {
            let mut guard = self.core.params.write();
            *guard = Some(params.clone());
            self.core.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        let weak: Weak<ViewCore<V>> = Arc::downgrade(&self.core);
        for topic in self.core.view.topics(&params) {
            let weak = weak.clone();
            let sub = self.live.subscribe(topic, move |event: &LiveEvent| {
                match weak.upgrade() {
                    Some(core) => core.on_event(event),
                    None => Ok(()),
                }
            });
            self.subscriptions.push(sub);
        }

        self.core.refresh(params, generation).await
    }
}

impl<V: LiveView> Drop for ViewSubscription<V> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<V: LiveView> fmt::Debug for ViewSubscription<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSubscription")
            .field("view", &self.core.view.name())
            .field("id", &self.core.id)
            .field("mounted", &self.is_mounted())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
