//! Connectivity probing and change notification.
//!
//! [`NetworkMonitor`] combines a [`Platform`] (link state plus change
//! events) with a set of reachability [`Probe`]s. The platform answers the
//! cheap question "is there a link at all"; the probes confirm that the
//! internet is actually reachable.

mod platform;
mod probe;

pub use platform::RouteProbePlatform;
pub use probe::HttpProbe;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::NetworkError;

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// How often `wait_for_network` re-probes between events.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Raw connectivity events emitted by a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Online,
    Offline,
    /// The link type or route changed; current state must be re-read
    LinkChanged,
}

pub type PlatformSink = Arc<dyn Fn(PlatformEvent) + Send + Sync>;

/// Host integration for link state and change events.
pub trait Platform: Send + Sync {
    /// Cheap local check; false means definitely offline.
    fn link_available(&self) -> bool;

    /// Starts delivering events to `sink`. Called once per listening period.
    fn install_listeners(&self, sink: PlatformSink);

    fn remove_listeners(&self);
}

/// A single reachability check against some external endpoint.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> bool;

    fn target(&self) -> &str;
}

/// Anything that can answer "should we try talking to the server now".
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Handle returned by [`NetworkMonitor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct Shared {
    platform: Arc<dyn Platform>,
    probes: Vec<Arc<dyn Probe>>,
    probe_timeout: Duration,
    poll_interval: Duration,
    subscribers: Mutex<HashMap<SubscriptionId, Callback>>,
    next_id: AtomicU64,
    listening: AtomicBool,
    last_state: Mutex<Option<bool>>,
}

/// Best-effort connectivity monitor. Cheap to clone.
#[derive(Clone)]
pub struct NetworkMonitor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("probes", &self.shared.probes.len())
            .field("probe_timeout", &self.shared.probe_timeout)
            .field("listening", &self.shared.listening.load(Ordering::SeqCst))
            .finish()
    }
}

impl NetworkMonitor {
    pub fn new(platform: Arc<dyn Platform>, probes: Vec<Arc<dyn Probe>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                platform,
                probes,
                probe_timeout: DEFAULT_PROBE_TIMEOUT,
                poll_interval: DEFAULT_POLL_INTERVAL,
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                listening: AtomicBool::new(false),
                last_state: Mutex::new(None),
            }),
        }
    }

    /// Builds a monitor with HTTP probes against `urls` and the route-based
    /// platform.
    pub fn with_http_probes(urls: &[String], probe_timeout: Duration) -> Self {
        let probes = urls
            .iter()
            .filter_map(|url| match HttpProbe::new(url, probe_timeout) {
                Ok(probe) => Some(Arc::new(probe) as Arc<dyn Probe>),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Skipping invalid probe URL");
                    None
                }
            })
            .collect();

        Self::new(Arc::new(RouteProbePlatform::default()), probes).probe_timeout(probe_timeout)
    }

    /// Overrides the per-probe timeout. Only valid before the monitor is shared.
    pub fn probe_timeout(self, timeout: Duration) -> Self {
        self.rebuild(|shared| shared.probe_timeout = timeout)
    }

    /// Overrides the `wait_for_network` polling interval.
    pub fn poll_interval(self, interval: Duration) -> Self {
        self.rebuild(|shared| shared.poll_interval = interval)
    }

    fn rebuild(self, apply: impl FnOnce(&mut Shared)) -> Self {
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => {
                apply(&mut shared);
                Self {
                    shared: Arc::new(shared),
                }
            }
            Err(shared) => {
                tracing::warn!("NetworkMonitor already shared, ignoring option change");
                Self { shared }
            }
        }
    }

    /// True when the link is up and at least one probe succeeds.
    ///
    /// Probes run concurrently and the first success wins, so the worst case
    /// is one probe timeout rather than their sum.
    pub async fn is_online(&self) -> bool {
        let shared = &self.shared;
        if !shared.platform.link_available() {
            tracing::debug!("No network link");
            return false;
        }
        if shared.probes.is_empty() {
            return true;
        }

        let timeout = shared.probe_timeout;
        let attempts = shared.probes.iter().map(|probe| {
            let probe = Arc::clone(probe);
            Box::pin(async move {
                match tokio::time::timeout(timeout, probe.check()).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(()),
                    Err(_) => {
                        tracing::debug!(probe = probe.target(), "Probe timed out");
                        Err(())
                    }
                }
            })
        });

        futures::future::select_ok(attempts).await.is_ok()
    }

    /// Registers a callback for online/offline transitions.
    ///
    /// Platform listeners are installed with the first subscriber.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers().insert(id, Arc::new(callback));

        if !self.shared.listening.swap(true, Ordering::SeqCst) {
            *self.last_state() = Some(self.shared.platform.link_available());

            let weak = Arc::downgrade(&self.shared);
            self.shared.platform.install_listeners(Arc::new(move |event: PlatformEvent| {
                if let Some(shared) = weak.upgrade() {
                    NetworkMonitor { shared }.handle_event(event);
                }
            }));
            tracing::debug!("Installed network listeners");
        }

        id
    }

    /// Removes a callback; listeners are torn down with the last one.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let now_empty = {
            let mut subscribers = self.subscribers();
            subscribers.remove(&id);
            subscribers.is_empty()
        };

        if now_empty && self.shared.listening.swap(false, Ordering::SeqCst) {
            self.shared.platform.remove_listeners();
            *self.last_state() = None;
            tracing::debug!("Removed network listeners");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn handle_event(&self, event: PlatformEvent) {
        let online = match event {
            PlatformEvent::Online => true,
            PlatformEvent::Offline => false,
            PlatformEvent::LinkChanged => self.shared.platform.link_available(),
        };

        {
            let mut last = self.last_state();
            if *last == Some(online) {
                return;
            }
            *last = Some(online);
        }

        if online {
            tracing::info!("Network online");
        } else {
            tracing::warn!("Network offline");
        }

        let callbacks: Vec<Callback> = self.subscribers().values().cloned().collect();
        for callback in callbacks {
            callback(online);
        }
    }

    /// Resolves once the network is reachable, via an online event or
    /// periodic polling, whichever comes first.
    pub async fn wait_for_network(&self, timeout: Duration) -> Result<(), NetworkError> {
        let wake = Arc::new(Notify::new());
        let subscription = {
            let wake = Arc::clone(&wake);
            self.subscribe(move |online| {
                if online {
                    wake.notify_one();
                }
            })
        };

        let poll_interval = self.shared.poll_interval;
        let result = tokio::time::timeout(timeout, async {
            loop {
                if self.is_online().await {
                    return;
                }
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        })
        .await;

        self.unsubscribe(subscription);
        result.map_err(|_| NetworkError::Timeout(timeout))
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Callback>> {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn last_state(&self) -> std::sync::MutexGuard<'_, Option<bool>> {
        self.shared
            .last_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connectivity for NetworkMonitor {
    async fn is_online(&self) -> bool {
        NetworkMonitor::is_online(self).await
    }
}
