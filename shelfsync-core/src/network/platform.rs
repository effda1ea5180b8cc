use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{Platform, PlatformEvent, PlatformSink};

const DEFAULT_ROUTE_TARGET: ([u8; 4], u16) = ([1, 1, 1, 1], 53);
const DEFAULT_POLL: Duration = Duration::from_secs(5);

/// Link detection for hosts without native connectivity events.
///
/// Asks the OS for a route to a public address by connecting a UDP socket
/// (no packet is sent). Listening polls that route and reports appearance,
/// loss, and changes of the outbound source address.
#[derive(Debug)]
pub struct RouteProbePlatform {
    route_target: SocketAddr,
    poll_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RouteProbePlatform {
    fn default() -> Self {
        Self::new(SocketAddr::from(DEFAULT_ROUTE_TARGET), DEFAULT_POLL)
    }
}

impl RouteProbePlatform {
    pub fn new(route_target: SocketAddr, poll_interval: Duration) -> Self {
        Self {
            route_target,
            poll_interval,
            task: Mutex::new(None),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Local source address the OS would use to reach `target`, if any.
fn route_source(target: SocketAddr) -> Option<IpAddr> {
    let bind_addr: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(bind_addr).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Maps a change in route source to the event it represents.
fn transition(previous: Option<IpAddr>, current: Option<IpAddr>) -> Option<PlatformEvent> {
    match (previous, current) {
        (None, Some(_)) => Some(PlatformEvent::Online),
        (Some(_), None) => Some(PlatformEvent::Offline),
        (Some(a), Some(b)) if a != b => Some(PlatformEvent::LinkChanged),
        _ => None,
    }
}

impl Platform for RouteProbePlatform {
    fn link_available(&self) -> bool {
        route_source(self.route_target).is_some()
    }

    fn install_listeners(&self, sink: PlatformSink) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime, network change events disabled");
                return;
            }
        };

        let target = self.route_target;
        let poll_interval = self.poll_interval;
        let handle = runtime.spawn(async move {
            let mut previous = route_source(target);
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let current = route_source(target);
                if let Some(event) = transition(previous, current) {
                    tracing::debug!(?event, "Route change detected");
                    sink(event);
                }
                previous = current;
            }
        });

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
    }

    fn remove_listeners(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

impl Drop for RouteProbePlatform {
    fn drop(&mut self) {
        self.remove_listeners();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transition_events() {
        let a: IpAddr = [10, 0, 0, 2].into();
        let b: IpAddr = [192, 168, 1, 20].into();

        assert_eq!(transition(None, Some(a)), Some(PlatformEvent::Online));
        assert_eq!(transition(Some(a), None), Some(PlatformEvent::Offline));
        assert_eq!(transition(Some(a), Some(b)), Some(PlatformEvent::LinkChanged));
        assert_eq!(transition(Some(a), Some(a)), None);
        assert_eq!(transition(None, None), None);
    }

    #[test]
    fn test_loopback_route_is_available() {
        let platform =
            RouteProbePlatform::new(([127, 0, 0, 1], 9).into(), Duration::from_secs(1));
        assert!(platform.link_available());
    }

    #[tokio::test]
    async fn test_listener_task_lifecycle() {
        let platform =
            RouteProbePlatform::new(([127, 0, 0, 1], 9).into(), Duration::from_millis(10));

        platform.install_listeners(Arc::new(|_: PlatformEvent| {}));
        assert!(platform.is_listening());

        platform.remove_listeners();
        assert!(!platform.is_listening());
    }

    #[test]
    fn test_install_without_runtime_is_noop() {
        let platform = RouteProbePlatform::default();
        platform.install_listeners(Arc::new(|_: PlatformEvent| {}));
        assert!(!platform.is_listening());
    }
}
