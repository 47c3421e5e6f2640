use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use super::stops::{BoardingStatus, ListedStop, StopListing};
use crate::error::TrackerError;
use crate::notifications::NotificationStore;
use crate::services::transport_api::{StopId, TransportApi};
use crate::session::{SessionEvent, SessionHandle, SessionManager, SessionState, StreamEvent};

/// What the driver's route screen renders.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverView {
    pub route_name: String,
    pub stops: Vec<ListedStop>,
    pub stops_remaining: usize,
    pub connected: bool,
}

struct Shared {
    listing: Mutex<StopListing>,
    view: watch::Sender<DriverView>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StopListing> {
        self.listing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutates the listing and republishes the view.
    fn update<R>(&self, f: impl FnOnce(&mut StopListing) -> R) -> R {
        let mut listing = self.lock();
        let out = f(&mut listing);
        self.view.send_modify(|v| {
            v.stops = listing.stops().to_vec();
            v.stops_remaining = listing.stops_remaining();
        });
        out
    }
}

/// The driver's live route: stop list, check-ins and reordering.
pub struct DriverDashboard {
    api: Arc<dyn TransportApi>,
    shared: Arc<Shared>,
    session: SessionHandle,
    task: JoinHandle<()>,
}

impl DriverDashboard {
    #[tracing::instrument(skip_all)]
    pub async fn start(
        api: Arc<dyn TransportApi>,
        sessions: &SessionManager,
        token: &str,
        notifications: Arc<NotificationStore>,
    ) -> Result<Self, TrackerError> {
        let route = api.driver_route().await.map_err(TrackerError::NoDriverRoute)?;
        info!(route = %route.route_name, stops = route.all_stops_on_route.len(), "Driver route loaded");

        let listing = StopListing::new(route.all_stops_on_route);
        let (view, _) = watch::channel(DriverView {
            route_name: route.route_name,
            stops: listing.stops().to_vec(),
            stops_remaining: listing.stops_remaining(),
            connected: false,
        });
        let shared = Arc::new(Shared {
            listing: Mutex::new(listing),
            view,
        });

        let (session, events) = sessions.open(token)?;
        let task = tokio::spawn(
            listen(shared.clone(), notifications, events).instrument(tracing::info_span!("driver")),
        );

        Ok(Self {
            api,
            shared,
            session,
            task,
        })
    }

    pub fn view(&self) -> DriverView {
        self.shared.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DriverView> {
        self.shared.view.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn stops_remaining(&self) -> usize {
        self.shared.lock().stops_remaining()
    }

    pub fn mark_status(&self, id: StopId, status: BoardingStatus) -> bool {
        self.shared.update(|l| l.mark_status(id, status))
    }

    /// Moves a stop, submits the new order and reconciles with the answer.
    ///
    /// Returns whether the backend accepted the new order. A rejected order
    /// is reverted silently.
    #[tracing::instrument(skip(self))]
    pub async fn reorder(&self, from: usize, to: usize) -> bool {
        let Some(ticket) = self.shared.update(|l| l.reorder(from, to)) else {
            return false;
        };

        match self.api.reorder_stops(ticket.order()).await {
            Ok(()) => {
                debug!(order = ?ticket.order(), "Stop order saved");
                self.shared.update(|l| l.confirm(ticket));
                true
            }
            Err(e) => {
                warn!(error = %e, "Stop order rejected, reverting");
                self.shared.update(|l| l.reject(&ticket));
                false
            }
        }
    }
}

impl Drop for DriverDashboard {
    fn drop(&mut self) {
        self.task.abort();
        self.session.close();
    }
}

async fn listen(
    shared: Arc<Shared>,
    notifications: Arc<NotificationStore>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Opened) => shared.view.send_modify(|v| v.connected = true),
            Ok(SessionEvent::Lost { .. }) => shared.view.send_modify(|v| v.connected = false),
            Ok(SessionEvent::Message(StreamEvent::CheckIn {
                subject_id,
                is_boarding,
            })) => {
                if !shared.update(|l| l.apply_check_in(subject_id, is_boarding)) {
                    debug!(subject_id, "Check-in for a stop not on this route");
                }
            }
            Ok(SessionEvent::Message(StreamEvent::Notification { title, body })) => {
                notifications.add(&title, &body);
            }
            Ok(SessionEvent::Message(_)) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Driver listener fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::transport_api::DriverRoute;
    use crate::services::transport_api::testing::{FakeApi, stop};
    use crate::session::testing::{Push, ScriptedConnector};
    use crate::storage::MemoryStore;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn route() -> DriverRoute {
        DriverRoute {
            route_name: "North Loop".into(),
            all_stops_on_route: vec![
                stop(1, 1, 12.90, 77.50),
                stop(2, 2, 12.91, 77.51),
                stop(3, 3, 12.92, 77.52),
            ],
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn store() -> Arc<NotificationStore> {
        Arc::new(NotificationStore::load(Arc::new(MemoryStore::new())))
    }

    async fn start(api: &Arc<FakeApi>, connector: &ScriptedConnector) -> DriverDashboard {
        let sessions = SessionManager::new(Arc::new(connector.clone()), &Config::default());
        DriverDashboard::start(api.clone(), &sessions, "jwt", store())
            .await
            .unwrap()
    }

    fn order(view: &DriverView) -> Vec<StopId> {
        view.stops.iter().map(|s| s.stop.id).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_reorder_rolls_back() {
        let api = Arc::new(FakeApi::with_driver_route(route()));
        api.fail_reorder.store(true, Ordering::SeqCst);
        let connector = ScriptedConnector::default();
        let _peer = connector.accept_next();
        let dashboard = start(&api, &connector).await;

        assert!(!dashboard.reorder(0, 1).await);
        assert_eq!(*api.reorders.lock().unwrap(), vec![vec![2, 1, 3]]);
        assert_eq!(order(&dashboard.view()), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_reorder_sticks() {
        let api = Arc::new(FakeApi::with_driver_route(route()));
        let connector = ScriptedConnector::default();
        let _peer = connector.accept_next();
        let dashboard = start(&api, &connector).await;

        assert!(dashboard.reorder(2, 0).await);
        assert_eq!(order(&dashboard.view()), vec![3, 1, 2]);

        api.fail_reorder.store(true, Ordering::SeqCst);
        assert!(!dashboard.reorder(0, 2).await);
        assert_eq!(order(&dashboard.view()), vec![3, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_check_ins_update_remaining() {
        let api = Arc::new(FakeApi::with_driver_route(route()));
        let connector = ScriptedConnector::default();
        let peer = connector.accept_next();
        let dashboard = start(&api, &connector).await;
        settle().await;
        assert!(dashboard.view().connected);
        assert_eq!(dashboard.stops_remaining(), 3);

        peer.send(Push::Text(r#"{"type":"student_check_in","student_id":2,"is_boarding":false}"#.into()))
            .unwrap();
        settle().await;
        assert_eq!(dashboard.stops_remaining(), 2);
        assert!(!dashboard.view().stops[1].stop.is_boarding_today);

        assert!(dashboard.mark_status(1, BoardingStatus::Boarded));
        assert_eq!(dashboard.view().stops_remaining, 1);

        peer.send(Push::Fail("reset".into())).unwrap();
        settle().await;
        assert!(!dashboard.view().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_route() {
        let api = Arc::new(FakeApi::default());
        let connector = ScriptedConnector::default();
        let sessions = SessionManager::new(Arc::new(connector.clone()), &Config::default());

        let err = DriverDashboard::start(api, &sessions, "jwt", store())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "No active route assigned to you.");
        settle().await;
        assert_eq!(connector.connect_count(), 0);
    }
}
