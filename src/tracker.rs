//! Rider-side pipeline: route lookup, live session, proximity and map state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, info, warn};

use crate::error::TrackerError;
use crate::geo::Coordinate;
use crate::notifications::NotificationStore;
use crate::proximity::{ProximityReading, classify};
use crate::services::transport_api::{RiderRoute, RouteGeometry, StopId, TransportApi};
use crate::session::{SessionEvent, SessionHandle, SessionManager, SessionState, StreamEvent};

pub const AWAITING_SIGNAL: &str = "Awaiting signal...";
pub const ADDRESS_UNKNOWN: &str = "Could not find address";

const RECENTER_PADDING_PX: u32 = 50;
const RECENTER_ZOOM: u8 = 15;

/// The rider's boarding point, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedStop {
    pub id: StopId,
    pub pickup_order: i64,
    pub coordinate: Coordinate,
    pub address: String,
}

impl FixedStop {
    /// Picks the stop whose pickup order matches the rider's.
    pub fn find(route: &RiderRoute) -> Option<Self> {
        let order = route.your_pickup_order?;
        route
            .all_stops_on_route
            .iter()
            .find(|s| s.pickup_order == Some(order))
            .map(|s| FixedStop {
                id: s.id,
                pickup_order: order,
                coordinate: s.coordinate(),
                address: s.address.clone(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Viewport {
    /// Fit both corners, with padding in pixels.
    Bounds {
        south_west: Coordinate,
        north_east: Coordinate,
        padding_px: u32,
    },
    Center { center: Coordinate, zoom: u8 },
}

/// Viewport covering the vehicle and the stop, or just the stop.
pub fn recenter(vehicle: Option<Coordinate>, stop: Coordinate) -> Viewport {
    match vehicle {
        Some(v) => Viewport::Bounds {
            south_west: Coordinate::new(v.latitude.min(stop.latitude), v.longitude.min(stop.longitude)),
            north_east: Coordinate::new(v.latitude.max(stop.latitude), v.longitude.max(stop.longitude)),
            padding_px: RECENTER_PADDING_PX,
        },
        None => Viewport::Center {
            center: stop,
            zoom: RECENTER_ZOOM,
        },
    }
}

/// Everything the rider's map screen renders.
#[derive(Debug, Clone, PartialEq)]
pub struct RiderView {
    pub route_name: String,
    pub stop: FixedStop,
    pub connected: bool,
    /// Last vehicle position, snapped to the road when the router provided one.
    pub vehicle: Option<Coordinate>,
    /// When `vehicle` was received.
    pub vehicle_seen_at: Option<DateTime<Utc>>,
    pub polyline: Vec<Coordinate>,
    pub bus_address: String,
    pub proximity: Option<ProximityReading>,
}

impl RiderView {
    fn new(route_name: String, stop: FixedStop) -> Self {
        Self {
            route_name,
            stop,
            connected: false,
            vehicle: None,
            vehicle_seen_at: None,
            polyline: Vec::new(),
            bus_address: AWAITING_SIGNAL.to_string(),
            proximity: None,
        }
    }

    /// Proximity alert for the current reading, if any.
    pub fn alert(&self) -> Option<&'static str> {
        self.proximity.and_then(|p| p.tier.alert())
    }

    fn clear_live_state(&mut self) {
        self.connected = false;
        self.vehicle = None;
        self.vehicle_seen_at = None;
        self.polyline.clear();
        self.bus_address = AWAITING_SIGNAL.to_string();
        self.proximity = None;
    }
}

/// A running rider session. Dropping it stops tracking.
pub struct RiderTracker {
    view: watch::Receiver<RiderView>,
    session: SessionHandle,
    task: JoinHandle<()>,
}

impl RiderTracker {
    /// Looks up the rider's route and stop, then opens the live session.
    ///
    /// Fails with [`TrackerError::StopNotFound`] without connecting when the
    /// rider's pickup order is not on the route.
    #[tracing::instrument(skip_all)]
    pub async fn start(
        api: Arc<dyn TransportApi>,
        sessions: &SessionManager,
        token: &str,
        notifications: Arc<NotificationStore>,
    ) -> Result<Self, TrackerError> {
        let route = api.my_route().await.map_err(TrackerError::RouteUnavailable)?;
        let Some(stop) = FixedStop::find(&route) else {
            warn!(route = %route.route_name, pickup_order = ?route.your_pickup_order, "Rider stop missing from route");
            return Err(TrackerError::StopNotFound);
        };
        info!(route = %route.route_name, stop_id = stop.id, "Rider stop loaded");

        let (session, events) = sessions.open(token)?;
        let (view_tx, view_rx) = watch::channel(RiderView::new(route.route_name, stop.clone()));

        let pipeline = Pipeline {
            api,
            stop: stop.coordinate,
            notifications,
            view: view_tx,
            issued: 0,
            lookups: JoinSet::new(),
        };
        let task = tokio::spawn(pipeline.run(events).instrument(tracing::info_span!("rider")));

        Ok(Self {
            view: view_rx,
            session,
            task,
        })
    }

    pub fn view(&self) -> RiderView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<RiderView> {
        self.view.clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn recenter(&self) -> Viewport {
        let view = self.view.borrow();
        recenter(view.vehicle, view.stop.coordinate)
    }
}

impl Drop for RiderTracker {
    fn drop(&mut self) {
        self.task.abort();
        self.session.close();
    }
}

/// Result of the lookups triggered by one position event.
struct PositionLookup {
    token: u64,
    geometry: Option<RouteGeometry>,
    address: Option<String>,
}

struct Pipeline {
    api: Arc<dyn TransportApi>,
    stop: Coordinate,
    notifications: Arc<NotificationStore>,
    view: watch::Sender<RiderView>,
    /// Token of the most recent position lookup.
    issued: u64,
    lookups: JoinSet<PositionLookup>,
}

impl Pipeline {
    async fn run(mut self, mut events: broadcast::Receiver<SessionEvent>) {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.handle(event),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Rider pipeline fell behind"),
                    Err(RecvError::Closed) => break,
                },
                Some(done) = self.lookups.join_next(), if !self.lookups.is_empty() => match done {
                    Ok(lookup) => self.apply(lookup),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => warn!(error = %e, "Position lookup task failed"),
                },
            }
        }
        debug!("Rider pipeline stopped");
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened => self.view.send_modify(|v| v.connected = true),
            SessionEvent::Lost { reason } => {
                debug!(reason = %reason, "Clearing live state");
                // results of lookups issued before the drop are stale now
                self.lookups.abort_all();
                self.issued += 1;
                self.view.send_modify(RiderView::clear_live_state);
            }
            SessionEvent::Message(StreamEvent::Position(position)) => self.on_position(position),
            SessionEvent::Message(StreamEvent::Notification { title, body }) => {
                self.notifications.add(&title, &body);
            }
            SessionEvent::Message(StreamEvent::CheckIn { subject_id, .. }) => {
                debug!(subject_id, "Ignoring check-in frame in rider context");
            }
            SessionEvent::Message(StreamEvent::Unknown { .. }) => {}
        }
    }

    fn on_position(&mut self, position: Coordinate) {
        self.issued += 1;
        let token = self.issued;
        let reading = classify(position, self.stop);
        debug!(token, distance_m = reading.distance_meters, tier = ?reading.tier, "Vehicle position");

        self.view.send_modify(|v| {
            v.vehicle = Some(position);
            v.vehicle_seen_at = Some(Utc::now());
            v.proximity = Some(reading);
        });

        let api = self.api.clone();
        let stop = self.stop;
        self.lookups.spawn(async move {
            let geometry = match api.route_geometry(position, stop).await {
                Ok(geometry) => Some(geometry),
                Err(e) => {
                    warn!(error = %e, "Route geometry lookup failed");
                    None
                }
            };

            let anchor = geometry
                .as_ref()
                .and_then(RouteGeometry::snapped_start)
                .unwrap_or(position);
            let address = match api.reverse_geocode(anchor).await {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!(error = %e, "Reverse geocode failed");
                    geometry
                        .as_ref()
                        .map(|g| g.bus_address.clone())
                        .filter(|a| !a.is_empty())
                }
            };

            PositionLookup {
                token,
                geometry,
                address,
            }
        });
    }

    fn apply(&mut self, lookup: PositionLookup) {
        if lookup.token != self.issued {
            debug!(token = lookup.token, latest = self.issued, "Discarding stale position lookup");
            return;
        }
        self.view.send_modify(|v| {
            if let Some(geometry) = &lookup.geometry {
                v.polyline = geometry.path();
                if let Some(snapped) = geometry.snapped_start() {
                    v.vehicle = Some(snapped);
                }
            }
            v.bus_address = lookup
                .address
                .unwrap_or_else(|| ADDRESS_UNKNOWN.to_string());
        });
    }
}
