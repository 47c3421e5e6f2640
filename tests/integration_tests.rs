use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use transit_track::Config;
use transit_track::geo::Coordinate;
use transit_track::notifications::NotificationStore;
use transit_track::proximity::Tier;
use transit_track::services::transport_api::{
    DriverRoute, RiderRoute, RouteGeometry, RouteStop, StopId, TransportApi,
};
use transit_track::session::{Connection, Connector, SessionManager};
use transit_track::storage::{FileStore, KeyValueStore, NOTIFICATIONS_KEY};
use transit_track::tracker::{AWAITING_SIGNAL, RiderTracker};

const STOP: Coordinate = Coordinate {
    latitude: 12.9716,
    longitude: 77.5946,
};

struct Backend;

#[async_trait]
impl TransportApi for Backend {
    async fn my_route(&self) -> Result<RiderRoute> {
        Ok(RiderRoute {
            route_name: "Campus Express".into(),
            your_pickup_order: Some(1),
            all_stops_on_route: vec![RouteStop {
                id: 7,
                username: "asha".into(),
                address: "Gate 2".into(),
                latitude: STOP.latitude,
                longitude: STOP.longitude,
                pickup_order: Some(1),
                driving_time_seconds: Some(240.0),
                is_boarding_today: true,
            }],
        })
    }

    async fn driver_route(&self) -> Result<DriverRoute> {
        anyhow::bail!("not a driver")
    }

    async fn route_geometry(&self, start: Coordinate, end: Coordinate) -> Result<RouteGeometry> {
        Ok(RouteGeometry {
            polyline: vec![[start.latitude, start.longitude], [end.latitude, end.longitude]],
            snapped_start_point: None,
            bus_address: String::new(),
        })
    }

    async fn update_location(&self, _position: Coordinate) -> Result<()> {
        Ok(())
    }

    async fn reverse_geocode(&self, _position: Coordinate) -> Result<String> {
        Ok("MG Road".into())
    }

    async fn forward_geocode(&self, _query: &str) -> Result<Coordinate> {
        Ok(STOP)
    }

    async fn reorder_stops(&self, _stop_ids: &[StopId]) -> Result<()> {
        Ok(())
    }

    async fn check_in(&self, _is_boarding: bool) -> Result<()> {
        Ok(())
    }
}

/// Hands out connections fed by test-held senders; refuses when none are queued.
#[derive(Clone, Default)]
struct Peers {
    queued: Arc<Mutex<Vec<mpsc::UnboundedReceiver<Option<String>>>>>,
}

impl Peers {
    fn accept(&self) -> mpsc::UnboundedSender<Option<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queued.lock().unwrap().push(rx);
        tx
    }
}

struct Peer(mpsc::UnboundedReceiver<Option<String>>);

#[async_trait]
impl Connector for Peers {
    async fn connect(&self, _url: &Url) -> Result<Box<dyn Connection>> {
        let mut queued = self.queued.lock().unwrap();
        if queued.is_empty() {
            anyhow::bail!("connection refused");
        }
        Ok(Box::new(Peer(queued.remove(0))))
    }
}

#[async_trait]
impl Connection for Peer {
    /// `None` pushed by the test simulates a network error.
    async fn next_frame(&mut self) -> Option<Result<String>> {
        match self.0.recv().await? {
            Some(text) => Some(Ok(text)),
            None => Some(Err(anyhow::anyhow!("connection reset"))),
        }
    }

    async fn close(&mut self) {}
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_rider_pipeline_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let notifications = Arc::new(NotificationStore::load(store.clone()));

    let peers = Peers::default();
    let first = peers.accept();
    let second = peers.accept();
    let sessions = SessionManager::new(Arc::new(peers.clone()), &Config::default())
        .with_reconnect_delay(Duration::from_secs(3));

    let tracker = RiderTracker::start(Arc::new(Backend), &sessions, "jwt", notifications.clone())
        .await
        .unwrap();
    settle().await;

    first
        .send(Some(r#"{"type":"location","latitude":12.9717,"longitude":77.5946}"#.into()))
        .unwrap();
    first
        .send(Some(r#"{"type":"notification","title":"","body":"Bus departed"}"#.into()))
        .unwrap();
    first.send(Some(r#"{"type":"route_changed"}"#.into())).unwrap();
    settle().await;

    let view = tracker.view();
    assert!(view.connected);
    assert_eq!(view.stop.id, 7);
    assert_eq!(view.proximity.unwrap().tier, Tier::Arrived);
    assert_eq!(view.bus_address, "MG Road");
    assert_eq!(view.polyline.len(), 2);

    first.send(None).unwrap();
    settle().await;
    let view = tracker.view();
    assert!(!view.connected);
    assert_eq!(view.vehicle, None);
    assert_eq!(view.bus_address, AWAITING_SIGNAL);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(tracker.view().connected);
    second
        .send(Some(r#"{"type":"location","latitude":12.9766,"longitude":77.5946}"#.into()))
        .unwrap();
    settle().await;
    assert_eq!(tracker.view().proximity.unwrap().tier, Tier::Far);

    drop(tracker);

    // the notification survives a restart
    let reloaded = NotificationStore::load(Arc::new(FileStore::open(dir.path()).unwrap()));
    let list = reloaded.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].title, "Notification");
    assert_eq!(list[0].body, "Bus departed");
    assert!(reloaded.has_unread());

    let raw = store.get(NOTIFICATIONS_KEY).unwrap().unwrap();
    assert!(raw.contains("\"isRead\":false"));
}
