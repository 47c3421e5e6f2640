//! Driver location broadcasting.
//!
//! After one successful initial fix the scheduler publishes immediately, then
//! keeps a sensor watch that only refreshes the local position and a fixed
//! timer that publishes whatever the watch saw last. Publishing never stops
//! the scheduler; failures become a warning on [`BroadcastStatus`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, warn};

use super::sensor::{Fix, PositionSensor};
use crate::error::SensorError;
use crate::geo::Coordinate;
use crate::services::transport_api::TransportApi;
use crate::tracker::ADDRESS_UNKNOWN;

pub const PUBLISH_WARNING: &str = "Failed to send location. Session may be expired.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    Idle,
    Acquiring,
    Broadcasting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastStatus {
    pub state: BroadcastState,
    /// Latest fix from the sensor.
    pub position: Option<Coordinate>,
    /// Address of the last published fix.
    pub address: Option<String>,
    pub warning: Option<String>,
}

impl Default for BroadcastStatus {
    fn default() -> Self {
        Self {
            state: BroadcastState::Idle,
            position: None,
            address: None,
            warning: None,
        }
    }
}

pub struct BroadcastScheduler {
    api: Arc<dyn TransportApi>,
    sensor: Arc<dyn PositionSensor>,
    period: Duration,
    status: Arc<watch::Sender<BroadcastStatus>>,
    /// Bumped on every start and stop; results from older runs are ignored.
    run: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl BroadcastScheduler {
    pub fn new(api: Arc<dyn TransportApi>, sensor: Arc<dyn PositionSensor>, period: Duration) -> Self {
        let (status, _) = watch::channel(BroadcastStatus::default());
        Self {
            api,
            sensor,
            period,
            status: Arc::new(status),
            run: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn status(&self) -> BroadcastStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<BroadcastStatus> {
        self.status.subscribe()
    }

    /// Acquires an initial fix and starts broadcasting.
    ///
    /// A failed fix leaves the scheduler idle with the sensor error as the
    /// warning. Calling this while broadcasting does nothing.
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), SensorError> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Already broadcasting");
            return Ok(());
        }

        self.status.send_modify(|s| {
            s.state = BroadcastState::Acquiring;
            s.warning = None;
        });

        let position = match self.sensor.current_position().await {
            Ok(position) => position,
            Err(e) => {
                warn!(code = e.code, message = %e.message, "Initial fix failed");
                self.status.send_modify(|s| {
                    s.state = BroadcastState::Idle;
                    s.warning = Some(format!("Initial Location Error {e}."));
                });
                return Err(e);
            }
        };

        let run = self.run.fetch_add(1, Ordering::SeqCst) + 1;
        let publisher = Publisher {
            api: self.api.clone(),
            status: self.status.clone(),
            current: self.run.clone(),
            run,
            issued: Arc::new(AtomicU64::new(0)),
            applied: Arc::new(AtomicU64::new(0)),
        };

        self.status.send_modify(|s| {
            s.state = BroadcastState::Broadcasting;
            s.position = Some(position);
        });
        info!(latitude = position.latitude, longitude = position.longitude, "Broadcasting started");
        publisher.spawn(position);

        let driver = Driver {
            fixes: self.sensor.watch_position(),
            period: self.period,
            latest: position,
            publisher,
        };
        self.task = Some(tokio::spawn(
            driver.run().instrument(tracing::info_span!("broadcast", run)),
        ));
        Ok(())
    }

    /// Cancels the watch and the timer. Never fails.
    pub fn stop(&mut self) {
        self.run.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Broadcasting stopped");
        }
        self.status.send_modify(|s| {
            s.state = BroadcastState::Idle;
            s.warning = None;
        });
    }
}

impl Drop for BroadcastScheduler {
    fn drop(&mut self) {
        self.run.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Driver {
    fixes: mpsc::Receiver<Fix>,
    period: Duration,
    latest: Coordinate,
    publisher: Publisher,
}

impl Driver {
    async fn run(mut self) {
        let mut ticks = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;

        loop {
            tokio::select! {
                fix = self.fixes.recv(), if watching => match fix {
                    Some(Ok(position)) => {
                        self.latest = position;
                        self.publisher
                            .status
                            .send_modify(|s| s.position = Some(position));
                    }
                    Some(Err(e)) => {
                        warn!(code = e.code, message = %e.message, "Position watch error");
                        self.publisher
                            .status
                            .send_modify(|s| s.warning = Some(format!("Watch Error {e}.")));
                    }
                    None => {
                        debug!("Position watch ended");
                        watching = false;
                    }
                },
                _ = ticks.tick() => self.publisher.spawn(self.latest),
            }
        }
    }
}

#[derive(Clone)]
struct Publisher {
    api: Arc<dyn TransportApi>,
    status: Arc<watch::Sender<BroadcastStatus>>,
    current: Arc<AtomicU64>,
    run: u64,
    /// Sequence number of the newest publish sent in this run.
    issued: Arc<AtomicU64>,
    /// Sequence number of the newest publish whose result was applied.
    applied: Arc<AtomicU64>,
}

impl Publisher {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.run
    }

    /// Fire-and-forget; the request outlives a stop but its result is dropped.
    fn spawn(&self, position: Coordinate) {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        tokio::spawn(this.publish(seq, position).in_current_span());
    }

    async fn publish(self, seq: u64, position: Coordinate) {
        let sent = self.api.update_location(position).await;
        if !self.is_current() {
            debug!(seq, "Ignoring publish result from a stopped run");
            return;
        }
        if self.applied.fetch_max(seq, Ordering::SeqCst) > seq {
            debug!(seq, "Ignoring result of an older publish");
            return;
        }
        match sent {
            Ok(()) => {
                debug!(latitude = position.latitude, longitude = position.longitude, "Location published");
                self.status.send_modify(|s| s.warning = None);
            }
            Err(e) => {
                warn!(error = %e, "Location publish failed");
                self.status
                    .send_modify(|s| s.warning = Some(PUBLISH_WARNING.to_string()));
            }
        }

        let address = match self.api.reverse_geocode(position).await {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "Reverse geocode failed");
                ADDRESS_UNKNOWN.to_string()
            }
        };
        if self.is_current() && self.applied.load(Ordering::SeqCst) == seq {
            self.status.send_modify(|s| s.address = Some(address));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sensor::testing::FakeSensor;
    use crate::services::transport_api::testing::FakeApi;

    const PERIOD: Duration = Duration::from_secs(10);
    const HOME: Coordinate = Coordinate {
        latitude: 12.97,
        longitude: 77.59,
    };

    fn scheduler(api: &Arc<FakeApi>, sensor: &Arc<FakeSensor>) -> BroadcastScheduler {
        BroadcastScheduler::new(api.clone(), sensor.clone(), PERIOD)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_publish_then_one_per_tick() {
        let api = Arc::new(FakeApi::default());
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = scheduler(&api, &sensor);

        scheduler.start().await.unwrap();
        settle().await;
        assert_eq!(scheduler.status().state, BroadcastState::Broadcasting);
        assert_eq!(api.publish_count(), 1);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(api.publish_count(), 4);

        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(api.publish_count(), 4);
        assert_eq!(scheduler.status().state, BroadcastState::Idle);
        assert!(!sensor.watching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_updates_position_but_only_timer_publishes() {
        let api = Arc::new(FakeApi::default());
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = scheduler(&api, &sensor);
        scheduler.start().await.unwrap();
        settle().await;

        let moved = Coordinate::new(12.98, 77.60);
        let elsewhere = Coordinate::new(12.99, 77.61);
        assert!(sensor.push(Ok(moved)).await);
        assert!(sensor.push(Ok(elsewhere)).await);
        settle().await;

        assert_eq!(scheduler.status().position, Some(elsewhere));
        assert_eq!(api.publish_count(), 1);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(*api.published.lock().unwrap(), vec![HOME, elsewhere]);
        assert_eq!(scheduler.status().address.as_deref(), Some("12.9900,77.6100"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_fix_stays_idle() {
        let api = Arc::new(FakeApi::default());
        let sensor = Arc::new(FakeSensor::failing(SensorError::new(
            SensorError::PERMISSION_DENIED,
            "User denied Geolocation",
        )));
        let mut scheduler = scheduler(&api, &sensor);

        let err = scheduler.start().await.unwrap_err();
        assert_eq!(err.code, SensorError::PERMISSION_DENIED);

        tokio::time::sleep(PERIOD * 3).await;
        let status = scheduler.status();
        assert_eq!(status.state, BroadcastState::Idle);
        assert_eq!(
            status.warning.as_deref(),
            Some("Initial Location Error (1): User denied Geolocation.")
        );
        assert_eq!(api.publish_count(), 0);
        assert_eq!(sensor.watches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_warns_and_keeps_running() {
        let api = Arc::new(FakeApi::default());
        api.fail_publish.store(true, Ordering::SeqCst);
        api.fail_geocode.store(true, Ordering::SeqCst);
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = scheduler(&api, &sensor);

        scheduler.start().await.unwrap();
        settle().await;
        let status = scheduler.status();
        assert_eq!(status.warning.as_deref(), Some(PUBLISH_WARNING));
        assert_eq!(status.address.as_deref(), Some(ADDRESS_UNKNOWN));

        api.fail_publish.store(false, Ordering::SeqCst);
        tokio::time::sleep(PERIOD).await;
        assert_eq!(api.publish_count(), 2);
        assert_eq!(scheduler.status().state, BroadcastState::Broadcasting);
        assert_eq!(scheduler.status().warning, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_answered_after_stop_is_ignored() {
        let api = Arc::new(FakeApi::default());
        api.fail_publish.store(true, Ordering::SeqCst);
        api.publish_delays
            .lock()
            .unwrap()
            .push_back(Duration::from_secs(2));
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = scheduler(&api, &sensor);

        scheduler.start().await.unwrap();
        settle().await;
        assert_eq!(api.publish_count(), 1);
        scheduler.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let status = scheduler.status();
        assert_eq!(status.state, BroadcastState::Idle);
        assert_eq!(status.warning, None);
        assert_eq!(status.address, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_failed_publish_does_not_override_newer_success() {
        let api = Arc::new(FakeApi::default());
        api.fail_publish.store(true, Ordering::SeqCst);
        api.publish_delays
            .lock()
            .unwrap()
            .extend([Duration::from_secs(5), Duration::ZERO, Duration::ZERO]);
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = BroadcastScheduler::new(api.clone(), sensor.clone(), Duration::from_secs(2));

        scheduler.start().await.unwrap();
        settle().await;
        api.fail_publish.store(false, Ordering::SeqCst);

        // ticks at 2s and 4s succeed; the first publish fails at 5s
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(api.publish_count(), 3);
        let status = scheduler.status();
        assert_eq!(status.state, BroadcastState::Broadcasting);
        assert_eq!(status.warning, None);
        assert_eq!(status.address.as_deref(), Some("12.9700,77.5900"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_error_is_surfaced() {
        let api = Arc::new(FakeApi::default());
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = scheduler(&api, &sensor);
        scheduler.start().await.unwrap();
        settle().await;

        sensor
            .push(Err(SensorError::new(SensorError::TIMEOUT, "Timeout expired")))
            .await;
        settle().await;

        assert_eq!(
            scheduler.status().warning.as_deref(),
            Some("Watch Error (3): Timeout expired.")
        );
        assert_eq!(scheduler.status().state, BroadcastState::Broadcasting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_a_no_op() {
        let api = Arc::new(FakeApi::default());
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = scheduler(&api, &sensor);

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        settle().await;
        assert_eq!(api.publish_count(), 1);
        assert_eq!(sensor.watches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_watch_and_timer() {
        let api = Arc::new(FakeApi::default());
        let sensor = Arc::new(FakeSensor::at(HOME));
        let mut scheduler = scheduler(&api, &sensor);
        scheduler.start().await.unwrap();
        settle().await;

        drop(scheduler);
        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(api.publish_count(), 1);
        assert!(!sensor.watching());
    }
}
