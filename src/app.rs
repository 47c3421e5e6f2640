//! Wiring for a signed-in client.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::checkin::CheckIn;
use crate::config::Config;
use crate::driver::{BroadcastScheduler, DriverDashboard, PositionSensor};
use crate::error::TrackerError;
use crate::fetch::BasicClient;
use crate::fetch::auth::Bearer;
use crate::infra::backend::BackendClient;
use crate::notifications::NotificationStore;
use crate::services::transport_api::TransportApi;
use crate::session::{Connector, SessionManager, WsConnector};
use crate::storage::{self, FileStore, KeyValueStore};
use crate::tracker::RiderTracker;

/// Everything a host needs to drive the rider or driver screens.
pub struct TransitClient {
    config: Config,
    token: String,
    api: Arc<dyn TransportApi>,
    sessions: SessionManager,
    notifications: Arc<NotificationStore>,
    store: Arc<dyn KeyValueStore>,
}

impl TransitClient {
    /// Builds the production client: file storage under
    /// `config.storage_dir`, WebSocket sessions and the REST backend.
    pub fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.storage_dir)?);
        Self::with_parts(config, store, Arc::new(WsConnector))
    }

    /// Builds a client over caller-provided storage and socket transport.
    ///
    /// Fails with [`TrackerError::NotSignedIn`] when no access token is stored.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let token = storage::load_access_token(store.as_ref())?.ok_or(TrackerError::NotSignedIn)?;

        let http = Bearer::new(BasicClient::new()?, &token)?;
        let api: Arc<dyn TransportApi> = Arc::new(BackendClient::new(&config.backend_url, http));
        let sessions = SessionManager::new(connector, &config);
        let notifications = Arc::new(NotificationStore::load(store.clone()));

        info!(backend = %config.backend_url, live = %config.ws_url, "Client ready");
        Ok(Self {
            config,
            token,
            api,
            sessions,
            notifications,
            store,
        })
    }

    pub fn notifications(&self) -> Arc<NotificationStore> {
        self.notifications.clone()
    }

    pub fn api(&self) -> Arc<dyn TransportApi> {
        self.api.clone()
    }

    pub async fn track_rider(&self) -> Result<RiderTracker, TrackerError> {
        RiderTracker::start(
            self.api.clone(),
            &self.sessions,
            &self.token,
            self.notifications.clone(),
        )
        .await
    }

    pub async fn driver_dashboard(&self) -> Result<DriverDashboard, TrackerError> {
        DriverDashboard::start(
            self.api.clone(),
            &self.sessions,
            &self.token,
            self.notifications.clone(),
        )
        .await
    }

    pub fn broadcaster(&self, sensor: Arc<dyn PositionSensor>) -> BroadcastScheduler {
        BroadcastScheduler::new(self.api.clone(), sensor, self.config.broadcast_interval)
    }

    /// `is_boarding` is the rider's status as last loaded from the route.
    pub fn check_in(&self, is_boarding: bool) -> CheckIn {
        CheckIn::new(self.api.clone(), self.notifications.clone(), is_boarding)
    }

    /// Forgets the stored token. Running trackers keep their sessions until dropped.
    pub fn logout(self) -> Result<()> {
        storage::clear_access_token(self.store.as_ref())?;
        info!("Signed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::ScriptedConnector;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_requires_token() {
        let store = Arc::new(MemoryStore::new());
        let err = TransitClient::with_parts(
            Config::default(),
            store,
            Arc::new(ScriptedConnector::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_token() {
        let store = Arc::new(MemoryStore::new());
        storage::save_access_token(store.as_ref(), "jwt-abc").unwrap();

        let client = TransitClient::with_parts(
            Config::default(),
            store.clone(),
            Arc::new(ScriptedConnector::default()),
        )
        .unwrap();
        client.notifications().add("Hello", "");
        client.logout().unwrap();

        assert_eq!(storage::load_access_token(store.as_ref()).unwrap(), None);
        assert!(store.get(storage::NOTIFICATIONS_KEY).unwrap().is_some());
    }
}
