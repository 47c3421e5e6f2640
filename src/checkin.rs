use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::notifications::NotificationStore;
use crate::services::transport_api::TransportApi;

/// The rider's "riding today" switch.
pub struct CheckIn {
    api: Arc<dyn TransportApi>,
    notifications: Arc<NotificationStore>,
    is_boarding: AtomicBool,
}

impl CheckIn {
    pub fn new(
        api: Arc<dyn TransportApi>,
        notifications: Arc<NotificationStore>,
        is_boarding: bool,
    ) -> Self {
        Self {
            api,
            notifications,
            is_boarding: AtomicBool::new(is_boarding),
        }
    }

    pub fn is_boarding(&self) -> bool {
        self.is_boarding.load(Ordering::SeqCst)
    }

    /// Flips the status locally, then asks the backend to agree.
    ///
    /// On rejection the local status is put back and an "Error" notification
    /// is recorded. Returns the status in effect afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn toggle(&self) -> bool {
        let wanted = !self.is_boarding.fetch_xor(true, Ordering::SeqCst);

        match self.api.check_in(wanted).await {
            Ok(()) => {
                if wanted {
                    self.notifications
                        .add("Checked In", "Driver will be notified to pick you up.");
                } else {
                    self.notifications
                        .add("Checked Out", "You are marked as not riding today.");
                }
                wanted
            }
            Err(e) => {
                warn!(error = %e, is_boarding = wanted, "Check-in update rejected");
                self.is_boarding.store(!wanted, Ordering::SeqCst);
                self.notifications
                    .add("Error", "Could not update status. Try again.");
                !wanted
            }
        }
    }
}
