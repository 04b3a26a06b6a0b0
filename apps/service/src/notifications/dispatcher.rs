use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::senders::Notifier;
use crate::database::Store;
use crate::database::models::{Alert, AlertNotification, NotificationChannel};

pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 16;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Fans an alert out to every active channel of its organization.
///
/// A pending [`AlertNotification`] row is written before each send is queued.
/// Sends run detached on a bounded pool and settle their row as sent or
/// failed; they never block the firing that raised the alert.
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        max_concurrent_sends: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            permits: Arc::new(Semaphore::new(max_concurrent_sends.max(1))),
            in_flight: Mutex::new(JoinSet::new()),
            send_timeout,
        }
    }

    /// Queue one send per active channel. Returns how many sends were queued.
    pub async fn dispatch(&self, alert: &Alert, organization_id: Uuid) -> usize {
        let channels = match self.store.find_active_channels(organization_id).await {
            Ok(channels) => channels,
            Err(e) => {
                error!("Failed to load notification channels for {}: {}", organization_id, e);
                return 0;
            }
        };

        if channels.is_empty() {
            debug!("No active notification channels for organization {}", organization_id);
            return 0;
        }

        let mut in_flight = self.in_flight.lock().await;
        // Reap finished sends so the set does not grow without bound
        while in_flight.try_join_next().is_some() {}

        let mut queued = 0;
        for channel in channels.into_iter().filter(|c| c.active) {
            let notification = AlertNotification::pending(alert.id, channel.id);
            if let Err(e) = self.store.create_notification(&notification).await {
                error!("Failed to record notification for channel {}: {}", channel.id, e);
                continue;
            }

            in_flight.spawn(deliver(
                self.store.clone(),
                self.notifier.clone(),
                self.permits.clone(),
                self.send_timeout,
                channel,
                alert.clone(),
                notification,
            ));
            queued += 1;
        }

        info!("Queued {} notification(s) for alert {}", queued, alert.id);
        queued
    }

    /// Number of sends queued or running
    pub async fn pending(&self) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        while in_flight.try_join_next().is_some() {}
        in_flight.len()
    }

    /// Wait up to `grace` for queued sends, then abort the rest.
    pub async fn shutdown(&self, grace: Duration) {
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().await);
        if in_flight.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {} notification send(s) still in flight", in_flight.len());
            in_flight.shutdown().await;
        }
    }
}

async fn deliver(
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
    send_timeout: Duration,
    channel: NotificationChannel,
    alert: Alert,
    mut notification: AlertNotification,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };

    let result = tokio::time::timeout(send_timeout, notifier.send(&channel, &alert)).await;
    match result {
        Ok(Ok(())) => {
            debug!("Sent alert {} via {} channel {}", alert.id, channel.kind, channel.id);
            notification.mark_sent(Utc::now());
        }
        Ok(Err(e)) => {
            warn!("Failed to send alert {} via {} channel {}: {}", alert.id, channel.kind, channel.id, e);
            notification.mark_failed(Utc::now(), e.to_string());
        }
        Err(_) => {
            warn!("Timed out sending alert {} via channel {}", alert.id, channel.id);
            notification.mark_failed(Utc::now(), format!("send timed out after {:?}", send_timeout));
        }
    }

    if let Err(e) = store.update_notification(&notification).await {
        error!("Failed to update notification {}: {}", notification.id, e);
    }
}
