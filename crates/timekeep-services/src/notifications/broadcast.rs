use timekeep_core::{NotificationSink, TrackingEvent};
use tokio::sync::broadcast;

/// Fans tracking events out to in-process subscribers (live dashboards, websocket bridges).
///
/// Publishing never blocks. Events are dropped when nobody is subscribed, and slow
/// subscribers observe `RecvError::Lagged` instead of holding up writers.
#[derive(Clone)]
pub struct BroadcastNotificationSink {
    sender: broadcast::Sender<TrackingEvent>,
}

impl BroadcastNotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastNotificationSink {
    fn publish(&self, event: TrackingEvent) {
        let kind = event.kind();
        let organization_id = event.organization_id();
        if self.sender.send(event).is_err() {
            tracing::debug!(
                event = kind,
                organization_id = %organization_id,
                "No subscribers for tracking event"
            );
        }
    }
}
