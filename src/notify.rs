use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Booking;

const CHANNEL_CAPACITY: usize = 256;

/// Channel carrying lost-race payments that need a manual refund.
pub const REFUND_REVIEW_CHANNEL: &str = "refund_review";

const FIELD_CHANNEL_PREFIX: &str = "field_";

/// Channel for row changes on one field.
pub fn field_channel(field_id: Ulid) -> String {
    format!("{FIELD_CHANNEL_PREFIX}{field_id}")
}

/// Whether a LISTEN target names a channel this server ever sends on.
pub fn is_known_channel(channel: &str) -> bool {
    channel == REFUND_REVIEW_CHANNEL
        || channel
            .strip_prefix(FIELD_CHANNEL_PREFIX)
            .is_some_and(|id| Ulid::from_string(id).is_ok())
}

pub fn booking_payload(b: &Booking) -> String {
    serde_json::json!({
        "id": b.id.to_string(),
        "field_id": b.field_id.to_string(),
        "date": b.date.to_string(),
        "slots": b.slots.as_slice(),
        "status": b.status.as_str(),
        "failure_reason": b.failure_reason.map(|r| r.as_str()),
    })
    .to_string()
}

pub fn refund_payload(b: &Booking, rival: &str) -> String {
    serde_json::json!({
        "booking_id": b.id.to_string(),
        "order_id": b.order_id,
        "transaction_id": b.transaction_id,
        "amount": b.total_price,
        "held_by": rival,
    })
    .to_string()
}

/// Broadcast hub behind LISTEN/NOTIFY, one channel per name.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel, creating it on first use.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a payload. No-op if nobody ever listened.
    pub fn send(&self, channel: &str, payload: String) {
        if let Some(sender) = self.channels.get(channel) {
            let _ = sender.send(payload);
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
