use serde::Deserialize;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::MAX_NOTIFICATION_LEN;
use crate::model::*;
use crate::notify::{self, REFUND_REVIEW_CHANNEL};
use crate::observability::{REFUND_REVIEWS_TOTAL, SETTLEMENTS_TOTAL};

use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Gateway status pair to the booking status it asks for. `None` leaves the row alone.
pub fn map_transaction_status(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> Option<BookingStatus> {
    match transaction_status {
        "settlement" => Some(BookingStatus::Success),
        "capture" => match fraud_status {
            Some("accept") => Some(BookingStatus::Success),
            Some("challenge") => Some(BookingStatus::Pending),
            _ => Some(BookingStatus::Failed),
        },
        "pending" => Some(BookingStatus::Pending),
        "cancel" | "deny" | "expire" => Some(BookingStatus::Failed),
        _ => None,
    }
}

/// The webhook body fields we read; anything else the gateway sends is ignored.
#[derive(Debug, Deserialize)]
struct GatewayNotification {
    order_id: String,
    #[serde(default)]
    transaction_id: Option<String>,
    transaction_status: String,
    #[serde(default)]
    fraud_status: Option<String>,
}

fn settled(outcome: SettlementOutcome) -> Result<SettlementOutcome, EngineError> {
    metrics::counter!(SETTLEMENTS_TOTAL, "outcome" => outcome.code()).increment(1);
    Ok(outcome)
}

impl Engine {
    /// Apply one gateway notification to the booking behind `order_id`.
    ///
    /// Runs under the booking's ledger lock, so notifications for the same order and
    /// for overlapping slots are serialized. A success target is re-validated against
    /// the other settled rows here; if the slot is gone, or the booking already
    /// failed, the payment is a lost race and is flagged for refund review.
    pub async fn process_payment(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
        transaction_status: &str,
        fraud_status: Option<&str>,
    ) -> Result<SettlementOutcome, EngineError> {
        let Some(booking_id) = self.store.booking_for_order(order_id) else {
            return settled(SettlementOutcome::NotFound);
        };
        let Some((field_id, date)) = self.store.locate_booking(&booking_id) else {
            return settled(SettlementOutcome::NotFound);
        };
        let mut txn = self.begin(field_id, date).await;
        let Some(current) = txn.get(&booking_id).cloned() else {
            return settled(SettlementOutcome::NotFound);
        };
        if current.status == BookingStatus::Success {
            return settled(SettlementOutcome::AlreadySuccess);
        }

        let now = now_ms();
        let mut row = current.clone();
        if let Some(tx) = transaction_id {
            row.transaction_id = Some(tx.to_string());
        }

        let Some(target) = map_transaction_status(transaction_status, fraud_status) else {
            warn!("order {order_id}: ignoring transaction status {transaction_status:?}");
            return settled(SettlementOutcome::Unchanged);
        };

        if target == BookingStatus::Success {
            let overlapping = txn.overlapping(&row.slots);
            let rival = overlapping
                .iter()
                .find(|b| b.id != row.id && b.status == BookingStatus::Success)
                .map(|b| b.id);

            if current.refund_review {
                // already flagged; a gateway retry must not alert twice
                return settled(SettlementOutcome::Unchanged);
            }
            if rival.is_some() || current.status == BookingStatus::Failed {
                row.status = BookingStatus::Failed;
                row.failure_reason = Some(FailureReason::LostRace);
                row.refund_review = true;
                row.updated_at = now;
                txn.stage(row.clone());
                self.commit(txn).await?;
                self.raise_refund_alert(&row, rival);
                return settled(SettlementOutcome::LostRace { booking: row });
            }

            row.status = BookingStatus::Success;
            row.payment_time = Some(now);
            row.updated_at = now;
            txn.stage(row.clone());

            let mut cascaded = Vec::new();
            for mut sibling in overlapping
                .into_iter()
                .filter(|b| b.id != row.id && b.status == BookingStatus::Pending)
            {
                sibling.fail(FailureReason::Preempted, now);
                cascaded.push(sibling.id);
                txn.stage(sibling);
            }
            self.commit(txn).await?;
            info!(
                "settled {} (order {order_id}), cascaded {} pending reservations",
                row.id,
                cascaded.len()
            );
            return settled(SettlementOutcome::Settled {
                booking: row,
                cascaded,
            });
        }

        // failed is terminal; same-status notifications only refresh the gateway id
        if current.status == BookingStatus::Failed || target == current.status {
            if row != current {
                row.updated_at = now;
                txn.stage(row);
                self.commit(txn).await?;
            }
            return settled(SettlementOutcome::Unchanged);
        }

        row.status = target;
        row.updated_at = now;
        if target == BookingStatus::Failed {
            row.failure_reason = Some(FailureReason::PaymentDeclined);
        }
        txn.stage(row.clone());
        self.commit(txn).await?;
        info!(
            "order {order_id}: {} -> {}",
            current.status.as_str(),
            row.status.as_str()
        );
        settled(SettlementOutcome::Updated {
            booking: row,
            from: current.status,
        })
    }

    /// Captured money for a slot that went to someone else needs a human.
    fn raise_refund_alert(&self, booking: &Booking, rival: Option<Ulid>) {
        let rival = rival.map(|id| id.to_string()).unwrap_or_else(|| "none".into());
        error!(
            "REFUND REVIEW: payment captured for booking {} (order {}, transaction {}) but the slot is held by {rival}",
            booking.id,
            booking.order_id,
            booking.transaction_id.as_deref().unwrap_or("-")
        );
        metrics::counter!(REFUND_REVIEWS_TOTAL).increment(1);
        self.notify
            .send(REFUND_REVIEW_CHANNEL, notify::refund_payload(booking, &rival));
    }

    /// Webhook boundary. Always acknowledges; failures are logged, never returned.
    pub async fn handle_notification(&self, payload: &str) -> NotificationAck {
        if payload.len() > MAX_NOTIFICATION_LEN {
            warn!("payment notification of {} bytes dropped", payload.len());
            return NotificationAck {
                order_id: None,
                outcome: "INVALID_PAYLOAD",
            };
        }
        let note: GatewayNotification = match serde_json::from_str(payload) {
            Ok(n) => n,
            Err(e) => {
                warn!("unreadable payment notification: {e}");
                return NotificationAck {
                    order_id: None,
                    outcome: "INVALID_PAYLOAD",
                };
            }
        };

        let outcome = match self
            .process_payment(
                &note.order_id,
                note.transaction_id.as_deref(),
                &note.transaction_status,
                note.fraud_status.as_deref(),
            )
            .await
        {
            Ok(outcome) => {
                info!(
                    "payment notification order {} status {}: {}",
                    note.order_id,
                    note.transaction_status,
                    outcome.code()
                );
                outcome.code()
            }
            Err(e) => {
                error!(
                    "payment notification order {} status {} failed: {e}",
                    note.order_id, note.transaction_status
                );
                "ERROR"
            }
        };
        NotificationAck {
            order_id: Some(note.order_id),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table() {
        use BookingStatus::*;
        assert_eq!(map_transaction_status("settlement", None), Some(Success));
        assert_eq!(map_transaction_status("settlement", Some("deny")), Some(Success));
        assert_eq!(map_transaction_status("capture", Some("accept")), Some(Success));
        assert_eq!(map_transaction_status("capture", Some("challenge")), Some(Pending));
        assert_eq!(map_transaction_status("capture", Some("deny")), Some(Failed));
        assert_eq!(map_transaction_status("capture", None), Some(Failed));
        assert_eq!(map_transaction_status("pending", None), Some(Pending));
        assert_eq!(map_transaction_status("cancel", None), Some(Failed));
        assert_eq!(map_transaction_status("deny", None), Some(Failed));
        assert_eq!(map_transaction_status("expire", None), Some(Failed));
        assert_eq!(map_transaction_status("refund", None), None);
    }
}
