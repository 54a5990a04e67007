use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_TOKEN_LEN;
use crate::model::*;

use super::conflict::{now_ms, validate_text};
use super::{Engine, EngineError, Txn};

const ITEM_CATEGORY: &str = "Sports Venue";

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Line-item label, e.g. `"Court 1 - 2 slot(s)"`, capped for the gateway.
pub(crate) fn item_name(field_name: &str, slot_count: usize) -> String {
    let label = format!("{} - {slot_count} slot(s)", truncate_chars(field_name, 30));
    truncate_chars(&label, 50)
}

impl Engine {
    /// Fail a pending booking whose deadline passed, inside the caller's transaction.
    async fn expire_in(&self, mut txn: Txn, booking: &Booking, now: Ms) -> Result<Booking, EngineError> {
        let mut row = booking.clone();
        row.fail(FailureReason::Expired, now);
        txn.stage(row.clone());
        self.commit(txn).await?;
        info!("expired {} on request", row.id);
        Ok(row)
    }

    /// Lock the booking's ledger and hand back a live pending row, expiring it first
    /// if its deadline already passed.
    async fn live_pending(&self, booking_id: &Ulid) -> Result<(Txn, Booking, Ms), EngineError> {
        let txn = self.begin_for_booking(booking_id).await?;
        let booking = txn
            .get(booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::NotPending {
                booking_id: booking.id,
                status: booking.status,
            });
        }
        let now = now_ms();
        if booking.is_expired(now) {
            self.expire_in(txn, &booking, now).await?;
            return Err(EngineError::Expired(booking.id));
        }
        Ok((txn, booking, now))
    }

    /// Gateway parameters for paying a pending booking.
    ///
    /// The session expires with the reservation: `expiry_minutes` is what is left of
    /// the hold, rounded up.
    pub async fn create_payment_session(&self, booking_id: Ulid) -> Result<PaymentSession, EngineError> {
        let (txn, booking, now) = self.live_pending(&booking_id).await?;
        drop(txn);

        if self
            .settings
            .clock
            .has_started(booking.date, booking.start_time, now)
        {
            return Err(EngineError::validation(format!(
                "slot {} on {} has already started",
                minutes_to_hhmm(booking.start_time),
                booking.date
            )));
        }
        let field = self
            .store
            .field(&booking.field_id)
            .ok_or_else(|| EngineError::NotFound(format!("field {}", booking.field_id)))?;

        let remaining_ms = booking.expired_at.map_or(self.settings.hold_ttl_ms, |at| at - now);
        let expiry_minutes = ((remaining_ms + 59_999) / 60_000).max(1);
        let base = self.settings.base_url.trim_end_matches('/');
        let callback = |outcome: &str| format!("{base}/payment/{outcome}?fieldID={}", field.id);

        Ok(PaymentSession {
            order_id: booking.order_id.clone(),
            gross_amount: booking.total_price,
            item: PaymentItem {
                id: field.id.to_string(),
                price: field.price,
                quantity: booking.slots.len() as u32,
                name: item_name(&field.name, booking.slots.len()),
                category: ITEM_CATEGORY.to_string(),
            },
            callbacks: PaymentCallbacks {
                finish: callback("success"),
                error: callback("failed"),
                pending: callback("pending"),
            },
            expiry_minutes,
        })
    }

    /// Remember the gateway's token for a pending booking.
    pub async fn attach_payment_token(&self, booking_id: Ulid, token: &str) -> Result<Booking, EngineError> {
        validate_text(token, "payment token", MAX_TOKEN_LEN)?;
        let (mut txn, booking, now) = self.live_pending(&booking_id).await?;
        let mut row = booking;
        row.payment_token = Some(token.to_string());
        row.updated_at = now;
        txn.stage(row.clone());
        self.commit(txn).await?;
        Ok(row)
    }
}
