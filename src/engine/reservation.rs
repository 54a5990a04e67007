use chrono::NaiveDate;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::RESERVATIONS_TOTAL;

use super::conflict::{classify_conflict, live_conflicts, now_ms, validate_slots, validate_text};
use super::{Engine, EngineError, Txn};

/// A fresh row for `slots` with prices and bounds derived from the field.
fn new_row(field: &FieldInfo, date: NaiveDate, slots: Slots, now: Ms) -> Booking {
    let id = Ulid::new();
    Booking {
        id,
        field_id: field.id,
        user_id: None,
        date,
        start_time: slots.first(),
        end_time: slots.last() + field.session_minutes,
        total_price: field.price_for(&slots),
        slots,
        status: BookingStatus::Pending,
        expired_at: None,
        order_id: id.to_string(),
        transaction_id: None,
        payment_token: None,
        payment_time: None,
        manual_name: None,
        manual_contact: None,
        failure_reason: None,
        refund_review: false,
        created_at: now,
        updated_at: now,
    }
}

fn check_ledger_room(txn: &Txn) -> Result<(), EngineError> {
    if txn.row_count() >= MAX_BOOKINGS_PER_LEDGER {
        return Err(EngineError::LimitExceeded("too many bookings for this field and date"));
    }
    Ok(())
}

fn rejected(err: EngineError) -> EngineError {
    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => err.code()).increment(1);
    err
}

impl Engine {
    /// Hold `slots` for a user as a pending reservation.
    ///
    /// The insert is conditional on no live row owning any of the slots. When it is
    /// refused, the blocking rows decide the error: a settled owner gives
    /// `SlotBooked`, the caller's own pending gives `UserReserved`, anyone else's
    /// gives `SlotReserved`. Expired pendings never block; the reaper owns them.
    pub async fn reserve_slots(
        &self,
        field_id: Ulid,
        user_id: &str,
        date: NaiveDate,
        slots: Vec<Minute>,
    ) -> Result<Booking, EngineError> {
        validate_text(user_id, "user id", MAX_USER_ID_LEN).map_err(rejected)?;
        let field = self.active_field(&field_id).map_err(rejected)?;
        let now = now_ms();
        let slots =
            validate_slots(&field, date, slots, &self.settings.clock, now).map_err(rejected)?;

        let mut txn = self.begin(field_id, date).await;
        let conflicts = live_conflicts(&txn, &slots, now);
        if let Some(err) = classify_conflict(&conflicts, Some(user_id)) {
            warn!("reserve {field_id} {date} [{slots}] by {user_id} refused: {err}");
            return Err(rejected(err));
        }
        check_ledger_room(&txn).map_err(rejected)?;

        let mut booking = new_row(&field, date, slots, now);
        booking.user_id = Some(user_id.to_string());
        booking.expired_at = Some(now + self.settings.hold_ttl_ms);
        txn.stage(booking.clone());
        self.commit(txn).await?;

        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
        info!(
            "reserved {} on {field_id} {date} [{}] for {user_id}",
            booking.id, booking.slots
        );
        Ok(booking)
    }

    /// Staff override: book `slots` as settled without a payment phase.
    ///
    /// Never waits for the ledger lock; contention is `LockedReservation`. A live
    /// pending reservation gives `SlotReserved`, a settled booking `SlotBooked`.
    /// Expired pendings on the same slots are failed in the same commit.
    pub async fn create_manual_booking(
        &self,
        field_id: Ulid,
        date: NaiveDate,
        slots: Vec<Minute>,
        manual_name: &str,
        manual_contact: &str,
    ) -> Result<Booking, EngineError> {
        validate_text(manual_name, "manual name", MAX_NAME_LEN).map_err(rejected)?;
        validate_text(manual_contact, "manual contact", MAX_CONTACT_LEN).map_err(rejected)?;
        let field = self.active_field(&field_id).map_err(rejected)?;
        let now = now_ms();
        let slots =
            validate_slots(&field, date, slots, &self.settings.clock, now).map_err(rejected)?;

        let Some(mut txn) = self.try_begin(field_id, date) else {
            warn!("manual booking on {field_id} {date}: ledger locked");
            return Err(rejected(EngineError::LockedReservation));
        };

        let overlapping = txn.overlapping(&slots);
        if let Some(b) = overlapping
            .iter()
            .find(|b| b.status == BookingStatus::Pending && b.is_live(now))
        {
            return Err(rejected(EngineError::SlotReserved { booking_id: b.id }));
        }
        if let Some(b) = overlapping.iter().find(|b| b.status == BookingStatus::Success) {
            return Err(rejected(EngineError::SlotBooked { booking_id: b.id }));
        }
        check_ledger_room(&txn).map_err(rejected)?;

        let mut booking = new_row(&field, date, slots, now);
        booking.status = BookingStatus::Success;
        booking.payment_time = Some(now);
        booking.manual_name = Some(manual_name.trim().to_string());
        booking.manual_contact = Some(manual_contact.trim().to_string());
        txn.stage(booking.clone());

        let mut preempted = 0usize;
        for mut stale in overlapping
            .into_iter()
            .filter(|b| b.status == BookingStatus::Pending)
        {
            stale.fail(FailureReason::Preempted, now);
            txn.stage(stale);
            preempted += 1;
        }
        self.commit(txn).await?;

        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "manual").increment(1);
        info!(
            "manual booking {} on {field_id} {date} [{}], {preempted} stale reservations failed",
            booking.id, booking.slots
        );
        Ok(booking)
    }
}
