use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::{DayLedger, Engine, EngineError};

/// State of every session start on one ledger as of `now`.
pub(crate) fn slot_states(
    field: &FieldInfo,
    ledger: Option<&DayLedger>,
    date: NaiveDate,
    clock: &super::VenueClock,
    now: Ms,
) -> Vec<SlotAvailability> {
    field
        .session_starts()
        .map(|start| {
            let state = if clock.has_started(date, start, now) {
                SlotState::Closed
            } else if let Some(ledger) = ledger {
                if ledger.success_owner(start).is_some() {
                    SlotState::Booked
                } else if ledger.rows().any(|b| {
                    b.status == BookingStatus::Pending && b.is_live(now) && b.slots.contains(start)
                }) {
                    SlotState::Reserved
                } else {
                    SlotState::Open
                }
            } else {
                SlotState::Open
            };
            SlotAvailability { start, state }
        })
        .collect()
}

impl Engine {
    /// Session-by-session view of a field's day.
    pub async fn availability(
        &self,
        field_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let field = self
            .store
            .field(&field_id)
            .ok_or_else(|| EngineError::NotFound(format!("field {field_id}")))?;
        let now = now_ms();
        let clock = self.settings.clock;
        match self.store.ledger(&(field_id, date)) {
            Some(ledger) => {
                let guard = ledger.read().await;
                Ok(slot_states(&field, Some(&guard), date, &clock, now))
            }
            None => Ok(slot_states(&field, None, date, &clock, now)),
        }
    }
}
