use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};

use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::store::Txn;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Converts instants into the venue's local calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VenueClock {
    utc_offset_minutes: i32,
}

impl VenueClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self { utc_offset_minutes }
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes
    }

    fn local(&self, at: Ms) -> NaiveDateTime {
        let shifted = at.saturating_add(self.utc_offset_minutes as Ms * 60_000);
        DateTime::from_timestamp_millis(shifted)
            .unwrap_or_default()
            .naive_utc()
    }

    /// Local calendar date of an instant.
    pub fn date_of(&self, at: Ms) -> NaiveDate {
        self.local(at).date()
    }

    pub fn minute_of_day(&self, at: Ms) -> Minute {
        let t = self.local(at).time();
        t.hour() * 60 + t.minute()
    }

    /// True once the session starting at `slot` on `date` has begun.
    pub fn has_started(&self, date: NaiveDate, slot: Minute, now: Ms) -> bool {
        let today = self.date_of(now);
        date < today || (date == today && slot <= self.minute_of_day(now))
    }
}

impl Default for VenueClock {
    fn default() -> Self {
        Self::new(8 * 60)
    }
}

/// Normalize and check a slot request against the field's hours and the venue clock.
pub(crate) fn validate_slots(
    field: &FieldInfo,
    date: NaiveDate,
    raw: Vec<Minute>,
    clock: &VenueClock,
    now: Ms,
) -> Result<Slots, EngineError> {
    if raw.len() > MAX_SLOTS_PER_BOOKING * 4 {
        return Err(EngineError::LimitExceeded("too many slots"));
    }
    let slots = Slots::new(raw).ok_or_else(|| EngineError::validation("no slots given"))?;
    if slots.len() > MAX_SLOTS_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many slots"));
    }
    if date < clock.date_of(now) {
        return Err(EngineError::validation(format!("date {date} is in the past")));
    }
    for &slot in slots.as_slice() {
        if slot >= MINUTES_PER_DAY {
            return Err(EngineError::validation(format!(
                "slot {slot} is not a minute of the day"
            )));
        }
        if !field.is_session_start(slot) {
            return Err(EngineError::validation(format!(
                "slot {} is outside operating hours {}-{}",
                minutes_to_hhmm(slot),
                minutes_to_hhmm(field.open_time),
                minutes_to_hhmm(field.close_time)
            )));
        }
        if clock.has_started(date, slot, now) {
            return Err(EngineError::validation(format!(
                "slot {} has already started",
                minutes_to_hhmm(slot)
            )));
        }
    }
    Ok(slots)
}

pub(crate) fn validate_text(value: &str, what: &'static str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{what} is required")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Rows that hold any of `slots` right now.
pub(super) fn live_conflicts(txn: &Txn, slots: &Slots, now: Ms) -> Vec<Booking> {
    txn.overlapping(slots)
        .into_iter()
        .filter(|b| b.is_live(now))
        .collect()
}

/// Turn live conflicts into the caller-facing reason. Settled beats pending;
/// the caller's own pending beats someone else's.
pub(super) fn classify_conflict(conflicts: &[Booking], user_id: Option<&str>) -> Option<EngineError> {
    if let Some(b) = conflicts.iter().find(|b| b.status == BookingStatus::Success) {
        return Some(EngineError::SlotBooked { booking_id: b.id });
    }
    if let Some(user) = user_id
        && let Some(b) = conflicts.iter().find(|b| b.user_id.as_deref() == Some(user))
    {
        return Some(EngineError::UserReserved { booking_id: b.id });
    }
    conflicts
        .first()
        .map(|b| EngineError::SlotReserved { booking_id: b.id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    // 2099-06-01T02:30:00Z is 10:30 at UTC+8
    const NOW: Ms = 4_083_964_200_000;

    fn field() -> FieldInfo {
        FieldInfo {
            id: Ulid::new(),
            name: "Court".into(),
            price: 100,
            open_time: 480,
            close_time: 1320,
            session_minutes: 60,
            active: true,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn clock_applies_offset() {
        let wita = VenueClock::new(480);
        assert_eq!(wita.date_of(NOW), d(2099, 6, 1));
        assert_eq!(wita.minute_of_day(NOW), 630);
        let utc = VenueClock::new(0);
        assert_eq!(utc.minute_of_day(NOW), 150);
        // 20:00 UTC is already tomorrow at UTC+8
        let late = NOW + 17 * 3_600_000 + 30 * 60_000;
        assert_eq!(utc.date_of(late), d(2099, 6, 1));
        assert_eq!(wita.date_of(late), d(2099, 6, 2));
    }

    #[test]
    fn past_slots_today_rejected() {
        let clock = VenueClock::new(480);
        let f = field();
        let today = d(2099, 6, 1);
        assert!(validate_slots(&f, today, vec![600], &clock, NOW).is_err());
        // 10:30 local; a 10:00 session has started, 11:00 has not
        assert!(validate_slots(&f, today, vec![660], &clock, NOW).is_ok());
        assert!(validate_slots(&f, today, vec![600, 660], &clock, NOW).is_err());
        // any slot tomorrow is fine
        assert!(validate_slots(&f, d(2099, 6, 2), vec![480], &clock, NOW).is_ok());
    }

    #[test]
    fn past_dates_rejected() {
        let clock = VenueClock::new(480);
        let err = validate_slots(&field(), d(2099, 5, 31), vec![900], &clock, NOW).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn operating_hours_enforced() {
        let clock = VenueClock::new(480);
        let f = field();
        let day = d(2099, 6, 2);
        assert!(validate_slots(&f, day, vec![420], &clock, NOW).is_err());
        assert!(validate_slots(&f, day, vec![1320], &clock, NOW).is_err());
        assert!(validate_slots(&f, day, vec![1260], &clock, NOW).is_ok());
        assert!(validate_slots(&f, day, vec![630], &clock, NOW).is_err());
        assert!(validate_slots(&f, day, vec![], &clock, NOW).is_err());
    }

    #[test]
    fn slot_count_capped() {
        let clock = VenueClock::new(480);
        let mut f = field();
        f.open_time = 0;
        f.close_time = 1440;
        f.session_minutes = 30;
        let many: Vec<Minute> = (0..30).map(|i| i * 30).collect();
        let err = validate_slots(&f, d(2099, 6, 2), many, &clock, NOW).unwrap_err();
        assert_eq!(err.code(), "LIMIT_EXCEEDED");
    }

    fn booking(user: Option<&str>, status: BookingStatus) -> Booking {
        let id = Ulid::new();
        Booking {
            id,
            field_id: Ulid::new(),
            user_id: user.map(String::from),
            date: d(2099, 6, 2),
            slots: Slots::new([600]).unwrap(),
            start_time: 600,
            end_time: 660,
            total_price: 100,
            status,
            expired_at: None,
            order_id: id.to_string(),
            transaction_id: None,
            payment_token: None,
            payment_time: None,
            manual_name: None,
            manual_contact: None,
            failure_reason: None,
            refund_review: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn classification_priority() {
        let mine = booking(Some("me"), BookingStatus::Pending);
        let theirs = booking(Some("them"), BookingStatus::Pending);
        let settled = booking(Some("them"), BookingStatus::Success);

        let all = vec![theirs.clone(), mine.clone(), settled.clone()];
        assert!(matches!(
            classify_conflict(&all, Some("me")),
            Some(EngineError::SlotBooked { booking_id }) if booking_id == settled.id
        ));
        let pending = vec![theirs.clone(), mine.clone()];
        assert!(matches!(
            classify_conflict(&pending, Some("me")),
            Some(EngineError::UserReserved { booking_id }) if booking_id == mine.id
        ));
        assert!(matches!(
            classify_conflict(&[theirs.clone()], Some("me")),
            Some(EngineError::SlotReserved { booking_id }) if booking_id == theirs.id
        ));
        assert!(classify_conflict(&[], Some("me")).is_none());
    }
}
