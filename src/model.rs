use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// Minute of the venue-local day, `0..1440`.
pub type Minute = u32;

/// Money in the venue currency's smallest unit.
pub type Price = i64;

pub const MINUTES_PER_DAY: Minute = 1440;

/// The time-of-day markers a booking holds on its date: sorted, deduplicated, never empty.
///
/// Two slot sets overlap when they share at least one marker. A partial overlap is a
/// full conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slots(Vec<Minute>);

impl Slots {
    /// Normalize raw markers. Returns `None` for an empty input.
    pub fn new(raw: impl IntoIterator<Item = Minute>) -> Option<Self> {
        let mut v: Vec<Minute> = raw.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        if v.is_empty() { None } else { Some(Self(v)) }
    }

    pub fn as_slice(&self) -> &[Minute] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Minute {
        self.0[0]
    }

    pub fn last(&self) -> Minute {
        self.0[self.0.len() - 1]
    }

    pub fn contains(&self, slot: Minute) -> bool {
        self.0.binary_search(&slot).is_ok()
    }

    /// Non-empty intersection, by a merge walk over both sorted sets.
    pub fn overlaps(&self, other: &Slots) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }
}

impl std::fmt::Display for Slots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|m| m.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// `HH:MM` rendering of a minute-of-day.
pub fn minutes_to_hhmm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Success,
    Failed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Success => "success",
            BookingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "success" => Some(BookingStatus::Success),
            "failed" => Some(BookingStatus::Failed),
            _ => None,
        }
    }
}

/// Why a booking ended up `failed`. Kept on the row for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    Expired,
    Cancelled,
    /// A sibling on an overlapping slot reached `success` first.
    Preempted,
    /// Payment captured after the slot was lost; needs a manual refund.
    LostRace,
    FieldDeactivated,
    PaymentDeclined,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Expired => "expired",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Preempted => "preempted",
            FailureReason::LostRace => "lost_race",
            FailureReason::FieldDeactivated => "field_deactivated",
            FailureReason::PaymentDeclined => "payment_declined",
        }
    }
}

/// One row of the bookings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub field_id: Ulid,
    /// `None` for staff-created bookings.
    pub user_id: Option<String>,
    pub date: NaiveDate,
    pub slots: Slots,
    pub start_time: Minute,
    pub end_time: Minute,
    pub total_price: Price,
    pub status: BookingStatus,
    /// Deadline for a pending reservation. Manual bookings have none.
    pub expired_at: Option<Ms>,
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub payment_token: Option<String>,
    pub payment_time: Option<Ms>,
    pub manual_name: Option<String>,
    pub manual_contact: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub refund_review: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// A pending reservation whose deadline has passed.
    pub fn is_expired(&self, now: Ms) -> bool {
        self.status == BookingStatus::Pending && self.expired_at.is_some_and(|at| at <= now)
    }

    /// Holds its slots right now: settled, or pending within its deadline.
    pub fn is_live(&self, now: Ms) -> bool {
        match self.status {
            BookingStatus::Success => true,
            BookingStatus::Pending => !self.is_expired(now),
            BookingStatus::Failed => false,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn fail(&mut self, reason: FailureReason, now: Ms) {
        self.status = BookingStatus::Failed;
        self.failure_reason = Some(reason);
        self.updated_at = now;
    }
}

/// A bookable field as seen by the reservation core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: Ulid,
    pub name: String,
    /// Price per session.
    pub price: Price,
    pub open_time: Minute,
    pub close_time: Minute,
    pub session_minutes: Minute,
    pub active: bool,
}

impl FieldInfo {
    /// Every session start that fits between open and close.
    pub fn session_starts(&self) -> impl Iterator<Item = Minute> + '_ {
        (self.open_time..)
            .step_by(self.session_minutes.max(1) as usize)
            .take_while(move |s| s + self.session_minutes <= self.close_time)
    }

    pub fn is_session_start(&self, slot: Minute) -> bool {
        slot >= self.open_time
            && slot
                .checked_add(self.session_minutes)
                .is_some_and(|end| end <= self.close_time)
            && (slot - self.open_time) % self.session_minutes == 0
    }

    pub fn price_for(&self, slots: &Slots) -> Price {
        self.price.saturating_mul(slots.len() as Price)
    }
}

/// The event types. This is the WAL record format.
///
/// `Committed` carries the full after-image of every row a transaction wrote, so one
/// record is one atomic unit on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FieldRegistered {
        id: Ulid,
        name: String,
        price: Price,
        open_time: Minute,
        close_time: Minute,
        session_minutes: Minute,
    },
    FieldDeactivated {
        id: Ulid,
    },
    Committed {
        field_id: Ulid,
        date: NaiveDate,
        rows: Vec<Booking>,
    },
}

// ── Query inputs and result types ────────────────────────────────

/// Equality filters over the bookings table; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub id: Option<Ulid>,
    pub field_id: Option<Ulid>,
    pub user_id: Option<String>,
    pub status: Option<BookingStatus>,
    pub date: Option<NaiveDate>,
    /// Lower bound on `date`, inclusive.
    pub from_date: Option<NaiveDate>,
    pub order_id: Option<String>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.id.is_none_or(|id| b.id == id)
            && self.field_id.is_none_or(|f| b.field_id == f)
            && self.user_id.as_ref().is_none_or(|u| b.user_id.as_ref() == Some(u))
            && self.status.is_none_or(|s| b.status == s)
            && self.date.is_none_or(|d| b.date == d)
            && self.from_date.is_none_or(|d| b.date >= d)
            && self.order_id.as_ref().is_none_or(|o| &b.order_id == o)
    }
}

/// 1-based page over a newest-first listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, page_size: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Open,
    Reserved,
    Booked,
    /// Already started today.
    Closed,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Open => "open",
            SlotState::Reserved => "reserved",
            SlotState::Booked => "booked",
            SlotState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAvailability {
    pub start: Minute,
    pub state: SlotState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRevenue {
    pub field_id: Ulid,
    pub revenue: Price,
    pub bookings: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRevenue {
    pub date: NaiveDate,
    pub revenue: Price,
    pub bookings: u64,
}

/// Revenue over settled bookings, grouped three ways. Groups are ordered by revenue, highest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevenueReport {
    pub total_revenue: Price,
    pub total_bookings: u64,
    pub by_field: Vec<FieldRevenue>,
    pub by_date: Vec<DateRevenue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentItem {
    pub id: String,
    pub price: Price,
    pub quantity: u32,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentCallbacks {
    pub finish: String,
    pub error: String,
    pub pending: String,
}

/// Parameters for the gateway's create-transaction call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSession {
    pub order_id: String,
    pub gross_amount: Price,
    pub item: PaymentItem,
    pub callbacks: PaymentCallbacks,
    pub expiry_minutes: i64,
}

/// What a settlement notification did to its booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    NotFound,
    AlreadySuccess,
    /// Booking is now `success`; the listed pending siblings were cascaded to `failed`.
    Settled { booking: Booking, cascaded: Vec<Ulid> },
    /// Payment captured but the slot belongs to someone else. Flagged for refund review.
    LostRace { booking: Booking },
    Updated { booking: Booking, from: BookingStatus },
    Unchanged,
}

impl SettlementOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            SettlementOutcome::NotFound => "NOT_FOUND",
            SettlementOutcome::AlreadySuccess => "ALREADY_SUCCESS",
            SettlementOutcome::Settled { .. } => "SETTLED",
            SettlementOutcome::LostRace { .. } => "LOST_RACE",
            SettlementOutcome::Updated { .. } => "UPDATED",
            SettlementOutcome::Unchanged => "UNCHANGED",
        }
    }
}

/// Reply to the payment gateway. Always an acknowledgement; `outcome` is for logs and callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAck {
    pub order_id: Option<String>,
    pub outcome: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(v: &[Minute]) -> Slots {
        Slots::new(v.iter().copied()).unwrap()
    }

    #[test]
    fn slots_normalized() {
        let s = slots(&[660, 600, 660, 720]);
        assert_eq!(s.as_slice(), &[600, 660, 720]);
        assert_eq!(s.first(), 600);
        assert_eq!(s.last(), 720);
        assert_eq!(s.to_string(), "600,660,720");
    }

    #[test]
    fn slots_empty_rejected() {
        assert!(Slots::new(Vec::new()).is_none());
    }

    #[test]
    fn slots_overlap_is_intersection() {
        let a = slots(&[600, 660]);
        let b = slots(&[660, 720]);
        let c = slots(&[720, 780]);
        assert!(a.overlaps(&b)); // partial overlap counts
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn slots_overlap_interleaved() {
        let a = slots(&[480, 600, 720]);
        let b = slots(&[540, 660, 720]);
        assert!(a.overlaps(&b));
        let c = slots(&[540, 660, 780]);
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn hhmm_rendering() {
        assert_eq!(minutes_to_hhmm(0), "00:00");
        assert_eq!(minutes_to_hhmm(600), "10:00");
        assert_eq!(minutes_to_hhmm(1335), "22:15");
    }

    #[test]
    fn session_starts_fit_inside_hours() {
        let f = FieldInfo {
            id: Ulid::new(),
            name: "A".into(),
            price: 100,
            open_time: 480,
            close_time: 1320,
            session_minutes: 60,
            active: true,
        };
        let starts: Vec<Minute> = f.session_starts().collect();
        assert_eq!(starts.len(), 14);
        assert_eq!(starts[0], 480);
        assert_eq!(*starts.last().unwrap(), 1260);
        assert!(f.is_session_start(600));
        assert!(!f.is_session_start(630)); // misaligned
        assert!(!f.is_session_start(1320)); // would end after close
        assert!(!f.is_session_start(420)); // before open
    }

    fn pending(expired_at: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            field_id: Ulid::new(),
            user_id: Some("u1".into()),
            date: NaiveDate::from_ymd_opt(2099, 6, 1).unwrap(),
            slots: slots(&[600]),
            start_time: 600,
            end_time: 660,
            total_price: 100,
            status: BookingStatus::Pending,
            expired_at: Some(expired_at),
            order_id: String::new(),
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
    fn pending_liveness_follows_deadline() {
        let b = pending(1_000);
        assert!(b.is_live(999));
        assert!(!b.is_expired(999));
        assert!(!b.is_live(1_000)); // deadline is exclusive
        assert!(b.is_expired(1_000));
    }

    #[test]
    fn failed_is_never_live() {
        let mut b = pending(1_000);
        b.fail(FailureReason::Cancelled, 5);
        assert!(!b.is_live(0));
        assert!(!b.is_expired(2_000));
        assert_eq!(b.failure_reason, Some(FailureReason::Cancelled));
        assert_eq!(b.updated_at, 5);
    }

    #[test]
    fn filter_matches_on_every_column() {
        let b = pending(1_000);
        assert!(BookingFilter::default().matches(&b));
        let f = BookingFilter {
            user_id: Some("u1".into()),
            status: Some(BookingStatus::Pending),
            ..Default::default()
        };
        assert!(f.matches(&b));
        let f = BookingFilter {
            user_id: Some("u2".into()),
            ..Default::default()
        };
        assert!(!f.matches(&b));
    }

    #[test]
    fn status_parse() {
        assert_eq!(BookingStatus::parse("SUCCESS"), Some(BookingStatus::Success));
        assert_eq!(BookingStatus::parse("nope"), None);
        assert_eq!(BookingStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::Committed {
            field_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2099, 6, 1).unwrap(),
            rows: vec![pending(1_000)],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
