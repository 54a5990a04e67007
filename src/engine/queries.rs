use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let key = self.store.locate_booking(id)?;
        let ledger = self.store.ledger(&key)?;
        let guard = ledger.read().await;
        guard.get(id).cloned()
    }

    /// Every committed row matching `filter`, unordered.
    async fn scan(&self, filter: &BookingFilter) -> Vec<Booking> {
        let mut out = Vec::new();
        for key in self.ledgers_matching(filter) {
            let Some(ledger) = self.store.ledger(&key) else { continue };
            let guard = ledger.read().await;
            out.extend(guard.rows().filter(|b| filter.matches(b)).cloned());
        }
        out
    }

    /// Matching bookings, newest first, one page at a time.
    pub async fn find_bookings(
        &self,
        filter: &BookingFilter,
        page: Page,
    ) -> Result<Vec<Booking>, EngineError> {
        if page.page == 0 || page.page_size == 0 {
            return Err(EngineError::validation("page and page_size start at 1"));
        }
        if page.page_size > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page size too large"));
        }
        let mut rows = self.scan(filter).await;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip((page.page - 1).saturating_mul(page.page_size))
            .take(page.page_size)
            .collect())
    }

    pub async fn count_bookings(&self, filter: &BookingFilter) -> usize {
        self.scan(filter).await.len()
    }

    /// Revenue from settled bookings paid between `from` and `to` (venue dates, inclusive).
    pub async fn revenue_report(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        field_id: Option<Ulid>,
    ) -> Result<RevenueReport, EngineError> {
        if to < from {
            return Err(EngineError::validation("end date is before start date"));
        }
        if (to - from).num_days() >= MAX_ANALYTICS_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("analytics window too wide"));
        }
        let filter = BookingFilter {
            field_id,
            status: Some(BookingStatus::Success),
            ..Default::default()
        };
        let clock = self.settings.clock;

        let mut report = RevenueReport::default();
        let mut by_field: HashMap<Ulid, (Price, u64)> = HashMap::new();
        let mut by_date: HashMap<NaiveDate, (Price, u64)> = HashMap::new();
        for b in self.scan(&filter).await {
            let Some(paid_at) = b.payment_time else { continue };
            let paid_on = clock.date_of(paid_at);
            if paid_on < from || paid_on > to {
                continue;
            }
            report.total_revenue = report.total_revenue.saturating_add(b.total_price);
            report.total_bookings += 1;
            let f = by_field.entry(b.field_id).or_default();
            f.0 = f.0.saturating_add(b.total_price);
            f.1 += 1;
            let d = by_date.entry(paid_on).or_default();
            d.0 = d.0.saturating_add(b.total_price);
            d.1 += 1;
        }

        report.by_field = by_field
            .into_iter()
            .map(|(field_id, (revenue, bookings))| FieldRevenue {
                field_id,
                revenue,
                bookings,
            })
            .collect();
        report
            .by_field
            .sort_by(|a, b| b.revenue.cmp(&a.revenue).then(a.field_id.cmp(&b.field_id)));
        report.by_date = by_date
            .into_iter()
            .map(|(date, (revenue, bookings))| DateRevenue {
                date,
                revenue,
                bookings,
            })
            .collect();
        report
            .by_date
            .sort_by(|a, b| b.revenue.cmp(&a.revenue).then(a.date.cmp(&b.date)));
        Ok(report)
    }

    pub fn list_fields(&self) -> Vec<FieldInfo> {
        let mut fields = self.store.fields();
        fields.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        fields
    }
}
