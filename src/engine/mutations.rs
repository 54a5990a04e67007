use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{now_ms, validate_text};
use super::{Engine, EngineError, LedgerKey, WalCommand};

impl Engine {
    pub async fn register_field(
        &self,
        id: Ulid,
        name: &str,
        price: Price,
        open_time: Minute,
        close_time: Minute,
        session_minutes: Option<Minute>,
    ) -> Result<FieldInfo, EngineError> {
        validate_text(name, "field name", MAX_NAME_LEN)?;
        let session_minutes = session_minutes.unwrap_or(60);
        if price < 0 {
            return Err(EngineError::validation("price must not be negative"));
        }
        if price > MAX_PRICE {
            return Err(EngineError::LimitExceeded("price too high"));
        }
        if session_minutes == 0 || session_minutes > MAX_SESSION_MINUTES {
            return Err(EngineError::validation("session length out of range"));
        }
        if open_time >= close_time || close_time > MINUTES_PER_DAY {
            return Err(EngineError::validation(format!(
                "bad operating hours {}-{}",
                minutes_to_hhmm(open_time),
                minutes_to_hhmm(close_time)
            )));
        }
        if open_time + session_minutes > close_time {
            return Err(EngineError::validation("no session fits inside operating hours"));
        }

        let _gate = self.commit_gate.read().await;
        if self.store.field_count() >= MAX_FIELDS_PER_VENUE {
            return Err(EngineError::LimitExceeded("too many fields"));
        }
        if self.store.contains_field(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let field = FieldInfo {
            id,
            name: name.trim().to_string(),
            price,
            open_time,
            close_time,
            session_minutes,
            active: true,
        };
        self.wal_append(Event::FieldRegistered {
            id,
            name: field.name.clone(),
            price,
            open_time,
            close_time,
            session_minutes,
        })
        .await?;
        self.store.insert_field(field.clone());
        info!("registered field {id} ({})", field.name);
        Ok(field)
    }

    /// Take a field out of service and fail its pending bookings from today on.
    /// Settled bookings stay.
    pub async fn deactivate_field(&self, id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let field = self
            .store
            .field(&id)
            .ok_or_else(|| EngineError::NotFound(format!("field {id}")))?;
        if field.active {
            let _gate = self.commit_gate.read().await;
            self.wal_append(Event::FieldDeactivated { id }).await?;
            self.store.set_field_active(&id, false);
        }

        let today = self.settings.clock.date_of(now_ms());
        let filter = BookingFilter {
            field_id: Some(id),
            from_date: Some(today),
            ..Default::default()
        };
        let failed = self
            .update_many(&filter, FailureReason::FieldDeactivated)
            .await?;
        info!("deactivated field {id}, failed {} pending bookings", failed.len());
        Ok(failed)
    }

    /// Fail every pending booking matching `filter`, one transaction per day ledger.
    /// Settled and already-failed rows are never touched.
    pub async fn update_many(
        &self,
        filter: &BookingFilter,
        reason: FailureReason,
    ) -> Result<Vec<Booking>, EngineError> {
        let mut out = Vec::new();
        for (field_id, date) in self.ledgers_matching(filter) {
            let mut txn = self.begin(field_id, date).await;
            let now = now_ms();
            for mut row in txn
                .rows()
                .into_iter()
                .filter(|b| b.status == BookingStatus::Pending && filter.matches(b))
            {
                row.fail(reason, now);
                txn.stage(row);
            }
            out.extend(self.commit(txn).await?);
        }
        Ok(out)
    }

    /// Ledgers a filter can touch, narrowed by its field and date columns.
    pub(super) fn ledgers_matching(&self, filter: &BookingFilter) -> Vec<LedgerKey> {
        if let Some(id) = filter.id {
            return self.store.locate_booking(&id).into_iter().collect();
        }
        if let Some(order) = &filter.order_id {
            return self
                .store
                .booking_for_order(order)
                .and_then(|id| self.store.locate_booking(&id))
                .into_iter()
                .collect();
        }
        let mut keys: Vec<LedgerKey> = self
            .store
            .ledger_keys()
            .into_iter()
            .filter(|(f, d)| {
                filter.field_id.is_none_or(|id| *f == id)
                    && filter.date.is_none_or(|day| *d == day)
                    && filter.from_date.is_none_or(|from| *d >= from)
            })
            .collect();
        keys.sort();
        keys
    }

    /// User or staff cancellation. Only a pending booking can be cancelled.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let mut txn = self.begin_for_booking(&id).await?;
        let mut row = txn
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
        if row.status != BookingStatus::Pending {
            return Err(EngineError::NotPending {
                booking_id: id,
                status: row.status,
            });
        }
        row.fail(FailureReason::Cancelled, now_ms());
        txn.stage(row.clone());
        self.commit(txn).await?;
        info!("cancelled {id}");
        Ok(row)
    }

    /// Expire one booking if its deadline has passed. `None` when there was nothing to do.
    pub async fn expire_booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        let mut txn = self.begin_for_booking(&id).await?;
        let now = now_ms();
        let Some(mut row) = txn.get(&id).filter(|b| b.is_expired(now)).cloned() else {
            return Ok(None);
        };
        row.fail(FailureReason::Expired, now);
        txn.stage(row.clone());
        self.commit(txn).await?;
        Ok(Some(row))
    }

    /// Fail up to `batch` pending reservations whose deadline is at or before `now`.
    ///
    /// Ledgers held by another transaction are skipped, never waited on; their rows
    /// are picked up on a later sweep.
    pub async fn sweep_expired(&self, now: Ms, batch: usize) -> Vec<Booking> {
        let mut reclaimed = Vec::new();
        for (field_id, date) in self.store.ledger_keys() {
            if reclaimed.len() >= batch {
                break;
            }
            let has_work = match self.store.ledger(&(field_id, date)) {
                Some(ledger) => match ledger.try_read() {
                    Ok(guard) => guard.has_expired_pending(now),
                    Err(_) => true,
                },
                None => false,
            };
            if !has_work {
                continue;
            }
            let Some(mut txn) = self.try_begin(field_id, date) else {
                debug!("sweep: {field_id} {date} locked, skipping");
                continue;
            };
            let room = batch - reclaimed.len();
            for mut row in txn
                .rows()
                .into_iter()
                .filter(|b| b.is_expired(now))
                .take(room)
            {
                row.fail(FailureReason::Expired, now);
                txn.stage(row);
            }
            match self.commit(txn).await {
                Ok(rows) => reclaimed.extend(rows),
                Err(e) => warn!("sweep: commit on {field_id} {date} failed: {e}"),
            }
        }
        reclaimed
    }

    /// Events that rebuild the current state: fields first, then one record per ledger.
    async fn snapshot_events(&self) -> Vec<Event> {
        let mut fields = self.store.fields();
        fields.sort_by_key(|f| f.id);
        let mut events = Vec::with_capacity(fields.len());
        for f in &fields {
            events.push(Event::FieldRegistered {
                id: f.id,
                name: f.name.clone(),
                price: f.price,
                open_time: f.open_time,
                close_time: f.close_time,
                session_minutes: f.session_minutes,
            });
            if !f.active {
                events.push(Event::FieldDeactivated { id: f.id });
            }
        }

        let mut keys = self.store.ledger_keys();
        keys.sort();
        for key in keys {
            let Some(ledger) = self.store.ledger(&key) else { continue };
            let guard = ledger.read().await;
            if guard.len() == 0 {
                continue;
            }
            events.push(Event::Committed {
                field_id: key.0,
                date: key.1,
                rows: guard.rows().cloned().collect(),
            });
        }
        events
    }

    /// Rewrite the WAL as a snapshot of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let events = self.snapshot_events().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
