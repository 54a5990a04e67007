mod availability;
mod conflict;
mod error;
mod mutations;
mod payment;
mod queries;
mod reservation;
mod settlement;
mod store;

pub use conflict::VenueClock;
pub(crate) use conflict::now_ms;
pub use error::EngineError;
pub use settlement::map_transaction_status;
pub use store::{DayLedger, InMemoryStore, LedgerKey, Txn};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{self, NotifyHub};
use crate::observability;
use crate::wal::Wal;

/// Per-venue knobs the engine needs at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a pending reservation holds its slots.
    pub hold_ttl_ms: Ms,
    pub clock: VenueClock,
    /// Origin for payment callback URLs.
    pub base_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hold_ttl_ms: 10 * 60_000,
            clock: VenueClock::default(),
            base_url: "http://localhost:3000".into(),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppends = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Owns the WAL. Each wakeup takes every append already queued and makes them
/// durable with a single fsync; control commands run after the batch ahead of them.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: PendingAppends = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut control = None;
        match first {
            WalCommand::Append { event, response } => batch.push((event, response)),
            other => control = Some(other),
        }
        while control.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => control = Some(other),
                Err(_) => break,
            }
        }
        if !batch.is_empty() {
            flush_batch(&mut wal, &mut batch);
        }
        if let Some(cmd) = control {
            handle_control(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut PendingAppends) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // flush regardless so a failed batch does not bleed into the next one
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            flush_batch(wal, &mut batch);
        }
    }
}

/// One venue's reservation engine.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub settings: EngineSettings,
    /// Shared by every open transaction; compaction takes it exclusively so its
    /// snapshot and the log swap see no commit in between.
    pub(super) commit_gate: Arc<RwLock<()>>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, settings: EngineSettings) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::new();
        let mut ledgers: HashMap<LedgerKey, DayLedger> = HashMap::new();
        let replayed = replay.events.len();
        for event in replay.events {
            match event {
                Event::FieldRegistered {
                    id,
                    name,
                    price,
                    open_time,
                    close_time,
                    session_minutes,
                } => store.insert_field(FieldInfo {
                    id,
                    name,
                    price,
                    open_time,
                    close_time,
                    session_minutes,
                    active: true,
                }),
                Event::FieldDeactivated { id } => store.set_field_active(&id, false),
                Event::Committed { field_id, date, rows } => {
                    let ledger = ledgers
                        .entry((field_id, date))
                        .or_insert_with(|| DayLedger::new(field_id, date));
                    for row in rows {
                        store.index_row(&row);
                        ledger.apply(row);
                    }
                }
            }
        }
        for (_, ledger) in ledgers {
            store.insert_ledger(ledger);
        }
        if replayed > 0 {
            tracing::info!(
                "replayed {replayed} events from {} ({} fields)",
                wal_path.display(),
                store.field_count()
            );
        }

        Ok(Self {
            store,
            wal_tx,
            notify,
            settings,
            commit_gate: Arc::new(RwLock::new(())),
        })
    }

    /// Hand an event to the group-commit writer and wait until it is durable.
    pub(super) async fn wal_append(&self, event: Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn field(&self, id: &Ulid) -> Option<FieldInfo> {
        self.store.field(id)
    }

    pub(super) fn active_field(&self, id: &Ulid) -> Result<FieldInfo, EngineError> {
        let field = self
            .store
            .field(id)
            .ok_or_else(|| EngineError::NotFound(format!("field {id}")))?;
        if !field.active {
            return Err(EngineError::FieldInactive(*id));
        }
        Ok(field)
    }

    /// Open a transaction on a day ledger, waiting for its lock.
    pub async fn begin(&self, field_id: Ulid, date: NaiveDate) -> Txn {
        let gate = self.commit_gate.clone().read_owned().await;
        let ledger = self.store.ledger_or_create((field_id, date));
        Txn::new(gate, ledger.write_owned().await)
    }

    /// Open a transaction only if the ledger is free right now.
    pub fn try_begin(&self, field_id: Ulid, date: NaiveDate) -> Option<Txn> {
        let gate = self.commit_gate.clone().try_read_owned().ok()?;
        let ledger = self.store.ledger_or_create((field_id, date));
        let guard = ledger.try_write_owned().ok()?;
        Some(Txn::new(gate, guard))
    }

    /// Make a transaction's staged rows durable and visible as one unit.
    ///
    /// The unique index over settled rows is checked here, after whatever the caller
    /// checked, and a violation aborts the whole transaction.
    pub async fn commit(&self, txn: Txn) -> Result<Vec<Booking>, EngineError> {
        let (_gate, mut guard, rows) = txn.into_parts();
        if rows.is_empty() {
            return Ok(rows);
        }
        guard.check_unique(&rows)?;

        let event = Event::Committed {
            field_id: guard.field_id,
            date: guard.date,
            rows: rows.clone(),
        };
        self.wal_append(event).await?;

        for row in &rows {
            self.store.index_row(row);
            guard.apply(row.clone());
        }
        drop(guard);

        for row in &rows {
            self.notify
                .send(&notify::field_channel(row.field_id), notify::booking_payload(row));
        }
        Ok(rows)
    }

    /// Locate a booking and open a transaction on its ledger.
    pub(super) async fn begin_for_booking(&self, booking_id: &Ulid) -> Result<Txn, EngineError> {
        let (field_id, date) = self
            .store
            .locate_booking(booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        Ok(self.begin(field_id, date).await)
    }
}
