use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::ReaperSettings;
use crate::engine::{now_ms, Engine};
use crate::observability::REAPED_TOTAL;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// One sweep: fail up to `batch` expired reservations. Returns how many were reclaimed.
pub async fn reap_once(engine: &Engine, batch: usize) -> usize {
    let reclaimed = engine.sweep_expired(now_ms(), batch).await;
    for b in &reclaimed {
        info!(
            "reaped expired reservation {} on {} {} [{}]",
            b.id, b.field_id, b.date, b.slots
        );
    }
    metrics::counter!(REAPED_TOTAL).increment(reclaimed.len() as u64);
    reclaimed.len()
}

/// Background task that fails expired pending reservations, forever.
pub async fn run_reaper(engine: Arc<Engine>, settings: ReaperSettings) {
    tokio::time::sleep(settings.startup_delay).await;
    let mut interval = tokio::time::interval(settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let n = reap_once(&engine, settings.batch).await;
        if n == 0 {
            debug!("reaper: nothing expired");
        }
    }
}

/// Compact the WAL if enough appends piled up since the last time. True if it ran.
pub async fn compact_once(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        compact_once(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fieldslot_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str, hold_ttl_ms: Ms) -> Engine {
        let settings = EngineSettings {
            hold_ttl_ms,
            ..Default::default()
        };
        Engine::new(test_wal_path(name), Arc::new(NotifyHub::new()), settings).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2099, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn reaper_fails_expired_reservations() {
        let engine = engine("reap_expired.wal", 0);
        let fid = Ulid::new();
        engine.register_field(fid, "Court", 100, 480, 1320, None).await.unwrap();
        let b = engine.reserve_slots(fid, "u1", day(), vec![600]).await.unwrap();

        assert_eq!(reap_once(&engine, 100).await, 1);
        let after = engine.get_booking(&b.id).await.unwrap();
        assert_eq!(after.status, BookingStatus::Failed);
        assert_eq!(after.failure_reason, Some(FailureReason::Expired));

        // nothing left to reap
        assert_eq!(reap_once(&engine, 100).await, 0);
    }

    #[tokio::test]
    async fn reaper_leaves_live_reservations() {
        let engine = engine("reap_live.wal", 60_000);
        let fid = Ulid::new();
        engine.register_field(fid, "Court", 100, 480, 1320, None).await.unwrap();
        let b = engine.reserve_slots(fid, "u1", day(), vec![600]).await.unwrap();

        assert_eq!(reap_once(&engine, 100).await, 0);
        assert_eq!(
            engine.get_booking(&b.id).await.unwrap().status,
            BookingStatus::Pending
        );
    }

    #[tokio::test]
    async fn reaper_respects_batch() {
        let engine = engine("reap_batch.wal", 0);
        let fid = Ulid::new();
        engine.register_field(fid, "Court", 100, 480, 1320, None).await.unwrap();
        for slot in [480, 540, 600] {
            engine.reserve_slots(fid, "u1", day(), vec![slot]).await.unwrap();
        }
        assert_eq!(reap_once(&engine, 2).await, 2);
        assert_eq!(reap_once(&engine, 2).await, 1);
    }

    #[tokio::test]
    async fn compactor_waits_for_threshold() {
        let engine = engine("compact_threshold.wal", 60_000);
        let fid = Ulid::new();
        engine.register_field(fid, "Court", 100, 480, 1320, None).await.unwrap();
        engine.reserve_slots(fid, "u1", day(), vec![600]).await.unwrap();

        assert!(!compact_once(&engine, 10).await);
        assert!(compact_once(&engine, 2).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
