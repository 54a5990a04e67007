use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::config::ReaperSettings;
use crate::engine::{Engine, EngineSettings};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::observability::VENUES_ACTIVE;
use crate::reaper;

/// One engine per venue, keyed by the pgwire `database` parameter.
/// Each venue has its own WAL, expiry reaper and compactor.
pub struct VenueManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    settings: EngineSettings,
    reaper: ReaperSettings,
}

/// Path-safe form of a venue name: alphanumerics, `_` and `-` only.
fn sanitize(venue: &str) -> io::Result<String> {
    if venue.len() > MAX_VENUE_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "venue name too long"));
    }
    let safe: String = venue
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty venue name"));
    }
    Ok(safe)
}

impl VenueManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        settings: EngineSettings,
        reaper: ReaperSettings,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            settings,
            reaper,
        }
    }

    /// Engine for `venue`, replaying its WAL on first use.
    pub fn get_or_create(&self, venue: &str) -> io::Result<Arc<Engine>> {
        let name = sanitize(venue)?;
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_VENUES {
            return Err(io::Error::other("too many venues"));
        }

        // the entry lock keeps two first connections from replaying the same WAL twice
        let engine = match self.engines.entry(name) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{}.wal", slot.key()));
                let engine = Arc::new(Engine::new(
                    wal_path,
                    Arc::new(NotifyHub::new()),
                    self.settings.clone(),
                )?);

                tokio::spawn(reaper::run_reaper(engine.clone(), self.reaper));
                tokio::spawn(reaper::run_compactor(engine.clone(), self.compact_threshold));
                info!("venue {} loaded", slot.key());
                slot.insert(engine.clone());
                engine
            }
        };
        metrics::gauge!(VENUES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn venue_count(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fieldslot_test_venue").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> VenueManager {
        VenueManager::new(dir, 1000, EngineSettings::default(), ReaperSettings::default())
    }

    #[tokio::test]
    async fn venues_are_isolated() {
        let vm = manager(test_data_dir("isolation"));
        let a = vm.get_or_create("venue_a").unwrap();
        let b = vm.get_or_create("venue_b").unwrap();

        let fid = Ulid::new();
        a.register_field(fid, "Court", 100, 480, 1320, None).await.unwrap();
        b.register_field(fid, "Court", 100, 480, 1320, None).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2099, 6, 1).unwrap();
        a.reserve_slots(fid, "u1", date, vec![600]).await.unwrap();
        // the same slot is still free in the other venue
        b.reserve_slots(fid, "u2", date, vec![600]).await.unwrap();
        assert_eq!(vm.venue_count(), 2);
    }

    #[tokio::test]
    async fn venue_lazy_creation() {
        let dir = test_data_dir("lazy");
        let vm = manager(dir.clone());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        vm.get_or_create("my_venue").unwrap();
        assert!(dir.join("my_venue.wal").exists());
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let vm = manager(test_data_dir("same"));
        let e1 = vm.get_or_create("foo").unwrap();
        let e2 = vm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[tokio::test]
    async fn venue_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let vm = manager(dir.clone());

        vm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        // both spellings reach the same venue
        let a = vm.get_or_create("../evil").unwrap();
        let b = vm.get_or_create("evil").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(vm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn venue_name_too_long() {
        let vm = manager(test_data_dir("too_long"));
        let err = vm
            .get_or_create(&"x".repeat(MAX_VENUE_NAME_LEN + 1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("venue name too long"));
    }

    #[tokio::test]
    async fn venue_state_survives_reload() {
        let dir = test_data_dir("reload");
        let fid = Ulid::new();
        {
            let vm = manager(dir.clone());
            let e = vm.get_or_create("club").unwrap();
            e.register_field(fid, "Court", 100, 480, 1320, None).await.unwrap();
        }
        let vm = manager(dir);
        let e = vm.get_or_create("club").unwrap();
        assert_eq!(e.field(&fid).map(|f| f.name), Some("Court".to_string()));
    }
}
