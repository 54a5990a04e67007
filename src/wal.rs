use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// `[u32 len][bincode payload][crc32]`, little-endian.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf` completely, or report a clean/partial end of file as `Ok(false)`.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of reading a venue log back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A torn or corrupt frame was found after the last good one and ignored.
    pub discarded_tail: bool,
}

/// Append-only write-ahead log for one venue.
///
/// Frame layout: `[u32 LE: payload len][bincode Event][u32 LE: crc32 of payload]`.
/// Replay stops at the first frame that is short, fails its checksum, or does not
/// decode; everything before it is trusted.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot to the side file. Slow; run it without holding the writer.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact frame. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut out = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    // zero bytes read is a clean end; anything else is a torn header
                    break;
                }
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                out.discarded_tail = true;
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                out.discarded_tail = true;
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => out.events.push(event),
                Err(_) => {
                    out.discarded_tail = true;
                    break;
                }
            }
        }

        if out.discarded_tail {
            tracing::warn!(
                "wal {}: discarded corrupt tail after {} events",
                path.display(),
                out.events.len()
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, Slots};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fieldslot_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn field_event(id: Ulid) -> Event {
        Event::FieldRegistered {
            id,
            name: "Court 1".into(),
            price: 150_000,
            open_time: 480,
            close_time: 1320,
            session_minutes: 60,
        }
    }

    fn commit_event(field_id: Ulid) -> Event {
        let id = Ulid::new();
        Event::Committed {
            field_id,
            date: NaiveDate::from_ymd_opt(2099, 3, 14).unwrap(),
            rows: vec![Booking {
                id,
                field_id,
                user_id: Some("user-7".into()),
                date: NaiveDate::from_ymd_opt(2099, 3, 14).unwrap(),
                slots: Slots::new([600, 660]).unwrap(),
                start_time: 600,
                end_time: 720,
                total_price: 300_000,
                status: BookingStatus::Pending,
                expired_at: Some(1_000),
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
            }],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let fid = Ulid::new();
        let events = vec![field_event(fid), commit_event(fid)];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert!(!replay.discarded_tail);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = tmp_path("torn_tail.wal");
        let fid = Ulid::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&field_event(fid)).unwrap();
        }
        {
            // header claims 200 bytes, only 3 follow
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&200u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![field_event(fid)]);
        assert!(replay.discarded_tail);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let fid = Ulid::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&field_event(fid)).unwrap();
        }
        {
            let payload = bincode::serialize(&Event::FieldDeactivated { id: fid }).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        // a good frame after the bad one is never reached
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&commit_event(fid)).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events.len(), 1);
        assert!(replay.discarded_tail);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("fieldslot_wal_dir_{}", Ulid::new()));
        let path = dir.join("nested").join("venue.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&field_event(Ulid::new())).unwrap();
        assert!(path.exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let fid = Ulid::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&field_event(fid)).unwrap();
            for _ in 0..20 {
                wal.append(&commit_event(fid)).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 21);
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![field_event(fid)];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            // appends land after the snapshot
            wal.append(&Event::FieldDeactivated { id: fid }).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(
            replay.events,
            vec![field_event(fid), Event::FieldDeactivated { id: fid }]
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_need_flush() {
        let path = tmp_path("buffered.wal");
        let fid = Ulid::new();
        let events: Vec<Event> = (0..4).map(|_| commit_event(fid)).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().events, events);
        let _ = fs::remove_file(&path);
    }
}
