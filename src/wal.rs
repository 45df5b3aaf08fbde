use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only write-ahead log of booking events.
///
/// Entry format: `[u32: len][bincode: Event][u32: crc32]`, little-endian.
/// `len` covers the bincode payload only. A truncated or corrupt trailing
/// entry (crash mid-write) is discarded on replay; everything before it is
/// kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// Set after a failed write or flush: a torn entry may sit at the tail,
    /// and replay stops at the first bad entry, so nothing appended after it
    /// would ever be read back. Compaction rewrites the log and clears this.
    poisoned: bool,
}

/// Upper bound on one encoded entry. A length prefix beyond this is a
/// corrupt tail, not an allocation request.
const MAX_ENTRY_LEN: u32 = 1 << 20;

fn poisoned_err() -> io::Error {
    io::Error::other("log tail may be torn by an earlier write failure")
}

fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Decode the next entry. `Ok(None)` means clean EOF or a damaged tail —
/// either way replay stops there.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    let mut crc_buf = [0u8; 4];
    for buf in [payload.as_mut_slice(), &mut crc_buf[..]] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    }

    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            poisoned: false,
        })
    }

    /// Append + fsync in one call. Production code goes through
    /// `append_buffered` + `flush_sync` for group commit instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event without flushing. Durable only after `flush_sync`.
    /// Fails on a poisoned log until compaction rewrites it.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(poisoned_err());
        }
        if let Err(e) = encode_event(&mut self.writer, event) {
            self.poisoned = true;
            return Err(e);
        }
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered entries and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(poisoned_err());
        }
        match self.writer.flush().and_then(|()| self.writer.get_ref().sync_all()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    #[cfg(test)]
    fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write the compacted event set to a temp file and fsync it.
    /// This is the slow I/O phase — run it before taking over the writer.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Atomically rename the temp file over the log and reopen for append.
    /// The rename discards any torn tail, so this also clears the poison.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Both compaction phases back to back. Test convenience.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read back every valid event. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = decode_event(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingKind, Event, ResourceRef, Span};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("cadenza_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn committed(start: i64, end: i64) -> Event {
        Event::BookingCommitted {
            booking: Booking {
                id: Ulid::new(),
                kind: BookingKind::Reservation,
                title: "Practice".into(),
                span: Span::new(start, end),
                resources: vec![ResourceRef::room(Ulid::new()), ResourceRef::student(Ulid::new())],
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![committed(1000, 2000), Event::BookingCancelled { id: Ulid::new() }];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_discards_truncated_tail() {
        let path = tmp_path("truncation.wal");
        let event = committed(0, 100);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            // Partial length prefix plus a few stray bytes.
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let event = Event::BookingCancelled { id: Ulid::new() };

        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_absurd_length_prefix() {
        let path = tmp_path("huge_len.wal");
        let kept = committed(0, 1000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            // A corrupt prefix claiming a 4 GiB entry, followed by garbage.
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 32]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn poisoned_log_rejects_appends_until_compacted() {
        let path = tmp_path("poisoned.wal");
        let kept = committed(0, 1000);

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        // After a write failure nothing more may be appended or flushed:
        // replay would stop at the torn entry and silently drop it all.
        wal.poison();
        assert!(wal.append_buffered(&committed(2000, 3000)).is_err());
        assert!(wal.flush_sync().is_err());

        // Compaction rewrites the log from scratch and clears the poison.
        wal.compact(std::slice::from_ref(&kept)).unwrap();
        let fresh = committed(5000, 6000);
        wal.append(&fresh).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, fresh]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_log() {
        let path = tmp_path("compact_reduce.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            // Churn: commit and immediately cancel many bookings.
            for _ in 0..10 {
                let event = committed(0, 1000);
                let Event::BookingCommitted { ref booking } = event else { unreachable!() };
                let id = booking.id;
                wal.append(&event).unwrap();
                wal.append(&Event::BookingCancelled { id }).unwrap();
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        let survivor = committed(5000, 6000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&survivor)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![survivor]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let kept = committed(0, 1000);
        let fresh = committed(2000, 3000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            wal.compact(std::slice::from_ref(&kept)).unwrap();
            wal.append(&fresh).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, fresh]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_flush_together() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|i| committed(i * 100, i * 100 + 50)).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
