use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Largest payload replay will believe. A length beyond this is garbage.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Outcome of reading one record during replay.
enum Record {
    /// An intact event and its size on disk.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Truncated or corrupt tail; everything from here on is discarded.
    Torn(&'static str),
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut len_buf)? {
        return Ok(Record::End);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn("implausible record length"));
    }

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(Record::Torn("truncated payload"));
    }

    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Record::Torn("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Torn("checksum mismatch"));
    }

    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event, (len + 8) as u64)),
        Err(_) => Ok(Record::Torn("undecodable payload")),
    }
}

/// Append-only write-ahead log of booking events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` counts the payload only. A torn last entry (crash mid-write) is
/// dropped on replay; since every event is a complete unit, dropping it never
/// leaves half a reservation behind.
///
/// Records appended since the last successful `flush_sync` belong to callers
/// that have not been answered yet. If the flush fails they are cut off
/// again with `discard_unsynced`, so a failed commit never resurfaces on
/// replay.
pub struct Wal {
    file: File,
    /// Encoded records not yet handed to the file.
    pending: Vec<u8>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length as of the last successful `flush_sync`.
    synced_len: u64,
    unsynced_appends: u64,
    /// Set when unsynced bytes could not be cut off. The file may then hold
    /// records nobody was told about, so every further write is refused.
    poisoned: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

fn poisoned_error() -> io::Error {
    io::Error::other("WAL refused: an earlier failed write could not be rolled back")
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            file,
            pending: Vec::new(),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            synced_len,
            unsynced_appends: 0,
            poisoned: false,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Append one event and fsync. Production code batches with
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(poisoned_error());
        }
        self.unsynced_appends += 1;
        encode_event(&mut self.pending, event)
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(poisoned_error());
        }
        self.file.write_all(&self.pending)?;
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(io::Error::other("injected fsync failure"));
        }
        self.file.sync_all()?;
        self.synced_len += self.pending.len() as u64;
        self.pending.clear();
        self.appends_since_compact += std::mem::take(&mut self.unsynced_appends);
        Ok(())
    }

    /// Throw away everything written since the last successful `flush_sync`,
    /// both still pending and already in the file. On failure the log is
    /// poisoned.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.unsynced_appends = 0;
        let result = self
            .file
            .set_len(self.synced_len)
            .and_then(|()| self.file.sync_all());
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Make the next `flush_sync` fail after the bytes reached the file but
    /// before they were synced.
    #[cfg(test)]
    pub fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted log to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::compact_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen for appends. The
    /// compacted file is rebuilt from applied state, so it also clears a
    /// poisoned log.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let len = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };
        self.file = file;
        self.pending.clear();
        self.synced_len = len;
        self.unsynced_appends = 0;
        self.appends_since_compact = 0;
        self.poisoned = false;
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

    /// Replay the log, returning every intact event in order. A missing file
    /// is an empty log. A torn tail is cut off the file so later appends
    /// follow the last intact record.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut intact_len = 0u64;

        loop {
            match read_record(&mut reader)? {
                Record::Event(event, size) => {
                    events.push(event);
                    intact_len += size;
                }
                Record::End => break,
                Record::Torn(why) => {
                    tracing::warn!(
                        "WAL {}: {why} after {} events, discarding tail",
                        path.display(),
                        events.len()
                    );
                    OpenOptions::new()
                        .write(true)
                        .open(path)?
                        .set_len(intact_len)?;
                    break;
                }
            }
        }

        Ok(events)
    }
}
