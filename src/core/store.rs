//! Durable hit storage.
//!
//! [`JournalStore`] persists entries in a single journal file: a fixed
//! header (magic + format version) followed by length-prefixed, CRC-checked
//! records. Appends, removals and clears are all journaled; removals are
//! tombstones, reclaimed by rewriting the journal. Recovery replays the
//! journal, keeps everything up to the last complete record and truncates a
//! partial tail left by a crash mid-write. Corruption in the middle of the
//! journal is a hard error.
//!
//! [`MemoryStore`] is the in-memory counterpart with identical semantics,
//! for tests and callers that do not need persistence.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32Hasher;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::entry::{decode_hit, encode_hit, HitEntry, HitId};
use crate::core::error::StoreError;

const JOURNAL_MAGIC: &[u8; 8] = b"HITQJNL\0";
const JOURNAL_VERSION: u32 = 1;
const HEADER_LEN: u64 = 32;
const RECORD_HEADER_LEN: usize = 1 + 4 + 4;
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

const RECORD_APPEND: u8 = 1;
const RECORD_REMOVE: u8 = 2;
const RECORD_CLEAR: u8 = 3;

/// Storage contract for not-yet-delivered hits.
///
/// `peek_oldest` is non-destructive: a hit leaves the store only through
/// `remove` (once its delivery outcome is known) or `clear`. A successful
/// `append` must be recoverable after abrupt process termination.
pub trait HitStore: Send + Sync {
    /// Persist a new entry. A duplicate id is rejected, never overwritten.
    fn append(&self, hit: HitEntry) -> Result<(), StoreError>;

    /// The oldest stored entry, if any.
    fn peek_oldest(&self) -> Option<HitEntry>;

    /// Remove the entry with the given id. Returns whether it was present.
    fn remove(&self, id: HitId) -> Result<bool, StoreError>;

    /// Number of entries currently stored.
    fn count(&self) -> usize;

    /// Remove every stored entry.
    fn clear(&self) -> Result<(), StoreError>;

    /// Flush and release underlying resources. `count` stays callable.
    fn close(&self);
}

/// Tuning knobs for [`JournalStore`].
#[derive(Debug, Clone)]
pub struct JournalOptions {
    /// Fsync before acknowledging each journaled record.
    pub sync_on_write: bool,
    /// Minimum number of tombstones before the journal is rewritten.
    pub compact_min_tombstones: usize,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_min_tombstones: 64,
        }
    }
}

/// File-backed [`HitStore`].
#[derive(Debug)]
pub struct JournalStore {
    inner: Mutex<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    entries: VecDeque<HitEntry>,
    ids: HashSet<HitId>,
    tombstones: usize,
    options: JournalOptions,
}

impl JournalStore {
    /// Open or create a journal at the given path with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_options(path, JournalOptions::default())
    }

    /// Open or create a journal at the given path.
    ///
    /// Replays existing records to rebuild the set of undelivered hits,
    /// truncates any partial tail record, and rewrites the journal if it
    /// contains tombstones or clear markers.
    pub fn open_with_options<P: AsRef<Path>>(
        path: P,
        options: JournalOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            write_header(&mut file)?;
        } else if len < HEADER_LEN {
            return Err(StoreError::Corruption(
                "journal too small to contain header".to_string(),
            ));
        } else {
            validate_header(&mut file)?;
        }

        let replay = replay_journal(&path)?;

        // Drop a partial tail so new records never land after garbage.
        file.set_len(replay.offset)?;
        file.seek(SeekFrom::Start(replay.offset))?;

        info!(
            path = %path.display(),
            live = replay.entries.len(),
            "hit journal opened"
        );

        let mut inner = JournalInner {
            path,
            writer: Some(BufWriter::new(file)),
            entries: replay.entries,
            ids: replay.ids,
            tombstones: 0,
            options,
        };

        if replay.garbage > 0 {
            inner.compact()?;
        }

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}

impl HitStore for JournalStore {
    fn append(&self, hit: HitEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(StoreError::Closed);
        }
        if inner.ids.contains(&hit.id) {
            return Err(StoreError::Duplicate(hit.id));
        }

        let body = encode_hit(&hit);
        inner.write_record(RECORD_APPEND, &body)?;
        inner.ids.insert(hit.id);
        inner.entries.push_back(hit);
        Ok(())
    }

    fn peek_oldest(&self) -> Option<HitEntry> {
        self.inner.lock().entries.front().cloned()
    }

    fn remove(&self, id: HitId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.ids.contains(&id) {
            return Ok(false);
        }
        if inner.writer.is_none() {
            return Err(StoreError::Closed);
        }

        let body = id.as_uuid().as_bytes().to_vec();
        inner.write_record(RECORD_REMOVE, &body)?;
        inner.ids.remove(&id);

        // The dispatcher removes the front in the common case.
        if inner.entries.front().map(|h| h.id) == Some(id) {
            inner.entries.pop_front();
        } else if let Some(pos) = inner.entries.iter().position(|h| h.id == id) {
            inner.entries.remove(pos);
        }

        inner.tombstones += 1;
        if inner.tombstones >= inner.options.compact_min_tombstones
            && inner.tombstones >= inner.entries.len()
        {
            inner.compact()?;
        }
        Ok(true)
    }

    fn count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(StoreError::Closed);
        }

        // The clear marker is journaled before the rewrite; a crash between
        // the two must not resurrect entries.
        inner.write_record(RECORD_CLEAR, &[])?;
        inner.entries.clear();
        inner.ids.clear();
        inner.compact()?;
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        if let Some(mut writer) = inner.writer.take() {
            if let Err(err) = writer
                .flush()
                .and_then(|_| writer.get_ref().sync_data())
            {
                error!("failed to flush journal on close: {err}");
            }
        }
    }
}

impl JournalInner {
    fn write_record(&mut self, kind: u8, body: &[u8]) -> Result<(), StoreError> {
        let sync = self.options.sync_on_write;
        let writer = self.writer.as_mut().ok_or(StoreError::Closed)?;
        write_framed(writer, kind, body)?;
        if sync {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Rewrite the journal to contain only live entries, atomically via a
    /// temp file and rename.
    fn compact(&mut self) -> Result<(), StoreError> {
        let mut tmp_os = self.path.as_os_str().to_owned();
        tmp_os.push(".compact");
        let tmp_path = PathBuf::from(tmp_os);

        {
            let mut tmp_file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp_path)?;
            write_header(&mut tmp_file)?;
            let mut writer = BufWriter::new(tmp_file);
            for hit in &self.entries {
                let body = encode_hit(hit);
                write_framed(&mut writer, RECORD_APPEND, &body)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        // Release the old handle before replacing the file under it.
        self.writer = None;
        fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.writer = Some(BufWriter::new(file));
        self.tombstones = 0;

        debug!(
            path = %self.path.display(),
            live = self.entries.len(),
            "journal compacted"
        );
        Ok(())
    }
}

fn write_framed(writer: &mut BufWriter<File>, kind: u8, body: &[u8]) -> Result<(), StoreError> {
    let len = u32::try_from(body.len())
        .map_err(|_| StoreError::Corruption("record too large".to_string()))?;

    let mut header = [0u8; RECORD_HEADER_LEN];
    header[0] = kind;
    header[1..5].copy_from_slice(&len.to_le_bytes());

    let mut hasher = Crc32Hasher::new();
    hasher.update(body);
    header[5..9].copy_from_slice(&hasher.finalize().to_le_bytes());

    writer.write_all(&header)?;
    writer.write_all(body)?;
    Ok(())
}

fn write_header(file: &mut File) -> Result<(), StoreError> {
    let mut buf = [0u8; HEADER_LEN as usize];
    buf[..8].copy_from_slice(JOURNAL_MAGIC);
    buf[8..12].copy_from_slice(&JOURNAL_VERSION.to_le_bytes());
    // Remaining bytes are reserved / zero.
    file.write_all(&buf)?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

fn validate_header(file: &mut File) -> Result<(), StoreError> {
    let mut buf = [0u8; HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            StoreError::Corruption("unexpected EOF while reading journal header".to_string())
        } else {
            StoreError::Io(err)
        }
    })?;

    if &buf[..8] != JOURNAL_MAGIC {
        return Err(StoreError::Corruption("invalid journal magic".to_string()));
    }

    let mut version_bytes = [0u8; 4];
    version_bytes.copy_from_slice(&buf[8..12]);
    let version = u32::from_le_bytes(version_bytes);
    if version != JOURNAL_VERSION {
        return Err(StoreError::Corruption(format!(
            "unsupported journal version: {version}"
        )));
    }

    Ok(())
}

struct Replay {
    entries: VecDeque<HitEntry>,
    ids: HashSet<HitId>,
    /// Records that are not live appends (tombstones, clears, and the
    /// appends they killed). A non-zero count means the journal should be
    /// rewritten.
    garbage: usize,
    /// File offset just past the last complete record.
    offset: u64,
}

enum ReadStatus {
    Full,
    Partial,
    CleanEof,
}

fn replay_journal(path: &Path) -> Result<Replay, StoreError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(HEADER_LEN))?;

    let mut entries: VecDeque<HitEntry> = VecDeque::new();
    let mut ids: HashSet<HitId> = HashSet::new();
    let mut garbage = 0usize;
    let mut offset = HEADER_LEN;

    loop {
        let mut header = [0u8; RECORD_HEADER_LEN];
        match read_full(&mut reader, &mut header)? {
            ReadStatus::CleanEof => break,
            ReadStatus::Partial => {
                warn!(offset, "discarding partial record header at journal tail");
                break;
            }
            ReadStatus::Full => {}
        }

        let kind = header[0];
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[1..5]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&header[5..9]);
        let expected_crc = u32::from_le_bytes(crc_bytes);

        if len > MAX_RECORD_LEN {
            return Err(StoreError::Corruption(format!(
                "oversized record ({len} bytes) at offset {offset}"
            )));
        }

        let mut body = vec![0u8; len];
        match read_full(&mut reader, &mut body)? {
            ReadStatus::Full => {}
            _ => {
                warn!(offset, "discarding partial record body at journal tail");
                break;
            }
        }

        let mut hasher = Crc32Hasher::new();
        hasher.update(&body);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            return Err(StoreError::Corruption(format!(
                "CRC mismatch at offset {offset}: expected {expected_crc:08x}, got {actual_crc:08x}"
            )));
        }

        match kind {
            RECORD_APPEND => {
                let hit = decode_hit(&body)?;
                if ids.insert(hit.id) {
                    entries.push_back(hit);
                } else {
                    warn!(id = %hit.id, "skipping duplicate append in journal");
                    garbage += 1;
                }
            }
            RECORD_REMOVE => {
                let id = decode_remove(&body)?;
                if ids.remove(&id) {
                    if let Some(pos) = entries.iter().position(|h| h.id == id) {
                        entries.remove(pos);
                    }
                }
                garbage += 1;
            }
            RECORD_CLEAR => {
                garbage += entries.len() + 1;
                entries.clear();
                ids.clear();
            }
            other => {
                return Err(StoreError::Corruption(format!(
                    "unknown record kind {other} at offset {offset}"
                )));
            }
        }

        offset += (RECORD_HEADER_LEN + len) as u64;
    }

    Ok(Replay {
        entries,
        ids,
        garbage,
        offset,
    })
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<ReadStatus> {
    let mut read = 0usize;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..])?;
        if n == 0 {
            return Ok(if read == 0 {
                ReadStatus::CleanEof
            } else {
                ReadStatus::Partial
            });
        }
        read += n;
    }
    Ok(ReadStatus::Full)
}

fn decode_remove(body: &[u8]) -> Result<HitId, StoreError> {
    let bytes: [u8; 16] = body
        .try_into()
        .map_err(|_| StoreError::Corruption("malformed remove record".to_string()))?;
    Ok(HitId::from_raw(Uuid::from_bytes(bytes)))
}

/// In-memory [`HitStore`] with the same semantics as [`JournalStore`],
/// minus persistence. The standing test double for the queue facade.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: VecDeque<HitEntry>,
    ids: HashSet<HitId>,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HitStore for MemoryStore {
    fn append(&self, hit: HitEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        if !inner.ids.insert(hit.id) {
            return Err(StoreError::Duplicate(hit.id));
        }
        inner.entries.push_back(hit);
        Ok(())
    }

    fn peek_oldest(&self) -> Option<HitEntry> {
        self.inner.lock().entries.front().cloned()
    }

    fn remove(&self, id: HitId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.ids.remove(&id) {
            return Ok(false);
        }
        if let Some(pos) = inner.entries.iter().position(|h| h.id == id) {
            inner.entries.remove(pos);
        }
        Ok(true)
    }

    fn count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner.entries.clear();
        inner.ids.clear();
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().closed = true;
    }
}
