use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::JournalEntry;

/// Encode one entry as `[len][bincode][crc32]`.
fn encode_entry(writer: &mut impl Write, entry: &JournalEntry) -> io::Result<()> {
    let payload =
        bincode::serialize(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only journal of store mutations.
///
/// Format per entry: `[u32: len][bincode: JournalEntry][u32: crc32]`.
/// A torn or corrupt tail (crash mid-write) is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Replay `path`, cut off any torn tail, and open it for appends.
    /// New entries land directly after the last intact one, so they stay
    /// reachable on the next replay.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<JournalEntry>)> {
        let (entries, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                kept = entries.len(),
                dropped_bytes = on_disk - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, entries))
    }

    #[cfg(test)]
    pub fn append(&mut self, entry: &JournalEntry) -> io::Result<()> {
        self.append_buffered(entry)?;
        self.flush_sync()
    }

    /// Buffer without syncing; `flush_sync` commits the whole batch.
    pub fn append_buffered(&mut self, entry: &JournalEntry) -> io::Result<()> {
        encode_entry(&mut self.writer, entry)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot to `<path>.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, entries: &[JournalEntry]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            encode_entry(&mut writer, entry)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live file and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact entry. Stops at the first truncated or corrupt one.
    pub fn replay(path: &Path) -> io::Result<Vec<JournalEntry>> {
        scan(path).map(|(entries, _)| entries)
    }
}

/// Intact entries plus the byte length they occupy at the head of the file.
fn scan(path: &Path) -> io::Result<(Vec<JournalEntry>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u64::from(u32::from_le_bytes(len_buf));
        // A garbage length can't be trusted to size an allocation.
        if valid_len + 8 + len > file_len {
            break;
        }

        let mut payload = vec![0u8; len as usize];
        if !read_or_eof(&mut reader, &mut payload)? {
            break;
        }
        let mut crc_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            tracing::warn!(path = %path.display(), kept = entries.len(), "journal crc mismatch, dropping tail");
            break;
        }
        match bincode::deserialize::<JournalEntry>(&payload) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        valid_len += 8 + len;
    }

    Ok((entries, valid_len))
}

/// `Ok(false)` on a clean or torn EOF.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

// ── Group-commit writer ──────────────────────────────────────────

enum Command {
    Append {
        entry: JournalEntry,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Vec<JournalEntry>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Cloneable handle to the task that owns the `Wal`.
#[derive(Clone)]
pub struct Journal {
    tx: mpsc::Sender<Command>,
}

impl Journal {
    /// Take ownership of `wal` and spawn its writer task.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Resolves once the entry is durable.
    pub async fn append(&self, entry: JournalEntry) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Append { entry, response }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn compact(&self, snapshot: Vec<JournalEntry>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Compact { snapshot, response }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn appends_since_compact(&self) -> io::Result<u64> {
        let (response, rx) = oneshot::channel();
        self.send(Command::AppendsSinceCompact { response }).await?;
        rx.await.map_err(|_| closed())
    }

    async fn send(&self, cmd: Command) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| closed())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "journal writer shut down")
}

/// Block for the first append, drain whatever else is queued, then one fsync
/// for the whole batch.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        let (entry, response) = match cmd {
            Command::Append { entry, response } => (entry, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(entry, response)];
        let mut pending_control = None;
        loop {
            match rx.try_recv() {
                Ok(Command::Append { entry, response }) => batch.push((entry, response)),
                Ok(other) => {
                    pending_control = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = pending_control {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(JournalEntry, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::JOURNAL_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let append_err = batch
        .iter()
        .find_map(|(entry, _)| wal.append_buffered(entry).err());
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    let result = match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    };

    metrics::histogram!(crate::observability::JOURNAL_FLUSH_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: Command) {
    match cmd {
        Command::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        Command::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        Command::Append { entry, response } => commit_batch(wal, vec![(entry, response)]),
    }
}
