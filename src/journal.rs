use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::model::*;
use crate::store::{RecordStore, StoreError, TenantRecords};

/// Encode one batch as `[len][bincode][crc32]`.
/// Returns the number of bytes written.
fn encode_batch(writer: &mut impl Write, batch: &[Change]) -> io::Result<u64> {
    let payload =
        bincode::serialize(batch).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Append-only change journal for one tenant.
///
/// Format per entry: `[u32: len][bincode: Vec<Change>][u32: crc32]`.
/// One entry is one committed batch, so a torn write loses the whole batch
/// and never half of a combine or delete. A truncated or corrupt tail is
/// discarded on replay.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by acknowledged batches.
    committed_len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            poisoned: false,
        })
    }

    /// Append one batch and fsync. On failure nothing of the batch stays
    /// behind, neither in the buffer nor in the file.
    pub fn append(&mut self, batch: &[Change]) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "journal {} needs recovery after a failed append",
                self.path.display()
            )));
        }
        let written = encode_batch(&mut self.writer, batch).and_then(|n| {
            self.flush_sync()?;
            Ok(n)
        });
        match written {
            Ok(n) => {
                self.committed_len += n;
                self.appends_since_compact += 1;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    warn!(path = %self.path.display(), "journal rollback failed: {rollback}");
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    /// Drop unflushed bytes and cut the file back to the last acknowledged batch.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with a single entry holding `snapshot`.
    /// Written to a temp file, fsynced, then renamed over the journal.
    pub fn compact(&mut self, snapshot: &[Change]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            if !snapshot.is_empty() {
                encode_batch(&mut writer, snapshot)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Replay every intact batch in order.
    pub fn replay(path: &Path) -> io::Result<Vec<Vec<Change>>> {
        Ok(read_intact(path)?.0)
    }

    /// Replay, then cut off any torn or corrupt tail so later appends
    /// land right after the last intact batch.
    pub fn recover(path: &Path) -> io::Result<Vec<Vec<Change>>> {
        let (batches, intact_len) = read_intact(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > intact_len
        {
            warn!(
                path = %path.display(),
                dropped_bytes = meta.len() - intact_len,
                "truncating journal tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        Ok(batches)
    }
}

/// Entries larger than this are treated as corruption.
const MAX_ENTRY_BYTES: usize = 64 * 1024 * 1024;

/// Intact batches and the byte length they occupy.
fn read_intact(path: &Path) -> io::Result<(Vec<Vec<Change>>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut batches = Vec::new();
    let mut intact_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_BYTES {
            warn!(path = %path.display(), len, "oversized journal entry, stopping replay");
            break;
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            warn!(path = %path.display(), "corrupt journal entry, stopping replay");
            break;
        }

        match bincode::deserialize::<Vec<Change>>(&payload) {
            Ok(batch) => batches.push(batch),
            Err(_) => break,
        }
        intact_len += 8 + len as u64;
    }

    Ok((batches, intact_len))
}

/// A tenant name doubles as its journal file stem, so it may only use
/// `[A-Za-z0-9_-]`. Names are never rewritten: two different tenants must
/// never share a file.
pub fn tenant_file_stem(tenant: &str) -> Option<&str> {
    let usable = !tenant.is_empty()
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    usable.then_some(tenant)
}

struct TenantJournal {
    journal: Journal,
    records: TenantRecords,
}

/// Record store backed by one journal file per tenant under `dir`.
/// Records are served from memory; the journal is only read on first use.
pub struct JournalStore {
    dir: PathBuf,
    tenants: DashMap<String, Arc<Mutex<TenantJournal>>>,
    compact_threshold: u64,
}

impl JournalStore {
    pub fn open(dir: PathBuf, compact_threshold: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            tenants: DashMap::new(),
            compact_threshold,
        })
    }

    pub fn path_for(&self, tenant: &str) -> Result<PathBuf, StoreError> {
        let stem = tenant_file_stem(tenant)
            .ok_or_else(|| StoreError::Unavailable(format!("unusable tenant name {tenant:?}")))?;
        Ok(self.dir.join(format!("{stem}.journal")))
    }

    async fn tenant(&self, tenant: &str) -> Result<Arc<Mutex<TenantJournal>>, StoreError> {
        if let Some(entry) = self.tenants.get(tenant) {
            return Ok(entry.value().clone());
        }
        let path = self.path_for(tenant)?;
        let batches = Journal::recover(&path)?;
        let mut records = TenantRecords::default();
        let mut replayed = 0usize;
        for batch in &batches {
            for change in batch {
                records.apply(change);
                replayed += 1;
            }
        }
        let journal = Journal::open(&path)?;
        debug!(tenant, replayed, "journal loaded");

        let entry = self
            .tenants
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TenantJournal { journal, records })));
        Ok(entry.value().clone())
    }

    /// Rewrite a tenant's journal as a snapshot of its current records.
    pub async fn compact(&self, tenant: &str) -> Result<(), StoreError> {
        let tj = self.tenant(tenant).await?;
        let mut guard = tj.lock().await;
        let snapshot = guard.records.snapshot();
        guard.journal.compact(&snapshot)?;
        info!(tenant, records = snapshot.len(), "journal compacted");
        Ok(())
    }

    /// Compact every loaded tenant past the threshold. Returns how many were compacted.
    pub async fn compact_due(&self) -> usize {
        let loaded: Vec<(String, Arc<Mutex<TenantJournal>>)> = self
            .tenants
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut compacted = 0;
        for (tenant, tj) in loaded {
            let due = tj.lock().await.journal.appends_since_compact() >= self.compact_threshold;
            if !due {
                continue;
            }
            match self.compact(&tenant).await {
                Ok(()) => compacted += 1,
                Err(e) => warn!(%tenant, "journal compaction failed: {e}"),
            }
        }
        compacted
    }
}

#[async_trait]
impl RecordStore for JournalStore {
    async fn list_tables(&self, tenant: &str) -> Result<Vec<Table>, StoreError> {
        let tj = self.tenant(tenant).await?;
        let guard = tj.lock().await;
        Ok(guard.records.tables.values().cloned().collect())
    }

    async fn list_reservations(&self, tenant: &str) -> Result<Vec<Reservation>, StoreError> {
        let tj = self.tenant(tenant).await?;
        let guard = tj.lock().await;
        Ok(guard.records.reservations.values().cloned().collect())
    }

    async fn upsert_table(&self, tenant: &str, table: Table) -> Result<(), StoreError> {
        self.apply(tenant, &[Change::TableUpserted(table)]).await
    }

    async fn upsert_reservation(&self, tenant: &str, reservation: Reservation) -> Result<(), StoreError> {
        self.apply(tenant, &[Change::ReservationUpserted(reservation)]).await
    }

    async fn delete_table(&self, tenant: &str, id: TableId) -> Result<(), StoreError> {
        self.apply(tenant, &[Change::TableDeleted { id }]).await
    }

    /// One journal entry and one fsync per batch. Records change only after
    /// the entry is durable.
    async fn apply(&self, tenant: &str, changes: &[Change]) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let tj = self.tenant(tenant).await?;
        let mut guard = tj.lock().await;

        let flush_start = Instant::now();
        guard.journal.append(changes)?;
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        metrics::histogram!(crate::observability::JOURNAL_BATCH_SIZE).record(changes.len() as f64);

        for change in changes {
            guard.records.apply(change);
        }
        Ok(())
    }
}

/// Background task that compacts journals once they pass the threshold.
pub async fn run_compactor(store: Arc<JournalStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let n = store.compact_due().await;
        if n > 0 {
            debug!(compacted = n, "compactor pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatwise_test_journal").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn table(name: &str) -> Table {
        Table::new(Ulid::new(), name, 4, "main")
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_dir("append_and_replay").join("c.journal");
        let a = table("A");
        let b = table("B");
        let batches = vec![
            vec![Change::TableUpserted(a.clone())],
            vec![Change::TableUpserted(b.clone()), Change::TableDeleted { id: a.id }],
        ];
        {
            let mut journal = Journal::open(&path).unwrap();
            for batch in &batches {
                journal.append(batch).unwrap();
            }
            assert_eq!(journal.appends_since_compact(), 2);
        }
        assert_eq!(Journal::replay(&path).unwrap(), batches);
    }

    #[test]
    fn replay_drops_torn_batch() {
        let path = tmp_dir("torn").join("c.journal");
        let first = vec![Change::TableUpserted(table("A"))];
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x40, 0, 0, 0, 1, 2, 3]).unwrap(); // length says 64, only 3 bytes follow
        }
        assert_eq!(Journal::replay(&path).unwrap(), vec![first.clone()]);

        // After recovery the garbage is gone and new batches stay readable.
        assert_eq!(Journal::recover(&path).unwrap(), vec![first.clone()]);
        let second = vec![Change::TableUpserted(table("B"))];
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&second).unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn failed_append_leaves_nothing_behind() {
        let path = tmp_dir("rollback").join("c.journal");
        let first = vec![Change::TableUpserted(table("A"))];
        let second = vec![Change::TableUpserted(table("B"))];
        let mut journal = Journal::open(&path).unwrap();
        journal.append(&first).unwrap();

        // Half an entry sits in the buffer when the write fails.
        journal.writer.write_all(&[0x40, 0, 0, 0, 9, 9]).unwrap();
        journal.rollback().unwrap();
        journal.append(&second).unwrap();
        assert_eq!(journal.appends_since_compact(), 2);
        assert_eq!(Journal::replay(&path).unwrap(), vec![first.clone(), second.clone()]);

        // Bytes that already reached the file are cut as well.
        journal.writer.write_all(&[0x40, 0, 0, 0, 9, 9]).unwrap();
        journal.writer.flush().unwrap();
        journal.rollback().unwrap();
        assert_eq!(Journal::replay(&path).unwrap(), vec![first, second]);
        assert_eq!(fs::metadata(&path).unwrap().len(), journal.committed_len);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_dir("bad_crc").join("c.journal");
        let batch = vec![Change::TableDeleted { id: Ulid::new() }];
        {
            let payload = bincode::serialize(&batch).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_missing_file() {
        let path = tmp_dir("missing").join("nothing.journal");
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_dir("compact_append").join("c.journal");
        let keep = table("keep");
        let churn = table("churn");
        let mut journal = Journal::open(&path).unwrap();
        for _ in 0..10 {
            journal.append(&[Change::TableUpserted(churn.clone())]).unwrap();
            journal.append(&[Change::TableDeleted { id: churn.id }]).unwrap();
        }
        journal.append(&[Change::TableUpserted(keep.clone())]).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![Change::TableUpserted(keep.clone())];
        journal.compact(&snapshot).unwrap();
        assert_eq!(journal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal should be smaller: {after} < {before}");

        let next = vec![Change::TableDeleted { id: keep.id }];
        journal.append(&next).unwrap();
        assert_eq!(Journal::replay(&path).unwrap(), vec![snapshot, next]);
    }

    #[test]
    fn file_stem_rejects_instead_of_rewriting() {
        assert_eq!(tenant_file_stem("cafe_1-north"), Some("cafe_1-north"));
        assert_eq!(tenant_file_stem("../evil"), None);
        assert_eq!(tenant_file_stem("a.b"), None);
        assert_eq!(tenant_file_stem(""), None);
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tmp_dir("reopen");
        let t = table("T1");
        {
            let store = JournalStore::open(dir.clone(), 1000).unwrap();
            store.upsert_table("north", t.clone()).await.unwrap();
            let mut moved = t.clone();
            moved.section = "patio".into();
            store.upsert_table("north", moved).await.unwrap();
        }
        let store = JournalStore::open(dir.clone(), 1000).unwrap();
        let tables = store.list_tables("north").await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].section, "patio");
        assert!(store.list_tables("south").await.unwrap().is_empty());
        assert!(dir.join("north.journal").exists());
    }

    #[tokio::test]
    async fn compact_due_respects_threshold() {
        let dir = tmp_dir("due");
        let store = JournalStore::open(dir.clone(), 3).unwrap();
        let t = table("T1");
        store.upsert_table("busy", t.clone()).await.unwrap();
        store.upsert_table("quiet", table("Q")).await.unwrap();
        for cap in 2..6 {
            let mut changed = t.clone();
            changed.capacity = cap;
            store.upsert_table("busy", changed).await.unwrap();
        }
        assert_eq!(store.compact_due().await, 1);

        let reopened = JournalStore::open(dir, 3).unwrap();
        let tables = reopened.list_tables("busy").await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].capacity, 5);
    }

    #[tokio::test]
    async fn rejects_unusable_tenant_name() {
        let store = JournalStore::open(tmp_dir("bad_name"), 1000).unwrap();
        assert!(matches!(
            store.list_tables("../..").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn similar_tenant_names_never_share_a_file() {
        let dir = tmp_dir("distinct_files");
        {
            let store = JournalStore::open(dir.clone(), 1000).unwrap();
            assert!(matches!(
                store.upsert_table("a.b", table("A")).await,
                Err(StoreError::Unavailable(_))
            ));
            store.upsert_table("a-b", table("B")).await.unwrap();
        }
        let store = JournalStore::open(dir.clone(), 1000).unwrap();
        assert!(store.list_tables("ab").await.unwrap().is_empty());
        assert_eq!(store.list_tables("a-b").await.unwrap().len(), 1);
        assert_ne!(store.path_for("a-b").unwrap(), store.path_for("ab").unwrap());
    }
}
