use crate::error::QueueError;
use crate::types::PendingPaymentRecord;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const LOCK_STRIPES: usize = 64;
const MAX_KEY_LEN: usize = 128;

/// Keys double as file names, so they are restricted to a filesystem-safe
/// alphabet.
pub fn is_valid_tx_ref(tx_ref: &str) -> bool {
    !tx_ref.is_empty()
        && tx_ref.len() <= MAX_KEY_LEN
        && !tx_ref.starts_with('.')
        && tx_ref
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Outcome of [`PendingStore::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Written to the pending set; `replaced` if a record for the key existed.
    Stored { replaced: bool },
    /// The key was already acknowledged; nothing was written.
    AlreadyProcessed,
}

/// File-backed queue of verified, unacknowledged payments.
///
/// One JSON file per `tx_ref` under `pending/`; acknowledged records are
/// archived under `processed/`. Writes go through a temp file and a rename so
/// readers never see a partial record. Mutations for the same key are
/// serialised through a striped lock.
pub struct PendingStore {
    pending_dir: PathBuf,
    processed_dir: PathBuf,
    locks: Vec<Mutex<()>>,
}

impl PendingStore {
    pub async fn open(
        pending_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
    ) -> Result<Self, QueueError> {
        let pending_dir = pending_dir.into();
        let processed_dir = processed_dir.into();
        tokio::fs::create_dir_all(&pending_dir).await?;
        tokio::fs::create_dir_all(&processed_dir).await?;
        Ok(Self {
            pending_dir,
            processed_dir,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    async fn lock(&self, tx_ref: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        tx_ref.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.locks.len();
        self.locks[idx].lock().await
    }

    fn key_path(dir: &Path, tx_ref: &str) -> Result<PathBuf, QueueError> {
        if !is_valid_tx_ref(tx_ref) {
            return Err(QueueError::InvalidKey(tx_ref.to_string()));
        }
        Ok(dir.join(format!("{tx_ref}.json")))
    }

    /// Idempotent upsert: the record for `record.tx_ref` is replaced wholesale,
    /// including an archived copy left by an earlier `ack`.
    pub async fn put(&self, record: &PendingPaymentRecord) -> Result<(), QueueError> {
        let path = Self::key_path(&self.pending_dir, &record.tx_ref)?;
        let archived = Self::key_path(&self.processed_dir, &record.tx_ref)?;
        let _guard = self.lock(&record.tx_ref).await;

        write_atomic(&path, record).await?;
        match tokio::fs::remove_file(&archived).await {
            Ok(()) => {
                debug!(tx_ref = %record.tx_ref, "archived record superseded by put");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert unless the key has already been acknowledged. The archive check
    /// and the write happen under the same key lock.
    pub async fn enqueue(&self, record: &PendingPaymentRecord) -> Result<Enqueued, QueueError> {
        let path = Self::key_path(&self.pending_dir, &record.tx_ref)?;
        let archived = Self::key_path(&self.processed_dir, &record.tx_ref)?;
        let _guard = self.lock(&record.tx_ref).await;

        if tokio::fs::try_exists(&archived).await? {
            return Ok(Enqueued::AlreadyProcessed);
        }
        let replaced = tokio::fs::try_exists(&path).await?;
        write_atomic(&path, record).await?;
        Ok(Enqueued::Stored { replaced })
    }

    /// Fetch one unacknowledged record.
    pub async fn get(&self, tx_ref: &str) -> Result<Option<PendingPaymentRecord>, QueueError> {
        let path = Self::key_path(&self.pending_dir, tx_ref)?;
        read_record(&path).await
    }

    pub async fn is_processed(&self, tx_ref: &str) -> Result<bool, QueueError> {
        let path = Self::key_path(&self.processed_dir, tx_ref)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// All records, or only unacknowledged ones. Order is unspecified.
    pub async fn list(&self, unprocessed_only: bool) -> Result<Vec<PendingPaymentRecord>, QueueError> {
        let mut records: Vec<PendingPaymentRecord> = read_dir_records(&self.pending_dir)
            .await?
            .into_iter()
            .filter(|r| !r.processed)
            .collect();
        if !unprocessed_only {
            records.extend(read_dir_records(&self.processed_dir).await?);
        }
        Ok(records)
    }

    /// Mark a pending record processed and move it to the archive.
    pub async fn ack(&self, tx_ref: &str) -> Result<PendingPaymentRecord, QueueError> {
        let path = Self::key_path(&self.pending_dir, tx_ref)?;
        let archived = Self::key_path(&self.processed_dir, tx_ref)?;
        let _guard = self.lock(tx_ref).await;

        let mut record = read_record(&path)
            .await?
            .ok_or_else(|| QueueError::NotFound(tx_ref.to_string()))?;
        record.processed = true;
        record.processed_at = Some(Utc::now().timestamp());

        write_atomic(&archived, &record).await?;
        tokio::fs::remove_file(&path).await?;
        Ok(record)
    }
}

async fn write_atomic(path: &Path, record: &PendingPaymentRecord) -> Result<(), QueueError> {
    let content = serde_json::to_vec_pretty(record)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".{}.{}.tmp", record.tx_ref, uuid::Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_record(path: &Path) -> Result<Option<PendingPaymentRecord>, QueueError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_dir_records(dir: &Path) -> Result<Vec<PendingPaymentRecord>, QueueError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        match read_record(&entry.path()).await {
            Ok(Some(r)) => records.push(r),
            // Acknowledged between read_dir and read.
            Ok(None) => debug!("queue record vanished while listing: {name}"),
            Err(e) => warn!("skipping unreadable queue record {name}: {e}"),
        }
    }
    Ok(records)
}
