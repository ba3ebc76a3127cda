//! Journaled-file backend.
//!
//! State lives in the same [`RecordIndex`] as the volatile backend and is
//! rebuilt on open by replaying a newline-delimited JSON log. New records are
//! appended to the log; soft deletes rewrite it, since the format has no
//! in-place update.
//!
//! Writers serialise on an async writer lock that also owns the file handle.
//! Index mutations happen under the sync index lock while the writer lock is
//! held, so readers never wait on file I/O.

use crate::index::RecordIndex;
use async_trait::async_trait;
use burrow_core::error::{Result, StorageError};
use burrow_core::{NewUrl, ReadRepository, Repository, SaveOutcome, ShortCode, UrlRecord};
use burrow_generator::{Generator, RandomGenerator};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// State of the append handle.
#[derive(Debug)]
enum Writer {
    Open(File),
    /// The file was replaced but could not be reopened; retried on next write.
    Detached,
    Closed,
}

pub struct JournalRepository<G = RandomGenerator> {
    path: PathBuf,
    index: RwLock<RecordIndex>,
    writer: Mutex<Writer>,
    sequence: AtomicU64,
    generator: G,
}

impl JournalRepository<RandomGenerator> {
    /// Opens (creating if needed) the journal at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_generator(path, RandomGenerator).await
    }
}

impl<G: Generator> JournalRepository<G> {
    pub async fn open_with_generator(path: impl AsRef<Path>, generator: G) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path).await?;

        let contents = fs::read_to_string(&path)
            .await
            .map_err(|e| io_error("read journal", &path, e))?;
        let (index, next_sequence) = replay(&contents)?;

        info!(
            path = %path.display(),
            records = index.len(),
            owners = index.owner_len(),
            "replayed journal"
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(Writer::Open(file)),
            sequence: AtomicU64::new(next_sequence),
            generator,
        })
    }

    /// Returns the journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn rewrite(&self, snapshot: String) -> Result<()> {
        let tmp = rewrite_path(&self.path);
        fs::write(&tmp, snapshot)
            .await
            .map_err(|e| io_error("write journal snapshot", &tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error("replace journal", &self.path, e))
    }
}

fn replay(contents: &str) -> Result<(RecordIndex, u64)> {
    let mut index = RecordIndex::new();
    let mut max_sequence = 0u64;
    let mut skipped = 0usize;

    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: UrlRecord = serde_json::from_str(line).map_err(|e| {
            StorageError::InvalidData(format!("journal line {}: {}", line_no + 1, e))
        })?;

        if let Ok(seq) = record.correlation_id.parse::<u64>() {
            max_sequence = max_sequence.max(seq);
        }

        // A later line for a known code carries its newer state. Deletion
        // is the only state change and never reverts.
        if index.contains_code(record.short_code.as_str()) {
            if record.deleted {
                index.replay_deleted(record.short_code.as_str());
            }
            continue;
        }

        // Logs written before dedup existed may repeat a URL under another code.
        match index.insert(record) {
            Ok(SaveOutcome::Created(_)) => {}
            Ok(SaveOutcome::Existing(_)) => skipped += 1,
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!(skipped, "ignored duplicate journal entries");
    }

    Ok((index, max_sequence + 1))
}

fn encode_line(record: &UrlRecord) -> Result<String> {
    let mut line = serde_json::to_string(record)
        .map_err(|e| StorageError::InvalidData(format!("encode record: {}", e)))?;
    line.push('\n');
    Ok(line)
}

fn encode_all(records: &[UrlRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&encode_line(record)?);
    }
    Ok(out)
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_error("open journal", path, e))
}

async fn ensure_open<'a>(path: &Path, writer: &'a mut Writer) -> Result<&'a mut File> {
    if let Writer::Detached = writer {
        *writer = Writer::Open(open_append(path).await?);
        info!(path = %path.display(), "reopened journal");
    }
    match writer {
        Writer::Open(file) => Ok(file),
        Writer::Detached | Writer::Closed => Err(closed()),
    }
}

async fn append(file: &mut File, data: &str) -> std::io::Result<()> {
    file.write_all(data.as_bytes()).await?;
    file.flush().await
}

fn rewrite_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".rewrite");
    path.with_file_name(name)
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> StorageError {
    let message = format!("{} {}: {}", action, path.display(), err);
    match err.kind() {
        std::io::ErrorKind::InvalidData => StorageError::InvalidData(message),
        _ => StorageError::Unavailable(message),
    }
}

fn closed() -> StorageError {
    StorageError::Unavailable("journal is closed".to_string())
}

#[async_trait]
impl<G: Generator> ReadRepository for JournalRepository<G> {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        Ok(self.index.read().get(code.as_str()).cloned())
    }

    async fn get_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        Ok(self.index.read().by_owner(owner_id))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.index.read().len() as u64)
    }

    async fn owner_count(&self) -> Result<u64> {
        Ok(self.index.read().owner_len() as u64)
    }
}

#[async_trait]
impl<G: Generator> Repository for JournalRepository<G> {
    async fn save(&self, record: UrlRecord) -> Result<SaveOutcome> {
        let mut writer = self.writer.lock().await;
        let file = ensure_open(&self.path, &mut writer).await?;

        let line = encode_line(&record)?;
        let (outcome, mark) = {
            let mut index = self.index.write();
            let mark = index.len();
            (index.insert(record)?, mark)
        };

        if let SaveOutcome::Created(code) = &outcome {
            if let Err(e) = append(file, &line).await {
                self.index.write().rollback_to(mark);
                return Err(io_error("append to journal", &self.path, e));
            }
            debug!(code = %code, "appended record to journal");
        }

        Ok(outcome)
    }

    async fn save_batch(&self, items: Vec<NewUrl>) -> Result<Vec<ShortCode>> {
        let mut writer = self.writer.lock().await;
        let file = ensure_open(&self.path, &mut writer).await?;

        let (codes, mark, lines) = {
            let mut index = self.index.write();
            let mark = index.len();
            let mut codes = Vec::with_capacity(items.len());
            for item in items {
                match index.allocate(&self.generator, item) {
                    Ok(outcome) => codes.push(outcome.into_code()),
                    Err(e) => {
                        index.rollback_to(mark);
                        return Err(e);
                    }
                }
            }
            let lines = match encode_all(&index.records()[mark..]) {
                Ok(lines) => lines,
                Err(e) => {
                    index.rollback_to(mark);
                    return Err(e);
                }
            };
            (codes, mark, lines)
        };

        if !lines.is_empty() {
            if let Err(e) = append(file, &lines).await {
                self.index.write().rollback_to(mark);
                return Err(io_error("append batch to journal", &self.path, e));
            }
        }

        debug!(count = codes.len(), "appended batch to journal");
        Ok(codes)
    }

    async fn mark_deleted(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        let mut writer = self.writer.lock().await;
        if let Writer::Closed = *writer {
            return Err(closed());
        }

        let (flipped, snapshot) = {
            let mut index = self.index.write();
            let flipped = index.mark_deleted(owner_id, codes);
            if flipped.is_empty() {
                return Ok(0);
            }
            match encode_all(index.records()) {
                Ok(snapshot) => (flipped, snapshot),
                Err(e) => {
                    index.revert_deleted(&flipped);
                    return Err(e);
                }
            }
        };

        if let Err(e) = self.rewrite(snapshot).await {
            self.index.write().revert_deleted(&flipped);
            return Err(e);
        }

        // The old handle points at the replaced file. The delete is already
        // durable, so a failed reopen only defers to the next write.
        *writer = match open_append(&self.path).await {
            Ok(file) => Writer::Open(file),
            Err(e) => {
                warn!(error = %e, "could not reopen journal after rewrite");
                Writer::Detached
            }
        };

        debug!(owner_id, flipped = flipped.len(), "rewrote journal after delete");
        Ok(flipped.len() as u64)
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Writer::Open(mut file) = std::mem::replace(&mut *writer, Writer::Closed) {
            file.flush()
                .await
                .map_err(|e| io_error("flush journal", &self.path, e))?;
            info!(path = %self.path.display(), "closed journal");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_generator::SeqGenerator;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn record(id: &str, code_str: &str, url: &str, owner: &str) -> UrlRecord {
        UrlRecord::new(id, code(code_str), url, owner)
    }

    fn journal_path(dir: &TempDir) -> PathBuf {
        dir.path().join("urls.jsonl")
    }

    #[tokio::test]
    async fn open_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        let repo = JournalRepository::open(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(repo.count().await.unwrap(), 0);
        assert_eq!(repo.next_sequence().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        let repo = JournalRepository::open(&path).await.unwrap();
        repo.save(record("1", "abc123", "https://example.com", "u1"))
            .await
            .unwrap();
        repo.save(record("2", "def456", "https://other.example", "u2"))
            .await
            .unwrap();
        repo.close().await.unwrap();

        let reopened = JournalRepository::open(&path).await.unwrap();
        let got = reopened.get(&code("abc123")).await.unwrap().unwrap();
        assert_eq!(got.original_url, "https://example.com");
        assert_eq!(reopened.count().await.unwrap(), 2);
        assert_eq!(reopened.owner_count().await.unwrap(), 2);
        // resumes after the highest numeric correlation id
        assert_eq!(reopened.next_sequence().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn writes_persisted_field_names() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        let repo = JournalRepository::open(&path).await.unwrap();
        repo.save(record("1", "abc123", "https://example.com", "u1"))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["short_url"], "abc123");
        assert_eq!(line["user_id"], "u1");
        assert_eq!(line["is_deleted"], false);
    }

    #[tokio::test]
    async fn dedup_hit_appends_nothing() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        let repo = JournalRepository::open(&path).await.unwrap();
        repo.save(record("1", "abc123", "https://example.com", "u1"))
            .await
            .unwrap();
        let outcome = repo
            .save(record("2", "zzz999", "https://example.com", "u1"))
            .await
            .unwrap();

        assert_eq!(outcome, SaveOutcome::Existing(code("abc123")));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn deletion_is_durable() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        let repo = JournalRepository::open(&path).await.unwrap();
        repo.save(record("1", "abc123", "https://example.com", "u1"))
            .await
            .unwrap();
        let flipped = repo.mark_deleted("u1", &[code("abc123")]).await.unwrap();
        assert_eq!(flipped, 1);

        // appends keep working on the rewritten file
        repo.save(record("2", "def456", "https://after.example", "u1"))
            .await
            .unwrap();
        repo.close().await.unwrap();

        let reopened = JournalRepository::open(&path).await.unwrap();
        assert!(reopened.get(&code("abc123")).await.unwrap().unwrap().deleted);
        assert!(!reopened.get(&code("def456")).await.unwrap().unwrap().deleted);
        assert!(!rewrite_path(&path).exists());
    }

    #[tokio::test]
    async fn deleting_nothing_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        let repo = JournalRepository::open(&path).await.unwrap();
        repo.save(record("1", "abc123", "https://example.com", "u1"))
            .await
            .unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let flipped = repo.mark_deleted("u2", &[code("abc123")]).await.unwrap();

        assert_eq!(flipped, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn batch_is_appended_in_order() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);

        let repo = JournalRepository::open_with_generator(&path, SeqGenerator::with_prefix("bw"))
            .await
            .unwrap();
        let items = vec![
            NewUrl {
                correlation_id: "a".to_string(),
                original_url: "https://a.example".to_string(),
                owner_id: "u1".to_string(),
            },
            NewUrl {
                correlation_id: "b".to_string(),
                original_url: "https://b.example".to_string(),
                owner_id: "u1".to_string(),
            },
        ];

        let codes = repo.save_batch(items).await.unwrap();
        assert_eq!(codes, vec![code("bw000000"), code("bw000001")]);

        let contents = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<String> = contents
            .lines()
            .map(|l| serde_json::from_str::<UrlRecord>(l).unwrap().correlation_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn malformed_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        std::fs::write(
            &path,
            "{\"correlation_id\":\"1\",\"short_url\":\"a\",\"original_url\":\"u\",\"user_id\":\"o\"}\nnot json\n",
        )
        .unwrap();

        let err = JournalRepository::open(&path).await.err().unwrap();
        assert!(matches!(err, StorageError::InvalidData(msg) if msg.contains("line 2")));
    }

    #[tokio::test]
    async fn legacy_duplicates_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let lines = [
            record("1", "first", "https://dup.example", "u1"),
            record("2", "second", "https://dup.example", "u1"),
        ]
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect::<Vec<_>>()
        .join("\n");
        std::fs::write(&path, lines).unwrap();

        let repo = JournalRepository::open(&path).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(repo.get(&code("first")).await.unwrap().is_some());
    }

    fn write_lines(path: &Path, records: &[UrlRecord]) {
        let lines = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(path, lines).unwrap();
    }

    #[tokio::test]
    async fn later_delete_line_for_same_code_is_applied() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let mut deleted = record("1", "abc", "https://example.com", "u1");
        deleted.deleted = true;
        write_lines(
            &path,
            &[record("1", "abc", "https://example.com", "u1"), deleted],
        );

        let repo = JournalRepository::open(&path).await.unwrap();

        assert!(repo.get(&code("abc")).await.unwrap().unwrap().deleted);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replay_never_revives_deleted_code() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let mut deleted = record("1", "abc", "https://example.com", "u1");
        deleted.deleted = true;
        write_lines(
            &path,
            &[deleted, record("1", "abc", "https://example.com", "u1")],
        );

        let repo = JournalRepository::open(&path).await.unwrap();

        assert!(repo.get(&code("abc")).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn non_utf8_journal_is_invalid_data() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        std::fs::write(&path, [0xff, 0xfe, b'\n']).unwrap();

        let err = JournalRepository::open(&path).await.err().unwrap();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn detached_writer_reopens_on_next_write() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let repo = JournalRepository::open(&path).await.unwrap();
        repo.save(record("1", "abc123", "https://example.com", "u1"))
            .await
            .unwrap();

        *repo.writer.lock().await = Writer::Detached;
        let flipped = repo.mark_deleted("u1", &[code("abc123")]).await.unwrap();
        assert_eq!(flipped, 1);

        *repo.writer.lock().await = Writer::Detached;
        repo.save(record("2", "def456", "https://after.example", "u1"))
            .await
            .unwrap();
        repo.close().await.unwrap();

        let reopened = JournalRepository::open(&path).await.unwrap();
        assert!(reopened.get(&code("abc123")).await.unwrap().unwrap().deleted);
        assert!(reopened.get(&code("def456")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_writes() {
        let dir = TempDir::new().unwrap();
        let repo = JournalRepository::open(journal_path(&dir)).await.unwrap();

        repo.close().await.unwrap();
        repo.close().await.unwrap();

        let err = repo
            .save(record("1", "abc123", "https://example.com", "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
