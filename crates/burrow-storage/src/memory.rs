use crate::index::RecordIndex;
use async_trait::async_trait;
use burrow_core::error::Result;
use burrow_core::{NewUrl, ReadRepository, Repository, SaveOutcome, ShortCode, UrlRecord};
use burrow_generator::{Generator, RandomGenerator};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Volatile implementation of the Repository trait.
///
/// The primary, dedup and owner indexes sit behind one reader/writer lock,
/// so the dedup check and the insert happen in the same critical section.
#[derive(Debug)]
pub struct InMemoryRepository<G = RandomGenerator> {
    index: RwLock<RecordIndex>,
    sequence: AtomicU64,
    generator: G,
}

impl InMemoryRepository<RandomGenerator> {
    /// Creates a new in-memory repository.
    pub fn new() -> Self {
        Self::with_generator(RandomGenerator)
    }
}

impl Default for InMemoryRepository<RandomGenerator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Generator> InMemoryRepository<G> {
    /// Creates a repository that allocates batch codes with `generator`.
    pub fn with_generator(generator: G) -> Self {
        Self {
            index: RwLock::new(RecordIndex::new()),
            sequence: AtomicU64::new(1),
            generator,
        }
    }
}

#[async_trait]
impl<G: Generator> ReadRepository for InMemoryRepository<G> {
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
impl<G: Generator> Repository for InMemoryRepository<G> {
    async fn save(&self, record: UrlRecord) -> Result<SaveOutcome> {
        trace!(code = %record.short_code, "saving record in memory");
        self.index.write().insert(record)
    }

    async fn save_batch(&self, items: Vec<NewUrl>) -> Result<Vec<ShortCode>> {
        let mut index = self.index.write();
        let mut codes = Vec::with_capacity(items.len());
        for item in items {
            codes.push(index.allocate(&self.generator, item)?.into_code());
        }
        debug!(count = codes.len(), "saved batch in memory");
        Ok(codes)
    }

    async fn mark_deleted(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        let flipped = self.index.write().mark_deleted(owner_id, codes);
        debug!(owner_id, requested = codes.len(), flipped = flipped.len(), "marked records deleted");
        Ok(flipped.len() as u64)
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::StorageError;
    use burrow_generator::SeqGenerator;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn record(code_str: &str, url: &str, owner: &str) -> UrlRecord {
        UrlRecord::new("1", code(code_str), url, owner)
    }

    fn item(id: &str, url: &str, owner: &str) -> NewUrl {
        NewUrl {
            correlation_id: id.to_string(),
            original_url: url.to_string(),
            owner_id: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn save_and_get() {
        let repo = InMemoryRepository::new();

        let outcome = repo
            .save(record("abc123", "https://example.com", "u1"))
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Created(code("abc123")));

        let result = repo.get(&code("abc123")).await.unwrap().unwrap();
        assert_eq!(result.original_url, "https://example.com");
        assert!(!result.deleted);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = InMemoryRepository::new();

        assert!(repo.get(&code("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_same_url_twice_returns_existing_code() {
        let repo = InMemoryRepository::new();

        repo.save(record("first", "https://example.com", "u1"))
            .await
            .unwrap();
        let outcome = repo
            .save(record("second", "https://example.com", "u1"))
            .await
            .unwrap();

        assert_eq!(outcome, SaveOutcome::Existing(code("first")));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_with_taken_code_conflicts() {
        let repo = InMemoryRepository::new();

        repo.save(record("abc123", "https://one.example", "u1"))
            .await
            .unwrap();
        let err = repo
            .save(record("abc123", "https://two.example", "u1"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn batch_dedups_within_batch() {
        let repo = InMemoryRepository::with_generator(SeqGenerator::with_prefix("bw"));

        let codes = repo
            .save_batch(vec![
                item("1", "https://a.example", "u1"),
                item("2", "https://b.example", "u1"),
                item("3", "https://a.example", "u1"),
            ])
            .await
            .unwrap();

        assert_eq!(codes.len(), 3);
        assert_eq!(codes[0], codes[2]);
        assert_ne!(codes[0], codes[1]);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sequence_is_monotonic() {
        let repo = InMemoryRepository::new();

        let a = repo.next_sequence().await.unwrap();
        let b = repo.next_sequence().await.unwrap();
        assert_eq!(a, 1);
        assert!(b > a);
    }

    #[tokio::test]
    async fn counts_records_and_owners() {
        let repo = InMemoryRepository::new();
        repo.save(record("c1", "https://1", "u1")).await.unwrap();
        repo.save(record("c2", "https://2", "u1")).await.unwrap();
        repo.save(record("c3", "https://3", "u2")).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 3);
        assert_eq!(repo.owner_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ping_is_not_declared() {
        let repo = InMemoryRepository::new();

        assert!(!repo.capabilities().ping);
        assert!(matches!(
            repo.ping().await.unwrap_err(),
            StorageError::Unsupported(_)
        ));
    }
}
