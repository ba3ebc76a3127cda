//! Test double wrapping the volatile backend with injectable faults.

use async_trait::async_trait;
use burrow_core::error::{Result, StorageError};
use burrow_core::{
    Capabilities, NewUrl, ReadRepository, Repository, SaveOutcome, ShortCode, UrlRecord,
};
use burrow_storage::InMemoryRepository;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ScriptedRepository {
    inner: InMemoryRepository,
    failing_code: Mutex<Option<String>>,
    delete_delay: Mutex<Option<Duration>>,
    delete_calls: AtomicUsize,
    ping: AtomicBool,
    unavailable: AtomicBool,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `mark_deleted` fail for any batch containing `code`.
    pub fn fail_deletes_containing(&self, code: &str) {
        *self.failing_code.lock() = Some(code.to_string());
    }

    pub fn delay_deletes(&self, delay: Duration) {
        *self.delete_delay.lock() = Some(delay);
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn support_ping(&self) {
        self.ping.store(true, Ordering::SeqCst);
    }

    /// Every call fails with `Unavailable` from now on.
    pub fn go_down(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("backend is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadRepository for ScriptedRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        self.check()?;
        self.inner.get(code).await
    }

    async fn get_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        self.check()?;
        self.inner.get_by_owner(owner_id).await
    }

    async fn count(&self) -> Result<u64> {
        self.check()?;
        self.inner.count().await
    }

    async fn owner_count(&self) -> Result<u64> {
        self.check()?;
        self.inner.owner_count().await
    }
}

#[async_trait]
impl Repository for ScriptedRepository {
    async fn save(&self, record: UrlRecord) -> Result<SaveOutcome> {
        self.check()?;
        self.inner.save(record).await
    }

    async fn save_batch(&self, items: Vec<NewUrl>) -> Result<Vec<ShortCode>> {
        self.check()?;
        self.inner.save_batch(items).await
    }

    async fn mark_deleted(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failing_code.lock().clone();
        if let Some(failing) = failing {
            if codes.iter().any(|c| c.as_str() == failing) {
                return Err(StorageError::Query(format!("refusing to delete {}", failing)));
            }
        }

        self.inner.mark_deleted(owner_id, codes).await
    }

    async fn next_sequence(&self) -> Result<u64> {
        self.check()?;
        self.inner.next_sequence().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ping: self.ping.load(Ordering::SeqCst),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
