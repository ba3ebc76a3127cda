use crate::error::{Result, StorageError};
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stored URL record.
///
/// Field names on the wire match the persisted journal and table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Sequence-assigned or caller-supplied correlation identifier.
    pub correlation_id: String,
    #[serde(rename = "short_url")]
    pub short_code: ShortCode,
    pub original_url: String,
    /// Opaque id of the principal that created the record. Never changes.
    #[serde(rename = "user_id")]
    pub owner_id: String,
    /// Soft-delete flag. Only ever moves from `false` to `true`.
    #[serde(rename = "is_deleted", default)]
    pub deleted: bool,
}

impl UrlRecord {
    pub fn new(
        correlation_id: impl Into<String>,
        short_code: ShortCode,
        original_url: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            short_code,
            original_url: original_url.into(),
            owner_id: owner_id.into(),
            deleted: false,
        }
    }
}

/// One item of a batch insert. The backend allocates the short code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUrl {
    pub correlation_id: String,
    pub original_url: String,
    pub owner_id: String,
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was persisted under the given code.
    Created(ShortCode),
    /// A record with the same original URL already existed; nothing was written.
    Existing(ShortCode),
}

impl SaveOutcome {
    pub fn code(&self) -> &ShortCode {
        match self {
            SaveOutcome::Created(code) | SaveOutcome::Existing(code) => code,
        }
    }

    pub fn into_code(self) -> ShortCode {
        match self {
            SaveOutcome::Created(code) | SaveOutcome::Existing(code) => code,
        }
    }
}

/// Optional capabilities a backend declares at construction time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The backend answers [`Repository::ping`] meaningfully.
    pub ping: bool,
}

/// A read-only view of a repository.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the record for a given short code, deleted or not.
    /// Returns `None` if the code was never created.
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>>;

    /// Returns every record the owner ever saved, in creation order.
    ///
    /// Soft-deleted records are included. An unknown owner yields an empty list.
    async fn get_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>>;

    /// Number of records, active and deleted.
    async fn count(&self) -> Result<u64>;

    /// Number of distinct owners.
    async fn owner_count(&self) -> Result<u64>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Persists `record` unless a record with the same original URL exists.
    ///
    /// Returns `Err(Conflict)` if the short code is taken by a different URL;
    /// the caller should retry with a fresh code.
    async fn save(&self, record: UrlRecord) -> Result<SaveOutcome>;

    /// Persists a batch, allocating a short code per item.
    ///
    /// The returned codes line up with `items` by position. Items whose
    /// original URL already exists (in storage or earlier in the batch)
    /// reuse that code.
    async fn save_batch(&self, items: Vec<NewUrl>) -> Result<Vec<ShortCode>>;

    /// Soft-deletes the given codes owned by `owner_id`.
    ///
    /// Codes owned by someone else, unknown codes and already deleted
    /// records are skipped. Returns how many records were flipped.
    async fn mark_deleted(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64>;

    /// Returns a fresh value from a per-instance monotonic sequence.
    async fn next_sequence(&self) -> Result<u64>;

    /// Releases backend resources. Calling it more than once is harmless.
    async fn close(&self) -> Result<()>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Liveness probe. Only meaningful when [`Capabilities::ping`] is set.
    async fn ping(&self) -> Result<()> {
        Err(StorageError::Unsupported("ping".to_string()))
    }
}
