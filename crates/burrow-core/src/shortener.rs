use crate::repository::UrlRecord;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use std::net::IpAddr;

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// Parameters for shortening a single URL.
#[derive(Debug, Clone)]
pub struct ShortenParams {
    /// The original URL to be shortened.
    pub original_url: String,
    /// Opaque id of the caller, issued by the identity layer.
    pub owner_id: String,
}

/// Outcome of [`Shortener::shorten`].
///
/// Transports use the variant to choose between a "created" and a
/// "conflict" response; both carry a usable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortenOutcome {
    Created(ShortCode),
    AlreadyExists(ShortCode),
}

impl ShortenOutcome {
    pub fn code(&self) -> &ShortCode {
        match self {
            ShortenOutcome::Created(code) | ShortenOutcome::AlreadyExists(code) => code,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ShortenOutcome::Created(_))
    }

    /// Returns the code of a fresh record, or `Conflict` carrying the
    /// existing code.
    pub fn into_created(self) -> Result<ShortCode> {
        match self {
            ShortenOutcome::Created(code) => Ok(code),
            ShortenOutcome::AlreadyExists(code) => Err(
                crate::error::ShortenerError::Conflict(code.into_string()),
            ),
        }
    }
}

/// One item of a batch shorten request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub correlation_id: String,
    pub original_url: String,
}

/// One item of a batch shorten response, at the same position as its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub correlation_id: String,
    pub short_code: ShortCode,
}

/// Aggregate counts exposed to trusted callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub urls: u64,
    pub users: u64,
}

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// The active backend does not declare liveness probing.
    Unsupported,
}

/// Summary of a bulk soft-delete run.
///
/// `batches == completed + failed + cancelled` once the run has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub batches: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Records flipped to deleted by this run.
    pub deleted: u64,
}

impl DeletionReport {
    /// Whether every batch reached the backend successfully.
    pub fn is_complete(&self) -> bool {
        self.completed == self.batches
    }
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens a URL, or reports the code it was already shortened to.
    async fn shorten(&self, params: ShortenParams) -> Result<ShortenOutcome>;

    /// Shortens many URLs for one owner. Responses follow request order.
    async fn batch_shorten(
        &self,
        owner_id: &str,
        items: Vec<BatchRequest>,
    ) -> Result<Vec<BatchResponse>>;

    /// Resolves a code to its URL. `NotFound` if never created, `Gone` if deleted.
    async fn get_original(&self, code: &ShortCode) -> Result<String>;

    /// Lists every record the owner created, deleted ones included.
    async fn get_user_urls(&self, owner_id: &str) -> Result<Vec<UrlRecord>>;

    /// Soft-deletes the owner's codes through the bulk deletion pipeline.
    async fn delete_user_urls(&self, owner_id: &str, codes: Vec<ShortCode>)
        -> Result<DeletionReport>;

    /// Record and owner counts. Denied unless `caller` is inside the trusted subnet.
    async fn stats(&self, caller: IpAddr) -> Result<Stats>;

    /// Probes the backend if it supports liveness probing.
    async fn ping(&self) -> Result<Liveness>;
}
