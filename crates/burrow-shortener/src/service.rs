use crate::deletion::{CancelHandle, DeletionConfig, DeletionPipeline};
use async_trait::async_trait;
use burrow_core::{
    BatchRequest, BatchResponse, DeletionReport, Liveness, NewUrl, Repository, SaveOutcome,
    ShortCode, ShortenOutcome, ShortenParams, Shortener, ShortenerError, Stats, StorageError,
    TrustedSubnet, UrlRecord,
};
use burrow_generator::Generator;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ServiceConfig {
    /// Prefix for rendered short URLs.
    #[builder(default = DEFAULT_BASE_URL.to_string(), setter(into))]
    pub base_url: String,
    /// Network allowed to read stats. `None` denies everyone.
    #[builder(default, setter(strip_option))]
    pub trusted_subnet: Option<TrustedSubnet>,
    /// Candidate codes tried by `shorten` before giving up.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The `Shortener` implementation used by every front end.
///
/// Wraps one backend instance and one code generator. Single shortens pick
/// their candidate code here and retry on collision; batches let the backend
/// allocate codes so it can do so inside its own critical section or
/// transaction.
#[derive(Debug, Clone)]
pub struct ShortenerService<R, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    config: ServiceConfig,
    deletion: DeletionPipeline<R>,
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    pub fn new(repository: R, generator: G) -> Self {
        Self::with_config(
            repository,
            generator,
            ServiceConfig::default(),
            DeletionConfig::default(),
        )
    }

    pub fn with_config(
        repository: R,
        generator: G,
        config: ServiceConfig,
        deletion: DeletionConfig,
    ) -> Self {
        let repository = Arc::new(repository);
        Self {
            deletion: DeletionPipeline::new(Arc::clone(&repository), deletion),
            repository,
            generator: Arc::new(generator),
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Renders the public URL for `code`.
    pub fn short_url(&self, code: &ShortCode) -> String {
        code.to_url(&self.config.base_url)
    }

    /// Like [`Shortener::delete_user_urls`], stopping early once `cancel` fires.
    pub async fn delete_user_urls_with_cancel(
        &self,
        owner_id: &str,
        codes: Vec<ShortCode>,
        cancel: CancelHandle,
    ) -> Result<DeletionReport> {
        if codes.is_empty() {
            return Err(ShortenerError::Validation(
                "no short codes to delete".to_string(),
            ));
        }
        Ok(self.deletion.run_with_cancel(owner_id, codes, cancel).await)
    }

    /// Releases the backend.
    pub async fn close(&self) -> Result<()> {
        self.repository
            .close()
            .await
            .map_err(|e| storage_to_shortener_error("close", e))
    }

    fn validate_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(ShortenerError::Validation("URL cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Repository, G: Generator> Shortener for ShortenerService<R, G> {
    async fn shorten(&self, params: ShortenParams) -> Result<ShortenOutcome> {
        Self::validate_url(&params.original_url)?;

        for attempt in 1..=self.config.max_attempts {
            let code: ShortCode = self.generator.generate().into();

            let taken = self
                .repository
                .get(&code)
                .await
                .map_err(|e| storage_to_shortener_error("get", e))?
                .is_some();
            if taken {
                trace!(code = %code, attempt, "candidate code already taken");
                continue;
            }

            let sequence = self
                .repository
                .next_sequence()
                .await
                .map_err(|e| storage_to_shortener_error("next sequence", e))?;
            let record = UrlRecord::new(
                sequence.to_string(),
                code,
                params.original_url.clone(),
                params.owner_id.clone(),
            );

            match self.repository.save(record).await {
                Ok(SaveOutcome::Created(code)) => {
                    debug!(code = %code, "shortened url");
                    return Ok(ShortenOutcome::Created(code));
                }
                Ok(SaveOutcome::Existing(code)) => {
                    debug!(code = %code, "url was already shortened");
                    return Ok(ShortenOutcome::AlreadyExists(code));
                }
                Err(StorageError::Conflict(code)) => {
                    trace!(code = %code, attempt, "lost race for candidate code");
                }
                Err(e) => return Err(storage_to_shortener_error("save", e)),
            }
        }

        warn!(
            attempts = self.config.max_attempts,
            "gave up looking for a free short code"
        );
        Err(ShortenerError::StorageUnavailable(format!(
            "no free short code after {} attempts",
            self.config.max_attempts
        )))
    }

    async fn batch_shorten(
        &self,
        owner_id: &str,
        items: Vec<BatchRequest>,
    ) -> Result<Vec<BatchResponse>> {
        if items.is_empty() {
            return Err(ShortenerError::Validation("batch is empty".to_string()));
        }
        for item in &items {
            Self::validate_url(&item.original_url).map_err(|_| {
                ShortenerError::Validation(format!(
                    "empty URL for correlation id {}",
                    item.correlation_id
                ))
            })?;
        }

        let new_urls = items
            .iter()
            .map(|item| NewUrl {
                correlation_id: item.correlation_id.clone(),
                original_url: item.original_url.clone(),
                owner_id: owner_id.to_string(),
            })
            .collect();

        let codes = self
            .repository
            .save_batch(new_urls)
            .await
            .map_err(|e| storage_to_shortener_error("save batch", e))?;

        if codes.len() != items.len() {
            return Err(ShortenerError::StorageUnavailable(format!(
                "save batch: backend returned {} codes for {} items",
                codes.len(),
                items.len()
            )));
        }

        Ok(items
            .into_iter()
            .zip(codes)
            .map(|(item, short_code)| BatchResponse {
                correlation_id: item.correlation_id,
                short_code,
            })
            .collect())
    }

    async fn get_original(&self, code: &ShortCode) -> Result<String> {
        let record = self
            .repository
            .get(code)
            .await
            .map_err(|e| storage_to_shortener_error("get", e))?
            .ok_or_else(|| ShortenerError::NotFound(code.to_string()))?;

        if record.deleted {
            return Err(ShortenerError::Gone(code.to_string()));
        }
        Ok(record.original_url)
    }

    async fn get_user_urls(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        self.repository
            .get_by_owner(owner_id)
            .await
            .map_err(|e| storage_to_shortener_error("get by owner", e))
    }

    async fn delete_user_urls(
        &self,
        owner_id: &str,
        codes: Vec<ShortCode>,
    ) -> Result<DeletionReport> {
        self.delete_user_urls_with_cancel(owner_id, codes, CancelHandle::new())
            .await
    }

    async fn stats(&self, caller: IpAddr) -> Result<Stats> {
        let Some(subnet) = &self.config.trusted_subnet else {
            return Err(ShortenerError::AccessDenied(
                "no trusted subnet configured".to_string(),
            ));
        };
        if !subnet.contains(caller) {
            return Err(ShortenerError::AccessDenied(format!(
                "{} is outside {}",
                caller, subnet
            )));
        }

        let urls = self
            .repository
            .count()
            .await
            .map_err(|e| storage_to_shortener_error("count", e))?;
        let users = self
            .repository
            .owner_count()
            .await
            .map_err(|e| storage_to_shortener_error("owner count", e))?;

        Ok(Stats { urls, users })
    }

    async fn ping(&self) -> Result<Liveness> {
        if !self.repository.capabilities().ping {
            return Ok(Liveness::Unsupported);
        }
        self.repository
            .ping()
            .await
            .map_err(|e| storage_to_shortener_error("ping", e))?;
        Ok(Liveness::Alive)
    }
}

/// Converts a StorageError into the caller-visible taxonomy.
fn storage_to_shortener_error(operation: &str, e: StorageError) -> ShortenerError {
    ShortenerError::StorageUnavailable(format!("{}: {}", operation, e))
}
