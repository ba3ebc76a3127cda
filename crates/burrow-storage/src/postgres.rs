use crate::index::MAX_ALLOCATION_ATTEMPTS;
use async_trait::async_trait;
use burrow_core::error::{Result, StorageError};
use burrow_core::{
    Capabilities, NewUrl, ReadRepository, Repository, SaveOutcome, ShortCode, UrlRecord,
};
use burrow_generator::{Generator, RandomGenerator};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

/// PostgreSQL implementation of the repository contract.
///
/// Uniqueness of `original_url` and `short_url` is enforced by the engine, so
/// concurrent saves of the same URL settle on one row without a lock on our
/// side. Soft delete flips `is_deleted`; rows are never removed.
#[derive(Debug, Clone)]
pub struct PostgresRepository<G = RandomGenerator> {
    pool: PgPool,
    generator: G,
}

impl PostgresRepository<RandomGenerator> {
    /// Creates a repository from an existing connection pool.
    ///
    /// The schema is not touched; call [`PostgresRepository::migrate`] when
    /// the pool points at a fresh database.
    pub fn new(pool: PgPool) -> Self {
        Self::with_generator(pool, RandomGenerator)
    }

    /// Opens a pool for `database_url` and brings the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        let repo = Self::new(pool);
        repo.migrate().await?;
        Ok(repo)
    }
}

impl<G: Generator> PostgresRepository<G> {
    pub fn with_generator(pool: PgPool, generator: G) -> Self {
        Self { pool, generator }
    }

    /// Creates the `urls` table and its sequence, drops legacy duplicate
    /// rows and installs the unique index on `original_url`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        info!("postgres schema is up to date");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_batch_item(&self, conn: &mut PgConnection, item: NewUrl) -> Result<ShortCode> {
        if let Some(existing) = find_code_by_url(&mut *conn, &item.original_url).await? {
            return Ok(existing);
        }

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let code: ShortCode = self.generator.generate().into();
            if code_taken(&mut *conn, &code).await? {
                continue;
            }

            let inserted = sqlx::query(
                r#"
                INSERT INTO urls (correlation_id, short_url, original_url, user_id)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (original_url) DO NOTHING
                RETURNING short_url
                "#,
            )
            .bind(&item.correlation_id)
            .bind(code.as_str())
            .bind(&item.original_url)
            .bind(&item.owner_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

            return match inserted {
                Some(_) => Ok(code),
                // A concurrent writer stored the URL between our lookup and insert.
                None => find_code_by_url(&mut *conn, &item.original_url)
                    .await?
                    .ok_or_else(|| StorageError::Conflict(code.to_string())),
            };
        }

        Err(StorageError::Unavailable(format!(
            "no free short code after {} attempts",
            MAX_ALLOCATION_ATTEMPTS
        )))
    }
}

async fn find_code_by_url(conn: &mut PgConnection, original_url: &str) -> Result<Option<ShortCode>> {
    let row = sqlx::query("SELECT short_url FROM urls WHERE original_url = $1")
        .bind(original_url)
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_error)?;

    row.map(|row| {
        row.try_get::<String, _>("short_url")
            .map(ShortCode::new_unchecked)
            .map_err(map_sqlx_error)
    })
    .transpose()
}

async fn code_taken(conn: &mut PgConnection, code: &ShortCode) -> Result<bool> {
    let taken = sqlx::query("SELECT 1 FROM urls WHERE short_url = $1")
        .bind(code.as_str())
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_error)?
        .is_some();
    Ok(taken)
}

fn record_from_row(row: &PgRow) -> Result<UrlRecord> {
    let short_code: String = row.try_get("short_url").map_err(map_sqlx_error)?;
    Ok(UrlRecord {
        correlation_id: row.try_get("correlation_id").map_err(map_sqlx_error)?,
        short_code: ShortCode::new_unchecked(short_code),
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        deleted: row.try_get("is_deleted").map_err(map_sqlx_error)?,
    })
}

fn to_count(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("negative count: {}", value)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl<G: Generator> ReadRepository for PostgresRepository<G> {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        let row = sqlx::query(
            r#"
            SELECT correlation_id, short_url, original_url, user_id, is_deleted
            FROM urls
            WHERE short_url = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT correlation_id, short_url, original_url, user_id, is_deleted
            FROM urls
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        to_count(count)
    }

    async fn owner_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        to_count(count)
    }
}

#[async_trait]
impl<G: Generator> Repository for PostgresRepository<G> {
    async fn save(&self, record: UrlRecord) -> Result<SaveOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO urls (correlation_id, short_url, original_url, user_id, is_deleted)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.correlation_id)
        .bind(record.short_code.as_str())
        .bind(&record.original_url)
        .bind(&record.owner_id)
        .bind(record.deleted)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(SaveOutcome::Created(record.short_code)),
            Err(err) if is_unique_violation(&err) => {
                let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
                match find_code_by_url(&mut conn, &record.original_url).await? {
                    Some(existing) => {
                        debug!(code = %existing, "original url already stored");
                        Ok(SaveOutcome::Existing(existing))
                    }
                    None => Err(StorageError::Conflict(record.short_code.to_string())),
                }
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn save_batch(&self, items: Vec<NewUrl>) -> Result<Vec<ShortCode>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut codes = Vec::with_capacity(items.len());

        // Dropping `tx` on an early return rolls the whole batch back.
        for item in items {
            codes.push(self.insert_batch_item(&mut tx, item).await?);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(count = codes.len(), "committed batch");
        Ok(codes)
    }

    async fn mark_deleted(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();

        let result = sqlx::query(
            r#"
            UPDATE urls
            SET is_deleted = TRUE
            WHERE user_id = $1
              AND short_url = ANY($2)
              AND NOT is_deleted
            "#,
        )
        .bind(owner_id)
        .bind(codes)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn next_sequence(&self) -> Result<u64> {
        let next: i64 = sqlx::query_scalar("SELECT nextval('urls_correlation_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        to_count(next)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { ping: true }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_classified() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StorageError::Timeout(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            StorageError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StorageError::InvalidData(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::Protocol("bad frame".into())),
            StorageError::Query(_)
        ));
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert_eq!(to_count(7).unwrap(), 7);
        assert!(matches!(to_count(-1), Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn schema_enforces_url_uniqueness() {
        assert!(SCHEMA.contains("CREATE UNIQUE INDEX IF NOT EXISTS urls_original_url_key"));
        assert!(SCHEMA.contains("urls_correlation_seq"));
    }
}
