use burrow_core::{BatchRequest, TrustedSubnet};
use burrow_shortener::deletion::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
use burrow_shortener::service::DEFAULT_BASE_URL;
use burrow_shortener::{DeletionConfig, ServiceConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::time::Duration;

pub const DATABASE_DSN_ENV: &str = "BURROW_DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "BURROW_FILE_STORAGE_PATH";
pub const BASE_URL_ENV: &str = "BURROW_BASE_URL";
pub const TRUSTED_SUBNET_ENV: &str = "BURROW_TRUSTED_SUBNET";
pub const OWNER_ENV: &str = "BURROW_OWNER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "burrow", version, about = "Shorten, resolve and manage URLs")]
pub struct CLI {
    /// PostgreSQL connection string. Takes precedence over the journal file.
    #[arg(long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    /// Journal file for the file-backed store.
    #[arg(long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<String>,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// CIDR allowed to read stats, e.g. 10.0.0.0/8.
    #[arg(long, env = TRUSTED_SUBNET_ENV)]
    pub trusted_subnet: Option<TrustedSubnet>,

    /// Owner id attached to created URLs and used for listing and deletion.
    #[arg(long, env = OWNER_ENV, default_value = "")]
    pub owner: String,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub delete_batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub delete_workers: usize,

    #[arg(long)]
    pub delete_timeout_secs: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one URL.
    Shorten { url: String },
    /// Shorten several URLs given as `correlation_id=url`.
    Batch {
        #[arg(required = true, value_parser = parse_batch_item)]
        items: Vec<BatchRequest>,
    },
    /// Print the original URL behind a code.
    Resolve { code: String },
    /// List the owner's URLs, deleted ones included.
    List,
    /// Soft-delete codes owned by the owner.
    Delete {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Print record and owner counts as seen from `ip`.
    Stats { ip: IpAddr },
    /// Probe the storage backend.
    Ping,
}

impl CLI {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            base_url: self.base_url.clone(),
            trusted_subnet: self.trusted_subnet,
            ..ServiceConfig::default()
        }
    }

    pub fn deletion_config(&self) -> DeletionConfig {
        DeletionConfig {
            batch_size: self.delete_batch_size,
            workers: self.delete_workers,
            timeout: self.delete_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn parse_batch_item(raw: &str) -> Result<BatchRequest, String> {
    let (correlation_id, original_url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected correlation_id=url, got '{}'", raw))?;
    if correlation_id.is_empty() {
        return Err(format!("missing correlation id in '{}'", raw));
    }
    Ok(BatchRequest {
        correlation_id: correlation_id.to_string(),
        original_url: original_url.to_string(),
    })
}
