mod cli;

use crate::cli::{Command, LogFormat, CLI};
use anyhow::Context;
use burrow_core::{Liveness, ShortCode, ShortenOutcome, ShortenParams, Shortener};
use burrow_generator::RandomGenerator;
use burrow_shortener::ShortenerService;
use burrow_storage::{
    InMemoryRepository, JournalRepository, PostgresRepository, Repository, StorageTarget,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    let target = StorageTarget::select(
        config.database_dsn.as_deref(),
        config.file_storage_path.as_deref(),
    );
    info!(storage_backend = target.name(), "selected storage backend");

    match target {
        StorageTarget::Volatile => run(InMemoryRepository::new(), &config).await,
        StorageTarget::Journal(path) => {
            let repository = JournalRepository::open(&path)
                .await
                .with_context(|| format!("open journal {}", path.display()))?;
            run(repository, &config).await
        }
        StorageTarget::Relational(dsn) => {
            let repository = PostgresRepository::connect(&dsn)
                .await
                .context("connect to postgres")?;
            run(repository, &config).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

async fn run<R: Repository>(repository: R, config: &CLI) -> anyhow::Result<()> {
    let service = ShortenerService::with_config(
        repository,
        RandomGenerator::new(),
        config.service_config(),
        config.deletion_config(),
    );

    let result = execute(&service, config).await;
    service.close().await?;
    result
}

async fn execute<R: Repository>(
    service: &ShortenerService<R, RandomGenerator>,
    config: &CLI,
) -> anyhow::Result<()> {
    let owner = config.owner.as_str();

    match &config.command {
        Command::Shorten { url } => {
            let outcome = service
                .shorten(ShortenParams {
                    original_url: url.clone(),
                    owner_id: owner.to_string(),
                })
                .await?;
            match &outcome {
                ShortenOutcome::Created(code) => println!("{}", service.short_url(code)),
                ShortenOutcome::AlreadyExists(code) => {
                    println!("{} (already shortened)", service.short_url(code))
                }
            }
        }
        Command::Batch { items } => {
            for response in service.batch_shorten(owner, items.clone()).await? {
                println!(
                    "{}\t{}",
                    response.correlation_id,
                    service.short_url(&response.short_code)
                );
            }
        }
        Command::Resolve { code } => {
            let code = ShortCode::new(code.as_str())?;
            println!("{}", service.get_original(&code).await?);
        }
        Command::List => {
            for record in service.get_user_urls(owner).await? {
                let state = if record.deleted { "deleted" } else { "active" };
                println!(
                    "{}\t{}\t{}",
                    service.short_url(&record.short_code),
                    record.original_url,
                    state
                );
            }
        }
        Command::Delete { codes } => {
            let codes = codes
                .iter()
                .map(|code| ShortCode::new(code.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            let report = service.delete_user_urls(owner, codes).await?;
            println!(
                "accepted: {} deleted, {}/{} batches completed, {} failed, {} cancelled",
                report.deleted, report.completed, report.batches, report.failed, report.cancelled
            );
        }
        Command::Stats { ip } => {
            let stats = service.stats(*ip).await?;
            println!("urls: {}\nusers: {}", stats.urls, stats.users);
        }
        Command::Ping => match service.ping().await? {
            Liveness::Alive => println!("alive"),
            Liveness::Unsupported => println!("ping is not supported by this backend"),
        },
    }

    Ok(())
}
