pub mod index;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod target;

pub use journal::JournalRepository;
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use target::StorageTarget;

pub use burrow_core::error::Result;
pub use burrow_core::{
    Capabilities, NewUrl, ReadRepository, Repository, SaveOutcome, ShortCode, StorageError,
    UrlRecord,
};
