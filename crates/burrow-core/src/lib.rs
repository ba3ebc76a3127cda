//! Core types and traits for the Burrow URL shortener.
//!
//! This crate provides the storage contract shared by every backend and the
//! public shortener operations consumed by transport layers.

pub mod error;
pub mod repository;
pub mod shortcode;
pub mod shortener;
pub mod subnet;

pub use error::{CoreError, ShortenerError, StorageError};
pub use repository::{Capabilities, NewUrl, ReadRepository, Repository, SaveOutcome, UrlRecord};
pub use shortcode::ShortCode;
pub use shortener::{
    BatchRequest, BatchResponse, DeletionReport, Liveness, ShortenOutcome, ShortenParams,
    Shortener, Stats,
};
pub use subnet::TrustedSubnet;
