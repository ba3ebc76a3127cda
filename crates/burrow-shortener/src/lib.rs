//! URL shortener service.
//!
//! Orchestrates a storage backend and a code generator behind the
//! `Shortener` trait, and runs bulk soft deletes through a worker pipeline.
//! Core types are re-exported from `burrow_core`.

pub mod deletion;
pub mod service;

#[cfg(test)]
mod testing;

pub use burrow_core::{Shortener, ShortenerError};
pub use deletion::{CancelHandle, DeletionConfig, DeletionPipeline};
pub use service::{ServiceConfig, ShortenerService};
