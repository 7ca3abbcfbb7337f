//! onestep_core - Core library for model acquisition
//!
//! This crate provides:
//! - Model reference parsing (bare `owner/name` or hub URLs)
//! - HuggingFace snapshot downloads with resumable transfers
//! - The local model store and its configuration
//! - The error taxonomy shared by every onestep crate

pub mod config;
pub mod downloaders;
pub mod error;
pub mod fetcher;
pub mod reference;

pub use config::Config;
pub use error::{Error, LoadAttempt, Result};
pub use fetcher::{LocalModel, RepositoryFetcher};
pub use reference::RepoId;
