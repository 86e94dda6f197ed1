//! # Playroll Common Library
//!
//! Shared code for the playroll queue engine:
//! - Database bootstrap, migrations and row models
//! - The metadata map carried by every queue entry
//! - Configuration file and data directory resolution

pub mod config;
pub mod db;
pub mod error;
pub mod metadata;

pub use error::{Error, Result};
pub use metadata::Metadata;
