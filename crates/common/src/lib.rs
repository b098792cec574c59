//! Shared types, error definitions, and utilities used across all antares crates.

pub mod error;
pub mod types;

pub use error::Error;
