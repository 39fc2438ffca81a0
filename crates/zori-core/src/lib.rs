//! zori-core: shared types, error taxonomy, and configuration schema

pub mod config;
pub mod error;
pub mod types;

pub use error::{ZoriError, ZoriResult};
pub use types::{Algorithm, ContentAddress};
