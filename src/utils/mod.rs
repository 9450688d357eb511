//! Shared helpers

pub mod error;

pub use error::{error_chain, AppError, AppResult};
