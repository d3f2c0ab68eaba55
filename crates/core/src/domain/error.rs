// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid batch status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Invalid max concurrency: {0} (must be at least 1)")]
    InvalidConcurrency(usize),
}

pub type Result<T> = std::result::Result<T, DomainError>;
