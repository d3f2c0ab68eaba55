// Batch options and validation

use crate::application::retry::RetryScope;
use crate::application::runner::constants::{MAX_LABEL_LEN, MAX_RETRIES};
use crate::domain::Placement;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// What happens to outstanding work once a unit exhausts its retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the batch's waiting units and skip its units still queued in
    /// the runner; in-flight units drain
    #[default]
    CancelPending,
    /// Keep running every remaining unit; the batch still rejects
    DrainAll,
}

/// Options for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Free-form name used in logs and reports
    pub label: Option<String>,
    /// Retry budget; 0 means the first failure is terminal
    pub retries: u32,
    pub retry_scope: RetryScope,
    /// Runner placement of the initial units
    pub placement: Placement,
    pub on_failure: FailurePolicy,
}

impl BatchOptions {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_scope(mut self, scope: RetryScope) -> Self {
        self.retry_scope = scope;
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }
}

/// Validate batch options before a batch is started
pub fn validate_options(options: &BatchOptions) -> Result<()> {
    if let Some(label) = &options.label {
        if label.is_empty() {
            return Err(AppError::Validation("Batch label cannot be empty".to_string()));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(AppError::Validation(format!(
                "Batch label too long (max {} chars)",
                MAX_LABEL_LEN
            )));
        }
        if !label
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/'))
        {
            return Err(AppError::Validation(
                "Batch label must be alphanumeric with _-.:/ only".to_string(),
            ));
        }
    }

    if options.retries > MAX_RETRIES {
        return Err(AppError::Validation(format!(
            "Retries too large: {} (max {})",
            options.retries, MAX_RETRIES
        )));
    }

    Ok(())
}
