//! Billing error types

use thiserror::Error;

/// Errors raised while reconciling add-on entitlements
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(uuid::Uuid),

    #[error("User not found: {0}")]
    UserNotFound(uuid::Uuid),

    #[error("No handler registered for add-on type: {0}")]
    UnsupportedAddonType(String),

    #[error("Domain teardown failed: {0}")]
    DomainTeardown(String),

    #[error("Email delivery failed: {0}")]
    Notification(String),

    #[error("Cache invalidation failed: {0}")]
    Cache(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Internal(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
