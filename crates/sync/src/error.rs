//! Sync error types.

use std::time::Duration;

use common::StoreId;
use domain::DomainError;
use order_store::RepositoryError;
use thiserror::Error;

/// Failure reported by a store connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Network failure, rate limit or server error. Retried next cycle.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The call did not complete within the connector timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Credentials were refused. Halts the store for the rest of the cycle.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The platform permanently refused this request.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The platform returned data the connector could not interpret.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ConnectorError {
    /// Returns true if the same call may succeed on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transient(_) | ConnectorError::Timeout(_) | ConnectorError::Malformed(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectorError::Auth(_))
    }

    /// Short label used in log fields and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorError::Transient(_) => "transient",
            ConnectorError::Timeout(_) => "timeout",
            ConnectorError::Auth(_) => "auth",
            ConnectorError::Rejected(_) => "rejected",
            ConnectorError::Malformed(_) => "malformed",
        }
    }
}

/// Errors that abort a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Repository error.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A store is missing or misconfigured.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No connector is registered for the store's platform.
    #[error("No connector registered for platform '{platform}' (store {store_id})")]
    UnknownPlatform { store_id: StoreId, platform: String },

    /// A connector could not be built for a store.
    #[error("Connector for store {store_id} failed: {source}")]
    Connector {
        store_id: StoreId,
        #[source]
        source: ConnectorError,
    },

    /// Another cycle is already running.
    #[error("A sync cycle is already running")]
    CycleInProgress,
}

/// Convenience type alias for sync results.
pub type Result<T> = std::result::Result<T, SyncError>;
