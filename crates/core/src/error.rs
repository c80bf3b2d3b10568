//! Error types for the arena domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all arena operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Lookup errors ---
    #[error("Battle not found: {0}")]
    BattleNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid agent type: '{0}' (expected 'traditional' or 'ralph')")]
    InvalidAgent(String),

    // --- Upstream completion errors ---
    #[error("AI API error: {0}")]
    Provider(#[from] ProviderError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The battle was reset while an iteration was in flight.
    #[error("Battle {battle_id} was reset while iteration {iteration_number} was running")]
    Superseded {
        battle_id: String,
        iteration_number: u32,
    },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 529,
            message: "Overloaded".into(),
        });
        assert!(err.to_string().contains("529"));
        assert!(err.to_string().contains("Overloaded"));
        assert!(err.to_string().starts_with("AI API error"));
    }

    #[test]
    fn invalid_agent_names_the_value() {
        let err = Error::InvalidAgent("robot".into());
        assert!(err.to_string().contains("robot"));
    }
}
