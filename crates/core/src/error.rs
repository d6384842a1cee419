//! Engine error model.

use thiserror::Error;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error.
///
/// Deterministic business failures (validation, stock shortfall, lifecycle
/// violations) plus the two fatal classes: broken ledger invariants and
/// poisoned locks. Transport and presentation concerns belong to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input, rejected before any state is touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Demand exceeds what can currently be promised from a warehouse.
    #[error(
        "insufficient stock for item {item_id} in warehouse {warehouse_id} \
         (requested: {requested}, available: {available})"
    )]
    InsufficientStock {
        item_id: String,
        warehouse_id: String,
        requested: u64,
        available: u64,
    },

    /// An operation was attempted against an entity in an ineligible status.
    #[error("{entity} is {current}; cannot {attempted}")]
    InvalidState {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    /// A workflow transition not present in the transition table.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A ledger mutation would break `0 <= reserved <= on_hand` (or a
    /// reservation/ledger consistency rule). Indicates an upstream bug.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Unknown reservation/transfer/item/warehouse id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A lock guarding shared state was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn insufficient_stock(
        item_id: impl ToString,
        warehouse_id: impl ToString,
        requested: u64,
        available: u64,
    ) -> Self {
        Self::InsufficientStock {
            item_id: item_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            requested,
            available,
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        current: impl ToString,
        attempted: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            entity,
            current: current.to_string(),
            attempted: attempted.into(),
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn poisoned(what: impl Into<String>) -> Self {
        Self::LockPoisoned(what.into())
    }

    /// Whether the caller may reasonably retry (e.g. against another warehouse).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientStock { .. })
    }

    /// Whether the error indicates a bug or corrupted state and should alert an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_) | Self::LockPoisoned(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_separates_retryable_from_fatal() {
        let short = EngineError::insufficient_stock("i", "w", 5, 2);
        assert!(short.is_retryable());
        assert!(!short.is_fatal());

        let broken = EngineError::invariant("reserved exceeds on_hand");
        assert!(broken.is_fatal());
        assert!(!broken.is_retryable());

        assert!(!EngineError::validation("quantity must be positive").is_fatal());
    }

    #[test]
    fn invalid_transition_message_names_both_states() {
        let err = EngineError::invalid_transition("requested", "completed");
        assert_eq!(err.to_string(), "invalid transition from requested to completed");
    }
}
