//! Error kinds surfaced by the council engine.
//!
//! Cycle stages communicate expected outcomes (skipped trades, hold
//! decisions) through structured result values; these variants cover the
//! genuinely exceptional paths. `Fatal` stops the affected council only.

use rust_decimal::Decimal;

use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failure: {0}")]
    Validation(String),

    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: i64 },

    #[error("insufficient capital: requested {requested}, available {available}")]
    InsufficientCapital {
        requested: Decimal,
        available: Decimal,
    },

    #[error("insufficient holdings for {symbol}: selling {selling}, owned {owned}")]
    InsufficientHoldings {
        symbol: String,
        selling: Decimal,
        owned: Decimal,
    },

    #[error("venue rejected {op}: {detail}")]
    VenueRejection { op: &'static str, detail: String },

    /// Contained within a single (agent, symbol) invocation; the facade
    /// converts it to a default hold signal and never propagates it.
    #[error("agent failure: {0}")]
    AgentFailure(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Transient errors may be retried by the orchestrator at the next
    /// schedule tick; everything else fails the cycle outright.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Store(e) => e.is_busy(),
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
