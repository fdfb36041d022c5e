//! Pantheon Backend Library
//!
//! Autonomous trading councils: LLM-driven agent debates, per-symbol
//! consensus, position-based paper/real execution and account metrics.

pub mod agents;
pub mod broadcast;
pub mod config;
pub mod council;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod money;
pub mod venue;

pub use config::AppConfig;
pub use council::Orchestrator;
pub use db::Database;
pub use error::{EngineError, EngineResult};
