//! Analysis agents: registry, signal schema and concurrent fan-out.

pub mod facade;
pub mod registry;
pub mod signal;

pub use facade::{AgentFacade, AgentInvoker, DebateOutcome, DebateRequest, LlmInvoker};
pub use registry::{lookup, resolve_roster, AgentRole, AgentSpec, RosterEntry, AGENTS};
pub use signal::{AgentSignal, RawAgentOutput, SignalAction};
