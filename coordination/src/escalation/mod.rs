//! Repair escalation — deterministic decisions for when the repair loop
//! should keep retrying versus hand a Task to the HITL queue.
//!
//! Pure state machine, no LLM calls: the Repair worker reports an attempt's
//! outcome, the engine decides.

pub mod engine;
pub mod state;

pub use engine::{EscalationConfig, EscalationDecision, EscalationEngine, SuggestedAction};
pub use state::{EscalationState, EscalationTrigger, RepairBudget, RepairIteration};
