//! # Arena Engine
//!
//! The iteration engine: context strategies, the heuristic evaluator, the
//! orchestrator that drives one iteration end to end, and the streaming
//! event protocol with its keep-alive ticker.

pub mod context;
pub mod evaluator;
pub mod orchestrator;
pub mod stream;

pub use context::{ContextStrategy, FreshContext, TraditionalContext, strategy_for};
pub use evaluator::{Evaluation, classify, evaluate, extract_snippet};
pub use orchestrator::{CompletionSettings, Orchestrator, PendingIteration};
pub use stream::{Heartbeat, IterationOutcome, IterationStream, StreamEvent, StreamFrame};
