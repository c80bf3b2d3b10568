//! # Arena Core
//!
//! Domain types, traits, and error definitions for Ralph Arena, an experiment
//! that pits a history-replaying context strategy against a fresh-context one
//! on fixed coding tasks. This crate has **zero framework dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here (`CompletionClient`,
//! `BattleStore`). Implementations live in their respective crates, so tests
//! can swap in scripted clients and in-memory stores.

pub mod battle;
pub mod completion;
pub mod error;
pub mod message;
pub mod store;
pub mod task;
pub mod tokens;

// Re-export key types at crate root for ergonomics
pub use battle::{
    AgentState, AgentStatus, AgentType, Battle, BattleRecord, BattleStatus, HistoryEntry,
    Iteration, IterationStatus, WorkingState,
};
pub use completion::{
    ChunkReceiver, Completion, CompletionClient, CompletionRequest, StreamChunk, TokenSource,
    Usage,
};
pub use error::{Error, ProviderError, Result, StoreError};
pub use message::{Message, Role};
pub use store::BattleStore;
pub use task::{Task, TaskCatalog};
