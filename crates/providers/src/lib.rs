//! Completion client implementations for Ralph Arena.
//!
//! All clients implement the `arena_core::CompletionClient` trait.
//! `build_from_config` selects one based on configuration.

pub mod anthropic;
pub mod router;

pub use anthropic::AnthropicClient;
pub use router::build_from_config;
