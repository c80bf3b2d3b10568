//! Battle, agent and iteration state.
//!
//! A `Battle` owns one `AgentState` per strategy. `WorkingState` carries the
//! per-battle context material each strategy needs to build its next prompt;
//! it travels with the battle in a `BattleRecord` but is never part of the
//! snapshot returned to clients.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::completion::TokenSource;
use crate::error::Error;

/// Maximum characters of the raw response kept on an `Iteration`.
pub const MESSAGE_PREVIEW_CHARS: usize = 500;

/// The two competing context strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Replays the full conversation history every call.
    Traditional,
    /// Fresh context every call, carrying only a state summary.
    Ralph,
}

impl AgentType {
    pub const ALL: [AgentType; 2] = [AgentType::Traditional, AgentType::Ralph];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traditional => "traditional",
            Self::Ralph => "ralph",
        }
    }

    /// The competing strategy.
    pub fn other(&self) -> Self {
        match self {
            Self::Traditional => Self::Ralph,
            Self::Ralph => Self::Traditional,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traditional" => Ok(Self::Traditional),
            "ralph" => Ok(Self::Ralph),
            other => Err(Error::InvalidAgent(other.to_string())),
        }
    }
}

/// Heuristic classification of one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Success,
    Partial,
    Failure,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    #[default]
    Idle,
    Running,
    Completed,
}

/// One scored attempt by one agent. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub iteration_number: u32,
    pub context_size: usize,
    pub tokens_used: u64,
    pub token_source: TokenSource,
    pub time_taken_ms: u64,
    pub status: IterationStatus,
    pub code_snippet: String,
    /// Response text, truncated to `MESSAGE_PREVIEW_CHARS`.
    pub message: String,
    /// RFC 3339 UTC
    pub timestamp: String,
}

/// Truncate a response for storage on an `Iteration`.
pub fn preview(response: &str) -> String {
    match response.char_indices().nth(MESSAGE_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &response[..cut]),
        None => response.to_string(),
    }
}

/// One strategy's accumulated progress within a battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_type: AgentType,
    pub status: AgentStatus,
    #[serde(default)]
    pub iterations: Vec<Iteration>,
    #[serde(default)]
    pub total_tokens: u64,
    /// +1 per success, +0.5 per partial. Never rounded.
    #[serde(default)]
    pub success_count: f64,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub current_context_size: usize,
    #[serde(default)]
    pub total_time_ms: u64,
}

impl AgentState {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            status: AgentStatus::Idle,
            iterations: Vec::new(),
            total_tokens: 0,
            success_count: 0.0,
            failure_count: 0,
            current_context_size: 0,
            total_time_ms: 0,
        }
    }

    /// The number the next iteration will carry.
    pub fn next_iteration_number(&self) -> u32 {
        self.iterations.len() as u32 + 1
    }

    pub fn is_completed(&self) -> bool {
        self.status == AgentStatus::Completed
    }

    /// Fold a finished iteration into the counters.
    ///
    /// Returns `true` when this iteration moved the agent into `Completed`.
    /// A completed agent stays completed even if a later attempt scores lower.
    pub fn record(&mut self, iteration: Iteration) -> bool {
        let was_completed = self.is_completed();

        self.total_tokens += iteration.tokens_used;
        self.total_time_ms += iteration.time_taken_ms;
        self.current_context_size = iteration.context_size;
        if !was_completed {
            self.status = AgentStatus::Running;
        }

        match iteration.status {
            IterationStatus::Success => {
                self.success_count += 1.0;
                self.status = AgentStatus::Completed;
            }
            IterationStatus::Partial => self.success_count += 0.5,
            IterationStatus::Failure => self.failure_count += 1,
        }

        self.iterations.push(iteration);
        !was_completed && self.is_completed()
    }
}

/// One comparison run between the two strategies on a fixed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub id: String,
    pub task_id: String,
    pub traditional_agent: AgentState,
    pub ralph_agent: AgentState,
    pub status: BattleStatus,
    pub winner: Option<AgentType>,
    /// RFC 3339 UTC
    pub created_at: String,
}

impl Battle {
    /// Create a new idle battle for a task.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            traditional_agent: AgentState::new(AgentType::Traditional),
            ralph_agent: AgentState::new(AgentType::Ralph),
            status: BattleStatus::Idle,
            winner: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn agent(&self, agent_type: AgentType) -> &AgentState {
        match agent_type {
            AgentType::Traditional => &self.traditional_agent,
            AgentType::Ralph => &self.ralph_agent,
        }
    }

    pub fn agent_mut(&mut self, agent_type: AgentType) -> &mut AgentState {
        match agent_type {
            AgentType::Traditional => &mut self.traditional_agent,
            AgentType::Ralph => &mut self.ralph_agent,
        }
    }

    /// Flip idle agents to running. A completed battle is terminal.
    pub fn start(&mut self) {
        if self.status == BattleStatus::Completed {
            return;
        }
        self.status = BattleStatus::Running;
        for agent_type in AgentType::ALL {
            let agent = self.agent_mut(agent_type);
            if agent.status == AgentStatus::Idle {
                agent.status = AgentStatus::Running;
            }
        }
    }

    /// Discard all progress and return to idle.
    pub fn reset(&mut self) {
        self.traditional_agent = AgentState::new(AgentType::Traditional);
        self.ralph_agent = AgentState::new(AgentType::Ralph);
        self.status = BattleStatus::Idle;
        self.winner = None;
    }

    /// Recompute winner and battle status after `agent_type` just completed.
    pub fn on_agent_completed(&mut self, agent_type: AgentType) {
        if self.agent(agent_type.other()).is_completed() {
            self.status = BattleStatus::Completed;
        } else {
            if self.winner.is_none() {
                self.winner = Some(agent_type);
            }
            self.status = BattleStatus::Running;
        }
    }
}

/// One past traditional attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub response: String,
    pub status: IterationStatus,
}

/// Per-battle context material for the two strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingState {
    /// Every traditional response, oldest first.
    #[serde(default)]
    pub traditional_history: Vec<HistoryEntry>,
    /// Overwritten on every ralph iteration.
    #[serde(default)]
    pub ralph_state_file: String,
}

/// What the store persists: the public snapshot plus working state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleRecord {
    pub battle: Battle,
    #[serde(default)]
    pub working: WorkingState,
}

impl BattleRecord {
    pub fn new(battle: Battle) -> Self {
        Self {
            battle,
            working: WorkingState::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.battle.id
    }

    /// Reset the battle and forget all context material.
    pub fn reset(&mut self) {
        self.battle.reset();
        self.working = WorkingState::default();
    }
}
