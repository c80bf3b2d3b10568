//! Context strategies: how each agent assembles its next prompt.
//!
//! `TraditionalContext` replays every prior attempt, so its context grows
//! without bound. `FreshContext` starts clean each time and carries forward
//! only a short state file rewritten after every iteration.

use arena_core::battle::{AgentType, HistoryEntry, Iteration, IterationStatus, WorkingState};
use arena_core::message::Message;
use arena_core::task::Task;

const TRADITIONAL_SYSTEM: &str = "You are a coding assistant. Write clean, functional code. \n\
Your context includes all previous attempts - use them to improve, but be aware the context is growing.";

const FRESH_SYSTEM: &str = "You are a coding assistant using the Ralph Loop technique. \n\
Each iteration is fresh - no conversation history. Only read state from the provided state file.\n\
Write clean, functional code. Be concise and focused.";

/// Builds one agent's message set and folds results back into working state.
pub trait ContextStrategy: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// System instruction sent with every request.
    fn system_instruction(&self) -> &'static str;

    /// Messages for iteration `iteration_number` (1-based).
    fn build(&self, task: &Task, working: &WorkingState, iteration_number: u32) -> Vec<Message>;

    /// Context size in characters for a finished call.
    fn context_size(&self, messages: &[Message], response: &str) -> usize;

    /// Update working state after an iteration has been recorded.
    fn record(&self, working: &mut WorkingState, iteration: &Iteration, response: &str);
}

/// Full history replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraditionalContext;

impl ContextStrategy for TraditionalContext {
    fn agent_type(&self) -> AgentType {
        AgentType::Traditional
    }

    fn system_instruction(&self) -> &'static str {
        TRADITIONAL_SYSTEM
    }

    fn build(&self, task: &Task, working: &WorkingState, iteration_number: u32) -> Vec<Message> {
        let mut messages = vec![Message::user(&task.prompt_template)];
        if iteration_number == 1 {
            return messages;
        }

        for prev in &working.traditional_history {
            messages.push(Message::assistant(&prev.response));
            messages.push(Message::user(format!(
                "The previous attempt had issues. Status: {}. Please fix and improve.",
                prev.status
            )));
        }
        messages
    }

    fn context_size(&self, messages: &[Message], response: &str) -> usize {
        messages.iter().map(Message::char_len).sum::<usize>() + response.chars().count()
    }

    fn record(&self, working: &mut WorkingState, iteration: &Iteration, response: &str) {
        working.traditional_history.push(HistoryEntry {
            response: response.to_string(),
            status: iteration.status,
        });
    }
}

/// Fresh context plus state file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshContext;

impl FreshContext {
    fn state_file(iteration: &Iteration) -> String {
        let notes = if iteration.status == IterationStatus::Success {
            "Task completed successfully"
        } else {
            "Continue improving the implementation"
        };
        format!(
            "Iteration {} completed.\nStatus: {}\nWorking code so far:\n{}\n\nNotes: {}",
            iteration.iteration_number, iteration.status, iteration.code_snippet, notes
        )
    }
}

impl ContextStrategy for FreshContext {
    fn agent_type(&self) -> AgentType {
        AgentType::Ralph
    }

    fn system_instruction(&self) -> &'static str {
        FRESH_SYSTEM
    }

    fn build(&self, task: &Task, working: &WorkingState, iteration_number: u32) -> Vec<Message> {
        if iteration_number == 1 {
            return vec![Message::user(&task.prompt_template)];
        }

        vec![Message::user(format!(
            "TASK: {}\n\nCURRENT STATE (from state file):\n{}\n\n\
             Continue from where you left off. Build on the working parts, fix what's broken.",
            task.prompt_template, working.ralph_state_file
        ))]
    }

    fn context_size(&self, messages: &[Message], response: &str) -> usize {
        messages.first().map(Message::char_len).unwrap_or(0) + response.chars().count()
    }

    fn record(&self, working: &mut WorkingState, iteration: &Iteration, _response: &str) {
        working.ralph_state_file = Self::state_file(iteration);
    }
}

static TRADITIONAL: TraditionalContext = TraditionalContext;
static FRESH: FreshContext = FreshContext;

/// The strategy an agent uses.
pub fn strategy_for(agent_type: AgentType) -> &'static dyn ContextStrategy {
    match agent_type {
        AgentType::Traditional => &TRADITIONAL,
        AgentType::Ralph => &FRESH,
    }
}
