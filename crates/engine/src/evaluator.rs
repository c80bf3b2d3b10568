//! Heuristic response evaluation and snippet extraction.
//!
//! Deliberately crude keyword matching: a criterion counts as met when any of
//! its longer words shows up anywhere in the response.

use arena_core::battle::IterationStatus;
use arena_core::task::Task;

const SUCCESS_THRESHOLD: f64 = 0.7;
const PARTIAL_THRESHOLD: f64 = 0.4;
const SNIPPET_MAX_LINES: usize = 20;
const SNIPPET_FALLBACK_CHARS: usize = 300;
const FENCE: &str = "```";
const CODE_MARKERS: [&str; 4] = [FENCE, "def ", "function ", "const "];
const CODE_LINE_PREFIXES: [&str; 5] = ["def", "function", "const", "import", "from"];

/// Detailed result of scoring one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub status: IterationStatus,
    pub criteria_met: usize,
    pub criteria_total: usize,
    pub has_code: bool,
}

impl Evaluation {
    pub fn met_fraction(&self) -> f64 {
        if self.criteria_total == 0 {
            1.0
        } else {
            self.criteria_met as f64 / self.criteria_total as f64
        }
    }
}

/// Score a response against a task's acceptance criteria.
pub fn evaluate(response: &str, task: &Task) -> Evaluation {
    let lowered = response.to_lowercase();

    let criteria_met = task
        .acceptance_criteria
        .iter()
        .filter(|criterion| criterion_met(criterion, &lowered))
        .count();

    let has_code = CODE_MARKERS.iter().any(|marker| response.contains(marker));

    let mut evaluation = Evaluation {
        status: IterationStatus::Failure,
        criteria_met,
        criteria_total: task.acceptance_criteria.len(),
        has_code,
    };

    let fraction = evaluation.met_fraction();
    evaluation.status = if has_code && fraction >= SUCCESS_THRESHOLD {
        IterationStatus::Success
    } else if has_code && fraction >= PARTIAL_THRESHOLD {
        IterationStatus::Partial
    } else {
        IterationStatus::Failure
    };
    evaluation
}

/// Just the status.
pub fn classify(response: &str, task: &Task) -> IterationStatus {
    evaluate(response, task).status
}

fn criterion_met(criterion: &str, lowered_response: &str) -> bool {
    criterion
        .to_lowercase()
        .split_whitespace()
        .filter(|word| word.chars().count() > 3)
        .any(|word| lowered_response.contains(word))
}

/// Pull a representative code excerpt out of a response.
///
/// Takes the body of the first fenced block, dropping a leading language tag
/// line, capped at 20 lines. Without a fence, the first 300 characters.
pub fn extract_snippet(response: &str) -> String {
    let mut parts = response.split(FENCE);
    if let (Some(_), Some(code)) = (parts.next(), parts.next()) {
        let mut lines: Vec<&str> = code.split('\n').collect();
        let keep_first = lines.first().is_some_and(|first| {
            let trimmed = first.trim();
            CODE_LINE_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        });
        if !keep_first && !lines.is_empty() {
            lines.remove(0);
        }
        lines.truncate(SNIPPET_MAX_LINES);
        return lines.join("\n");
    }

    match response.char_indices().nth(SNIPPET_FALLBACK_CHARS) {
        Some((cut, _)) => format!("{}...", &response[..cut]),
        None => response.to_string(),
    }
}
