//! `ralph-arena tasks`: List the built-in tasks.

use arena_core::battle::AgentType;
use arena_core::task::TaskCatalog;

pub fn run() {
    let catalog = TaskCatalog::builtin();

    println!("{:<18} {:<8} {:>6} {:>6}  TITLE", "ID", "LEVEL", "TRAD", "RALPH");
    for task in catalog.list() {
        let expected = |agent| {
            task.expected_for(agent)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".into())
        };
        println!(
            "{:<18} {:<8} {:>6} {:>6}  {}",
            task.id,
            task.difficulty,
            expected(AgentType::Traditional),
            expected(AgentType::Ralph),
            task.title
        );
    }
}
