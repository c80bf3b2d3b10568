//! Task definitions and the built-in catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::battle::AgentType;

/// A fixed coding task both strategies work on. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Ordered acceptance-criterion phrases.
    pub acceptance_criteria: Vec<String>,
    pub difficulty: String,
    /// Expected iterations to finish, keyed by strategy name.
    pub expected_iterations: HashMap<String, u32>,
    pub prompt_template: String,
}

impl Task {
    pub fn expected_for(&self, agent_type: AgentType) -> Option<u32> {
        self.expected_iterations.get(agent_type.as_str()).copied()
    }
}

/// Read-only lookup of tasks by id.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// The five tasks the arena ships with.
    pub fn builtin() -> Self {
        Self::new(vec![
            task(
                "rest-api",
                "Build a REST API",
                "Create a Node.js REST API with 3 endpoints: GET /users, POST /users, DELETE /users/:id",
                &[
                    "All 3 endpoints work correctly",
                    "Proper HTTP status codes",
                    "Basic validation implemented",
                ],
                "medium",
                (8, 4),
                "Create a Node.js Express REST API with the following endpoints:
- GET /users - returns array of users
- POST /users - creates a new user (accepts name, email)
- DELETE /users/:id - deletes user by id

Include proper error handling and validation. Use an in-memory array for storage.",
            ),
            task(
                "todo-component",
                "React Todo Component",
                "Build a functional React Todo component with add, complete, and delete functionality",
                &[
                    "Can add new todos",
                    "Can mark todos complete",
                    "Can delete todos",
                    "Proper state management",
                ],
                "easy",
                (6, 3),
                "Create a React functional component called TodoApp that:
- Has an input field to add new todos
- Displays a list of todos
- Each todo can be marked as complete (strikethrough)
- Each todo has a delete button
- Uses useState for state management
- Has clean, readable code",
            ),
            task(
                "data-processor",
                "Data Processing Script",
                "Write a Python script that processes CSV data and generates statistics",
                &[
                    "Reads CSV file correctly",
                    "Calculates mean, median, mode",
                    "Handles missing values",
                    "Outputs clean report",
                ],
                "medium",
                (7, 4),
                "Write a Python script that:
1. Reads a CSV file with columns: id, name, age, salary
2. Calculates statistics: mean, median, mode for numeric columns
3. Handles missing/invalid values gracefully
4. Prints a formatted report of the statistics
Use pandas library. Include error handling.",
            ),
            task(
                "unit-tests",
                "Unit Test Suite",
                "Write comprehensive unit tests for a calculator class",
                &[
                    "Tests all basic operations",
                    "Edge cases covered",
                    "Error cases tested",
                    "Good test structure",
                ],
                "easy",
                (5, 3),
                "Write unit tests for a Calculator class with methods: add, subtract, multiply, divide.
- Test basic functionality for each method
- Test edge cases (zero, negative numbers, large numbers)
- Test error handling (division by zero)
- Use pytest framework
- Include clear test names and docstrings",
            ),
            task(
                "auth-middleware",
                "Authentication Middleware",
                "Create JWT authentication middleware for Express.js",
                &[
                    "Validates JWT tokens",
                    "Handles expired tokens",
                    "Proper error responses",
                    "Protects routes correctly",
                ],
                "hard",
                (10, 5),
                "Create an Express.js JWT authentication middleware that:
1. Extracts JWT from Authorization header (Bearer token)
2. Validates the token signature
3. Checks token expiration
4. Attaches decoded user info to request
5. Returns appropriate error responses
Use jsonwebtoken library. Include helper functions for token generation.",
            ),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn task(
    id: &str,
    title: &str,
    description: &str,
    criteria: &[&str],
    difficulty: &str,
    (traditional, ralph): (u32, u32),
    prompt: &str,
) -> Task {
    Task {
        id: id.into(),
        title: title.into(),
        description: description.into(),
        acceptance_criteria: criteria.iter().map(|c| c.to_string()).collect(),
        difficulty: difficulty.into(),
        expected_iterations: HashMap::from([
            (AgentType::Traditional.as_str().to_string(), traditional),
            (AgentType::Ralph.as_str().to_string(), ralph),
        ]),
        prompt_template: prompt.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_five_tasks() {
        let catalog = TaskCatalog::builtin();
        assert_eq!(catalog.len(), 5);
        let ids: Vec<&str> = catalog.list().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            ["rest-api", "todo-component", "data-processor", "unit-tests", "auth-middleware"]
        );
    }

    #[test]
    fn lookup_by_id() {
        let catalog = TaskCatalog::builtin();
        let task = catalog.get("rest-api").unwrap();
        assert_eq!(task.acceptance_criteria.len(), 3);
        assert_eq!(task.expected_for(AgentType::Traditional), Some(8));
        assert_eq!(task.expected_for(AgentType::Ralph), Some(4));
        assert!(catalog.get("nope").is_none());
    }

    #[test]
    fn task_json_shape() {
        let catalog = TaskCatalog::builtin();
        let json = serde_json::to_value(catalog.get("auth-middleware").unwrap()).unwrap();
        assert_eq!(json["difficulty"], "hard");
        assert_eq!(json["expected_iterations"]["ralph"], 5);
        assert!(json["prompt_template"].as_str().unwrap().contains("jsonwebtoken"));
    }
}
