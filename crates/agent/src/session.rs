//! State of one strategy run.

use crate::graph::START;
use envmedic_core::message::History;
use std::collections::HashMap;
use uuid::Uuid;

/// Created by `StrategyEngine::run` and dropped when it returns.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub input: String,
    pub history: History,
    pub current: String,
    subgraph_turns: HashMap<String, u32>,
    /// Set when the run reaches `Finish`.
    pub result: Option<String>,
}

impl Session {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            history: History::new(),
            current: START.to_string(),
            subgraph_turns: HashMap::new(),
            result: None,
        }
    }

    /// Count one more turn for `subgraph` and return the new total.
    pub fn next_subgraph_turn(&mut self, subgraph: &str) -> u32 {
        let turns = self.subgraph_turns.entry(subgraph.to_string()).or_insert(0);
        *turns += 1;
        *turns
    }

    pub fn subgraph_turns(&self, subgraph: &str) -> u32 {
        self.subgraph_turns.get(subgraph).copied().unwrap_or(0)
    }
}
