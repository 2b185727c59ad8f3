//! The fix-issue strategy: investigate, hypothesize, plan, resolve, verify.

use crate::graph::{Edge, FINISH, GraphError, NodeOutput, START, StrategyGraph, StrategyGraphBuilder, Transition};
use crate::prompts::{
    HYPOTHESIS_INSTRUCTION, INFO_COLLECTION_TASK, PLANNING_INSTRUCTION, RESOLUTION_TASK,
    VERIFICATION_TASK,
};

pub const INFO_COLLECTION: &str = "info_collection";
pub const HYPOTHESIS: &str = "hypothesis";
pub const PLANNING: &str = "planning";
pub const RESOLUTION: &str = "resolution";
pub const VERIFICATION: &str = "verification";

/// Build the fix-issue graph with the given per-subgraph turn cap.
pub fn fix_issue_strategy(max_subgraph_iterations: u32) -> Result<StrategyGraph, GraphError> {
    StrategyGraphBuilder::new("fix-issue")
        .subgraph(INFO_COLLECTION, INFO_COLLECTION_TASK, max_subgraph_iterations)
        .llm(HYPOTHESIS)
        .llm(PLANNING)
        .subgraph(RESOLUTION, RESOLUTION_TASK, max_subgraph_iterations)
        .subgraph(VERIFICATION, VERIFICATION_TASK, max_subgraph_iterations)
        .edge(Edge::new(START, INFO_COLLECTION))
        .edge(
            Edge::new(INFO_COLLECTION, HYPOTHESIS)
                .transform(|_| Transition::pass(HYPOTHESIS_INSTRUCTION)),
        )
        .edge(Edge::new(HYPOTHESIS, PLANNING).transform(|output| {
            Transition::pass(PLANNING_INSTRUCTION).narrate(HYPOTHESIS, output.to_input())
        }))
        .edge(Edge::new(PLANNING, RESOLUTION).transform(|output| {
            let plan = output.to_input();
            Transition::pass(plan.clone()).narrate(PLANNING, plan)
        }))
        .edge(Edge::new(RESOLUTION, VERIFICATION))
        .edge(Edge::new(VERIFICATION, FINISH).transform(narrate_as(VERIFICATION)))
        .build()
}

fn narrate_as(stage: &'static str) -> impl Fn(&NodeOutput) -> Transition + Send + Sync {
    move |output| {
        let text = output.to_input();
        Transition::pass(text.clone()).narrate(stage, text)
    }
}
