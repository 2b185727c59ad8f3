//! Strategy graphs: nodes, conditional edges, and their validation.
//!
//! A graph always has a `Start` and a `Finish` node. Between them sit LLM
//! nodes (one tool-less turn) and subgraph nodes (a bounded tool-calling
//! loop). Edges out of a node are tried in declaration order; the first
//! whose predicate accepts the node output is taken, and its transform
//! produces the next node's input plus an optional narration.

use envmedic_core::message::MessageToolCall;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const START: &str = "__start__";
pub const FINISH: &str = "__finish__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Start,
    Finish,
    /// One turn with tool calls disabled.
    Llm { name: String },
    /// Tool-calling loop bounded by `max_iterations` turns.
    Subgraph {
        name: String,
        task: String,
        max_iterations: u32,
    },
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Self::Start => START,
            Self::Finish => FINISH,
            Self::Llm { name } | Self::Subgraph { name, .. } => name,
        }
    }
}

/// What a node produced.
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// A terminal assistant message.
    Text(String),
    /// The model still wanted to call tools.
    ToolCalls(Vec<MessageToolCall>),
}

impl NodeOutput {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::ToolCalls(_) => None,
        }
    }

    /// Flatten into the string handed to the next node.
    pub fn to_input(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::ToolCalls(calls) => serde_json::to_string(calls).unwrap_or_default(),
        }
    }
}

/// Text shown to the human when an edge is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narration {
    pub stage: String,
    pub text: String,
}

/// Result of an edge transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub input: String,
    pub narration: Option<Narration>,
}

impl Transition {
    pub fn pass(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            narration: None,
        }
    }

    pub fn narrate(mut self, stage: impl Into<String>, text: impl Into<String>) -> Self {
        self.narration = Some(Narration {
            stage: stage.into(),
            text: text.into(),
        });
        self
    }
}

type Predicate = Arc<dyn Fn(&NodeOutput) -> bool + Send + Sync>;
type Transform = Arc<dyn Fn(&NodeOutput) -> Transition + Send + Sync>;

#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    predicate: Predicate,
    transform: Transform,
}

impl Edge {
    /// An edge accepting terminal assistant text and passing it through.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            predicate: Arc::new(NodeOutput::is_text),
            transform: Arc::new(|output| Transition::pass(output.to_input())),
        }
    }

    pub fn when(mut self, predicate: impl Fn(&NodeOutput) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn transform(
        mut self,
        transform: impl Fn(&NodeOutput) -> Transition + Send + Sync + 'static,
    ) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    pub fn accepts(&self, output: &NodeOutput) -> bool {
        (self.predicate)(output)
    }

    pub fn apply(&self, output: &NodeOutput) -> Transition {
        (self.transform)(output)
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node '{0}'")]
    DuplicateNode(String),

    #[error("edge {from} -> {to} references unknown node '{node}'")]
    UnknownNode {
        from: String,
        to: String,
        node: String,
    },

    #[error("edge {to} leaves the finish node")]
    EdgeFromFinish { to: String },

    #[error("edge {from} enters the start node")]
    EdgeIntoStart { from: String },

    #[error("no edge leaves the start node")]
    NoEntryEdge,

    #[error("subgraph '{0}' allows zero iterations")]
    ZeroIterations(String),
}

/// Collects nodes and edges, then validates them in [`build`](Self::build).
pub struct StrategyGraphBuilder {
    name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl StrategyGraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: vec![Node::Start, Node::Finish],
            edges: Vec::new(),
        }
    }

    pub fn llm(mut self, name: impl Into<String>) -> Self {
        self.nodes.push(Node::Llm { name: name.into() });
        self
    }

    pub fn subgraph(
        mut self,
        name: impl Into<String>,
        task: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        self.nodes.push(Node::Subgraph {
            name: name.into(),
            task: task.into(),
            max_iterations,
        });
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Validate and freeze. Reports the first problem found.
    pub fn build(self) -> Result<StrategyGraph, GraphError> {
        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for node in self.nodes {
            if let Node::Subgraph { name, max_iterations: 0, .. } = &node {
                return Err(GraphError::ZeroIterations(name.clone()));
            }
            let id = node.id().to_string();
            if nodes.insert(id.clone(), node).is_some() {
                return Err(GraphError::DuplicateNode(id));
            }
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !nodes.contains_key(end) {
                    return Err(GraphError::UnknownNode {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        node: end.clone(),
                    });
                }
            }
            if edge.from == FINISH {
                return Err(GraphError::EdgeFromFinish { to: edge.to.clone() });
            }
            if edge.to == START {
                return Err(GraphError::EdgeIntoStart { from: edge.from.clone() });
            }
        }

        if !self.edges.iter().any(|e| e.from == START) {
            return Err(GraphError::NoEntryEdge);
        }

        Ok(StrategyGraph {
            name: self.name,
            nodes,
            edges: self.edges,
        })
    }
}

/// An immutable, validated strategy graph.
#[derive(Debug, Clone)]
pub struct StrategyGraph {
    name: String,
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
}

impl StrategyGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Take the first accepting edge out of `from`. Transforms of the other
    /// edges are never called.
    pub fn route(&self, from: &str, output: &NodeOutput) -> Option<(&Edge, Transition)> {
        self.edges
            .iter()
            .filter(|edge| edge.from == from)
            .find(|edge| edge.accepts(output))
            .map(|edge| (edge, edge.apply(output)))
    }
}
