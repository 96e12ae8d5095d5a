//! Decision graph and async traversal engine.
//!
//! Grounded on `elm/tree.py::DecisionTree` and its async sibling
//! `elm/ords/extraction/tree.py::AsyncDecisionTree`. The original carries
//! its graph as an `networkx.DiGraph` with "api"/"chat_llm_caller" stashed
//! as a graph-level attribute and edge conditions as arbitrary Python
//! callables found via `graph.successors(node)`, which networkx yields in
//! insertion order. `petgraph::graph::DiGraph` makes no such guarantee for
//! `edges(node)`, so [`DecisionGraph`] tracks an explicit `order` on each
//! edge and sorts by it before picking a transition (Open Question #2).
//!
//! Callbacks (`callback(llm_response, tree, node_name)` in the original)
//! are out of scope here: nothing downstream needs to observe a node
//! response besides the tree itself, so the port omits them rather than
//! carrying dead generality.

use std::collections::HashMap;
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::Value;

use crate::error::OrdsError;
use crate::llm::ChatLlmCaller;

/// A condition predicate evaluated against the LLM's raw reply text for a
/// node. `None` marks the "else" edge: it is taken only if no callable
/// condition on any sibling edge matches. Mirrors the original's
/// `edge.get("condition")` where a missing condition acts as `else`.
pub type Condition = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct Node {
    pub name: String,
    /// May contain `{placeholder}` tokens substituted from `DecisionTree`'s
    /// format context before each call, mirroring `prompt.format(**txt_fmt)`
    /// in `elm/tree.py::_prepare_graph_call`.
    pub prompt: String,
}

struct Edge {
    condition: Option<Condition>,
    order: usize,
}

/// Directed graph of prompts (nodes) and response-conditioned transitions
/// (edges), built up with explicit insertion order so traversal is
/// deterministic regardless of what `petgraph` happens to iterate.
pub struct DecisionGraph {
    g: DiGraph<Node, Edge>,
    index_by_name: HashMap<String, NodeIndex>,
    next_order: usize,
}

impl Default for DecisionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionGraph {
    pub fn new() -> Self {
        Self {
            g: DiGraph::new(),
            index_by_name: HashMap::new(),
            next_order: 0,
        }
    }

    /// Add a prompt node. Panics on a duplicate name: this is a
    /// construction-time programmer error, analogous to the original
    /// silently overwriting `nx.DiGraph` node attributes on re-`add_node`,
    /// which this port treats as a bug rather than allowed behavior.
    pub fn add_node(&mut self, name: impl Into<String>, prompt: impl Into<String>) -> &mut Self {
        let name = name.into();
        assert!(
            !self.index_by_name.contains_key(&name),
            "duplicate decision graph node {name:?}"
        );
        let idx = self.g.add_node(Node {
            name: name.clone(),
            prompt: prompt.into(),
        });
        self.index_by_name.insert(name, idx);
        self
    }

    /// Add a conditioned transition. Edges are tried in the order they were
    /// added across the *whole graph* (not per-node), matching how the
    /// original's insertion order falls out of dict/list iteration.
    pub fn add_edge(&mut self, from: &str, to: &str, condition: Condition) -> &mut Self {
        self.add_edge_inner(from, to, Some(condition))
    }

    /// Add the unconditioned "else" transition out of `from`. At most one
    /// such edge per node is meaningful; a second one makes traversal
    /// ambiguous and `DecisionTree::run` will error on it.
    pub fn add_else_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.add_edge_inner(from, to, None)
    }

    fn add_edge_inner(&mut self, from: &str, to: &str, condition: Option<Condition>) -> &mut Self {
        let from_idx = *self
            .index_by_name
            .get(from)
            .unwrap_or_else(|| panic!("no such decision graph node {from:?}"));
        let to_idx = *self
            .index_by_name
            .get(to)
            .unwrap_or_else(|| panic!("no such decision graph node {to:?}"));
        let order = self.next_order;
        self.next_order += 1;
        self.g.add_edge(from_idx, to_idx, Edge { condition, order });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_by_name.contains_key(name)
    }

    fn node(&self, name: &str) -> &Node {
        let idx = self.index_by_name[name];
        &self.g[idx]
    }

    /// Evaluate outgoing edges from `node_name` against `reply` and return
    /// the next node name, or `None` if `node_name` is a leaf.
    ///
    /// Mirrors `elm/tree.py::_parse_graph_output`: callable conditions are
    /// tried first in insertion order, then the single unconditioned
    /// "else" edge, erroring if neither resolves.
    fn next_node(&self, node_name: &str, reply: &str) -> Result<Option<String>, OrdsError> {
        let idx = self.index_by_name[node_name];
        let mut out_edges: Vec<_> = self
            .g
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
            .collect();
        out_edges.sort_by_key(|(_, edge)| edge.order);

        if out_edges.is_empty() {
            return Ok(None);
        }

        let has_any_condition = out_edges.iter().any(|(_, e)| e.condition.is_some());
        if out_edges.len() > 1 && !has_any_condition {
            return Err(OrdsError::GraphTraversalError {
                node: node_name.to_string(),
                reason: "at least one outgoing edge must have a condition".to_string(),
                last_reply: reply.to_string(),
            });
        }

        for (target, edge) in &out_edges {
            if let Some(cond) = &edge.condition {
                if cond(reply) {
                    return Ok(Some(self.g[*target].name.clone()));
                }
            }
        }

        for (target, edge) in &out_edges {
            if edge.condition.is_none() {
                return Ok(Some(self.g[*target].name.clone()));
            }
        }

        Err(OrdsError::GraphTraversalError {
            node: node_name.to_string(),
            reason: "no edge condition was satisfied".to_string(),
            last_reply: reply.to_string(),
        })
    }
}

/// `true` if `reply` begins with "yes" (case-insensitive). Grounded on
/// `elm/ords/extraction/graphs.py::llm_response_starts_with_yes`; provided
/// here since it's a domain-agnostic condition any `PromptGraph`
/// implementation can reuse for its decision-tree edges.
pub fn starts_with_yes(reply: &str) -> bool {
    reply.trim_start().to_lowercase().starts_with("yes")
}

/// `true` if `reply` begins with "no" (case-insensitive).
pub fn starts_with_no(reply: &str) -> bool {
    reply.trim_start().to_lowercase().starts_with("no")
}

/// `true` if `reply` does not begin with "no" (case-insensitive) —
/// slightly more permissive than [`starts_with_yes`] for edges that treat
/// anything but an explicit "no" as an affirmative.
pub fn does_not_start_with_no(reply: &str) -> bool {
    !starts_with_no(reply)
}

impl fmt::Debug for DecisionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionGraph")
            .field("nodes", &self.index_by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Traverses a [`DecisionGraph`] against a live [`ChatLlmCaller`],
/// substituting `{placeholder}` tokens in each node's prompt from a
/// format context before sending it. Grounded on
/// `elm/ords/extraction/tree.py::AsyncDecisionTree`.
pub struct DecisionTree {
    graph: DecisionGraph,
    caller: ChatLlmCaller,
    format_context: HashMap<String, String>,
    history: Vec<String>,
}

impl DecisionTree {
    pub fn new(graph: DecisionGraph, caller: ChatLlmCaller) -> Self {
        Self {
            graph,
            caller,
            format_context: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn with_context(mut self, format_context: HashMap<String, String>) -> Self {
        self.format_context = format_context;
        self
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn caller(&self) -> &ChatLlmCaller {
        &self.caller
    }

    pub fn caller_mut(&mut self) -> &mut ChatLlmCaller {
        &mut self.caller
    }

    fn render_prompt(&self, node_name: &str) -> String {
        let mut prompt = self.graph.node(node_name).prompt.clone();
        for (key, value) in &self.format_context {
            prompt = prompt.replace(&format!("{{{key}}}"), value);
        }
        prompt
    }

    async fn call_node(&mut self, node_name: &str) -> anyhow::Result<String> {
        let prompt = self.render_prompt(node_name);
        self.history.push(node_name.to_string());
        let reply = self.caller.call(prompt).await?;
        Ok(reply)
    }

    /// Traverse the graph starting at `node0` (typically `"init"`),
    /// returning the leaf node's raw LLM reply text.
    pub async fn run_raw(&mut self, node0: &str) -> anyhow::Result<String> {
        self.history.clear();
        let mut current = node0.to_string();
        loop {
            let reply = self.call_node(&current).await.map_err(|err| {
                let transcript = self
                    .caller
                    .messages()
                    .iter()
                    .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                anyhow::anyhow!(
                    "error traversing decision tree at node {current:?}: {err}\n\
                     full conversation:\n{transcript}"
                )
            })?;

            match self.graph.next_node(&current, &reply)? {
                Some(next) => current = next,
                None => return Ok(reply),
            }
        }
    }

    /// Like [`Self::run_raw`], but parses the leaf reply as JSON (empty
    /// object if it isn't valid JSON).
    pub async fn run(&mut self, node0: &str) -> anyhow::Result<Value> {
        let reply = self.run_raw(node0).await?;
        Ok(crate::llm::json::llm_response_as_json(&reply))
    }

    /// Like [`Self::run_raw`], but swallows traversal errors (no edge
    /// condition satisfied, malformed graph) and returns `None` instead of
    /// propagating them. Mirrors `elm/ords/extraction/parse.py::
    /// _run_async_tree`'s treatment of `RuntimeError` as "the document
    /// doesn't have this information" rather than a hard failure — the
    /// partial transcript remains available via `caller()`/`caller_mut()`.
    pub async fn run_ignoring_errors(&mut self, node0: &str) -> Option<String> {
        match self.run_raw(node0).await {
            Ok(reply) => Some(reply),
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    "decision tree traversal did not complete; treating as no \
                     info found"
                );
                None
            }
        }
    }

    /// Like [`Self::run_ignoring_errors`], but parses a successful, non-empty
    /// reply as JSON and folds both the error and empty-reply cases into an
    /// empty JSON object.
    pub async fn run_or_empty(&mut self, node0: &str) -> Value {
        match self.run_ignoring_errors(node0).await {
            Some(reply) if !reply.is_empty() => crate::llm::json::llm_response_as_json(&reply),
            _ => Value::Object(serde_json::Map::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Service, ServiceProvider, ServiceRequest, ServiceResponse};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct ScriptedLlm {
        replies: std::sync::Mutex<std::collections::VecDeque<&'static str>>,
    }

    #[async_trait]
    impl Service for ScriptedLlm {
        fn name(&self) -> &'static str {
            "llm"
        }

        async fn process(&self, request: ServiceRequest) -> anyhow::Result<ServiceResponse> {
            match request {
                ServiceRequest::Llm { .. } => {
                    let mut replies = self.replies.lock().unwrap();
                    let next = replies.pop_front().unwrap_or("{}");
                    Ok(ServiceResponse::Llm(Some(next.to_string())))
                }
                _ => anyhow::bail!("unsupported"),
            }
        }
    }

    fn graph_with_branch() -> DecisionGraph {
        let mut g = DecisionGraph::new();
        g.add_node("init", "Does the text mention {topic}?");
        g.add_node("yes_leaf", "Great, summarize the mention.");
        g.add_node("no_leaf", "Explain why it is absent.");
        g.add_edge(
            "init",
            "yes_leaf",
            Box::new(|reply: &str| reply.to_lowercase().contains("yes")),
        );
        g.add_else_edge("init", "no_leaf");
        g
    }

    #[tokio::test]
    async fn traverses_to_matching_conditioned_edge() {
        let replies: std::collections::VecDeque<&'static str> =
            vec!["Yes, it does.", "{\"summary\": \"ok\"}"].into();
        let service = Arc::new(ScriptedLlm {
            replies: std::sync::Mutex::new(replies),
        });
        let result = ServiceProvider::scoped(vec![service], |provider| async move {
            let caller = ChatLlmCaller::new(provider, "llm", "test-model", "You are helpful.", None);
            let mut context = HashMap::new();
            context.insert("topic".to_string(), "wind".to_string());
            let mut tree = DecisionTree::new(graph_with_branch(), caller).with_context(context);
            let out = tree.run("init").await?;
            assert_eq!(out["summary"], "ok");
            assert_eq!(tree.history(), &["init", "yes_leaf"]);
            Ok(())
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn falls_back_to_else_edge_when_condition_fails() {
        let replies: std::collections::VecDeque<&'static str> =
            vec!["No mention at all.", "{\"reason\": \"absent\"}"].into();
        let service = Arc::new(ScriptedLlm {
            replies: std::sync::Mutex::new(replies),
        });
        let result = ServiceProvider::scoped(vec![service], |provider| async move {
            let caller = ChatLlmCaller::new(provider, "llm", "test-model", "You are helpful.", None);
            let mut tree = DecisionTree::new(graph_with_branch(), caller);
            let out = tree.run("init").await?;
            assert_eq!(out["reason"], "absent");
            assert_eq!(tree.history(), &["init", "no_leaf"]);
            Ok(())
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn errors_when_multiple_edges_have_no_condition() {
        let mut g = DecisionGraph::new();
        g.add_node("init", "prompt");
        g.add_node("a", "a");
        g.add_node("b", "b");
        g.add_else_edge("init", "a");
        g.add_else_edge("init", "b");

        let service = Arc::new(ScriptedLlm {
            replies: std::sync::Mutex::new(vec!["anything"].into()),
        });
        let result = ServiceProvider::scoped(vec![service], |provider| async move {
            let caller = ChatLlmCaller::new(provider, "llm", "test-model", "sys", None);
            let mut tree = DecisionTree::new(g, caller);
            tree.run("init").await
        })
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn rejects_duplicate_node_names() {
        let result = std::panic::catch_unwind(|| {
            let mut g = DecisionGraph::new();
            g.add_node("init", "a");
            g.add_node("init", "b");
        });
        assert!(result.is_err());
    }
}
