//! Stage graph construction
//!
//! [`StageGraph`] collects stages and their outgoing rules. [`StageGraph::compile`]
//! performs all structural validation up front so that execution never has
//! to deal with unknown names or unrouted labels:
//! - Every referenced stage is registered
//! - Each stage has at most one outgoing rule
//! - Every variant of a conditional route's label type is mapped
//! - Exactly one entry stage exists
//!
//! Cycles are allowed. Unreachable stages only produce a warning.

use crate::channel::GraphState;
use crate::engine::CompiledGraph;
use crate::route::{ConditionalRoute, RouteLabel, RouteTarget, Rule};
use crate::stage::Stage;
use indexmap::IndexMap;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::sync::Arc;

/// Structural graph errors, raised only while building or compiling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A stage name was registered twice
    #[error("stage '{0}' is already registered")]
    DuplicateStage(String),

    /// A stage was given a second outgoing rule
    #[error("stage '{0}' already has an outgoing rule")]
    DuplicateRoute(String),

    /// A rule or the entry refers to an unregistered stage
    #[error("unknown stage '{stage}' referenced by {referenced_by}")]
    UnknownStage {
        /// Missing stage name
        stage: String,
        /// Where the reference was found
        referenced_by: String,
    },

    /// A conditional route leaves a label variant unmapped
    #[error("conditional route from '{stage}' does not map label {label}")]
    UnmappedLabel {
        /// Stage owning the route
        stage: String,
        /// Debug rendering of the missing variant
        label: String,
    },

    /// No entry stage could be determined
    #[error("graph has no entry stage")]
    NoEntry,

    /// Several stages qualify as entry and none was set explicitly
    #[error("graph has several candidate entry stages: {0:?}")]
    AmbiguousEntry(Vec<String>),
}

/// Builder for a stage graph over state `S`
pub struct StageGraph<S: GraphState> {
    stages: IndexMap<String, Arc<dyn Stage<S>>>,
    rules: IndexMap<String, Rule<S>>,
    entry: Option<String>,
}

impl<S: GraphState> Default for StageGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StageGraph<S> {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: IndexMap::new(),
            rules: IndexMap::new(),
            entry: None,
        }
    }

    /// Number of registered stages
    #[inline]
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Register a named stage
    ///
    /// # Errors
    /// [`GraphError::DuplicateStage`] when the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        stage: impl Stage<S> + 'static,
    ) -> Result<&mut Self, GraphError> {
        self.register_arc(name, Arc::new(stage))
    }

    /// Register a shared stage
    ///
    /// # Errors
    /// [`GraphError::DuplicateStage`] when the name is taken.
    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        stage: Arc<dyn Stage<S>>,
    ) -> Result<&mut Self, GraphError> {
        let name = name.into();
        if self.stages.contains_key(&name) {
            return Err(GraphError::DuplicateStage(name));
        }
        self.stages.insert(name, stage);
        Ok(self)
    }

    /// Unconditional edge; `to` may be [`RouteTarget::End`]
    ///
    /// # Errors
    /// [`GraphError::DuplicateRoute`] when `from` already has a rule.
    pub fn add_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<RouteTarget>,
    ) -> Result<&mut Self, GraphError> {
        self.add_rule(from.into(), Rule::Direct(to.into()))
    }

    /// Conditional edge: `predicate` picks a label on the merged state, `map`
    /// sends each label to a target
    ///
    /// # Errors
    /// [`GraphError::DuplicateRoute`] when `from` already has a rule.
    pub fn add_conditional_edge<L, P>(
        &mut self,
        from: impl Into<String>,
        predicate: P,
        map: impl IntoIterator<Item = (L, RouteTarget)>,
    ) -> Result<&mut Self, GraphError>
    where
        L: RouteLabel,
        P: Fn(&S) -> L + Send + Sync + 'static,
    {
        let route = ConditionalRoute::new(predicate, map.into_iter().collect());
        self.add_rule(from.into(), Rule::Conditional(route))
    }

    /// Set the entry stage explicitly
    pub fn set_entry(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry = Some(name.into());
        self
    }

    fn add_rule(&mut self, from: String, rule: Rule<S>) -> Result<&mut Self, GraphError> {
        if self.rules.contains_key(&from) {
            return Err(GraphError::DuplicateRoute(from));
        }
        self.rules.insert(from, rule);
        Ok(self)
    }

    /// Validate structure and produce an executable graph
    ///
    /// # Errors
    /// Any [`GraphError`] describing the first structural problem found.
    pub fn compile(self) -> Result<CompiledGraph<S>, GraphError> {
        for (from, rule) in &self.rules {
            if !self.stages.contains_key(from) {
                return Err(GraphError::UnknownStage {
                    stage: from.clone(),
                    referenced_by: "an outgoing rule".to_string(),
                });
            }
            for target in rule.targets() {
                if let RouteTarget::Stage(to) = target {
                    if !self.stages.contains_key(to) {
                        return Err(GraphError::UnknownStage {
                            stage: to.clone(),
                            referenced_by: format!("the rule of '{from}'"),
                        });
                    }
                }
            }
            if let Rule::Conditional(route) = rule {
                if let Some(label) = route.unmapped.first() {
                    return Err(GraphError::UnmappedLabel {
                        stage: from.clone(),
                        label: label.clone(),
                    });
                }
            }
        }

        let structure = self.structure();
        let entry = match self.entry.clone() {
            Some(entry) if self.stages.contains_key(&entry) => entry,
            Some(entry) => {
                return Err(GraphError::UnknownStage {
                    stage: entry,
                    referenced_by: "the entry".to_string(),
                })
            }
            None => {
                let candidates: Vec<String> = self
                    .stages
                    .keys()
                    .filter(|name| {
                        structure
                            .neighbors_directed(name.as_str(), Direction::Incoming)
                            .next()
                            .is_none()
                    })
                    .cloned()
                    .collect();
                match candidates.len() {
                    0 => return Err(GraphError::NoEntry),
                    1 => candidates.into_iter().next().ok_or(GraphError::NoEntry)?,
                    _ => return Err(GraphError::AmbiguousEntry(candidates)),
                }
            }
        };

        let start = structure
            .nodes()
            .find(|n| *n == entry)
            .ok_or(GraphError::NoEntry)?;
        let mut reached = Vec::new();
        let mut dfs = Dfs::new(&structure, start);
        while let Some(node) = dfs.next(&structure) {
            reached.push(node);
        }
        for name in self.stages.keys() {
            if !reached.contains(&name.as_str()) {
                tracing::warn!(stage = %name, entry = %entry, "stage is unreachable from entry");
            }
        }

        tracing::debug!(
            stages = self.stages.len(),
            rules = self.rules.len(),
            entry = %entry,
            "compiled stage graph"
        );

        Ok(CompiledGraph::new(self.stages, self.rules.into_iter().collect(), entry))
    }

    fn structure(&self) -> DiGraphMap<&str, ()> {
        let mut graph = DiGraphMap::new();
        for name in self.stages.keys() {
            graph.add_node(name.as_str());
        }
        for (from, rule) in &self.rules {
            for target in rule.targets() {
                if let RouteTarget::Stage(to) = target {
                    graph.add_edge(from.as_str(), to.as_str(), ());
                }
            }
        }
        graph
    }
}
