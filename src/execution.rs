//! The concrete execution plan produced by staging.
//!
//! An [`ExecutionGraph`] is what a study hands to the execution runtime: one
//! [`ExecutionNode`] per (step, reduced key) pair, each bound to a resolved
//! workspace and a restart budget, wired with dependency-correct edges. The
//! runtime's submission, monitoring, and retry-timing concerns live
//! downstream of this crate; only the budgets are recorded here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::graph::Dag;
use crate::step::StudyStep;

/// One instantiated, fully substituted step bound to a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionNode {
    /// The substituted step template.
    pub step: StudyStep,
    /// Directory the step executes in.
    pub workspace: PathBuf,
    /// How many times the step's restart command may be reissued; zero when
    /// the step declares no restart command.
    pub restart_limit: usize,
}

/// The expanded, dependency-correct plan for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionGraph {
    name: String,
    description: String,
    submission_attempts: usize,
    graph: Dag<Option<ExecutionNode>>,
}

impl ExecutionGraph {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the campaign's name and description metadata.
    pub fn add_description(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.name = name.into();
        self.description = description.into();
    }

    /// Record the submission-attempt budget for the execution runtime.
    pub fn set_submission_attempts(&mut self, attempts: usize) {
        self.submission_attempts = attempts;
    }

    /// Campaign name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Campaign description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Submission-attempt budget.
    pub fn submission_attempts(&self) -> usize {
        self.submission_attempts
    }

    /// Add a bare node (used for the plan's root).
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<()> {
        self.graph.add_node(name, None)
    }

    /// Add a concrete step node.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        step: StudyStep,
        workspace: PathBuf,
        restart_limit: usize,
    ) -> Result<()> {
        self.graph.add_node(
            name,
            Some(ExecutionNode {
                step,
                workspace,
                restart_limit,
            }),
        )
    }

    /// Add a dependency edge between two plan nodes.
    pub fn add_edge(&mut self, src: &str, dst: &str) -> Result<()> {
        self.graph.add_edge(src, dst)
    }

    /// Check if a node exists.
    pub fn contains(&self, name: &str) -> bool {
        self.graph.contains(name)
    }

    /// Look up a concrete step node; `None` for bare nodes and unknown names.
    pub fn step_node(&self, name: &str) -> Option<&ExecutionNode> {
        self.graph.get(name).and_then(Option::as_ref)
    }

    /// All node values keyed by name.
    pub fn nodes(&self) -> &BTreeMap<String, Option<ExecutionNode>> {
        self.graph.values()
    }

    /// All edges as (src, dst) pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph.edges()
    }

    /// Direct children of a node.
    pub fn children_of(&self, name: &str) -> &[String] {
        self.graph.children_of(name)
    }

    /// Direct parents of a node.
    pub fn parents_of(&self, name: &str) -> &[String] {
        self.graph.parents_of(name)
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Check if the plan has no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}
