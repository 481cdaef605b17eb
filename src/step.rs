//! Study step templates.
//!
//! A [`StudyStep`] is the value record describing one workflow step before
//! environment and parameter substitution: a name, a description, and the
//! [`RunSpec`] holding its command text, hooks, dependencies, and resource
//! request. Substitution never edits a step in place; it always produces a
//! new instance so equality against the original can report whether anything
//! actually changed.

use serde::{Deserialize, Serialize};

use crate::parameters::Combination;

/// How a step runs: command text, hooks, dependencies, and resources.
///
/// Every string field is templated and subject to environment, parameter,
/// and workspace-reference substitution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSpec {
    /// Command to execute.
    pub cmd: String,
    /// Names of steps this step depends on.
    pub depends: Vec<String>,
    /// Pre-execution hook.
    pub pre: String,
    /// Post-execution hook.
    pub post: String,
    /// Restart command, if the step can be resumed after failure.
    pub restart: String,
    /// Requested node count.
    pub nodes: String,
    /// Requested process count.
    pub procs: String,
    /// Requested walltime.
    pub walltime: String,
}

/// A single workflow step template.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyStep {
    /// Step name, unique within a study.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// The step's run specification.
    pub run: RunSpec,
}

impl StudyStep {
    /// Create a step with the given name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            run: RunSpec::default(),
        }
    }

    /// Apply a transformation to every templated field, producing a new step.
    ///
    /// This is the single substitution visitor over the fixed schema; the
    /// environment pass, the parameter pass, and workspace resolution all go
    /// through it.
    pub fn map_fields<F>(&self, f: F) -> StudyStep
    where
        F: Fn(&str) -> String,
    {
        StudyStep {
            name: f(&self.name),
            description: f(&self.description),
            run: RunSpec {
                cmd: f(&self.run.cmd),
                depends: self.run.depends.iter().map(|d| f(d)).collect(),
                pre: f(&self.run.pre),
                post: f(&self.run.post),
                restart: f(&self.run.restart),
                nodes: f(&self.run.nodes),
                procs: f(&self.run.procs),
                walltime: f(&self.run.walltime),
            },
        }
    }

    /// Apply a parameter combination to the step.
    ///
    /// Returns whether the combination changed anything, along with the new
    /// step. The receiver is never mutated; callers use the flag to detect
    /// whether a combination affects this step at all.
    pub fn apply_parameters(&self, combo: &Combination) -> (bool, StudyStep) {
        let applied = self.map_fields(|field| combo.apply(field));
        let changed = applied != *self;
        (changed, applied)
    }

    /// Iterate over every templated field value for token scanning.
    pub fn templated_fields(&self) -> impl Iterator<Item = &str> {
        [
            self.name.as_str(),
            self.description.as_str(),
            self.run.cmd.as_str(),
            self.run.pre.as_str(),
            self.run.post.as_str(),
            self.run.restart.as_str(),
            self.run.nodes.as_str(),
            self.run.procs.as_str(),
            self.run.walltime.as_str(),
        ]
        .into_iter()
        .chain(self.run.depends.iter().map(String::as_str))
    }
}
