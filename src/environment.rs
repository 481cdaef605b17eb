//! Study environment: variables and external dependencies.
//!
//! A [`StudyEnvironment`] owns the named values shared by every step of a
//! campaign. Variables substitute `$(name)` tokens directly; dependencies
//! are filesystem artifacts (reference meshes, tabulated data, binaries)
//! that must exist before the study can run, and substitute as their path.
//!
//! Resolution is a blocking, idempotent call made once during study setup.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{CairnError, Result};
use crate::template;

/// A named value shared across the study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Name, referenced as `$(name)` in step fields.
    pub name: String,
    /// Substituted value.
    pub value: String,
}

impl Variable {
    /// Create a variable.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A filesystem artifact the campaign requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name, referenced as `$(name)` in step fields.
    pub name: String,
    /// Location of the artifact; must exist at resolution time.
    pub path: PathBuf,
}

impl Dependency {
    /// Create a dependency.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// The shared environment of a study.
#[derive(Debug, Clone, Default)]
pub struct StudyEnvironment {
    variables: BTreeMap<String, Variable>,
    dependencies: BTreeMap<String, Dependency>,
    resolved: bool,
}

impl StudyEnvironment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variable.
    pub fn add_variable(&mut self, variable: Variable) {
        self.variables.insert(variable.name.clone(), variable);
    }

    /// Add or replace a dependency.
    pub fn add_dependency(&mut self, dependency: Dependency) {
        self.dependencies.insert(dependency.name.clone(), dependency);
    }

    /// Look up a variable by name.
    pub fn find(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Overwrite the value of an existing variable, or create it.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.variables.get_mut(name) {
            Some(var) => var.value = value,
            None => self.add_variable(Variable::new(name, value)),
        }
    }

    /// Whether resolution has already completed.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Resolve the environment: verify every dependency artifact exists.
    ///
    /// Idempotent; a second call after success is a no-op. On failure the
    /// environment stays unresolved so the caller may fix the artifact and
    /// retry.
    pub fn resolve(&mut self) -> Result<()> {
        if self.resolved {
            debug!("environment already resolved");
            return Ok(());
        }

        for dependency in self.dependencies.values() {
            if !dependency.path.exists() {
                return Err(CairnError::EnvironmentResolution {
                    message: format!(
                        "dependency '{}' not found at {}",
                        dependency.name,
                        dependency.path.display()
                    ),
                });
            }
            debug!(
                name = %dependency.name,
                path = %dependency.path.display(),
                "dependency resolved"
            );
        }

        info!(
            variables = self.variables.len(),
            dependencies = self.dependencies.len(),
            "environment resolved"
        );
        self.resolved = true;
        Ok(())
    }

    /// Substitute environment tokens in a field.
    ///
    /// Variables take precedence over dependencies on a name clash; tokens
    /// the environment does not know (parameters, workspace references,
    /// shell syntax) are preserved.
    pub fn substitute(&self, field: &str) -> String {
        template::substitute(field, |name| {
            self.variables
                .get(name)
                .map(|v| v.value.clone())
                .or_else(|| {
                    self.dependencies
                        .get(name)
                        .map(|d| d.path.display().to_string())
                })
        })
    }
}
