//! Cairn - dependency-correct planning of multi-step simulation campaigns.
//!
//! Cairn turns a user-authored abstract workflow (steps with commands,
//! resource requests, and dependencies) plus a set of experiment parameters
//! into a concrete execution plan: one node per distinct parameter
//! combination each step actually depends on, with isolated per-combination
//! workspaces and correctly fanned dependency edges, ready to be handed to
//! an execution runtime.
//!
//! # Modules
//!
//! - [`environment`] - Study variables and external dependencies
//! - [`error`] - Error types and result aliases
//! - [`execution`] - The concrete execution plan produced by staging
//! - [`graph`] - Generic cycle-rejecting DAG container
//! - [`parameters`] - Parameter declarations, combinations, reduced keys
//! - [`step`] - Step templates and field substitution
//! - [`study`] - Study construction, setup, and staging
//! - [`template`] - The `$(name)` token grammar
//!
//! # Example
//!
//! ```
//! use cairn::environment::{StudyEnvironment, Variable};
//! use cairn::parameters::ParameterSet;
//! use cairn::step::StudyStep;
//! use cairn::study::Study;
//!
//! let temp = tempfile::TempDir::new().unwrap();
//! let mut env = StudyEnvironment::new();
//! env.add_variable(Variable::new("OUTPUT_PATH", temp.path().display().to_string()));
//!
//! let mut params = ParameterSet::new();
//! params.add_parameter("TEMP", ["270", "300"]);
//!
//! let mut sim = StudyStep::new("sim", "Run at each temperature");
//! sim.run.cmd = "sim.exe --temp $(TEMP)".to_string();
//!
//! let mut study = Study::new("demo", "A demo campaign", env, params).unwrap();
//! study.add_step(sim).unwrap();
//! study.setup(1, 1).unwrap();
//!
//! let (_workspace, plan) = study.stage().unwrap();
//! // One concrete node per temperature, plus the plan's root.
//! assert_eq!(plan.len(), 3);
//! ```

pub mod environment;
pub mod error;
pub mod execution;
pub mod graph;
pub mod parameters;
pub mod step;
pub mod study;
pub mod template;

pub use error::{CairnError, Result};
pub use study::{Study, OUTPUT_PATH, SOURCE};
