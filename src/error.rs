//! Error types for Cairn operations.
//!
//! This module defines [`CairnError`], the primary error type used throughout
//! the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Configuration errors (bad step wiring, bad token references) identify the
//!   offending step, parameter, or workspace name so the workflow spec can be
//!   corrected
//! - Setup errors (workspace creation, environment resolution) are reported as
//!   failure results rather than panics, letting the caller decide whether to
//!   abandon the campaign
//! - Use `anyhow::Error` (via `CairnError::Other`) for unexpected errors

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for Cairn operations.
#[derive(Debug, Error)]
pub enum CairnError {
    /// A step with this name already exists in the study.
    #[error("Duplicate step name: '{name}'")]
    DuplicateStep { name: String },

    /// A step's `depends` entry names a step that is not in the study.
    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// An edge endpoint does not exist in the graph.
    #[error("Unknown node: '{name}'")]
    UnknownNode { name: String },

    /// Adding this edge would make the graph cyclic.
    #[error("Edge '{src}' -> '{dst}' would create a cycle")]
    CircularDependency { src: String, dst: String },

    /// A step uses a parameter that no combination assigns.
    #[error("Step '{step}' references parameter '{parameter}' which is not assigned")]
    UndeclaredParameter { step: String, parameter: String },

    /// A declared parameter has an empty value list, so no combination can
    /// be built and every step would expand to zero nodes.
    #[error("Parameter '{parameter}' declares no values")]
    EmptyParameterValues { parameter: String },

    /// A workspace reference names a step that is not part of the study.
    #[error("Step '{step}' references workspace of unknown step '{reference}'")]
    UnknownWorkspace { step: String, reference: String },

    /// A workspace reference cannot be matched to a single concrete node.
    #[error("Workspace of step '{reference}' is ambiguous from step '{step}'")]
    AmbiguousWorkspace { step: String, reference: String },

    /// The study's output directory tree could not be created.
    #[error("Failed to create workspace at {}: {message}", path.display())]
    WorkspaceCreation { path: PathBuf, message: String },

    /// The study environment could not be resolved.
    #[error("Environment resolution failed: {message}")]
    EnvironmentResolution { message: String },

    /// `stage` was called before `setup` completed.
    #[error("Study '{study}' is not set up; run setup before staging")]
    StudyNotSetUp { study: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;
