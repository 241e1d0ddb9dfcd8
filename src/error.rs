//! Error taxonomy for composition, compilation and execution.
//!
//! Entity-local problems (a bad parameter expression, one shader failing to compile) are
//! reported as values next to the entity. The types here are for failures that stop a whole
//! operation.

use std::fmt;

use thiserror::Error;

use crate::diagnostics::Diagnostic;
use crate::model::{Extent3, MAX_BUFFER_ELEMENTS};

/// Which kind of session entity an error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Buffer,
    Shader,
    Function,
    Parameter,
    PipelineItem,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Buffer => "buffer",
            EntityKind::Shader => "shader",
            EntityKind::Function => "function",
            EntityKind::Parameter => "parameter",
            EntityKind::PipelineItem => "pipeline item",
        };
        f.write_str(s)
    }
}

/// Detected before any GPU work; the session is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("loop end at position {index} has no matching loop start")]
    UnmatchedLoopEnd { index: usize },

    #[error("{count} loop start(s) are never closed")]
    UnclosedLoop { count: usize },

    #[error("the pipeline has no steps")]
    EmptyProgram,

    #[error("step `{step}` does not reference an existing shader")]
    MissingShader { step: String },

    #[error("{kind} name `{name}` is already in use")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("{kind} name must not be empty")]
    EmptyName { kind: EntityKind },

    #[error("unknown {kind} `{id}`")]
    UnknownEntity { kind: EntityKind, id: String },

    #[error("buffer `{name}` of size {size} holds more than {} elements", MAX_BUFFER_ELEMENTS)]
    BufferTooLarge { name: String, size: Extent3 },
}

/// Cheap text checks run on composed WGSL before the shader compiler sees it. Reported as
/// [`Diagnostic`]s inside [`StudioError::StaticWgsl`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StaticWgslError {
    #[error("line {line}: function `{name}` is missing its parameter list, write `fn {name}()`")]
    MissingFnParentheses { line: usize, name: String },

    #[error("unbalanced braces in the composed WGSL ({balance:+})")]
    UnbalancedBraces { balance: i64 },
}

/// Device and execution failures. Logged; the current step is abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(String),

    #[error("failed to open a GPU device: {0}")]
    DeviceRequest(String),

    #[error("no GPU device is open")]
    NoDevice,

    #[error("nothing has been compiled yet")]
    NotCompiled,

    #[error("failed to create the compute pipeline for `{entry_point}`: {message}")]
    PipelineCreation { entry_point: String, message: String },

    #[error("no compiled pipeline for shader `{shader}`")]
    MissingPipeline { shader: String },

    #[error("buffer readback failed: {0}")]
    BufferMap(String),

    #[error("buffer `{buffer}` needs {bytes} bytes but the device allows {limit}")]
    BufferTooLarge { buffer: String, bytes: u64, limit: u64 },

    #[error("failed to create GPU buffers: {0}")]
    ResourceCreation(String),
}

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("static WGSL checks failed with {} error(s)", error_count(.diagnostics))]
    StaticWgsl { diagnostics: Vec<Diagnostic> },

    #[error("shader compilation failed with {} error(s)", error_count(.diagnostics))]
    Compile { diagnostics: Vec<Diagnostic> },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("project file error: {0}")]
    Project(String),
}

fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

impl StudioError {
    pub fn config(message: impl Into<String>) -> Self {
        StudioError::Config(message.into())
    }

    /// Diagnostics carried by a static-check or compile failure, empty otherwise.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            StudioError::StaticWgsl { diagnostics } | StudioError::Compile { diagnostics } => diagnostics,
            _ => &[],
        }
    }
}

pub type StudioResult<T> = Result<T, StudioError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;

    #[test]
    fn compile_error_counts_only_errors() {
        let err = StudioError::Compile {
            diagnostics: vec![
                Diagnostic::unattributed(Severity::Error, "a"),
                Diagnostic::unattributed(Severity::Warning, "b"),
                Diagnostic::unattributed(Severity::Error, "c"),
            ],
        };
        assert_eq!(err.to_string(), "shader compilation failed with 2 error(s)");
        assert_eq!(err.diagnostics().len(), 3);
    }

    #[test]
    fn structural_messages_name_the_entity() {
        let err = StructuralError::DuplicateName {
            kind: EntityKind::Buffer,
            name: "grid".into(),
        };
        assert_eq!(err.to_string(), "buffer name `grid` is already in use");
        let wrapped: StudioError = err.into();
        assert!(matches!(wrapped, StudioError::Structural(_)));
    }
}
