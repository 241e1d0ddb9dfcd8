//! Compose WGSL compute programs from reusable fragments and run them step by step.
//!
//! A [`Session`] holds the editable buffers, shaders, function libraries, parameters and the
//! pipeline program. [`compiler::compile`] turns it into one executable module per shader;
//! the [`Orchestrator`] runs the flattened program on a [`GpuBackend`] and feeds buffer
//! contents back into the session.

pub mod binding;
pub mod compiler;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod gpu;
pub mod ident;
pub mod model;
pub mod params;
pub mod program;
pub mod project;
pub mod session;
pub mod wgsl;

pub use compiler::{CompileOutput, compile};
pub use config::StudioConfig;
pub use error::{StudioError, StudioResult};
pub use exec::{Orchestrator, RunMode, StepOutcome};
pub use gpu::GpuBackend;
pub use project::Project;
pub use session::Session;
