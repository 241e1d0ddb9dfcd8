//! WGSL composition.
//!
//! - `compose`: builds one module from function, buffer, uniform and shader sections
//! - `rewrite`: line-preserving transforms on shader fragments
//! - `source_map`: composed line ranges back to fragments
//! - `validation`: static pre-checks and naga compilation
//! - `templates`: generated declarations and seed code

pub mod compose;
pub mod rewrite;
pub mod source_map;
pub mod templates;
pub mod validation;

pub use compose::{BindingBases, ComposeParts, ComposedModule, ShaderPart, buffer_identifiers, compose};
pub use source_map::{Segment, SegmentKind, SourceMap};
pub use validation::{compile_module, static_checks, static_diagnostics};
