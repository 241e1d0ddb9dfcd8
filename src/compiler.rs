//! Compile requests: structural checks, combined module, then one module per shader.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::binding::{BindingLimits, LayoutPlan, ShaderBindings, resolve_buffers, resolve_shader_bindings};
use crate::config::StudioConfig;
use crate::diagnostics::{Diagnostic, Severity, has_errors};
use crate::error::{StructuralError, StudioError, StudioResult};
use crate::ident::sanitize_entry_name;
use crate::model::{PipelineItem, Shader};
use crate::program;
use crate::session::Session;
use crate::wgsl::compose::{BindingBases, ComposeParts, ComposedModule, ShaderPart, buffer_identifiers, compose};
use crate::wgsl::validation::{compile_module, compute_entry_points, resource_bindings, static_diagnostics};

/// Executable module for one shader.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    pub shader_id: String,
    pub shader_name: String,
    pub entry_point: String,
    pub module: ComposedModule,
    pub bindings: ShaderBindings,
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub layout: LayoutPlan,
    /// All functions, buffers and shaders in one module.
    pub combined: ComposedModule,
    pub programs: Vec<ShaderProgram>,
    /// Non-blocking diagnostics (warnings and notes).
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn program_for(&self, shader_id: &str) -> Option<&ShaderProgram> {
        self.programs.iter().find(|p| p.shader_id == shader_id)
    }
}

/// Which fragment a live check targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentRef<'a> {
    Shader(&'a str),
    Function(&'a str),
}

fn bases(layout: &LayoutPlan) -> BindingBases {
    BindingBases {
        uniform_base: layout.uniform_base,
        buffer_offset: layout.buffer_offset,
    }
}

fn check_program(session: &Session) -> Result<(), StructuralError> {
    let program = session.program();
    if !program.iter().any(|item| matches!(item, PipelineItem::Step(_))) {
        return Err(StructuralError::EmptyProgram);
    }
    program::check_structure(program, false)?;
    for item in program {
        let PipelineItem::Step(step) = item else { continue };
        let known = step
            .shader_id
            .as_deref()
            .is_some_and(|id| session.shader(id).is_some());
        if !known {
            return Err(StructuralError::MissingShader {
                step: step.name.clone(),
            });
        }
    }
    Ok(())
}

/// Shaders referenced by any step, active or not, in first-use order.
fn referenced_shaders(session: &Session) -> Vec<&Shader> {
    let mut seen = HashSet::new();
    session
        .program()
        .iter()
        .filter_map(PipelineItem::as_step)
        .filter_map(|step| step.shader_id.as_deref())
        .filter(|id| seen.insert(*id))
        .filter_map(|id| session.shader(id))
        .collect()
}

fn combined_parts<'a>(
    session: &'a Session,
    idents: &'a std::collections::HashMap<String, String>,
    slot_count: usize,
    shaders: Vec<&'a Shader>,
) -> ComposeParts<'a> {
    ComposeParts {
        functions: session.functions().iter().collect(),
        buffers: session.buffers().iter().collect(),
        shaders: shaders
            .into_iter()
            .map(|shader| ShaderPart {
                shader,
                primary: resolve_buffers(shader, session.buffers(), slot_count).first().copied(),
            })
            .collect(),
        idents,
    }
}

/// Locate the first line of `module` declaring `@binding(binding)`.
fn binding_location(module: &ComposedModule, binding: u32) -> Option<crate::diagnostics::SourceLocation> {
    let needle = format!("@binding({binding})");
    module
        .code
        .lines()
        .enumerate()
        .find(|(_, line)| line.replace(' ', "").contains(&needle))
        .and_then(|(idx, line)| {
            let column = line.find("@binding").map_or(1, |c| c + 1);
            module.source_map.resolve(idx + 1, column)
        })
}

/// Compile every shader the pipeline uses.
///
/// Structural errors, static-check errors and compiler errors each stop the request; the
/// session is never modified.
pub fn compile(session: &Session, config: &StudioConfig, limits: &BindingLimits) -> StudioResult<CompileOutput> {
    let layout = LayoutPlan::new(config, limits)?;
    let slot_count = layout.slot_count as usize;

    check_program(session)?;

    let idents = buffer_identifiers(session.buffers());
    let combined = compose(
        &combined_parts(session, &idents, slot_count, session.shaders().iter().collect()),
        bases(&layout),
    );

    let static_errors = static_diagnostics(&combined);
    if has_errors(&static_errors) {
        warn!(target: "forge::compile", count = static_errors.len(), "static checks failed");
        return Err(StudioError::StaticWgsl {
            diagnostics: static_errors,
        });
    }

    if let Err(diagnostics) = compile_module(&combined) {
        warn!(target: "forge::compile", count = diagnostics.len(), "combined module rejected");
        return Err(StudioError::Compile { diagnostics });
    }
    debug!(target: "forge::compile", lines = combined.line_count(), "combined module ok");

    let mut notes = Vec::new();
    if session.buffers().is_empty() {
        notes.push(Diagnostic::unattributed(
            Severity::Warning,
            "no buffers are declared; every storage slot is bound to a placeholder",
        ));
    }

    let referenced = referenced_shaders(session);
    for shader in session.shaders() {
        if !referenced.iter().any(|s| s.id == shader.id) {
            notes.push(Diagnostic::unattributed(
                Severity::Info,
                format!("shader `{}` is not used by any step", shader.name),
            ));
        }
    }

    let mut errors = Vec::new();
    let mut programs = Vec::with_capacity(referenced.len());
    for shader in referenced {
        let bindings = resolve_shader_bindings(&layout, shader, session.buffers());
        let buffers = resolve_buffers(shader, session.buffers(), slot_count);
        let parts = ComposeParts {
            functions: session.functions().iter().collect(),
            buffers: buffers.clone(),
            shaders: vec![ShaderPart {
                shader,
                primary: buffers.first().copied(),
            }],
            idents: &idents,
        };
        let module = compose(&parts, bases(&layout));

        let naga_module = match compile_module(&module) {
            Ok(m) => m,
            Err(diags) => {
                errors.extend(diags);
                continue;
            }
        };

        let entry_point = sanitize_entry_name(&shader.name);
        if !compute_entry_points(&naga_module).contains(&entry_point.as_str()) {
            let location = module.source_map.resolve(
                module
                    .source_map
                    .segment_for(&shader.id)
                    .map_or(0, |s| s.start_line),
                1,
            );
            errors.push(Diagnostic::error(
                format!("shader `{}` has no compute entry point named `{entry_point}`", shader.name),
                location,
            ));
            continue;
        }

        for (name, binding) in resource_bindings(&naga_module) {
            if !layout.contains(binding) {
                errors.push(Diagnostic::error(
                    format!(
                        "`{name}` uses binding {binding}, outside the shared layout; select a buffer for this shader instead"
                    ),
                    binding_location(&module, binding),
                ));
            }
        }

        programs.push(ShaderProgram {
            shader_id: shader.id.clone(),
            shader_name: shader.name.clone(),
            entry_point,
            module,
            bindings,
        });
    }

    if has_errors(&errors) {
        warn!(target: "forge::compile", count = errors.len(), "shader modules rejected");
        return Err(StudioError::Compile { diagnostics: errors });
    }

    info!(target: "forge::compile", shaders = programs.len(), "compilation ok");
    Ok(CompileOutput {
        layout,
        combined,
        programs,
        diagnostics: notes,
    })
}

/// Live diagnostics for one fragment, composed with every buffer and uniform declaration.
///
/// Shaders are composed together with the function libraries they may call. An empty result
/// means the fragment compiles.
pub fn compile_fragment(
    session: &Session,
    fragment: FragmentRef<'_>,
    config: &StudioConfig,
    limits: &BindingLimits,
) -> StudioResult<Vec<Diagnostic>> {
    let layout = LayoutPlan::new(config, limits)?;
    let idents = buffer_identifiers(session.buffers());

    let parts = match fragment {
        FragmentRef::Shader(id) => {
            let shader = session.shader(id).ok_or_else(|| StructuralError::UnknownEntity {
                kind: crate::error::EntityKind::Shader,
                id: id.to_string(),
            })?;
            combined_parts(session, &idents, layout.slot_count as usize, vec![shader])
        }
        FragmentRef::Function(id) => {
            let function = session.function(id).ok_or_else(|| StructuralError::UnknownEntity {
                kind: crate::error::EntityKind::Function,
                id: id.to_string(),
            })?;
            ComposeParts {
                functions: vec![function],
                buffers: session.buffers().iter().collect(),
                shaders: Vec::new(),
                idents: &idents,
            }
        }
    };
    let module = compose(&parts, bases(&layout));

    let static_errors = static_diagnostics(&module);
    if !static_errors.is_empty() {
        return Ok(static_errors);
    }
    Ok(compile_module(&module).err().unwrap_or_default())
}
