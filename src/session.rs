//! The editing session: owner of every buffer, shader, library, parameter and pipeline item.
//!
//! All mutation goes through methods here. Anything that changes what the GPU side needs
//! sets the dirty flag; the orchestrator rebuilds its resources on the next step instead of
//! touching live bind groups. Program edits leave the flag alone: the dispatch list is
//! rebuilt from the program on every step.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::binding::normalize_buffer_ids;
use crate::error::{EntityKind, StructuralError, StudioResult};
use crate::ident::{collapse_whitespace, name_taken, next_default_name, sanitize_entry_name, unique_name};
use crate::model::{
    Buffer, Extent3, ExtentExpr, FillMode, Function, Parameter, PipelineItem, ScalarData, ScalarType, Shader,
    Step, check_buffer_size, new_id,
};
use crate::params::{ParamErrorKind, ParamEvaluation, evaluate_parameters};
use crate::program;
use crate::wgsl::rewrite::sync_entry_name;
use crate::wgsl::templates::{build_default_library_wgsl, build_default_shader_wgsl};

pub const DEFAULT_DISPATCH: Extent3 = Extent3::new(8, 4, 1);
pub const DEFAULT_LOOP_REPEAT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Form data for a new buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDraft {
    pub name: Option<String>,
    pub scalar_type: ScalarType,
    pub fill: FillMode,
    pub size: Extent3,
}

impl Default for BufferDraft {
    fn default() -> Self {
        Self {
            name: None,
            scalar_type: ScalarType::Int,
            fill: FillMode::Empty,
            size: Extent3::new(64, 32, 1),
        }
    }
}

/// Partial buffer edit; `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferUpdate {
    pub name: Option<String>,
    pub scalar_type: Option<ScalarType>,
    pub fill: Option<FillMode>,
    pub size: Option<Extent3>,
    pub size_expr: Option<Option<ExtentExpr>>,
}

/// A size or dispatch expression that failed to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprFailure {
    pub kind: EntityKind,
    pub id: String,
    pub axis: char,
    pub error: ParamErrorKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterReport {
    pub evaluation: ParamEvaluation,
    pub failures: Vec<ExprFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    buffers: Vec<Buffer>,
    shaders: Vec<Shader>,
    functions: Vec<Function>,
    parameters: Vec<Parameter>,
    program: Vec<PipelineItem>,
    pipeline_shader_choice_id: Option<String>,
    dirty: bool,
    /// Buffers whose CPU values were replaced since the flag was last taken.
    replaced: HashSet<String>,
}

fn unknown(kind: EntityKind, id: &str) -> StructuralError {
    StructuralError::UnknownEntity {
        kind,
        id: id.to_string(),
    }
}

fn move_within<T>(items: &mut [T], index: usize, direction: MoveDirection) -> bool {
    let target = match direction {
        MoveDirection::Up => index.checked_sub(1),
        MoveDirection::Down => (index + 1 < items.len()).then_some(index + 1),
    };
    match target {
        Some(target) => {
            items.swap(index, target);
            true
        }
        None => false,
    }
}

impl Session {
    /// Empty session, nothing seeded.
    pub fn new() -> Self {
        Self {
            dirty: true,
            ..Default::default()
        }
    }

    /// A new project: one buffer, one shader, one library and one step.
    pub fn seeded() -> Self {
        let mut session = Self::new();
        let shader_id = session.add_shader(None).id.clone();
        session.pipeline_shader_choice_id = Some(shader_id.clone());
        session.program.push(PipelineItem::Step(Step::new(
            "Pipeline 1",
            Some(shader_id),
            DEFAULT_DISPATCH,
        )));
        session.add_function(None);
        session.buffers.push(Buffer::new(
            "texture1",
            ScalarType::Int,
            FillMode::Random,
            Extent3::new(64, 32, 1),
        ));
        session
    }

    pub(crate) fn from_parts(
        buffers: Vec<Buffer>,
        shaders: Vec<Shader>,
        functions: Vec<Function>,
        parameters: Vec<Parameter>,
        program: Vec<PipelineItem>,
        pipeline_shader_choice_id: Option<String>,
    ) -> Self {
        Self {
            buffers,
            shaders,
            functions,
            parameters,
            program,
            pipeline_shader_choice_id,
            dirty: true,
            replaced: HashSet::new(),
        }
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn shaders(&self) -> &[Shader] {
        &self.shaders
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn program(&self) -> &[PipelineItem] {
        &self.program
    }

    pub fn pipeline_shader_choice_id(&self) -> Option<&str> {
        self.pipeline_shader_choice_id.as_deref()
    }

    pub fn buffer(&self, id: &str) -> Option<&Buffer> {
        self.buffers.iter().find(|b| b.id == id)
    }

    pub fn shader(&self, id: &str) -> Option<&Shader> {
        self.shaders.iter().find(|s| s.id == id)
    }

    pub fn function(&self, id: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Read and clear the dirty flag, forgetting which buffers were replaced.
    pub fn take_dirty(&mut self) -> bool {
        self.replaced.clear();
        std::mem::replace(&mut self.dirty, false)
    }

    /// `true` when the buffer's values were edited, regenerated or reshaped since the dirty
    /// flag was last taken. GPU contents read back for it are older than the session's.
    pub fn values_replaced(&self, id: &str) -> bool {
        self.replaced.contains(id)
    }

    fn buffer_index(&self, id: &str) -> StudioResult<usize> {
        self.buffers
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| unknown(EntityKind::Buffer, id).into())
    }

    fn shader_index(&self, id: &str) -> StudioResult<usize> {
        self.shaders
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| unknown(EntityKind::Shader, id).into())
    }

    fn function_index(&self, id: &str) -> StudioResult<usize> {
        self.functions
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| unknown(EntityKind::Function, id).into())
    }

    fn parameter_index(&self, id: &str) -> StudioResult<usize> {
        self.parameters
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| unknown(EntityKind::Parameter, id).into())
    }

    fn item_index(&self, id: &str) -> StudioResult<usize> {
        self.program
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| unknown(EntityKind::PipelineItem, id).into())
    }

    fn step_mut(&mut self, id: &str) -> StudioResult<&mut Step> {
        match self.program.iter_mut().find(|p| p.id() == id) {
            Some(PipelineItem::Step(step)) => Ok(step),
            _ => Err(unknown(EntityKind::PipelineItem, id).into()),
        }
    }

    // Buffers

    pub fn add_buffer(&mut self, draft: BufferDraft) -> StudioResult<&Buffer> {
        let names: Vec<&str> = self.buffers.iter().map(|b| b.name.as_str()).collect();
        let requested = draft.name.as_deref().map(collapse_whitespace).unwrap_or_default();
        let name = if requested.is_empty() {
            next_default_name("texture", names.iter().copied())
        } else {
            unique_name(&requested, names.iter().copied())
        };
        check_buffer_size(&name, draft.size)?;
        let buffer = Buffer::new(name, draft.scalar_type, draft.fill, draft.size);
        debug!(target: "forge::session", buffer = %buffer.name, "buffer added");
        self.replaced.insert(buffer.id.clone());
        self.buffers.push(buffer);
        self.dirty = true;
        let last = self.buffers.len() - 1;
        Ok(&self.buffers[last])
    }

    pub fn update_buffer(&mut self, id: &str, update: BufferUpdate) -> StudioResult<()> {
        let index = self.buffer_index(id)?;
        if let Some(size) = update.size {
            check_buffer_size(&self.buffers[index].name, size)?;
        }

        if let Some(name) = update.name.as_deref() {
            let name = collapse_whitespace(name);
            if name.is_empty() {
                return Err(StructuralError::EmptyName {
                    kind: EntityKind::Buffer,
                }
                .into());
            }
            let others = self.buffers.iter().filter(|b| b.id != id).map(|b| b.name.as_str());
            if name_taken(&name, others) {
                return Err(StructuralError::DuplicateName {
                    kind: EntityKind::Buffer,
                    name,
                }
                .into());
            }
            self.buffers[index].name = name;
        }

        let buffer = &mut self.buffers[index];
        if let Some(expr) = update.size_expr {
            buffer.size_expr = expr;
        }
        let resized = update.size.is_some_and(|s| s.clamped() != buffer.size);
        if let Some(size) = update.size {
            buffer.size = size.clamped();
        }
        let refilled = update.fill.is_some_and(|f| f != buffer.fill);
        if let Some(fill) = update.fill {
            buffer.fill = fill;
        }
        let retyped = update.scalar_type.is_some_and(|ty| ty != buffer.scalar_type);
        if resized || refilled || (buffer.fill == FillMode::Random && update.scalar_type.is_some()) {
            if let Some(ty) = update.scalar_type {
                buffer.scalar_type = ty;
            }
            buffer.regenerate();
            self.replaced.insert(id.to_string());
        } else if let Some(ty) = update.scalar_type {
            buffer.set_scalar_type(ty);
        }
        if retyped {
            self.replaced.insert(id.to_string());
        }
        self.dirty = true;
        Ok(())
    }

    pub fn regenerate_buffer(&mut self, id: &str) -> StudioResult<()> {
        let index = self.buffer_index(id)?;
        self.buffers[index].regenerate();
        self.replaced.insert(id.to_string());
        self.dirty = true;
        Ok(())
    }

    /// Replace a buffer's contents with data read back from the GPU.
    ///
    /// Does not mark the session dirty: the GPU copy is already current.
    pub fn apply_readback(&mut self, id: &str, values: ScalarData) -> StudioResult<()> {
        let index = self.buffer_index(id)?;
        self.buffers[index].set_values(values);
        Ok(())
    }

    pub fn remove_buffer(&mut self, id: &str) -> StudioResult<Buffer> {
        let index = self.buffer_index(id)?;
        let removed = self.buffers.remove(index);
        for shader in &mut self.shaders {
            shader.buffer_ids.retain(|b| b != id);
        }
        info!(target: "forge::session", buffer = %removed.name, "buffer removed");
        self.dirty = true;
        Ok(removed)
    }

    pub fn move_buffer(&mut self, id: &str, direction: MoveDirection) -> StudioResult<bool> {
        let index = self.buffer_index(id)?;
        let moved = move_within(&mut self.buffers, index, direction);
        self.dirty |= moved;
        Ok(moved)
    }

    // Shaders

    pub fn add_shader(&mut self, name: Option<&str>) -> &Shader {
        let names: Vec<&str> = self.shaders.iter().map(|s| s.name.as_str()).collect();
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => unique_name(n, names.iter().copied()),
            None => next_default_name("Compute", names.iter().copied()),
        };
        let entry = sanitize_entry_name(&name);
        let shader = Shader {
            id: new_id(),
            code: build_default_shader_wgsl(&entry),
            name,
            buffer_ids: Vec::new(),
        };
        debug!(target: "forge::session", shader = %shader.name, "shader added");
        self.shaders.push(shader);
        self.dirty = true;
        let last = self.shaders.len() - 1;
        &self.shaders[last]
    }

    pub fn duplicate_shader(&mut self, id: &str) -> StudioResult<&Shader> {
        let index = self.shader_index(id)?;
        let source = self.shaders[index].clone();
        let name = unique_name(
            &format!("{} copy", source.name),
            self.shaders.iter().map(|s| s.name.as_str()),
        );
        let copy = Shader {
            id: new_id(),
            code: sync_entry_name(&source.code, &sanitize_entry_name(&name)),
            name,
            buffer_ids: source.buffer_ids,
        };
        self.shaders.insert(index + 1, copy);
        self.dirty = true;
        Ok(&self.shaders[index + 1])
    }

    /// Rename a shader and its entry point. Case-insensitive duplicates are rejected.
    pub fn rename_shader(&mut self, id: &str, name: &str) -> StudioResult<()> {
        let index = self.shader_index(id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StructuralError::EmptyName {
                kind: EntityKind::Shader,
            }
            .into());
        }
        let others = self.shaders.iter().filter(|s| s.id != id).map(|s| s.name.as_str());
        if name_taken(name, others) {
            return Err(StructuralError::DuplicateName {
                kind: EntityKind::Shader,
                name: name.to_string(),
            }
            .into());
        }
        let shader = &mut self.shaders[index];
        shader.name = name.to_string();
        shader.code = sync_entry_name(&shader.code, &sanitize_entry_name(name));
        self.dirty = true;
        Ok(())
    }

    pub fn set_shader_code(&mut self, id: &str, code: impl Into<String>) -> StudioResult<()> {
        let index = self.shader_index(id)?;
        self.shaders[index].code = code.into();
        self.dirty = true;
        Ok(())
    }

    /// Set the ordered buffer selection. Unknown and repeated ids are dropped.
    pub fn set_shader_buffers(&mut self, id: &str, buffer_ids: Vec<String>) -> StudioResult<()> {
        let index = self.shader_index(id)?;
        let mut kept: Vec<String> = Vec::with_capacity(buffer_ids.len());
        for buffer_id in buffer_ids {
            if self.buffer(&buffer_id).is_some() && !kept.contains(&buffer_id) {
                kept.push(buffer_id);
            }
        }
        self.shaders[index].buffer_ids = kept;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_shader(&mut self, id: &str) -> StudioResult<Shader> {
        let index = self.shader_index(id)?;
        let removed = self.shaders.remove(index);
        if self.pipeline_shader_choice_id.as_deref() == Some(id) {
            self.pipeline_shader_choice_id = self.shaders.first().map(|s| s.id.clone());
        }
        info!(target: "forge::session", shader = %removed.name, "shader removed");
        self.dirty = true;
        Ok(removed)
    }

    pub fn move_shader(&mut self, id: &str, direction: MoveDirection) -> StudioResult<bool> {
        let index = self.shader_index(id)?;
        let moved = move_within(&mut self.shaders, index, direction);
        self.dirty |= moved;
        Ok(moved)
    }

    // Function libraries

    pub fn add_function(&mut self, name: Option<&str>) -> &Function {
        let names: Vec<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => unique_name(n, names.iter().copied()),
            None => format!("Library {}", self.functions.len() + 1),
        };
        self.functions.push(Function {
            id: new_id(),
            name,
            code: build_default_library_wgsl(),
        });
        self.dirty = true;
        let last = self.functions.len() - 1;
        &self.functions[last]
    }

    pub fn duplicate_function(&mut self, id: &str) -> StudioResult<&Function> {
        let index = self.function_index(id)?;
        let source = &self.functions[index];
        let copy = Function {
            id: new_id(),
            name: unique_name(
                &format!("{} copy", source.name),
                self.functions.iter().map(|f| f.name.as_str()),
            ),
            code: source.code.clone(),
        };
        self.functions.insert(index + 1, copy);
        self.dirty = true;
        Ok(&self.functions[index + 1])
    }

    pub fn rename_function(&mut self, id: &str, name: &str) -> StudioResult<()> {
        let index = self.function_index(id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StructuralError::EmptyName {
                kind: EntityKind::Function,
            }
            .into());
        }
        self.functions[index].name = name.to_string();
        Ok(())
    }

    pub fn set_function_code(&mut self, id: &str, code: impl Into<String>) -> StudioResult<()> {
        let index = self.function_index(id)?;
        self.functions[index].code = code.into();
        self.dirty = true;
        Ok(())
    }

    pub fn remove_function(&mut self, id: &str) -> StudioResult<Function> {
        let index = self.function_index(id)?;
        self.dirty = true;
        Ok(self.functions.remove(index))
    }

    // Parameters

    pub fn add_parameter(&mut self, name: Option<&str>, expr: &str) -> &Parameter {
        let names: Vec<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => next_default_name("param", names.iter().copied()),
        };
        self.parameters.push(Parameter {
            id: new_id(),
            name,
            expr: expr.to_string(),
        });
        let last = self.parameters.len() - 1;
        &self.parameters[last]
    }

    pub fn update_parameter(&mut self, id: &str, name: Option<&str>, expr: Option<&str>) -> StudioResult<()> {
        let index = self.parameter_index(id)?;
        let param = &mut self.parameters[index];
        if let Some(name) = name {
            param.name = name.trim().to_string();
        }
        if let Some(expr) = expr {
            param.expr = expr.to_string();
        }
        Ok(())
    }

    pub fn remove_parameter(&mut self, id: &str) -> StudioResult<Parameter> {
        let index = self.parameter_index(id)?;
        Ok(self.parameters.remove(index))
    }

    pub fn evaluate_parameters(&self) -> ParamEvaluation {
        evaluate_parameters(&self.parameters)
    }

    /// Evaluate parameters, then every buffer size and step dispatch expression.
    ///
    /// Successful results are rounded up, clamped to at least 1 and written back. Failures
    /// leave the previous concrete value in place.
    pub fn apply_parameters(&mut self) -> ParameterReport {
        let evaluation = evaluate_parameters(&self.parameters);
        let mut failures = Vec::new();

        let resolve = |current: Extent3,
                       expr: &ExtentExpr,
                       kind: EntityKind,
                       id: &str,
                       failures: &mut Vec<ExprFailure>| {
            let mut next = current;
            for (axis, text) in expr.axes() {
                let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
                    continue;
                };
                match evaluation.evaluate(text) {
                    Ok(v) => {
                        let value = v.ceil().clamp(1.0, u32::MAX as f64) as u32;
                        match axis {
                            'x' => next.x = value,
                            'y' => next.y = value,
                            _ => next.z = value,
                        }
                    }
                    Err(error) => failures.push(ExprFailure {
                        kind,
                        id: id.to_string(),
                        axis,
                        error,
                    }),
                }
            }
            next
        };

        for buffer in &mut self.buffers {
            let Some(expr) = buffer.size_expr.as_ref() else {
                continue;
            };
            let size = resolve(buffer.size, expr, EntityKind::Buffer, &buffer.id, &mut failures);
            if size == buffer.size {
                continue;
            }
            if !size.fits_buffer() {
                let axis = if size.x >= size.y.max(size.z) {
                    'x'
                } else if size.y >= size.z {
                    'y'
                } else {
                    'z'
                };
                failures.push(ExprFailure {
                    kind: EntityKind::Buffer,
                    id: buffer.id.clone(),
                    axis,
                    error: ParamErrorKind::SizeTooLarge,
                });
                continue;
            }
            buffer.size = size;
            buffer.regenerate();
            self.replaced.insert(buffer.id.clone());
            self.dirty = true;
        }
        for item in &mut self.program {
            let PipelineItem::Step(step) = item else { continue };
            let Some(expr) = step.dispatch_expr.as_ref() else {
                continue;
            };
            step.dispatch = resolve(step.dispatch, expr, EntityKind::PipelineItem, &step.id, &mut failures);
        }

        ParameterReport { evaluation, failures }
    }

    // Program

    pub fn set_pipeline_shader_choice(&mut self, shader_id: &str) -> StudioResult<()> {
        self.shader_index(shader_id)?;
        self.pipeline_shader_choice_id = Some(shader_id.to_string());
        Ok(())
    }

    /// Append a step running `shader_id`, the pipeline shader choice, or the first shader.
    pub fn add_step(&mut self, shader_id: Option<&str>) -> StudioResult<&PipelineItem> {
        let shader_id = match shader_id {
            Some(id) => {
                self.shader_index(id)?;
                id.to_string()
            }
            None => self
                .pipeline_shader_choice_id
                .clone()
                .filter(|id| self.shader(id).is_some())
                .or_else(|| self.shaders.first().map(|s| s.id.clone()))
                .ok_or_else(|| unknown(EntityKind::Shader, ""))?,
        };
        let name = format!("Pipeline {}", self.program.len() + 1);
        self.program
            .push(PipelineItem::Step(Step::new(name, Some(shader_id), DEFAULT_DISPATCH)));
        let last = self.program.len() - 1;
        Ok(&self.program[last])
    }

    /// Insert a loop start at `at` (or the end). Rejected if it would leave a stray loop end.
    pub fn insert_loop_start(&mut self, at: Option<usize>, repeat: u32) -> StudioResult<&PipelineItem> {
        let at = at.unwrap_or(self.program.len()).min(self.program.len());
        self.program.insert(at, PipelineItem::loop_start(repeat));
        if let Err(err) = program::check_structure(&self.program, true) {
            self.program.remove(at);
            return Err(err.into());
        }
        Ok(&self.program[at])
    }

    /// Insert a loop end at `at` (or the end). Rejected without an open loop before it.
    pub fn insert_loop_end(&mut self, at: Option<usize>) -> StudioResult<&PipelineItem> {
        let at = at.unwrap_or(self.program.len()).min(self.program.len());
        self.program.insert(at, PipelineItem::loop_end());
        if let Err(err) = program::check_structure(&self.program, true) {
            self.program.remove(at);
            return Err(err.into());
        }
        Ok(&self.program[at])
    }

    pub fn remove_item(&mut self, id: &str) -> StudioResult<PipelineItem> {
        let index = self.item_index(id)?;
        Ok(self.program.remove(index))
    }

    pub fn move_item(&mut self, id: &str, direction: MoveDirection) -> StudioResult<bool> {
        let index = self.item_index(id)?;
        let target = match direction {
            MoveDirection::Up => index.checked_sub(1),
            MoveDirection::Down => (index + 1 < self.program.len()).then_some(index + 1),
        };
        let Some(target) = target else {
            return Ok(false);
        };
        if !program::can_move(&self.program, index, target) {
            let mut candidate = self.program.clone();
            candidate.swap(index, target);
            return Err(program::check_structure(&candidate, true)
                .err()
                .unwrap_or(StructuralError::UnmatchedLoopEnd { index: target })
                .into());
        }
        self.program.swap(index, target);
        Ok(true)
    }

    pub fn set_step_active(&mut self, id: &str, activated: bool) -> StudioResult<()> {
        self.step_mut(id)?.activated = activated;
        Ok(())
    }

    pub fn set_step_dispatch(&mut self, id: &str, dispatch: Extent3) -> StudioResult<()> {
        self.step_mut(id)?.dispatch = dispatch.clamped();
        Ok(())
    }

    pub fn set_step_dispatch_expr(&mut self, id: &str, expr: Option<ExtentExpr>) -> StudioResult<()> {
        self.step_mut(id)?.dispatch_expr = expr;
        Ok(())
    }

    pub fn set_step_shader(&mut self, id: &str, shader_id: &str) -> StudioResult<()> {
        self.shader_index(shader_id)?;
        self.step_mut(id)?.shader_id = Some(shader_id.to_string());
        Ok(())
    }

    pub fn set_loop_repeat(&mut self, id: &str, repeat: u32) -> StudioResult<()> {
        match self.program.iter_mut().find(|p| p.id() == id) {
            Some(PipelineItem::LoopStart(start)) => {
                start.repeat = repeat.max(1);
                Ok(())
            }
            _ => Err(unknown(EntityKind::PipelineItem, id).into()),
        }
    }

    /// Prune dangling or repeated shader buffer ids, cap them at `slot_count`, and default
    /// empty selections to the first buffers.
    pub fn normalize(&mut self, slot_count: usize) {
        let mut changed = false;
        for shader in &mut self.shaders {
            let normalized = normalize_buffer_ids(&shader.buffer_ids, &self.buffers, slot_count);
            if normalized != shader.buffer_ids {
                shader.buffer_ids = normalized;
                changed = true;
            }
        }
        if self
            .pipeline_shader_choice_id
            .as_deref()
            .is_none_or(|id| self.shaders.iter().all(|s| s.id != id))
        {
            self.pipeline_shader_choice_id = self.shaders.first().map(|s| s.id.clone());
        }
        self.dirty |= changed;
    }
}
