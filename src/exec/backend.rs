use crate::binding::BindingLimits;
use crate::compiler::CompileOutput;
use crate::error::RuntimeError;
use crate::exec::SystemUniforms;
use crate::model::{Buffer, Extent3, ScalarType};

/// Snapshot of one session buffer taken at `Preparing` time.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBuffer {
    pub id: String,
    pub scalar_type: ScalarType,
    pub len: usize,
    pub bytes: Vec<u8>,
}

impl PreparedBuffer {
    pub fn snapshot(buffer: &Buffer) -> Self {
        let mut bytes = if buffer.values.scalar_type() == buffer.scalar_type {
            buffer.values.as_bytes().to_vec()
        } else {
            buffer.values.converted(buffer.scalar_type).as_bytes().to_vec()
        };
        // byte_len is never zero; zero-sized storage bindings are invalid
        bytes.resize(buffer.byte_len() as usize, 0);
        Self {
            id: buffer.id.clone(),
            scalar_type: buffer.scalar_type,
            len: buffer.size.count(),
            bytes,
        }
    }
}

/// One `dispatchWorkgroups` call of the flattened program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub shader_id: String,
    pub workgroups: Extent3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadbackData {
    pub buffer_id: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadbackStatus {
    /// Nothing was requested since the last completion.
    Idle,
    Pending,
    Complete(Vec<ReadbackData>),
    Failed(RuntimeError),
}

/// Device side of the orchestrator.
///
/// The orchestrator owns exactly one backend and drives it through the step state machine;
/// implementations never see the session.
pub trait ExecutionBackend {
    fn limits(&self) -> BindingLimits;

    /// Build one pipeline per program over the shared layout. Replaces earlier pipelines.
    fn compile(&mut self, output: &CompileOutput) -> Result<(), RuntimeError>;

    /// (Re)create storage buffers from `buffers` and the bind group of every program.
    fn prepare(&mut self, buffers: &[PreparedBuffer]) -> Result<(), RuntimeError>;

    fn write_uniforms(&mut self, uniforms: &SystemUniforms) -> Result<(), RuntimeError>;

    /// Encode every dispatch in order into one compute pass and submit it. With `readback`,
    /// every storage buffer is copied out and mapped asynchronously.
    fn submit(&mut self, dispatches: &[Dispatch], readback: bool) -> Result<(), RuntimeError>;

    /// Completion of the mapping started by the last `submit`. Blocks when `wait` is set.
    fn poll_readback(&mut self, wait: bool) -> ReadbackStatus;

    /// Destroy buffers, uniforms, pipelines and any pending readback. The device stays open.
    fn release(&mut self);
}
