//! wgpu implementation of [`ExecutionBackend`].
//!
//! - `device`: adapter and device request
//! - `resources`: storage, staging, uniform and placeholder buffers
//! - `pipelines`: the shared bind-group layout, one compute pipeline and bind group per shader
//! - `readback`: staging-buffer mapping and completion polling

pub mod device;
pub mod pipelines;
pub mod readback;
pub mod resources;

pub use device::GpuDevice;

use tracing::{debug, info, warn};

use crate::binding::BindingLimits;
use crate::compiler::CompileOutput;
use crate::config::StudioConfig;
use crate::error::RuntimeError;
use crate::exec::{Dispatch, ExecutionBackend, PreparedBuffer, ReadbackStatus, SystemUniforms};
use pipelines::PipelineSet;
use readback::PendingReadback;
use resources::{GpuResources, check_buffer_sizes};

pub struct GpuBackend {
    gpu: GpuDevice,
    limits: BindingLimits,
    pipelines: Option<PipelineSet>,
    resources: Option<GpuResources>,
    readback: Option<PendingReadback>,
}

impl GpuBackend {
    pub fn open(config: &StudioConfig) -> Result<Self, RuntimeError> {
        let gpu = GpuDevice::open(config.power_preference)?;
        let limits = gpu.binding_limits();
        info!(
            target: "forge::gpu",
            max_bindings = limits.max_bindings_per_bind_group,
            max_storage = limits.max_storage_buffers_per_shader_stage,
            "device opened"
        );
        Ok(Self {
            gpu,
            limits,
            pipelines: None,
            resources: None,
            readback: None,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.gpu.info
    }

    fn destroy_resources(&mut self) {
        self.readback = None;
        if let Some(pipelines) = self.pipelines.as_mut() {
            pipelines.unbind();
        }
        if let Some(resources) = self.resources.take() {
            resources.destroy();
        }
    }
}

impl ExecutionBackend for GpuBackend {
    fn limits(&self) -> BindingLimits {
        self.limits
    }

    fn compile(&mut self, output: &CompileOutput) -> Result<(), RuntimeError> {
        self.destroy_resources();
        self.pipelines = None;
        self.pipelines = Some(PipelineSet::build(&self.gpu.device, output)?);
        Ok(())
    }

    fn prepare(&mut self, buffers: &[PreparedBuffer]) -> Result<(), RuntimeError> {
        self.destroy_resources();
        let Some(pipelines) = self.pipelines.as_mut() else {
            return Err(RuntimeError::NotCompiled);
        };
        let device = &self.gpu.device;
        check_buffer_sizes(buffers, &device.limits())?;

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let resources = GpuResources::create(device, buffers, pipelines.plan().slot_count);
        let bound = pipelines.bind(device, &resources);
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            warn!(target: "forge::gpu", error = %err, "buffer creation failed");
            pipelines.unbind();
            resources.destroy();
            return Err(RuntimeError::ResourceCreation(err.to_string()));
        }
        if let Err(err) = bound {
            pipelines.unbind();
            resources.destroy();
            return Err(err);
        }
        self.resources = Some(resources);
        debug!(target: "forge::gpu", buffers = buffers.len(), "resources uploaded");
        Ok(())
    }

    fn write_uniforms(&mut self, uniforms: &SystemUniforms) -> Result<(), RuntimeError> {
        let resources = self.resources.as_ref().ok_or(RuntimeError::NotCompiled)?;
        resources.write_uniforms(&self.gpu.queue, uniforms);
        Ok(())
    }

    fn submit(&mut self, dispatches: &[Dispatch], readback: bool) -> Result<(), RuntimeError> {
        let (Some(pipelines), Some(resources)) = (self.pipelines.as_ref(), self.resources.as_ref()) else {
            return Err(RuntimeError::NotCompiled);
        };

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("forge.step"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("forge.step.pass"),
                timestamp_writes: None,
            });
            for dispatch in dispatches {
                let (pipeline, bind_group) =
                    pipelines
                        .pipeline(&dispatch.shader_id)
                        .ok_or_else(|| RuntimeError::MissingPipeline {
                            shader: dispatch.shader_id.clone(),
                        })?;
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                let groups = dispatch.workgroups;
                pass.dispatch_workgroups(groups.x, groups.y, groups.z);
            }
        }
        if readback {
            for storage in resources.storage_buffers() {
                encoder.copy_buffer_to_buffer(&storage.buffer, 0, &storage.staging, 0, storage.size);
            }
        }
        self.gpu.queue.submit(Some(encoder.finish()));

        if readback {
            self.readback = Some(PendingReadback::start(resources));
        }
        Ok(())
    }

    fn poll_readback(&mut self, wait: bool) -> ReadbackStatus {
        let status = match (self.readback.as_mut(), self.resources.as_ref()) {
            (Some(pending), Some(resources)) => pending.poll(&self.gpu.device, resources, wait),
            _ => ReadbackStatus::Idle,
        };
        if !matches!(status, ReadbackStatus::Pending) {
            self.readback = None;
        }
        status
    }

    fn release(&mut self) {
        self.destroy_resources();
        self.pipelines = None;
        debug!(target: "forge::gpu", "GPU state released");
    }
}
