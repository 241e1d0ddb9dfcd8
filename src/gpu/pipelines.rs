use std::borrow::Cow;
use std::collections::HashMap;

use tracing::debug;

use crate::binding::{LayoutPlan, ShaderBindings, SlotResource};
use crate::compiler::{CompileOutput, ShaderProgram};
use crate::error::RuntimeError;
use crate::gpu::resources::GpuResources;

struct ShaderPipeline {
    entry_point: String,
    pipeline: wgpu::ComputePipeline,
    bindings: ShaderBindings,
}

/// Compute pipelines over one shared bind-group layout, plus their bind groups once
/// resources exist.
pub struct PipelineSet {
    plan: LayoutPlan,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: HashMap<String, ShaderPipeline>,
    bind_groups: HashMap<String, wgpu::BindGroup>,
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entries for every uniform and every storage slot, used or not.
fn layout_entries(plan: &LayoutPlan) -> Vec<wgpu::BindGroupLayoutEntry> {
    plan.uniform_bindings()
        .map(|(binding, _)| buffer_entry(binding, wgpu::BufferBindingType::Uniform))
        .chain(
            plan.buffer_bindings()
                .map(|binding| buffer_entry(binding, wgpu::BufferBindingType::Storage { read_only: false })),
        )
        .collect()
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    program: &ShaderProgram,
) -> Result<wgpu::ComputePipeline, RuntimeError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&program.shader_name),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&program.module.code)),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&program.shader_name),
        layout: Some(layout),
        module: &module,
        entry_point: Some(&program.entry_point),
        compilation_options: Default::default(),
        cache: None,
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(RuntimeError::PipelineCreation {
            entry_point: program.entry_point.clone(),
            message: err.to_string(),
        }),
        None => Ok(pipeline),
    }
}

impl PipelineSet {
    pub fn build(device: &wgpu::Device, output: &CompileOutput) -> Result<Self, RuntimeError> {
        let plan = output.layout;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("forge.shared.layout"),
            entries: &layout_entries(&plan),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("forge.shared.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mut pipelines = HashMap::new();
        for program in &output.programs {
            let pipeline = create_pipeline(device, &pipeline_layout, program)?;
            debug!(target: "forge::gpu", shader = %program.shader_name, entry = %program.entry_point, "pipeline built");
            pipelines.insert(
                program.shader_id.clone(),
                ShaderPipeline {
                    entry_point: program.entry_point.clone(),
                    pipeline,
                    bindings: program.bindings.clone(),
                },
            );
        }

        Ok(Self {
            plan,
            bind_group_layout,
            pipelines,
            bind_groups: HashMap::new(),
        })
    }

    pub fn plan(&self) -> &LayoutPlan {
        &self.plan
    }

    /// Create one bind group per shader. Storage slots whose buffer no longer exists fall back
    /// to the slot's placeholder.
    pub fn bind(&mut self, device: &wgpu::Device, resources: &GpuResources) -> Result<(), RuntimeError> {
        let mut bind_groups = HashMap::with_capacity(self.pipelines.len());
        for (shader_id, shader) in &self.pipelines {
            let mut entries = Vec::with_capacity(shader.bindings.entries.len());
            for entry in &shader.bindings.entries {
                let slot = entry.binding.wrapping_sub(self.plan.buffer_offset) as usize;
                let buffer = match &entry.resource {
                    SlotResource::Uniform(_) => {
                        resources.uniform(entry.binding.wrapping_sub(self.plan.uniform_base) as usize)
                    }
                    SlotResource::Storage { buffer_id } => resources
                        .storage(buffer_id)
                        .map(|s| &s.buffer)
                        .or_else(|| resources.placeholder(slot)),
                    SlotResource::Placeholder => resources.placeholder(slot),
                };
                let buffer = buffer.ok_or_else(|| RuntimeError::PipelineCreation {
                    entry_point: shader.entry_point.clone(),
                    message: format!("no resource for binding {}", entry.binding),
                })?;
                entries.push(wgpu::BindGroupEntry {
                    binding: entry.binding,
                    resource: buffer.as_entire_binding(),
                });
            }
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("forge.bind_group.{}", shader.entry_point)),
                layout: &self.bind_group_layout,
                entries: &entries,
            });
            bind_groups.insert(shader_id.clone(), bind_group);
        }
        self.bind_groups = bind_groups;
        Ok(())
    }

    pub fn unbind(&mut self) {
        self.bind_groups.clear();
    }

    pub fn pipeline(&self, shader_id: &str) -> Option<(&wgpu::ComputePipeline, &wgpu::BindGroup)> {
        let pipeline = self.pipelines.get(shader_id)?;
        let bind_group = self.bind_groups.get(shader_id)?;
        Some((&pipeline.pipeline, bind_group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingLimits;
    use crate::config::StudioConfig;

    #[test]
    fn layout_declares_every_slot() {
        let plan = LayoutPlan::new(&StudioConfig::default(), &BindingLimits::default()).unwrap();
        let entries = layout_entries(&plan);
        assert_eq!(entries.len(), 6 + plan.slot_count as usize);
        assert_eq!(entries[0].binding, 8);
        assert_eq!(entries[6].binding, 14);
        assert!(matches!(
            entries[6].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                ..
            }
        ));
    }
}
