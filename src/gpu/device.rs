use tracing::info;

use crate::binding::BindingLimits;
use crate::config::PowerPreference;
use crate::error::RuntimeError;

/// An open adapter, device and queue.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: wgpu::AdapterInfo,
}

impl GpuDevice {
    /// Request an adapter and a device with the adapter's full limits.
    pub fn open(preference: PowerPreference) -> Result<Self, RuntimeError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power_preference = match preference {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RuntimeError::NoAdapter(e.to_string()))?;

        let info = adapter.get_info();
        info!(
            target: "forge::gpu",
            "adapter: {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("compute-forge"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
            experimental_features: wgpu::ExperimentalFeatures::default(),
        }))
        .map_err(|e| RuntimeError::DeviceRequest(e.to_string()))?;

        Ok(Self { device, queue, info })
    }

    pub fn binding_limits(&self) -> BindingLimits {
        let limits = self.device.limits();
        BindingLimits {
            max_bindings_per_bind_group: limits.max_bindings_per_bind_group,
            max_storage_buffers_per_shader_stage: limits.max_storage_buffers_per_shader_stage,
        }
    }
}
