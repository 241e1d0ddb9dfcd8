use wgpu::util::DeviceExt;

use crate::config::SYSTEM_UNIFORM_COUNT;
use crate::error::RuntimeError;
use crate::exec::{PreparedBuffer, SystemUniforms, UNIFORM_BUFFER_SIZE};

/// Size of a placeholder bound into an unused storage slot.
const PLACEHOLDER_SIZE: u64 = 16;

pub struct StorageBuffer {
    pub id: String,
    pub buffer: wgpu::Buffer,
    pub staging: wgpu::Buffer,
    pub size: u64,
}

/// Reject buffers the device cannot allocate or bind as a whole storage binding.
pub fn check_buffer_sizes(buffers: &[PreparedBuffer], limits: &wgpu::Limits) -> Result<(), RuntimeError> {
    let limit = limits
        .max_buffer_size
        .min(u64::from(limits.max_storage_buffer_binding_size));
    match buffers.iter().find(|b| b.bytes.len() as u64 > limit) {
        Some(prepared) => Err(RuntimeError::BufferTooLarge {
            buffer: prepared.id.clone(),
            bytes: prepared.bytes.len() as u64,
            limit,
        }),
        None => Ok(()),
    }
}

/// Every GPU buffer one prepared session needs.
pub struct GpuResources {
    storage: Vec<StorageBuffer>,
    uniforms: Vec<wgpu::Buffer>,
    placeholders: Vec<wgpu::Buffer>,
}

impl GpuResources {
    pub fn create(device: &wgpu::Device, buffers: &[PreparedBuffer], slot_count: u32) -> Self {
        let storage = buffers
            .iter()
            .map(|prepared| {
                let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("forge.storage.{}", prepared.id)),
                    contents: &prepared.bytes,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                });
                let size = prepared.bytes.len() as u64;
                let staging = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("forge.staging.{}", prepared.id)),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                StorageBuffer {
                    id: prepared.id.clone(),
                    buffer,
                    staging,
                    size,
                }
            })
            .collect();

        let uniforms = (0..SYSTEM_UNIFORM_COUNT)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("forge.uniform.{i}")),
                    size: UNIFORM_BUFFER_SIZE,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let placeholders = (0..slot_count)
            .map(|slot| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("forge.placeholder.{slot}")),
                    size: PLACEHOLDER_SIZE,
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })
            })
            .collect();

        Self {
            storage,
            uniforms,
            placeholders,
        }
    }

    pub fn storage(&self, id: &str) -> Option<&StorageBuffer> {
        self.storage.iter().find(|s| s.id == id)
    }

    pub fn storage_buffers(&self) -> &[StorageBuffer] {
        &self.storage
    }

    pub fn uniform(&self, index: usize) -> Option<&wgpu::Buffer> {
        self.uniforms.get(index)
    }

    pub fn placeholder(&self, slot: usize) -> Option<&wgpu::Buffer> {
        self.placeholders.get(slot)
    }

    pub fn write_uniforms(&self, queue: &wgpu::Queue, uniforms: &SystemUniforms) {
        for (index, buffer) in self.uniforms.iter().enumerate() {
            queue.write_buffer(buffer, 0, &uniforms.bytes(index));
        }
    }

    pub fn destroy(self) {
        for storage in self.storage {
            storage.buffer.destroy();
            storage.staging.destroy();
        }
        for buffer in self.uniforms.into_iter().chain(self.placeholders) {
            buffer.destroy();
        }
    }
}
