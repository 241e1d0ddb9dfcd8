use std::sync::mpsc::{self, Receiver, TryRecvError};

use crate::error::RuntimeError;
use crate::exec::{ReadbackData, ReadbackStatus};
use crate::gpu::resources::GpuResources;

struct PendingMap {
    buffer_id: String,
    receiver: Receiver<Result<(), wgpu::BufferAsyncError>>,
    result: Option<Result<(), String>>,
}

/// Staging-buffer mappings started after one submission. Complete only when every map is.
pub struct PendingReadback {
    maps: Vec<PendingMap>,
}

impl PendingReadback {
    /// Start mapping every staging buffer. Call after the copies were submitted.
    pub fn start(resources: &GpuResources) -> Self {
        let maps = resources
            .storage_buffers()
            .iter()
            .map(|storage| {
                let (tx, rx) = mpsc::channel();
                storage
                    .staging
                    .slice(0..storage.size)
                    .map_async(wgpu::MapMode::Read, move |result| {
                        let _ = tx.send(result);
                    });
                PendingMap {
                    buffer_id: storage.id.clone(),
                    receiver: rx,
                    result: None,
                }
            })
            .collect();
        Self { maps }
    }

    pub fn poll(&mut self, device: &wgpu::Device, resources: &GpuResources, wait: bool) -> ReadbackStatus {
        let poll_type = if wait {
            wgpu::PollType::wait_indefinitely()
        } else {
            wgpu::PollType::Poll
        };
        if let Err(err) = device.poll(poll_type) {
            return ReadbackStatus::Failed(RuntimeError::BufferMap(err.to_string()));
        }

        for map in self.maps.iter_mut().filter(|m| m.result.is_none()) {
            let received = if wait {
                map.receiver.recv().map_err(|_| TryRecvError::Disconnected)
            } else {
                map.receiver.try_recv()
            };
            match received {
                Ok(result) => map.result = Some(result.map_err(|e| e.to_string())),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    map.result = Some(Err("mapping callback dropped".to_string()));
                }
            }
        }
        if self.maps.iter().any(|m| m.result.is_none()) {
            return ReadbackStatus::Pending;
        }

        let mut failure = None;
        let mut data = Vec::with_capacity(self.maps.len());
        for map in &self.maps {
            let Some(storage) = resources.storage(&map.buffer_id) else {
                continue;
            };
            match &map.result {
                Some(Ok(())) => {
                    let slice = storage.staging.slice(0..storage.size);
                    let mapped = slice.get_mapped_range();
                    let bytes = mapped.to_vec();
                    drop(mapped);
                    storage.staging.unmap();
                    data.push(ReadbackData {
                        buffer_id: map.buffer_id.clone(),
                        bytes,
                    });
                }
                Some(Err(message)) => {
                    failure.get_or_insert_with(|| format!("{}: {message}", map.buffer_id));
                }
                None => {}
            }
        }
        match failure {
            Some(message) => ReadbackStatus::Failed(RuntimeError::BufferMap(message)),
            None => ReadbackStatus::Complete(data),
        }
    }
}
