//! Binding slots shared by every compute pipeline.
//!
//! All pipelines use one bind-group layout: six uniforms at fixed bindings and `slot_count`
//! storage slots starting at the buffer offset. A shader's selected buffers fill the first
//! slots in order; every remaining slot is bound to a placeholder.

use std::collections::HashSet;

use crate::config::{StudioConfig, SYSTEM_UNIFORM_COUNT};
use crate::error::{StudioError, StudioResult};
use crate::model::{Buffer, Shader};
use crate::wgsl::templates::SYSTEM_UNIFORMS;

/// The subset of device limits that shape the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingLimits {
    pub max_bindings_per_bind_group: u32,
    pub max_storage_buffers_per_shader_stage: u32,
}

impl Default for BindingLimits {
    /// WebGPU baseline limits.
    fn default() -> Self {
        Self {
            max_bindings_per_bind_group: 1000,
            max_storage_buffers_per_shader_stage: 8,
        }
    }
}

/// `min(configured max, bindings left after the offset, storage buffers per stage)`.
pub fn slot_count(config: &StudioConfig, limits: &BindingLimits) -> u32 {
    config
        .max_buffer_slots
        .min(
            limits
                .max_bindings_per_bind_group
                .saturating_sub(config.buffer_binding_offset),
        )
        .min(limits.max_storage_buffers_per_shader_stage)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPlan {
    pub uniform_base: u32,
    pub buffer_offset: u32,
    pub slot_count: u32,
}

impl LayoutPlan {
    pub fn new(config: &StudioConfig, limits: &BindingLimits) -> StudioResult<Self> {
        config.validate()?;
        let slot_count = slot_count(config, limits);
        if slot_count == 0 {
            return Err(StudioError::config(format!(
                "device leaves no storage slots at binding offset {}",
                config.buffer_binding_offset
            )));
        }
        let highest_uniform = config.uniform_binding_base + SYSTEM_UNIFORM_COUNT - 1;
        if highest_uniform >= limits.max_bindings_per_bind_group {
            return Err(StudioError::config(format!(
                "uniform binding {highest_uniform} exceeds the device limit of {} bindings",
                limits.max_bindings_per_bind_group
            )));
        }
        Ok(Self {
            uniform_base: config.uniform_binding_base,
            buffer_offset: config.buffer_binding_offset,
            slot_count,
        })
    }

    /// `(binding, uniform name)` for the system uniforms.
    pub fn uniform_bindings(&self) -> impl Iterator<Item = (u32, &'static str)> + '_ {
        SYSTEM_UNIFORMS
            .iter()
            .enumerate()
            .map(|(i, name)| (self.uniform_base + i as u32, *name))
    }

    pub fn buffer_bindings(&self) -> std::ops::Range<u32> {
        self.buffer_offset..self.buffer_offset + self.slot_count
    }

    pub fn contains(&self, binding: u32) -> bool {
        self.buffer_bindings().contains(&binding)
            || (self.uniform_base..self.uniform_base + SYSTEM_UNIFORM_COUNT).contains(&binding)
    }
}

/// Normalized buffer ids for a shader: dangling and repeated ids dropped, capped at
/// `slot_count`, and the first buffers of the session when nothing is left.
pub fn normalize_buffer_ids(selected: &[String], buffers: &[Buffer], slot_count: usize) -> Vec<String> {
    let known: HashSet<&str> = buffers.iter().map(|b| b.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut ids: Vec<String> = selected
        .iter()
        .map(String::as_str)
        .filter(|id| known.contains(id) && seen.insert(*id))
        .take(slot_count)
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        ids = buffers.iter().take(slot_count).map(|b| b.id.clone()).collect();
    }
    ids
}

/// Buffers a shader binds, in slot order.
pub fn resolve_buffers<'a>(shader: &Shader, buffers: &'a [Buffer], slot_count: usize) -> Vec<&'a Buffer> {
    normalize_buffer_ids(&shader.buffer_ids, buffers, slot_count)
        .iter()
        .filter_map(|id| buffers.iter().find(|b| &b.id == id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotResource {
    Uniform(&'static str),
    Storage { buffer_id: String },
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingEntry {
    pub binding: u32,
    pub resource: SlotResource,
}

/// Every entry of one shader's bind group, uniforms first, then the storage slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBindings {
    pub shader_id: String,
    pub buffer_ids: Vec<String>,
    pub entries: Vec<BindingEntry>,
}

impl ShaderBindings {
    pub fn storage_entries(&self) -> impl Iterator<Item = &BindingEntry> {
        self.entries
            .iter()
            .filter(|e| !matches!(e.resource, SlotResource::Uniform(_)))
    }

    pub fn binding_of(&self, buffer_id: &str) -> Option<u32> {
        self.entries.iter().find_map(|e| match &e.resource {
            SlotResource::Storage { buffer_id: id } if id == buffer_id => Some(e.binding),
            _ => None,
        })
    }
}

pub fn resolve_shader_bindings(plan: &LayoutPlan, shader: &Shader, buffers: &[Buffer]) -> ShaderBindings {
    let buffer_ids = normalize_buffer_ids(&shader.buffer_ids, buffers, plan.slot_count as usize);

    let mut entries: Vec<BindingEntry> = plan
        .uniform_bindings()
        .map(|(binding, name)| BindingEntry {
            binding,
            resource: SlotResource::Uniform(name),
        })
        .collect();
    for (slot, binding) in plan.buffer_bindings().enumerate() {
        let resource = match buffer_ids.get(slot) {
            Some(id) => SlotResource::Storage { buffer_id: id.clone() },
            None => SlotResource::Placeholder,
        };
        entries.push(BindingEntry { binding, resource });
    }

    ShaderBindings {
        shader_id: shader.id.clone(),
        buffer_ids,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Extent3, FillMode, ScalarType};

    fn buffers(n: usize) -> Vec<Buffer> {
        (0..n)
            .map(|i| Buffer::new(format!("b{i}"), ScalarType::Int, FillMode::Empty, Extent3::new(1, 1, 1)))
            .collect()
    }

    #[test]
    fn slot_count_takes_the_tightest_limit() {
        let config = StudioConfig::default();
        let limits = BindingLimits {
            max_bindings_per_bind_group: 18,
            max_storage_buffers_per_shader_stage: 10,
        };
        assert_eq!(slot_count(&config, &limits), 4);
        let limits = BindingLimits {
            max_bindings_per_bind_group: 1000,
            max_storage_buffers_per_shader_stage: 6,
        };
        assert_eq!(slot_count(&config, &limits), 6);
        assert_eq!(slot_count(&config, &BindingLimits::default()), 8);
    }

    #[test]
    fn normalization_prunes_and_defaults() {
        let bufs = buffers(3);
        let selected = vec!["gone".to_string(), bufs[2].id.clone(), bufs[2].id.clone()];
        assert_eq!(normalize_buffer_ids(&selected, &bufs, 8), vec![bufs[2].id.clone()]);
        assert_eq!(
            normalize_buffer_ids(&["gone".to_string()], &bufs, 2),
            vec![bufs[0].id.clone(), bufs[1].id.clone()]
        );
        assert!(normalize_buffer_ids(&[], &[], 8).is_empty());
    }

    #[test]
    fn unused_slots_are_placeholders() {
        let bufs = buffers(2);
        let shader = Shader {
            id: "s".into(),
            name: "S".into(),
            code: String::new(),
            buffer_ids: vec![bufs[1].id.clone()],
        };
        let plan = LayoutPlan::new(&StudioConfig::default(), &BindingLimits::default()).unwrap();
        let resolved = resolve_shader_bindings(&plan, &shader, &bufs);
        assert_eq!(resolved.entries.len(), 6 + 8);
        assert_eq!(resolved.binding_of(&bufs[1].id), Some(14));
        let placeholders = resolved
            .storage_entries()
            .filter(|e| e.resource == SlotResource::Placeholder)
            .count();
        assert_eq!(placeholders, 7);
        assert_eq!(resolved.entries[0].resource, SlotResource::Uniform("step"));
    }

    #[test]
    fn layout_requires_a_slot() {
        let limits = BindingLimits {
            max_bindings_per_bind_group: 14,
            max_storage_buffers_per_shader_stage: 8,
        };
        assert!(LayoutPlan::new(&StudioConfig::default(), &limits).is_err());
    }
}
