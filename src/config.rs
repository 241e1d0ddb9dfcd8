//! Studio configuration: binding layout constants, run-loop timing and adapter choice.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{StudioError, StudioResult};

/// Number of system uniforms (`step`, `mouseX`, `mouseY`, `mouseZ`, `mouseBtn`, `keyCode`).
pub const SYSTEM_UNIFORM_COUNT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerPreference {
    #[serde(rename = "lowPower")]
    LowPower,
    #[default]
    #[serde(rename = "highPerformance")]
    HighPerformance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StudioConfig {
    pub uniform_binding_base: u32,
    pub buffer_binding_offset: u32,
    pub max_buffer_slots: u32,
    pub step_interval_ms: u64,
    pub uncapped_readback_interval_ms: u64,
    pub rate_window_ms: u64,
    pub power_preference: PowerPreference,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            uniform_binding_base: 8,
            buffer_binding_offset: 14,
            max_buffer_slots: 8,
            step_interval_ms: 1,
            uncapped_readback_interval_ms: 150,
            rate_window_ms: 1000,
            power_preference: PowerPreference::HighPerformance,
        }
    }
}

impl StudioConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read studio config at {}", path.display()))?;
        let config: StudioConfig =
            serde_json::from_str(&text).context("failed to parse studio config json")?;
        config
            .validate()
            .with_context(|| format!("invalid studio config at {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> StudioResult<()> {
        if self.max_buffer_slots == 0 {
            return Err(StudioError::config("maxBufferSlots must be at least 1"));
        }
        if self.rate_window_ms == 0 {
            return Err(StudioError::config("rateWindowMs must be positive"));
        }

        let uniforms = self.uniform_binding_base..self.uniform_binding_base + SYSTEM_UNIFORM_COUNT;
        let buffers = self.buffer_binding_offset..self.buffer_binding_offset + self.max_buffer_slots;
        if uniforms.start < buffers.end && buffers.start < uniforms.end {
            return Err(StudioError::config(format!(
                "uniform bindings {}..{} overlap buffer bindings {}..{}",
                uniforms.start, uniforms.end, buffers.start, buffers.end
            )));
        }
        Ok(())
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn uncapped_readback_interval(&self) -> Duration {
        Duration::from_millis(self.uncapped_readback_interval_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }
}
