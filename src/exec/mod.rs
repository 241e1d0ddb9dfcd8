//! Step execution.
//!
//! - `backend`: the seam between the state machine and a device implementation
//! - `orchestrator`: `Idle → Preparing → Dispatching → (ReadingBack | Idle)` and run modes
//! - `rate`: achieved steps/sec and the uncapped readback cadence

pub mod backend;
pub mod orchestrator;
pub mod rate;

pub use backend::{Dispatch, ExecutionBackend, PreparedBuffer, ReadbackData, ReadbackStatus};
pub use orchestrator::{ExecState, Orchestrator, ReadbackEvent, RunMode, StepOutcome};
pub use rate::{RateMeter, ReadbackThrottle};

use crate::config::SYSTEM_UNIFORM_COUNT;

/// Each system uniform is a lone `u32` in its own 16-byte buffer.
pub const UNIFORM_BUFFER_SIZE: u64 = 16;

/// Values of the six system uniforms, in binding order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemUniforms {
    pub step: u32,
    pub mouse_x: u32,
    pub mouse_y: u32,
    pub mouse_z: u32,
    pub mouse_button: u32,
    pub key_code: u32,
}

impl SystemUniforms {
    pub fn values(&self) -> [u32; SYSTEM_UNIFORM_COUNT as usize] {
        [
            self.step,
            self.mouse_x,
            self.mouse_y,
            self.mouse_z,
            self.mouse_button,
            self.key_code,
        ]
    }

    /// Padded contents of uniform buffer `index`.
    pub fn bytes(&self, index: usize) -> [u8; UNIFORM_BUFFER_SIZE as usize] {
        let mut out = [0u8; UNIFORM_BUFFER_SIZE as usize];
        if let Some(value) = self.values().get(index) {
            out[..4].copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_bytes_are_padded_little_endian() {
        let uniforms = SystemUniforms {
            step: 3,
            key_code: 0x41,
            ..Default::default()
        };
        assert_eq!(&uniforms.bytes(0)[..4], &[3, 0, 0, 0]);
        assert_eq!(&uniforms.bytes(5)[..4], &[0x41, 0, 0, 0]);
        assert!(uniforms.bytes(0)[4..].iter().all(|b| *b == 0));
        assert_eq!(uniforms.bytes(9), [0; 16]);
    }
}
