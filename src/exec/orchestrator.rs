//! Step state machine and run loop.
//!
//! A step moves `Idle → Preparing → Dispatching` and ends in `ReadingBack` when buffer
//! contents were requested, `Idle` otherwise. Only one readback is ever in flight: `step`
//! returns [`StepOutcome::Busy`] until `poll`, `tick` or `wait_idle` has observed it complete.
//! The orchestrator owns the backend; the session is only read while stepping and receives
//! readback values afterwards.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::binding::{BindingLimits, slot_count};
use crate::compiler::{self, CompileOutput};
use crate::config::StudioConfig;
use crate::console::Console;
use crate::error::{RuntimeError, StudioError, StudioResult};
use crate::exec::backend::{Dispatch, ExecutionBackend, PreparedBuffer, ReadbackStatus};
use crate::exec::rate::{RateMeter, ReadbackThrottle};
use crate::exec::SystemUniforms;
use crate::gpu::GpuBackend;
use crate::model::ScalarData;
use crate::program;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Preparing,
    Dispatching,
    ReadingBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One step per `interval`, every step read back.
    RateLimited { interval: Duration },
    /// A step on every idle tick; buffers read back at most once per `readback_interval`.
    Uncapped { readback_interval: Duration },
}

impl RunMode {
    pub fn rate_limited(config: &StudioConfig) -> Self {
        RunMode::RateLimited {
            interval: config.step_interval(),
        }
    }

    pub fn uncapped(config: &StudioConfig) -> Self {
        RunMode::Uncapped {
            readback_interval: config.uncapped_readback_interval(),
        }
    }
}

#[derive(Debug)]
pub enum StepOutcome {
    /// Submitted without a readback; back to `Idle`.
    Completed,
    /// Submitted; the next step waits for the readback.
    ReadbackPending,
    /// An earlier readback is still pending; nothing happened.
    Busy,
    /// Nothing was submitted. The error is also in the console.
    Skipped(StudioError),
}

impl StepOutcome {
    pub fn advanced(&self) -> bool {
        matches!(self, StepOutcome::Completed | StepOutcome::ReadbackPending)
    }
}

/// Fresh contents of one buffer after a completed readback.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadbackEvent {
    pub buffer_id: String,
    pub data: ScalarData,
}

pub struct Orchestrator {
    config: StudioConfig,
    backend: Option<Box<dyn ExecutionBackend>>,
    compiled: Option<CompileOutput>,
    prepared: bool,
    state: ExecState,
    step_count: u64,
    inputs: SystemUniforms,
    mode: RunMode,
    running: bool,
    paused: bool,
    next_due: Option<Instant>,
    throttle: ReadbackThrottle,
    rate: RateMeter,
    console: Console,
}

impl Orchestrator {
    pub fn new(config: StudioConfig) -> Self {
        Self {
            mode: RunMode::rate_limited(&config),
            throttle: ReadbackThrottle::new(config.uncapped_readback_interval()),
            rate: RateMeter::new(config.rate_window()),
            config,
            backend: None,
            compiled: None,
            prepared: false,
            state: ExecState::Idle,
            step_count: 0,
            inputs: SystemUniforms::default(),
            running: false,
            paused: false,
            next_due: None,
            console: Console::new(),
        }
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    /// Take ownership of a backend, replacing any previous one. Already compiled programs are
    /// rebuilt on it.
    pub fn open(&mut self, mut backend: Box<dyn ExecutionBackend>) {
        if let Some(mut old) = self.backend.take() {
            old.release();
        }
        self.prepared = false;
        self.state = ExecState::Idle;
        let rebuilt = match &self.compiled {
            Some(output) => backend.compile(output),
            None => Ok(()),
        };
        if let Err(err) = rebuilt {
            self.console.error("device", err.to_string());
            self.compiled = None;
        }
        self.backend = Some(backend);
        info!(target: "forge::run", "execution backend opened");
    }

    /// Open a wgpu device with the configured power preference.
    pub fn open_gpu(&mut self) -> StudioResult<()> {
        match GpuBackend::open(&self.config) {
            Ok(backend) => {
                self.open(Box::new(backend));
                Ok(())
            }
            Err(err) => {
                self.console.error("device", err.to_string());
                Err(err.into())
            }
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Destroy GPU buffers, uniforms and pipelines and forget the compiled programs. The
    /// device stays open.
    pub fn reset(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.release();
        }
        self.compiled = None;
        self.prepared = false;
        self.state = ExecState::Idle;
        self.throttle.reset();
        self.rate.reset();
    }

    pub fn close(&mut self) {
        self.halt();
        self.reset();
        self.backend = None;
        info!(target: "forge::run", "execution backend closed");
    }

    pub fn limits(&self) -> BindingLimits {
        self.backend
            .as_ref()
            .map(|b| b.limits())
            .unwrap_or_default()
    }

    /// Normalize the session, compile it and build the pipelines. Any readback in flight is
    /// discarded.
    pub fn compile(&mut self, session: &mut Session) -> StudioResult<()> {
        let limits = self.limits();
        session.normalize(slot_count(&self.config, &limits) as usize);

        if let Some(backend) = self.backend.as_mut() {
            backend.release();
        }
        self.compiled = None;
        self.prepared = false;
        self.state = ExecState::Idle;

        let output = match compiler::compile(session, &self.config, &limits) {
            Ok(output) => output,
            Err(err) => {
                self.report("compile", &err);
                return Err(err);
            }
        };
        for diagnostic in &output.diagnostics {
            self.console.diagnostic("compile", diagnostic);
        }
        let built = match self.backend.as_mut() {
            Some(backend) => backend.compile(&output),
            None => Ok(()),
        };
        if let Err(err) = built {
            let err = StudioError::from(err);
            self.report("compile", &err);
            return Err(err);
        }
        self.console.info(
            "compile",
            format!("compiled {} shader program(s)", output.programs.len()),
        );
        self.compiled = Some(output);
        Ok(())
    }

    pub fn compiled(&self) -> Option<&CompileOutput> {
        self.compiled.as_ref()
    }

    /// Run a single step and leave a running loop paused.
    pub fn step(&mut self, session: &mut Session) -> StepOutcome {
        let outcome = self.step_at(session, Instant::now(), true);
        if outcome.advanced() {
            self.running = true;
            self.paused = true;
        }
        outcome
    }

    /// Start or resume the run loop driven by [`Orchestrator::tick`].
    pub fn run(&mut self, mode: RunMode) -> bool {
        if self.running && !self.paused {
            self.console.warn("run", "already running");
            return false;
        }
        if self.compiled.is_none() {
            self.console.warn("run", "nothing compiled; compile first");
            return false;
        }
        if let RunMode::Uncapped { readback_interval } = mode {
            self.throttle.set_interval(readback_interval);
        }
        self.throttle.reset();
        self.rate.reset();
        self.mode = mode;
        self.running = true;
        self.paused = false;
        self.next_due = None;
        self.console.info("run", "run loop started");
        true
    }

    pub fn pause(&mut self) -> bool {
        if !self.running {
            self.console.warn("pause", "nothing to pause");
            return false;
        }
        if self.paused {
            self.console.warn("pause", "already paused");
            return false;
        }
        self.paused = true;
        self.next_due = None;
        self.rate.reset();
        self.console.info("pause", "paused; run to resume");
        true
    }

    /// Halt the loop, reset the step counter and release all GPU state. A readback still in
    /// flight is dropped with it.
    pub fn stop(&mut self) {
        self.halt();
        self.step_count = 0;
        self.reset();
        self.console
            .info("stop", "GPU state reset; compile again to start over");
    }

    fn halt(&mut self) {
        self.running = false;
        self.paused = false;
        self.next_due = None;
        self.rate.reset();
    }

    /// Drive the run loop: collect a finished readback, then step if one is due.
    pub fn tick(&mut self, session: &mut Session, now: Instant) -> Vec<ReadbackEvent> {
        let events = self.collect(session, false);
        if !self.running || self.paused {
            return events;
        }
        // idle ticks let the measured rate fall when steps stall
        self.rate.record(now, self.step_count);
        if self.state != ExecState::Idle {
            return events;
        }
        let outcome = match self.mode {
            RunMode::RateLimited { interval } => {
                if self.next_due.is_some_and(|due| now < due) {
                    return events;
                }
                self.next_due = Some(now + interval);
                self.step_at(session, now, true)
            }
            RunMode::Uncapped { .. } => self.step_at(session, now, false),
        };
        if let StepOutcome::Skipped(_) = outcome {
            self.halt();
            self.console.warn("run", "run loop halted");
        }
        events
    }

    /// Non-blocking readback completion.
    pub fn poll(&mut self, session: &mut Session) -> Vec<ReadbackEvent> {
        self.collect(session, false)
    }

    /// Block until the pending readback, if any, resolves.
    pub fn wait_idle(&mut self, session: &mut Session) -> Vec<ReadbackEvent> {
        self.collect(session, true)
    }

    pub fn set_mouse(&mut self, x: u32, y: u32, z: u32, inside: bool) {
        self.inputs.mouse_x = if inside { x } else { 0 };
        self.inputs.mouse_y = if inside { y } else { 0 };
        self.inputs.mouse_z = z;
    }

    pub fn set_mouse_button(&mut self, button: u32) {
        self.inputs.mouse_button = button;
    }

    pub fn set_key(&mut self, key_code: u32) {
        self.inputs.key_code = key_code;
    }

    pub fn inputs(&self) -> SystemUniforms {
        self.inputs
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Measured steps per second, independent of the requested rate. Cleared when the run
    /// loop pauses or halts, and decays to zero over the rate window when running ticks stop
    /// producing steps.
    pub fn achieved_rate(&self) -> f64 {
        self.rate.rate()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    fn report(&mut self, tag: &str, err: &StudioError) {
        self.console.error(tag, err.to_string());
        for diagnostic in err.diagnostics() {
            self.console.diagnostic(tag, diagnostic);
        }
    }

    fn step_at(&mut self, session: &mut Session, now: Instant, always_read_back: bool) -> StepOutcome {
        if self.state == ExecState::ReadingBack {
            debug!(target: "forge::run", "readback pending; step ignored");
            return StepOutcome::Busy;
        }
        match self.try_step(session, now, always_read_back) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state = ExecState::Idle;
                self.report("run", &err);
                StepOutcome::Skipped(err)
            }
        }
    }

    fn try_step(&mut self, session: &mut Session, now: Instant, always_read_back: bool) -> StudioResult<StepOutcome> {
        let Some(backend) = self.backend.as_mut() else {
            return Err(RuntimeError::NoDevice.into());
        };
        let Some(compiled) = self.compiled.as_ref() else {
            return Err(RuntimeError::NotCompiled.into());
        };
        program::check_structure(session.program(), false)?;

        let flat = program::flatten(session.program());
        let mut dispatches = Vec::new();
        for step in program::active_steps(&flat) {
            let shader_id = step.shader_id.as_deref().unwrap_or_default();
            if compiled.program_for(shader_id).is_none() {
                return Err(RuntimeError::MissingPipeline {
                    shader: step.shader_id.clone().unwrap_or_else(|| step.name.clone()),
                }
                .into());
            }
            dispatches.push(Dispatch {
                shader_id: shader_id.to_string(),
                workgroups: step.dispatch.clamped(),
            });
        }

        if session.take_dirty() {
            self.prepared = false;
        }
        if !self.prepared {
            self.state = ExecState::Preparing;
            let buffers: Vec<PreparedBuffer> = session.buffers().iter().map(PreparedBuffer::snapshot).collect();
            backend.prepare(&buffers)?;
            self.prepared = true;
            debug!(target: "forge::run", buffers = buffers.len(), "bindings prepared");
        }

        self.state = ExecState::Dispatching;
        let uniforms = SystemUniforms {
            step: self.step_count as u32,
            ..self.inputs
        };
        backend.write_uniforms(&uniforms)?;
        let read_back = always_read_back || self.throttle.ready(now);
        backend.submit(&dispatches, read_back)?;

        self.step_count += 1;
        self.rate.record(now, self.step_count);
        debug!(
            target: "forge::run",
            step = self.step_count,
            dispatches = dispatches.len(),
            read_back,
            "step submitted"
        );
        if read_back {
            self.state = ExecState::ReadingBack;
            Ok(StepOutcome::ReadbackPending)
        } else {
            self.state = ExecState::Idle;
            Ok(StepOutcome::Completed)
        }
    }

    fn collect(&mut self, session: &mut Session, wait: bool) -> Vec<ReadbackEvent> {
        if self.state != ExecState::ReadingBack {
            return Vec::new();
        }
        let Some(backend) = self.backend.as_mut() else {
            self.state = ExecState::Idle;
            return Vec::new();
        };
        let data = match backend.poll_readback(wait) {
            ReadbackStatus::Pending => return Vec::new(),
            ReadbackStatus::Idle => {
                self.state = ExecState::Idle;
                return Vec::new();
            }
            ReadbackStatus::Failed(err) => {
                self.state = ExecState::Idle;
                self.console.error("run", err.to_string());
                return Vec::new();
            }
            ReadbackStatus::Complete(data) => data,
        };
        self.state = ExecState::Idle;

        let mut events = Vec::with_capacity(data.len());
        for item in data {
            let Some(buffer) = session.buffer(&item.buffer_id) else {
                continue;
            };
            // edited since upload; the next step uploads the session's values instead
            if session.values_replaced(&item.buffer_id) || item.bytes.len() as u64 != buffer.byte_len() {
                warn!(target: "forge::run", buffer = %buffer.name, "buffer changed during readback; result dropped");
                continue;
            }
            let values = ScalarData::from_le_bytes(buffer.scalar_type, &item.bytes, buffer.size.count());
            if session.apply_readback(&item.buffer_id, values.clone()).is_ok() {
                events.push(ReadbackEvent {
                    buffer_id: item.buffer_id,
                    data: values,
                });
            }
        }
        events
    }
}
