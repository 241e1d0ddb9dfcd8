use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use compute_forge::binding::BindingLimits;
use compute_forge::compiler::CompileOutput;
use compute_forge::config::StudioConfig;
use compute_forge::diagnostics::Severity;
use compute_forge::error::{RuntimeError, StudioError};
use compute_forge::exec::{
    Dispatch, ExecState, ExecutionBackend, Orchestrator, PreparedBuffer, ReadbackData, ReadbackStatus, RunMode,
    StepOutcome, SystemUniforms,
};
use compute_forge::session::Session;

/// Readbacks complete only once `release_after` polls have been made.
struct SlowBackend {
    polls: Rc<Cell<usize>>,
    release_after: usize,
    buffers: Vec<PreparedBuffer>,
    pending: bool,
    fail_next_map: bool,
    fail_prepare: Option<RuntimeError>,
    prepares: Rc<Cell<usize>>,
}

impl SlowBackend {
    fn new(release_after: usize) -> (Self, Rc<Cell<usize>>) {
        let polls = Rc::new(Cell::new(0));
        (
            Self {
                polls: polls.clone(),
                release_after,
                buffers: Vec::new(),
                pending: false,
                fail_next_map: false,
                fail_prepare: None,
                prepares: Rc::new(Cell::new(0)),
            },
            polls,
        )
    }
}

impl ExecutionBackend for SlowBackend {
    fn limits(&self) -> BindingLimits {
        BindingLimits {
            max_bindings_per_bind_group: 1000,
            max_storage_buffers_per_shader_stage: 4,
        }
    }

    fn compile(&mut self, _output: &CompileOutput) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn prepare(&mut self, buffers: &[PreparedBuffer]) -> Result<(), RuntimeError> {
        self.prepares.set(self.prepares.get() + 1);
        if let Some(err) = self.fail_prepare.take() {
            return Err(err);
        }
        self.buffers = buffers.to_vec();
        Ok(())
    }

    fn write_uniforms(&mut self, _uniforms: &SystemUniforms) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn submit(&mut self, _dispatches: &[Dispatch], readback: bool) -> Result<(), RuntimeError> {
        self.pending = readback;
        self.polls.set(0);
        Ok(())
    }

    fn poll_readback(&mut self, wait: bool) -> ReadbackStatus {
        if !self.pending {
            return ReadbackStatus::Idle;
        }
        self.polls.set(self.polls.get() + 1);
        if !wait && self.polls.get() < self.release_after {
            return ReadbackStatus::Pending;
        }
        self.pending = false;
        if self.fail_next_map {
            self.fail_next_map = false;
            return ReadbackStatus::Failed(RuntimeError::BufferMap("device lost".into()));
        }
        ReadbackStatus::Complete(
            self.buffers
                .iter()
                .map(|b| ReadbackData {
                    buffer_id: b.id.clone(),
                    bytes: b.bytes.clone(),
                })
                .collect(),
        )
    }

    fn release(&mut self) {
        self.pending = false;
    }
}

fn compiled(backend: SlowBackend) -> (Orchestrator, Session) {
    let mut session = Session::seeded();
    let mut orchestrator = Orchestrator::new(StudioConfig::default());
    orchestrator.open(Box::new(backend));
    orchestrator.compile(&mut session).expect("seeded session compiles");
    (orchestrator, session)
}

#[test]
fn no_step_starts_while_a_readback_is_pending() {
    let (backend, polls) = SlowBackend::new(3);
    let (mut orchestrator, mut session) = compiled(backend);

    assert!(matches!(orchestrator.step(&mut session), StepOutcome::ReadbackPending));
    for _ in 0..2 {
        assert!(orchestrator.poll(&mut session).is_empty());
        assert!(matches!(orchestrator.step(&mut session), StepOutcome::Busy));
        assert_eq!(orchestrator.step_count(), 1);
    }
    assert_eq!(polls.get(), 2);

    let events = orchestrator.poll(&mut session);
    assert_eq!(events.len(), 1);
    assert_eq!(orchestrator.state(), ExecState::Idle);
    assert!(orchestrator.step(&mut session).advanced());
    assert_eq!(orchestrator.step_count(), 2);
}

#[test]
fn run_loop_does_not_overlap_readbacks() {
    let (backend, _polls) = SlowBackend::new(4);
    let (mut orchestrator, mut session) = compiled(backend);
    orchestrator.run(RunMode::RateLimited {
        interval: Duration::from_millis(1),
    });

    let start = Instant::now();
    for i in 0..20 {
        orchestrator.tick(&mut session, start + Duration::from_millis(i * 5));
    }
    // each step needs one submit tick and four polls before the next may start
    assert!(orchestrator.step_count() <= 5, "{}", orchestrator.step_count());
    assert!(orchestrator.step_count() >= 3);
}

#[test]
fn failed_readback_returns_to_idle() {
    let (mut backend, _polls) = SlowBackend::new(1);
    backend.fail_next_map = true;
    let (mut orchestrator, mut session) = compiled(backend);

    orchestrator.step(&mut session);
    assert!(orchestrator.wait_idle(&mut session).is_empty());
    assert_eq!(orchestrator.state(), ExecState::Idle);
    let last = orchestrator.console().last().unwrap();
    assert_eq!(last.severity, Severity::Error);
    assert!(last.message.contains("device lost"));
    assert!(orchestrator.step(&mut session).advanced());
}

#[test]
fn compile_failures_are_logged_with_locations() {
    let (backend, _polls) = SlowBackend::new(1);
    let (mut orchestrator, mut session) = compiled(backend);
    let shader = session.shaders()[0].id.clone();
    session
        .set_shader_code(
            &shader,
            "@compute @workgroup_size(1)\nfn Compute1() {\n    let x = nope;\n}",
        )
        .unwrap();

    let err = orchestrator.compile(&mut session).unwrap_err();
    assert!(matches!(err, StudioError::Compile { .. }));
    let located = orchestrator
        .console()
        .entries()
        .iter()
        .filter_map(|e| e.location.as_ref())
        .find(|l| l.id == shader)
        .expect("shader error is attributed");
    assert_eq!(located.line, 3);
    assert!(orchestrator.compiled().is_none());
    assert!(matches!(
        orchestrator.step(&mut session),
        StepOutcome::Skipped(StudioError::Runtime(RuntimeError::NotCompiled))
    ));
}

#[test]
fn limits_come_from_the_backend() {
    let (backend, _polls) = SlowBackend::new(1);
    let (orchestrator, _session) = compiled(backend);
    assert_eq!(orchestrator.compiled().unwrap().layout.slot_count, 4);
}

#[test]
fn oversized_upload_skips_the_step_and_retries() {
    let (mut backend, _polls) = SlowBackend::new(1);
    backend.fail_prepare = Some(RuntimeError::BufferTooLarge {
        buffer: "texture1".into(),
        bytes: 1 << 28,
        limit: 1 << 27,
    });
    let prepares = backend.prepares.clone();
    let (mut orchestrator, mut session) = compiled(backend);

    let outcome = orchestrator.step(&mut session);
    assert!(matches!(
        outcome,
        StepOutcome::Skipped(StudioError::Runtime(RuntimeError::BufferTooLarge { .. }))
    ));
    assert_eq!(orchestrator.step_count(), 0);
    assert_eq!(orchestrator.state(), ExecState::Idle);
    let last = orchestrator.console().last().unwrap();
    assert_eq!(last.severity, Severity::Error);
    assert!(last.message.contains("texture1"));

    // nothing was uploaded, so the next step prepares again
    assert!(orchestrator.step(&mut session).advanced());
    assert_eq!(prepares.get(), 2);
}

#[test]
fn program_edits_do_not_discard_a_pending_readback() {
    let (backend, _polls) = SlowBackend::new(3);
    let (mut orchestrator, mut session) = compiled(backend);
    let expected = session.buffers()[0].values.clone();

    orchestrator.step(&mut session);
    let step = session.program()[0].id().to_string();
    session.set_step_active(&step, true).unwrap();
    session.insert_loop_start(Some(0), 2).unwrap();
    session.insert_loop_end(None).unwrap();
    assert!(!session.is_dirty());

    let events = orchestrator.wait_idle(&mut session);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data, expected);
}
