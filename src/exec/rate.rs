use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Steps per second over a rolling wall-time window.
#[derive(Debug, Clone)]
pub struct RateMeter {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: Instant, step_count: u64) {
        self.samples.push_back((now, step_count));
        // keep one sample at or before the window start as the baseline
        while self.samples.len() > 2 {
            let second = self.samples[1].0;
            if now.duration_since(second) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn rate(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.0.duration_since(first.0).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        last.1.saturating_sub(first.1) as f64 / elapsed
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

/// Lets a readback through at most once per `interval`.
#[derive(Debug, Clone)]
pub struct ReadbackThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ReadbackThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
