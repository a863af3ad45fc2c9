use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_SAMPLE_SIZE: usize = 30;

/// Frame rate over the last `sample_size` ticks.
#[derive(Debug, Clone)]
pub struct FpsMonitor {
    sample_size: usize,
    ticks: VecDeque<Instant>,
}

impl Default for FpsMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl FpsMonitor {
    pub fn new(sample_size: usize) -> Self {
        let sample_size = sample_size.max(2);

        Self {
            sample_size,
            ticks: VecDeque::with_capacity(sample_size),
        }
    }

    #[inline]
    pub fn tick(&mut self) {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) {
        if self.ticks.len() == self.sample_size {
            self.ticks.pop_front();
        }

        self.ticks.push_back(now);
    }

    pub fn fps(&self) -> f32 {
        let span = match (self.ticks.front(), self.ticks.back()) {
            (Some(first), Some(last)) => last.saturating_duration_since(*first),
            _ => return 0.0,
        };

        if span == Duration::ZERO {
            return 0.0;
        }

        (self.ticks.len() - 1) as f32 / span.as_secs_f32()
    }

    pub fn reset(&mut self) {
        self.ticks.clear();
    }
}
