//! Per-frame sequencing: association, crossing detection, counting.

use crate::counter::{CountAggregator, CountTable};
use crate::crossing::{CrossingDetector, CrossingEvent};
use crate::error::{Error, Result};
use crate::flusher::Flusher;
use crate::fps::FpsMonitor;
use crate::frame::FrameInput;
use crate::track::TrackSnapshot;
use crate::tracker::Tracker;
use crate::zone::Zone;

use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Checked after every frame on the frame thread.
    Inline,
    /// Timed flushes on a separate thread.
    #[default]
    Detached,
}

/// Everything the rendering side needs after one frame.
#[derive(Serialize, Debug, Clone)]
pub struct FrameOutput {
    pub frame: u64,
    pub dropped: bool,
    pub tracks: Vec<TrackSnapshot>,
    pub events: Vec<CrossingEvent>,
    pub counts: CountTable,
    pub fps: f32,
    pub flush_error: Option<String>,
}

pub struct Pipeline {
    tracker: Tracker,
    crossings: CrossingDetector,
    aggregator: Arc<CountAggregator>,
    fps: FpsMonitor,
    flusher: Option<Flusher>,
    frames: u64,
    dropped: u64,
}

impl Pipeline {
    pub fn new(
        tracker: Tracker,
        zones: Vec<Zone>,
        aggregator: Arc<CountAggregator>,
        mode: FlushMode,
    ) -> Result<Self> {
        if zones.is_empty() {
            return Err(Error::config("at least one zone is required"));
        }

        let flusher = match mode {
            FlushMode::Inline => None,
            FlushMode::Detached => Some(Flusher::spawn(aggregator.clone())?),
        };

        Ok(Self {
            tracker,
            crossings: CrossingDetector::new(zones),
            aggregator,
            fps: FpsMonitor::default(),
            flusher,
            frames: 0,
            dropped: 0,
        })
    }

    #[inline]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    #[inline]
    pub fn aggregator(&self) -> &Arc<CountAggregator> {
        &self.aggregator
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[inline]
    pub fn process(&mut self, input: FrameInput) -> FrameOutput {
        self.process_at(input, Instant::now())
    }

    pub fn process_at(&mut self, input: FrameInput, now: Instant) -> FrameOutput {
        self.fps.tick_at(now);
        self.frames += 1;

        let index = input.index();
        let mut dropped = false;
        let mut events = Vec::new();

        match input {
            FrameInput::Frame(frame) => match self.tracker.update(frame.index, &frame.detections) {
                Ok(update) => {
                    events = self.crossings.evaluate(
                        self.tracker.tracks(),
                        frame.index,
                        frame.timestamp,
                    );

                    self.crossings.forget(&update.removed);
                    self.aggregator.apply(&events);
                }
                Err(err) => {
                    warn!(frame = index, %err, "association failed, frame skipped");
                    let update = self.tracker.skip_frame(index);
                    self.crossings.forget(&update.removed);
                    dropped = true;
                }
            },
            FrameInput::Dropped { index, reason } => {
                debug!(frame = index, %reason, "frame dropped");
                let update = self.tracker.skip_frame(index);
                self.crossings.forget(&update.removed);
                dropped = true;
            }
        }

        if dropped {
            self.dropped += 1;
        }

        let flush_error = match &self.flusher {
            Some(flusher) => flusher.take_error(),
            None => self.aggregator.maybe_flush_at(now).err().map(|e| e.to_string()),
        };

        FrameOutput {
            frame: index,
            dropped,
            tracks: self.tracker.snapshots(),
            events,
            counts: self.aggregator.snapshot(),
            fps: self.fps.fps(),
            flush_error,
        }
    }

    /// Final flush. Counts applied by the last processed frame are included.
    pub fn finish(self) -> Result<CountTable> {
        match self.flusher {
            Some(flusher) => flusher.stop()?,
            None => self.aggregator.flush()?,
        }

        Ok(self.aggregator.snapshot())
    }
}
