use crate::bbox::{BBox, Ltrb};
use crate::class::{ObjectClass, CLASS_COUNT};
use crate::detection::Detection;
use crate::history::TrackHistory;
use nalgebra as na;
use serde_derive::Serialize;

pub type TrackId = u64;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Tentative,
    Confirmed,
    Lost,
    Removed,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub state: TrackState,
    pub bbox: BBox<Ltrb>,
    pub predicted: BBox<Ltrb>,

    // center displacement in px per frame
    pub velocity: na::Vector2<f32>,

    pub class: ObjectClass,
    pub class_votes: [u32; CLASS_COUNT],
    pub confidence: f32,

    // frames since creation
    pub age: u32,
    pub time_since_update: u32,
    // consecutive matched frames
    pub hits: u32,
    pub last_frame: u64,
    pub history: TrackHistory,
}

impl Track {
    pub fn new(
        id: TrackId,
        frame: u64,
        det: &Detection,
        class: ObjectClass,
        history_len: usize,
    ) -> Self {
        let bbox = det.ltrb();
        let mut history = TrackHistory::with_capacity(history_len);
        history.push(frame, bbox);

        let mut class_votes = [0; CLASS_COUNT];
        class_votes[class.index()] += 1;

        Self {
            id,
            state: TrackState::Tentative,
            bbox,
            predicted: bbox,
            velocity: na::Vector2::zeros(),
            class,
            class_votes,
            confidence: det.confidence,
            age: 0,
            time_since_update: 0,
            hits: 1,
            last_frame: frame,
            history,
        }
    }

    /// Constant velocity extrapolation to the coming frame.
    pub fn predict(&mut self) {
        let steps = (self.time_since_update + 1) as f32;
        self.predicted = self.bbox.translate(&(self.velocity * steps));
    }

    pub fn update(
        &mut self,
        frame: u64,
        det: &Detection,
        class: ObjectClass,
        min_hits: u32,
        smoothing: f32,
    ) {
        let bbox = det.ltrb();
        let gap = frame.saturating_sub(self.last_frame).max(1) as f32;
        let vel = (bbox.center() - self.bbox.center()) / gap;

        self.velocity = if self.history.len() > 1 {
            self.velocity * smoothing + vel * (1.0 - smoothing)
        } else {
            vel
        };

        self.bbox = bbox;
        self.predicted = bbox;
        self.confidence = det.confidence;
        self.vote(class);

        self.age += 1;
        self.time_since_update = 0;
        self.hits += 1;
        self.last_frame = frame;
        self.history.push(frame, bbox);

        match self.state {
            TrackState::Tentative if self.hits >= min_hits => self.state = TrackState::Confirmed,
            TrackState::Lost => self.state = TrackState::Confirmed,
            _ => (),
        }
    }

    /// No detection this frame: tentative tracks die, confirmed ones become lost.
    pub fn mark_missed(&mut self) {
        self.age += 1;
        self.time_since_update += 1;
        self.hits = 0;

        match self.state {
            TrackState::Tentative => self.state = TrackState::Removed,
            TrackState::Confirmed => self.state = TrackState::Lost,
            _ => (),
        }
    }

    /// Frame lost upstream: only the clock moves.
    #[inline]
    pub fn mark_skipped(&mut self) {
        self.age += 1;
        self.time_since_update += 1;
    }

    #[inline]
    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    fn vote(&mut self, class: ObjectClass) {
        self.class_votes[class.index()] += 1;

        let current = self.class_votes[self.class.index()];
        let (best, votes) = self
            .class_votes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, v)| (ObjectClass::ALL[i], *v))
            .unwrap_or((self.class, current));

        if votes > current {
            self.class = best;
        }
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    /// Confirmed now or confirmed earlier and currently lost.
    #[inline]
    pub fn was_confirmed(&self) -> bool {
        matches!(self.state, TrackState::Confirmed | TrackState::Lost)
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.state == TrackState::Removed
    }

    #[inline]
    pub fn matched_on(&self, frame: u64) -> bool {
        self.time_since_update == 0 && self.last_frame == frame
    }
}

/// Read-only view of a track handed to rendering and telemetry.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub bbox: [f32; 4],
    pub class: ObjectClass,
    pub state: TrackState,
    pub confidence: f32,
    pub time_since_update: u32,
}

impl From<&Track> for TrackSnapshot {
    fn from(t: &Track) -> TrackSnapshot {
        TrackSnapshot {
            id: t.id,
            bbox: t.bbox.into(),
            class: t.class,
            state: t.state,
            confidence: t.confidence,
            time_since_update: t.time_since_update,
        }
    }
}
