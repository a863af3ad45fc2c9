use crate::bbox::{BBox, Ltrb};
use crate::zone::Anchor;
use nalgebra as na;
use std::collections::VecDeque;

/// Box a track was matched with on a given frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSample {
    pub frame: u64,
    pub bbox: BBox<Ltrb>,
}

impl TrackSample {
    #[inline]
    pub fn anchor(&self, anchor: Anchor) -> na::Point2<f32> {
        anchor.point(&self.bbox)
    }
}

/// Most recent matched samples of a track, newest first. Anchor points are
/// derived per zone policy from the stored boxes.
#[derive(Debug, Clone)]
pub struct TrackHistory {
    deque: VecDeque<TrackSample>,
    capacity: usize,
}

impl TrackHistory {
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(2);

        Self {
            deque: VecDeque::with_capacity(cap),
            capacity: cap,
        }
    }

    #[inline]
    pub fn push(&mut self, frame: u64, bbox: BBox<Ltrb>) -> Option<TrackSample> {
        let poped = if self.is_full() {
            self.deque.pop_back()
        } else {
            None
        };

        self.deque.push_front(TrackSample { frame, bbox });

        poped
    }

    #[inline]
    pub fn latest(&self) -> Option<&TrackSample> {
        self.deque.front()
    }

    #[inline]
    pub fn previous(&self) -> Option<&TrackSample> {
        self.deque.get(1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.deque.len() == self.capacity
    }

    /// Oldest sample first, as a renderer draws a trail.
    #[inline]
    pub fn asc_iter(&self) -> impl Iterator<Item = &'_ TrackSample> {
        self.deque.iter().rev()
    }
}
