use crate::class::ObjectClass;
use crate::track::{Track, TrackId};
use crate::zone::{Direction, Side, Zone};

use serde_derive::Serialize;
use std::collections::HashMap;
use tracing::info;

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CrossingEvent {
    pub track_id: TrackId,
    pub class: ObjectClass,
    pub direction: Direction,
    pub zone: usize,
    pub frame: u64,
    pub timestamp: f64,
}

/// Emits one event per strict side change of a track anchor.
///
/// The last strict side of every (track, zone) pair is remembered. Anchors
/// exactly on the line leave it untouched, so `Negative, Zero, Negative`
/// emits nothing and `Negative, Zero, Positive` emits once, on the frame the
/// anchor reaches the positive side.
pub struct CrossingDetector {
    zones: Vec<Zone>,
    sides: HashMap<(TrackId, usize), Side>,
}

impl CrossingDetector {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self {
            zones,
            sides: HashMap::new(),
        }
    }

    pub fn evaluate<'a, I>(&mut self, tracks: I, frame: u64, timestamp: f64) -> Vec<CrossingEvent>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        let mut events = Vec::new();

        for track in tracks {
            if !track.was_confirmed() || !track.matched_on(frame) {
                continue;
            }

            let (curr, prev) = match (track.history.latest(), track.history.previous()) {
                (Some(curr), Some(prev)) => (curr, prev),
                _ => continue,
            };

            for (idx, zone) in self.zones.iter().enumerate() {
                let anchor = curr.anchor(zone.anchor);
                let side = zone.side_of(&anchor);
                let key = (track.id, idx);

                let last = self.sides.get(&key).copied().or_else(|| {
                    let seed = zone.side_of(&prev.anchor(zone.anchor));
                    seed.is_strict().then(|| seed)
                });

                if !side.is_strict() {
                    if let Some(last) = last {
                        self.sides.insert(key, last);
                    }
                    continue;
                }

                if last == Some(side.opposite()) && (!zone.bounded || zone.within_span(&anchor)) {
                    if let Some(direction) = zone.classify(side.opposite(), side) {
                        info!(
                            track = track.id,
                            class = %track.class,
                            zone = idx,
                            ?direction,
                            "line crossed"
                        );

                        events.push(CrossingEvent {
                            track_id: track.id,
                            class: track.class,
                            direction,
                            zone: idx,
                            frame,
                            timestamp,
                        });
                    }
                }

                self.sides.insert(key, side);
            }
        }

        events
    }

    /// Drops remembered sides of tracks that no longer exist.
    pub fn forget<'a, I: IntoIterator<Item = &'a TrackId>>(&mut self, ids: I) {
        for id in ids {
            for idx in 0..self.zones.len() {
                self.sides.remove(&(*id, idx));
            }
        }
    }

    #[inline]
    pub fn remembered(&self) -> usize {
        self.sides.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::track::TrackState;
    use crate::zone::InDirection;
    use nalgebra as na;

    const ID: TrackId = 7;

    // horizontal line y = 100 from x = 0 to x = 400; y < 100 is Negative
    fn line(in_direction: InDirection, bounded: bool) -> Zone {
        Zone::with_policy(
            na::Point2::new(0.0, 100.0),
            na::Point2::new(400.0, 100.0),
            Default::default(),
            in_direction,
            bounded,
        )
        .unwrap()
    }

    fn det(x: f32, y: f32) -> Detection {
        Detection::new(x, y, 20.0, 20.0, 0.9, 1)
    }

    fn confirmed_at(x: f32, y: f32) -> Track {
        let mut t = Track::new(ID, 0, &det(x, y), ObjectClass::Car, 8);
        t.state = TrackState::Confirmed;
        t
    }

    /// Feeds anchor y positions (x fixed) frame by frame, collecting events.
    fn run(cd: &mut CrossingDetector, x: f32, ys: &[f32]) -> Vec<(u64, Direction)> {
        let mut t = confirmed_at(x, ys[0]);
        let mut out = Vec::new();

        for (f, y) in ys.iter().enumerate().skip(1) {
            t.update(f as u64, &det(x, *y), ObjectClass::Car, 1, 0.5);
            out.extend(
                cd.evaluate([&t], f as u64, f as f64 * 0.04)
                    .into_iter()
                    .map(|e| (e.frame, e.direction)),
            );
        }

        out
    }

    #[test]
    fn negative_negative_positive_is_one_in_event_on_third_frame() {
        let mut d = CrossingDetector::new(vec![line(InDirection::NegativeToPositive, true)]);
        assert_eq!(run(&mut d, 50.0, &[80.0, 90.0, 110.0]), vec![(2, Direction::In)]);
    }

    #[test]
    fn mapping_can_be_inverted() {
        let mut d = CrossingDetector::new(vec![line(InDirection::PositiveToNegative, true)]);
        assert_eq!(run(&mut d, 50.0, &[80.0, 90.0, 110.0]), vec![(2, Direction::Out)]);
    }

    #[test]
    fn touching_the_line_and_returning_is_not_a_crossing() {
        let mut d = CrossingDetector::new(vec![line(Default::default(), true)]);
        assert!(run(&mut d, 50.0, &[80.0, 100.0, 80.0, 70.0]).is_empty());
    }

    #[test]
    fn crossing_through_the_line_is_decided_on_the_strict_side() {
        let mut d = CrossingDetector::new(vec![line(Default::default(), true)]);
        assert_eq!(
            run(&mut d, 50.0, &[80.0, 100.0, 100.0, 120.0]),
            vec![(3, Direction::In)]
        );
    }

    #[test]
    fn smooth_single_crossing_emits_exactly_once() {
        let ys: Vec<f32> = (0..40).map(|i| 40.0 + i as f32 * 4.0).collect();
        let mut d = CrossingDetector::new(vec![line(Default::default(), true)]);
        assert_eq!(run(&mut d, 200.0, &ys).len(), 1);
    }

    #[test]
    fn back_and_forth_counts_each_crossing() {
        let mut d = CrossingDetector::new(vec![line(Default::default(), true)]);
        assert_eq!(
            run(&mut d, 50.0, &[80.0, 120.0, 130.0, 90.0, 120.0]),
            vec![(1, Direction::In), (3, Direction::Out), (4, Direction::In)]
        );
    }

    #[test]
    fn crossing_outside_the_segment_span_is_ignored_when_bounded() {
        let mut bounded = CrossingDetector::new(vec![line(Default::default(), true)]);
        assert!(run(&mut bounded, 500.0, &[80.0, 120.0]).is_empty());

        let mut unbounded = CrossingDetector::new(vec![line(Default::default(), false)]);
        assert_eq!(run(&mut unbounded, 500.0, &[80.0, 120.0]).len(), 1);
    }

    #[test]
    fn tentative_and_unmatched_tracks_are_skipped() {
        let mut d = CrossingDetector::new(vec![line(Default::default(), true)]);

        let mut t = Track::new(ID, 0, &det(50.0, 80.0), ObjectClass::Car, 8);
        t.update(1, &det(50.0, 120.0), ObjectClass::Car, 5, 0.5);
        assert_eq!(t.state, TrackState::Tentative);
        assert!(d.evaluate([&t], 1, 0.0).is_empty());

        // confirmed but evaluated on a frame it was not matched on
        t.state = TrackState::Confirmed;
        assert!(d.evaluate([&t], 2, 0.0).is_empty());
    }

    #[test]
    fn forget_drops_state() {
        let zones = vec![line(Default::default(), true), line(Default::default(), false)];
        let mut d = CrossingDetector::new(zones);
        run(&mut d, 50.0, &[80.0, 90.0]);
        assert_eq!(d.remembered(), 2);

        d.forget(&[ID]);
        assert_eq!(d.remembered(), 0);
    }
}
