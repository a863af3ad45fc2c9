//! Two-pass, confidence gated IoU association of detections into tracks.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::bbox::{BBox, Ltrb};
use crate::class::{ClassMap, ObjectClass};
use crate::detection::Detection;
use crate::error::{Error, Result};
use crate::matching::{Matcher, OverlapMatrix};
use crate::track::{Track, TrackId, TrackSnapshot, TrackState};

use serde_derive::{Deserialize, Serialize};
use tracing::{debug, trace};

static SEQ_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Detections at or above this confidence take part in the first pass (default: 0.5)
    pub high_threshold: f32,
    /// Detections below this confidence are discarded (default: 0.1)
    pub low_threshold: f32,
    /// Minimum IoU between a predicted track box and a detection (default: 0.8)
    pub match_iou_threshold: f32,
    /// Consecutive matches promoting Tentative to Confirmed (default: 2)
    pub min_hits: u32,
    /// Frames without a match after which a track is removed (default: 30)
    pub max_time_lost: u32,
    /// Matched boxes kept per track (default: 16)
    pub history_len: usize,
    /// Weight of the previous velocity estimate (default: 0.5)
    pub velocity_smoothing: f32,
    pub matcher: Matcher,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.5,
            low_threshold: 0.1,
            match_iou_threshold: 0.8,
            min_hits: 2,
            max_time_lost: 30,
            history_len: 16,
            velocity_smoothing: 0.5,
            matcher: Matcher::Greedy,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0f32..=1.0;

        if !unit.contains(&self.low_threshold)
            || !unit.contains(&self.high_threshold)
            || self.low_threshold > self.high_threshold
        {
            return Err(Error::config(format!(
                "confidence thresholds must satisfy 0 <= low ({}) <= high ({}) <= 1",
                self.low_threshold, self.high_threshold
            )));
        }

        if !(self.match_iou_threshold > 0.0 && self.match_iou_threshold <= 1.0) {
            return Err(Error::config(format!(
                "match_iou_threshold must be in (0, 1], got {}",
                self.match_iou_threshold
            )));
        }

        if self.min_hits == 0 || self.max_time_lost == 0 {
            return Err(Error::config("min_hits and max_time_lost must be positive"));
        }

        if self.history_len < 2 {
            return Err(Error::config("history_len must be at least 2"));
        }

        if !unit.contains(&self.velocity_smoothing) {
            return Err(Error::config("velocity_smoothing must be in [0, 1]"));
        }

        Ok(())
    }
}

/// Identity changes produced by one [`Tracker::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerUpdate {
    pub created: Vec<TrackId>,
    pub removed: Vec<TrackId>,
}

struct Candidate<'a> {
    det: &'a Detection,
    class: ObjectClass,
}

pub struct Tracker {
    config: TrackerConfig,
    class_map: ClassMap,
    tracks: Vec<Track>,
    frame: u64,
    total_created: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig, class_map: ClassMap) -> Result<Self> {
        config.validate()?;

        if class_map.is_empty() {
            return Err(Error::config("class map is empty"));
        }

        Ok(Self {
            config,
            class_map,
            tracks: Vec::with_capacity(64),
            frame: 0,
            total_created: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn next_id() -> TrackId {
        SEQ_ID.fetch_add(1, Ordering::SeqCst)
    }

    pub fn update(&mut self, frame: u64, detections: &[Detection]) -> Result<TrackerUpdate> {
        let mut high = Vec::new();
        let mut low = Vec::new();

        for det in detections {
            let class = match self.class_map.get(det.class) {
                Some(class) => class,
                None => {
                    trace!(class = det.class, "detection of unmapped class dropped");
                    continue;
                }
            };

            if det.confidence >= self.config.high_threshold {
                high.push(Candidate { det, class });
            } else if det.confidence >= self.config.low_threshold {
                low.push(Candidate { det, class });
            }
        }

        // both passes must be solvable before any track is touched
        let matcher = self.config.matcher;
        let recoverable = self.tracks.iter().filter(|t| t.was_confirmed()).count();
        matcher.check_size(self.tracks.len(), high.len())?;
        matcher.check_size(recoverable, low.len())?;

        self.frame = frame;

        for t in &mut self.tracks {
            t.predict();
        }

        let mut matched = vec![false; self.tracks.len()];

        // first pass: every live track against confident detections
        let pool: Vec<usize> = (0..self.tracks.len()).collect();
        let (rest, unmatched_high) = self.associate(frame, &pool, &high, &mut matched)?;

        // second pass: confirmed and lost leftovers against weak detections
        let rest: Vec<usize> = rest
            .into_iter()
            .filter(|&i| self.tracks[i].was_confirmed())
            .collect();
        self.associate(frame, &rest, &low, &mut matched)?;

        let mut update = TrackerUpdate::default();

        for (t, _) in self.tracks.iter_mut().zip(&matched).filter(|(_, m)| !**m) {
            t.mark_missed();

            if t.time_since_update >= self.config.max_time_lost {
                t.mark_removed();
            }

            if t.is_removed() {
                debug!(id = t.id, frames = t.time_since_update, "track removed");
                update.removed.push(t.id);
            }
        }

        self.tracks.retain(|t| !t.is_removed());

        for idx in unmatched_high {
            let c = &high[idx];
            let mut track = Track::new(
                Self::next_id(),
                frame,
                c.det,
                c.class,
                self.config.history_len,
            );

            if self.config.min_hits <= 1 {
                track.state = TrackState::Confirmed;
            }

            debug!(id = track.id, class = %c.class, "track created");
            update.created.push(track.id);
            self.total_created += 1;
            self.tracks.push(track);
        }

        Ok(update)
    }

    /// Matches `pool` tracks against `dets`, updates the matched ones and returns
    /// the unmatched track and detection indexes.
    fn associate(
        &mut self,
        frame: u64,
        pool: &[usize],
        dets: &[Candidate<'_>],
        matched: &mut [bool],
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        let track_boxes: Vec<BBox<Ltrb>> = pool.iter().map(|&i| self.tracks[i].predicted).collect();
        let det_boxes: Vec<BBox<Ltrb>> = dets.iter().map(|c| c.det.ltrb()).collect();

        let overlap = OverlapMatrix::iou(&track_boxes, &det_boxes);
        let assignment = self
            .config
            .matcher
            .assign(&overlap, self.config.match_iou_threshold)?;

        for &(r, c, score) in &assignment.matches {
            let idx = pool[r];
            let cand = &dets[c];

            trace!(id = self.tracks[idx].id, iou = score, "track matched");
            self.tracks[idx].update(
                frame,
                cand.det,
                cand.class,
                self.config.min_hits,
                self.config.velocity_smoothing,
            );
            matched[idx] = true;
        }

        let rest = assignment.unmatched_rows.iter().map(|&r| pool[r]).collect();

        Ok((rest, assignment.unmatched_cols))
    }

    /// Frame lost upstream: nothing is matched or created. Tracks keep their
    /// state and are only removed once they reach `max_time_lost`.
    pub fn skip_frame(&mut self, frame: u64) -> TrackerUpdate {
        self.frame = frame;

        let mut update = TrackerUpdate::default();

        for t in &mut self.tracks {
            t.mark_skipped();

            if t.time_since_update >= self.config.max_time_lost {
                t.mark_removed();
                debug!(id = t.id, frames = t.time_since_update, "track removed");
                update.removed.push(t.id);
            }
        }

        self.tracks.retain(|t| !t.is_removed());

        update
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[inline]
    pub fn confirmed(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_confirmed())
    }

    #[inline]
    pub fn total_created(&self) -> u64 {
        self.total_created
    }

    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn car(x: f32, y: f32, p: f32) -> Detection {
        Detection::new(x, y, 40.0, 40.0, p, 1)
    }

    fn tracker(config: TrackerConfig) -> Tracker {
        Tracker::new(config, ClassMap::identity()).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = [
            TrackerConfig {
                low_threshold: 0.6,
                high_threshold: 0.5,
                ..Default::default()
            },
            TrackerConfig {
                match_iou_threshold: 0.0,
                ..Default::default()
            },
            TrackerConfig {
                max_time_lost: 0,
                ..Default::default()
            },
        ];

        for config in bad {
            let err = Tracker::new(config, ClassMap::identity()).err().unwrap();
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn keeps_identity_of_a_moving_object() {
        let mut tr = tracker(TrackerConfig::default());

        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        let id = tr.tracks()[0].id;
        assert_eq!(tr.tracks()[0].state, TrackState::Tentative);

        for f in 1..10u64 {
            tr.update(f, &[car(100.0 + 2.0 * f as f32, 100.0, 0.9)]).unwrap();
            assert_eq!(tr.tracks().len(), 1);
            assert_eq!(tr.tracks()[0].id, id);
        }

        assert_eq!(tr.tracks()[0].state, TrackState::Confirmed);
        assert_eq!(tr.total_created(), 1);
    }

    #[test]
    fn low_confidence_detections_recover_tracks_but_never_create_them() {
        let mut tr = tracker(TrackerConfig::default());

        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        tr.update(1, &[car(100.0, 100.0, 0.9)]).unwrap();
        let id = tr.tracks()[0].id;

        // occluded: only a weak detection
        tr.update(2, &[car(100.0, 100.0, 0.2)]).unwrap();
        assert_eq!(tr.tracks()[0].id, id);
        assert_eq!(tr.tracks()[0].state, TrackState::Confirmed);
        assert_eq!(tr.tracks()[0].time_since_update, 0);

        // a weak detection elsewhere creates nothing
        tr.update(3, &[car(100.0, 100.0, 0.9), car(400.0, 400.0, 0.3)]).unwrap();
        assert_eq!(tr.tracks().len(), 1);

        // below the low threshold it is discarded entirely
        tr.update(4, &[car(100.0, 100.0, 0.05)]).unwrap();
        assert_eq!(tr.tracks()[0].state, TrackState::Lost);
    }

    #[test]
    fn tentative_tracks_are_not_recovered_by_weak_detections() {
        let mut tr = tracker(TrackerConfig::default());

        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        let up = tr.update(1, &[car(100.0, 100.0, 0.2)]).unwrap();

        assert_eq!(up.removed.len(), 1);
        assert!(tr.tracks().is_empty());
    }

    #[test]
    fn removal_threshold_boundary() {
        let config = TrackerConfig {
            max_time_lost: 5,
            ..Default::default()
        };

        let confirmed = |tr: &mut Tracker| {
            tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
            tr.update(1, &[car(100.0, 100.0, 0.9)]).unwrap();
            assert!(tr.tracks()[0].is_confirmed());
        };

        // one frame short of the threshold: survives as lost
        let mut tr = tracker(config.clone());
        confirmed(&mut tr);
        for f in 2..6u64 {
            tr.update(f, &[]).unwrap();
        }
        assert_eq!(tr.tracks().len(), 1);
        assert_eq!(tr.tracks()[0].time_since_update, 4);
        assert_eq!(tr.tracks()[0].state, TrackState::Lost);

        // exactly the threshold: evicted
        let mut tr = tracker(config);
        confirmed(&mut tr);
        let id = tr.tracks()[0].id;
        let mut removed = Vec::new();
        for f in 2..7u64 {
            removed.extend(tr.update(f, &[]).unwrap().removed);
        }
        assert!(tr.tracks().is_empty());
        assert_eq!(removed, vec![id]);
    }

    #[test]
    fn lost_track_is_recovered_within_threshold() {
        let mut tr = tracker(TrackerConfig::default());

        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        tr.update(1, &[car(100.0, 100.0, 0.9)]).unwrap();
        let id = tr.tracks()[0].id;

        for f in 2..8u64 {
            tr.update(f, &[]).unwrap();
        }
        assert_eq!(tr.tracks()[0].state, TrackState::Lost);

        tr.update(8, &[car(100.0, 100.0, 0.9)]).unwrap();
        assert_eq!(tr.tracks().len(), 1);
        assert_eq!(tr.tracks()[0].id, id);
        assert_eq!(tr.tracks()[0].state, TrackState::Confirmed);
    }

    #[test]
    fn weak_second_detection_becomes_a_new_tentative_track() {
        let mut tr = tracker(TrackerConfig::default());

        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        tr.update(1, &[car(100.0, 100.0, 0.9)]).unwrap();
        let id = tr.tracks()[0].id;

        for f in 2..7u64 {
            // first box overlaps the track almost fully, second only by half
            let dets = [car(100.0, 100.0, 0.9), car(120.0, 100.0, 0.9)];
            let up = tr.update(f, &dets).unwrap();

            let confirmed: Vec<_> = tr.confirmed().map(|t| t.id).collect();
            assert!(confirmed.contains(&id));

            if f == 2 {
                assert_eq!(up.created.len(), 1);
                let other = tr.tracks().iter().find(|t| t.id != id).unwrap();
                assert_eq!(other.state, TrackState::Tentative);
            } else {
                assert!(up.created.is_empty());
            }
        }

        assert_eq!(tr.tracks().len(), 2);
        let ids: HashSet<_> = tr.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut tr = tracker(TrackerConfig {
            max_time_lost: 2,
            ..Default::default()
        });

        let mut seen = HashSet::new();
        let mut created = 0;

        for f in 0..40u64 {
            // objects blink in and out at shifting places
            let dets: Vec<_> = (0..3)
                .filter(|k| (f + k) % 3 != 0)
                .map(|k| car(100.0 + 200.0 * k as f32 + (f % 5) as f32 * 30.0, 100.0, 0.9))
                .collect();

            let up = tr.update(f, &dets).unwrap();
            for id in &up.created {
                assert!(seen.insert(*id), "id {} reused", id);
            }
            created += up.created.len() as u64;

            let live: HashSet<_> = tr.tracks().iter().map(|t| t.id).collect();
            assert_eq!(live.len(), tr.tracks().len());
        }

        assert_eq!(seen.len() as u64, created);
        assert_eq!(tr.total_created(), created);
    }

    #[test]
    fn unmapped_classes_are_ignored() {
        let mut tr = tracker(TrackerConfig::default());
        tr.update(0, &[Detection::new(10.0, 10.0, 5.0, 5.0, 0.9, 42)]).unwrap();
        assert!(tr.tracks().is_empty());
    }

    #[test]
    fn skipped_frames_only_age_tracks() {
        let mut tr = tracker(TrackerConfig::default());
        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        tr.update(1, &[car(100.0, 100.0, 0.9)]).unwrap();

        let before = tr.tracks()[0].clone();
        tr.skip_frame(2);

        let after = &tr.tracks()[0];
        assert_eq!(after.state, before.state);
        assert_eq!(after.bbox, before.bbox);
        assert_eq!(after.history.len(), before.history.len());
        assert_eq!(after.time_since_update, 1);

        tr.update(3, &[car(100.0, 100.0, 0.9)]).unwrap();
        assert_eq!(tr.tracks()[0].id, before.id);
        assert_eq!(tr.tracks()[0].time_since_update, 0);
    }

    #[test]
    fn skipped_frames_evict_at_the_threshold() {
        let config = TrackerConfig {
            min_hits: 1,
            max_time_lost: 5,
            ..Default::default()
        };

        // one short of the threshold: the track is picked up again
        let mut tr = tracker(config.clone());
        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        let id = tr.tracks()[0].id;
        for f in 1..5u64 {
            assert!(tr.skip_frame(f).removed.is_empty());
        }
        tr.update(5, &[car(100.0, 100.0, 0.9)]).unwrap();
        assert_eq!(tr.tracks()[0].id, id);

        // at the threshold: removed, and the object comes back under a new id
        let mut tr = tracker(config);
        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        let id = tr.tracks()[0].id;
        let mut removed = Vec::new();
        for f in 1..6u64 {
            removed.extend(tr.skip_frame(f).removed);
        }
        assert_eq!(removed, vec![id]);
        assert!(tr.tracks().is_empty());

        let up = tr.update(6, &[car(100.0, 100.0, 0.9)]).unwrap();
        assert_eq!(up.created.len(), 1);
        assert_ne!(tr.tracks()[0].id, id);
    }

    #[test]
    fn oversized_association_leaves_tracks_untouched() {
        let mut tr = tracker(TrackerConfig {
            min_hits: 1,
            matcher: Matcher::Hungarian,
            ..Default::default()
        });

        tr.update(0, &[car(100.0, 100.0, 0.9)]).unwrap();
        let before = tr.tracks()[0].clone();

        // the confident pass is small, the weak pass is not
        let mut dets = vec![car(100.0, 100.0, 0.9)];
        dets.extend((0..300).map(|i| car(1000.0 + 50.0 * i as f32, 1000.0, 0.2)));
        assert!(tr.update(1, &dets).is_err());

        let after = &tr.tracks()[0];
        assert_eq!(after.id, before.id);
        assert_eq!(after.state, before.state);
        assert_eq!(after.hits, before.hits);
        assert_eq!(after.last_frame, before.last_frame);
        assert_eq!(after.time_since_update, 0);
        assert_eq!(after.predicted, before.predicted);
    }

    #[test]
    fn hungarian_matcher_tracks_as_well() {
        let mut tr = tracker(TrackerConfig {
            matcher: Matcher::Hungarian,
            ..Default::default()
        });

        for f in 0..5u64 {
            let x = f as f32;
            tr.update(f, &[car(100.0 + x, 100.0, 0.9), car(300.0 - x, 100.0, 0.8)])
                .unwrap();
        }

        assert_eq!(tr.tracks().len(), 2);
        assert_eq!(tr.confirmed().count(), 2);
        assert_eq!(tr.total_created(), 2);
    }
}
