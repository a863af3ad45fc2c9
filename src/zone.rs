//! Counting lines and the side-of-line geometry they are tested with.

use crate::bbox::{BBox, Ltrb};
use crate::error::{Error, Result};
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Negative,
    Zero,
    Positive,
}

impl Side {
    #[inline]
    pub fn is_strict(self) -> bool {
        self != Side::Zero
    }

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Negative => Side::Positive,
            Side::Zero => Side::Zero,
            Side::Positive => Side::Negative,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// Which strict side change counts as [`Direction::In`]; the reverse one is `Out`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InDirection {
    #[default]
    NegativeToPositive,
    PositiveToNegative,
}

impl InDirection {
    /// `from` and `to` must be strict and different.
    #[inline]
    pub fn classify(self, from: Side, to: Side) -> Option<Direction> {
        let forward = match (from, to) {
            (Side::Negative, Side::Positive) => true,
            (Side::Positive, Side::Negative) => false,
            _ => return None,
        };

        let is_in = match self {
            InDirection::NegativeToPositive => forward,
            InDirection::PositiveToNegative => !forward,
        };

        Some(if is_in { Direction::In } else { Direction::Out })
    }
}

/// Point of a bounding box tested against the line.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    #[default]
    Center,
    CenterLeft,
    CenterRight,
    TopCenter,
    TopLeft,
    TopRight,
    BottomCenter,
    BottomLeft,
    BottomRight,
}

impl Anchor {
    pub fn point(self, bbox: &BBox<Ltrb>) -> na::Point2<f32> {
        let c = bbox.center();
        let (l, t, r, b) = (bbox.left(), bbox.top(), bbox.right(), bbox.bottom());

        match self {
            Anchor::Center => c,
            Anchor::CenterLeft => na::Point2::new(l, c.y),
            Anchor::CenterRight => na::Point2::new(r, c.y),
            Anchor::TopCenter => na::Point2::new(c.x, t),
            Anchor::TopLeft => na::Point2::new(l, t),
            Anchor::TopRight => na::Point2::new(r, t),
            Anchor::BottomCenter => na::Point2::new(c.x, b),
            Anchor::BottomLeft => na::Point2::new(l, b),
            Anchor::BottomRight => na::Point2::new(r, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub start: na::Point2<f32>,
    pub end: na::Point2<f32>,
    pub anchor: Anchor,
    pub in_direction: InDirection,
    /// Count only crossings whose anchor projects onto the segment span.
    pub bounded: bool,
}

impl Zone {
    pub fn new(start: na::Point2<f32>, end: na::Point2<f32>) -> Result<Self> {
        Self::with_policy(start, end, Anchor::default(), InDirection::default(), true)
    }

    pub fn with_policy(
        start: na::Point2<f32>,
        end: na::Point2<f32>,
        anchor: Anchor,
        in_direction: InDirection,
        bounded: bool,
    ) -> Result<Self> {
        if start == end {
            return Err(Error::DegenerateZone { index: 0 });
        }

        if !(start.coords.iter().chain(end.coords.iter())).all(|v| v.is_finite()) {
            return Err(Error::config("zone coordinates must be finite"));
        }

        Ok(Self {
            start,
            end,
            anchor,
            in_direction,
            bounded,
        })
    }

    #[inline]
    pub fn anchor_of(&self, bbox: &BBox<Ltrb>) -> na::Point2<f32> {
        self.anchor.point(bbox)
    }

    /// Sign of `(end - start) x (point - start)`.
    pub fn side_of(&self, point: &na::Point2<f32>) -> Side {
        let d = self.end - self.start;
        let p = *point - self.start;
        let cross = d.x * p.y - d.y * p.x;

        if cross > 0.0 {
            Side::Positive
        } else if cross < 0.0 {
            Side::Negative
        } else {
            Side::Zero
        }
    }

    /// True when the point lies between the perpendiculars through both endpoints.
    pub fn within_span(&self, point: &na::Point2<f32>) -> bool {
        let d = self.end - self.start;
        let t = (*point - self.start).dot(&d) / d.norm_squared();

        (0.0..=1.0).contains(&t)
    }

    #[inline]
    pub fn classify(&self, from: Side, to: Side) -> Option<Direction> {
        self.in_direction.classify(from, to)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ZoneSpec {
    pub start: [f32; 2],
    pub end: [f32; 2],
    #[serde(default)]
    pub anchor: Anchor,
    #[serde(default)]
    pub in_direction: InDirection,
    #[serde(default = "default_bounded")]
    pub bounded: bool,
}

fn default_bounded() -> bool {
    true
}

/// One zone entry: a bare point list (first two points form the line) or a full spec.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum ZoneEntry {
    Points(Vec<[f32; 2]>),
    Spec(ZoneSpec),
}

impl ZoneEntry {
    fn into_zone(self, index: usize) -> Result<Zone> {
        let spec = match self {
            ZoneEntry::Points(points) => {
                if points.len() < 2 {
                    return Err(Error::config(format!(
                        "zone #{} needs at least two points, got {}",
                        index,
                        points.len()
                    )));
                }

                ZoneSpec {
                    start: points[0],
                    end: points[1],
                    anchor: Anchor::default(),
                    in_direction: InDirection::default(),
                    bounded: default_bounded(),
                }
            }
            ZoneEntry::Spec(spec) => spec,
        };

        Zone::with_policy(
            na::Point2::new(spec.start[0], spec.start[1]),
            na::Point2::new(spec.end[0], spec.end[1]),
            spec.anchor,
            spec.in_direction,
            spec.bounded,
        )
        .map_err(|err| match err {
            Error::DegenerateZone { .. } => Error::DegenerateZone { index },
            other => other,
        })
    }
}

pub fn parse_zones(src: &str) -> Result<Vec<Zone>> {
    let entries: Vec<ZoneEntry> = serde_json::from_str(src)
        .map_err(|e| Error::config(format!("malformed zone configuration: {}", e)))?;

    if entries.is_empty() {
        return Err(Error::config("zone configuration contains no zones"));
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| entry.into_zone(idx))
        .collect()
}

pub fn load_zones<P: AsRef<Path>>(path: P) -> Result<Vec<Zone>> {
    let path = path.as_ref();
    let src = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "cannot read zone configuration {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_zones(&src)
}
