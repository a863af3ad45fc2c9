use crate::detection::Detection;
use crate::error::{Error, Result};
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub detections: Vec<Detection>,
    pub timestamp: f64, // in seconds
}

impl Frame {
    #[inline]
    pub fn new(index: u64, timestamp: f64, detections: Vec<Detection>) -> Self {
        Self {
            index,
            detections,
            timestamp,
        }
    }

    /// Parses one recorded frame: `<timestamp seconds>:<json array of detections>`.
    pub fn parse_line(index: u64, line: &str) -> Result<Self> {
        let idx = line
            .find(':')
            .ok_or_else(|| Error::Stream("wrong frame format: expected `:`".into()))?;
        let (ts, vector) = line.split_at(idx);

        let timestamp = ts
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::Stream(format!("wrong frame format: timestamp: {}", e)))?;

        let detections = serde_json::from_str(&vector[1..])
            .map_err(|e| Error::Stream(format!("wrong frame format: detections: {}", e)))?;

        Ok(Self::new(index, timestamp, detections))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// What the stream hands the pipeline each tick.
#[derive(Debug, Clone)]
pub enum FrameInput {
    Frame(Frame),
    /// Frame lost to a decode or transport failure.
    Dropped { index: u64, reason: String },
}

impl From<Frame> for FrameInput {
    fn from(frame: Frame) -> Self {
        FrameInput::Frame(frame)
    }
}

impl FrameInput {
    #[inline]
    pub fn index(&self) -> u64 {
        match self {
            FrameInput::Frame(f) => f.index,
            FrameInput::Dropped { index, .. } => *index,
        }
    }

    pub fn from_line(index: u64, line: &str) -> Self {
        match Frame::parse_line(index, line) {
            Ok(frame) => FrameInput::Frame(frame),
            Err(err) => FrameInput::Dropped {
                index,
                reason: err.to_string(),
            },
        }
    }
}

/// One input per non-blank line of a recorded stream; the line number is the
/// frame index. Unreadable or malformed lines become dropped frames.
pub fn read_frames<R: BufRead>(reader: R) -> impl Iterator<Item = FrameInput> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(FrameInput::from_line(i as u64, &line)),
            Err(err) => Some(FrameInput::Dropped {
                index: i as u64,
                reason: err.to_string(),
            }),
        })
}
