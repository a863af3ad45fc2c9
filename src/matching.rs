use crate::bbox::{BBox, Ltrb};
use crate::error::{Error, Result};
use munkres::{solve_assignment, WeightMatrix};
use serde_derive::{Deserialize, Serialize};

const MAX_HUNGARIAN_SIZE: usize = 256;
const PADDING_COST: f32 = 100000.0;
const REJECTED_COST: f32 = 1000.0;

/// Row-major `rows x cols` overlap scores, rows are tracks and columns detections.
#[derive(Debug, Clone)]
pub struct OverlapMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl OverlapMatrix {
    pub fn iou(tracks: &[BBox<Ltrb>], dets: &[BBox<Ltrb>]) -> Self {
        let mut data = Vec::with_capacity(tracks.len() * dets.len());

        for t in tracks {
            data.extend(dets.iter().map(|d| t.iou(d)));
        }

        Self {
            rows: tracks.len(),
            cols: dets.len(),
            data,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// `(row, col, overlap)`, sorted by row.
    pub matches: Vec<(usize, usize, f32)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
}

impl Assignment {
    fn from_matches(mut matches: Vec<(usize, usize, f32)>, rows: usize, cols: usize) -> Self {
        matches.sort_by_key(|&(r, _, _)| r);

        let mut row_used = vec![false; rows];
        let mut col_used = vec![false; cols];
        for &(r, c, _) in &matches {
            row_used[r] = true;
            col_used[c] = true;
        }

        Self {
            matches,
            unmatched_rows: (0..rows).filter(|&r| !row_used[r]).collect(),
            unmatched_cols: (0..cols).filter(|&c| !col_used[c]).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Matcher {
    /// Highest overlap first; ties go to the lowest track then detection index.
    #[default]
    Greedy,
    /// Optimal bipartite matching on `1 - overlap`.
    Hungarian,
}

impl Matcher {
    /// Fails if a `rows x cols` problem is too large for this matcher.
    pub fn check_size(self, rows: usize, cols: usize) -> Result<()> {
        match self {
            Matcher::Hungarian if rows > 0 && cols > 0 && rows.max(cols) > MAX_HUNGARIAN_SIZE => {
                Err(Error::Assignment(format!(
                    "confusion matrix is too big: {}x{}",
                    rows, cols
                )))
            }
            _ => Ok(()),
        }
    }

    /// Pairs below `threshold` are never matched.
    pub fn assign(self, overlap: &OverlapMatrix, threshold: f32) -> Result<Assignment> {
        let matches = if overlap.is_empty() {
            Vec::new()
        } else {
            match self {
                Matcher::Greedy => greedy(overlap, threshold),
                Matcher::Hungarian => hungarian(overlap, threshold)?,
            }
        };

        Ok(Assignment::from_matches(
            matches,
            overlap.rows(),
            overlap.cols(),
        ))
    }
}

fn greedy(overlap: &OverlapMatrix, threshold: f32) -> Vec<(usize, usize, f32)> {
    let mut candidates = Vec::new();
    for r in 0..overlap.rows() {
        for c in 0..overlap.cols() {
            let score = overlap.get(r, c);
            if score >= threshold {
                candidates.push((r, c, score));
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then(a.0.cmp(&b.0))
            .then(a.1.cmp(&b.1))
    });

    let mut row_used = vec![false; overlap.rows()];
    let mut col_used = vec![false; overlap.cols()];
    let mut matches = Vec::new();

    for (r, c, score) in candidates {
        if row_used[r] || col_used[c] {
            continue;
        }

        row_used[r] = true;
        col_used[c] = true;
        matches.push((r, c, score));
    }

    matches
}

fn hungarian(overlap: &OverlapMatrix, threshold: f32) -> Result<Vec<(usize, usize, f32)>> {
    Matcher::Hungarian.check_size(overlap.rows(), overlap.cols())?;
    let n = overlap.rows().max(overlap.cols());

    let mut mat = WeightMatrix::from_fn(n, |(r, c)| {
        if r < overlap.rows() && c < overlap.cols() {
            let score = overlap.get(r, c);

            if score >= threshold {
                1.0 - score
            } else {
                REJECTED_COST
            }
        } else {
            PADDING_COST
        }
    });

    let solution = solve_assignment(&mut mat)
        .map_err(|e| Error::Assignment(format!("assignment could not be solved: {:?}", e)))?;

    Ok(solution
        .into_iter()
        .filter(|p| p.row < overlap.rows() && p.column < overlap.cols())
        .map(|p| (p.row, p.column, overlap.get(p.row, p.column)))
        .filter(|&(_, _, score)| score >= threshold)
        .collect())
}
