//! Exhaustive nearest-neighbour index over fixed-dimension `f32` vectors.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    L2,
}

impl DistanceMetric {
    pub fn eval(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| {
                    let d = x - y;
                    d * d
                })
                .sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub distance: f32,
}

fn by_distance_then_row(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.row.cmp(&b.row))
}

/// Append-only vector table. Row `i` is the `i`-th inserted vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    metric: DistanceMetric,
    count: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> RagResult<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidInput(
                "vector dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            metric: DistanceMetric::L2,
            count: 0,
            data: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        if row >= self.count {
            return None;
        }
        let start = row * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    fn check_dimension(&self, vector: &[f32]) -> RagResult<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Appends a vector and returns its row position.
    pub fn insert(&mut self, vector: &[f32]) -> RagResult<usize> {
        self.check_dimension(vector)?;
        self.data.extend_from_slice(vector);
        let row = self.count;
        self.count += 1;
        Ok(row)
    }

    /// Returns the `k` nearest rows, nearest first; equal distances keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> RagResult<Vec<Neighbor>> {
        self.check_dimension(vector)?;
        if self.is_empty() {
            return Err(RagError::EmptyIndex);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, stored)| Neighbor {
                row,
                distance: self.metric.eval(stored, vector),
            })
            .collect();

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance_then_row);
            scored.truncate(k);
        }
        scored.sort_by(by_distance_then_row);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> RagResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes an index and checks the header against the payload.
    pub fn from_bytes(bytes: &[u8]) -> RagResult<Self> {
        let index: VectorIndex = bincode::deserialize(bytes)?;
        if index.dimension == 0 || index.data.len() != index.count * index.dimension {
            return Err(RagError::InvalidInput(format!(
                "index header claims {} rows of dimension {} but holds {} values",
                index.count,
                index.dimension,
                index.data.len()
            )));
        }
        Ok(index)
    }
}
