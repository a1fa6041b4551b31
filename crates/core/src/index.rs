use crate::traits::{Neighbor, VectorIndex};
use crate::SearchError;
use serde::{Deserialize, Serialize};

/// Exact inner-product index. Rows are stored back to back in insertion
/// order; row `i` always belongs to chunk `i`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatIpIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    pub fn new(dimension: usize) -> Result<Self, SearchError> {
        if dimension == 0 {
            return Err(SearchError::Request(
                "index dimension must be positive".to_string(),
            ));
        }

        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    pub fn from_vectors(dimension: usize, vectors: &[Vec<f32>]) -> Result<Self, SearchError> {
        let mut index = Self::new(dimension)?;
        index.data.reserve(dimension * vectors.len());
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                query: vector.len(),
                index: self.dimension,
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        self.data.chunks_exact(self.dimension).nth(position)
    }
}

impl VectorIndex for FlatIpIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, SearchError> {
        if query.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                query: query.len(),
                index: self.dimension,
            });
        }

        let mut scored = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                score: row.iter().zip(query).map(|(left, right)| left * right).sum(),
            })
            .collect::<Vec<_>>();

        // stable: equal scores keep row order
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);
        Ok(scored)
    }
}
