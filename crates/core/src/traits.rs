use crate::SearchError;

/// A search hit: row position inside the index and its inner-product score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub score: f32,
}

/// Read-only nearest-neighbour search over normalized vectors. Implementations
/// keep no per-query state, so one index can serve concurrent requests.
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best `k` rows by descending score. Returns fewer only when the index
    /// holds fewer than `k` rows.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, SearchError>;
}

/// Drops hits that do not address a stored chunk. Backends that pad their
/// output with `-1` sentinels surface them here as positions past `rows`;
/// non-finite scores are dropped too.
pub(crate) fn valid_neighbors(raw: Vec<Neighbor>, rows: usize) -> Vec<Neighbor> {
    raw.into_iter()
        .filter(|neighbor| neighbor.position < rows && neighbor.score.is_finite())
        .collect()
}
