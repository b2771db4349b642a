//! Exhaustive squared-L2 nearest-neighbor index.
//!
//! [`FlatL2Index`] stores vectors row-major in one contiguous buffer and
//! compares a query against every row. Rows are addressed by their insertion
//! position, which the engine keeps aligned with the chunk store: row `i` is
//! the embedding of chunk `i`.
//!
//! The only mutations are [`add`](FlatL2Index::add) (append rows) and
//! [`reset`](FlatL2Index::reset) (drop all rows, keep the dimension).

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// One search result: a row index and its squared L2 distance to the query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Neighbor {
    /// Squared Euclidean distance to the query.
    pub distance: f32,
    /// Position of the row in the index.
    pub row: usize,
}

/// A flat (brute-force) L2 index over fixed-dimension vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self { dimension, data: Vec::new() }
    }

    /// The dimensionality of indexed vectors.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        if self.dimension == 0 { 0 } else { self.data.len() / self.dimension }
    }

    /// Returns `true` if the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `vectors` as new rows, in order.
    ///
    /// The call is all-or-nothing: if any vector is rejected no row is added.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if a vector's length differs
    /// from the index dimension, and [`RagError::InvalidArgument`] if a vector
    /// contains a NaN or infinite component.
    pub fn add<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<()> {
        for vector in vectors {
            self.check(vector.as_ref())?;
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector.as_ref());
        }
        Ok(())
    }

    /// Remove every row. The dimension is kept.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// The `k` rows nearest to `query`, by ascending distance.
    ///
    /// `k` is capped at the row count; an empty index yields an empty result.
    /// Equal distances are ordered by row index.
    ///
    /// # Errors
    ///
    /// Same conditions as [`add`](FlatL2Index::add), applied to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check(query)?;
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, vector)| Neighbor { distance: squared_l2(query, vector), row })
            .collect();

        let by_distance =
            |a: &Neighbor, b: &Neighbor| a.distance.total_cmp(&b.distance).then(a.row.cmp(&b.row));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);
        Ok(scored)
    }

    /// Run [`search`](FlatL2Index::search) for each query vector.
    pub fn search_batch<V: AsRef<[f32]>>(
        &self,
        queries: &[V],
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>> {
        queries.iter().map(|query| self.search(query.as_ref(), k)).collect()
    }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::InvalidArgument(
                "vector contains a non-finite component".to_string(),
            ));
        }
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(rows: &[[f32; 2]]) -> FlatL2Index {
        let mut index = FlatL2Index::new(2);
        index.add(rows).unwrap();
        index
    }

    #[test]
    fn add_and_len() {
        let mut index = FlatL2Index::new(3);
        assert!(index.is_empty());
        index.add(&[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]).unwrap();
        assert_eq!(index.len(), 2);
        index.add(&[vec![0.0, 0.0, 1.0]]).unwrap();
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn search_returns_ascending_distances() {
        let index = index_with(&[[0.0, 1.0], [1.0, 0.0], [0.6, 0.8]]);
        let results = index.search(&[1.0, 0.0], 3).unwrap();

        let rows: Vec<usize> = results.iter().map(|n| n.row).collect();
        assert_eq!(rows, vec![1, 2, 0]);
        assert_eq!(results[0].distance, 0.0);
        assert!((results[1].distance - 0.8).abs() < 1e-6);
        assert!((results[2].distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn k_is_capped_at_row_count() {
        let index = index_with(&[[1.0, 0.0]]);
        assert_eq!(index.search(&[1.0, 0.0], 100).unwrap().len(), 1);
    }

    #[test]
    fn partial_selection_keeps_nearest() {
        let index = index_with(&[[5.0, 0.0], [1.0, 0.0], [3.0, 0.0], [2.0, 0.0], [4.0, 0.0]]);
        let rows: Vec<usize> =
            index.search(&[0.0, 0.0], 2).unwrap().iter().map(|n| n.row).collect();
        assert_eq!(rows, vec![1, 3]);
    }

    #[test]
    fn ties_ordered_by_row() {
        let index = index_with(&[[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]]);
        let rows: Vec<usize> =
            index.search(&[1.0, 0.0], 2).unwrap().iter().map(|n| n.row).collect();
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = FlatL2Index::new(2);
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn zero_k_returns_nothing() {
        let index = index_with(&[[1.0, 0.0]]);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn reset_keeps_dimension() {
        let mut index = index_with(&[[1.0, 0.0], [0.0, 1.0]]);
        index.reset();
        assert_eq!(index.len(), 0);
        assert_eq!(index.dimension(), 2);
        index.add(&[[0.5, 0.5]]).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn dimension_mismatch_is_rejected_atomically() {
        let mut index = FlatL2Index::new(2);
        let err = index.add(&[vec![1.0, 0.0], vec![1.0, 0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));
        assert!(index.is_empty());

        let err = index.search(&[1.0], 1).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn non_finite_vectors_rejected() {
        let mut index = FlatL2Index::new(2);
        assert!(index.add(&[[f32::NAN, 0.0]]).is_err());
        assert!(index.search(&[f32::INFINITY, 0.0], 1).is_err());
    }

    #[test]
    fn batch_search_answers_each_query() {
        let index = index_with(&[[1.0, 0.0], [0.0, 1.0]]);
        let results = index.search_batch(&[[1.0, 0.0], [0.0, 1.0]], 1).unwrap();
        assert_eq!(results[0][0].row, 0);
        assert_eq!(results[1][0].row, 1);
    }
}
