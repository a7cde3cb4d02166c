//! Append-only vector store abstraction.
//!
//! Stores only support appending, reconstructing by position, top-k search
//! and counting. There is no in-place update or delete: the mutation layer
//! emulates both by building a fresh store and swapping it in.

use crate::types::Metric;
use kbvec_core::{AppError, AppResult};

/// One search hit: raw score and store position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub score: f32,
    pub position: usize,
}

/// Trait for vector store backends.
///
/// Positions are assigned densely in append order, starting at zero.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    /// Metric used to score neighbors.
    fn metric(&self) -> Metric;

    /// Fixed vector dimension.
    fn dimension(&self) -> usize;

    /// Append a vector, returning its position.
    fn add(&mut self, vector: &[f32]) -> AppResult<usize>;

    /// Append vectors in order. Validates every vector before writing any.
    fn add_batch(&mut self, vectors: &[Vec<f32>]) -> AppResult<()> {
        for vector in vectors {
            check_vector(self.dimension(), vector)?;
        }
        for vector in vectors {
            self.add(vector)?;
        }
        Ok(())
    }

    /// Copy out the vector stored at `position`.
    fn reconstruct(&self, position: usize) -> AppResult<Vec<f32>>;

    /// Top-k neighbors of `query`, best first.
    fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<Neighbor>>;

    /// Number of stored vectors.
    fn count(&self) -> usize;

    /// A new, empty store of the same flavor and dimension.
    fn empty_like(&self) -> Box<dyn VectorIndex>;
}

/// Brute-force store keeping every vector in one contiguous buffer.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty flat store.
    pub fn new(metric: Metric, dimension: usize) -> AppResult<Self> {
        if dimension == 0 {
            return Err(AppError::Index(
                "Vector dimension must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            metric,
            dimension,
            data: Vec::new(),
        })
    }

    fn row(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.data[start..start + self.dimension]
    }

    fn score(&self, query: &[f32], position: usize) -> f32 {
        let row = self.row(position);
        match self.metric {
            Metric::InnerProduct => dot(query, row),
            Metric::L2 => squared_l2(query, row),
        }
    }
}

impl VectorIndex for FlatIndex {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn add(&mut self, vector: &[f32]) -> AppResult<usize> {
        check_vector(self.dimension, vector)?;
        let position = self.count();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    fn reconstruct(&self, position: usize) -> AppResult<Vec<f32>> {
        if position >= self.count() {
            return Err(AppError::Index(format!(
                "Position {} out of range (count {})",
                position,
                self.count()
            )));
        }
        Ok(self.row(position).to_vec())
    }

    fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<Neighbor>> {
        check_vector(self.dimension, query)?;

        let mut results: Vec<Neighbor> = (0..self.count())
            .map(|position| Neighbor {
                score: self.score(query, position),
                position,
            })
            .collect();

        // Best first; equal scores keep the lower position first
        results.sort_by(|a, b| {
            self.metric
                .compare(a.score, b.score)
                .then(a.position.cmp(&b.position))
        });
        results.truncate(k);

        Ok(results)
    }

    fn count(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn empty_like(&self) -> Box<dyn VectorIndex> {
        Box::new(Self {
            metric: self.metric,
            dimension: self.dimension,
            data: Vec::new(),
        })
    }
}

/// Reject vectors of the wrong length or with NaN or infinite components.
pub fn check_vector(expected: usize, vector: &[f32]) -> AppResult<()> {
    check_dimension(expected, vector)?;
    if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
        return Err(AppError::Index(format!(
            "Vector component {} is not finite ({})",
            index, vector[index]
        )));
    }
    Ok(())
}

/// Reject vectors whose length differs from the store dimension.
pub fn check_dimension(expected: usize, vector: &[f32]) -> AppResult<()> {
    if vector.len() != expected {
        return Err(AppError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assigns_dense_positions() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 3).unwrap();
        assert_eq!(index.add(&[1.0, 0.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[0.0, 1.0, 0.0]).unwrap(), 1);
        assert_eq!(index.count(), 2);
        assert_eq!(index.reconstruct(1).unwrap(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_reconstruct_out_of_range() {
        let index = FlatIndex::new(Metric::InnerProduct, 2).unwrap();
        assert!(index.reconstruct(0).is_err());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 3).unwrap();
        let err = index.add(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn test_non_finite_vectors_rejected() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 2).unwrap();
        assert!(matches!(index.add(&[f32::NAN, 0.0]), Err(AppError::Index(_))));
        assert!(matches!(index.add(&[f32::INFINITY, 0.0]), Err(AppError::Index(_))));
        assert_eq!(index.count(), 0);

        index.add(&[1.0, 0.0]).unwrap();
        assert!(index.search(&[f32::NAN, 1.0], 1).is_err());
        assert!(index
            .add_batch(&[vec![0.0, 1.0], vec![f32::NEG_INFINITY, 0.0]])
            .is_err());
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_add_batch_is_all_or_nothing() {
        let mut index = FlatIndex::new(Metric::L2, 2).unwrap();
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        assert!(index.add_batch(&vectors).is_err());
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn test_inner_product_search_order() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 2).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.6, 0.8]).unwrap();

        let results = index.search(&[1.0, 0.0], 5).unwrap();
        let positions: Vec<usize> = results.iter().map(|n| n.position).collect();
        assert_eq!(positions, vec![1, 2, 0]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_search_order_and_truncation() {
        let mut index = FlatIndex::new(Metric::L2, 2).unwrap();
        index.add(&[5.0, 5.0]).unwrap();
        index.add(&[1.0, 1.0]).unwrap();
        index.add(&[0.0, 0.0]).unwrap();

        let results = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].position, 2);
        assert_eq!(results[0].score, 0.0);
        assert_eq!(results[1].position, 1);
        assert!((results[1].score - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_prefer_lower_position() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 2).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        let results = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].position, 0);
        assert_eq!(results[1].position, 1);
    }

    #[test]
    fn test_empty_like_keeps_flavor() {
        let mut index = FlatIndex::new(Metric::L2, 4).unwrap();
        index.add(&[0.0; 4]).unwrap();
        let fresh = index.empty_like();
        assert_eq!(fresh.count(), 0);
        assert_eq!(fresh.metric(), Metric::L2);
        assert_eq!(fresh.dimension(), 4);
    }

    #[test]
    fn test_normalize_l2() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize_l2(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
