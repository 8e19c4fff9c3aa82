//! Top-k nearest-neighbour search over a fixed set of vectors.
//!
//! Results are always ordered by score descending with ties broken by item
//! position ascending, whichever implementation answers the query.

use crate::error::{Result, RetrievalError, check_dimension, check_top_k};
use crate::retrieval::hnsw::{HnswIndex, HnswParams};
use crate::retrieval::similarity::{cosine_with_norms, dot, norm};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    InnerProduct,
}

impl Metric {
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_with_norms(a, norm(a), b, norm(b)),
            Metric::InnerProduct => dot(a, b),
        }
    }
}

/// Stored vectors plus per-vector norms so cosine scoring does not recompute them.
#[derive(Debug, Clone)]
pub(crate) struct VectorSet {
    vectors: Vec<Vec<f32>>,
    norms: Vec<f32>,
    dimension: usize,
    metric: Metric,
}

impl VectorSet {
    /// Fails with `EmptyIndex` for no vectors, `DimensionMismatch` when a vector's
    /// length differs from the first, `InvalidParameter` for non-finite values.
    pub(crate) fn new(vectors: Vec<Vec<f32>>, metric: Metric) -> Result<Self> {
        let dimension = vectors.first().ok_or(RetrievalError::EmptyIndex)?.len();
        for (position, v) in vectors.iter().enumerate() {
            check_dimension(dimension, v.len())?;
            if v.iter().any(|x| !x.is_finite()) {
                return Err(RetrievalError::invalid_parameter(format!(
                    "vector {position} contains a non-finite value"
                )));
            }
        }
        let norms = vectors.iter().map(|v| norm(v)).collect();
        Ok(Self {
            vectors,
            norms,
            dimension,
            metric,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.vectors.len()
    }

    pub(crate) fn dimension(&self) -> usize {
        self.dimension
    }

    pub(crate) fn metric(&self) -> Metric {
        self.metric
    }

    pub(crate) fn vector(&self, position: usize) -> &[f32] {
        &self.vectors[position]
    }

    /// Score of stored item `position` against a query with norm `query_norm`.
    pub(crate) fn score_query(&self, query: &[f32], query_norm: f32, position: usize) -> f32 {
        let v = &self.vectors[position];
        match self.metric {
            Metric::Cosine => cosine_with_norms(query, query_norm, v, self.norms[position]),
            Metric::InnerProduct => dot(query, v),
        }
    }

    /// Score between two stored items.
    pub(crate) fn score_pair(&self, a: usize, b: usize) -> f32 {
        self.score_query(&self.vectors[a], self.norms[a], b)
    }

    pub(crate) fn check_query(&self, query: &[f32], top_k: usize) -> Result<()> {
        check_top_k(top_k)?;
        check_dimension(self.dimension, query.len())
    }

    /// Score every item and keep the best `top_k`.
    pub(crate) fn scan(&self, query: &[f32], top_k: usize) -> Vec<Neighbor> {
        let query_norm = norm(query);
        let scored = (0..self.len()).map(|position| Neighbor {
            position,
            score: self.score_query(query, query_norm, position),
        });
        rank(scored, top_k)
    }
}

/// A search hit: position of the item in build order and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub score: f32,
}

/// Sort by score descending, then position ascending, and keep `top_k`.
///
/// Scores compare numerically, so `-0.0` and `0.0` tie. Stored vectors are
/// finite, which keeps NaN out of the comparison.
pub(crate) fn rank(neighbors: impl IntoIterator<Item = Neighbor>, top_k: usize) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = neighbors.into_iter().collect();
    neighbors.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.position.cmp(&b.position))
    });
    neighbors.truncate(top_k);
    neighbors
}

/// Top-k search over a fixed set of vectors built once up front.
///
/// Implementations agree on result order: score descending, ties broken by
/// the position the vector had in the build input. An exact scan and an
/// approximate graph therefore return identical lists whenever the graph finds
/// every true neighbour.
///
/// # Example
/// ```
/// use querydoc_retriever::retrieval::{ExactIndex, Metric, VectorIndex};
///
/// let index = ExactIndex::build(vec![vec![0.0, 1.0], vec![1.0, 0.0]], Metric::Cosine)?;
/// let hits = index.query(&[1.0, 0.2], 1)?;
/// assert_eq!(hits[0].position, 1);
/// # Ok::<(), querydoc_retriever::RetrievalError>(())
/// ```
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    /// The `top_k` best items, `top_k` clamped to the index size.
    ///
    /// # Arguments
    /// * `query` - Query vector, of the index's dimension
    /// * `top_k` - Number of hits wanted, at least 1
    ///
    /// # Errors
    /// `InvalidParameter` for `top_k == 0`, `DimensionMismatch` for a query of
    /// the wrong length.
    fn query(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>>;
}

/// Linear scan over every vector.
#[derive(Debug, Clone)]
pub struct ExactIndex {
    vectors: VectorSet,
}

impl ExactIndex {
    /// Index `vectors`, scored with `metric` at query time.
    ///
    /// # Arguments
    /// * `vectors` - Items to search, all of one length; a hit's `position` is
    ///   the item's index in this vector
    /// * `metric` - `Cosine` for raw embeddings, `InnerProduct` for vectors that
    ///   are already normalized
    ///
    /// # Errors
    /// `EmptyIndex` for no vectors, `DimensionMismatch` for ragged input and
    /// `InvalidParameter` when a value is NaN or infinite.
    ///
    /// # Example
    /// ```
    /// use querydoc_retriever::retrieval::{ExactIndex, Metric, VectorIndex};
    ///
    /// let index = ExactIndex::build(vec![vec![1.0], vec![3.0]], Metric::InnerProduct)?;
    /// assert_eq!(index.len(), 2);
    /// assert_eq!(index.query(&[1.0], 5)?[0].score, 3.0);
    /// # Ok::<(), querydoc_retriever::RetrievalError>(())
    /// ```
    pub fn build(vectors: Vec<Vec<f32>>, metric: Metric) -> Result<Self> {
        Ok(Self {
            vectors: VectorSet::new(vectors, metric)?,
        })
    }
}

impl VectorIndex for ExactIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    fn metric(&self) -> Metric {
        self.vectors.metric()
    }

    fn query(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        self.vectors.check_query(query, top_k)?;
        Ok(self.vectors.scan(query, top_k))
    }
}

/// Which index implementation a search builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Exact,
    Hnsw(HnswParams),
}

impl IndexKind {
    pub fn validate(&self) -> Result<()> {
        match self {
            IndexKind::Exact => Ok(()),
            IndexKind::Hnsw(params) => params.validate(),
        }
    }
}

/// Build the index `kind` names over `vectors`.
///
/// # Arguments
/// * `kind` - `Exact` for a linear scan, `Hnsw` for a graph with the given parameters
/// * `vectors` - Items to search, all of one length
/// * `metric` - Similarity used to score query against item
///
/// # Errors
/// Those of [`ExactIndex::build`], plus `InvalidParameter` for invalid HNSW parameters.
///
/// # Example
/// ```
/// use querydoc_retriever::retrieval::{HnswParams, IndexKind, Metric, build_index};
///
/// let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]];
/// let index = build_index(&IndexKind::Hnsw(HnswParams::default()), vectors, Metric::Cosine)?;
/// let positions: Vec<usize> = index.query(&[0.0, 1.0], 2)?.iter().map(|n| n.position).collect();
/// assert_eq!(positions, vec![1, 2]);
/// # Ok::<(), querydoc_retriever::RetrievalError>(())
/// ```
pub fn build_index(
    kind: &IndexKind,
    vectors: Vec<Vec<f32>>,
    metric: Metric,
) -> Result<Box<dyn VectorIndex>> {
    Ok(match kind {
        IndexKind::Exact => Box::new(ExactIndex::build(vectors, metric)?),
        IndexKind::Hnsw(params) => Box::new(HnswIndex::build(vectors, metric, params.clone())?),
    })
}
