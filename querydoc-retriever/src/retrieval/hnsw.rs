//! Hierarchical navigable small world graph for approximate nearest-neighbour search.
//!
//! Each item is assigned a top layer drawn from an exponential distribution
//! (`floor(-ln(U) / ln(m))`) using a seeded RNG, so the same vectors and
//! parameters always produce the same graph. Search descends greedily through
//! the upper layers and runs a beam search of width `ef_search` on layer 0.

use crate::error::{Result, RetrievalError};
use crate::retrieval::similarity::norm;
use crate::retrieval::vector_index::{Metric, Neighbor, VectorIndex, VectorSet, rank};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

const MAX_LEVEL: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Links per node on upper layers; layer 0 allows twice as many
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Seed for level assignment
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            seed: 42,
        }
    }
}

impl HnswParams {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(RetrievalError::invalid_parameter("hnsw m must be at least 2"));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(RetrievalError::invalid_parameter(
                "hnsw ef_construction and ef_search must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    node: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

// Higher score is greater; on equal scores the lower node id is greater so that
// heaps prefer earlier items.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct HnswIndex {
    vectors: VectorSet,
    params: HnswParams,
    /// `layers[level][node]` holds the neighbours of `node` on `level`
    layers: Vec<Vec<Vec<usize>>>,
    entry_point: usize,
    max_level: usize,
}

impl HnswIndex {
    pub fn build(vectors: Vec<Vec<f32>>, metric: Metric, params: HnswParams) -> Result<Self> {
        params.validate()?;
        let vectors = VectorSet::new(vectors, metric)?;
        let n = vectors.len();

        let mut index = Self {
            vectors,
            layers: vec![vec![Vec::new(); n]],
            entry_point: 0,
            max_level: 0,
            params,
        };

        let level_multiplier = 1.0 / (index.params.m as f64).ln();
        let mut rng = StdRng::seed_from_u64(index.params.seed);
        for node in 0..n {
            let uniform: f64 = rng.random();
            // 1 - U lies in (0, 1], so the logarithm is finite
            let level = ((-(1.0 - uniform).ln() * level_multiplier).floor() as usize).min(MAX_LEVEL);
            index.insert(node, level);
        }

        tracing::debug!(
            "Built HNSW index over {} vectors with {} layers",
            n,
            index.max_level + 1
        );
        Ok(index)
    }

    fn insert(&mut self, node: usize, level: usize) {
        let n = self.vectors.len();
        while self.layers.len() <= level {
            self.layers.push(vec![Vec::new(); n]);
        }
        if node == 0 {
            self.entry_point = 0;
            self.max_level = level;
            return;
        }

        let query = self.vectors.vector(node).to_vec();
        let query_norm = norm(&query);
        let mut entry = self.entry_point;

        for layer in (level + 1..=self.max_level).rev() {
            entry = self.greedy_closest(&query, query_norm, entry, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&query, query_norm, entry, self.params.ef_construction, layer);
            let neighbours: Vec<usize> = found
                .iter()
                .map(|c| c.node)
                .filter(|&other| other != node)
                .take(self.params.m)
                .collect();

            let max_links = self.max_links(layer);
            for &other in &neighbours {
                self.layers[layer][other].push(node);
                if self.layers[layer][other].len() > max_links {
                    self.prune(other, layer, max_links);
                }
            }
            self.layers[layer][node] = neighbours;

            if let Some(best) = found.first() {
                entry = best.node;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = node;
        }
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    /// Keep the `max_links` neighbours of `node` closest to it.
    fn prune(&mut self, node: usize, layer: usize, max_links: usize) {
        let mut scored: Vec<Candidate> = self.layers[layer][node]
            .iter()
            .map(|&other| Candidate {
                score: self.vectors.score_pair(node, other),
                node: other,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(max_links);
        self.layers[layer][node] = scored.into_iter().map(|c| c.node).collect();
    }

    fn greedy_closest(&self, query: &[f32], query_norm: f32, entry: usize, layer: usize) -> usize {
        self.search_layer(query, query_norm, entry, 1, layer)
            .first()
            .map(|c| c.node)
            .unwrap_or(entry)
    }

    /// Beam search of width `ef` on one layer. Returns candidates best first.
    fn search_layer(
        &self,
        query: &[f32],
        query_norm: f32,
        entry: usize,
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let start = Candidate {
            score: self.vectors.score_query(query, query_norm, entry),
            node: entry,
        };
        let mut visited = HashSet::from([entry]);
        let mut candidates = BinaryHeap::from([start]);
        let mut results = BinaryHeap::from([Reverse(start)]);

        while let Some(current) = candidates.pop() {
            let Some(Reverse(worst)) = results.peek().copied() else {
                break;
            };
            if current < worst && results.len() >= ef {
                break;
            }

            for &next in &self.layers[layer][current.node] {
                if !visited.insert(next) {
                    continue;
                }
                let candidate = Candidate {
                    score: self.vectors.score_query(query, query_norm, next),
                    node: next,
                };
                let admit = match results.peek() {
                    Some(Reverse(worst)) => results.len() < ef || candidate > *worst,
                    None => true,
                };
                if admit {
                    candidates.push(candidate);
                    results.push(Reverse(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Candidate> = results.into_iter().map(|Reverse(c)| c).collect();
        found.sort_by(|a, b| b.cmp(a));
        found
    }
}

impl VectorIndex for HnswIndex {
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
        let n = self.vectors.len();
        if top_k >= n {
            return Ok(self.vectors.scan(query, n));
        }

        let query_norm = norm(query);
        let mut entry = self.entry_point;
        for layer in (1..=self.max_level).rev() {
            entry = self.greedy_closest(query, query_norm, entry, layer);
        }

        let ef = self.params.ef_search.max(top_k);
        let found = self.search_layer(query, query_norm, entry, ef, 0);
        if found.len() < top_k {
            // Disconnected graph region; fall back to an exact answer
            return Ok(self.vectors.scan(query, top_k));
        }

        Ok(rank(
            found.into_iter().map(|c| Neighbor {
                position: c.node,
                score: c.score,
            }),
            top_k,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::vector_index::ExactIndex;

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_params_validation() {
        assert!(HnswParams::default().validate().is_ok());
        let zero_m = HnswParams {
            m: 0,
            ..HnswParams::default()
        };
        assert!(matches!(
            zero_m.validate(),
            Err(RetrievalError::InvalidParameter(_))
        ));
        let zero_ef = HnswParams {
            ef_search: 0,
            ..HnswParams::default()
        };
        assert!(zero_ef.validate().is_err());
    }

    #[test]
    fn test_single_vector() {
        let index = HnswIndex::build(vec![vec![1.0, 2.0]], Metric::Cosine, HnswParams::default()).unwrap();
        let hits = index.query(&[1.0, 2.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 0);
    }

    #[test]
    fn test_full_top_k_returns_every_item_once() {
        let vectors = random_vectors(40, 8, 7);
        let index = HnswIndex::build(vectors.clone(), Metric::Cosine, HnswParams::default()).unwrap();
        let exact = ExactIndex::build(vectors, Metric::Cosine).unwrap();

        let query = vec![0.5; 8];
        let hits = index.query(&query, 100).unwrap();
        assert_eq!(hits.len(), 40);

        let mut positions: Vec<usize> = hits.iter().map(|n| n.position).collect();
        assert_eq!(hits, exact.query(&query, 40).unwrap());
        positions.sort_unstable();
        assert_eq!(positions, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_top1_agrees_with_exact_scan() {
        let vectors = random_vectors(500, 16, 1);
        let queries = random_vectors(200, 16, 2);
        let index = HnswIndex::build(vectors.clone(), Metric::Cosine, HnswParams::default()).unwrap();
        let exact = ExactIndex::build(vectors, Metric::Cosine).unwrap();

        let agreeing = queries
            .iter()
            .filter(|q| {
                let approx = index.query(q, 1).unwrap();
                let truth = exact.query(q, 1).unwrap();
                approx[0].position == truth[0].position
            })
            .count();

        assert!(
            agreeing * 100 >= queries.len() * 95,
            "top-1 agreement {agreeing}/{}",
            queries.len()
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let vectors = random_vectors(200, 8, 3);
        let a = HnswIndex::build(vectors.clone(), Metric::Cosine, HnswParams::default()).unwrap();
        let b = HnswIndex::build(vectors, Metric::Cosine, HnswParams::default()).unwrap();

        assert_eq!(a.layers, b.layers);
        assert_eq!(a.entry_point, b.entry_point);
        let q = vec![0.1; 8];
        assert_eq!(a.query(&q, 5).unwrap(), b.query(&q, 5).unwrap());
    }

    #[test]
    fn test_results_sorted_and_sized() {
        let vectors = random_vectors(300, 12, 4);
        let index = HnswIndex::build(
            vectors,
            Metric::InnerProduct,
            HnswParams {
                m: 8,
                ef_construction: 64,
                ef_search: 32,
                seed: 9,
            },
        )
        .unwrap();

        let hits = index.query(&vec![0.3; 12], 10).unwrap();
        assert_eq!(hits.len(), 10);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_dimension_mismatch_on_query() {
        let index = HnswIndex::build(random_vectors(10, 4, 5), Metric::Cosine, HnswParams::default()).unwrap();
        assert!(matches!(
            index.query(&[1.0, 2.0], 3),
            Err(RetrievalError::DimensionMismatch {
                expected: 4,
                found: 2
            })
        ));
    }
}
