/// Vector index engine: exact, inverted-file and HNSW topologies
use super::ivf::IvfLists;
use crate::config::IndexConfig;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Upper bound on HNSW layers accepted by hnsw_rs
const HNSW_MAX_LAYERS: usize = 16;
/// hnsw_rs terminates the process for more connections per layer than this
pub const HNSW_MAX_CONNECTIONS: usize = 256;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index must be trained before vectors are added")]
    NotTrained,

    #[error("Training failed: {0}")]
    TrainingError(String),

    #[error("Corrupt index data: {0}")]
    Corrupt(String),
}

/// Index layout selected from `index.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexTopology {
    #[serde(rename = "IndexFlatIP")]
    FlatIp,
    #[serde(rename = "IndexFlatL2")]
    FlatL2,
    #[serde(rename = "IndexIVFFlat")]
    IvfFlat,
    #[serde(rename = "IndexHNSW")]
    Hnsw,
}

impl IndexTopology {
    /// Parse a topology name; both the long and the snake-case spellings work
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "IndexFlatIP" | "flat_ip" => Some(Self::FlatIp),
            "IndexFlatL2" | "flat_l2" => Some(Self::FlatL2),
            "IndexIVFFlat" | "ivf_flat" => Some(Self::IvfFlat),
            "IndexHNSW" | "IndexHNSWFlat" | "hnsw" => Some(Self::Hnsw),
            _ => None,
        }
    }

    /// Parse, falling back to exact inner product for unknown names
    pub fn resolve(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            tracing::warn!("Unknown index type {}, using IndexFlatIP", name);
            Self::FlatIp
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FlatIp => "IndexFlatIP",
            Self::FlatL2 => "IndexFlatL2",
            Self::IvfFlat => "IndexIVFFlat",
            Self::Hnsw => "IndexHNSW",
        }
    }

    pub fn requires_training(&self) -> bool {
        matches!(self, Self::IvfFlat)
    }
}

impl fmt::Display for IndexTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_elements: usize,
}

/// Everything needed to create an empty index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub topology: IndexTopology,
    pub metric: String,
    pub dimension: usize,
    pub nlist: usize,
    pub nprobe: usize,
    pub hnsw: HnswParams,
}

impl IndexSpec {
    pub fn from_config(config: &IndexConfig, dimension: usize) -> Self {
        Self {
            topology: IndexTopology::resolve(&config.index_type),
            metric: config.metric.clone(),
            dimension,
            nlist: config.nlist,
            nprobe: config.nprobe,
            hnsw: HnswParams {
                m: config.hnsw_m,
                ef_construction: config.hnsw_ef_construction,
                ef_search: config.hnsw_ef_search,
                max_elements: config.hnsw_max_elements,
            },
        }
    }
}

/// Append-only vector store; id `i` is the `i`-th vector ever added
///
/// Raw vectors are always kept so every topology can be persisted the same
/// way; the HNSW graph is derived from them.
pub struct VectorIndex {
    spec: IndexSpec,
    vectors: Vec<f32>,
    ivf: Option<IvfLists>,
    graph: Option<Hnsw<'static, f32, DistCosine>>,
}

impl VectorIndex {
    pub fn new(spec: IndexSpec) -> Self {
        tracing::info!(
            "Creating {} index with dimension {}",
            spec.topology,
            spec.dimension
        );

        let graph = (spec.topology == IndexTopology::Hnsw).then(|| new_graph(&spec.hnsw));
        Self {
            spec,
            vectors: Vec::new(),
            ivf: None,
            graph,
        }
    }

    /// Rebuild an index from persisted parts
    pub fn restore(
        spec: IndexSpec,
        vectors: Vec<f32>,
        ivf: Option<IvfLists>,
    ) -> Result<Self, VectorIndexError> {
        if spec.dimension == 0 || vectors.len() % spec.dimension != 0 {
            return Err(VectorIndexError::Corrupt(format!(
                "{} floats do not divide into rows of {}",
                vectors.len(),
                spec.dimension
            )));
        }
        if spec.topology.requires_training() && ivf.is_none() && !vectors.is_empty() {
            return Err(VectorIndexError::Corrupt(
                "IVF index holds vectors but no trained lists".to_string(),
            ));
        }

        let graph = (spec.topology == IndexTopology::Hnsw).then(|| {
            let graph = new_graph(&spec.hnsw);
            for (id, row) in vectors.chunks_exact(spec.dimension).enumerate() {
                let data = row.to_vec();
                graph.insert((&data, id));
            }
            graph
        });

        Ok(Self {
            spec,
            vectors,
            ivf,
            graph,
        })
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn topology(&self) -> IndexTopology {
        self.spec.topology
    }

    pub fn dimension(&self) -> usize {
        self.spec.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len() / self.spec.dimension.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn is_trained(&self) -> bool {
        !self.spec.topology.requires_training() || self.ivf.is_some()
    }

    /// Row-major copy of every stored vector
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub fn ivf(&self) -> Option<&IvfLists> {
        self.ivf.as_ref()
    }

    /// Train on row-major `samples`; a no-op for topologies without training
    pub fn train(&mut self, samples: &[f32]) -> Result<(), VectorIndexError> {
        if !self.spec.topology.requires_training() {
            return Ok(());
        }

        tracing::info!("Training IVF index on {} samples", samples.len() / self.spec.dimension.max(1));
        self.ivf = Some(IvfLists::train(samples, self.spec.dimension, self.spec.nlist)?);
        Ok(())
    }

    /// Append row-major `vectors`, ids continue from the current length
    pub fn add(&mut self, vectors: &[f32]) -> Result<(), VectorIndexError> {
        let dim = self.spec.dimension;
        if dim == 0 || vectors.len() % dim != 0 {
            return Err(VectorIndexError::InvalidDimension {
                expected: dim,
                actual: vectors.len() % dim.max(1),
            });
        }
        if !self.is_trained() {
            return Err(VectorIndexError::NotTrained);
        }

        let first_id = self.len();
        for (offset, row) in vectors.chunks_exact(dim).enumerate() {
            let id = first_id + offset;
            if let Some(ivf) = self.ivf.as_mut() {
                ivf.assign(id as u32, row);
            }
            if let Some(graph) = self.graph.as_ref() {
                let data = row.to_vec();
                graph.insert((&data, id));
            }
        }
        self.vectors.extend_from_slice(vectors);
        Ok(())
    }

    /// Top `k` `(id, score)` pairs, highest score first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, VectorIndexError> {
        if query.len() != self.spec.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.spec.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let hits = match self.spec.topology {
            IndexTopology::FlatIp => top_k(
                self.rows().map(|row| dot(row, query)).enumerate().collect(),
                k,
            ),
            IndexTopology::FlatL2 => top_k(
                self.rows()
                    .map(|row| 1.0 - squared_l2(row, query) / 2.0)
                    .enumerate()
                    .collect(),
                k,
            ),
            IndexTopology::IvfFlat => {
                let candidates = self
                    .ivf
                    .as_ref()
                    .map(|ivf| ivf.probe(query, self.spec.nprobe))
                    .unwrap_or_default();
                top_k(
                    candidates
                        .into_iter()
                        .map(|id| (id as usize, dot(self.row(id as usize), query)))
                        .collect(),
                    k,
                )
            }
            IndexTopology::Hnsw => match self.graph.as_ref() {
                Some(graph) => {
                    let ef = self.spec.hnsw.ef_search.max(k);
                    graph
                        .search(query, k, ef)
                        .into_iter()
                        .map(|n| (n.d_id, 1.0 - n.distance))
                        .collect()
                }
                None => Vec::new(),
            },
        };

        Ok(hits)
    }

    fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.vectors.chunks_exact(self.spec.dimension)
    }

    fn row(&self, id: usize) -> &[f32] {
        let dim = self.spec.dimension;
        &self.vectors[id * dim..(id + 1) * dim]
    }
}

fn new_graph(params: &HnswParams) -> Hnsw<'static, f32, DistCosine> {
    let m = params.m.clamp(1, HNSW_MAX_CONNECTIONS);
    if m != params.m {
        tracing::warn!("HNSW m={} out of range, using {}", params.m, m);
    }
    Hnsw::<f32, DistCosine>::new(
        m,
        params.max_elements,
        HNSW_MAX_LAYERS,
        params.ef_construction,
        DistCosine,
    )
}

/// Keep the `k` best by descending score, lower id first on ties
fn top_k(mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;

    fn spec(topology: &str, dimension: usize) -> IndexSpec {
        let mut config = RagConfig::default();
        config.set_index_type(topology);
        config.index.nlist = 2;
        config.index.nprobe = 2;
        IndexSpec::from_config(&config.index, dimension)
    }

    fn unit_rows() -> Vec<f32> {
        vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.6, 0.8, 0.0, 0.0,
        ]
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(IndexTopology::parse("IndexFlatIP"), Some(IndexTopology::FlatIp));
        assert_eq!(IndexTopology::parse("flat_l2"), Some(IndexTopology::FlatL2));
        assert_eq!(IndexTopology::parse("ivf_flat"), Some(IndexTopology::IvfFlat));
        assert_eq!(IndexTopology::parse("IndexHNSW"), Some(IndexTopology::Hnsw));
        assert_eq!(IndexTopology::parse("IndexPQ"), None);
        assert_eq!(IndexTopology::resolve("IndexPQ"), IndexTopology::FlatIp);
    }

    #[test]
    fn test_exact_topologies_find_self() {
        for name in ["IndexFlatIP", "IndexFlatL2", "IndexIVFFlat", "IndexHNSW"] {
            let mut index = VectorIndex::new(spec(name, 4));
            index.train(&unit_rows()).unwrap();
            index.add(&unit_rows()).unwrap();
            assert_eq!(index.len(), 4, "{name}");

            let hits = index.search(&[0.0, 0.0, 1.0, 0.0], 2).unwrap();
            assert_eq!(hits[0].0, 2, "{name}");
            assert!((hits[0].1 - 1.0).abs() < 1e-4, "{name}");
            assert!(hits.len() <= 2);
        }
    }

    #[test]
    fn test_scores_non_increasing() {
        let mut index = VectorIndex::new(spec("IndexFlatIP", 4));
        index.add(&unit_rows()).unwrap();

        let hits = index.search(&[0.8, 0.6, 0.0, 0.0], 4).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(hits[0].0, 3);
    }

    #[test]
    fn test_ivf_requires_training() {
        let mut index = VectorIndex::new(spec("IndexIVFFlat", 4));
        assert!(!index.is_trained());
        assert!(matches!(index.add(&unit_rows()), Err(VectorIndexError::NotTrained)));
    }

    #[test]
    fn test_dimension_checks() {
        let mut index = VectorIndex::new(spec("IndexFlatIP", 4));
        assert!(index.add(&[1.0, 2.0, 3.0]).is_err());
        assert!(matches!(
            index.search(&[1.0; 3], 1),
            Err(VectorIndexError::InvalidDimension { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_restore_rebuilds_hnsw_graph() {
        let restored = VectorIndex::restore(spec("IndexHNSW", 4), unit_rows(), None).unwrap();
        let hits = restored.search(&[0.0, 1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].0, 1);
    }
}
