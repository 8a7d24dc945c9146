//! Inverted file lists over inner-product centroids
//!
//! Centroids come from spherical k-means: deterministic seeding from evenly
//! spaced samples, then alternating assignment and unit-norm mean updates.

use super::topology::{dot, VectorIndexError};

const MAX_ITERATIONS: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct IvfLists {
    dimension: usize,
    centroids: Vec<f32>,
    lists: Vec<Vec<u32>>,
}

impl IvfLists {
    /// Train `nlist` centroids on row-major `samples`. Fewer samples than
    /// `nlist` shrink the list count to the sample count.
    pub fn train(samples: &[f32], dimension: usize, nlist: usize) -> Result<Self, VectorIndexError> {
        if dimension == 0 || samples.len() % dimension != 0 {
            return Err(VectorIndexError::InvalidDimension {
                expected: dimension,
                actual: samples.len() % dimension.max(1),
            });
        }

        let n = samples.len() / dimension;
        if n == 0 {
            return Err(VectorIndexError::TrainingError(
                "No samples to train on".to_string(),
            ));
        }

        let k = nlist.clamp(1, n);
        if k < nlist {
            tracing::warn!(
                "Training IVF with {} lists instead of {} ({} samples)",
                k,
                nlist,
                n
            );
        }

        let row = |i: usize| &samples[i * dimension..(i + 1) * dimension];

        let mut centroids: Vec<f32> = (0..k).flat_map(|j| row(j * n / k).to_vec()).collect();
        normalize_chunks(&mut centroids, dimension);

        let mut assignment = vec![usize::MAX; n];
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for (i, slot) in assignment.iter_mut().enumerate() {
                let best = nearest(&centroids, dimension, row(i));
                if *slot != best {
                    *slot = best;
                    changed = true;
                }
            }
            if !changed {
                tracing::debug!("IVF training converged after {} iterations", iteration);
                break;
            }

            let mut sums = vec![0.0f32; k * dimension];
            let mut counts = vec![0usize; k];
            for (i, &cluster) in assignment.iter().enumerate() {
                counts[cluster] += 1;
                for (acc, x) in sums[cluster * dimension..(cluster + 1) * dimension]
                    .iter_mut()
                    .zip(row(i))
                {
                    *acc += x;
                }
            }

            // Empty clusters keep their previous centroid.
            for (cluster, &count) in counts.iter().enumerate() {
                if count > 0 {
                    let span = cluster * dimension..(cluster + 1) * dimension;
                    centroids[span.clone()].copy_from_slice(&sums[span]);
                }
            }
            normalize_chunks(&mut centroids, dimension);
        }

        Ok(Self {
            dimension,
            lists: vec![Vec::new(); k],
            centroids,
        })
    }

    /// Rebuild from persisted centroids and per-vector list assignments
    pub fn from_parts(
        dimension: usize,
        centroids: Vec<f32>,
        assignments: &[u32],
    ) -> Result<Self, VectorIndexError> {
        if dimension == 0 || centroids.is_empty() || centroids.len() % dimension != 0 {
            return Err(VectorIndexError::Corrupt(
                "IVF centroid table has the wrong shape".to_string(),
            ));
        }

        let nlist = centroids.len() / dimension;
        let mut lists = vec![Vec::new(); nlist];
        for (id, &list) in assignments.iter().enumerate() {
            let slot = lists.get_mut(list as usize).ok_or_else(|| {
                VectorIndexError::Corrupt(format!("Vector {} assigned to missing list {}", id, list))
            })?;
            slot.push(id as u32);
        }

        Ok(Self {
            dimension,
            centroids,
            lists,
        })
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    /// List index of every vector, by vector id
    pub fn assignments(&self, count: usize) -> Vec<u32> {
        let mut out = vec![0u32; count];
        for (list, ids) in self.lists.iter().enumerate() {
            for &id in ids {
                if let Some(slot) = out.get_mut(id as usize) {
                    *slot = list as u32;
                }
            }
        }
        out
    }

    /// File vector `id` under its nearest centroid
    pub fn assign(&mut self, id: u32, vector: &[f32]) {
        let list = nearest(&self.centroids, self.dimension, vector);
        self.lists[list].push(id);
    }

    /// Ids stored in the `nprobe` lists whose centroids score highest
    pub fn probe(&self, query: &[f32], nprobe: usize) -> Vec<u32> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .chunks_exact(self.dimension)
            .map(|c| dot(c, query))
            .enumerate()
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        ranked
            .into_iter()
            .take(nprobe.max(1))
            .flat_map(|(list, _)| self.lists[list].iter().copied())
            .collect()
    }
}

fn nearest(centroids: &[f32], dimension: usize, vector: &[f32]) -> usize {
    centroids
        .chunks_exact(dimension)
        .map(|c| dot(c, vector))
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, score)| {
            if score > best.1 {
                (i, score)
            } else {
                best
            }
        })
        .0
}

fn normalize_chunks(values: &mut [f32], dimension: usize) {
    for chunk in values.chunks_exact_mut(dimension) {
        let norm = dot(chunk, chunk).sqrt();
        if norm > f32::EPSILON {
            chunk.iter_mut().for_each(|x| *x /= norm);
        }
    }
}
