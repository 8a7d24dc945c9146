use super::{EmbeddingError, EmbeddingProvider};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Per-call encoding options
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    pub batch_size: usize,
    pub normalize: bool,
    pub show_progress: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            normalize: true,
            show_progress: false,
        }
    }
}

/// Text to vector conversion on top of an [`EmbeddingProvider`]
///
/// The output dimension is pinned by the first successful batch and every
/// later batch must agree with it.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    defaults: EncodeOptions,
    dimension: OnceLock<usize>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, defaults: EncodeOptions) -> Self {
        Self {
            provider,
            defaults,
            dimension: OnceLock::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Output dimension, as observed or as advertised by the provider
    pub fn dimension(&self) -> usize {
        self.dimension
            .get()
            .copied()
            .unwrap_or_else(|| self.provider.dimension())
    }

    pub fn defaults(&self) -> EncodeOptions {
        self.defaults
    }

    /// Encode `texts` into an `[n, dim]` matrix
    pub fn encode(
        &self,
        texts: &[String],
        options: EncodeOptions,
    ) -> Result<Array2<f32>, EmbeddingError> {
        if options.batch_size == 0 {
            return Err(EmbeddingError::InvalidInput(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if texts.is_empty() {
            return Ok(Array2::zeros((0, self.dimension())));
        }

        let started = Instant::now();
        let total_batches = texts.len().div_ceil(options.batch_size);
        let mut flat = Vec::with_capacity(texts.len() * self.dimension());
        let mut dim = 0;

        for (batch_idx, batch) in texts.chunks(options.batch_size).enumerate() {
            let vectors = self.provider.embed_batch(batch)?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for vector in vectors {
                dim = self.check_dimension(vector.len())?;
                flat.extend(vector);
            }

            if options.show_progress {
                tracing::info!(
                    "Embedded batch {}/{} ({} texts)",
                    batch_idx + 1,
                    total_batches,
                    batch.len()
                );
            }
        }

        let mut matrix = Array2::from_shape_vec((texts.len(), dim), flat)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if options.normalize {
            normalize_rows(&mut matrix);
        }

        tracing::debug!(
            "Encoded {} texts in {:?}",
            texts.len(),
            started.elapsed()
        );

        Ok(matrix)
    }

    /// Encode with the configured defaults
    pub fn encode_default(&self, texts: &[String]) -> Result<Array2<f32>, EmbeddingError> {
        self.encode(texts, self.defaults)
    }

    /// Encode a single query string
    pub fn encode_query(&self, text: &str) -> Result<Array1<f32>, EmbeddingError> {
        let options = EncodeOptions {
            batch_size: 1,
            show_progress: false,
            ..self.defaults
        };
        let matrix = self.encode(&[text.to_string()], options)?;
        Ok(matrix.row(0).to_owned())
    }

    /// Encode a large input in chunks of `batch_size`, concatenated in order
    pub fn encode_batch(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Array2<f32>, EmbeddingError> {
        let options = EncodeOptions {
            batch_size,
            ..self.defaults
        };
        if batch_size == 0 || texts.len() <= batch_size {
            return self.encode(texts, options);
        }

        let parts = texts
            .chunks(batch_size)
            .map(|chunk| self.encode(chunk, options))
            .collect::<Result<Vec<_>, _>>()?;
        let views: Vec<ArrayView2<f32>> = parts.iter().map(|p| p.view()).collect();

        ndarray::concatenate(Axis(0), &views)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))
    }

    fn check_dimension(&self, actual: usize) -> Result<usize, EmbeddingError> {
        let expected = *self.dimension.get_or_init(|| actual);
        if expected != actual {
            return Err(EmbeddingError::DimensionMismatch { expected, actual });
        }
        Ok(expected)
    }
}

/// Inner product of `query` against every row of `corpus`
pub fn similarity(query: ArrayView1<f32>, corpus: ArrayView2<f32>) -> Array1<f32> {
    corpus.dot(&query)
}

/// Scale every row to unit L2 norm; zero rows are left alone
pub fn normalize_rows(matrix: &mut Array2<f32>) {
    for mut row in matrix.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > f32::EPSILON {
            row.mapv_inplace(|x| x / norm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps each text to a vector derived from its bytes
    struct ByteProvider {
        dim: usize,
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for ByteProvider {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dim];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % self.dim] += b as f32;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn model_name(&self) -> &str {
            "bytes"
        }
    }

    /// Returns a different width on every call
    struct DriftingProvider(AtomicUsize);

    impl EmbeddingProvider for DriftingProvider {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let dim = 4 + self.0.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0; dim]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "drift"
        }
    }

    fn embedder(dim: usize) -> (Embedder, Arc<ByteProvider>) {
        let provider = Arc::new(ByteProvider {
            dim,
            calls: AtomicUsize::new(0),
        });
        (
            Embedder::new(provider.clone(), EncodeOptions::default()),
            provider,
        )
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {i}")).collect()
    }

    #[test]
    fn test_encode_shape_and_normalization() {
        let (embedder, _) = embedder(8);
        let matrix = embedder.encode(&texts(5), EncodeOptions::default()).unwrap();
        assert_eq!(matrix.dim(), (5, 8));

        for row in matrix.rows() {
            let norm = row.dot(&row).sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_encode_batches_calls() {
        let (embedder, provider) = embedder(8);
        let options = EncodeOptions {
            batch_size: 2,
            normalize: false,
            show_progress: true,
        };
        embedder.encode(&texts(5), options).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_encode_batch_matches_encode() {
        let (embedder, _) = embedder(8);
        let all = embedder.encode(&texts(7), EncodeOptions::default()).unwrap();
        let chunked = embedder.encode_batch(&texts(7), 3).unwrap();
        assert_eq!(all, chunked);
    }

    #[test]
    fn test_query_similarity_prefers_itself() {
        let (embedder, _) = embedder(16);
        let corpus = embedder.encode(&texts(4), EncodeOptions::default()).unwrap();
        let query = embedder.encode_query("text number 2").unwrap();

        let scores = similarity(query.view(), corpus.view());
        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(best, 2);
        assert!((scores[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_dimension_is_pinned() {
        let embedder = Embedder::new(
            Arc::new(DriftingProvider(AtomicUsize::new(0))),
            EncodeOptions::default(),
        );
        assert!(embedder.encode_query("first").is_ok());
        assert_eq!(embedder.dimension(), 4);

        let err = embedder.encode_query("second").unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_empty_input() {
        let (embedder, _) = embedder(8);
        let matrix = embedder.encode(&[], EncodeOptions::default()).unwrap();
        assert_eq!(matrix.dim(), (0, 8));
    }
}
