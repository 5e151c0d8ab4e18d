use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};

/// Row-normalized embedding matrix used for cosine similarity lookups.
///
/// Every vector is L2-normalized once, so the cosine similarity between two rows
/// is a plain dot product. Zero-norm vectors (and empty vectors, which stand for
/// "no embedding") become all-zero rows: their similarity to every other row is 0.
///
/// The matrix is held as f64 on the CPU device so scores sit within a few ulps of the
/// exact cosine of the input vectors. Metal has no f64 matmul.
pub struct SimilarityIndex {
    matrix: Option<Tensor>,
    zero_rows: Vec<bool>,
}

impl SimilarityIndex {
    pub fn new<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Self> {
        let dimension = vectors
            .iter()
            .map(|v| v.as_ref().len())
            .find(|len| *len > 0)
            .unwrap_or(0);

        let mut flat = Vec::with_capacity(vectors.len() * dimension);
        let mut zero_rows = Vec::with_capacity(vectors.len());

        for (idx, vector) in vectors.iter().enumerate() {
            let vector = vector.as_ref();
            if vector.is_empty() {
                flat.extend(std::iter::repeat(0.0f64).take(dimension));
                zero_rows.push(true);
                continue;
            }
            if vector.len() != dimension {
                bail!(
                    "Embedding at position {} has dimension {}, expected {}",
                    idx,
                    vector.len(),
                    dimension
                );
            }

            let norm = vector
                .iter()
                .map(|x| f64::from(*x) * f64::from(*x))
                .sum::<f64>()
                .sqrt();

            if norm == 0.0 || !norm.is_finite() {
                flat.extend(std::iter::repeat(0.0f64).take(dimension));
                zero_rows.push(true);
            } else {
                flat.extend(vector.iter().map(|x| f64::from(*x) / norm));
                zero_rows.push(false);
            }
        }

        let matrix = if dimension == 0 || vectors.is_empty() {
            None
        } else {
            Some(
                Tensor::from_vec(flat, (vectors.len(), dimension), &Device::Cpu).with_context(
                    || {
                        format!(
                            "Failed to create {}x{} embedding tensor",
                            vectors.len(),
                            dimension
                        )
                    },
                )?,
            )
        };

        Ok(Self { matrix, zero_rows })
    }

    pub fn len(&self) -> usize {
        self.zero_rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zero_rows.is_empty()
    }

    /// Cosine similarity of row `idx` against every row, in row order.
    /// A row's similarity to itself is always 1.0.
    pub fn similarities_to(&self, idx: usize) -> Result<Vec<f64>> {
        if idx >= self.len() {
            bail!("Row {} out of range for index of {} rows", idx, self.len());
        }

        let mut similarities = match &self.matrix {
            Some(matrix) if !self.zero_rows[idx] => {
                let seed = matrix
                    .get(idx)
                    .and_then(|row| row.unsqueeze(1))
                    .and_then(|col| col.contiguous())
                    .with_context(|| format!("Failed to extract row {} from embedding tensor", idx))?;
                let dots = matrix
                    .matmul(&seed)
                    .and_then(|t| t.squeeze(1))
                    .and_then(|t| t.to_vec1::<f64>())
                    .with_context(|| format!("Failed to compute similarities for row {}", idx))?;

                dots.into_iter()
                    .map(|dot| {
                        if dot.is_finite() {
                            dot.clamp(-1.0, 1.0)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            }
            _ => vec![0.0; self.len()],
        };

        similarities[idx] = 1.0;
        Ok(similarities)
    }

    #[cfg(test)]
    fn similarity(&self, a: usize, b: usize) -> Result<f64> {
        let row = self.similarities_to(a)?;
        row.get(b)
            .copied()
            .with_context(|| format!("Row {} out of range for index of {} rows", b, self.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orthogonal_and_parallel_vectors() {
        let index = SimilarityIndex::new(&[
            vec![1.0f32, 0.0],
            vec![0.0, 2.0],
            vec![3.0, 0.0],
            vec![-1.0, 0.0],
        ])
        .unwrap();

        let sims = index.similarities_to(0).unwrap();
        assert_eq!(sims[0], 1.0);
        assert!(sims[1].abs() < 1e-6);
        assert!((sims[2] - 1.0).abs() < 1e-6);
        assert!((sims[3] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_is_similar_only_to_itself() {
        let index = SimilarityIndex::new(&[vec![0.0f32, 0.0], vec![1.0, 1.0], vec![0.0, 0.0]]).unwrap();

        let from_zero = index.similarities_to(0).unwrap();
        assert_eq!(from_zero, vec![1.0, 0.0, 0.0]);

        let from_nonzero = index.similarities_to(1).unwrap();
        assert_eq!(from_nonzero[0], 0.0);
        assert_eq!(from_nonzero[2], 0.0);
    }

    #[test]
    fn test_empty_vectors_are_treated_as_zero() {
        let index = SimilarityIndex::new(&[vec![], vec![0.5f32, 0.5]]).unwrap();
        assert_eq!(index.similarity(1, 0).unwrap(), 0.0);

        let all_empty = SimilarityIndex::new(&[Vec::<f32>::new(), Vec::new()]).unwrap();
        assert_eq!(all_empty.similarities_to(1).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_scores_are_exact_to_f64_rounding() {
        let v: Vec<f32> = (0..16).map(|i| (i as f32 * 0.37).sin()).collect();
        let index = SimilarityIndex::new(&[v.clone(), v]).unwrap();
        assert!((index.similarity(0, 1).unwrap() - 1.0).abs() < 1e-12);

        // (1, 0) against 5 * (0.8, 0.6): both are exact in f32, and the cosine is 0.8.
        let index = SimilarityIndex::new(&[vec![1.0f32, 0.0], vec![4.0, 3.0]]).unwrap();
        assert!((index.similarity(0, 1).unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        assert!(SimilarityIndex::new(&[vec![1.0f32, 0.0], vec![1.0, 0.0, 0.0]]).is_err());
    }

    #[test]
    fn test_out_of_range_row() {
        let index = SimilarityIndex::new(&[vec![1.0f32]]).unwrap();
        assert!(index.similarities_to(1).is_err());
        assert!(SimilarityIndex::new::<Vec<f32>>(&[]).unwrap().is_empty());
    }
}
