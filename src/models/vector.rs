//! Validated embedding vectors.

use crate::error::EmbeddingError;

/// Default dimension of `text-embedding-004`.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// A non-empty vector of finite floats produced by the embedder.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// Validate raw values returned by an embedding service.
    ///
    /// When `expected_dim` is set the length must match it exactly, since the
    /// vector store rejects queries of a different dimensionality.
    pub fn try_new(values: Vec<f32>, expected_dim: Option<usize>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::EmptyVector);
        }

        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFiniteValue { index });
        }

        if let Some(expected) = expected_dim
            && values.len() != expected
        {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }

        Ok(Self(values))
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_vector() {
        let vector = EmbeddingVector::try_new(vec![0.1, -0.2, 0.3], Some(3)).unwrap();
        assert_eq!(vector.dimension(), 3);
        assert_eq!(vector.as_slice()[1], -0.2);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            EmbeddingVector::try_new(vec![], None),
            Err(EmbeddingError::EmptyVector)
        ));
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(matches!(
            EmbeddingVector::try_new(vec![0.0, f32::NAN], None),
            Err(EmbeddingError::NonFiniteValue { index: 1 })
        ));
        assert!(matches!(
            EmbeddingVector::try_new(vec![f32::INFINITY], None),
            Err(EmbeddingError::NonFiniteValue { index: 0 })
        ));
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        assert!(matches!(
            EmbeddingVector::try_new(vec![0.5; 4], Some(768)),
            Err(EmbeddingError::DimensionMismatch {
                expected: 768,
                actual: 4
            })
        ));
    }
}
