use thiserror::Error;

/// Keeps, for every batch row, the content vectors at positions that are
/// multiples of `content_aggregation`.
///
/// `content_vectors` is laid out as `[batch][position][hidden]`.
///
/// # Errors
///
/// * `AggregationError::ZeroStride` - if `content_aggregation` is zero
pub fn aggregate_content_information(
    content_vectors: &[Vec<Vec<f32>>],
    content_aggregation: usize,
) -> Result<Vec<Vec<Vec<f32>>>, AggregationError> {
    if content_aggregation == 0 {
        return Err(AggregationError::ZeroStride);
    }
    Ok(content_vectors
        .iter()
        .map(|row| row.iter().step_by(content_aggregation).cloned().collect())
        .collect())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Content aggregation stride must be positive")]
    ZeroStride,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_every_stride_position() {
        let row: Vec<Vec<f32>> = (0..7).map(|i| vec![i as f32, -(i as f32)]).collect();
        let aggregated = aggregate_content_information(&[row.clone(), row], 3).unwrap();
        assert_eq!(aggregated.len(), 2);
        assert_eq!(
            aggregated[0],
            vec![vec![0.0, -0.0], vec![3.0, -3.0], vec![6.0, -6.0]]
        );
    }

    #[test]
    fn test_large_stride_keeps_first_position() {
        let row: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32]).collect();
        let aggregated = aggregate_content_information(&[row], 1000).unwrap();
        assert_eq!(aggregated, vec![vec![vec![0.0]]]);
    }

    #[test]
    fn test_zero_stride() {
        assert_eq!(
            aggregate_content_information(&[], 0),
            Err(AggregationError::ZeroStride)
        );
    }
}
