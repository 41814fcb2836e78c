//! Vector similarity helpers.

/// Euclidean norm of a vector.
pub fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity in `[-1, 1]`.
///
/// Returns 0.0 when the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    cosine_with_norms(a, norm(a), b, norm(b))
}

/// Cosine similarity with precomputed norms, clamped to `[-1, 1]`.
pub fn cosine_with_norms(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::{cosine_similarity, cosine_with_norms, norm};

    #[test]
    fn identical_direction_scores_one() {
        let score = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rounding_never_leaves_unit_range() {
        let vector = [0.1f32, 0.7, 0.3, 0.9, 0.2, 0.55, 0.33];
        let score = cosine_with_norms(&vector, norm(&vector), &vector, norm(&vector));
        assert!(score <= 1.0);
        let opposite: Vec<f32> = vector.iter().map(|x| -x).collect();
        let score = cosine_with_norms(&vector, norm(&vector), &opposite, norm(&opposite));
        assert!(score >= -1.0);
        let shrunk = cosine_with_norms(&vector, 0.5, &vector, 0.5);
        assert_eq!(shrunk, 1.0);
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }
}
