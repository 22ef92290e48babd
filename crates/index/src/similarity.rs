/// Cosine similarity; 0.0 for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// `name_weight * name + (1 - name_weight) * desc`, element-wise.
pub fn blend(name: &[f32], desc: &[f32], name_weight: f32) -> Vec<f32> {
    let desc_weight = 1.0 - name_weight;
    name.iter()
        .zip(desc)
        .map(|(n, d)| name_weight * n + desc_weight * d)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_blend_weights() {
        let blended = blend(&[1.0, 0.0], &[0.0, 1.0], 0.7);
        assert!((blended[0] - 0.7).abs() < 1e-6);
        assert!((blended[1] - 0.3).abs() < 1e-6);
    }
}
