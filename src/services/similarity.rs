//! Vector math shared by image selection, profile building and ranking.
//!
//! Cosine similarity is the only similarity metric used anywhere.

/// Regulariser added to norms so all-zero vectors do not divide by zero
pub const NORM_EPSILON: f32 = 1e-8;

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales `v` to unit length, leaving a zero vector at zero
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v) + NORM_EPSILON;
    v.iter().map(|x| x / norm).collect()
}

/// `dot(a/‖a‖, b/‖b‖)`, in [-1, 1]. Vectors of different length are compared
/// over their common prefix.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let similarity = dot / ((l2_norm(a) + NORM_EPSILON) * (l2_norm(b) + NORM_EPSILON));
    similarity.clamp(-1.0, 1.0)
}

/// Element-wise mean; `None` when there is nothing to average
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Option<Vec<f32>> = None;
    let mut count = 0usize;

    for v in vectors {
        let acc = sum.get_or_insert_with(|| vec![0.0; v.len()]);
        for (a, x) in acc.iter_mut().zip(v) {
            *a += x;
        }
        count += 1;
    }

    sum.map(|mut acc| {
        let n = count as f32;
        acc.iter_mut().for_each(|a| *a /= n);
        acc
    })
}

/// `Σ w·v / Σ w`; `None` when empty or the weights sum to zero
pub fn weighted_average<'a, I>(weighted: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = (&'a [f32], f32)>,
{
    let mut sum: Option<Vec<f32>> = None;
    let mut total_weight = 0.0f32;

    for (v, w) in weighted {
        let acc = sum.get_or_insert_with(|| vec![0.0; v.len()]);
        for (a, x) in acc.iter_mut().zip(v) {
            *a += w * x;
        }
        total_weight += w;
    }

    if total_weight <= 0.0 {
        return None;
    }
    sum.map(|mut acc| {
        acc.iter_mut().for_each(|a| *a /= total_weight);
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-5;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < TOLERANCE, "{} != {}", a, b);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.0, 0.01];
        assert_close(cosine_similarity(&v, &v), 1.0);
    }

    #[test]
    fn test_opposite_similarity_is_minus_one() {
        let v = vec![0.3, -1.2, 4.0, 0.01];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert_close(cosine_similarity(&v, &neg), -1.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-0.5, 4.0, 0.25];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_orthogonal_and_zero_vectors() {
        assert_close(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_similarity_ignores_magnitude() {
        let a = vec![1.0, 2.0, 2.0];
        let b = vec![10.0, 20.0, 20.0];
        assert_close(cosine_similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_normalize_has_unit_norm() {
        let v = normalize(&[3.0, 4.0]);
        assert_close(l2_norm(&v), 1.0);
        assert_close(v[0], 0.6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_mean_vector() {
        let a = [1.0, 3.0];
        let b = [3.0, 5.0];
        let mean = mean_vector([&a[..], &b[..]]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);
        assert!(mean_vector(std::iter::empty::<&[f32]>()).is_none());
    }

    #[test]
    fn test_weighted_average() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let avg = weighted_average([(&a[..], 1.0), (&b[..], 3.0)]).unwrap();
        assert_close(avg[0], 0.25);
        assert_close(avg[1], 0.75);
        assert!(weighted_average([(&a[..], 0.0)]).is_none());
    }
}
