//! Vector arithmetic used by the indexes and the section builder.

/// Added to the norm product so zero vectors score 0 instead of NaN.
pub const COSINE_EPSILON: f32 = 1e-8;

/// Never returns `-0.0`: a float sum of negative zeros is `-0.0`, which would
/// order below `0.0` and split ties.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() + 0.0
}

pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// `dot(a, b) / (‖a‖·‖b‖ + 1e-8)`. Callers check dimensions first.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, norm(a), b, norm(b))
}

pub(crate) fn cosine_with_norms(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    dot(a, b) / (norm_a * norm_b + COSINE_EPSILON) + 0.0
}

/// `v / ‖v‖`, or a zero vector when `v` is zero.
pub fn unit(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n == 0.0 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / n).collect()
}

/// Element-wise arithmetic mean. `None` for no vectors; all vectors must have
/// the length of the first.
pub fn mean<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum: Vec<f64> = first.iter().map(|&x| f64::from(x)).collect();
    let mut count = 1usize;

    for v in iter {
        debug_assert_eq!(v.len(), sum.len());
        for (acc, &x) in sum.iter_mut().zip(v) {
            *acc += f64::from(x);
        }
        count += 1;
    }

    Some(sum.into_iter().map(|x| (x / count as f64) as f32).collect())
}
