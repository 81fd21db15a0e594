//! Answer confidence from retrieval scores

/// `0.6 * avg + 0.3 * max + 0.1 * min(n, 5) / 10`, clamped to `[0, 1]`.
///
/// No scores means no confidence.
pub fn confidence(scores: &[f32]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    let n = scores.len();
    let avg = scores.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
    let max = scores.iter().map(|&s| s as f64).fold(f64::MIN, f64::max);
    let count = n.min(5) as f64;

    (avg * 0.6 + max * 0.3 + count / 10.0 * 0.1).clamp(0.0, 1.0)
}
