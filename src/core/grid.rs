/// Cartesian sample grid for brute-force sweeps.
///
/// Rows enumerate the product of the per-parameter sample sets in odometer
/// order with the *last* parameter as the least-significant digit: the value
/// at index `k` of parameter `p` repeats `prod(sizes[p+1..])` times in a row,
/// and that block pattern repeats `prod(sizes[..p])` times. Downstream
/// logging and indexing rely on this exact ordering.
pub fn sample_grid(per_param: &[Vec<f64>]) -> Vec<Vec<f64>> {
    if per_param.is_empty() || per_param.iter().any(|p| p.is_empty()) {
        return Vec::new();
    }
    let n_params = per_param.len();
    let total: usize = per_param.iter().map(|p| p.len()).product();

    let mut rows = vec![vec![0.0f64; n_params]; total];
    let mut repeat = 1usize;
    for (p, samples) in per_param.iter().enumerate() {
        let ns = samples.len();
        let block = total / (repeat * ns);
        for (k, &value) in samples.iter().enumerate() {
            for r in 0..repeat {
                let base = r * ns * block + k * block;
                for row in rows.iter_mut().skip(base).take(block) {
                    row[p] = value;
                }
            }
        }
        repeat *= ns;
    }
    rows
}

/// Evenly spaced samples from `start` to `end` inclusive. A single point
/// collapses to `init` (the parameter is held fixed during the sweep).
pub fn linspace_or_pin(start: f64, end: f64, init: f64, points: usize) -> Vec<f64> {
    if points <= 1 {
        return vec![init];
    }
    let step = (end - start) / (points - 1) as f64;
    (0..points).map(|i| start + i as f64 * step).collect()
}
