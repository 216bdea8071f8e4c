// Values at the evenly spaced quantiles (k + 0.5) / K of the data
pub fn quantile_centers(data: &[f64], num_clusters: usize) -> Vec<f64> {
    if data.is_empty() || num_clusters == 0 {
        return Vec::new();
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    (0..num_clusters)
        .map(|k| {
            let position = ((k as f64 + 0.5) / num_clusters as f64 * sorted.len() as f64).floor() as usize;
            sorted[position.min(sorted.len() - 1)]
        })
        .collect()
}

// Evenly spaced centers over the data range, used when quantiles collide
pub fn range_centers(data: &[f64], num_clusters: usize) -> Vec<f64> {
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    (0..num_clusters)
        .map(|k| min + (k as f64 + 0.5) / num_clusters as f64 * (max - min))
        .collect()
}

/// Lloyd's algorithm in one dimension from the given starting centers.
///
/// Deterministic: a point equally far from two centers joins the lower
/// index, and a cluster that loses all its points keeps its old center.
pub fn k_means_1d(data: &[f64], initial_centers: Vec<f64>, max_iterations: usize, tolerance: f64) -> (Vec<f64>, Vec<usize>) {
    let k = initial_centers.len();
    let mut centers = initial_centers;
    let mut assignments = vec![0; data.len()];

    if k == 0 {
        return (centers, assignments);
    }

    for iteration in 0..max_iterations {
        let mut changes = 0;

        for (i, &point) in data.iter().enumerate() {
            let closest_center = centers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| (*a - point).abs().total_cmp(&(*b - point).abs()))
                .map(|(idx, _)| idx)
                .unwrap_or(0);

            if assignments[i] != closest_center || iteration == 0 {
                changes += 1;
                assignments[i] = closest_center;
            }
        }

        let mut new_centers = vec![0.0; k];
        let mut counts = vec![0_usize; k];

        for (&assignment, &point) in assignments.iter().zip(data) {
            new_centers[assignment] += point;
            counts[assignment] += 1;
        }

        for i in 0..k {
            new_centers[i] = if counts[i] > 0 { new_centers[i] / counts[i] as f64 } else { centers[i] };
        }

        let max_shift = centers
            .iter()
            .zip(&new_centers)
            .map(|(old, new)| (old - new).abs())
            .fold(0.0, f64::max);

        centers = new_centers;

        if max_shift < tolerance || changes == 0 {
            break;
        }
    }

    (centers, assignments)
}
