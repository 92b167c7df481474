//! Host-side point sampling and grouping primitives.
//!
//! These follow the PointNet++ reference kernels: farthest point sampling
//! starts from the first point, and ball query returns the first `nsample`
//! neighbors in point order, padding with the first hit.

/// Farthest point sampling over `dim`-dimensional points stored row-major.
///
/// Returns `count` indices. Once every point has been picked the remaining
/// slots repeat index 0. An empty point set yields an empty result.
pub fn farthest_point_sample(points: &[f32], dim: usize, count: usize) -> Vec<usize> {
    let n = if dim == 0 { 0 } else { points.len() / dim };
    if n == 0 {
        return Vec::new();
    }

    let mut selected = Vec::with_capacity(count);
    let mut min_dist = vec![f32::INFINITY; n];
    let mut current = 0usize;

    for _ in 0..count {
        selected.push(current);
        let anchor = &points[current * dim..(current + 1) * dim];

        let mut best = 0usize;
        let mut best_dist = -1.0f32;
        for (i, point) in points.chunks_exact(dim).enumerate() {
            let d: f32 = point
                .iter()
                .zip(anchor)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            if d < min_dist[i] {
                min_dist[i] = d;
            }
            if min_dist[i] > best_dist {
                best_dist = min_dist[i];
                best = i;
            }
        }
        current = best;
    }

    selected
}

/// Indices of the `k` highest scores, highest first; ties keep point order.
pub fn top_k_by_score(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k);
    order
}

/// Ball query around each center.
///
/// `centers` and `points` are row-major xyz triples. For every center the
/// result holds `nsample` indices of points with squared distance in
/// `[min_radius², radius²)`, in point order; unused slots repeat the first
/// hit, and a center with no hit gets index 0 throughout.
pub fn ball_query(
    centers: &[f32],
    points: &[f32],
    min_radius: f32,
    radius: f32,
    nsample: usize,
) -> Vec<usize> {
    let r2 = radius * radius;
    let min_r2 = min_radius * min_radius;
    let num_centers = centers.len() / 3;
    let mut result = vec![0usize; num_centers * nsample];

    for (c, center) in centers.chunks_exact(3).enumerate() {
        let slots = &mut result[c * nsample..(c + 1) * nsample];
        let mut found = 0usize;
        for (k, point) in points.chunks_exact(3).enumerate() {
            let d2: f32 = point
                .iter()
                .zip(center)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            if d2 < r2 && d2 >= min_r2 {
                if found == 0 {
                    slots.fill(k);
                }
                slots[found] = k;
                found += 1;
                if found >= nsample {
                    break;
                }
            }
        }
    }

    result
}
