use std::cmp::Ordering;

/// One index hit: the slot that matched and its Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: usize,
    pub distance: f32,
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same length");

    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum::<f32>()
        .sqrt()
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    clamp_unit(1.0 / (1.0 + distance.max(0.0)))
}

/// Orders candidates by ascending distance and keeps the first `k`.
///
/// The sort is stable, so equal distances keep slot order.
pub fn rank_nearest(distances: impl IntoIterator<Item = f32>, k: usize) -> Vec<Neighbor> {
    let mut ranked: Vec<Neighbor> = distances
        .into_iter()
        .enumerate()
        .map(|(slot, distance)| Neighbor { slot, distance })
        .collect();

    ranked.sort_by(|a, b| compare_distance(a.distance, b.distance));
    ranked.truncate(k);
    ranked
}

fn compare_distance(a: f32, b: f32) -> Ordering {
    // NaN sorts last.
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}
