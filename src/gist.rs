//! Spherical-cap bounding volumes for the store-side GiST entry-point
//!
//! The store contract exposes a GiST index over Physicality centroids with
//! user-defined callbacks (consistent / union / penalty / picksplit / same /
//! distance). The callbacks themselves live in the store; the geometry they
//! delegate to lives here, pure and panic-free: a bounding volume on S³ is a
//! cap `(center, angular radius)`, and every operator is expressed through
//! [`distance_s3`].
//!
//! Unions are conservative: a numeric failure degrades to the full sphere
//! rather than an error, which is always a correct (if loose) bound.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::geometry::{distance_s3, slerp, S3Point};

/// Angular slack applied to containment checks.
const CAP_EPSILON: f64 = 1e-9;

/// A closed spherical cap on S³.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphericalCap {
    /// Cap apex.
    pub center: S3Point,
    /// Angular radius in radians, in `[0, π]`.
    pub radius: f64,
}

impl SphericalCap {
    /// The degenerate cap covering exactly one point.
    pub fn from_point(p: S3Point) -> Self {
        SphericalCap { center: p, radius: 0.0 }
    }

    /// The cap covering all of S³.
    pub fn full() -> Self {
        SphericalCap { center: S3Point::AXIS_X, radius: std::f64::consts::PI }
    }

    /// Whether `p` lies inside the cap.
    pub fn contains(&self, p: &S3Point) -> bool {
        distance_s3(&self.center, p) <= self.radius + CAP_EPSILON
    }

    /// Whether the whole of `other` lies inside `self`.
    pub fn encloses(&self, other: &SphericalCap) -> bool {
        distance_s3(&self.center, &other.center) + other.radius <= self.radius + CAP_EPSILON
    }

    /// GiST `consistent`: can any point of the cap lie within `range` of
    /// `query`? Uses the minimum distance from the query to the cap.
    pub fn consistent(&self, query: &S3Point, range: f64) -> bool {
        (distance_s3(&self.center, query) - self.radius).max(0.0) <= range + CAP_EPSILON
    }

    /// GiST `distance`: minimum geodesic distance from `query` to the cap.
    pub fn min_distance(&self, query: &S3Point) -> f64 {
        (distance_s3(&self.center, query) - self.radius).max(0.0)
    }

    /// Smallest cap covering both inputs.
    pub fn union(&self, other: &SphericalCap) -> SphericalCap {
        if self.encloses(other) {
            return *self;
        }
        if other.encloses(self) {
            return *other;
        }
        let d = distance_s3(&self.center, &other.center);
        let radius = ((d + self.radius + other.radius) * 0.5).min(std::f64::consts::PI);
        if d < CAP_EPSILON {
            return SphericalCap { center: self.center, radius };
        }
        // Walk the apex toward the far side of `other` so both rims fit.
        let t = ((d + other.radius - self.radius) * 0.5 / d).clamp(0.0, 1.0);
        match slerp(&self.center, &other.center, t) {
            Ok(center) => SphericalCap { center, radius },
            Err(_) => SphericalCap::full(),
        }
    }

    /// GiST `penalty`: radius growth incurred by absorbing `other`.
    pub fn penalty(&self, other: &SphericalCap) -> f64 {
        self.union(other).radius - self.radius
    }

    /// GiST `same`: equality within angular tolerance.
    pub fn same(&self, other: &SphericalCap) -> bool {
        (self.radius - other.radius).abs() <= CAP_EPSILON
            && distance_s3(&self.center, &other.center) <= CAP_EPSILON
    }
}

/// GiST `picksplit`: partition caps into two groups seeded by the farthest
/// pair, assigning each entry to the seed whose penalty is smaller.
///
/// Returns `(left_indices, right_indices)`; inputs of fewer than two caps
/// come back as a left-only split.
pub fn picksplit(entries: &[SphericalCap]) -> (Vec<usize>, Vec<usize>) {
    if entries.len() < 2 {
        return ((0..entries.len()).collect(), Vec::new());
    }
    let (mut si, mut sj, mut best) = (0usize, 1usize, -1.0f64);
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let d = distance_s3(&entries[i].center, &entries[j].center);
            if d > best {
                best = d;
                si = i;
                sj = j;
            }
        }
    }
    let mut left_cap = entries[si];
    let mut right_cap = entries[sj];
    let mut left = Vec::new();
    let mut right = Vec::new();
    for (k, cap) in entries.iter().enumerate() {
        if k == si {
            left.push(k);
            continue;
        }
        if k == sj {
            right.push(k);
            continue;
        }
        let pl = left_cap.penalty(cap);
        let pr = right_cap.penalty(cap);
        // Ties go left so the split is deterministic.
        if pl <= pr {
            left_cap = left_cap.union(cap);
            left.push(k);
        } else {
            right_cap = right_cap.union(cap);
            right.push(k);
        }
    }
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point_on_s3;

    #[test]
    fn point_cap_contains_only_its_point() {
        let a = point_on_s3(3, 50);
        let b = point_on_s3(30, 50);
        let cap = SphericalCap::from_point(a);
        assert!(cap.contains(&a));
        assert!(!cap.contains(&b));
    }

    #[test]
    fn union_covers_both_inputs() {
        let pts: Vec<_> = (0..8u64).map(|i| point_on_s3(i * 7, 64)).collect();
        let caps: Vec<_> = pts.iter().map(|p| SphericalCap::from_point(*p)).collect();
        let mut u = caps[0];
        for c in &caps[1..] {
            u = u.union(c);
        }
        for p in &pts {
            assert!(u.contains(p));
        }
    }

    #[test]
    fn union_with_enclosed_cap_is_identity() {
        let big = SphericalCap { center: point_on_s3(0, 10), radius: 2.0 };
        let small = SphericalCap { center: point_on_s3(0, 10), radius: 0.1 };
        assert_eq!(big.union(&small), big);
        assert_eq!(small.union(&big), big);
    }

    #[test]
    fn penalty_is_zero_for_contained_entries() {
        let big = SphericalCap { center: point_on_s3(4, 10), radius: 1.5 };
        let inner = SphericalCap::from_point(point_on_s3(4, 10));
        assert_eq!(big.penalty(&inner), 0.0);
    }

    #[test]
    fn consistent_respects_range() {
        let cap = SphericalCap { center: point_on_s3(1, 20), radius: 0.2 };
        let q = point_on_s3(1, 20);
        assert!(cap.consistent(&q, 0.0));
        let far = point_on_s3(15, 20);
        let gap = cap.min_distance(&far);
        assert!(gap > 0.0);
        assert!(cap.consistent(&far, gap + 0.01));
        assert!(!cap.consistent(&far, gap - 0.01));
    }

    #[test]
    fn picksplit_separates_two_clusters() {
        // Two degenerate clusters a quarter turn apart.
        let p1 = crate::geometry::S3Point::new([1.0, 0.0, 0.0, 0.0]).unwrap();
        let p2 = crate::geometry::S3Point::new([0.0, 0.0, 0.0, 1.0]).unwrap();
        let mut caps = Vec::new();
        for _ in 0..4 {
            caps.push(SphericalCap::from_point(p1));
        }
        for _ in 0..4 {
            caps.push(SphericalCap::from_point(p2));
        }
        let (left, right) = picksplit(&caps);
        assert_eq!(left.len() + right.len(), caps.len());
        assert!(!left.is_empty() && !right.is_empty());
        // No group mixes the two clusters.
        for group in [&left, &right] {
            let low = group.iter().filter(|&&k| k < 4).count();
            assert!(low == 0 || low == group.len(), "split mixed clusters");
        }
    }

    #[test]
    fn picksplit_of_singleton_is_left_only() {
        let caps = [SphericalCap::from_point(point_on_s3(0, 4))];
        let (l, r) = picksplit(&caps);
        assert_eq!(l, vec![0]);
        assert!(r.is_empty());
    }
}
