//! Geometry kernel: the unit 3-sphere S³ and its operators
//!
//! Everything geometric in the substrate happens on S³ ⊂ R⁴. This module
//! owns the point type and the operator set the rest of the core builds on:
//!
//! - **Super-Fibonacci spiral** `point_on_s3(i, n)` — a deterministic
//!   lattice of `n` points driven by the golden ratio φ and the plastic
//!   constant ψ. The spiral winds `m₁ ≈ n^⅓/φ` times in the first Hopf
//!   angle and `m₂ ≈ n^⅔/ψ` times in the second, so **consecutive indices
//!   are geodesic neighbors** (step ≈ 2π/(ψ·n^⅓)) while the windings fill
//!   S³ quasi-uniformly as `n` grows. Atom seeding depends on both halves
//!   of that bargain: the semantic sequencer's ordering becomes spatial
//!   locality, and the table still covers the sphere.
//! - **Hopf fibration** `hopf_forward` — S³ → S², fibers are great circles.
//! - **SLERP**, geodesic `distance_s3`, and the **spherical centroid**.
//!
//! The kernel is stateless and never panics on finite inputs; offering a
//! non-normalized point to a consumer that requires S³ membership is an
//! error, and a NaN propagating through an operator is reported as
//! [`GeomError::NonFinite`] rather than silently stored.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::hash::Digest;

/// Golden ratio φ = (1+√5)/2.
pub const PHI: f64 = 1.618033988749894848204586834365638118_f64;

/// Plastic constant ψ, the real root of x³ = x + 1.
pub const PSI: f64 = 1.324717957244746025960908854478097340_f64;

/// Accept tolerance for externally supplied S³ points.
pub const NORM_TOLERANCE: f64 = 1e-4;

/// Tolerance the kernel itself guarantees on produced points.
pub const UNIT_EPSILON: f64 = 1e-9;

/// Angular gap below which SLERP falls back to linear interpolation.
const SLERP_LINEAR_FALLBACK: f64 = 1e-10;

/// Errors surfaced by the geometry kernel.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeomError {
    /// A coordinate was NaN or infinite.
    #[error("non-finite coordinate in {0}")]
    NonFinite(&'static str),
    /// A point claimed to be on S³ deviates beyond tolerance.
    #[error("point norm {norm} deviates from 1 beyond tolerance {tol}")]
    NotNormalized { norm: f64, tol: f64 },
    /// Lattice index outside `[0, n)`.
    #[error("lattice index {i} out of range (n={n})")]
    IndexOutOfRange { i: u64, n: u64 },
}

/// A point on the unit 3-sphere, stored as `(x, y, z, w)`.
///
/// Construction through [`S3Point::new`] validates and renormalizes; all
/// kernel operators keep the unit-norm invariant within [`UNIT_EPSILON`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct S3Point([f64; 4]);

impl S3Point {
    /// Validate and adopt a candidate point.
    ///
    /// Rejects non-finite coordinates and norms deviating from 1 by more
    /// than [`NORM_TOLERANCE`]; accepted points are renormalized exactly.
    pub fn new(coords: [f64; 4]) -> Result<Self, GeomError> {
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(GeomError::NonFinite("S3Point::new"));
        }
        let norm = (coords.iter().map(|c| c * c).sum::<f64>()).sqrt();
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(GeomError::NotNormalized { norm, tol: NORM_TOLERANCE });
        }
        let mut out = coords;
        for c in &mut out {
            *c /= norm;
        }
        Ok(S3Point(out))
    }

    /// Adopt coordinates already known to be unit (kernel-internal).
    #[inline]
    fn unit_unchecked(coords: [f64; 4]) -> Self {
        debug_assert!(
            (coords.iter().map(|c| c * c).sum::<f64>().sqrt() - 1.0).abs() < NORM_TOLERANCE
        );
        S3Point(coords)
    }

    /// The designated axis point `(1, 0, 0, 0)` used for degenerate centroids.
    pub const AXIS_X: S3Point = S3Point([1.0, 0.0, 0.0, 0.0]);

    /// The reserved axis point `(0, 0, 0, 1)` assigned to unassigned codepoints.
    pub const AXIS_W: S3Point = S3Point([0.0, 0.0, 0.0, 1.0]);

    /// Raw ordinates in `(x, y, z, w)` order.
    #[inline]
    pub fn coords(&self) -> [f64; 4] {
        self.0
    }

    /// Euclidean inner product with another point.
    #[inline]
    pub fn dot(&self, other: &S3Point) -> f64 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    /// Map `[-1, 1]⁴` ordinates into the unit hypercube `[0, 1]⁴`.
    ///
    /// Out-of-range ordinates (possible only through fp error) are clamped;
    /// this is the form the Hilbert encoder consumes.
    pub fn to_unit_cube(&self) -> [f64; 4] {
        let mut out = [0.0; 4];
        for (o, c) in out.iter_mut().zip(self.0.iter()) {
            *o = ((c + 1.0) * 0.5).clamp(0.0, 1.0);
        }
        out
    }

    /// Canonical byte encoding: four big-endian IEEE-754 doubles in
    /// `(x, y, z, w)` order. Physicality ids hash these bytes.
    pub fn canonical_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, c) in self.0.iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&c.to_bits().to_be_bytes());
        }
        out
    }
}

// ============================================================================
// Super-Fibonacci lattice
// ============================================================================

/// Winding counts for a lattice of `n` points.
///
/// `m₁` (slow angle) grows like `n^⅓/φ`, `m₂` (fast angle) like `n^⅔/ψ`;
/// both are at least 1. The irrational divisors keep the two windings and
/// the polar sweep off resonance.
fn windings(n: f64) -> (f64, f64) {
    let m1 = (n.cbrt() / PHI).round().max(1.0);
    let m2 = (n.cbrt().powi(2) / PSI).round().max(1.0);
    (m1, m2)
}

fn spiral_point(s: f64, t: f64, n: f64) -> S3Point {
    let (m1, m2) = windings(n);
    let r = t.sqrt();
    let cr = (1.0 - t).sqrt();
    let alpha = std::f64::consts::TAU * s * m1 / n;
    let beta = std::f64::consts::TAU * s * m2 / n;
    S3Point::unit_unchecked([
        r * alpha.sin(),
        r * alpha.cos(),
        cr * beta.sin(),
        cr * beta.cos(),
    ])
}

/// Deterministic lattice point `i` of `n` on S³ (checked).
pub fn point_on_s3_r(i: u64, n: u64) -> Result<S3Point, GeomError> {
    if n == 0 || i >= n {
        return Err(GeomError::IndexOutOfRange { i, n });
    }
    let s = i as f64 + 0.5;
    let nf = n as f64;
    Ok(spiral_point(s, s / nf, nf))
}

/// Deterministic lattice point `i` of `n` on S³ (panics on out-of-range).
pub fn point_on_s3(i: u64, n: u64) -> S3Point {
    point_on_s3_r(i, n).expect("lattice index out of range")
}

/// Map a digest onto S³ through the same spiral.
///
/// The two 8-byte halves become uniforms `u₁, u₂ ∈ [0, 1)`; `u₁` drives the
/// polar parameter directly and `u₂` a virtual index `s = u₂·2³²` at
/// `n = 2³²`. Distinct digests map to distinct points almost surely.
///
/// This is a projection for *derived* material (composition trajectories,
/// visualization). Atom positions never come from here — they are seeded
/// through the semantic ordering and resolved via the atom table.
pub fn hash_to_point(digest: &Digest) -> S3Point {
    const VIRTUAL_N: f64 = 4294967296.0; // 2^32
    let (lo, hi) = digest.halves();
    let u1 = (lo >> 11) as f64 / (1u64 << 53) as f64;
    let u2 = (hi >> 11) as f64 / (1u64 << 53) as f64;
    spiral_point(u2 * VIRTUAL_N, u1, VIRTUAL_N)
}

// ============================================================================
// Hopf fibration, distance, SLERP, centroid
// ============================================================================

/// The Hopf map S³ → S².
///
/// With `z₁ = x + iy` and `z₂ = z + iw`:
/// `(|z₁|² − |z₂|², 2·Re(z̄₂·z₁), 2·Im(z̄₂·z₁))`. The image has unit norm
/// and is invariant under a common phase rotation of `(z₁, z₂)` (the fiber).
pub fn hopf_forward(p: &S3Point) -> [f64; 3] {
    let [x, y, z, w] = p.coords();
    [
        (x * x + y * y) - (z * z + w * w),
        2.0 * (z * x + w * y),
        2.0 * (z * y - w * x),
    ]
}

/// Geodesic distance on S³: `arccos(clamp(a·b, −1, 1))`, in radians.
pub fn distance_s3(a: &S3Point, b: &S3Point) -> f64 {
    a.dot(b).clamp(-1.0, 1.0).acos()
}

/// Shortest-arc spherical linear interpolation.
///
/// Exact at the endpoints; falls back to linear interpolation plus
/// renormalization when the angular gap drops below 1e-10.
pub fn slerp(a: &S3Point, b: &S3Point, t: f64) -> Result<S3Point, GeomError> {
    if !t.is_finite() {
        return Err(GeomError::NonFinite("slerp parameter"));
    }
    if t == 0.0 {
        return Ok(*a);
    }
    if t == 1.0 {
        return Ok(*b);
    }
    let dot = a.dot(b).clamp(-1.0, 1.0);
    let omega = dot.acos();
    let coords = if omega < SLERP_LINEAR_FALLBACK {
        let mut out = [0.0; 4];
        for i in 0..4 {
            out[i] = a.0[i] + t * (b.0[i] - a.0[i]);
        }
        let norm = out.iter().map(|c| c * c).sum::<f64>().sqrt();
        for c in &mut out {
            *c /= norm;
        }
        out
    } else {
        let sin_omega = omega.sin();
        let ka = ((1.0 - t) * omega).sin() / sin_omega;
        let kb = (t * omega).sin() / sin_omega;
        let mut out = [0.0; 4];
        for i in 0..4 {
            out[i] = ka * a.0[i] + kb * b.0[i];
        }
        out
    };
    if coords.iter().any(|c| !c.is_finite()) {
        return Err(GeomError::NonFinite("slerp result"));
    }
    Ok(S3Point::unit_unchecked(coords))
}

/// Result of a spherical centroid computation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Centroid {
    /// The normalized mean (or the +x axis when degenerate).
    pub point: S3Point,
    /// True when the arithmetic mean had zero magnitude and the designated
    /// axis point was substituted.
    pub degenerate: bool,
}

/// Normalized arithmetic mean of a multiset of S³ points.
pub fn spherical_centroid(points: &[S3Point]) -> Centroid {
    let mut sum = [0.0f64; 4];
    for p in points {
        for (s, c) in sum.iter_mut().zip(p.0.iter()) {
            *s += c;
        }
    }
    let norm = sum.iter().map(|c| c * c).sum::<f64>().sqrt();
    if norm < 1e-12 || !norm.is_finite() {
        return Centroid { point: S3Point::AXIS_X, degenerate: true };
    }
    for c in &mut sum {
        *c /= norm;
    }
    Centroid { point: S3Point::unit_unchecked(sum), degenerate: false }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn norm4(c: [f64; 4]) -> f64 {
        c.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    #[test]
    fn lattice_points_are_unit_norm() {
        for n in [1u64, 2, 7, 200, 1000] {
            for i in 0..n.min(64) {
                let p = point_on_s3(i, n);
                assert!((norm4(p.coords()) - 1.0).abs() < UNIT_EPSILON, "i={i} n={n}");
            }
        }
    }

    #[test]
    fn lattice_is_deterministic_bitwise() {
        for i in [0u64, 1, 99, 4096] {
            let a = point_on_s3(i, 5000).coords();
            let b = point_on_s3(i, 5000).coords();
            for k in 0..4 {
                assert_eq!(a[k].to_bits(), b[k].to_bits());
            }
        }
    }

    #[test]
    fn lattice_rejects_out_of_range() {
        assert!(matches!(point_on_s3_r(5, 5), Err(GeomError::IndexOutOfRange { .. })));
        assert!(matches!(point_on_s3_r(0, 0), Err(GeomError::IndexOutOfRange { .. })));
    }

    #[test]
    fn consecutive_indices_are_nearer_than_distant_bands() {
        // Points in different polar bands are separated by at least the
        // band gap regardless of winding phase; consecutive points sit in
        // the same band one spiral step apart.
        let n = 1000;
        let near = distance_s3(&point_on_s3(100, n), &point_on_s3(101, n));
        let far = distance_s3(&point_on_s3(100, n), &point_on_s3(900, n));
        assert!(near < far, "near={near} far={far}");
    }

    #[test]
    fn nearest_neighbor_cv_is_bounded() {
        // Coefficient of variation of nearest-neighbor angular distances
        // stays below 0.5 for n >= 200.
        for n in [256u64, 512] {
            let pts: Vec<S3Point> = (0..n).map(|i| point_on_s3(i, n)).collect();
            let mut nn = Vec::with_capacity(pts.len());
            for (i, p) in pts.iter().enumerate() {
                let mut best = f64::MAX;
                for (j, q) in pts.iter().enumerate() {
                    if i != j {
                        best = best.min(distance_s3(p, q));
                    }
                }
                nn.push(best);
            }
            let mean = nn.iter().sum::<f64>() / nn.len() as f64;
            let var = nn.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / nn.len() as f64;
            let cv = var.sqrt() / mean;
            assert!(cv < 0.5, "n={n} cv={cv}");
        }
    }

    #[test]
    fn hash_points_are_unit_and_distinct() {
        let a = hash_to_point(&Digest::hash(b"alpha"));
        let b = hash_to_point(&Digest::hash(b"beta"));
        assert!((norm4(a.coords()) - 1.0).abs() < UNIT_EPSILON);
        assert!((norm4(b.coords()) - 1.0).abs() < UNIT_EPSILON);
        assert!(distance_s3(&a, &b) > 0.0);
    }

    #[test]
    fn hopf_image_is_unit_norm() {
        for i in 0..50u64 {
            let img = hopf_forward(&point_on_s3(i, 50));
            let n = img.iter().map(|x| x * x).sum::<f64>().sqrt();
            assert!((n - 1.0).abs() < UNIT_EPSILON);
        }
    }

    #[test]
    fn hopf_is_fiber_invariant() {
        // Rotating both complex components by a common phase preserves the image.
        let p = point_on_s3(17, 100);
        let [x, y, z, w] = p.coords();
        let theta: f64 = 0.8317;
        let (s, c) = theta.sin_cos();
        let rotated = S3Point::new([
            x * c - y * s,
            x * s + y * c,
            z * c - w * s,
            z * s + w * c,
        ])
        .unwrap();
        let a = hopf_forward(&p);
        let b = hopf_forward(&rotated);
        for k in 0..3 {
            assert!((a[k] - b[k]).abs() < UNIT_EPSILON, "component {k}");
        }
    }

    #[test]
    fn slerp_endpoints_are_exact() {
        let a = point_on_s3(3, 64);
        let b = point_on_s3(40, 64);
        assert_eq!(slerp(&a, &b, 0.0).unwrap(), a);
        assert_eq!(slerp(&a, &b, 1.0).unwrap(), b);
    }

    #[test]
    fn slerp_intermediates_stay_on_sphere() {
        let a = point_on_s3(0, 32);
        let b = point_on_s3(20, 32);
        for k in 1..10 {
            let t = k as f64 / 10.0;
            let p = slerp(&a, &b, t).unwrap();
            assert!((norm4(p.coords()) - 1.0).abs() < UNIT_EPSILON, "t={t}");
        }
    }

    #[test]
    fn slerp_handles_coincident_points() {
        let a = point_on_s3(5, 16);
        let p = slerp(&a, &a, 0.5).unwrap();
        assert!(distance_s3(&a, &p) < UNIT_EPSILON);
    }

    #[test]
    fn centroid_of_single_point_is_that_point() {
        let a = point_on_s3(9, 100);
        let c = spherical_centroid(&[a]);
        assert!(!c.degenerate);
        assert!(distance_s3(&a, &c.point) < UNIT_EPSILON);
    }

    #[test]
    fn centroid_of_antipodes_is_degenerate_axis() {
        let a = S3Point::new([0.0, 1.0, 0.0, 0.0]).unwrap();
        let b = S3Point::new([0.0, -1.0, 0.0, 0.0]).unwrap();
        let c = spherical_centroid(&[a, b]);
        assert!(c.degenerate);
        assert_eq!(c.point, S3Point::AXIS_X);
    }

    #[test]
    fn centroid_of_empty_multiset_is_degenerate() {
        let c = spherical_centroid(&[]);
        assert!(c.degenerate);
    }

    #[test]
    fn new_rejects_bad_points() {
        assert!(matches!(
            S3Point::new([2.0, 0.0, 0.0, 0.0]),
            Err(GeomError::NotNormalized { .. })
        ));
        assert!(matches!(
            S3Point::new([f64::NAN, 0.0, 0.0, 1.0]),
            Err(GeomError::NonFinite(_))
        ));
    }

    #[test]
    fn canonical_bytes_round_trip_ordinates() {
        let p = point_on_s3(7, 64);
        let bytes = p.canonical_bytes();
        let [x, ..] = p.coords();
        let mut first = [0u8; 8];
        first.copy_from_slice(&bytes[..8]);
        assert_eq!(f64::from_bits(u64::from_be_bytes(first)), x);
    }

    #[test]
    fn unit_cube_mapping_clamps_and_centers() {
        let p = S3Point::AXIS_X;
        let c = p.to_unit_cube();
        assert_eq!(c, [1.0, 0.5, 0.5, 0.5]);
    }
}
