//! Plane geometry for board rectification: lines in normal form, the board
//! quadrilateral and 3x3 projective transforms.
//!
//! Coordinates are image pixels with the y axis pointing down, so a positive
//! angle turns clockwise on screen.

use imageproc::geometric_transformations::Projection;
use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Reduces an angle in degrees to (-45, 45].
pub fn reduce_quarter_turn(deg: f32) -> f32 {
    let mut a = deg.rem_euclid(90.0);
    if a > 45.0 {
        a -= 90.0;
    }
    a
}

/// Angular distance between two line directions, modulo 180 degrees.
pub fn line_angle_distance(a_deg: f32, b_deg: f32) -> f32 {
    let d = (a_deg - b_deg).rem_euclid(180.0);
    d.min(180.0 - d)
}

/// Line `x·cos θ + y·sin θ = rho`, θ being the direction of the normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalLine {
    pub theta_deg: f32,
    pub rho: f32,
}

impl NormalLine {
    pub fn new(theta_deg: f32, rho: f32) -> Self {
        Self { theta_deg, rho }
    }

    fn normal(&self) -> (f32, f32) {
        let t = self.theta_deg.to_radians();
        (t.cos(), t.sin())
    }

    /// Signed distance of `p` from the line.
    pub fn distance(&self, p: Point2<f32>) -> f32 {
        let (c, s) = self.normal();
        p.x * c + p.y * s - self.rho
    }

    /// Intersection point, `None` for (near) parallel lines.
    pub fn intersect(&self, other: &NormalLine) -> Option<Point2<f32>> {
        let (c1, s1) = self.normal();
        let (c2, s2) = other.normal();
        let det = c1 * s2 - s1 * c2;
        if det.abs() < 1e-6 {
            return None;
        }
        let x = (self.rho * s2 - other.rho * s1) / det;
        let y = (c1 * other.rho - c2 * self.rho) / det;
        Some(Point2::new(x, y))
    }
}

/// Board outline in screenshot pixels, clockwise from the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Point2<f32>; 4],
}

impl Quad {
    /// Orders four arbitrary corners clockwise from top-left, where "top-left"
    /// is judged after undoing `skew_deg`.
    pub fn from_unordered(points: [Point2<f32>; 4], skew_deg: f32) -> Self {
        let center = centroid(&points);
        let derotate = Homography::rotation_about(center, -skew_deg);
        let upright = points.map(|p| derotate.apply(p));

        let pick = |score: &dyn Fn(Point2<f32>) -> f32| -> Point2<f32> {
            let mut best = 0;
            for i in 1..4 {
                if score(upright[i]) > score(upright[best]) {
                    best = i;
                }
            }
            points[best]
        };

        Self {
            corners: [
                pick(&|p| -(p.x + p.y)),
                pick(&|p| p.x - p.y),
                pick(&|p| p.x + p.y),
                pick(&|p| p.y - p.x),
            ],
        }
    }

    pub fn center(&self) -> Point2<f32> {
        centroid(&self.corners)
    }

    pub fn side_lengths(&self) -> [f32; 4] {
        let c = &self.corners;
        [0, 1, 2, 3].map(|i| (c[(i + 1) % 4] - c[i]).norm())
    }

    /// `(longest - shortest) / longest` over the four sides; 0 for a perfect square.
    pub fn squareness_residual(&self) -> f32 {
        let sides = self.side_lengths();
        let max = sides.iter().cloned().fold(f32::MIN, f32::max);
        let min = sides.iter().cloned().fold(f32::MAX, f32::min);
        if max <= f32::EPSILON {
            return 1.0;
        }
        (max - min) / max
    }

    /// Strictly convex with a consistent winding. Also rules out self-intersection.
    pub fn is_convex(&self) -> bool {
        let c = &self.corners;
        let mut sign = 0.0f32;
        for i in 0..4 {
            let a = c[(i + 1) % 4] - c[i];
            let b = c[(i + 2) % 4] - c[(i + 1) % 4];
            let cross = a.x * b.y - a.y * b.x;
            if cross.abs() < 1e-3 {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Mean deviation of the four edges from the image axes, in (-45, 45].
    pub fn skew_deg(&self) -> f32 {
        let c = &self.corners;
        let mut sum = 0.0;
        for i in 0..4 {
            let d = c[(i + 1) % 4] - c[i];
            sum += reduce_quarter_turn(d.y.atan2(d.x).to_degrees());
        }
        sum / 4.0
    }

    pub fn transformed(&self, h: &Homography) -> Quad {
        Quad {
            corners: self.corners.map(|p| h.apply(p)),
        }
    }
}

fn centroid(points: &[Point2<f32>; 4]) -> Point2<f32> {
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point2::new(sx / 4.0, sy / 4.0)
}

/// Projective transform `dst ~ H · src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Rotation by `deg` (clockwise on screen) about `center`.
    pub fn rotation_about(center: Point2<f32>, deg: f32) -> Self {
        let t = (deg as f64).to_radians();
        let (s, c) = t.sin_cos();
        let (cx, cy) = (center.x as f64, center.y as f64);
        Self::new(Matrix3::new(
            c, -s, cx - c * cx + s * cy, //
            s, c, cy - s * cx - c * cy, //
            0.0, 0.0, 1.0,
        ))
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let v = self.h * Vector3::new(p.x as f64, p.y as f64, 1.0);
        let w = v[2];
        Point2::new((v[0] / w) as f32, (v[1] / w) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Converts to an imageproc projection for warping (input → output pixels).
    pub fn to_projection(&self) -> Option<Projection> {
        let m = self.h / self.h[(2, 2)];
        let mut out = [0f32; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 3 + c] = m[(r, c)] as f32;
            }
        }
        Projection::from_matrix(out)
    }

    /// Exact homography from four correspondences `src[k] -> dst[k]`.
    pub fn from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Self> {
        let (src_n, t_src) = normalize_points4(src);
        let (dst_n, t_dst) = normalize_points4(dst);

        // Unknowns h11..h32 with h33 = 1.
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for k in 0..4 {
            let (x, y) = (src_n[k].x, src_n[k].y);
            let (u, v) = (dst_n[k].x, dst_n[k].y);

            let r0 = 2 * k;
            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -u * x;
            a[(r0, 7)] = -u * y;
            b[r0] = u;

            let r1 = 2 * k + 1;
            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -v * x;
            a[(r1, 7)] = -v * y;
            b[r1] = v;
        }

        let x = a.lu().solve(&b)?;
        let hn = Matrix3::new(
            x[0], x[1], x[2], //
            x[3], x[4], x[5], //
            x[6], x[7], 1.0,
        );

        let h = t_dst.try_inverse()? * hn * t_src;
        let s = h[(2, 2)];
        if s.abs() < 1e-12 {
            return None;
        }
        Some(Self::new(h / s))
    }
}

// Hartley normalization: centroid to origin, mean distance sqrt(2).
fn normalize_points4(pts: &[Point2<f32>; 4]) -> ([Point2<f64>; 4], Matrix3<f64>) {
    let c = centroid(pts);
    let (cx, cy) = (c.x as f64, c.y as f64);
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-12 { 2f64.sqrt() / mean_dist } else { 1.0 };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);

    let out = pts.map(|p| {
        let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Point2::new(v[0], v[1])
    });
    (out, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square(side: f32) -> [Point2<f32>; 4] {
        [
            Point2::new(0.0, 0.0),
            Point2::new(side, 0.0),
            Point2::new(side, side),
            Point2::new(0.0, side),
        ]
    }

    #[test]
    fn test_reduce_quarter_turn_range() {
        assert_abs_diff_eq!(reduce_quarter_turn(98.0), 8.0, epsilon = 1e-4);
        assert_abs_diff_eq!(reduce_quarter_turn(-8.0), -8.0, epsilon = 1e-4);
        assert_abs_diff_eq!(reduce_quarter_turn(179.0), -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(reduce_quarter_turn(45.0), 45.0, epsilon = 1e-4);
        assert_abs_diff_eq!(reduce_quarter_turn(-45.0), 45.0, epsilon = 1e-4);
    }

    #[test]
    fn test_line_distance_wraps() {
        assert_abs_diff_eq!(line_angle_distance(1.0, 179.0), 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(line_angle_distance(10.0, 100.0), 90.0, epsilon = 1e-4);
    }

    #[test]
    fn test_intersects_axis_lines() {
        let vertical = NormalLine::new(0.0, 30.0);
        let horizontal = NormalLine::new(90.0, 70.0);
        let p = vertical.intersect(&horizontal).unwrap();
        assert_abs_diff_eq!(p.x, 30.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.y, 70.0, epsilon = 1e-3);
        assert!(vertical.intersect(&NormalLine::new(0.0, 50.0)).is_none());
    }

    #[test]
    fn test_orders_rotated_corners() {
        let center = Point2::new(100.0, 100.0);
        let rot = Homography::rotation_about(center, 20.0);
        let base = square(80.0).map(|p| Point2::new(p.x + 60.0, p.y + 60.0));
        let rotated = base.map(|p| rot.apply(p));
        let shuffled = [rotated[2], rotated[0], rotated[3], rotated[1]];

        let quad = Quad::from_unordered(shuffled, 20.0);
        for (got, want) in quad.corners.iter().zip(rotated.iter()) {
            assert_abs_diff_eq!(got.x, want.x, epsilon = 1e-3);
            assert_abs_diff_eq!(got.y, want.y, epsilon = 1e-3);
        }
        assert_abs_diff_eq!(quad.skew_deg(), 20.0, epsilon = 1e-2);
        assert!(quad.is_convex());
        assert!(quad.squareness_residual() < 1e-4);
    }

    #[test]
    fn test_bow_tie_is_not_convex() {
        let c = square(10.0);
        let quad = Quad {
            corners: [c[0], c[2], c[1], c[3]],
        };
        assert!(!quad.is_convex());
    }

    #[test]
    fn test_rotation_round_trips() {
        let rot = Homography::rotation_about(Point2::new(40.0, 25.0), 33.0);
        let inv = rot.inverse().unwrap();
        let p = Point2::new(3.0, -7.0);
        let back = inv.apply(rot.apply(p));
        assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-3);
        assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-3);
    }

    #[test]
    fn test_four_point_maps_corners() {
        let src = [
            Point2::new(102.0, 95.0),
            Point2::new(390.0, 120.0),
            Point2::new(370.0, 400.0),
            Point2::new(90.0, 380.0),
        ];
        let dst = square(512.0);
        let h = Homography::from_4pt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            let m = h.apply(*s);
            assert_abs_diff_eq!(m.x, d.x, epsilon = 1e-2);
            assert_abs_diff_eq!(m.y, d.y, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_degenerate_points_have_no_homography() {
        let p = Point2::new(5.0, 5.0);
        assert!(Homography::from_4pt(&[p; 4], &square(10.0)).is_none());
    }
}
