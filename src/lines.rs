//! Grid line evidence: Canny edges, Hough lines and the split into two
//! near-perpendicular line families (ranks and files).

use crate::config::LocatorConfig;
use crate::geometry::line_angle_distance;
use image::GrayImage;
use imageproc::edges::canny;
use imageproc::hough::{LineDetectionOptions, detect_lines};
use log::debug;

/// One Hough line, normalized so that lines of the same family share a normal
/// direction and can be compared by `offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FamilyLine {
    /// Normal angle in degrees, within tolerance of the family direction
    /// (may leave [0, 180) after normalization).
    pub theta_deg: f32,
    /// Signed distance along the normal, measured from the image centre.
    pub offset: f32,
    /// Edge pixels on the line, see [`edge_support`].
    pub support: u32,
}

/// A detected line in imageproc's polar form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HoughLine {
    pub theta_deg: f32,
    pub rho: f32,
    pub support: u32,
}

pub fn edge_map(gray: &GrayImage, config: &LocatorConfig) -> GrayImage {
    canny(gray, config.canny_low, config.canny_high)
}

pub fn hough_lines(edges: &GrayImage, config: &LocatorConfig) -> Vec<HoughLine> {
    let options = LineDetectionOptions {
        vote_threshold: config.min_line_votes,
        suppression_radius: config.line_suppression_radius,
    };
    let lines: Vec<HoughLine> = detect_lines(edges, options)
        .into_iter()
        .map(|l| {
            let theta_deg = l.angle_in_degrees as f32;
            HoughLine {
                theta_deg,
                rho: l.r,
                support: edge_support(edges, theta_deg, l.r),
            }
        })
        .collect();
    debug!("Hough transform found {} lines", lines.len());
    lines
}

/// Counts edge pixels within one pixel of the line `x cos θ + y sin θ = rho`,
/// stepping along its dominant axis. The accumulator wraps between 179° and 0°
/// without suppression, so an edge can come back as two lines a degree apart;
/// the true one has the larger support.
pub fn edge_support(edges: &GrayImage, theta_deg: f32, rho: f32) -> u32 {
    let (w, h) = edges.dimensions();
    let (s, c) = theta_deg.to_radians().sin_cos();
    let on_edge = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && x < w as i64
            && y < h as i64
            && edges.get_pixel(x as u32, y as u32)[0] > 0
    };

    let mut count = 0;
    if s.abs() > c.abs() {
        for x in 0..w as i64 {
            let y = ((rho - x as f32 * c) / s).round() as i64;
            if (-1..=1).any(|d| on_edge(x, y + d)) {
                count += 1;
            }
        }
    } else {
        for y in 0..h as i64 {
            let x = ((rho - y as f32 * s) / c).round() as i64;
            if (-1..=1).any(|d| on_edge(x + d, y)) {
                count += 1;
            }
        }
    }
    count
}

/// Collects the lines within `tolerance` of direction `center_deg`, expressed
/// relative to the image centre `(cx, cy)` and sorted by offset.
pub fn family(
    lines: &[HoughLine],
    center_deg: f32,
    tolerance: f32,
    (cx, cy): (f32, f32),
) -> Vec<FamilyLine> {
    let mut out: Vec<FamilyLine> = lines
        .iter()
        .filter(|l| line_angle_distance(l.theta_deg, center_deg) <= tolerance)
        .map(|l| {
            // (rho, θ) and (-rho, θ ± 180) describe the same line; pick the
            // representation whose normal points the family's way.
            let mut theta = l.theta_deg;
            let mut rho = l.rho;
            let raw = theta - center_deg;
            if raw > 90.0 {
                theta -= 180.0;
                rho = -rho;
            } else if raw < -90.0 {
                theta += 180.0;
                rho = -rho;
            }
            let t = theta.to_radians();
            FamilyLine {
                theta_deg: theta,
                offset: rho - (cx * t.cos() + cy * t.sin()),
                support: l.support,
            }
        })
        .collect();
    out.sort_by(|a, b| a.offset.total_cmp(&b.offset));
    out
}

/// Distinct candidate family directions in [0, 90): every line angle folded
/// onto a quarter turn, since a family and its perpendicular form one hypothesis.
pub fn orientation_candidates(lines: &[HoughLine]) -> Vec<f32> {
    let mut angles: Vec<f32> = lines.iter().map(|l| l.theta_deg.rem_euclid(90.0)).collect();
    angles.sort_by(|a, b| a.total_cmp(b));
    angles.dedup_by(|a, b| (*a - *b).abs() < 0.5);
    angles
}
