//! Board locator.
//! Finds an 8x8 grid in an arbitrary screenshot and returns the board as an
//! axis-aligned square image of fixed resolution.
//!
//! Pipeline: grayscale → Canny → Hough lines → two perpendicular line
//! families → lattice fit per family → outer-line intersections as the board
//! quadrilateral → bicubic deskew → perspective warp.
//! Single pass and deterministic; any failed check rejects the screenshot.

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, warp_into};
use log::debug;
use nalgebra::Point2;

use crate::config::LocatorConfig;
use crate::geometry::{Homography, NormalLine, Quad, reduce_quarter_turn};
use crate::lattice::{CELLS, LatticeFit, fit_lattice};
use crate::lines::{self, HoughLine};
use crate::squares::{SliceError, SquareImage, slice_board};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NoBoardReason {
    #[error("image {width}x{height} is smaller than the minimum board size {min}")]
    ImageTooSmall { width: u32, height: u32, min: u32 },
    #[error("only {found} grid line candidates (need {required})")]
    TooFewLines { found: usize, required: usize },
    #[error("no pair of perpendicular line families forms a lattice")]
    NoLattice,
    #[error("lattice families have {rows} and {cols} inlier lines (need {required} each)")]
    TooFewInliers { rows: usize, cols: usize, required: usize },
    #[error("{found} lattice intersections (need {required})")]
    TooFewIntersections { found: usize, required: usize },
    #[error("board outline is not convex")]
    NotConvex,
    #[error("board outline is not square (residual {residual:.3}, tolerance {tolerance:.3})")]
    NotSquare { residual: f32, tolerance: f32 },
    #[error("degenerate board geometry")]
    Degenerate,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LocateError {
    #[error("no board detected: {0}")]
    NoBoard(NoBoardReason),
    #[error("ambiguous rotation: competing orientations at {best_deg:.1}° and {rival_deg:.1}°")]
    AmbiguousRotation { best_deg: f32, rival_deg: f32 },
    #[error("output size {0} is not a positive multiple of 8")]
    BadOutputSize(u32),
}

impl From<NoBoardReason> for LocateError {
    fn from(reason: NoBoardReason) -> Self {
        LocateError::NoBoard(reason)
    }
}

/// A perspective-corrected board plus the evidence it was built from.
#[derive(Clone, Debug)]
pub struct RectifiedBoard {
    /// `output_size x output_size`, top-left is the top-left board corner.
    pub image: RgbImage,
    /// Board outline in screenshot pixels.
    pub quad: Quad,
    /// Estimated board rotation in degrees, clockwise on screen, in (-45, 45].
    pub skew_deg: f32,
    pub rotation_applied: bool,
    /// Skew of the outline left after the corrective rotation.
    pub residual_skew_deg: f32,
    /// Inlier lines in the two families (out of 9 each).
    pub inliers: (usize, usize),
    /// Mean cell size in screenshot pixels.
    pub cell_px: f32,
}

impl RectifiedBoard {
    pub fn squares(&self) -> Result<Vec<SquareImage>, SliceError> {
        slice_board(&self.image)
    }
}

#[derive(Clone, Debug)]
struct Hypothesis {
    angle_deg: f32,
    a: LatticeFit,
    b: LatticeFit,
}

impl Hypothesis {
    fn lattice_points(&self) -> usize {
        self.a.inliers * self.b.inliers
    }

    fn beats(&self, other: &Hypothesis) -> bool {
        if self.lattice_points() != other.lattice_points() {
            return self.lattice_points() > other.lattice_points();
        }
        self.a.residual + self.b.residual < other.a.residual + other.b.residual
    }

    fn meets(&self, config: &LocatorConfig) -> bool {
        self.a.inliers >= config.min_family_inliers
            && self.b.inliers >= config.min_family_inliers
            && self.lattice_points() >= config.min_lattice_points
    }
}

/// Locates the chessboard in `screenshot` and rectifies it.
pub fn locate_board(
    screenshot: &DynamicImage,
    config: &LocatorConfig,
) -> Result<RectifiedBoard, LocateError> {
    let size = config.output_size;
    if size == 0 || size % CELLS as u32 != 0 {
        return Err(LocateError::BadOutputSize(size));
    }

    let (width, height) = screenshot.dimensions();
    if width < config.min_board_px || height < config.min_board_px {
        return Err(NoBoardReason::ImageTooSmall {
            width,
            height,
            min: config.min_board_px,
        }
        .into());
    }

    let gray = screenshot.to_luma8();
    let edges = lines::edge_map(&gray, config);
    let hough = lines::hough_lines(&edges, config);
    let required = 2 * config.min_family_inliers;
    if hough.len() < required {
        return Err(NoBoardReason::TooFewLines {
            found: hough.len(),
            required,
        }
        .into());
    }

    let center = (width as f32 / 2.0, height as f32 / 2.0);
    let hypotheses = orientation_hypotheses(&hough, center, config);
    let best = hypotheses
        .iter()
        .fold(None::<&Hypothesis>, |acc, h| match acc {
            Some(b) if !h.beats(b) => Some(b),
            _ => Some(h),
        })
        .ok_or(NoBoardReason::NoLattice)?;
    debug!(
        "Best orientation {:.1}°: {} x {} inliers, spacing {:.1} / {:.1}px",
        best.angle_deg, best.a.inliers, best.b.inliers, best.a.spacing, best.b.spacing
    );

    if best.a.inliers < config.min_family_inliers || best.b.inliers < config.min_family_inliers {
        return Err(NoBoardReason::TooFewInliers {
            rows: best.a.inliers,
            cols: best.b.inliers,
            required: config.min_family_inliers,
        }
        .into());
    }
    if best.lattice_points() < config.min_lattice_points {
        return Err(NoBoardReason::TooFewIntersections {
            found: best.lattice_points(),
            required: config.min_lattice_points,
        }
        .into());
    }

    let separation = 2.0 * config.angle_tolerance_deg;
    let threshold = config.ambiguity_ratio * best.lattice_points() as f32;
    if let Some(rival) = hypotheses.iter().find(|h| {
        quarter_turn_distance(h.angle_deg, best.angle_deg) > separation
            && h.meets(config)
            && h.lattice_points() as f32 >= threshold
    }) {
        return Err(LocateError::AmbiguousRotation {
            best_deg: best.angle_deg,
            rival_deg: rival.angle_deg,
        });
    }

    let skew_deg = estimate_skew(&best.a, &best.b);
    if skew_deg.abs() > 45.0 - config.ambiguity_band_deg {
        return Err(LocateError::AmbiguousRotation {
            best_deg: skew_deg,
            rival_deg: skew_deg - 90.0 * skew_deg.signum(),
        });
    }

    let quad = board_outline(&best.a, &best.b, center, skew_deg)?;
    if !quad.is_convex() {
        return Err(NoBoardReason::NotConvex.into());
    }
    let residual = quad.squareness_residual();
    if residual > config.squareness_tolerance {
        return Err(NoBoardReason::NotSquare {
            residual,
            tolerance: config.squareness_tolerance,
        }
        .into());
    }

    let rgb = screenshot.to_rgb8();
    let (working, working_quad, rotation_applied) =
        if skew_deg.abs() > config.rotation_tolerance_deg {
            let rotation = Homography::rotation_about(quad.center(), -skew_deg);
            let rotated = warp_rgb(&rgb, &rotation, width, height)?;
            (rotated, quad.transformed(&rotation), true)
        } else {
            (rgb, quad, false)
        };
    let residual_skew_deg = working_quad.skew_deg();
    debug!(
        "Skew {:.2}° (rotation applied: {}), residual {:.2}°",
        skew_deg, rotation_applied, residual_skew_deg
    );

    let s = size as f32;
    let target = [
        Point2::new(0.0, 0.0),
        Point2::new(s, 0.0),
        Point2::new(s, s),
        Point2::new(0.0, s),
    ];
    let to_square =
        Homography::from_4pt(&working_quad.corners, &target).ok_or(NoBoardReason::Degenerate)?;
    let image = warp_rgb(&working, &to_square, size, size)?;

    Ok(RectifiedBoard {
        image,
        quad,
        skew_deg,
        rotation_applied,
        residual_skew_deg,
        inliers: (best.a.inliers, best.b.inliers),
        cell_px: (best.a.spacing + best.b.spacing) / 2.0,
    })
}

fn orientation_hypotheses(
    hough: &[HoughLine],
    center: (f32, f32),
    config: &LocatorConfig,
) -> Vec<Hypothesis> {
    let tol = config.angle_tolerance_deg;
    let mut out = Vec::new();
    for angle_deg in lines::orientation_candidates(hough) {
        let fam_a = lines::family(hough, angle_deg, tol, center);
        let fam_b = lines::family(hough, angle_deg + 90.0, tol, center);
        let a = fit_lattice(&fam_a, config.min_cell_px, config.inlier_tolerance);
        let b = fit_lattice(&fam_b, config.min_cell_px, config.inlier_tolerance);
        if let (Some(a), Some(b)) = (a, b) {
            out.push(Hypothesis { angle_deg, a, b });
        }
    }
    out
}

fn quarter_turn_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(90.0);
    d.min(90.0 - d)
}

// Family B runs roughly perpendicular to A; average both directions folded
// onto A's quarter turn so the mean never straddles the ±45° seam.
fn estimate_skew(a: &LatticeFit, b: &LatticeFit) -> f32 {
    let ra = reduce_quarter_turn(a.theta_deg);
    let delta = reduce_quarter_turn(b.theta_deg - a.theta_deg - 90.0);
    reduce_quarter_turn(ra + delta / 2.0)
}

fn board_outline(
    a: &LatticeFit,
    b: &LatticeFit,
    (cx, cy): (f32, f32),
    skew_deg: f32,
) -> Result<Quad, NoBoardReason> {
    let line = |fit: &LatticeFit, k: usize| {
        let t = fit.theta_deg.to_radians();
        NormalLine::new(fit.theta_deg, fit.position(k) + cx * t.cos() + cy * t.sin())
    };
    let (a0, a8) = (line(a, 0), line(a, CELLS));
    let (b0, b8) = (line(b, 0), line(b, CELLS));

    let corners = [
        a0.intersect(&b0),
        a0.intersect(&b8),
        a8.intersect(&b8),
        a8.intersect(&b0),
    ];
    let mut points = [Point2::new(0.0f32, 0.0); 4];
    for (slot, corner) in points.iter_mut().zip(corners) {
        let p = corner.ok_or(NoBoardReason::Degenerate)?;
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(NoBoardReason::Degenerate);
        }
        *slot = p;
    }
    Ok(Quad::from_unordered(points, skew_deg))
}

fn warp_rgb(
    image: &RgbImage,
    transform: &Homography,
    width: u32,
    height: u32,
) -> Result<RgbImage, NoBoardReason> {
    let projection = transform.to_projection().ok_or(NoBoardReason::Degenerate)?;
    let mut out = RgbImage::new(width, height);
    warp_into(image, &projection, Interpolation::Bicubic, Rgb([0, 0, 0]), &mut out);
    Ok(out)
}
