//! Fits the nine equally spaced grid lines of an 8x8 board to one line family.

use crate::lines::FamilyLine;

pub const CELLS: usize = 8;
const SLOTS: usize = CELLS + 1;
/// Lines kept per family before the candidate search, strongest first.
pub const MAX_FAMILY_LINES: usize = 40;

/// Nine lattice positions `start + k * spacing` along one family's normal.
#[derive(Clone, Debug, PartialEq)]
pub struct LatticeFit {
    pub start: f32,
    pub spacing: f32,
    /// Number of lattice slots backed by a detected line.
    pub inliers: usize,
    /// Mean squared slot residual, in units of `spacing²`.
    pub residual: f32,
    /// Median normal angle of the inlier lines.
    pub theta_deg: f32,
    /// How far the inliers sit from the lattice middle, in slots.
    pub imbalance: f32,
}

impl LatticeFit {
    pub fn position(&self, k: usize) -> f32 {
        self.start + k as f32 * self.spacing
    }

    /// Better fit first: more inliers, then lower residual, then better centred.
    fn beats(&self, other: &LatticeFit) -> bool {
        if self.inliers != other.inliers {
            return self.inliers > other.inliers;
        }
        if (self.residual - other.residual).abs() > 1e-4 {
            return self.residual < other.residual;
        }
        self.imbalance < other.imbalance
    }
}

/// Best lattice for a family sorted by offset, or `None` when no candidate has
/// two inliers at a spacing of at least `min_spacing`.
pub fn fit_lattice(lines: &[FamilyLine], min_spacing: f32, tolerance: f32) -> Option<LatticeFit> {
    let lines = prune(lines, min_spacing / 2.0);
    let mut best: Option<LatticeFit> = None;

    for i in 0..lines.len() {
        for j in i + 1..lines.len() {
            let span = lines[j].offset - lines[i].offset;
            for cells in 1..=CELLS {
                let spacing = span / cells as f32;
                if spacing < min_spacing {
                    continue;
                }
                for shift in 0..=CELLS - cells {
                    let start = lines[i].offset - shift as f32 * spacing;
                    let Some(fit) = score(&lines, start, spacing, tolerance) else {
                        continue;
                    };
                    if best.as_ref().is_none_or(|b| fit.beats(b)) {
                        best = Some(fit);
                    }
                }
            }
        }
    }
    best
}

/// Merges lines closer than `gap` and keeps at most [`MAX_FAMILY_LINES`],
/// sorted by offset. Each cluster is represented by its best-supported member;
/// ties go to the angle nearest the family median.
fn prune(lines: &[FamilyLine], gap: f32) -> Vec<FamilyLine> {
    if lines.is_empty() {
        return Vec::new();
    }
    let family_deg = median(lines.iter().map(|l| l.theta_deg).collect());
    let better = |a: &FamilyLine, b: &FamilyLine| {
        if a.support != b.support {
            return a.support > b.support;
        }
        (a.theta_deg - family_deg).abs() < (b.theta_deg - family_deg).abs()
    };

    let mut out: Vec<FamilyLine> = Vec::with_capacity(lines.len());
    let mut prev_offset = f32::NEG_INFINITY;
    for line in lines {
        let chained = line.offset - prev_offset < gap;
        prev_offset = line.offset;
        match out.last_mut() {
            Some(kept) if chained => {
                if better(line, kept) {
                    *kept = *line;
                }
            }
            _ => out.push(*line),
        }
    }

    if out.len() > MAX_FAMILY_LINES {
        out.sort_by(|a, b| b.support.cmp(&a.support));
        out.truncate(MAX_FAMILY_LINES);
        out.sort_by(|a, b| a.offset.total_cmp(&b.offset));
    }
    out
}

fn median(mut values: Vec<f32>) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn score(lines: &[FamilyLine], start: f32, spacing: f32, tolerance: f32) -> Option<LatticeFit> {
    let mut matched: Vec<(usize, FamilyLine)> = Vec::with_capacity(SLOTS);
    for k in 0..SLOTS {
        let expected = start + k as f32 * spacing;
        let nearest = lines
            .iter()
            .min_by(|a, b| (a.offset - expected).abs().total_cmp(&(b.offset - expected).abs()));
        if let Some(line) = nearest {
            if (line.offset - expected).abs() <= tolerance * spacing {
                matched.push((k, *line));
            }
        }
    }
    if matched.len() < 2 {
        return None;
    }
    refine(&matched)
}

// Least-squares refit of start and spacing over matched slots.
fn refine(matched: &[(usize, FamilyLine)]) -> Option<LatticeFit> {
    let n = matched.len() as f32;
    let mean_k = matched.iter().map(|(k, _)| *k as f32).sum::<f32>() / n;
    let mean_o = matched.iter().map(|(_, l)| l.offset).sum::<f32>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (k, l) in matched {
        let dk = *k as f32 - mean_k;
        sxx += dk * dk;
        sxy += dk * (l.offset - mean_o);
    }
    if sxx <= f32::EPSILON {
        return None;
    }
    let spacing = sxy / sxx;
    if spacing <= f32::EPSILON {
        return None;
    }
    let start = mean_o - spacing * mean_k;

    let residual = matched
        .iter()
        .map(|(k, l)| {
            let r = (l.offset - (start + *k as f32 * spacing)) / spacing;
            r * r
        })
        .sum::<f32>()
        / n;
    let theta_deg = median(matched.iter().map(|(_, l)| l.theta_deg).collect());

    Some(LatticeFit {
        start,
        spacing,
        inliers: matched.len(),
        residual,
        theta_deg,
        imbalance: (mean_k - CELLS as f32 / 2.0).abs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(offsets: &[f32]) -> Vec<FamilyLine> {
        offsets
            .iter()
            .map(|&offset| FamilyLine {
                theta_deg: 0.0,
                offset,
                support: 100,
            })
            .collect()
    }

    #[test]
    fn test_fits_full_grid() {
        let offsets: Vec<f32> = (0..9).map(|k| -144.0 + 36.0 * k as f32).collect();
        let fit = fit_lattice(&lines(&offsets), 8.0, 0.15).unwrap();
        assert_eq!(fit.inliers, 9);
        assert!((fit.spacing - 36.0).abs() < 1e-3);
        assert!((fit.start + 144.0).abs() < 1e-3);
        assert!(fit.residual < 1e-6);
    }

    #[test]
    fn test_ignores_outliers() {
        let mut offsets: Vec<f32> = (0..9).map(|k| 10.0 + 40.0 * k as f32).collect();
        offsets.extend([-120.0, 27.0, 400.0]);
        offsets.sort_by(|a, b| a.total_cmp(b));
        let fit = fit_lattice(&lines(&offsets), 8.0, 0.15).unwrap();
        assert_eq!(fit.inliers, 9);
        assert!((fit.start - 10.0).abs() < 1e-3);
        assert!((fit.spacing - 40.0).abs() < 1e-3);
    }

    #[test]
    fn test_centres_when_outer_lines_are_missing() {
        // Only the seven inner lines are visible.
        let offsets: Vec<f32> = (1..8).map(|k| 40.0 * k as f32).collect();
        let fit = fit_lattice(&lines(&offsets), 8.0, 0.15).unwrap();
        assert_eq!(fit.inliers, 7);
        assert!(fit.start.abs() < 1e-3);
        assert!((fit.position(8) - 320.0).abs() < 1e-3);
    }

    #[test]
    fn test_tolerates_jitter() {
        let offsets = [0.0, 41.0, 79.5, 120.0, 161.0, 199.0, 240.5, 280.0, 320.0];
        let fit = fit_lattice(&lines(&offsets), 8.0, 0.15).unwrap();
        assert_eq!(fit.inliers, 9);
        assert!((fit.spacing - 40.0).abs() < 0.5);
        assert!(fit.residual > 0.0);
    }

    #[test]
    fn test_too_few_lines() {
        assert!(fit_lattice(&lines(&[12.0]), 8.0, 0.15).is_none());
        assert!(fit_lattice(&lines(&[]), 8.0, 0.15).is_none());
    }

    #[test]
    fn test_merges_duplicate_detections() {
        let offsets = [0.0, 1.5, 40.0, 80.0, 81.0, 120.0];
        let fit = fit_lattice(&lines(&offsets), 8.0, 0.15).unwrap();
        assert_eq!(fit.inliers, 4);
    }

    #[test]
    fn test_duplicates_keep_the_best_supported_angle() {
        // Each edge also shows up one degree off, slightly shifted and weaker.
        let mut family = Vec::new();
        for k in 0..9 {
            let offset = -160.0 + 40.0 * k as f32;
            family.push(FamilyLine {
                theta_deg: -1.0,
                offset: offset - 0.3,
                support: 70,
            });
            family.push(FamilyLine {
                theta_deg: 0.0,
                offset,
                support: 320,
            });
        }
        let fit = fit_lattice(&family, 8.0, 0.15).unwrap();
        assert_eq!(fit.inliers, 9);
        assert_eq!(fit.theta_deg, 0.0);
        assert!((fit.start + 160.0).abs() < 1e-3);
        assert!((fit.spacing - 40.0).abs() < 1e-3);
    }

    #[test]
    fn test_equal_support_prefers_family_angle() {
        let mut family = lines(&[0.0, 0.5, 40.0, 80.0]);
        family[0].theta_deg = 2.0;
        let kept = prune(&family, 4.0);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].theta_deg, 0.0);
    }

    #[test]
    fn test_prune_keeps_strongest_lines() {
        let mut family: Vec<FamilyLine> = (0..100)
            .map(|k| FamilyLine {
                theta_deg: 0.0,
                offset: -1000.0 + 20.0 * k as f32,
                support: if k % 10 == 0 { 500 } else { 10 + k as u32 },
            })
            .collect();
        family.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        let kept = prune(&family, 4.0);
        assert_eq!(kept.len(), MAX_FAMILY_LINES);
        assert_eq!(kept.iter().filter(|l| l.support == 500).count(), 10);
        assert!(kept.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn test_median_of_even_and_odd() {
        assert_eq!(median(vec![3.0, -1.0, 0.0]), 0.0);
        assert_eq!(median(vec![-1.0, 0.0, 0.0, -1.0]), -0.5);
    }
}
