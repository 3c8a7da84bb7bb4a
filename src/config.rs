//! Config module.
//! Manages I/O for `vision_config.json` (locator thresholds, classifier rules, synthesis jitter).
//! Uses serde for JSON serialization; every field has a default so partial files load.
//! Auto-generates defaults when the file is missing.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "vision_config.json";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub locator: LocatorConfig,
    pub classifier: ClassifierConfig,
    pub synth: SynthConfig,
}

/// Board detection thresholds. All of them were tuned by eye on one site's
/// default skin; treat the defaults as a starting point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Side of the rectified board image in pixels. Must be a multiple of 8.
    pub output_size: u32,
    /// Smallest board side (in screenshot pixels) worth looking for.
    pub min_board_px: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Minimum edge pixels on a Hough line.
    pub min_line_votes: u32,
    pub line_suppression_radius: u32,
    /// Max angular distance (degrees) of a line from its family direction.
    pub angle_tolerance_deg: f32,
    /// Max distance of a line from its lattice slot, as a fraction of the cell size.
    pub inlier_tolerance: f32,
    pub min_cell_px: f32,
    /// Inlier lines required in each family (out of 9).
    pub min_family_inliers: usize,
    /// Required lattice intersections (product of both families' inliers).
    pub min_lattice_points: usize,
    /// Max `(longest - shortest) / longest` side of the board quadrilateral.
    pub squareness_tolerance: f32,
    /// Skew (degrees) below which no corrective rotation is applied.
    pub rotation_tolerance_deg: f32,
    /// A rival orientation scoring at least this fraction of the best is ambiguous.
    pub ambiguity_ratio: f32,
    /// Skews within this many degrees of ±45 cannot be told apart from their 90° twin.
    pub ambiguity_band_deg: f32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            output_size: 512,
            min_board_px: 64,
            canny_low: 20.0,
            canny_high: 60.0,
            min_line_votes: 60,
            line_suppression_radius: 6,
            angle_tolerance_deg: 3.0,
            inlier_tolerance: 0.15,
            min_cell_px: 8.0,
            min_family_inliers: 6,
            min_lattice_points: 42,
            squareness_tolerance: 0.2,
            rotation_tolerance_deg: 0.5,
            ambiguity_ratio: 0.9,
            ambiguity_band_deg: 2.0,
        }
    }
}

/// Template classifier parameters and the empty-square decision rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Side of the square feature patch.
    pub feature_size: u32,
    /// Number of border-brightness buckets templates are split into.
    pub background_buckets: u8,
    /// Softmax sharpness applied to RMS template distances.
    pub temperature: f32,
    /// Pawns are easily confused with empty squares and need near certainty.
    pub pawn_min_confidence: f32,
    pub pawn_max_empty_probability: f32,
    pub piece_min_confidence: f32,
    pub piece_empty_fallback: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            feature_size: 32,
            background_buckets: 8,
            temperature: 200.0,
            pawn_min_confidence: 0.95,
            pawn_max_empty_probability: 0.02,
            piece_min_confidence: 0.5,
            piece_empty_fallback: 0.15,
        }
    }
}

/// Dataset synthesis jitter and split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub images_per_piece: usize,
    pub train_fraction: f32,
    /// Max translation as a fraction of the square side.
    pub max_shift_fraction: f32,
    pub max_rotation_deg: f32,
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Fixed RNG seed for reproducible corpora.
    pub seed: Option<u64>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            images_per_piece: 2000,
            train_fraction: 0.8,
            max_shift_fraction: 0.05,
            max_rotation_deg: 5.0,
            min_brightness: 0.8,
            max_brightness: 1.2,
            seed: None,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let loc = &self.locator;
        if loc.output_size == 0 || loc.output_size % 8 != 0 {
            bail!("locator.output_size must be a positive multiple of 8 (got {})", loc.output_size);
        }
        if loc.canny_low > loc.canny_high {
            bail!(
                "locator.canny_low ({}) exceeds canny_high ({})",
                loc.canny_low,
                loc.canny_high
            );
        }
        if !(0.0..0.5).contains(&loc.inlier_tolerance) {
            bail!("locator.inlier_tolerance must be in [0, 0.5) (got {})", loc.inlier_tolerance);
        }
        if loc.min_family_inliers < 2 || loc.min_family_inliers > 9 {
            bail!("locator.min_family_inliers must be in 2..=9 (got {})", loc.min_family_inliers);
        }
        if !(0.0..=1.0).contains(&loc.ambiguity_ratio) {
            bail!("locator.ambiguity_ratio must be in [0, 1] (got {})", loc.ambiguity_ratio);
        }

        let cls = &self.classifier;
        if cls.feature_size < 4 {
            bail!("classifier.feature_size must be at least 4 (got {})", cls.feature_size);
        }
        if cls.background_buckets == 0 {
            bail!("classifier.background_buckets must be at least 1");
        }

        let syn = &self.synth;
        if !(0.0..=1.0).contains(&syn.train_fraction) {
            bail!("synth.train_fraction must be in [0, 1] (got {})", syn.train_fraction);
        }
        if syn.min_brightness > syn.max_brightness {
            bail!(
                "synth.min_brightness ({}) exceeds max_brightness ({})",
                syn.min_brightness,
                syn.max_brightness
            );
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, text).with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}

/// Loads the config, writing defaults first if the file does not exist yet.
pub fn load_or_init(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        log::info!("No config at {}, writing defaults", path.display());
        let config = AppConfig::default();
        save_config(path, &config)?;
        return Ok(config);
    }
    load_config(path)
}
