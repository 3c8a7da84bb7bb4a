//! Position reader facade: image → board → 64 squares → labels → FEN.
//! Two input modes:
//! - **Screenshot**: run the board locator first (any screenshot).
//! - **Cropped**: the image already is the board, edge to edge.

use anyhow::{Context, Result};
use image::DynamicImage;
use log::info;

use crate::classifier::TemplateClassifier;
use crate::config::AppConfig;
use crate::fen::{BoardLabels, PlayerSide};
use crate::locate::locate_board;
use crate::squares::{normalize_board, slice_board};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Screenshot,
    Cropped,
}

impl std::fmt::Display for InputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputMode::Screenshot => write!(f, "Screenshot (board locator)"),
            InputMode::Cropped => write!(f, "Cropped board"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PositionReading {
    pub labels: BoardLabels,
    pub fen: String,
}

/// Reads the position shown in `image`.
pub fn read_position(
    image: &DynamicImage,
    model: &TemplateClassifier,
    config: &AppConfig,
    side: PlayerSide,
    mode: InputMode,
) -> Result<PositionReading> {
    let board = match mode {
        InputMode::Screenshot => {
            let located = locate_board(image, &config.locator).context("Board locator failed")?;
            info!(
                "Board found: skew {:.1}°, {}x{} lattice inliers, {:.1}px cells",
                located.skew_deg, located.inliers.0, located.inliers.1, located.cell_px
            );
            located.image
        }
        InputMode::Cropped => normalize_board(&image.to_rgb8(), config.locator.output_size),
    };

    let squares = slice_board(&board).context("Failed to slice board")?;
    let labels = model.classify_board(&squares, &config.classifier)?;
    let fen = labels
        .to_fen(side)
        .with_context(|| format!("Classified board is not a legal position:\n{}", labels))?;
    Ok(PositionReading { labels, fen })
}
