//! Dataset synthesizer.
//! Composites piece sprites onto board-square backgrounds cut from an empty
//! board screenshot, jitters them (shift, rotation, brightness) and writes a
//! labeled corpus: `<out>/training/<class>/` and `<out>/test/<class>/`.
//! Sprite layout: `<pieces>/<white|black>/<anything>_<piece>.png`.

use anyhow::{Context, Result, bail};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SynthConfig;
use crate::label::{Color, Label, PieceKind};

/// Backgrounds picked from an empty board.
#[derive(Clone, Debug)]
pub struct SquareBackgrounds {
    /// Left-file and bottom-rank squares; these carry coordinate glyphs on most skins.
    pub edge: Vec<RgbaImage>,
    pub dark: Option<RgbaImage>,
    pub light: Option<RgbaImage>,
}

impl SquareBackgrounds {
    pub fn all(&self) -> Vec<&RgbaImage> {
        self.edge.iter().chain(self.dark.iter()).chain(self.light.iter()).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SynthSummary {
    pub training: usize,
    pub test: usize,
}

/// Cuts an empty board into 64 squares and keeps the representative ones.
pub fn backgrounds_from_board(board: &RgbaImage) -> Result<SquareBackgrounds> {
    let (w, h) = board.dimensions();
    if w != h {
        bail!("The empty board image is not square ({}x{})", w, h);
    }
    let cell = w / 8;
    if cell == 0 {
        bail!("The empty board image is too small ({}x{})", w, h);
    }

    let mut out = SquareBackgrounds {
        edge: Vec::new(),
        dark: None,
        light: None,
    };
    for row in 0..8 {
        for col in 0..8 {
            let square = imageops::crop_imm(board, col * cell, row * cell, cell, cell).to_image();
            if col == 0 || row == 7 {
                out.edge.push(square);
            } else if mean_luma(&square) < 127.0 {
                out.dark.get_or_insert(square);
            } else {
                out.light.get_or_insert(square);
            }
        }
    }
    Ok(out)
}

/// Finds `(label, path)` for every sprite under `<pieces>/{white,black}/`.
pub fn find_sprites(pieces_dir: &Path) -> Result<Vec<(Label, PathBuf)>> {
    let mut sprites = Vec::new();
    for (color, dir_name) in [(Color::Black, "black"), (Color::White, "white")] {
        let dir = pieces_dir.join(dir_name);
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read sprite directory: {}", dir.display()))?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
            .collect();
        files.sort();

        for path in files {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let kind_name = stem
                .rsplit_once('_')
                .map(|(_, kind)| kind)
                .with_context(|| format!("Sprite name has no piece suffix: {}", path.display()))?;
            let kind: PieceKind = kind_name
                .parse()
                .with_context(|| format!("Unknown piece in sprite name: {}", path.display()))?;
            sprites.push((Label::Piece(color, kind), path));
        }
    }
    if sprites.is_empty() {
        bail!("No piece sprites found under {}", pieces_dir.display());
    }
    Ok(sprites)
}

/// Sprite alpha-composited over a background resized to the sprite's size.
pub fn composite(sprite: &RgbaImage, background: &RgbaImage) -> RgbaImage {
    let (w, h) = sprite.dimensions();
    let mut canvas = imageops::resize(background, w, h, FilterType::Lanczos3);
    imageops::overlay(&mut canvas, sprite, 0, 0);
    canvas
}

/// Random shift, small rotation and brightness change. Uncovered pixels take the
/// mean background colour.
pub fn jitter(image: &RgbaImage, config: &SynthConfig, rng: &mut impl Rng) -> RgbaImage {
    let (w, h) = image.dimensions();
    let fill = mean_color(image);

    let angle = if config.max_rotation_deg > 0.0 {
        rng.gen_range(-config.max_rotation_deg..=config.max_rotation_deg)
    } else {
        0.0
    };
    let rotated = rotate_about_center(image, angle.to_radians(), Interpolation::Bilinear, fill);

    let max_dx = (w as f32 * config.max_shift_fraction).round() as i64;
    let max_dy = (h as f32 * config.max_shift_fraction).round() as i64;
    let dx = if max_dx > 0 { rng.gen_range(-max_dx..=max_dx) } else { 0 };
    let dy = if max_dy > 0 { rng.gen_range(-max_dy..=max_dy) } else { 0 };
    let mut shifted = RgbaImage::from_pixel(w, h, fill);
    imageops::overlay(&mut shifted, &rotated, dx, dy);

    let factor = if config.max_brightness > config.min_brightness {
        rng.gen_range(config.min_brightness..=config.max_brightness)
    } else {
        config.min_brightness
    };
    for p in shifted.pixels_mut() {
        for c in 0..3 {
            p.0[c] = (p.0[c] as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    shifted
}

/// Generates the full corpus. Returns how many images went to each split.
pub fn synthesize(
    pieces_dir: &Path,
    empty_board: &Path,
    out_dir: &Path,
    config: &SynthConfig,
) -> Result<SynthSummary> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let board = image::open(empty_board)
        .with_context(|| format!("Failed to open empty board: {}", empty_board.display()))?
        .to_rgba8();
    let backgrounds = backgrounds_from_board(&board)?;
    let bgs = backgrounds.all();
    let sprites = find_sprites(pieces_dir)?;
    let mut summary = SynthSummary::default();

    for (label, path) in &sprites {
        info!("Synthesizing {} from {}", label, path.display());
        let sprite = image::open(path)
            .with_context(|| format!("Failed to open sprite: {}", path.display()))?
            .to_rgba8();

        let per_bg = (config.images_per_piece / bgs.len()).max(1);
        let mut images = Vec::with_capacity(per_bg * bgs.len());
        for bg in &bgs {
            let base = composite(&sprite, bg);
            for _ in 0..per_bg {
                images.push(jitter(&base, config, &mut rng));
            }
        }
        write_split(images, *label, out_dir, config.train_fraction, &mut rng, &mut summary)?;
    }

    // Far fewer distinct empty squares than piece/background pairs.
    let per_bg = (config.images_per_piece / 15).max(1);
    let mut empties = Vec::with_capacity(per_bg * bgs.len());
    for bg in &bgs {
        for _ in 0..per_bg {
            empties.push(jitter(bg, config, &mut rng));
        }
    }
    write_split(empties, Label::Empty, out_dir, config.train_fraction, &mut rng, &mut summary)?;

    info!(
        "Dataset complete: {} training, {} test images in {}",
        summary.training,
        summary.test,
        out_dir.display()
    );
    Ok(summary)
}

fn write_split(
    mut images: Vec<RgbaImage>,
    label: Label,
    out_dir: &Path,
    train_fraction: f32,
    rng: &mut StdRng,
    summary: &mut SynthSummary,
) -> Result<()> {
    images.shuffle(rng);
    let split = (images.len() as f32 * train_fraction) as usize;
    for (i, img) in images.into_iter().enumerate() {
        let split_name = if i < split { "training" } else { "test" };
        let dir = out_dir.join(split_name).join(label.class_name());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create dataset directory: {}", dir.display()))?;
        let path = dir.join(format!("augmented_{}.png", uuid::Uuid::new_v4().simple()));
        img.save(&path)
            .with_context(|| format!("Failed to save dataset image: {}", path.display()))?;
        if i < split {
            summary.training += 1;
        } else {
            summary.test += 1;
        }
    }
    Ok(())
}

fn mean_luma(img: &RgbaImage) -> f32 {
    let n = (img.width() * img.height()).max(1) as f32;
    img.pixels()
        .map(|p| 0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32)
        .sum::<f32>()
        / n
}

fn mean_color(img: &RgbaImage) -> Rgba<u8> {
    let n = (img.width() * img.height()).max(1) as u64;
    let mut sum = [0u64; 3];
    for p in img.pixels() {
        for c in 0..3 {
            sum[c] += p.0[c] as u64;
        }
    }
    Rgba([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8, 255])
}
