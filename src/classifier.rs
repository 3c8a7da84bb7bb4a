//! Square classifier.
//! Template model: each label keeps one mean grayscale patch per background
//! brightness bucket. A square is scored by RMS distance to every template,
//! turned into a probability distribution with a softmax.
//! Training data is the synthesized corpus (`<root>/<class_name>/*.png`).

use anyhow::{Context, Result, bail};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::config::ClassifierConfig;
use crate::fen::BoardLabels;
use crate::label::Label;
use crate::squares::SquareImage;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Template {
    label: Label,
    bucket: u8,
    samples: usize,
    pixels: Vec<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateClassifier {
    feature_size: u32,
    background_buckets: u8,
    templates: Vec<Template>,
}

#[derive(Clone, Debug)]
pub struct Prediction {
    pub label: Label,
    /// Probability of the arg-max label before the empty-square rules.
    pub confidence: f32,
    /// Probability per known label, highest first.
    pub probabilities: Vec<(Label, f32)>,
}

impl Prediction {
    pub fn probability(&self, label: Label) -> f32 {
        self.probabilities
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
    /// (correct, total) per true label.
    pub per_label: BTreeMap<Label, (usize, usize)>,
}

impl Evaluation {
    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f32 / self.total as f32
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Accuracy: {:.2}% ({}/{})",
            self.accuracy() * 100.0,
            self.correct,
            self.total
        )?;
        for (label, (correct, total)) in &self.per_label {
            writeln!(f, "  {:<10} {:>5}/{:<5}", label.class_name(), correct, total)?;
        }
        Ok(())
    }
}

impl TemplateClassifier {
    /// Builds templates from labeled squares.
    pub fn train(examples: &[(Label, RgbImage)], config: &ClassifierConfig) -> Result<Self> {
        if examples.is_empty() {
            bail!("Cannot train a classifier without examples");
        }

        let n = (config.feature_size * config.feature_size) as usize;
        let mut sums: BTreeMap<(Label, u8), (usize, Vec<f32>)> = BTreeMap::new();
        for (label, square) in examples {
            let gray = imageops::grayscale(square);
            let bucket = background_bucket(&gray, config.background_buckets);
            let feature = features(&gray, config.feature_size);
            let entry = sums.entry((*label, bucket)).or_insert_with(|| (0, vec![0.0; n]));
            entry.0 += 1;
            for (acc, v) in entry.1.iter_mut().zip(feature) {
                *acc += v;
            }
        }

        let templates: Vec<Template> = sums
            .into_iter()
            .map(|((label, bucket), (samples, sum))| Template {
                label,
                bucket,
                samples,
                pixels: sum.into_iter().map(|v| v / samples as f32).collect(),
            })
            .collect();
        info!(
            "Trained {} templates from {} examples",
            templates.len(),
            examples.len()
        );

        Ok(Self {
            feature_size: config.feature_size,
            background_buckets: config.background_buckets,
            templates,
        })
    }

    /// Labels the model knows about.
    pub fn labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self.templates.iter().map(|t| t.label).collect();
        labels.sort();
        labels.dedup();
        labels
    }

    fn probabilities(&self, square: &RgbImage, temperature: f32) -> Vec<(Label, f32)> {
        let gray = imageops::grayscale(square);
        let feature = features(&gray, self.feature_size);

        let mut closest: BTreeMap<Label, f32> = BTreeMap::new();
        for t in &self.templates {
            let rms = rms_distance(&feature, &t.pixels);
            closest
                .entry(t.label)
                .and_modify(|d| *d = d.min(rms))
                .or_insert(rms);
        }

        let logits: Vec<(Label, f32)> = closest
            .into_iter()
            .map(|(label, rms)| (label, -temperature * rms))
            .collect();
        let max = logits.iter().map(|(_, l)| *l).fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<(Label, f32)> = logits.iter().map(|(l, v)| (*l, (v - max).exp())).collect();
        let total: f32 = exps.iter().map(|(_, e)| e).sum();

        let mut probs: Vec<(Label, f32)> = exps.into_iter().map(|(l, e)| (l, e / total)).collect();
        probs.sort_by(|a, b| b.1.total_cmp(&a.1));
        probs
    }

    /// Classifies one square, applying the empty-square fallback rules.
    pub fn predict(&self, square: &RgbImage, config: &ClassifierConfig) -> Prediction {
        let probabilities = self.probabilities(square, config.temperature);
        let (top, confidence) = probabilities.first().copied().unwrap_or((Label::Empty, 0.0));
        let empty = probabilities
            .iter()
            .find(|(l, _)| *l == Label::Empty)
            .map(|(_, p)| *p)
            .unwrap_or(0.0);

        let label = if top.is_pawn() {
            if confidence < config.pawn_min_confidence
                || empty > config.pawn_max_empty_probability
            {
                Label::Empty
            } else {
                top
            }
        } else if top != Label::Empty
            && confidence < config.piece_min_confidence
            && empty > config.piece_empty_fallback
        {
            Label::Empty
        } else {
            top
        };

        Prediction {
            label,
            confidence,
            probabilities,
        }
    }

    /// Classifies the 64 squares of a board into image-ordered labels.
    pub fn classify_board(
        &self,
        squares: &[SquareImage],
        config: &ClassifierConfig,
    ) -> Result<BoardLabels> {
        if squares.len() != 64 {
            bail!("Expected 64 squares, got {}", squares.len());
        }
        let mut board = BoardLabels::empty();
        for sq in squares {
            board.set(sq.row as usize, sq.col as usize, self.predict(&sq.image, config).label);
        }
        Ok(board)
    }

    pub fn evaluate(
        &self,
        examples: &[(Label, RgbImage)],
        config: &ClassifierConfig,
    ) -> Evaluation {
        let mut eval = Evaluation::default();
        for (label, square) in examples {
            let hit = self.predict(square, config).label == *label;
            let entry = eval.per_label.entry(*label).or_insert((0, 0));
            entry.1 += 1;
            eval.total += 1;
            if hit {
                entry.0 += 1;
                eval.correct += 1;
            }
        }
        eval
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create model directory: {}", parent.display())
            })?;
        }
        let text = serde_json::to_string(self).context("Failed to serialize classifier")?;
        fs::write(path, text).with_context(|| format!("Failed to write model: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| {
            format!("Model not found at {}. Run `train` first.", path.display())
        })?;
        let model: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse model: {}", path.display()))?;
        let n = (model.feature_size * model.feature_size) as usize;
        if model.templates.iter().any(|t| t.pixels.len() != n) {
            bail!("Model {} has templates of the wrong size", path.display());
        }
        Ok(model)
    }
}

/// Loads `<root>/<class_name>/*.png` as labeled squares. Unknown directories are skipped.
pub fn load_dataset(root: &Path) -> Result<Vec<(Label, RgbImage)>> {
    let mut dirs: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("Failed to read dataset directory: {}", root.display()))?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut examples = Vec::new();
    for dir in dirs {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let label: Label = match name.parse() {
            Ok(label) => label,
            Err(_) => {
                warn!("Skipping unknown class directory {}", dir.display());
                continue;
            }
        };

        let mut files: Vec<_> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read class directory: {}", dir.display()))?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
            .collect();
        files.sort();

        for file in files {
            let img = image::open(&file)
                .with_context(|| format!("Failed to open training image: {}", file.display()))?;
            examples.push((label, img.to_rgb8()));
        }
    }
    info!("Loaded {} labeled squares from {}", examples.len(), root.display());
    Ok(examples)
}

// Crop a 1/16 margin (grid lines bleed in there), resize, scale to [0, 1].
fn features(gray: &GrayImage, size: u32) -> Vec<f32> {
    let (w, h) = gray.dimensions();
    let mx = (w / 16).max(1).min(w.saturating_sub(1) / 2);
    let my = (h / 16).max(1).min(h.saturating_sub(1) / 2);
    let inner = imageops::crop_imm(gray, mx, my, w - 2 * mx, h - 2 * my).to_image();
    let small = imageops::resize(&inner, size, size, FilterType::Triangle);
    small.pixels().map(|p| p.0[0] as f32 / 255.0).collect()
}

// Median brightness of the outermost pixel ring, quantized.
fn background_bucket(gray: &GrayImage, buckets: u8) -> u8 {
    let (w, h) = gray.dimensions();
    let mut border: Vec<u8> = gray
        .enumerate_pixels()
        .filter(|(x, y, _)| *x == 0 || *y == 0 || *x + 1 == w || *y + 1 == h)
        .map(|(_, _, p)| p.0[0])
        .collect();
    if border.is_empty() {
        return 0;
    }
    border.sort_unstable();
    let median = border[border.len() / 2] as u32;
    (median * buckets as u32 / 256) as u8
}

fn rms_distance(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum / a.len().max(1) as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::{Color, PieceKind};
    use image::Rgb;
    use imageproc::drawing::draw_filled_circle_mut;

    const LIGHT: Rgb<u8> = Rgb([240, 217, 181]);
    const DARK: Rgb<u8> = Rgb([181, 136, 99]);

    fn square(bg: Rgb<u8>, disc: Option<(i32, Rgb<u8>)>) -> RgbImage {
        let mut img = RgbImage::from_pixel(48, 48, bg);
        if let Some((radius, color)) = disc {
            draw_filled_circle_mut(&mut img, (24, 24), radius, color);
        }
        img
    }

    fn corpus() -> Vec<(Label, RgbImage)> {
        let white_rook = Label::Piece(Color::White, PieceKind::Rook);
        let black_rook = Label::Piece(Color::Black, PieceKind::Rook);
        let white_pawn = Label::Piece(Color::White, PieceKind::Pawn);
        let mut out = Vec::new();
        for bg in [LIGHT, DARK] {
            out.push((Label::Empty, square(bg, None)));
            out.push((white_rook, square(bg, Some((16, Rgb([250, 250, 250]))))));
            out.push((black_rook, square(bg, Some((16, Rgb([20, 20, 20]))))));
            out.push((white_pawn, square(bg, Some((8, Rgb([250, 250, 250]))))));
        }
        out
    }

    #[test]
    fn test_classifies_training_squares() {
        let config = ClassifierConfig::default();
        let examples = corpus();
        let model = TemplateClassifier::train(&examples, &config).unwrap();
        assert_eq!(model.labels().len(), 4);

        let eval = model.evaluate(&examples, &config);
        assert_eq!(eval.correct, eval.total, "{}", eval);
        assert_eq!(eval.accuracy(), 1.0);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let config = ClassifierConfig::default();
        let model = TemplateClassifier::train(&corpus(), &config).unwrap();
        let prediction = model.predict(&square(DARK, Some((15, Rgb([25, 25, 25])))), &config);
        let total: f32 = prediction.probabilities.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(prediction.label, Label::Piece(Color::Black, PieceKind::Rook));
    }

    #[test]
    fn test_unsure_pawn_falls_back_to_empty() {
        let config = ClassifierConfig {
            pawn_min_confidence: 1.01,
            ..ClassifierConfig::default()
        };
        let model = TemplateClassifier::train(&corpus(), &config).unwrap();
        let pawn = square(LIGHT, Some((8, Rgb([250, 250, 250]))));
        let prediction = model.predict(&pawn, &config);
        assert_eq!(prediction.label, Label::Empty);
        assert!(prediction.confidence > 0.5);
    }

    #[test]
    fn test_empty_corpus_is_an_error() {
        assert!(TemplateClassifier::train(&[], &ClassifierConfig::default()).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/model.json");
        let config = ClassifierConfig::default();
        let model = TemplateClassifier::train(&corpus(), &config).unwrap();
        model.save(&path).unwrap();

        let loaded = TemplateClassifier::load(&path).unwrap();
        assert_eq!(loaded.labels(), model.labels());
        let sq = square(LIGHT, Some((16, Rgb([20, 20, 20]))));
        assert_eq!(loaded.predict(&sq, &config).label, model.predict(&sq, &config).label);
    }

    #[test]
    fn test_missing_model_mentions_training() {
        let err = TemplateClassifier::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(err.to_string().contains("Run `train` first"));
    }

    #[test]
    fn test_load_dataset_skips_unknown_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["empty", "w_rook", "notes"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        square(LIGHT, None).save(dir.path().join("empty/a.png")).unwrap();
        square(DARK, Some((16, Rgb([250, 250, 250]))))
            .save(dir.path().join("w_rook/b.png"))
            .unwrap();
        fs::write(dir.path().join("w_rook/readme.txt"), "ignored").unwrap();

        let examples = load_dataset(dir.path()).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].0, Label::Empty);
        assert_eq!(examples[1].0, Label::Piece(Color::White, PieceKind::Rook));
    }

    #[test]
    fn test_background_bucket_separates_shades() {
        let light = imageops::grayscale(&square(LIGHT, None));
        let dark = imageops::grayscale(&square(DARK, None));
        assert_ne!(background_bucket(&light, 8), background_bucket(&dark, 8));
    }
}
