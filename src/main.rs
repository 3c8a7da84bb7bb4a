use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::fs;
use std::path::{Path, PathBuf};

use zugzwang_vision::classifier::{self, TemplateClassifier};
use zugzwang_vision::config::{self, AppConfig};
use zugzwang_vision::{InputMode, PlayerSide, capture, dataset, locate_board, read_position};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("Zugzwang-Vision")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Chessboard detection, rectification and square classification from screenshots")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("JSON config with locator/classifier/synthesis thresholds")
                .default_value(config::DEFAULT_CONFIG_PATH)
                .global(true),
        )
        .subcommand(
            Command::new("locate")
                .about("Find the board in a screenshot and write the rectified board")
                .arg(Arg::new("screenshot").value_name("IMAGE").required_unless_present("capture"))
                .arg(
                    Arg::new("capture")
                        .long("capture")
                        .action(ArgAction::SetTrue)
                        .help("Capture the primary monitor instead of reading a file"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_name("PNG")
                        .default_value("screenshots/board.png"),
                )
                .arg(
                    Arg::new("squares-dir")
                        .long("squares-dir")
                        .value_name("DIR")
                        .help("Also write the 64 square crops here"),
                ),
        )
        .subcommand(
            Command::new("fen")
                .about("Read the position from an image")
                .arg(Arg::new("image").value_name("IMAGE").required(true))
                .arg(
                    Arg::new("model")
                        .long("model")
                        .value_name("JSON")
                        .default_value("models/classifier.json"),
                )
                .arg(
                    Arg::new("side")
                        .long("side")
                        .value_name("SIDE")
                        .help("Colour at the bottom of the board")
                        .default_value("white")
                        .value_parser(["white", "black"]),
                )
                .arg(
                    Arg::new("cropped")
                        .long("cropped")
                        .action(ArgAction::SetTrue)
                        .help("The image is already a tightly cropped board"),
                ),
        )
        .subcommand(
            Command::new("synth")
                .about("Synthesize a labeled square dataset")
                .arg(
                    Arg::new("pieces")
                        .long("pieces")
                        .value_name("DIR")
                        .default_value("data/pieces"),
                )
                .arg(
                    Arg::new("empty-board")
                        .long("empty-board")
                        .value_name("PNG")
                        .default_value("data/empty_board.png"),
                )
                .arg(Arg::new("out").long("out").value_name("DIR").default_value("dataset")),
        )
        .subcommand(
            Command::new("train")
                .about("Build the square classifier and report held-out accuracy")
                .arg(Arg::new("dataset").long("dataset").value_name("DIR").default_value("dataset"))
                .arg(
                    Arg::new("model")
                        .long("model")
                        .value_name("JSON")
                        .default_value("models/classifier.json"),
                ),
        )
        .subcommand(Command::new("init-config").about("Write the default config file"))
        .get_matches();

    let config_path = PathBuf::from(
        matches
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or(config::DEFAULT_CONFIG_PATH),
    );

    match matches.subcommand() {
        Some(("locate", sub)) => run_locate(sub, &config::load_or_init(&config_path)?),
        Some(("fen", sub)) => run_fen(sub, &config::load_or_init(&config_path)?),
        Some(("synth", sub)) => run_synth(sub, &config::load_or_init(&config_path)?),
        Some(("train", sub)) => run_train(sub, &config::load_or_init(&config_path)?),
        Some(("init-config", _)) => {
            config::save_config(&config_path, &AppConfig::default())?;
            println!("Wrote default config to {}", config_path.display());
            Ok(())
        }
        _ => unreachable!("subcommand_required"),
    }
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches.get_one::<String>(name).map(String::as_str).unwrap_or_default()
}

fn run_locate(matches: &ArgMatches, config: &AppConfig) -> Result<()> {
    let screenshot = if matches.get_flag("capture") {
        capture::capture_screenshot().context("Failed to capture screenshot")?
    } else {
        let path = arg(matches, "screenshot");
        image::open(path).with_context(|| format!("Failed to open screenshot: {}", path))?
    };

    let board = locate_board(&screenshot, &config.locator).context("Board locator failed")?;

    let out = Path::new(arg(matches, "out"));
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    board
        .image
        .save(out)
        .with_context(|| format!("Failed to save board image: {}", out.display()))?;

    if let Some(dir) = matches.get_one::<String>("squares-dir") {
        let dir = Path::new(dir);
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create squares directory: {}", dir.display()))?;
        for sq in board.squares()? {
            let path = dir.join(format!("square_{}_{}.png", sq.row, sq.col));
            sq.image
                .save(&path)
                .with_context(|| format!("Failed to save square: {}", path.display()))?;
        }
    }

    let c = &board.quad.corners;
    println!(
        "Board corners: ({:.1},{:.1}) ({:.1},{:.1}) ({:.1},{:.1}) ({:.1},{:.1})",
        c[0].x, c[0].y, c[1].x, c[1].y, c[2].x, c[2].y, c[3].x, c[3].y
    );
    println!(
        "Skew: {:.2}° (corrected: {}, residual {:.2}°)",
        board.skew_deg, board.rotation_applied, board.residual_skew_deg
    );
    println!("Rectified board written to {}", out.display());
    Ok(())
}

fn run_fen(matches: &ArgMatches, config: &AppConfig) -> Result<()> {
    let path = arg(matches, "image");
    let image = image::open(path).with_context(|| format!("Failed to open image: {}", path))?;
    let model = TemplateClassifier::load(Path::new(arg(matches, "model")))?;
    let side: PlayerSide = arg(matches, "side").parse()?;
    let mode = if matches.get_flag("cropped") {
        InputMode::Cropped
    } else {
        InputMode::Screenshot
    };

    println!("Input mode: {}", mode);
    let reading = read_position(&image, &model, config, side, mode)?;
    print!("{}", reading.labels);
    println!("FEN: {}", reading.fen);
    Ok(())
}

fn run_synth(matches: &ArgMatches, config: &AppConfig) -> Result<()> {
    let summary = dataset::synthesize(
        Path::new(arg(matches, "pieces")),
        Path::new(arg(matches, "empty-board")),
        Path::new(arg(matches, "out")),
        &config.synth,
    )?;
    println!(
        "Generated {} training and {} test squares",
        summary.training, summary.test
    );
    Ok(())
}

fn run_train(matches: &ArgMatches, config: &AppConfig) -> Result<()> {
    let root = Path::new(arg(matches, "dataset"));
    let training = classifier::load_dataset(&root.join("training"))?;
    let model = TemplateClassifier::train(&training, &config.classifier)?;

    let test = classifier::load_dataset(&root.join("test"))?;
    let evaluation = model.evaluate(&test, &config.classifier);
    print!("{}", evaluation);

    let model_path = Path::new(arg(matches, "model"));
    model.save(model_path)?;
    println!("Model saved to {}", model_path.display());
    Ok(())
}
