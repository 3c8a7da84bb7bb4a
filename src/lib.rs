//! Chessboard vision: find a board in a screenshot, rectify it, classify its
//! squares and read the position as FEN. Also builds the labeled square
//! corpus and the template classifier used for that.

pub mod capture;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod fen;
pub mod geometry;
pub mod label;
pub mod lattice;
pub mod lines;
pub mod locate;
pub mod reader;
pub mod squares;

pub use classifier::TemplateClassifier;
pub use config::{AppConfig, ClassifierConfig, LocatorConfig, SynthConfig};
pub use fen::{BoardLabels, PlayerSide};
pub use label::Label;
pub use locate::{LocateError, NoBoardReason, RectifiedBoard, locate_board};
pub use reader::{InputMode, read_position};
pub use squares::{SquareImage, slice_board};
