//! Square labels shared by the dataset, the classifier and FEN assembly.
//! 13 classes: empty plus six piece kinds in two colours.
//! Class names match the on-disk dataset layout (`w_pawn/`, `b_rook/`, `empty/`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Color {
    White,
    Black,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    pub const ALL: [PieceKind; 6] = [
        PieceKind::Pawn,
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Rook,
        PieceKind::Queen,
        PieceKind::King,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PieceKind::Pawn => "pawn",
            PieceKind::Knight => "knight",
            PieceKind::Bishop => "bishop",
            PieceKind::Rook => "rook",
            PieceKind::Queen => "queen",
            PieceKind::King => "king",
        }
    }

    fn fen_lower(self) -> char {
        match self {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        }
    }
}

impl FromStr for PieceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PieceKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown piece kind '{}'", s))
    }
}

/// Classification target for a single board square.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Empty,
    Piece(Color, PieceKind),
}

impl Label {
    /// All 13 labels, empty first.
    pub fn all() -> Vec<Label> {
        let mut labels = vec![Label::Empty];
        for color in [Color::White, Color::Black] {
            for kind in PieceKind::ALL {
                labels.push(Label::Piece(color, kind));
            }
        }
        labels
    }

    /// Dataset directory name, e.g. `w_knight` or `empty`.
    pub fn class_name(self) -> String {
        match self {
            Label::Empty => "empty".to_string(),
            Label::Piece(Color::White, kind) => format!("w_{}", kind.name()),
            Label::Piece(Color::Black, kind) => format!("b_{}", kind.name()),
        }
    }

    /// FEN letter (uppercase = White); `None` for an empty square.
    pub fn fen_char(self) -> Option<char> {
        match self {
            Label::Empty => None,
            Label::Piece(Color::White, kind) => Some(kind.fen_lower().to_ascii_uppercase()),
            Label::Piece(Color::Black, kind) => Some(kind.fen_lower()),
        }
    }

    pub fn from_fen_char(c: char) -> Option<Label> {
        let color = if c.is_ascii_uppercase() { Color::White } else { Color::Black };
        let lower = c.to_ascii_lowercase();
        PieceKind::ALL
            .into_iter()
            .find(|kind| kind.fen_lower() == lower)
            .map(|kind| Label::Piece(color, kind))
    }

    pub fn is_pawn(self) -> bool {
        matches!(self, Label::Piece(_, PieceKind::Pawn))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.class_name())
    }
}

impl FromStr for Label {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "empty" {
            return Ok(Label::Empty);
        }
        let (prefix, kind) = s
            .split_once('_')
            .ok_or_else(|| anyhow::anyhow!("Unknown class name '{}'", s))?;
        let color = match prefix {
            "w" => Color::White,
            "b" => Color::Black,
            _ => anyhow::bail!("Unknown colour prefix in class name '{}'", s),
        };
        Ok(Label::Piece(color, kind.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thirteen_labels() {
        let labels = Label::all();
        assert_eq!(labels.len(), 13);
        assert_eq!(labels[0], Label::Empty);
    }

    #[test]
    fn test_class_names_parse_back() {
        for label in Label::all() {
            let parsed: Label = label.class_name().parse().unwrap();
            assert_eq!(parsed, label);
        }
    }

    #[test]
    fn test_fen_chars() {
        assert_eq!(Label::Piece(Color::White, PieceKind::Knight).fen_char(), Some('N'));
        assert_eq!(Label::Piece(Color::Black, PieceKind::Queen).fen_char(), Some('q'));
        assert_eq!(Label::Empty.fen_char(), None);
        assert_eq!(Label::from_fen_char('K'), Some(Label::Piece(Color::White, PieceKind::King)));
        assert_eq!(Label::from_fen_char('x'), None);
    }

    #[test]
    fn test_rejects_unknown_class() {
        assert!("w_dragon".parse::<Label>().is_err());
        assert!("x_pawn".parse::<Label>().is_err());
        assert!("pawn".parse::<Label>().is_err());
    }
}
