//! Board labels to FEN.
//! Builds the piece placement from classified squares, orients it for the
//! player's side, derives castling rights from king/rook home squares and
//! validates the result (king and pawn counts, then shakmaty syntax).

use anyhow::{Result, bail};
use std::fmt;

use crate::label::Label;

/// Which colour sits at the bottom of the screenshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayerSide {
    #[default]
    White,
    Black,
}

impl PlayerSide {
    fn turn_char(self) -> char {
        match self {
            PlayerSide::White => 'w',
            PlayerSide::Black => 'b',
        }
    }
}

impl std::str::FromStr for PlayerSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "white" | "w" => Ok(PlayerSide::White),
            "black" | "b" => Ok(PlayerSide::Black),
            _ => bail!("Unknown side '{}' (expected white or black)", s),
        }
    }
}

/// 8x8 labels in image order: row 0 is the top of the image, column 0 the left.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardLabels(pub [[Label; 8]; 8]);

impl BoardLabels {
    pub fn empty() -> Self {
        Self([[Label::Empty; 8]; 8])
    }

    pub fn set(&mut self, row: usize, col: usize, label: Label) {
        self.0[row][col] = label;
    }

    /// Parses a FEN piece placement (first field only) into image order for `side`.
    pub fn from_placement(placement: &str, side: PlayerSide) -> Result<Self> {
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            bail!("Placement '{}' has {} ranks (expected 8)", placement, ranks.len());
        }
        let mut board = Self::empty();
        for (row, rank) in ranks.iter().enumerate() {
            let mut col = 0usize;
            for c in rank.chars() {
                if let Some(n) = c.to_digit(10) {
                    col += n as usize;
                } else {
                    let label = Label::from_fen_char(c).ok_or_else(|| {
                        anyhow::anyhow!("Unknown piece '{}' in '{}'", c, placement)
                    })?;
                    if col >= 8 {
                        bail!("Rank '{}' is longer than 8 squares", rank);
                    }
                    board.0[row][col] = label;
                    col += 1;
                }
            }
            if col != 8 {
                bail!("Rank '{}' covers {} squares (expected 8)", rank, col);
            }
        }
        Ok(board.oriented(side))
    }

    // Black at the bottom means the image is the board turned 180°.
    fn oriented(&self, side: PlayerSide) -> Self {
        match side {
            PlayerSide::White => self.clone(),
            PlayerSide::Black => {
                let mut out = Self::empty();
                for r in 0..8 {
                    for c in 0..8 {
                        out.0[7 - r][7 - c] = self.0[r][c];
                    }
                }
                out
            }
        }
    }

    /// FEN piece placement, rank 8 first.
    pub fn placement(&self, side: PlayerSide) -> String {
        let board = self.oriented(side);
        let ranks: Vec<String> = board
            .0
            .iter()
            .map(|row| {
                let mut out = String::new();
                let mut empty_run = 0;
                for label in row {
                    match label.fen_char() {
                        None => empty_run += 1,
                        Some(c) => {
                            if empty_run > 0 {
                                out.push_str(&empty_run.to_string());
                                empty_run = 0;
                            }
                            out.push(c);
                        }
                    }
                }
                if empty_run > 0 {
                    out.push_str(&empty_run.to_string());
                }
                out
            })
            .collect();
        ranks.join("/")
    }

    /// Full, validated FEN with `side` to move and castling derived from the position.
    pub fn to_fen(&self, side: PlayerSide) -> Result<String> {
        let fen = format!("{} {} KQkq - 0 1", self.placement(side), side.turn_char());
        validate_fen(&fen)
    }
}

impl fmt::Display for BoardLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.0 {
            let line: String = row.iter().map(|l| l.fen_char().unwrap_or('.')).collect();
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Checks piece counts, repairs castling rights and validates the syntax.
pub fn validate_fen(fen: &str) -> Result<String> {
    let board_part = fen.split_whitespace().next().unwrap_or("");

    // Exactly one king per side.
    let white_kings = board_part.chars().filter(|&c| c == 'K').count();
    let black_kings = board_part.chars().filter(|&c| c == 'k').count();
    if white_kings != 1 || black_kings != 1 {
        bail!(
            "Invalid position: expected exactly 1 king per side, got {} white kings and {} black kings ('{}')",
            white_kings,
            black_kings,
            fen
        );
    }

    // Usually a pawn confused with an empty square, or the reverse.
    let white_pawns = board_part.chars().filter(|&c| c == 'P').count();
    let black_pawns = board_part.chars().filter(|&c| c == 'p').count();
    if white_pawns > 8 {
        bail!("Invalid position: White has {} pawns (max 8) ('{}')", white_pawns, fen);
    }
    if black_pawns > 8 {
        bail!("Invalid position: Black has {} pawns (max 8) ('{}')", black_pawns, fen);
    }

    let corrected = fix_castling_rights(fen);

    shakmaty::fen::Fen::from_ascii(corrected.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid FEN syntax: {} ('{}')", e, corrected))?;

    Ok(corrected)
}

/// Keeps only the castling rights whose king and rook are still on their home squares.
fn fix_castling_rights(fen: &str) -> String {
    let parts: Vec<&str> = fen.split_whitespace().collect();
    if parts.len() < 3 {
        return fen.to_string();
    }
    let (board, turn) = (parts[0], parts[1]);

    let ranks: Vec<&str> = board.split('/').collect();
    if ranks.len() != 8 {
        return fen.to_string();
    }

    fn expand_rank(rank: &str) -> Vec<char> {
        let mut out = Vec::with_capacity(8);
        for c in rank.chars() {
            match c.to_digit(10) {
                Some(n) => out.extend(std::iter::repeat_n('.', n as usize)),
                None => out.push(c),
            }
        }
        out
    }

    let rank1 = expand_rank(ranks[7]);
    let rank8 = expand_rank(ranks[0]);
    let at = |rank: &[char], file: usize| rank.get(file).copied();

    let white_king = at(&rank1, 4) == Some('K');
    let black_king = at(&rank8, 4) == Some('k');

    let mut castling = String::new();
    if white_king && at(&rank1, 7) == Some('R') {
        castling.push('K');
    }
    if white_king && at(&rank1, 0) == Some('R') {
        castling.push('Q');
    }
    if black_king && at(&rank8, 7) == Some('r') {
        castling.push('k');
    }
    if black_king && at(&rank8, 0) == Some('r') {
        castling.push('q');
    }
    if castling.is_empty() {
        castling.push('-');
    }

    format!("{} {} {} - 0 1", board, turn, castling)
}
