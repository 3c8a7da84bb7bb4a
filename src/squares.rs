//! Cuts a rectified board into its 64 squares.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::lattice::CELLS;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SliceError {
    #[error("board image is not square ({width}x{height})")]
    NotSquare { width: u32, height: u32 },
    #[error("board side {0} is not a positive multiple of 8")]
    BadSide(u32),
}

/// One board cell. `row` 0 is the top of the image, `col` 0 the left edge.
#[derive(Clone, Debug)]
pub struct SquareImage {
    pub row: u8,
    pub col: u8,
    pub image: RgbImage,
}

/// Slices a square board image into 64 equal squares, row-major from the top-left.
pub fn slice_board(board: &RgbImage) -> Result<Vec<SquareImage>, SliceError> {
    let (width, height) = board.dimensions();
    if width != height {
        return Err(SliceError::NotSquare { width, height });
    }
    if width == 0 || width % CELLS as u32 != 0 {
        return Err(SliceError::BadSide(width));
    }

    let cell = width / CELLS as u32;
    let mut squares = Vec::with_capacity(CELLS * CELLS);
    for row in 0..CELLS as u32 {
        for col in 0..CELLS as u32 {
            let image = imageops::crop_imm(board, col * cell, row * cell, cell, cell).to_image();
            squares.push(SquareImage {
                row: row as u8,
                col: col as u8,
                image,
            });
        }
    }
    Ok(squares)
}

/// Brings an already-cropped board image to `side x side` so it can be sliced.
pub fn normalize_board(board: &RgbImage, side: u32) -> RgbImage {
    if board.dimensions() == (side, side) {
        return board.clone();
    }
    imageops::resize(board, side, side, FilterType::CatmullRom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::collections::HashSet;

    #[test]
    fn test_sixty_four_equal_squares() {
        let board = RgbImage::from_fn(64, 64, |x, y| Rgb([(x / 8) as u8, (y / 8) as u8, 0]));
        let squares = slice_board(&board).unwrap();
        assert_eq!(squares.len(), 64);

        let mut seen = HashSet::new();
        for sq in &squares {
            assert_eq!(sq.image.dimensions(), (8, 8));
            // Every pixel of the square belongs to the same cell.
            assert!(sq.image.pixels().all(|p| p.0 == [sq.col, sq.row, 0]));
            assert!(seen.insert((sq.row, sq.col)));
        }
        assert_eq!(squares[9].row, 1);
        assert_eq!(squares[9].col, 1);
    }

    #[test]
    fn test_rejects_non_square() {
        let board = RgbImage::new(64, 72);
        assert_eq!(
            slice_board(&board).unwrap_err(),
            SliceError::NotSquare { width: 64, height: 72 }
        );
    }

    #[test]
    fn test_rejects_indivisible_side() {
        assert_eq!(slice_board(&RgbImage::new(60, 60)).unwrap_err(), SliceError::BadSide(60));
        assert_eq!(slice_board(&RgbImage::new(0, 0)).unwrap_err(), SliceError::BadSide(0));
    }

    #[test]
    fn test_normalize_board_resizes() {
        let board = RgbImage::new(100, 90);
        assert_eq!(normalize_board(&board, 256).dimensions(), (256, 256));
    }
}
