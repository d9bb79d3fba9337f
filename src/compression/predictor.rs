
//! Differential predictors. Each predictor walks the tile grid in
//! row-major order, predicts every cell from already-visited neighbours,
//! and emits the difference between the actual and the predicted value
//! as an M32 symbol. The first cell is the seed and is stored by the
//! codec outside the residual stream.
//!
//! Intermediate arithmetic is 64-bit signed; residuals and reconstructed
//! values wrap to 32 bits, so encode followed by decode is always exact.

use crate::compression::bits::{BitReader, BitWriter};
use crate::compression::m32;
use crate::error::{Error, Result, UnitResult};


/// Selects one of the three residual transforms.
/// The discriminants are stored in compressed tile payloads.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Predictor {

    /// Predicts each cell from its left neighbour,
    /// and each first-of-row cell from the cell above.
    RowDelta,

    /// Linear extrapolation along the row: `2*b - a`
    /// from the two previous cells of the same row.
    SecondDifference,

    /// Plane extrapolation `left + up - upleft`,
    /// falling back to row/column deltas along the edges.
    Triangle,
}

/// All predictors, in the order the codec tries them.
pub const ALL: [Predictor; 3] = [
    Predictor::RowDelta,
    Predictor::SecondDifference,
    Predictor::Triangle,
];

impl Predictor {

    /// The payload byte identifying this predictor.
    pub fn code(self) -> u8 {
        match self {
            Predictor::RowDelta => 1,
            Predictor::SecondDifference => 2,
            Predictor::Triangle => 3,
        }
    }

    /// Look up a predictor by its payload byte.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Predictor::RowDelta),
            2 => Ok(Predictor::SecondDifference),
            3 => Ok(Predictor::Triangle),
            _ => Err(Error::invalid("predictor code")),
        }
    }

    /// The prediction for the cell at `(row, col)`, computed from
    /// neighbours that were already visited in row-major order.
    fn prediction(self, cells: &[i64], n_cols: usize, row: usize, col: usize) -> i64 {
        let index = row * n_cols + col;
        debug_assert_ne!(index, 0, "the seed cell is never predicted");

        match self {
            Predictor::RowDelta => {
                if col == 0 { cells[index - n_cols] }
                else { cells[index - 1] }
            },

            Predictor::SecondDifference => {
                if col == 0 { cells[index - n_cols] }
                else if col == 1 { cells[index - 1] }
                else { 2 * cells[index - 1] - cells[index - 2] }
            },

            Predictor::Triangle => {
                if row == 0 { cells[index - 1] }
                else if col == 0 { cells[index - n_cols] }
                else { cells[index - 1] + cells[index - n_cols] - cells[index - n_cols - 1] }
            },
        }
    }

    /// Emit the residuals for all cells except the seed at index zero.
    /// `values` must hold `n_rows * n_cols` cells in row-major order.
    pub fn encode(self, n_rows: usize, n_cols: usize, values: &[i32], writer: &mut BitWriter) -> UnitResult {
        if values.len() != n_rows * n_cols || values.is_empty() {
            return Err(Error::parameter("predictor grid size"));
        }

        let cells: Vec<i64> = values.iter().map(|&value| i64::from(value)).collect();

        for row in 0 .. n_rows {
            for col in 0 .. n_cols {
                if row == 0 && col == 0 { continue; }

                let prediction = self.prediction(&cells, n_cols, row, col);
                let residual = (cells[row * n_cols + col] - prediction) as i32;
                m32::encode(writer, residual);
            }
        }

        Ok(())
    }

    /// Reconstruct the grid from the seed and `n_rows * n_cols - 1` residuals.
    pub fn decode(self, n_rows: usize, n_cols: usize, seed: i32, reader: &mut BitReader<'_>) -> Result<Vec<i32>> {
        if n_rows == 0 || n_cols == 0 {
            return Err(Error::invalid("predictor grid size"));
        }

        let mut cells = vec![ 0_i64; n_rows * n_cols ];
        cells[0] = i64::from(seed);

        for row in 0 .. n_rows {
            for col in 0 .. n_cols {
                if row == 0 && col == 0 { continue; }

                let prediction = self.prediction(&cells, n_cols, row, col);
                let residual = m32::decode(reader)?;

                // reconstructed values wrap to 32 bits, like the encoder's input
                cells[row * n_cols + col] = i64::from((prediction + i64::from(residual)) as i32);
            }
        }

        Ok(cells.into_iter().map(|cell| cell as i32).collect())
    }
}
