
//! The tile directory: a dense mapping from tile grid coordinates
//! to the file offsets of the corresponding tile records.
//!
//! The directory covers a rectangular window of the tile grid that
//! grows on demand as tiles populate, so a sparsely written raster
//! never stores the full grid. Offsets come in two storage forms:
//! the compact form stores `offset >> 3` in four bytes, exploiting
//! the eight-byte alignment of all records; the extended form stores
//! plain eight-byte offsets and is selected automatically once any
//! offset outgrows the compact range.

use crate::error::{Error, Result, UnitResult, i32_to_usize, usize_to_i32};
use crate::io::{self, Data};
use crate::meta::{RecordType, finish_record, start_record};


/// Offsets below this bound fit the compact four-byte form.
const COMPACT_OFFSET_LIMIT: u64 = 1 << 35;


/// The tile directory of one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDirectory {

    /// Tile grid bounds of the whole raster, for growth checks.
    n_rows_of_tiles: usize,
    n_cols_of_tiles: usize,

    /// First tile row covered by the window.
    row0: usize,

    /// First tile column covered by the window.
    col0: usize,

    /// Window extent; zero while no tile is populated.
    n_rows: usize,
    n_cols: usize,

    /// Row-major window contents; zero marks an unpopulated tile.
    offsets: Vec<u64>,
}

impl TileDirectory {

    /// An empty directory for a raster with the given tile grid.
    pub fn new(n_rows_of_tiles: usize, n_cols_of_tiles: usize) -> Self {
        TileDirectory {
            n_rows_of_tiles, n_cols_of_tiles,
            row0: 0, col0: 0,
            n_rows: 0, n_cols: 0,
            offsets: Vec::new(),
        }
    }

    /// The file offset of a tile record, or zero when the tile
    /// is unpopulated or outside the covered window.
    pub fn offset(&self, tile_row: usize, tile_col: usize) -> u64 {
        if tile_row < self.row0 || tile_col < self.col0 { return 0; }

        let row = tile_row - self.row0;
        let col = tile_col - self.col0;
        if row >= self.n_rows || col >= self.n_cols { return 0; }

        self.offsets[row * self.n_cols + col]
    }

    /// Record where a tile was written, growing the window to cover it.
    pub fn set_offset(&mut self, tile_row: usize, tile_col: usize, offset: u64) -> UnitResult {
        if tile_row >= self.n_rows_of_tiles || tile_col >= self.n_cols_of_tiles {
            return Err(Error::CoordinateOutOfBounds);
        }

        if offset % 8 != 0 {
            return Err(Error::parameter("tile offset alignment"));
        }

        self.grow_to_cover(tile_row, tile_col);

        let row = tile_row - self.row0;
        let col = tile_col - self.col0;
        self.offsets[row * self.n_cols + col] = offset;
        Ok(())
    }

    /// Whether no tile has ever been populated.
    pub fn is_empty(&self) -> bool {
        self.offsets.iter().all(|&offset| offset == 0)
    }

    /// Visit every populated tile as `(tile_row, tile_col, offset)`.
    pub fn populated(&self) -> impl Iterator<Item = (usize, usize, u64)> + '_ {
        let n_cols = self.n_cols.max(1);

        self.offsets.iter().enumerate()
            .filter(|(_, &offset)| offset != 0)
            .map(move |(index, &offset)| {
                (self.row0 + index / n_cols, self.col0 + index % n_cols, offset)
            })
    }

    fn grow_to_cover(&mut self, tile_row: usize, tile_col: usize) {
        if self.n_rows == 0 {
            self.row0 = tile_row;
            self.col0 = tile_col;
            self.n_rows = 1;
            self.n_cols = 1;
            self.offsets = vec![ 0 ];
            return;
        }

        let row0 = self.row0.min(tile_row);
        let col0 = self.col0.min(tile_col);
        let row_end = (self.row0 + self.n_rows).max(tile_row + 1);
        let col_end = (self.col0 + self.n_cols).max(tile_col + 1);

        let n_rows = row_end - row0;
        let n_cols = col_end - col0;

        if (row0, col0, n_rows, n_cols) == (self.row0, self.col0, self.n_rows, self.n_cols) {
            return;
        }

        let mut grown = vec![ 0_u64; n_rows * n_cols ];

        for row in 0 .. self.n_rows {
            for col in 0 .. self.n_cols {
                let target_row = self.row0 + row - row0;
                let target_col = self.col0 + col - col0;
                grown[target_row * n_cols + target_col] = self.offsets[row * self.n_cols + col];
            }
        }

        self.row0 = row0;
        self.col0 = col0;
        self.n_rows = n_rows;
        self.n_cols = n_cols;
        self.offsets = grown;
    }

    /// Serialize the directory into a sealed record.
    pub fn write_record(&self, checksum_enabled: bool) -> Result<Vec<u8>> {
        let extended = self.offsets.iter().any(|&offset| offset >= COMPACT_OFFSET_LIMIT);

        let mut bytes = start_record(RecordType::TileDirectory);
        0_u8.write(&mut bytes)?; // format
        (extended as u8).write(&mut bytes)?;
        u8::write_slice(&mut bytes, &[0; 6])?;

        usize_to_i32(self.row0, "directory row0")?.write(&mut bytes)?;
        usize_to_i32(self.col0, "directory col0")?.write(&mut bytes)?;
        usize_to_i32(self.n_rows, "directory rows")?.write(&mut bytes)?;
        usize_to_i32(self.n_cols, "directory columns")?.write(&mut bytes)?;

        for &offset in &self.offsets {
            if extended { (offset as i64).write(&mut bytes)?; }
            else { ((offset >> 3) as u32).write(&mut bytes)?; }
        }

        finish_record(&mut bytes, checksum_enabled)?;
        Ok(bytes)
    }

    /// Deserialize a directory record body.
    pub fn read_record(body: &[u8], n_rows_of_tiles: usize, n_cols_of_tiles: usize) -> Result<Self> {
        let mut read = body;

        let format = u8::read(&mut read)?;
        if format != 0 {
            return Err(Error::invalid("tile directory format"));
        }

        let extended = u8::read(&mut read)? != 0;
        io::skip_bytes(&mut read, 6)?;

        let row0 = i32_to_usize(i32::read(&mut read)?, "directory row0")?;
        let col0 = i32_to_usize(i32::read(&mut read)?, "directory col0")?;
        let n_rows = i32_to_usize(i32::read(&mut read)?, "directory rows")?;
        let n_cols = i32_to_usize(i32::read(&mut read)?, "directory columns")?;

        if row0 + n_rows > n_rows_of_tiles || col0 + n_cols > n_cols_of_tiles {
            return Err(Error::invalid("tile directory window"));
        }

        let count = n_rows.checked_mul(n_cols)
            .ok_or_else(|| Error::invalid("tile directory window"))?;

        let offsets = if extended {
            i64::read_vec(&mut read, count)?.into_iter()
                .map(|offset| crate::error::i64_to_u64(offset, "tile offset"))
                .collect::<Result<Vec<u64>>>()?
        }
        else {
            u32::read_vec(&mut read, count)?.into_iter()
                .map(|offset| u64::from(offset) << 3)
                .collect()
        };

        Ok(TileDirectory {
            n_rows_of_tiles, n_cols_of_tiles,
            row0, col0, n_rows, n_cols, offsets,
        })
    }
}
