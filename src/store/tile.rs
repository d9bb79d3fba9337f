
//! In-memory tile buffers and the on-disk tile record.
//!
//! A tile is one contiguous byte buffer with one sub-array per element.
//! On disk, each element's sub-array is stored independently: a length
//! prefix, then either the raw bytes or a codec-packed payload whose
//! first byte selects the codec.

use smallvec::SmallVec;

use crate::compression::CodecRegistry;
use crate::error::{Error, Result, i32_to_usize, usize_to_i32};
use crate::io::Data;
use crate::meta::RasterSpec;
use crate::meta::element::{ElementSpec, ElementType};
use crate::meta::{RecordType, finish_record, start_record};


/// The byte layout all tiles of one raster share,
/// derived once from the specification.
#[derive(Debug, Clone)]
pub struct TileSchema {

    /// Cell rows per tile.
    pub n_rows_in_tile: usize,

    /// Cell columns per tile.
    pub n_cols_in_tile: usize,

    /// Byte offset of each element's sub-array within the tile buffer.
    pub element_offsets: SmallVec<[usize; 4]>,

    /// Byte size of each element's sub-array, padded to four bytes.
    pub element_sizes: SmallVec<[usize; 4]>,

    /// Total byte size of one tile buffer.
    pub tile_byte_size: usize,
}

impl TileSchema {

    /// Lay out the tiles of a raster.
    pub fn new(spec: &RasterSpec) -> Self {
        let cells = spec.cells_per_tile();

        let mut element_offsets = SmallVec::new();
        let mut element_sizes = SmallVec::new();
        let mut total = 0;

        for element in &spec.elements {
            let size = element.data_size(cells);
            element_offsets.push(total);
            element_sizes.push(size);
            total += size;
        }

        TileSchema {
            n_rows_in_tile: spec.n_rows_in_tile,
            n_cols_in_tile: spec.n_cols_in_tile,
            element_offsets,
            element_sizes,
            tile_byte_size: total,
        }
    }

    /// Cells per tile.
    pub fn cells_per_tile(&self) -> usize {
        self.n_rows_in_tile * self.n_cols_in_tile
    }

    /// The sub-array of one element within a tile buffer.
    pub fn element_bytes<'t>(&self, element_index: usize, tile: &'t [u8]) -> &'t [u8] {
        let start = self.element_offsets[element_index];
        &tile[start .. start + self.element_sizes[element_index]]
    }

    /// The mutable sub-array of one element within a tile buffer.
    pub fn element_bytes_mut<'t>(&self, element_index: usize, tile: &'t mut [u8]) -> &'t mut [u8] {
        let start = self.element_offsets[element_index];
        &mut tile[start .. start + self.element_sizes[element_index]]
    }

    /// A fresh tile buffer with every element pre-filled
    /// with its own fill value.
    pub fn blank_tile(&self, elements: &[ElementSpec]) -> Vec<u8> {
        let mut tile = vec![ 0_u8; self.tile_byte_size ];

        for (index, element) in elements.iter().enumerate() {
            let region = self.element_bytes_mut(index, &mut tile);

            match element.element_type() {
                ElementType::Short => {
                    let fill = (element.integer_fill() as i16).to_le_bytes();
                    for cell in region.chunks_exact_mut(2) {
                        cell.copy_from_slice(&fill);
                    }
                },

                ElementType::Float => {
                    let fill = element.float_fill().to_le_bytes();
                    for cell in region.chunks_exact_mut(4) {
                        cell.copy_from_slice(&fill);
                    }
                },

                _ => {
                    let fill = element.integer_fill().to_le_bytes();
                    for cell in region.chunks_exact_mut(4) {
                        cell.copy_from_slice(&fill);
                    }
                },
            }
        }

        tile
    }
}


/// Load one cell of an element as an integer, sign-extending shorts.
pub fn get_int(schema: &TileSchema, element: &ElementSpec, element_index: usize, tile: &[u8], index_in_tile: usize) -> i32 {
    let region = schema.element_bytes(element_index, tile);

    match element.element_type() {
        ElementType::Short => {
            let start = index_in_tile * 2;
            i32::from(i16::from_le_bytes([ region[start], region[start + 1] ]))
        },

        ElementType::Float => {
            let start = index_in_tile * 4;
            let bits = [ region[start], region[start + 1], region[start + 2], region[start + 3] ];
            f32::from_le_bytes(bits) as i32
        },

        _ => {
            let start = index_in_tile * 4;
            i32::from_le_bytes([ region[start], region[start + 1], region[start + 2], region[start + 3] ])
        },
    }
}

/// Load one cell of an element in the float presentation domain.
pub fn get_float(schema: &TileSchema, element: &ElementSpec, element_index: usize, tile: &[u8], index_in_tile: usize) -> f32 {
    let region = schema.element_bytes(element_index, tile);

    match element.element_type() {
        ElementType::Float => {
            let start = index_in_tile * 4;
            f32::from_le_bytes([ region[start], region[start + 1], region[start + 2], region[start + 3] ])
        },

        _ => element.present_float(get_int(schema, element, element_index, tile, index_in_tile)),
    }
}

/// Store one integer into a cell, narrowing for shorts
/// and converting for floats.
pub fn put_int(schema: &TileSchema, element: &ElementSpec, element_index: usize, tile: &mut [u8], index_in_tile: usize, value: i32) {
    let region = schema.element_bytes_mut(element_index, tile);

    match element.element_type() {
        ElementType::Short => {
            let start = index_in_tile * 2;
            region[start .. start + 2].copy_from_slice(&(value as i16).to_le_bytes());
        },

        ElementType::Float => {
            let start = index_in_tile * 4;
            region[start .. start + 4].copy_from_slice(&(value as f32).to_le_bytes());
        },

        _ => {
            let start = index_in_tile * 4;
            region[start .. start + 4].copy_from_slice(&value.to_le_bytes());
        },
    }
}

/// Store one float into a cell, coding it for integral elements.
pub fn put_float(schema: &TileSchema, element: &ElementSpec, element_index: usize, tile: &mut [u8], index_in_tile: usize, value: f32) {
    match element.element_type() {
        ElementType::Float => {
            let region = schema.element_bytes_mut(element_index, tile);
            let start = index_in_tile * 4;
            region[start .. start + 4].copy_from_slice(&value.to_le_bytes());
        },

        _ => put_int(schema, element, element_index, tile, index_in_tile, element.code_float(value)),
    }
}


/// Serialize a tile into a sealed record. When a registry is given,
/// each element payload is packed with whichever codec wins over raw
/// storage; elements that do not shrink stay raw.
pub fn write_tile_record(
    spec: &RasterSpec,
    schema: &TileSchema,
    registry: Option<&CodecRegistry>,
    tile_index: i32,
    tile: &[u8],
) -> Result<Vec<u8>> {

    let mut bytes = start_record(RecordType::Tile);
    tile_index.write(&mut bytes)?;

    let (n_rows, n_cols) = (schema.n_rows_in_tile, schema.n_cols_in_tile);

    for (element_index, element) in spec.elements.iter().enumerate() {
        let region = schema.element_bytes(element_index, tile);
        let data_size = schema.element_sizes[element_index];

        let packed = match registry {
            Some(registry) if element.element_type().is_integral() => {
                let values = gather_ints(schema, element, element_index, tile);
                registry.encode_ints(n_rows, n_cols, &values)?
            },

            Some(registry) => {
                let values = gather_floats(schema, element_index, tile);
                registry.encode_floats(n_rows, n_cols, &values)?
            },

            None => None,
        };

        match packed {
            Some(packed) if packed.len() < data_size => {
                usize_to_i32(packed.len(), "packed element size")?.write(&mut bytes)?;
                u8::write_slice(&mut bytes, &packed)?;
            },

            _ => {
                usize_to_i32(data_size, "element size")?.write(&mut bytes)?;
                u8::write_slice(&mut bytes, region)?;
            },
        }
    }

    finish_record(&mut bytes, spec.checksum_enabled)?;
    Ok(bytes)
}

/// Deserialize a tile record body into a tile buffer.
/// The stored diagnostic tile index must match the requested tile.
pub fn parse_tile_record(
    spec: &RasterSpec,
    schema: &TileSchema,
    registry: &CodecRegistry,
    expected_tile_index: i32,
    body: &[u8],
) -> Result<Vec<u8>> {

    let mut read = body;

    let stored_index = i32::read(&mut read)?;
    if stored_index != expected_tile_index {
        return Err(Error::invalid("tile index mismatch"));
    }

    let (n_rows, n_cols) = (schema.n_rows_in_tile, schema.n_cols_in_tile);
    let mut tile = vec![ 0_u8; schema.tile_byte_size ];

    for (element_index, element) in spec.elements.iter().enumerate() {
        let data_size = schema.element_sizes[element_index];
        let stored_size = i32_to_usize(i32::read(&mut read)?, "element payload size")?;

        if stored_size == data_size {
            let region = schema.element_bytes_mut(element_index, &mut tile);
            u8::read_slice(&mut read, region)?;
        }
        else if stored_size < data_size {
            let packed = u8::read_vec(&mut read, stored_size)?;

            if element.element_type().is_integral() {
                let values = registry.decode_ints(n_rows, n_cols, &packed)?;
                scatter_ints(schema, element, element_index, &mut tile, &values);
            }
            else {
                let values = registry.decode_floats(n_rows, n_cols, &packed)?;
                scatter_floats(schema, element_index, &mut tile, &values);
            }
        }
        else {
            return Err(Error::invalid("element payload size"));
        }
    }

    Ok(tile)
}


fn gather_ints(schema: &TileSchema, element: &ElementSpec, element_index: usize, tile: &[u8]) -> Vec<i32> {
    (0 .. schema.cells_per_tile())
        .map(|cell| get_int(schema, element, element_index, tile, cell))
        .collect()
}

fn gather_floats(schema: &TileSchema, element_index: usize, tile: &[u8]) -> Vec<f32> {
    let region = schema.element_bytes(element_index, tile);

    (0 .. schema.cells_per_tile())
        .map(|cell| {
            let start = cell * 4;
            f32::from_le_bytes([ region[start], region[start + 1], region[start + 2], region[start + 3] ])
        })
        .collect()
}

fn scatter_ints(schema: &TileSchema, element: &ElementSpec, element_index: usize, tile: &mut [u8], values: &[i32]) {
    let region = schema.element_bytes_mut(element_index, tile);

    match element.element_type() {
        ElementType::Short => {
            for (cell, &value) in values.iter().enumerate() {
                region[cell * 2 .. cell * 2 + 2].copy_from_slice(&(value as i16).to_le_bytes());
            }
        },

        _ => {
            for (cell, &value) in values.iter().enumerate() {
                region[cell * 4 .. cell * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }
        },
    }
}

fn scatter_floats(schema: &TileSchema, element_index: usize, tile: &mut [u8], values: &[f32]) {
    let region = schema.element_bytes_mut(element_index, tile);

    for (cell, &value) in values.iter().enumerate() {
        region[cell * 4 .. cell * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
}
