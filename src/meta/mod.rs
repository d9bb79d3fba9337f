
//! Describes the header and specification block of a raster file.

pub mod element;
pub mod transform;

use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::{Error, Result, UnitResult, i32_to_usize, usize_to_i32};
use crate::io::{self, Data, Read, Write};
use crate::math::compute_tile_count;
use self::element::ElementSpec;
use self::transform::{Affine, CoordinateSystem, ModelTransform};


/// The first bytes of every raster file.
pub mod magic_number {
    use super::*;

    /// Twelve ascii bytes, terminated by a NUL.
    pub const BYTES: [u8; 12] = *b"gvrs raster\0";

    /// Without validation, write this instance to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        u8::write_slice(write, &self::BYTES)
    }

    /// Consume twelve bytes from the reader
    /// and return whether they identify a raster file.
    pub fn is_gvrs(read: &mut impl Read) -> Result<bool> {
        let mut magic_num = [0; 12];
        u8::read_slice(read, &mut magic_num)?;
        Ok(magic_num == self::BYTES)
    }

    /// Validate the magic number. If this is a raster file, return `Ok(())`.
    pub fn validate(read: &mut impl Read) -> UnitResult {
        if self::is_gvrs(read)? {
            Ok(())
        } else {
            Err(Error::invalid("file identifier missing"))
        }
    }
}


/// Major file format version written by this implementation.
pub const VERSION_MAJOR: u8 = 1;

/// Minor file format version written by this implementation.
pub const VERSION_MINOR: u8 = 4;

/// Every record starts with a four-byte length, a type byte
/// and three reserved bytes.
pub const RECORD_PREFIX_SIZE: usize = 8;

/// The header record begins directly after the magic number,
/// the two version bytes and two reserved bytes.
pub const HEADER_RECORD_OFFSET: u64 = 16;


/// Identifies the content of a file record.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RecordType {

    /// The header and specification block at the start of the file.
    Header,

    /// The mapping from tile grid coordinates to file offsets.
    TileDirectory,

    /// The serialized free-space interval list.
    FreeSpace,

    /// The sorted list of metadata record locations.
    MetadataDirectory,

    /// One metadata payload.
    Metadata,

    /// One tile of cell data.
    Tile,
}

impl RecordType {

    /// The byte identifying this record type on disk.
    pub fn code(self) -> u8 {
        match self {
            RecordType::Header => 1,
            RecordType::TileDirectory => 2,
            RecordType::FreeSpace => 3,
            RecordType::MetadataDirectory => 4,
            RecordType::Metadata => 5,
            RecordType::Tile => 6,
        }
    }

    /// Look up a record type by its on-disk byte.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(RecordType::Header),
            2 => Ok(RecordType::TileDirectory),
            3 => Ok(RecordType::FreeSpace),
            4 => Ok(RecordType::MetadataDirectory),
            5 => Ok(RecordType::Metadata),
            6 => Ok(RecordType::Tile),
            _ => Err(Error::invalid("record type")),
        }
    }
}


/// Begin a record buffer: a zero length to be patched later,
/// the type byte, and the reserved bytes.
pub fn start_record(record_type: RecordType) -> Vec<u8> {
    vec![ 0, 0, 0, 0, record_type.code(), 0, 0, 0 ]
}

/// Finish a record buffer: patch the length field, pad so the record
/// ends on an eight-byte boundary, and append the trailing checksum.
/// The final length includes prefix, body, padding and checksum.
pub fn finish_record(bytes: &mut Vec<u8>, checksum_enabled: bool) -> UnitResult {
    let unsealed = bytes.len() + u32::BYTE_SIZE;
    let padding = (8 - unsealed % 8) % 8;
    let total = usize_to_i32(bytes.len() + padding + u32::BYTE_SIZE, "record length")? as u32;

    bytes[.. 4].copy_from_slice(&total.to_le_bytes());
    io::seal_record(bytes, checksum_enabled)
}

/// Split a complete record into its type and its body,
/// verifying the prefix and the trailing checksum.
pub fn open_record(bytes: &[u8], checksum_enabled: bool) -> Result<(RecordType, &[u8])> {
    if bytes.len() < RECORD_PREFIX_SIZE + u32::BYTE_SIZE {
        return Err(Error::invalid("record too short"));
    }

    let checked = io::verify_record(bytes, checksum_enabled)?;

    let mut prefix = checked;
    let length = u32::read(&mut prefix)? as usize;
    let record_type = RecordType::from_code(u8::read(&mut prefix)?)?;

    if length != bytes.len() {
        return Err(Error::invalid("record length mismatch"));
    }

    Ok((record_type, &checked[RECORD_PREFIX_SIZE ..]))
}


/// The current time in milliseconds since the unix epoch.
pub fn now_epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}


/// The bookkeeping fields of the header record:
/// file identity, timestamps, and the directory pointers
/// that are patched when the file is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {

    /// Unique identity of this file, minted when the file is created.
    pub uuid: Uuid,

    /// When the file was last opened for writing, in epoch milliseconds.
    pub time_opened_ms: i64,

    /// When the file content was last completed, in epoch milliseconds.
    pub time_modified_ms: i64,

    /// Where the tile directory record starts, or zero before the first close.
    pub tile_directory_offset: u64,

    /// Where the free-space record starts, or zero.
    pub free_space_offset: u64,

    /// Where the metadata directory record starts, or zero.
    pub metadata_directory_offset: u64,
}

impl FileHeader {

    /// A header for a newly created file.
    pub fn new() -> Self {
        let now = now_epoch_ms();

        FileHeader {
            uuid: Uuid::new_v4(),
            time_opened_ms: now,
            time_modified_ms: now,
            tile_directory_offset: 0,
            free_space_offset: 0,
            metadata_directory_offset: 0,
        }
    }

    fn write(&self, bytes: &mut Vec<u8>) -> UnitResult {
        let (uuid_high, uuid_low) = self.uuid.as_u64_pair();
        uuid_high.write(bytes)?;
        uuid_low.write(bytes)?;

        self.time_opened_ms.write(bytes)?;
        self.time_modified_ms.write(bytes)?;

        0_i64.write(bytes)?; // reserved
        0_i64.write(bytes)?; // reserved

        1_u16.write(bytes)?; // level count
        u8::write_slice(bytes, &[0; 6])?;

        (self.tile_directory_offset as i64).write(bytes)?;
        (self.free_space_offset as i64).write(bytes)?;
        (self.metadata_directory_offset as i64).write(bytes)?;
        Ok(())
    }

    fn read(read: &mut impl Read) -> Result<Self> {
        let uuid_high = u64::read(read)?;
        let uuid_low = u64::read(read)?;

        let time_opened_ms = i64::read(read)?;
        let time_modified_ms = i64::read(read)?;

        io::skip_bytes(read, 16)?; // reserved longs

        let level_count = u16::read(read)?;
        if level_count != 1 {
            return Err(Error::invalid("level count"));
        }

        io::skip_bytes(read, 6)?;

        let tile_directory_offset = read_offset(read)?;
        let free_space_offset = read_offset(read)?;
        let metadata_directory_offset = read_offset(read)?;

        Ok(FileHeader {
            uuid: Uuid::from_u64_pair(uuid_high, uuid_low),
            time_opened_ms, time_modified_ms,
            tile_directory_offset, free_space_offset, metadata_directory_offset,
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self { Self::new() }
}

fn read_offset(read: &mut impl Read) -> Result<u64> {
    crate::error::i64_to_u64(i64::read(read)?, "file offset")
}


/// List of elements.
pub type ElementList = SmallVec<[ElementSpec; 4]>;

/// List of codec identification strings, in index order.
pub type CodecNameList = SmallVec<[String; 4]>;


/// The complete structural description of one raster:
/// geometry, tiling, elements, transform and codec table.
/// Written once when a file is created and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSpec {

    /// Number of cell rows in the raster.
    pub n_rows: usize,

    /// Number of cell columns in the raster.
    pub n_cols: usize,

    /// Number of cell rows in each tile.
    pub n_rows_in_tile: usize,

    /// Number of cell columns in each tile.
    pub n_cols_in_tile: usize,

    /// Whether all records carry a verified CRC-32C.
    pub checksum_enabled: bool,

    /// An application-defined byte, stored verbatim.
    pub raster_space_code: u8,

    /// The grid↔model mapping.
    pub transform: ModelTransform,

    /// The typed channels of this raster, at least one.
    pub elements: ElementList,

    /// The codec table, empty for uncompressed rasters.
    pub codec_names: CodecNameList,

    /// A free-form product identification.
    pub product_label: Option<String>,
}

impl RasterSpec {

    /// Number of tile rows covering the raster.
    pub fn n_rows_of_tiles(&self) -> usize {
        compute_tile_count(self.n_rows, self.n_rows_in_tile)
    }

    /// Number of tile columns covering the raster.
    pub fn n_cols_of_tiles(&self) -> usize {
        compute_tile_count(self.n_cols, self.n_cols_in_tile)
    }

    /// Number of cells in every tile, including clipped edge cells.
    pub fn cells_per_tile(&self) -> usize {
        self.n_rows_in_tile * self.n_cols_in_tile
    }

    /// The flat tile index of a tile grid position.
    pub fn tile_index(&self, tile_row: usize, tile_col: usize) -> i32 {
        (tile_row * self.n_cols_of_tiles() + tile_col) as i32
    }

    /// Split a cell position into its tile grid position
    /// and the row-major cell index within that tile.
    /// Fails for positions outside the raster.
    pub fn locate(&self, grid_row: usize, grid_col: usize) -> Result<(usize, usize, usize)> {
        if grid_row >= self.n_rows || grid_col >= self.n_cols {
            return Err(Error::CoordinateOutOfBounds);
        }

        let tile_row = grid_row / self.n_rows_in_tile;
        let tile_col = grid_col / self.n_cols_in_tile;

        let row_in_tile = grid_row % self.n_rows_in_tile;
        let col_in_tile = grid_col % self.n_cols_in_tile;

        Ok((tile_row, tile_col, row_in_tile * self.n_cols_in_tile + col_in_tile))
    }

    /// Check all structural invariants.
    pub fn validate(&self) -> UnitResult {
        if self.n_rows == 0 || self.n_cols == 0 {
            return Err(Error::raster_spec("raster has no cells"));
        }

        if self.n_rows_in_tile == 0 || self.n_cols_in_tile == 0 {
            return Err(Error::raster_spec("tile has no cells"));
        }

        // the flat tile index must stay addressable by a signed 32-bit integer,
        // checked in 64 bits so extreme shapes cannot wrap the check itself
        let tile_count = (self.n_rows_of_tiles() as u64)
            .checked_mul(self.n_cols_of_tiles() as u64);

        if tile_count.map_or(true, |count| count > i32::MAX as u64) {
            return Err(Error::raster_spec("too many tiles"));
        }

        usize_to_i32(self.n_rows, "raster rows").map_err(|_| Error::raster_spec("raster rows"))?;
        usize_to_i32(self.n_cols, "raster columns").map_err(|_| Error::raster_spec("raster columns"))?;

        if self.elements.is_empty() {
            return Err(Error::raster_spec("raster has no elements"));
        }

        for element in &self.elements {
            element.validate()?;
        }

        element::validate_unique_names(&self.elements)?;

        for name in &self.codec_names {
            io::validate_identifier(name)?;
        }

        Ok(())
    }

    /// Serialize the specification block into a header record buffer.
    pub fn write(&self, bytes: &mut Vec<u8>) -> UnitResult {
        self.validate()?;

        usize_to_i32(self.n_rows, "raster rows")?.write(bytes)?;
        usize_to_i32(self.n_cols, "raster columns")?.write(bytes)?;
        usize_to_i32(self.n_rows_in_tile, "tile rows")?.write(bytes)?;
        usize_to_i32(self.n_cols_in_tile, "tile columns")?.write(bytes)?;
        0_i32.write(bytes)?; // reserved
        0_i32.write(bytes)?; // reserved

        (self.checksum_enabled as u8).write(bytes)?;
        self.raster_space_code.write(bytes)?;
        self.transform.system.code().write(bytes)?;
        u8::write_slice(bytes, &[0; 5])?;

        let transform = &self.transform;
        for value in [ transform.x0, transform.y0, transform.x1, transform.y1,
                       transform.cell_size_x, transform.cell_size_y ] {
            value.write(bytes)?;
        }

        f64::write_slice(bytes, &transform.model_to_raster)?;
        f64::write_slice(bytes, &transform.raster_to_model)?;

        element::element_count_to_i32(&self.elements)?.write(bytes)?;
        for element in &self.elements {
            element.write(bytes)?;
        }

        usize_to_i32(self.codec_names.len(), "codec count")?.write(bytes)?;
        for name in &self.codec_names {
            io::write_string(name, bytes)?;
        }

        io::write_string(self.product_label.as_deref().unwrap_or(""), bytes)
    }

    /// Deserialize the specification block of an opened file.
    pub fn read(read: &mut impl Read) -> Result<Self> {
        let n_rows = i32_to_usize(i32::read(read)?, "raster rows")?;
        let n_cols = i32_to_usize(i32::read(read)?, "raster columns")?;
        let n_rows_in_tile = i32_to_usize(i32::read(read)?, "tile rows")?;
        let n_cols_in_tile = i32_to_usize(i32::read(read)?, "tile columns")?;
        io::skip_bytes(read, 8)?; // reserved ints

        let checksum_enabled = u8::read(read)? != 0;
        let raster_space_code = u8::read(read)?;
        let system = CoordinateSystem::from_code(u8::read(read)?)?;
        io::skip_bytes(read, 5)?;

        let mut domain = [ 0.0_f64; 6 ];
        f64::read_slice(read, &mut domain)?;
        let [ x0, y0, x1, y1, cell_size_x, cell_size_y ] = domain;

        let mut model_to_raster = Affine::default();
        let mut raster_to_model = Affine::default();
        f64::read_slice(read, &mut model_to_raster)?;
        f64::read_slice(read, &mut raster_to_model)?;

        let transform = ModelTransform::from_stored(
            system, n_cols, x0, y0, x1, y1, cell_size_x, cell_size_y,
            model_to_raster, raster_to_model,
        );

        let element_count = element::checked_element_count(i32::read(read)?)?;
        let mut elements = ElementList::new();
        for _ in 0 .. element_count {
            let mut position = 0;
            elements.push(ElementSpec::read(read, &mut position)?);
        }

        let codec_count = i32_to_usize(i32::read(read)?, "codec count")?;
        if codec_count > u8::MAX as usize {
            return Err(Error::invalid("codec count"));
        }

        let mut codec_names = CodecNameList::new();
        for _ in 0 .. codec_count {
            codec_names.push(io::read_identifier(read)?);
        }

        let product_label = match io::read_string(read)? {
            label if label.is_empty() => None,
            label => Some(label),
        };

        let spec = RasterSpec {
            n_rows, n_cols, n_rows_in_tile, n_cols_in_tile,
            checksum_enabled, raster_space_code,
            transform, elements, codec_names, product_label,
        };

        spec.validate().map_err(|_| Error::invalid("specification block"))?;
        Ok(spec)
    }
}


/// Serialize the complete header record: prefix, bookkeeping fields
/// and specification block, sealed with padding and checksum.
/// The record is written at [`HEADER_RECORD_OFFSET`].
pub fn write_header_record(header: &FileHeader, spec: &RasterSpec) -> Result<Vec<u8>> {
    let mut bytes = start_record(RecordType::Header);
    header.write(&mut bytes)?;
    spec.write(&mut bytes)?;
    finish_record(&mut bytes, spec.checksum_enabled)?;
    Ok(bytes)
}

/// Deserialize the body of a header record.
pub fn read_header_record(body: &[u8]) -> Result<(FileHeader, RasterSpec)> {
    let mut read = body;
    let header = FileHeader::read(&mut read)?;
    let spec = RasterSpec::read(&mut read)?;
    Ok((header, spec))
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::element::ElementContent;

    fn test_spec() -> RasterSpec {
        let mut elements = ElementList::new();

        elements.push(ElementSpec::new("z",
            ElementContent::int_coded_float(-11000.0, 9000.0, f32::NAN, 1000.0, 0.0).unwrap()));

        let mut count = ElementSpec::new("count", ElementContent::Int {
            min: 0, max: i32::MAX, fill: 0,
        });
        count.label = Some("observations".to_string());
        elements.push(count);

        let mut codec_names = CodecNameList::new();
        codec_names.push("GvrsDeflate".to_string());

        RasterSpec {
            n_rows: 181,
            n_cols: 361,
            n_rows_in_tile: 90,
            n_cols_in_tile: 120,
            checksum_enabled: true,
            raster_space_code: 0,
            transform: ModelTransform::geographic(181, 361, -90.0, -180.0, 90.0, 180.0).unwrap(),
            elements,
            codec_names,
            product_label: Some("gvrs unit test".to_string()),
        }
    }

    #[test]
    fn header_record_round_trip(){
        let header = FileHeader::new();
        let spec = test_spec();

        let record = write_header_record(&header, &spec).unwrap();
        assert_eq!(record.len() % 8, 0);
        assert_eq!((HEADER_RECORD_OFFSET as usize + record.len()) % 8, 0);

        let (record_type, body) = open_record(&record, true).unwrap();
        assert_eq!(record_type, RecordType::Header);

        let (header2, spec2) = read_header_record(body).unwrap();
        assert_eq!(header2, header);
        assert_eq!(spec2, spec);
    }

    #[test]
    fn corrupted_record_is_detected(){
        let record = write_header_record(&FileHeader::new(), &test_spec()).unwrap();

        let mut corrupted = record.clone();
        let index = corrupted.len() / 2;
        corrupted[index] ^= 1;

        assert!(open_record(&corrupted, true).is_err());
    }

    #[test]
    fn tile_geometry(){
        let spec = test_spec();

        assert_eq!(spec.n_rows_of_tiles(), 3); // ceil(181 / 90)
        assert_eq!(spec.n_cols_of_tiles(), 4); // ceil(361 / 120)

        let (tile_row, tile_col, index_in_tile) = spec.locate(90, 120).unwrap();
        assert_eq!((tile_row, tile_col, index_in_tile), (1, 1, 0));

        let (tile_row, tile_col, index_in_tile) = spec.locate(180, 360).unwrap();
        assert_eq!((tile_row, tile_col), (2, 3));
        assert_eq!(index_in_tile, 0); // last tile's first valid cell

        assert!(matches!(spec.locate(181, 0), Err(Error::CoordinateOutOfBounds)));
        assert!(matches!(spec.locate(0, 361), Err(Error::CoordinateOutOfBounds)));
    }

    #[test]
    fn too_many_tiles_are_rejected(){
        let mut spec = test_spec();
        spec.n_rows = usize::MAX / 4;
        spec.n_rows_in_tile = 1;
        spec.n_cols = usize::MAX / 4;
        spec.n_cols_in_tile = 1;

        assert!(matches!(spec.validate(), Err(Error::BadRasterSpec(_))));
    }
}
