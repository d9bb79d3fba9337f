
//! Opening, closing and accessing raster files.

pub mod builder;

pub use builder::RasterBuilder;

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use crate::compression::CodecRegistry;
use crate::error::{Error, Result, UnitResult};
use crate::meta::{
    FileHeader, RasterSpec, RecordType,
    HEADER_RECORD_OFFSET, RECORD_PREFIX_SIZE, VERSION_MAJOR, VERSION_MINOR,
    magic_number, now_epoch_ms, open_record, read_header_record, write_header_record,
};
use crate::meta::element::ElementSpec;
use crate::meta::transform::ModelTransform;
use crate::store::cache::{CacheSize, Evicted, TileCache};
use crate::store::directory::TileDirectory;
use crate::store::free_space::FreeSpaceManager;
use crate::store::metadata::{MetadataDirectory, MetadataRecord};
use crate::store::tile::{self, TileSchema};
use crate::io::Data;


/// Records larger than this are treated as file corruption.
const MAX_RECORD_SIZE: usize = 1 << 30;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Access {
    Read,
    Write,
}


/// An open raster file.
///
/// The handle owns the file, the tile cache, the directories and the
/// codec instances, and releases them when it is closed or dropped.
/// A handle is single-threaded; writes become visible to subsequent
/// reads through the same handle immediately, and are persisted on
/// eviction, cache resize and close.
#[derive(Debug)]
pub struct Raster {
    file: File,
    path: PathBuf,
    access: Access,
    header: FileHeader,
    spec: RasterSpec,
    schema: TileSchema,
    registry: CodecRegistry,
    directory: TileDirectory,
    free_space: FreeSpaceManager,
    metadata: MetadataDirectory,
    cache: TileCache,

    /// Logical end of the file, where appended records go.
    file_size: u64,

    delete_on_close: bool,
    closed: bool,
}

impl Raster {

    /// Create a fresh raster file, truncating anything at `path`.
    /// Called through [`RasterBuilder::open_new`].
    pub(crate) fn create(path: &Path, spec: RasterSpec) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true).write(true).create(true).truncate(true)
            .open(path)?;

        let header = FileHeader::new();
        let record = write_header_record(&header, &spec)?;

        magic_number::write(&mut file)?;
        u8::write_slice(&mut file, &[ VERSION_MAJOR, VERSION_MINOR, 0, 0 ])?;
        u8::write_slice(&mut file, &record)?;

        let file_size = HEADER_RECORD_OFFSET + record.len() as u64;
        Self::assemble(file, path, Access::Write, header, spec, file_size)
    }

    /// Open an existing raster read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), Access::Read)
    }

    /// Open an existing raster for reading and writing.
    /// The caller must ensure no other process writes the file.
    pub fn open_for_write(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), Access::Write)
    }

    fn open_with(path: &Path, access: Access) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(access == Access::Write)
            .open(path)?;

        magic_number::validate(&mut file)?;

        let mut version = [ 0_u8; 4 ];
        file.read_exact(&mut version)?;
        if version[0] != VERSION_MAJOR {
            return Err(Error::invalid("unsupported file version"));
        }

        // the checksum flag lives inside the header record,
        // so the record is parsed first and verified afterwards
        let record = read_record_raw(&mut file, HEADER_RECORD_OFFSET)?;
        let (record_type, body) = open_record(&record, false)?;
        if record_type != RecordType::Header {
            return Err(Error::invalid("header record missing"));
        }

        let (mut header, spec) = read_header_record(body)?;
        if spec.checksum_enabled {
            open_record(&record, true)?;
        }

        let file_size = file.metadata()?.len();
        let checksum = spec.checksum_enabled;

        let directory = match header.tile_directory_offset {
            0 => TileDirectory::new(spec.n_rows_of_tiles(), spec.n_cols_of_tiles()),
            offset => {
                let body = read_record_at(&mut file, offset, checksum, RecordType::TileDirectory)?;
                TileDirectory::read_record(&body, spec.n_rows_of_tiles(), spec.n_cols_of_tiles())?
            },
        };

        let metadata = match header.metadata_directory_offset {
            0 => MetadataDirectory::new(),
            offset => {
                let body = read_record_at(&mut file, offset, checksum, RecordType::MetadataDirectory)?;
                MetadataDirectory::read_record(&body)?
            },
        };

        let mut free_space = FreeSpaceManager::new();

        if access == Access::Write {
            if header.free_space_offset != 0 {
                let body = read_record_at(&mut file, header.free_space_offset, checksum, RecordType::FreeSpace)?;
                free_space = FreeSpaceManager::read_record(&body)?;
            }

            // the close sequence rewrites all three top-level records,
            // so their current extents are recycled right away
            for offset in [ header.free_space_offset, header.tile_directory_offset,
                            header.metadata_directory_offset ] {
                if offset != 0 {
                    let length = record_length_at(&mut file, offset)?;
                    free_space.release(offset, length);
                }
            }

            header.time_opened_ms = now_epoch_ms();
        }

        let mut raster = Self::assemble(file, path, access, header, spec, file_size)?;
        raster.directory = directory;
        raster.metadata = metadata;
        raster.free_space = free_space;
        Ok(raster)
    }

    fn assemble(file: File, path: &Path, access: Access, header: FileHeader, spec: RasterSpec, file_size: u64) -> Result<Self> {
        let schema = TileSchema::new(&spec);
        let registry = CodecRegistry::for_names(spec.codec_names.iter().map(String::as_str))?;

        let cache = TileCache::new(CacheSize::Medium.slot_count(spec.n_cols_of_tiles()));
        let directory = TileDirectory::new(spec.n_rows_of_tiles(), spec.n_cols_of_tiles());

        Ok(Raster {
            file,
            path: path.to_path_buf(),
            access,
            header,
            spec,
            schema,
            registry,
            directory,
            free_space: FreeSpaceManager::new(),
            metadata: MetadataDirectory::new(),
            cache,
            file_size,
            delete_on_close: false,
            closed: false,
        })
    }

    /// The structural description of this raster.
    pub fn spec(&self) -> &RasterSpec {
        &self.spec
    }

    /// The grid↔model↔geographic mapping of this raster.
    pub fn transform(&self) -> &ModelTransform {
        &self.spec.transform
    }

    /// The elements of this raster, in index order.
    pub fn elements(&self) -> &[ElementSpec] {
        &self.spec.elements
    }

    /// The index of the element with this name.
    pub fn element_index(&self, name: &str) -> Result<usize> {
        self.spec.elements.iter()
            .position(|element| element.name == name)
            .ok_or(Error::ElementNotFound)
    }

    /// Unlink the file after a successful close.
    /// Only honoured for rasters opened writable.
    pub fn delete_on_close(&mut self, delete: bool) {
        self.delete_on_close = delete;
    }

    /// Replace the tile cache with a preset capacity,
    /// writing out any unsaved tiles first.
    pub fn set_tile_cache_size(&mut self, size: CacheSize) -> UnitResult {
        self.flush_cache()?;
        self.cache = TileCache::new(size.slot_count(self.spec.n_cols_of_tiles()));
        Ok(())
    }


    // ---- element access ------------------------------------------------

    /// Read one cell of an integral element; float cells truncate.
    /// Cells of unpopulated tiles yield the element's fill value.
    pub fn read_int(&mut self, element: usize, grid_row: usize, grid_col: usize) -> Result<i32> {
        self.check_element(element)?;

        match self.fetch_for_read(grid_row, grid_col)? {
            None => Ok(self.spec.elements[element].integer_fill()),

            Some((slot, cell)) => Ok(tile::get_int(
                &self.schema, &self.spec.elements[element], element,
                self.cache.tile(slot), cell,
            )),
        }
    }

    /// Read one cell in the float presentation domain.
    /// Integer-coded cells convert; fill sentinels present as NaN
    /// when the element's fill is NaN.
    pub fn read_float(&mut self, element: usize, grid_row: usize, grid_col: usize) -> Result<f32> {
        self.check_element(element)?;

        match self.fetch_for_read(grid_row, grid_col)? {
            None => Ok(self.spec.elements[element].float_fill()),

            Some((slot, cell)) => Ok(tile::get_float(
                &self.schema, &self.spec.elements[element], element,
                self.cache.tile(slot), cell,
            )),
        }
    }

    /// Write one cell of an element from the integer domain.
    /// Writing to an unpopulated tile materializes it with fill values.
    pub fn write_int(&mut self, element: usize, grid_row: usize, grid_col: usize, value: i32) -> UnitResult {
        self.require_write()?;
        self.check_element(element)?;

        let (slot, cell) = self.fetch_for_write(grid_row, grid_col)?;

        tile::put_int(
            &self.schema, &self.spec.elements[element], element,
            self.cache.tile_mut(slot), cell, value,
        );

        Ok(())
    }

    /// Write one cell from the float presentation domain,
    /// coding it for integral elements.
    pub fn write_float(&mut self, element: usize, grid_row: usize, grid_col: usize, value: f32) -> UnitResult {
        self.require_write()?;
        self.check_element(element)?;

        let (slot, cell) = self.fetch_for_write(grid_row, grid_col)?;

        tile::put_float(
            &self.schema, &self.spec.elements[element], element,
            self.cache.tile_mut(slot), cell, value,
        );

        Ok(())
    }

    /// Increment a counter cell and return the new count.
    /// A cell already at `i32::MAX` fails with
    /// [`Error::CounterOverflow`] and stays unchanged.
    pub fn increment_count(&mut self, element: usize, grid_row: usize, grid_col: usize) -> Result<i32> {
        self.require_write()?;
        self.check_element(element)?;

        let (slot, cell) = self.fetch_for_write(grid_row, grid_col)?;

        let current = tile::get_int(
            &self.schema, &self.spec.elements[element], element,
            self.cache.tile(slot), cell,
        );

        if current == i32::MAX {
            return Err(Error::CounterOverflow);
        }

        tile::put_int(
            &self.schema, &self.spec.elements[element], element,
            self.cache.tile_mut(slot), cell, current + 1,
        );

        Ok(current + 1)
    }


    // ---- coordinate transforms -----------------------------------------

    /// The model point `(x, y)` of a fractional grid position.
    pub fn grid_to_model(&self, row: f64, col: f64) -> (f64, f64) {
        let point = self.spec.transform.grid_to_model(row, col);
        (point.0, point.1)
    }

    /// The fractional grid position `(row, col)` of a model point.
    pub fn model_to_grid(&self, x: f64, y: f64) -> (f64, f64) {
        self.spec.transform.model_to_grid(x, y)
    }

    /// The fractional grid position of a geographic point,
    /// canonicalizing the longitude.
    pub fn geo_to_grid(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        self.spec.transform.geo_to_grid(latitude, longitude)
    }

    /// The `(latitude, longitude)` of a fractional grid position.
    pub fn grid_to_geo(&self, row: f64, col: f64) -> (f64, f64) {
        self.spec.transform.grid_to_geo(row, col)
    }


    // ---- metadata ------------------------------------------------------

    /// Store a metadata record, replacing any record with the same
    /// `(name, record_id)` and recycling its file space.
    pub fn write_metadata(&mut self, record: MetadataRecord) -> UnitResult {
        self.require_write()?;

        let bytes = record.write_record(self.spec.checksum_enabled)?;

        if let Some(stale) = self.metadata.remove(&record.name, record.record_id) {
            self.release_record_at(stale)?;
        }

        let offset = self.write_record_bytes(&bytes)?;
        self.metadata.insert(record.name, record.record_id, offset);
        Ok(())
    }

    /// Load the metadata record with this exact name and id.
    pub fn read_metadata(&mut self, name: &str, record_id: i32) -> Result<Option<MetadataRecord>> {
        let offset = match self.metadata.find(name, record_id) {
            Some(offset) => offset,
            None => return Ok(None),
        };

        let body = read_record_at(&mut self.file, offset, self.spec.checksum_enabled, RecordType::Metadata)?;
        Ok(Some(MetadataRecord::read_record(&body)?))
    }

    /// Load every metadata record whose name matches the pattern,
    /// where `*` matches any run of characters. The returned records
    /// are detached copies owned by the caller.
    pub fn read_metadata_matching(&mut self, pattern: &str) -> Result<Vec<MetadataRecord>> {
        let offsets: Vec<u64> = self.metadata.matching(pattern)
            .map(|entry| entry.offset)
            .collect();

        offsets.into_iter()
            .map(|offset| {
                let body = read_record_at(
                    &mut self.file, offset,
                    self.spec.checksum_enabled, RecordType::Metadata,
                )?;

                MetadataRecord::read_record(&body)
            })
            .collect()
    }

    /// Remove a metadata record and recycle its file space.
    pub fn delete_metadata(&mut self, name: &str, record_id: i32) -> UnitResult {
        self.require_write()?;

        if let Some(offset) = self.metadata.remove(name, record_id) {
            self.release_record_at(offset)?;
        }

        Ok(())
    }


    // ---- closing -------------------------------------------------------

    /// Flush everything and release the handle. Writable rasters
    /// serialize their dirty tiles and directories; the header with
    /// its directory pointers is rewritten last, so an interrupted
    /// close leaves the previously completed state reachable.
    pub fn close(mut self) -> UnitResult {
        let result = self.finish();

        if result.is_ok() && self.delete_on_close && self.access == Access::Write {
            std::fs::remove_file(&self.path)?;
        }

        result
    }

    fn finish(&mut self) -> UnitResult {
        if self.closed {
            return Ok(());
        }

        self.closed = true;

        if self.access == Access::Write {
            self.flush_cache()?;

            self.header.metadata_directory_offset = match self.metadata.is_empty() {
                true => 0,
                false => {
                    let record = self.metadata.write_record(self.spec.checksum_enabled)?;
                    self.write_record_bytes(&record)?
                },
            };

            let record = self.directory.write_record(self.spec.checksum_enabled)?;
            self.header.tile_directory_offset = self.write_record_bytes(&record)?;

            // the free list is serialized last, once no further
            // allocation can change it, and is always appended
            self.header.free_space_offset = match self.free_space.free_bytes() {
                0 => 0,
                _ => {
                    let record = self.free_space.write_record(self.spec.checksum_enabled)?;
                    let offset = self.file_size;
                    self.file.seek(SeekFrom::Start(offset))?;
                    self.file.write_all(&record)?;
                    self.file_size += record.len() as u64;
                    offset
                },
            };

            self.header.time_modified_ms = now_epoch_ms();

            let header_record = write_header_record(&self.header, &self.spec)?;
            self.file.seek(SeekFrom::Start(HEADER_RECORD_OFFSET))?;
            self.file.write_all(&header_record)?;
            self.file.flush()?;
        }

        Ok(())
    }


    // ---- tile plumbing -------------------------------------------------

    fn require_write(&self) -> UnitResult {
        match self.access {
            Access::Write => Ok(()),
            Access::Read => Err(Error::FileAccess),
        }
    }

    fn check_element(&self, element: usize) -> UnitResult {
        if element < self.spec.elements.len() { Ok(()) }
        else { Err(Error::ElementNotFound) }
    }

    /// Fetch the tile containing a cell, without creating it.
    /// `None` means the tile is unpopulated; the cache is not touched.
    fn fetch_for_read(&mut self, grid_row: usize, grid_col: usize) -> Result<Option<(usize, usize)>> {
        let (tile_row, tile_col, cell) = self.spec.locate(grid_row, grid_col)?;
        let tile_index = self.spec.tile_index(tile_row, tile_col);

        if let Some(slot) = self.cache.lookup(tile_index) {
            return Ok(Some((slot, cell)));
        }

        match self.directory.offset(tile_row, tile_col) {
            0 => Ok(None),

            offset => {
                let data = self.load_tile(offset, tile_index)?;
                let slot = self.install_tile(tile_index, tile_row, tile_col, data)?;
                Ok(Some((slot, cell)))
            },
        }
    }

    /// Fetch the tile containing a cell, materializing a blank
    /// fill-valued tile when it was never written.
    fn fetch_for_write(&mut self, grid_row: usize, grid_col: usize) -> Result<(usize, usize)> {
        let (tile_row, tile_col, cell) = self.spec.locate(grid_row, grid_col)?;
        let tile_index = self.spec.tile_index(tile_row, tile_col);

        if let Some(slot) = self.cache.lookup(tile_index) {
            return Ok((slot, cell));
        }

        let data = match self.directory.offset(tile_row, tile_col) {
            0 => self.schema.blank_tile(&self.spec.elements),
            offset => self.load_tile(offset, tile_index)?,
        };

        let slot = self.install_tile(tile_index, tile_row, tile_col, data)?;
        Ok((slot, cell))
    }

    fn load_tile(&mut self, offset: u64, tile_index: i32) -> Result<Vec<u8>> {
        let body = read_record_at(&mut self.file, offset, self.spec.checksum_enabled, RecordType::Tile)?;
        tile::parse_tile_record(&self.spec, &self.schema, &self.registry, tile_index, &body)
    }

    fn install_tile(&mut self, tile_index: i32, tile_row: usize, tile_col: usize, data: Vec<u8>) -> Result<usize> {
        let (_, evicted) = self.cache.acquire_slot();

        if let Some(evicted) = evicted {
            self.write_evicted(&evicted)?;
        }

        Ok(self.cache.install_head(tile_index, tile_row, tile_col, data, false))
    }

    fn write_evicted(&mut self, evicted: &Evicted) -> UnitResult {
        self.write_tile(evicted.tile_index, evicted.tile_row, evicted.tile_col, &evicted.data)
    }

    fn write_tile(&mut self, tile_index: i32, tile_row: usize, tile_col: usize, data: &[u8]) -> UnitResult {
        let record = {
            let registry = if self.spec.codec_names.is_empty() { None } else { Some(&self.registry) };
            tile::write_tile_record(&self.spec, &self.schema, registry, tile_index, data)?
        };

        let previous = self.directory.offset(tile_row, tile_col);
        if previous != 0 {
            self.release_record_at(previous)?;
        }

        let offset = self.write_record_bytes(&record)?;
        self.directory.set_offset(tile_row, tile_col, offset)
    }

    fn flush_cache(&mut self) -> UnitResult {
        for evicted in self.cache.drain_dirty() {
            self.write_evicted(&evicted)?;
        }

        Ok(())
    }

    /// Write a finished record into recycled space when possible,
    /// appending to the file otherwise. Returns the record offset.
    fn write_record_bytes(&mut self, record: &[u8]) -> Result<u64> {
        let length = record.len() as u64;

        let offset = self.free_space.allocate(length)
            .unwrap_or(self.file_size);

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(record)?;

        self.file_size = self.file_size.max(offset + length);
        Ok(offset)
    }

    fn release_record_at(&mut self, offset: u64) -> UnitResult {
        let length = record_length_at(&mut self.file, offset)?;
        self.free_space.release(offset, length);
        Ok(())
    }
}

impl Drop for Raster {
    fn drop(&mut self) {
        // errors surface through `close`; drop is best-effort
        let _ = self.finish();
    }
}


/// Read a complete record at an offset, validating its length field.
fn read_record_raw(file: &mut File, offset: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;

    let mut prefix = [ 0_u8; RECORD_PREFIX_SIZE ];
    file.read_exact(&mut prefix)?;

    let length = u32::from_le_bytes([ prefix[0], prefix[1], prefix[2], prefix[3] ]) as usize;

    if length < RECORD_PREFIX_SIZE + 4 || length % 8 != 0 || length > MAX_RECORD_SIZE {
        return Err(Error::invalid("record length"));
    }

    let mut record = vec![ 0_u8; length ];
    record[.. RECORD_PREFIX_SIZE].copy_from_slice(&prefix);
    file.read_exact(&mut record[RECORD_PREFIX_SIZE ..])?;
    Ok(record)
}

/// Read, verify and unwrap a record of a known type, returning its body.
fn read_record_at(file: &mut File, offset: u64, checksum_enabled: bool, expected: RecordType) -> Result<Vec<u8>> {
    let record = read_record_raw(file, offset)?;
    let (record_type, body) = open_record(&record, checksum_enabled)?;

    if record_type != expected {
        return Err(Error::invalid("unexpected record type"));
    }

    Ok(body.to_vec())
}

/// The stored length of the record at an offset.
fn record_length_at(file: &mut File, offset: u64) -> Result<u64> {
    file.seek(SeekFrom::Start(offset))?;

    let mut length = [ 0_u8; 4 ];
    file.read_exact(&mut length)?;
    Ok(u64::from(u32::from_le_bytes(length)))
}
