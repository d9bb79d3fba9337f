
//! Builds the specification of a new raster file.

use crate::compression::CodecRegistry;
use crate::meta::{CodecNameList, ElementList, RasterSpec};
use crate::meta::element::{ElementContent, ElementSpec};
use crate::meta::transform::ModelTransform;
use crate::error::Result;
use crate::raster::Raster;
use std::path::Path;


/// The default tile dimension. 120 divides evenly into many raster
/// sizes, which keeps edge tiles fully used.
const DEFAULT_TILE_SIZE: usize = 120;


#[derive(Debug, Clone, Copy)]
enum Coordinates {
    Cartesian { x0: f64, y0: f64, x1: f64, y1: f64 },
    Geographic { lat0: f64, lon0: f64, lat1: f64, lon1: f64 },
}


/// Collects the parameters of a raster before any file exists.
/// All validation happens in [`RasterBuilder::open_new`], so the
/// chained mutators never fail halfway through a configuration.
#[derive(Debug)]
pub struct RasterBuilder {
    n_rows: usize,
    n_cols: usize,
    n_rows_in_tile: usize,
    n_cols_in_tile: usize,
    checksum_enabled: bool,
    data_compression: bool,
    coordinates: Option<Coordinates>,
    raster_space_code: u8,
    elements: ElementList,
    product_label: Option<String>,
}

impl RasterBuilder {

    /// Start describing a raster with the given cell grid.
    /// The tile size defaults to 120, clipped to the raster dimensions.
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        RasterBuilder {
            n_rows,
            n_cols,
            n_rows_in_tile: DEFAULT_TILE_SIZE.min(n_rows.max(1)),
            n_cols_in_tile: DEFAULT_TILE_SIZE.min(n_cols.max(1)),
            checksum_enabled: false,
            data_compression: false,
            coordinates: None,
            raster_space_code: 0,
            elements: ElementList::new(),
            product_label: None,
        }
    }

    /// Override the tile dimensions.
    pub fn tile_size(mut self, n_rows_in_tile: usize, n_cols_in_tile: usize) -> Self {
        self.n_rows_in_tile = n_rows_in_tile;
        self.n_cols_in_tile = n_cols_in_tile;
        self
    }

    /// Store a CRC-32C with every record and verify it on every read.
    pub fn checksum_enabled(mut self, enabled: bool) -> Self {
        self.checksum_enabled = enabled;
        self
    }

    /// Pack tile payloads with the standard codecs when they shrink.
    pub fn data_compression(mut self, enabled: bool) -> Self {
        self.data_compression = enabled;
        self
    }

    /// Use a cartesian model space spanning `(x0, y0)` to `(x1, y1)`,
    /// with cells at both corners.
    pub fn cartesian_coordinates(mut self, x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        self.coordinates = Some(Coordinates::Cartesian { x0, y0, x1, y1 });
        self
    }

    /// Use a geographic model space from `(lat0, lon0)` at grid `(0, 0)`
    /// to `(lat1, lon1)` at the last cell. Longitudes may cross the
    /// antimeridian.
    pub fn geographic_coordinates(mut self, lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> Self {
        self.coordinates = Some(Coordinates::Geographic { lat0, lon0, lat1, lon1 });
        self
    }

    /// Store an application-defined raster space byte, verbatim.
    pub fn raster_space_code(mut self, code: u8) -> Self {
        self.raster_space_code = code;
        self
    }

    /// A free-form product identification stored in the header.
    pub fn product_label(mut self, label: impl Into<String>) -> Self {
        self.product_label = Some(label.into());
        self
    }

    /// Add a fully described element.
    pub fn add_element(mut self, element: ElementSpec) -> Self {
        self.elements.push(element);
        self
    }

    /// Add a four-byte integer element.
    pub fn add_element_int(self, name: &str, min: i32, max: i32, fill: i32) -> Self {
        self.add_element(ElementSpec::new(name, ElementContent::Int { min, max, fill }))
    }

    /// Add a two-byte integer element.
    pub fn add_element_short(self, name: &str, min: i16, max: i16, fill: i16) -> Self {
        self.add_element(ElementSpec::new(name, ElementContent::Short { min, max, fill }))
    }

    /// Add a four-byte float element.
    pub fn add_element_float(self, name: &str, min: f32, max: f32, fill: f32) -> Self {
        self.add_element(ElementSpec::new(name, ElementContent::Float { min, max, fill }))
    }

    /// Add an integer-coded-float element, stored as an integer `i`
    /// and presented as `i / scale + offset`. Unusable `scale` or
    /// `offset` values surface as [`crate::error::Error::BadIcfParameters`]
    /// from [`RasterBuilder::open_new`], like every other validation.
    pub fn add_element_int_coded_float(self, name: &str, min: f32, max: f32, fill: f32, scale: f32, offset: f32) -> Self {
        let content = ElementContent::int_coded_float(min, max, fill, scale, offset)
            .unwrap_or(ElementContent::IntCodedFloat {
                min, max, fill, scale, offset,
                i_min: 0, i_max: 0, i_fill: 0,
            });

        self.add_element(ElementSpec::new(name, content))
    }

    /// The specification this builder currently describes.
    /// Fails when the configuration violates any invariant.
    pub fn to_spec(&self) -> Result<RasterSpec> {
        let transform = match self.coordinates {
            Some(Coordinates::Cartesian { x0, y0, x1, y1 }) =>
                ModelTransform::cartesian(self.n_rows, self.n_cols, x0, y0, x1, y1)?,

            Some(Coordinates::Geographic { lat0, lon0, lat1, lon1 }) =>
                ModelTransform::geographic(self.n_rows, self.n_cols, lat0, lon0, lat1, lon1)?,

            // grid and model space coincide
            None => ModelTransform::cartesian(
                self.n_rows, self.n_cols,
                0.0, 0.0,
                self.n_cols.max(2) as f64 - 1.0,
                self.n_rows.max(2) as f64 - 1.0,
            )?,
        };

        let mut codec_names = CodecNameList::new();
        if self.data_compression {
            codec_names.extend(CodecRegistry::standard().names().map(str::to_string));
        }

        let spec = RasterSpec {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            n_rows_in_tile: self.n_rows_in_tile,
            n_cols_in_tile: self.n_cols_in_tile,
            checksum_enabled: self.checksum_enabled,
            raster_space_code: self.raster_space_code,
            transform,
            elements: self.elements.clone(),
            codec_names,
            product_label: self.product_label.clone(),
        };

        spec.validate()?;
        Ok(spec)
    }

    /// Validate the configuration, replace any existing file at `path`
    /// with a fresh raster, and return the open writable handle.
    pub fn open_new(self, path: impl AsRef<Path>) -> Result<Raster> {
        let spec = self.to_spec()?;
        Raster::create(path.as_ref(), spec)
    }
}
