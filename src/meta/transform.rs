
//! Transforms between grid, model and geographic coordinates.
//!
//! Grid coordinates are fractional `(row, column)` positions; model
//! coordinates are the cartesian `(x, y)` of the raster's own space.
//! For geographic rasters, x is longitude and y is latitude, and
//! longitudes are canonicalized around the raster's center so that a
//! query may use any representation of the same meridian.

use crate::error::{Error, Result};
use crate::math::Vec2;


/// Tolerance for deciding whether a raster spans the full circle.
const FULL_CIRCLE_EPSILON: f64 = 1e-9 * 360.0;


/// Distinguishes the two coordinate system kinds stored in the file.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CoordinateSystem {

    /// Model x and y are plain cartesian axes.
    Cartesian,

    /// Model x is longitude in degrees, model y is latitude in degrees.
    Geographic,
}

impl CoordinateSystem {

    /// The byte identifying this kind on disk.
    pub fn code(self) -> u8 {
        match self {
            CoordinateSystem::Cartesian => 1,
            CoordinateSystem::Geographic => 2,
        }
    }

    /// Look up the kind by its on-disk byte.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(CoordinateSystem::Cartesian),
            2 => Ok(CoordinateSystem::Geographic),
            _ => Err(Error::invalid("coordinate system kind")),
        }
    }
}


/// A two-by-three affine matrix in row-major order:
/// `x' = m[0]*x + m[1]*y + m[2]` and `y' = m[3]*x + m[4]*y + m[5]`.
pub type Affine = [f64; 6];

fn apply(matrix: &Affine, point: Vec2<f64>) -> Vec2<f64> {
    Vec2(
        matrix[0] * point.0 + matrix[1] * point.1 + matrix[2],
        matrix[3] * point.0 + matrix[4] * point.1 + matrix[5],
    )
}


/// The complete grid↔model mapping of one raster,
/// including the longitude wrap bookkeeping of geographic rasters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTransform {

    /// Cartesian or geographic.
    pub system: CoordinateSystem,

    /// Model x of the cell at column zero.
    pub x0: f64,

    /// Model y of the cell at row zero.
    pub y0: f64,

    /// Model x of the cell at the last column.
    pub x1: f64,

    /// Model y of the cell at the last row.
    pub y1: f64,

    /// Model distance between two adjacent columns.
    pub cell_size_x: f64,

    /// Model distance between two adjacent rows.
    pub cell_size_y: f64,

    /// Maps model `(x, y)` to grid `(column, row)`.
    pub model_to_raster: Affine,

    /// Maps grid `(column, row)` to model `(x, y)`.
    pub raster_to_model: Affine,

    /// The longitude at the horizontal center of a geographic raster.
    x_center: f64,

    /// The column at the horizontal center of a geographic raster.
    x_center_grid: f64,

    /// Columns per full circle of longitude.
    period_in_columns: f64,

    /// The first and last columns lie 360 degrees apart (duplicate boundary).
    brackets_longitude: bool,

    /// One column past the last returns to the first (no duplicate).
    wraps_longitude: bool,
}

impl ModelTransform {

    /// A cartesian mapping spanning `(x0, y0)` to `(x1, y1)`,
    /// with cells at both corners.
    pub fn cartesian(n_rows: usize, n_cols: usize, x0: f64, y0: f64, x1: f64, y1: f64) -> Result<Self> {
        let cell_size_x = span_per_cell(x1 - x0, n_cols)?;
        let cell_size_y = span_per_cell(y1 - y0, n_rows)?;

        Ok(Self::from_parameters(
            CoordinateSystem::Cartesian, n_cols,
            x0, y0, x1, y1, cell_size_x, cell_size_y,
        ))
    }

    /// A geographic mapping from `(lat0, lon0)` at grid `(0, 0)`
    /// to `(lat1, lon1)` at the last cell. The longitude span is
    /// unwrapped to be positive, so a raster may cross the antimeridian.
    pub fn geographic(n_rows: usize, n_cols: usize, lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> Result<Self> {
        let mut lon_span = lon1 - lon0;
        while lon_span <= 0.0 { lon_span += 360.0; }

        let cell_size_x = span_per_cell(lon_span, n_cols)?;
        let cell_size_y = span_per_cell(lat1 - lat0, n_rows)?;

        Ok(Self::from_parameters(
            CoordinateSystem::Geographic, n_cols,
            lon0, lat0, lon0 + lon_span, lat1, cell_size_x, cell_size_y,
        ))
    }

    /// Reassemble a transform from the parameters stored in a file.
    /// The matrices are taken verbatim; the wrap bookkeeping is derived.
    pub fn from_stored(
        system: CoordinateSystem, n_cols: usize,
        x0: f64, y0: f64, x1: f64, y1: f64,
        cell_size_x: f64, cell_size_y: f64,
        model_to_raster: Affine, raster_to_model: Affine,
    ) -> Self {
        let mut transform = Self::from_parameters(
            system, n_cols, x0, y0, x1, y1, cell_size_x, cell_size_y,
        );

        transform.model_to_raster = model_to_raster;
        transform.raster_to_model = raster_to_model;
        transform
    }

    fn from_parameters(
        system: CoordinateSystem, n_cols: usize,
        x0: f64, y0: f64, x1: f64, y1: f64,
        cell_size_x: f64, cell_size_y: f64,
    ) -> Self {

        let model_to_raster = [
            1.0 / cell_size_x, 0.0, -x0 / cell_size_x,
            0.0, 1.0 / cell_size_y, -y0 / cell_size_y,
        ];

        let raster_to_model = [
            cell_size_x, 0.0, x0,
            0.0, cell_size_y, y0,
        ];

        let last_column = (n_cols.max(1) - 1) as f64;
        let x_center = x0 + cell_size_x * last_column / 2.0;
        let x_center_grid = last_column / 2.0;

        let geographic = system == CoordinateSystem::Geographic;
        let covered_span = cell_size_x * last_column;
        let wrapped_span = cell_size_x * n_cols as f64;

        ModelTransform {
            system,
            x0, y0, x1, y1,
            cell_size_x, cell_size_y,
            model_to_raster, raster_to_model,
            x_center, x_center_grid,
            period_in_columns: 360.0 / cell_size_x,
            brackets_longitude: geographic && (covered_span - 360.0).abs() < FULL_CIRCLE_EPSILON,
            wraps_longitude: geographic && (wrapped_span - 360.0).abs() < FULL_CIRCLE_EPSILON,
        }
    }

    /// Whether the first and last columns describe the same meridian.
    pub fn brackets_longitude(&self) -> bool {
        self.brackets_longitude
    }

    /// Whether the column after the last would return to the first.
    pub fn wraps_longitude(&self) -> bool {
        self.wraps_longitude
    }

    /// The fractional grid position `(row, column)` of a model point.
    pub fn model_to_grid(&self, x: f64, y: f64) -> (f64, f64) {
        let grid = apply(&self.model_to_raster, Vec2(x, y));
        (grid.1, grid.0)
    }

    /// The model point of a fractional grid position.
    pub fn grid_to_model(&self, row: f64, col: f64) -> Vec2<f64> {
        apply(&self.raster_to_model, Vec2(col, row))
    }

    /// The fractional grid position of a geographic point.
    /// The longitude may use any representation of its meridian;
    /// it is canonicalized into the raster's own 360-degree window.
    pub fn geo_to_grid(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let (row, mut col) = self.model_to_grid(longitude, latitude);

        if self.system == CoordinateSystem::Geographic {
            let low = self.x_center_grid - self.period_in_columns / 2.0;
            let high = self.x_center_grid + self.period_in_columns / 2.0;

            while col < low { col += self.period_in_columns; }
            while col > high { col -= self.period_in_columns; }
        }

        (row, col)
    }

    /// The `(latitude, longitude)` of a fractional grid position.
    pub fn grid_to_geo(&self, row: f64, col: f64) -> (f64, f64) {
        let model = self.grid_to_model(row, col);
        (model.1, model.0)
    }
}


fn span_per_cell(span: f64, cell_count: usize) -> Result<f64> {
    let steps = cell_count.max(2) - 1;
    let size = span / steps as f64;

    if size.is_finite() && size != 0.0 { Ok(size) }
    else { Err(Error::raster_spec("degenerate cell size")) }
}
