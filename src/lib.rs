
//! Read and write GVRS raster files: large two-dimensional grids of
//! typed cell values, partitioned into tiles and accessed randomly
//! through an in-memory tile cache. Tiles may be compressed with a
//! differential predictor feeding a deflate entropy coder, and every
//! record can carry a verified CRC-32C.
//!
//! Create a raster with [`raster::RasterBuilder`], reopen it with
//! [`raster::Raster::open`] or [`raster::Raster::open_for_write`],
//! and access cells with the typed read and write methods.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    missing_docs,

    missing_copy_implementations,
    missing_debug_implementations,
)]

#![deny(
    unused_must_use,
    trivial_numeric_casts,
)]

#![forbid(unsafe_code)]


pub mod io; // public to allow for custom record parsing

pub mod math;
pub mod error;
pub mod meta;
pub mod compression;
pub mod store;
pub mod raster;


/// Re-exports of all types commonly required
/// for simple reading and writing of a raster.
pub mod prelude {

    // main exports
    pub use crate::raster::{Raster, RasterBuilder};

    // secondary data types
    pub use crate::error::{Error, Result, UnitResult};
    pub use crate::meta::RasterSpec;
    pub use crate::meta::element::{ElementContent, ElementSpec, ElementType};
    pub use crate::meta::transform::{CoordinateSystem, ModelTransform};
    pub use crate::store::cache::CacheSize;
    pub use crate::store::metadata::{MetadataRecord, MetadataType};
    pub use crate::math::Vec2;
}
