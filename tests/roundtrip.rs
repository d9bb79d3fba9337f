
//! End-to-end scenarios: build a raster file, close it,
//! reopen it, and check that everything survived the disk.

use gvrs::prelude::*;

use std::path::PathBuf;
use tempfile::TempDir;


fn scratch_file(directory: &TempDir, name: &str) -> PathBuf {
    directory.path().join(name)
}


#[test]
fn counters_survive_close_and_reopen() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "counters.gvrs");

    let mut raster = RasterBuilder::new(1000, 1000)
        .tile_size(128, 128)
        .add_element_int("count", 0, i32::MAX, 0)
        .open_new(&path)
        .unwrap();

    let count = raster.element_index("count").unwrap();

    for _ in 0 .. 5 {
        raster.increment_count(count, 0, 0).unwrap();
    }

    assert_eq!(raster.increment_count(count, 999, 999).unwrap(), 1);
    assert_eq!(raster.increment_count(count, 999, 999).unwrap(), 2);

    raster.close().unwrap();

    let mut reopened = Raster::open(&path).unwrap();
    let count = reopened.element_index("count").unwrap();

    assert_eq!(reopened.read_int(count, 0, 0).unwrap(), 5);
    assert_eq!(reopened.read_int(count, 999, 999).unwrap(), 2);

    // cells that were never counted still present the fill value
    assert_eq!(reopened.read_int(count, 500, 500).unwrap(), 0);
}

#[test]
fn float_cells_survive_and_truncate_to_ints() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "floats.gvrs");

    let mut raster = RasterBuilder::new(2, 2)
        .tile_size(2, 2)
        .add_element_float("value", f32::MIN, f32::MAX, f32::NAN)
        .open_new(&path)
        .unwrap();

    let value = raster.element_index("value").unwrap();

    let mut expected = 1.0;
    for row in 0 .. 2 {
        for col in 0 .. 2 {
            raster.write_float(value, row, col, expected).unwrap();
            expected += 1.0;
        }
    }

    raster.close().unwrap();

    let mut reopened = Raster::open(&path).unwrap();
    let value = reopened.element_index("value").unwrap();

    let mut expected = 1.0;
    for row in 0 .. 2 {
        for col in 0 .. 2 {
            assert_eq!(reopened.read_float(value, row, col).unwrap(), expected);
            expected += 1.0;
        }
    }

    assert_eq!(reopened.read_int(value, 0, 0).unwrap(), 1);
}

#[test]
fn bracketing_globe_maps_both_antimeridian_representations() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "globe.gvrs");

    let raster = RasterBuilder::new(181, 361)
        .geographic_coordinates(-90.0, -180.0, 90.0, 180.0)
        .add_element_int("z", i32::MIN, i32::MAX, 0)
        .open_new(&path)
        .unwrap();

    assert!(raster.transform().brackets_longitude());
    assert!(!raster.transform().wraps_longitude());

    let (row, col) = raster.geo_to_grid(0.0, -180.0);
    assert!((row - 90.0).abs() < 1e-9);
    assert!(col.abs() < 1e-9);

    let (row, col) = raster.geo_to_grid(0.0, 180.0);
    assert!((row - 90.0).abs() < 1e-9);
    assert!((col - 360.0).abs() < 1e-9);

    raster.close().unwrap();
}

#[test]
fn wrapping_globe_identifies_the_antimeridian() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "wrapping.gvrs");

    let raster = RasterBuilder::new(181, 360)
        .geographic_coordinates(-90.0, -180.0, 90.0, 179.0)
        .add_element_int("z", i32::MIN, i32::MAX, 0)
        .open_new(&path)
        .unwrap();

    assert!(raster.transform().wraps_longitude());

    let (_, col_east) = raster.geo_to_grid(0.0, 180.0);
    let (_, col_west) = raster.geo_to_grid(0.0, -180.0);
    assert!((col_east - col_west).abs() < 1e-9);

    raster.close().unwrap();
}

#[test]
fn geographic_parameters_survive_reopening() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "geo_reopen.gvrs");

    RasterBuilder::new(181, 361)
        .geographic_coordinates(-90.0, -180.0, 90.0, 180.0)
        .add_element_int("z", i32::MIN, i32::MAX, 0)
        .open_new(&path)
        .unwrap()
        .close()
        .unwrap();

    let reopened = Raster::open(&path).unwrap();
    assert!(reopened.transform().brackets_longitude());

    let (row, col) = reopened.geo_to_grid(45.0, 90.0);
    assert!((row - 135.0).abs() < 1e-9);
    assert!((col - 270.0).abs() < 1e-9);
}

#[test]
fn cartesian_transform_round_trips() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "cartesian.gvrs");

    let raster = RasterBuilder::new(101, 101)
        .cartesian_coordinates(500_000.0, 4_000_000.0, 510_000.0, 4_010_000.0)
        .add_element_float("z", -100.0, 100.0, f32::NAN)
        .open_new(&path)
        .unwrap();

    for (row, col) in [ (0.0, 0.0), (100.0, 100.0), (33.5, 66.25) ] {
        let (x, y) = raster.grid_to_model(row, col);
        let (row_back, col_back) = raster.model_to_grid(x, y);

        assert!((row - row_back).abs() < 1e-9);
        assert!((col - col_back).abs() < 1e-9);
    }

    raster.close().unwrap();
}

#[test]
fn compressed_rasters_round_trip_and_shrink() {
    let directory = TempDir::new().unwrap();
    let plain_path = scratch_file(&directory, "plain.gvrs");
    let packed_path = scratch_file(&directory, "packed.gvrs");

    // a smooth integer surface compresses extremely well
    let surface = |row: usize, col: usize| 1000 + 2 * row as i32 + 3 * col as i32;

    for (path, compression) in [ (&plain_path, false), (&packed_path, true) ] {
        let mut raster = RasterBuilder::new(256, 256)
            .tile_size(128, 128)
            .data_compression(compression)
            .add_element_int("z", 0, 10_000, -1)
            .open_new(path)
            .unwrap();

        let z = raster.element_index("z").unwrap();

        for row in 0 .. 256 {
            for col in 0 .. 256 {
                raster.write_int(z, row, col, surface(row, col)).unwrap();
            }
        }

        raster.close().unwrap();
    }

    let plain_size = std::fs::metadata(&plain_path).unwrap().len();
    let packed_size = std::fs::metadata(&packed_path).unwrap().len();
    assert!(packed_size * 4 < plain_size, "{} should be far below {}", packed_size, plain_size);

    let mut reopened = Raster::open(&packed_path).unwrap();
    let z = reopened.element_index("z").unwrap();

    for row in (0 .. 256).step_by(7) {
        for col in (0 .. 256).step_by(5) {
            assert_eq!(reopened.read_int(z, row, col).unwrap(), surface(row, col));
        }
    }
}

#[test]
fn int_coded_floats_quantize_and_keep_nan() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "icf.gvrs");

    let mut raster = RasterBuilder::new(10, 10)
        .add_element_int_coded_float("depth", -11_000.0, 9_000.0, f32::NAN, 1000.0, 0.0)
        .open_new(&path)
        .unwrap();

    let depth = raster.element_index("depth").unwrap();

    raster.write_float(depth, 1, 1, 12.3456).unwrap();
    raster.write_float(depth, 2, 2, f32::NAN).unwrap();
    raster.close().unwrap();

    let mut reopened = Raster::open(&path).unwrap();
    let depth = reopened.element_index("depth").unwrap();

    // quantized to a thousandth by the scale
    assert!((reopened.read_float(depth, 1, 1).unwrap() - 12.346).abs() < 1e-6);
    assert_eq!(reopened.read_int(depth, 1, 1).unwrap(), 12_346);

    assert!(reopened.read_float(depth, 2, 2).unwrap().is_nan());
    assert!(reopened.read_float(depth, 5, 5).unwrap().is_nan()); // never written
}

#[test]
fn short_elements_narrow_and_round_trip() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "short.gvrs");

    let mut raster = RasterBuilder::new(64, 64)
        .tile_size(32, 32)
        .data_compression(true)
        .add_element_short("class", -100, 100, -1)
        .open_new(&path)
        .unwrap();

    let class = raster.element_index("class").unwrap();

    for row in 0 .. 64 {
        for col in 0 .. 64 {
            raster.write_int(class, row, col, ((row + col) % 100) as i32 - 50).unwrap();
        }
    }

    raster.close().unwrap();

    let mut reopened = Raster::open(&path).unwrap();
    let class = reopened.element_index("class").unwrap();

    assert_eq!(reopened.read_int(class, 10, 20).unwrap(), -20);
    assert_eq!(reopened.read_int(class, 63, 63).unwrap(), (126 % 100) - 50);
}

#[test]
fn small_cache_spills_and_reloads_tiles() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "spill.gvrs");

    let mut raster = RasterBuilder::new(512, 512)
        .tile_size(64, 64) // an 8x8 grid of tiles
        .add_element_int("z", i32::MIN, i32::MAX, 0)
        .open_new(&path)
        .unwrap();

    raster.set_tile_cache_size(CacheSize::Small).unwrap();
    let z = raster.element_index("z").unwrap();

    // touch one cell in each of the 64 tiles, overflowing the cache
    for tile_row in 0 .. 8 {
        for tile_col in 0 .. 8 {
            let (row, col) = (tile_row * 64, tile_col * 64);
            raster.write_int(z, row, col, (tile_row * 8 + tile_col) as i32).unwrap();
        }
    }

    // revisiting spilled tiles reloads them from the file
    for tile_row in 0 .. 8 {
        for tile_col in 0 .. 8 {
            let (row, col) = (tile_row * 64, tile_col * 64);
            let expected = (tile_row * 8 + tile_col) as i32;
            assert_eq!(raster.read_int(z, row, col).unwrap(), expected);
        }
    }

    raster.close().unwrap();

    let mut reopened = Raster::open(&path).unwrap();
    let z = reopened.element_index("z").unwrap();
    assert_eq!(reopened.read_int(z, 7 * 64, 7 * 64).unwrap(), 63);
}

#[test]
fn rewriting_cells_recycles_file_space() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "recycle.gvrs");

    let mut raster = RasterBuilder::new(100, 100)
        .add_element_int("z", i32::MIN, i32::MAX, 0)
        .open_new(&path)
        .unwrap();

    let z = raster.element_index("z").unwrap();
    raster.write_int(z, 50, 50, 1).unwrap();
    raster.close().unwrap();

    let first_size = std::fs::metadata(&path).unwrap().len();

    // rewriting the same tile ten times must not grow the file tenfold
    for value in 2 .. 12 {
        let mut raster = Raster::open_for_write(&path).unwrap();
        let z = raster.element_index("z").unwrap();
        raster.write_int(z, 50, 50, value).unwrap();
        raster.close().unwrap();
    }

    let final_size = std::fs::metadata(&path).unwrap().len();
    assert!(final_size < first_size * 3, "{} grew from {}", final_size, first_size);

    let mut reopened = Raster::open(&path).unwrap();
    let z = reopened.element_index("z").unwrap();
    assert_eq!(reopened.read_int(z, 50, 50).unwrap(), 11);
}

#[test]
fn metadata_survives_and_replaces() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "metadata.gvrs");

    let mut raster = RasterBuilder::new(10, 10)
        .add_element_int("z", 0, 1, 0)
        .product_label("metadata test")
        .open_new(&path)
        .unwrap();

    raster.write_metadata(MetadataRecord::string("copyright", 0, "public domain")).unwrap();
    raster.write_metadata(MetadataRecord::ints("epsg", 0, &[ 4326 ])).unwrap();
    raster.write_metadata(MetadataRecord::string("copyright", 0, "cc-by-4.0")).unwrap();
    raster.close().unwrap();

    let mut reopened = Raster::open_for_write(&path).unwrap();

    let copyright = reopened.read_metadata("copyright", 0).unwrap().unwrap();
    assert_eq!(copyright.as_string().unwrap(), "cc-by-4.0");

    let epsg = reopened.read_metadata("epsg", 0).unwrap().unwrap();
    assert_eq!(epsg.as_ints().unwrap(), vec![ 4326 ]);

    assert!(reopened.read_metadata("missing", 0).unwrap().is_none());

    let all: Vec<String> = reopened.read_metadata_matching("*").unwrap()
        .into_iter().map(|record| record.name).collect();
    assert_eq!(all, vec![ "copyright".to_string(), "epsg".to_string() ]);

    reopened.delete_metadata("epsg", 0).unwrap();
    reopened.close().unwrap();

    let mut reread = Raster::open(&path).unwrap();
    assert!(reread.read_metadata("epsg", 0).unwrap().is_none());
    assert!(reread.read_metadata("copyright", 0).unwrap().is_some());
}

#[test]
fn read_only_handles_refuse_writes() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "readonly.gvrs");

    RasterBuilder::new(10, 10)
        .add_element_int("z", 0, 100, 0)
        .open_new(&path)
        .unwrap()
        .close()
        .unwrap();

    let mut raster = Raster::open(&path).unwrap();
    let z = raster.element_index("z").unwrap();

    assert!(matches!(raster.write_int(z, 0, 0, 1), Err(Error::FileAccess)));
    assert!(matches!(raster.increment_count(z, 0, 0), Err(Error::FileAccess)));
    assert!(matches!(
        raster.write_metadata(MetadataRecord::string("a", 0, "b")),
        Err(Error::FileAccess)
    ));
}

#[test]
fn out_of_bounds_cells_are_rejected() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "bounds.gvrs");

    let mut raster = RasterBuilder::new(100, 200)
        .tile_size(64, 64)
        .add_element_int("z", 0, 100, 0)
        .open_new(&path)
        .unwrap();

    let z = raster.element_index("z").unwrap();

    // the bottom-right tile extends past the raster; cells in the
    // overhang exist in the tile but are not addressable
    assert!(raster.read_int(z, 99, 199).is_ok());
    assert!(matches!(raster.read_int(z, 100, 0), Err(Error::CoordinateOutOfBounds)));
    assert!(matches!(raster.read_int(z, 0, 200), Err(Error::CoordinateOutOfBounds)));
    assert!(matches!(raster.write_int(z, 100, 199, 1), Err(Error::CoordinateOutOfBounds)));

    assert!(matches!(raster.read_int(7, 0, 0), Err(Error::ElementNotFound)));
}

#[test]
fn checksummed_files_detect_corruption() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "checksum.gvrs");

    let mut raster = RasterBuilder::new(16, 16)
        .tile_size(16, 16)
        .checksum_enabled(true)
        .add_element_int("z", 0, 100, 0)
        .open_new(&path)
        .unwrap();

    let z = raster.element_index("z").unwrap();
    raster.write_int(z, 3, 3, 77).unwrap();
    raster.close().unwrap();

    // an intact file reads back fine
    let mut intact = Raster::open(&path).unwrap();
    assert_eq!(intact.read_int(z, 3, 3).unwrap(), 77);
    drop(intact);

    // flip one byte inside the first tile record,
    // which sits directly behind the header record
    let mut bytes = std::fs::read(&path).unwrap();
    let header_length = u32::from_le_bytes([ bytes[16], bytes[17], bytes[18], bytes[19] ]) as usize;
    let target = 16 + header_length + 16; // well inside the tile body
    bytes[target] ^= 0x20;
    std::fs::write(&path, bytes).unwrap();

    let mut corrupted = Raster::open(&path).unwrap();
    assert!(matches!(corrupted.read_int(z, 3, 3), Err(Error::InvalidFile(_))));
}

#[test]
fn delete_on_close_removes_the_file() {
    let directory = TempDir::new().unwrap();
    let path = scratch_file(&directory, "temporary.gvrs");

    let mut raster = RasterBuilder::new(10, 10)
        .add_element_int("z", 0, 1, 0)
        .open_new(&path)
        .unwrap();

    raster.delete_on_close(true);
    assert!(path.exists());

    raster.close().unwrap();
    assert!(!path.exists());
}

#[test]
fn nonexistent_and_foreign_files_fail_to_open() {
    let directory = TempDir::new().unwrap();

    let missing = scratch_file(&directory, "missing.gvrs");
    assert!(matches!(Raster::open(&missing), Err(Error::Io(_))));

    let foreign = scratch_file(&directory, "foreign.bin");
    std::fs::write(&foreign, b"definitely not a raster file, not even close").unwrap();
    assert!(matches!(Raster::open(&foreign), Err(Error::InvalidFile(_))));
}
