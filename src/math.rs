
//! Small helpers for grid geometry.

use std::ops::{Add, Sub, Mul};


/// A generic pair of two values, used for model and geographic coordinates.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Vec2<T> (pub T, pub T);

impl<T> Vec2<T> {

    /// The first component of this pair, the horizontal axis.
    pub fn x(self) -> T where T: Copy { self.0 }

    /// The second component of this pair, the vertical axis.
    pub fn y(self) -> T where T: Copy { self.1 }

    /// Apply a function to both components.
    pub fn map<B>(self, map: impl Fn(T) -> B) -> Vec2<B> {
        Vec2(map(self.0), map(self.1))
    }
}

impl<T: Add> Add for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn add(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 + other.0, self.1 + other.1)
    }
}

impl<T: Sub> Sub for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn sub(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 - other.0, self.1 - other.1)
    }
}

impl<T: Mul + Copy> Mul<T> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn mul(self, factor: T) -> Self::Output {
        Vec2(self.0 * factor, self.1 * factor)
    }
}

impl<T> From<(T, T)> for Vec2<T> {
    fn from((x, y): (T, T)) -> Self { Vec2(x, y) }
}


/// How many tiles are required to cover a full raster axis.
/// The last tile may extend past the raster and is only partially used.
pub fn compute_tile_count(full_resolution: usize, tile_size: usize) -> usize {
    debug_assert_ne!(tile_size, 0);
    (full_resolution + tile_size - 1) / tile_size
}

/// Round a byte count up to the next multiple of four.
pub fn round_up_4(size: usize) -> usize {
    (size + 3) / 4 * 4
}

/// Round a byte count up to the next multiple of eight.
/// All file records start and end on eight-byte boundaries.
pub fn round_up_8(size: u64) -> u64 {
    (size + 7) / 8 * 8
}
