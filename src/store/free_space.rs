
//! The file-space manager: a free-list allocator over the interior
//! of the file, recycling the space of replaced records.

use crate::error::{Error, Result, i32_to_usize, usize_to_i32};
use crate::io::Data;
use crate::math::round_up_8;
use crate::meta::{RecordType, finish_record, start_record};


/// One free interval of the file, `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Interval {
    offset: u64,
    length: u64,
}


/// Tracks the free intervals of one file, ordered by offset.
/// All lengths and offsets are multiples of eight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreeSpaceManager {
    intervals: Vec<Interval>,
}

impl FreeSpaceManager {

    /// A manager with no free space at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the first free interval that fits `size` bytes
    /// (rounded up to eight), or `None` when the caller
    /// should grow the file instead.
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        let size = round_up_8(size.max(8));

        let position = self.intervals.iter()
            .position(|interval| interval.length >= size)?;

        let interval = &mut self.intervals[position];
        let offset = interval.offset;

        if interval.length == size {
            self.intervals.remove(position);
        }
        else {
            interval.offset += size;
            interval.length -= size;
        }

        Some(offset)
    }

    /// Return `size` bytes at `offset` to the free list,
    /// merging with adjacent intervals.
    pub fn release(&mut self, offset: u64, size: u64) {
        if size == 0 { return; }

        let length = round_up_8(size.max(8));
        let position = self.intervals
            .partition_point(|interval| interval.offset < offset);

        self.intervals.insert(position, Interval { offset, length });

        // coalesce with the following interval, then with the preceding one
        if position + 1 < self.intervals.len() {
            let next = self.intervals[position + 1];
            let inserted = &mut self.intervals[position];

            if inserted.offset + inserted.length == next.offset {
                inserted.length += next.length;
                self.intervals.remove(position + 1);
            }
        }

        if position > 0 {
            let inserted = self.intervals[position];
            let previous = &mut self.intervals[position - 1];

            if previous.offset + previous.length == inserted.offset {
                previous.length += inserted.length;
                self.intervals.remove(position);
            }
        }
    }

    /// The total number of free bytes.
    pub fn free_bytes(&self) -> u64 {
        self.intervals.iter().map(|interval| interval.length).sum()
    }

    /// Serialize the free list into a sealed record.
    pub fn write_record(&self, checksum_enabled: bool) -> Result<Vec<u8>> {
        let mut bytes = start_record(RecordType::FreeSpace);

        usize_to_i32(self.intervals.len(), "free interval count")?.write(&mut bytes)?;
        0_i32.write(&mut bytes)?; // reserved, keeps the pairs eight-aligned

        for interval in &self.intervals {
            (interval.offset as i64).write(&mut bytes)?;
            (interval.length as i64).write(&mut bytes)?;
        }

        finish_record(&mut bytes, checksum_enabled)?;
        Ok(bytes)
    }

    /// Deserialize a free-space record body.
    pub fn read_record(body: &[u8]) -> Result<Self> {
        let mut read = body;

        let count = i32_to_usize(i32::read(&mut read)?, "free interval count")?;
        i32::read(&mut read)?; // reserved

        let mut intervals = Vec::with_capacity(count.min(1024));
        let mut previous_end = 0;

        for _ in 0 .. count {
            let offset = crate::error::i64_to_u64(i64::read(&mut read)?, "free interval offset")?;
            let length = crate::error::i64_to_u64(i64::read(&mut read)?, "free interval length")?;

            if offset < previous_end || length == 0 {
                return Err(Error::invalid("free interval ordering"));
            }

            previous_end = offset + length;
            intervals.push(Interval { offset, length });
        }

        Ok(FreeSpaceManager { intervals })
    }
}
