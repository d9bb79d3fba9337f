
//! The tile cache: a fixed arena of tile slots threaded onto a
//! doubly-linked LRU list, with a chained hash table for constant-time
//! lookup and a free list of unused slots.
//!
//! Links are arena indices rather than pointers, so every structural
//! move is an index assignment. The hash bins are small vectors of
//! slot indices; the number of live hash entries is bounded by the
//! cache size, so the bins stay shallow.

use smallvec::SmallVec;


/// Number of hash bins, a power of two.
const TILE_HASH_SIZE: usize = 256;

/// Knuth's multiplicative hash constant for 32-bit keys.
const KNUTH_MULTIPLIER: u32 = 2_654_435_761;

/// A slot holding no tile.
const NO_TILE: i32 = -1;


/// The preset capacities a raster cache can be configured with.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CacheSize {

    /// Sixteen tiles, for strictly local access patterns.
    Small,

    /// Sixty-four tiles, the default.
    Medium,

    /// One full row of tiles, for row-major sweeps over the raster.
    Large,

    /// Several rows of tiles, for neighbourhood operations
    /// that move down the raster.
    ExtraLarge,
}

impl CacheSize {

    /// The number of slots this preset allocates
    /// for a raster with the given tile grid width.
    pub fn slot_count(self, n_cols_of_tiles: usize) -> usize {
        let count = match self {
            CacheSize::Small => 16,
            CacheSize::Medium => 64,
            CacheSize::Large => n_cols_of_tiles,
            CacheSize::ExtraLarge => 4 * n_cols_of_tiles,
        };

        count.max(2)
    }
}


/// A tile evicted from the cache that still has unwritten changes.
/// The caller must serialize it before reusing the slot's place on disk.
#[derive(Debug)]
pub struct Evicted {

    /// The flat tile index of the evicted tile.
    pub tile_index: i32,

    /// Tile grid row of the evicted tile.
    pub tile_row: usize,

    /// Tile grid column of the evicted tile.
    pub tile_col: usize,

    /// The tile buffer, moved out of the slot.
    pub data: Vec<u8>,
}


#[derive(Debug)]
struct Slot {
    tile_index: i32,
    tile_row: usize,
    tile_col: usize,
    data: Vec<u8>,
    dirty: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Slot {
    fn unused() -> Self {
        Slot {
            tile_index: NO_TILE,
            tile_row: 0, tile_col: 0,
            data: Vec::new(),
            dirty: false,
            prev: None, next: None,
        }
    }
}


/// The cache of one raster handle. See the module documentation.
#[derive(Debug)]
pub struct TileCache {
    slots: Vec<Slot>,

    /// Most recently used slot.
    head: Option<usize>,

    /// Least recently used slot, the eviction candidate.
    tail: Option<usize>,

    /// Unused slots, chained through their `next` links.
    free_head: Option<usize>,

    /// Chained hash over the linked slots.
    bins: Vec<SmallVec<[u32; 4]>>,

    /// The tile index at the LRU head, or [`NO_TILE`] when empty.
    /// Repeated fetches of the same tile skip all list and hash work.
    first_tile_index: i32,
}

impl TileCache {

    /// A cache with `slot_count` empty slots.
    pub fn new(slot_count: usize) -> Self {
        let slot_count = slot_count.max(2);
        let mut slots = Vec::with_capacity(slot_count);

        for index in 0 .. slot_count {
            let mut slot = Slot::unused();
            slot.next = if index + 1 < slot_count { Some(index + 1) } else { None };
            slots.push(slot);
        }

        TileCache {
            slots,
            head: None,
            tail: None,
            free_head: Some(0),
            bins: vec![ SmallVec::new(); TILE_HASH_SIZE ],
            first_tile_index: NO_TILE,
        }
    }

    /// The fixed number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Find the slot holding a tile and promote it to the LRU head.
    pub fn lookup(&mut self, tile_index: i32) -> Option<usize> {
        // hot path: the same tile as last time
        if tile_index == self.first_tile_index {
            return self.head;
        }

        let bin = self.bin_of(tile_index);
        let slot = self.bins[bin].iter()
            .map(|&slot| slot as usize)
            .find(|&slot| self.slots[slot].tile_index == tile_index)?;

        self.unlink(slot);
        self.link_head(slot);
        Some(slot)
    }

    /// Make a free slot available, evicting the least recently used
    /// tile when necessary. The returned slot stays on the free list
    /// until [`TileCache::install_head`] claims it, so a failed tile
    /// read leaves the cache unchanged. If the evicted tile had
    /// unwritten changes, they are returned for serialization.
    pub fn acquire_slot(&mut self) -> (usize, Option<Evicted>) {
        let mut evicted = None;

        if self.free_head.is_none() {
            let tail = self.tail.expect("cache has at least two slots");

            self.unlink(tail);
            let bin = self.bin_of(self.slots[tail].tile_index);
            remove_from_bin(&mut self.bins[bin], tail);

            let slot = &mut self.slots[tail];
            if slot.dirty {
                evicted = Some(Evicted {
                    tile_index: slot.tile_index,
                    tile_row: slot.tile_row,
                    tile_col: slot.tile_col,
                    data: std::mem::take(&mut slot.data),
                });
            }

            slot.tile_index = NO_TILE;
            slot.dirty = false;
            slot.data = Vec::new();
            self.push_free(tail);
        }

        (self.free_head.expect("a slot was just freed"), evicted)
    }

    /// Claim the head of the free list for a freshly loaded tile,
    /// link it to the LRU head and index it in the hash.
    pub fn install_head(&mut self, tile_index: i32, tile_row: usize, tile_col: usize, data: Vec<u8>, dirty: bool) -> usize {
        let slot = self.pop_free().expect("acquire_slot must run first");

        {
            let entry = &mut self.slots[slot];
            entry.tile_index = tile_index;
            entry.tile_row = tile_row;
            entry.tile_col = tile_col;
            entry.data = data;
            entry.dirty = dirty;
        }

        let bin = self.bin_of(tile_index);
        self.bins[bin].push(slot as u32);

        self.link_head(slot);
        slot
    }

    /// The buffer of a linked slot.
    pub fn tile(&self, slot: usize) -> &[u8] {
        &self.slots[slot].data
    }

    /// The buffer of a linked slot, marking the tile as modified.
    pub fn tile_mut(&mut self, slot: usize) -> &mut [u8] {
        let entry = &mut self.slots[slot];
        entry.dirty = true;
        &mut entry.data
    }

    /// Take every modified tile out of the cache for serialization,
    /// in least recently used order. The slots stay linked but clean,
    /// so this is the final act before dropping or rebuilding the cache.
    pub fn drain_dirty(&mut self) -> Vec<Evicted> {
        let mut drained = Vec::new();
        let mut cursor = self.tail;

        while let Some(index) = cursor {
            let slot = &mut self.slots[index];
            cursor = slot.prev;

            if slot.dirty {
                slot.dirty = false;
                drained.push(Evicted {
                    tile_index: slot.tile_index,
                    tile_row: slot.tile_row,
                    tile_col: slot.tile_col,
                    data: std::mem::take(&mut slot.data),
                });
            }
        }

        drained
    }

    fn bin_of(&self, tile_index: i32) -> usize {
        let hash = (tile_index as u32).wrapping_mul(KNUTH_MULTIPLIER);
        (hash & (self.bins.len() as u32 - 1)) as usize
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);

        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }

        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }

        self.slots[slot].prev = None;
        self.slots[slot].next = None;

        self.first_tile_index = match self.head {
            Some(head) => self.slots[head].tile_index,
            None => NO_TILE,
        };
    }

    fn link_head(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.head;

        match self.head {
            Some(head) => self.slots[head].prev = Some(slot),
            None => self.tail = Some(slot),
        }

        self.head = Some(slot);
        self.first_tile_index = self.slots[slot].tile_index;
    }

    fn push_free(&mut self, slot: usize) {
        self.slots[slot].next = self.free_head;
        self.free_head = Some(slot);
    }

    fn pop_free(&mut self) -> Option<usize> {
        let slot = self.free_head?;
        self.free_head = self.slots[slot].next;
        self.slots[slot].next = None;
        Some(slot)
    }
}


fn remove_from_bin(bin: &mut SmallVec<[u32; 4]>, slot: usize) {
    if let Some(position) = bin.iter().position(|&entry| entry as usize == slot) {
        bin.swap_remove(position);
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    /// Fetch-or-load against an infinite backing store of empty tiles.
    fn fetch(cache: &mut TileCache, tile_index: i32) -> usize {
        if let Some(slot) = cache.lookup(tile_index) {
            return slot;
        }

        let (_, _evicted) = cache.acquire_slot();
        cache.install_head(tile_index, 0, tile_index as usize, vec![ tile_index as u8 ], false)
    }

    /// The structural invariants that must hold after every operation.
    fn check_invariants(cache: &TileCache) {
        let mut linked = HashSet::new();
        let mut cursor = cache.head;
        let mut previous = None;

        while let Some(index) = cursor {
            let slot = &cache.slots[index];
            assert_eq!(slot.prev, previous, "backward link mismatch");
            assert_ne!(slot.tile_index, NO_TILE, "linked slot without a tile");

            let bin = &cache.bins[cache.bin_of(slot.tile_index)];
            assert!(bin.iter().any(|&entry| entry as usize == index), "linked slot missing from hash");

            linked.insert(index);
            previous = cursor;
            cursor = slot.next;
        }

        assert_eq!(cache.tail, previous);

        let mut free = HashSet::new();
        let mut cursor = cache.free_head;
        while let Some(index) = cursor {
            assert_eq!(cache.slots[index].tile_index, NO_TILE, "free slot holding a tile");
            free.insert(index);
            cursor = cache.slots[index].next;
        }

        assert!(linked.is_disjoint(&free));
        assert_eq!(linked.len() + free.len(), cache.slot_count());

        let expected_first = cache.head
            .map(|head| cache.slots[head].tile_index)
            .unwrap_or(NO_TILE);
        assert_eq!(cache.first_tile_index, expected_first);

        let hashed: usize = cache.bins.iter().map(|bin| bin.len()).sum();
        assert_eq!(hashed, linked.len(), "hash entry count mismatch");
    }

    fn cached_tiles(cache: &TileCache) -> HashSet<i32> {
        let mut tiles = HashSet::new();
        let mut cursor = cache.head;
        while let Some(index) = cursor {
            tiles.insert(cache.slots[index].tile_index);
            cursor = cache.slots[index].next;
        }
        tiles
    }

    #[test]
    fn repeated_fetches_hit_the_hot_path(){
        let mut cache = TileCache::new(4);

        let slot = fetch(&mut cache, 7);
        assert_eq!(cache.lookup(7), Some(slot));
        assert_eq!(cache.lookup(7), Some(slot));
        assert_eq!(cache.first_tile_index, 7);

        check_invariants(&cache);
    }

    #[test]
    fn least_recently_used_is_evicted(){
        let mut cache = TileCache::new(4);

        for tile in [ 1, 2, 3, 4, 5 ] {
            fetch(&mut cache, tile);
            check_invariants(&cache);
        }

        // tile 1 was the oldest when 5 arrived
        assert_eq!(cached_tiles(&cache), [ 2, 3, 4, 5 ].iter().copied().collect());

        // promoting 2, then fetching one more, evicts 3 instead
        fetch(&mut cache, 2);
        fetch(&mut cache, 6);
        check_invariants(&cache);
        assert_eq!(cached_tiles(&cache), [ 2, 4, 5, 6 ].iter().copied().collect());
    }

    #[test]
    fn spec_eviction_scenario(){
        // cache of four: access 1,2,3,4,5 then 1 again
        let mut cache = TileCache::new(4);

        for tile in [ 1, 2, 3, 4, 5, 1 ] {
            fetch(&mut cache, tile);
        }

        // 5 evicted 1; refetching 1 evicted 2
        assert_eq!(cached_tiles(&cache), [ 1, 3, 4, 5 ].iter().copied().collect());
        check_invariants(&cache);
    }

    #[test]
    fn dirty_tiles_surface_on_eviction(){
        let mut cache = TileCache::new(2);

        let (_, none) = cache.acquire_slot();
        assert!(none.is_none());
        let slot = cache.install_head(10, 1, 2, vec![ 1, 2, 3 ], false);
        cache.tile_mut(slot)[0] = 99;

        fetch(&mut cache, 11);

        // filling the second slot must not evict; the third tile does
        let (_, evicted) = cache.acquire_slot();
        let evicted = evicted.expect("tile 10 was modified");
        assert_eq!(evicted.tile_index, 10);
        assert_eq!((evicted.tile_row, evicted.tile_col), (1, 2));
        assert_eq!(evicted.data, vec![ 99, 2, 3 ]);

        cache.install_head(12, 0, 0, vec![], false);
        check_invariants(&cache);
    }

    #[test]
    fn abandoned_acquisition_leaves_cache_unchanged(){
        let mut cache = TileCache::new(2);
        fetch(&mut cache, 1);
        fetch(&mut cache, 2);

        // a failed read claims no slot: acquire, then never install
        let (_, evicted) = cache.acquire_slot();
        assert!(evicted.is_none() || evicted.unwrap().data.is_empty());
        check_invariants(&cache);

        // the evicted tile is gone, but the cache is structurally sound
        assert_eq!(cached_tiles(&cache).len(), 1);
    }

    #[test]
    fn drain_collects_only_dirty_tiles(){
        let mut cache = TileCache::new(8);

        for tile in 0 .. 6 {
            fetch(&mut cache, tile);
        }

        for tile in [ 1, 4 ] {
            let slot = cache.lookup(tile).unwrap();
            cache.tile_mut(slot);
        }

        let drained = cache.drain_dirty();
        let mut indices: Vec<i32> = drained.iter().map(|tile| tile.tile_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![ 1, 4 ]);

        assert!(cache.drain_dirty().is_empty());
    }

    #[test]
    fn many_tiles_share_bins_without_collisions(){
        let mut cache = TileCache::new(300);

        // more distinct tiles than bins forces chains longer than one
        for tile in 0 .. 900 {
            fetch(&mut cache, tile);
        }

        check_invariants(&cache);
        assert_eq!(cached_tiles(&cache).len(), 300);

        for tile in 600 .. 900 {
            assert!(cache.lookup(tile).is_some(), "tile {} missing", tile);
        }
    }
}
