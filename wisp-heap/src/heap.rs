//! Size-dispatched allocation over the two zones.

use crate::{Collector, NewZone, OldZone, Roots, Trace};

use wisp_types::{Address, KB, MB, UNALLOCATED};

/// Zone sizing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Total size of the young zone (both semispaces).
    pub new_zone_size: usize,
    /// Size of the old zone.
    pub old_zone_size: usize,
    /// Objects of at least this many payload bytes go straight to the
    /// old zone.
    pub large_object_size: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            new_zone_size: 4 * MB,
            old_zone_size: 4 * MB,
            large_object_size: 4 * KB,
        }
    }
}

/// The process heap: a young semispace zone for small objects and an
/// old free-list zone for large ones.
#[derive(Debug)]
pub struct Heap {
    new_zone: NewZone,
    old_zone: OldZone,
    large_object_size: usize,
}

impl Heap {
    /// Build a heap from `config`.
    pub fn new(config: HeapConfig) -> Self {
        Self {
            new_zone: NewZone::new(config.new_zone_size),
            old_zone: OldZone::new(config.old_zone_size),
            large_object_size: config.large_object_size,
        }
    }

    /// The young zone.
    pub fn new_zone(&self) -> &NewZone {
        &self.new_zone
    }

    /// Mutable access to the young zone.
    pub fn new_zone_mut(&mut self) -> &mut NewZone {
        &mut self.new_zone
    }

    /// The old zone.
    pub fn old_zone(&self) -> &OldZone {
        &self.old_zone
    }

    /// Whether `address` lies inside either zone.
    pub fn contains(&self, address: Address) -> bool {
        self.new_zone.contains(address) || self.old_zone.contains(address)
    }

    /// The large-object threshold in payload bytes.
    pub fn large_object_size(&self) -> usize {
        self.large_object_size
    }

    /// Allocate `size` payload bytes without triggering a collection;
    /// [`UNALLOCATED`] when the young zone is exhausted.
    ///
    /// # Panics
    /// When a large object does not fit the old zone: the old zone is
    /// only reclaimed by a major collection, which is not implemented.
    pub fn try_allocate(&mut self, size: usize) -> Address {
        if size >= self.large_object_size {
            let address = self.old_zone.try_allocate(size);
            if address == UNALLOCATED {
                panic!(
                    "out of memory: {size} byte large object does not fit the old zone \
                     and major collection is not implemented"
                );
            }
            return address;
        }
        self.new_zone.try_allocate(size)
    }

    /// Allocate `size` payload bytes, running one minor collection and
    /// retrying when the young zone is exhausted.
    ///
    /// # Panics
    /// When the allocation still fails after the collection.
    pub fn allocate(&mut self, roots: &mut dyn Roots, trace: &dyn Trace, size: usize) -> Address {
        let address = self.try_allocate(size);
        if address != UNALLOCATED {
            return address;
        }

        Collector::collect(&mut self.new_zone, roots, trace);

        let address = self.try_allocate(size);
        if address == UNALLOCATED {
            panic!("out of memory: {size} bytes do not fit the young zone after a minor collection");
        }
        address
    }
}
