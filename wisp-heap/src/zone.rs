//! The young semispace zone and the old free-list zone.

use crate::{FreeList, MemoryRegion, Pointer, Tag, HEADER_SIZE};

use wisp_types::{align_word, Address, Percent, UNALLOCATED};

/// The young generation: one contiguous region split into two equal
/// semispaces. Allocation bumps through the fromspace; a collection
/// swaps the halves and evacuates the live objects into the new
/// fromspace.
#[derive(Debug)]
pub struct NewZone {
    region: MemoryRegion,
    fromspace: Address,
    tospace: Address,
    semi_size: usize,
    current: Address,
}

impl NewZone {
    /// A young zone of `size` total bytes (two `size / 2` semispaces).
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "new zone size must be a power of two");
        let region = MemoryRegion::new(size);
        let semi_size = size / 2;
        let fromspace = region.starting_address();
        Self {
            region,
            fromspace,
            tospace: fromspace + semi_size,
            semi_size,
            current: fromspace,
        }
    }

    /// Bump-allocate `size` payload bytes; [`UNALLOCATED`] when the
    /// fromspace is exhausted, at which point the caller is expected to
    /// run a minor collection and retry once.
    pub fn try_allocate(&mut self, size: usize) -> Address {
        assert!(size > 0, "cannot allocate an empty object");
        let aligned = align_word(size);
        let total = HEADER_SIZE + aligned;
        if self.current + total > self.fromspace + self.semi_size {
            tracing::warn!(size, occupancy = %self.allocation_percent(), "new zone exhausted");
            return UNALLOCATED;
        }
        let address = self.current;
        self.current += total;
        // Safety: the range was reserved from the fromspace above.
        unsafe {
            core::ptr::write_bytes(address as *mut u8, 0, total);
            Pointer::new(address, Tag::new_sized(aligned)).object_address()
        }
    }

    /// First address of the active fromspace.
    pub fn fromspace(&self) -> Address {
        self.fromspace
    }

    /// First address of the inactive tospace.
    pub fn tospace(&self) -> Address {
        self.tospace
    }

    /// Size of one semispace in bytes.
    pub fn semi_size(&self) -> usize {
        self.semi_size
    }

    /// The bump pointer: first address not yet handed out.
    pub fn current(&self) -> Address {
        self.current
    }

    /// Whether `address` falls inside the zone (either semispace).
    pub fn contains(&self, address: Address) -> bool {
        self.region.contains(address)
    }

    /// Bytes allocated in the active fromspace.
    pub fn allocated_bytes(&self) -> usize {
        self.current - self.fromspace
    }

    /// Bytes still available in the active fromspace.
    pub fn remaining_bytes(&self) -> usize {
        self.semi_size - self.allocated_bytes()
    }

    /// Fromspace occupancy.
    pub fn allocation_percent(&self) -> Percent {
        Percent::new(self.allocated_bytes(), self.semi_size)
    }

    /// Walk every object header in the active fromspace.
    pub fn pointers(&self) -> NewZoneIter<'_> {
        NewZoneIter {
            zone: self,
            current: self.fromspace,
        }
    }

    pub(crate) fn swap_spaces(&mut self) {
        core::mem::swap(&mut self.fromspace, &mut self.tospace);
    }

    pub(crate) fn set_current(&mut self, current: Address) {
        debug_assert!(current >= self.fromspace && current <= self.fromspace + self.semi_size);
        self.current = current;
    }
}

/// Iterator over the object headers of a [`NewZone`] fromspace.
#[derive(Debug)]
pub struct NewZoneIter<'a> {
    zone: &'a NewZone,
    current: Address,
}

impl<'a> Iterator for NewZoneIter<'a> {
    type Item = &'a Pointer;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.zone.current() {
            return None;
        }
        // Safety: fromspace objects are laid out back to back from the
        // fromspace base up to the bump pointer.
        let ptr = unsafe { Pointer::at(self.current) };
        self.current += ptr.total_size();
        Some(ptr)
    }
}

/// The old generation: a free-list region for large objects and the
/// eventual promotion target. Collection of this zone is not
/// implemented; the heap treats exhaustion here as fatal.
#[derive(Debug)]
pub struct OldZone {
    region: MemoryRegion,
    free_list: FreeList,
}

impl OldZone {
    /// An old zone of `size` bytes.
    pub fn new(size: usize) -> Self {
        let region = MemoryRegion::new(size);
        // Safety: the region backs the list for the zone's lifetime.
        let free_list = unsafe { FreeList::new(region.starting_address(), size) };
        Self { region, free_list }
    }

    /// Allocate `size` payload bytes from the free list;
    /// [`UNALLOCATED`] when no chunk fits.
    pub fn try_allocate(&mut self, size: usize) -> Address {
        self.free_list.try_allocate(size)
    }

    /// Whether `address` falls inside the zone.
    pub fn contains(&self, address: Address) -> bool {
        self.region.contains(address)
    }

    /// Bytes sitting on the free list, chunk headers included.
    pub fn free_bytes(&self) -> usize {
        self.free_list.free_bytes()
    }

    /// Bytes handed out.
    pub fn allocated_bytes(&self) -> usize {
        self.region.size() - self.free_bytes()
    }

    /// Zone occupancy.
    pub fn allocation_percent(&self) -> Percent {
        Percent::new(self.allocated_bytes(), self.region.size())
    }

    /// The underlying free list.
    pub fn free_list(&self) -> &FreeList {
        &self.free_list
    }
}
