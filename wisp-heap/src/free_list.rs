//! Free-list allocation for the old zone.

use crate::{Pointer, Tag, HEADER_SIZE};

use wisp_types::{align_word, Address, Word, UNALLOCATED, WORD_SIZE};

/// Header of a free chunk: a [`Tag`] sized like an object header plus
/// the address of the next free chunk, so a chunk can be reinterpreted
/// as an object header in place when it is handed out.
#[derive(Debug)]
#[repr(C)]
pub struct FreePointer {
    tag: Tag,
    next: Word,
}

impl FreePointer {
    /// View the free chunk at `address`.
    ///
    /// # Safety
    /// `address` must point at a chunk previously written by the list.
    pub unsafe fn at<'a>(address: Address) -> &'a mut FreePointer {
        debug_assert_ne!(address, UNALLOCATED);
        // Safety: caller guarantees a chunk header lives at `address`.
        unsafe { &mut *(address as *mut FreePointer) }
    }

    unsafe fn new<'a>(address: Address, size: usize, next: Address) -> &'a mut FreePointer {
        // Safety: caller owns the range.
        unsafe {
            let ptr = address as *mut FreePointer;
            ptr.write(FreePointer {
                tag: Tag::old_sized(size),
                next: next as Word,
            });
            &mut *ptr
        }
    }

    /// Chunk address.
    pub fn starting_address(&self) -> Address {
        self as *const FreePointer as Address
    }

    /// Chunk size including the header.
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.tag.size()
    }

    /// First address past the chunk.
    pub fn ending_address(&self) -> Address {
        self.starting_address() + self.total_size()
    }

    /// Address of the next free chunk; [`UNALLOCATED`] at the tail.
    pub fn next(&self) -> Address {
        self.next as Address
    }
}

/// Address-ordered free list with best-fit allocation, chunk splitting
/// and coalescing of adjacent chunks on free.
#[derive(Debug)]
pub struct FreeList {
    head: Address,
}

impl FreeList {
    /// Minimum chunk worth splitting off: a header plus one word.
    const MIN_SPLIT: usize = HEADER_SIZE + WORD_SIZE;

    /// Build a list owning `start..start + size`.
    ///
    /// # Safety
    /// The range must be writable memory reserved for this list.
    pub unsafe fn new(start: Address, size: usize) -> Self {
        assert!(size > HEADER_SIZE, "free list region too small");
        // Safety: caller hands over the range.
        unsafe {
            FreePointer::new(start, size - HEADER_SIZE, UNALLOCATED);
        }
        Self { head: start }
    }

    /// Best-fit allocation of `size` payload bytes; returns the payload
    /// address or [`UNALLOCATED`] when no chunk fits.
    pub fn try_allocate(&mut self, size: usize) -> Address {
        assert!(size > 0, "cannot allocate an empty object");
        let total = HEADER_SIZE + align_word(size);

        // best fit: smallest chunk that still holds `total`
        let mut best: Option<(Address, Address)> = None; // (prev, chunk)
        let mut prev = UNALLOCATED;
        let mut current = self.head;
        while current != UNALLOCATED {
            // Safety: `current` came from the list.
            let chunk = unsafe { FreePointer::at(current) };
            if chunk.total_size() >= total {
                let better = match best {
                    // Safety: candidate address came from the list.
                    Some((_, candidate)) => unsafe {
                        chunk.total_size() < FreePointer::at(candidate).total_size()
                    },
                    None => true,
                };
                if better {
                    best = Some((prev, current));
                }
            }
            prev = current;
            current = chunk.next();
        }

        let Some((prev, address)) = best else {
            return UNALLOCATED;
        };

        // Safety: `address` is a live chunk found above.
        let chunk = unsafe { FreePointer::at(address) };
        let chunk_total = chunk.total_size();
        let next = chunk.next();

        let (object_size, successor) = if chunk_total - total >= Self::MIN_SPLIT {
            // Safety: the remainder range belongs to the chunk.
            let rest = unsafe {
                FreePointer::new(address + total, chunk_total - total - HEADER_SIZE, next)
            };
            (total - HEADER_SIZE, rest.starting_address())
        } else {
            (chunk_total - HEADER_SIZE, next)
        };

        self.unlink(prev, successor);

        // Safety: the chunk range now belongs to the new object.
        unsafe {
            let ptr = Pointer::new(address, Tag::old_sized(object_size));
            core::ptr::write_bytes(ptr.object_address() as *mut u8, 0, object_size);
            ptr.object_address()
        }
    }

    /// Return the object whose payload starts at `address` to the list,
    /// coalescing with adjacent free chunks.
    ///
    /// # Safety
    /// `address` must be the payload of a live old-zone object handed
    /// out by [`FreeList::try_allocate`], not freed since.
    pub unsafe fn free(&mut self, address: Address) {
        // Safety: per contract, an object header precedes the payload.
        let freed = unsafe { Pointer::from_object_address(address) };
        let start = freed.starting_address();
        let total = freed.total_size();

        // find the address-ordered insertion point
        let mut prev = UNALLOCATED;
        let mut current = self.head;
        while current != UNALLOCATED && current < start {
            // Safety: `current` came from the list.
            let chunk = unsafe { FreePointer::at(current) };
            prev = current;
            current = chunk.next();
        }

        let mut new_start = start;
        let mut new_size = total - HEADER_SIZE;
        let mut next = current;

        // coalesce with the following chunk
        if current != UNALLOCATED && start + total == current {
            // Safety: `current` came from the list.
            let chunk = unsafe { FreePointer::at(current) };
            new_size += chunk.total_size();
            next = chunk.next();
        }

        // coalesce with the preceding chunk
        if prev != UNALLOCATED {
            // Safety: `prev` came from the list.
            let chunk = unsafe { FreePointer::at(prev) };
            if chunk.ending_address() == new_start {
                new_start = prev;
                new_size += HEADER_SIZE + chunk.tag.size();
                // re-find the link pointing at `prev`
                prev = self.predecessor_of(prev);
            }
        }

        // Safety: the coalesced range is entirely free memory.
        unsafe {
            FreePointer::new(new_start, new_size, next);
        }
        self.unlink(prev, new_start);
    }

    /// Walk the free chunks in address order.
    pub fn visit_free_pointers(&self, mut vis: impl FnMut(&FreePointer) -> bool) -> bool {
        let mut current = self.head;
        while current != UNALLOCATED {
            // Safety: `current` came from the list.
            let chunk = unsafe { FreePointer::at(current) };
            if !vis(chunk) {
                return false;
            }
            current = chunk.next();
        }
        true
    }

    /// Total free bytes, headers included.
    pub fn free_bytes(&self) -> usize {
        let mut bytes = 0;
        self.visit_free_pointers(|chunk| {
            bytes += chunk.total_size();
            true
        });
        bytes
    }

    fn predecessor_of(&self, address: Address) -> Address {
        let mut prev = UNALLOCATED;
        let mut current = self.head;
        while current != UNALLOCATED && current != address {
            // Safety: `current` came from the list.
            prev = current;
            current = unsafe { FreePointer::at(current) }.next();
        }
        prev
    }

    fn unlink(&mut self, prev: Address, replacement: Address) {
        if prev == UNALLOCATED {
            self.head = replacement;
        } else {
            // Safety: `prev` came from the list.
            unsafe { FreePointer::at(prev) }.next = replacement as Word;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::MemoryRegion;

    fn fresh_list(size: usize) -> (MemoryRegion, FreeList) {
        let region = MemoryRegion::new(size);
        // Safety: the region backs the list for the test's lifetime.
        let list = unsafe { FreeList::new(region.starting_address(), size) };
        (region, list)
    }

    #[test]
    fn allocation_splits_and_exhausts() {
        let (_region, mut list) = fresh_list(4096);
        let first = list.try_allocate(100);
        assert_ne!(first, UNALLOCATED);
        let second = list.try_allocate(100);
        assert_ne!(second, UNALLOCATED);
        assert!(second > first);

        assert_eq!(list.try_allocate(1 << 20), UNALLOCATED);
    }

    #[test]
    fn best_fit_prefers_the_tightest_chunk() {
        let (_region, mut list) = fresh_list(8192);
        let small = list.try_allocate(64);
        let _keep = list.try_allocate(64);
        let large = list.try_allocate(1024);
        let _keep2 = list.try_allocate(64);
        // Safety: both came from try_allocate above.
        unsafe {
            list.free(small);
            list.free(large);
        }

        // a 64-byte request lands in the freed 64-byte hole, not the
        // 1024-byte one
        let reused = list.try_allocate(64);
        assert_eq!(reused, small);
    }

    #[test]
    fn freeing_adjacent_objects_coalesces() {
        let (_region, mut list) = fresh_list(4096);
        let a = list.try_allocate(64);
        let b = list.try_allocate(64);
        let c = list.try_allocate(64);
        assert_ne!(c, UNALLOCATED);

        // Safety: all came from try_allocate above.
        unsafe {
            list.free(a);
            list.free(b);
            list.free(c);
        }

        let mut chunks = 0;
        list.visit_free_pointers(|_| {
            chunks += 1;
            true
        });
        assert_eq!(chunks, 1, "adjacent frees collapse into one chunk");

        // the coalesced region services an allocation bigger than any
        // single freed object
        assert_ne!(list.try_allocate(150), UNALLOCATED);
    }

    #[test]
    fn free_bytes_is_conserved() {
        let (_region, mut list) = fresh_list(4096);
        let before = list.free_bytes();
        let a = list.try_allocate(256);
        assert!(list.free_bytes() < before);
        // Safety: `a` came from try_allocate above.
        unsafe { list.free(a) };
        assert_eq!(list.free_bytes(), before);
    }
}
