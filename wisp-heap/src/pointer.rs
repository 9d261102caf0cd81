//! The in-memory header sitting immediately before every payload.

use crate::Tag;

use static_assertions::const_assert_eq;
use wisp_types::{Address, Word, UNALLOCATED, WORD_SIZE};

/// Size of the [`Pointer`] header in bytes.
pub const HEADER_SIZE: usize = core::mem::size_of::<Pointer>();

const_assert_eq!(HEADER_SIZE, 2 * WORD_SIZE);

/// Logical header of a heap object.
///
/// `start = &header`, `payload = start + HEADER_SIZE`,
/// `total = HEADER_SIZE + tag.size()`. All heap traversal works in
/// header terms; payloads are reached through the fixed offset. While
/// an object is being evacuated the `forwarding` slot holds the header
/// address of the copy and the original storage is otherwise dead.
#[derive(Debug)]
#[repr(C)]
pub struct Pointer {
    tag: Tag,
    forwarding: Word,
}

impl Pointer {
    /// View the header at `address`.
    ///
    /// # Safety
    /// `address` must point at a live header inside a zone.
    pub unsafe fn at<'a>(address: Address) -> &'a mut Pointer {
        debug_assert_ne!(address, UNALLOCATED);
        // Safety: caller guarantees a header lives at `address`.
        unsafe { &mut *(address as *mut Pointer) }
    }

    /// View the header owning the payload at `address`.
    ///
    /// # Safety
    /// `address` must be the payload address of a live heap object.
    pub unsafe fn from_object_address<'a>(address: Address) -> &'a mut Pointer {
        // Safety: the header sits HEADER_SIZE bytes below every payload.
        unsafe { Pointer::at(address - HEADER_SIZE) }
    }

    /// Install a fresh header at `address` and return it.
    ///
    /// # Safety
    /// `address..address + HEADER_SIZE + tag.size()` must be writable
    /// memory owned by a zone.
    pub unsafe fn new<'a>(address: Address, tag: Tag) -> &'a mut Pointer {
        // Safety: caller guarantees ownership of the range.
        unsafe {
            let ptr = address as *mut Pointer;
            ptr.write(Pointer {
                tag,
                forwarding: UNALLOCATED as Word,
            });
            &mut *ptr
        }
    }

    /// Install a header at `address` with `src`'s tag and copy the
    /// payload verbatim. The caller is responsible for updating the
    /// source's forwarding slot afterwards.
    ///
    /// # Safety
    /// The destination range must be writable zone memory disjoint
    /// from `src`'s storage.
    pub unsafe fn copy<'a>(address: Address, src: &Pointer) -> &'a mut Pointer {
        // Safety: destination ownership per caller; source payload is
        // `object_size` readable bytes by the header invariant.
        unsafe {
            let dst = Pointer::new(address, src.tag());
            core::ptr::copy_nonoverlapping(
                src.object_address() as *const u8,
                dst.object_address() as *mut u8,
                src.object_size(),
            );
            dst
        }
    }

    /// Header address.
    pub fn starting_address(&self) -> Address {
        self as *const Pointer as Address
    }

    /// Payload address.
    pub fn object_address(&self) -> Address {
        self.starting_address() + HEADER_SIZE
    }

    /// Payload size in bytes.
    pub fn object_size(&self) -> usize {
        self.tag.size()
    }

    /// Header plus payload size.
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.object_size()
    }

    /// First address past the payload.
    pub fn ending_address(&self) -> Address {
        self.starting_address() + self.total_size()
    }

    /// The object's tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Mutable access to the tag.
    pub fn tag_mut(&mut self) -> &mut Tag {
        &mut self.tag
    }

    /// Header address of the evacuated copy.
    pub fn forwarding_address(&self) -> Address {
        self.forwarding as Address
    }

    /// Whether this object has been evacuated.
    pub fn is_forwarding(&self) -> bool {
        self.forwarding_address() != UNALLOCATED
    }

    /// Record the header address of the evacuated copy.
    pub fn set_forwarding_address(&mut self, address: Address) {
        self.forwarding = address as Word;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_addressing_is_offset_by_the_header_size() {
        let mut backing = [0u8; 64];
        let base = backing.as_mut_ptr() as Address;
        // Safety: `backing` covers the header and a 16-byte payload.
        let ptr = unsafe { Pointer::new(base, Tag::new_sized(16)) };
        assert_eq!(ptr.starting_address(), base);
        assert_eq!(ptr.object_address(), base + HEADER_SIZE);
        assert_eq!(ptr.total_size(), HEADER_SIZE + 16);
        assert_eq!(ptr.ending_address(), base + HEADER_SIZE + 16);
        assert!(!ptr.is_forwarding());
    }

    #[test]
    fn copy_preserves_tag_and_payload() {
        let mut src_backing = [0u8; 64];
        let mut dst_backing = [0u8; 64];
        let src_base = src_backing.as_mut_ptr() as Address;
        let dst_base = dst_backing.as_mut_ptr() as Address;

        // Safety: both arrays cover header + payload.
        unsafe {
            let src = Pointer::new(src_base, Tag::new_sized(8));
            (src.object_address() as *mut u64).write(0xfeed);

            let dst = Pointer::copy(dst_base, src);
            assert_eq!(dst.tag(), src.tag());
            assert_eq!((dst.object_address() as *const u64).read(), 0xfeed);

            src.set_forwarding_address(dst.starting_address());
            assert!(src.is_forwarding());
            assert_eq!(src.forwarding_address(), dst_base);
        }
    }
}
