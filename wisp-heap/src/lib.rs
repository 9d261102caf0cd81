//! The Wisp heap: a two-generation object store with a moving young
//! generation.
//!
//! Every heap object is preceded by a fixed [`Pointer`] header carrying
//! a [`Tag`] (size, generation bits, mark and remembered bits) and a
//! forwarding slot used while the object is being evacuated. The young
//! generation ([`NewZone`]) is a semispace pair collected by the Cheney
//! [`Collector`]; the old generation ([`OldZone`]) is a free-list region
//! for large objects and is never collected; attempting to do so is a
//! fatal error.
//!
//! The collector knows nothing about object layout: the mutator hands it
//! a [`Trace`] implementation that enumerates the reference slots inside
//! a payload, and a [`Roots`] provider exposing every off-heap cell that
//! may hold a heap reference. All cells hold *payload* addresses; the
//! header sits [`HEADER_SIZE`] bytes below.

#![warn(missing_docs)]

mod collector;
mod free_list;
mod heap;
mod pointer;
mod region;
mod tag;
mod zone;

pub use collector::{Collector, Roots, Trace};
pub use free_list::{FreeList, FreePointer};
pub use heap::{Heap, HeapConfig};
pub use pointer::{Pointer, HEADER_SIZE};
pub use region::MemoryRegion;
pub use tag::{RawTag, Tag};
pub use zone::{NewZone, NewZoneIter, OldZone};
