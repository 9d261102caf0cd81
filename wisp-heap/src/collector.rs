//! Cheney-style copying collection over the young zone.

use crate::{NewZone, Pointer, HEADER_SIZE};

use wisp_types::{Address, UNALLOCATED};

/// Object-model callback enumerating the reference slots of a payload.
///
/// The collector rewrites the visited cells in place, so every slot
/// must be handed over as `&mut Address`; a cell holding
/// [`UNALLOCATED`] is skipped.
pub trait Trace {
    /// Visit every heap-reference slot inside the object whose payload
    /// begins at `object`.
    fn trace(&self, object: Address, vis: &mut dyn FnMut(&mut Address));
}

/// Provider of the root set: every off-heap cell that may hold a heap
/// reference. Cells are rewritten in place as their referents move.
pub trait Roots {
    /// Visit every root cell.
    fn visit_roots(&mut self, vis: &mut dyn FnMut(&mut Address));
}

/// One stop-the-world copying cycle over a [`NewZone`].
///
/// ```text
/// collect() =
///   swap(fromspace, tospace)
///   scan = next = fromspace
///   for each root cell: *cell = evacuate(*cell)
///   while scan < next:
///     for each reference r in object(scan): r = evacuate(r)
///     scan += object(scan).total_size
/// ```
///
/// After the cycle every reachable object occupies
/// `[fromspace, next)`, every root and interior reference has been
/// rewritten, and the tospace holds only dead storage.
#[derive(Debug)]
pub struct Collector<'a> {
    zone: &'a mut NewZone,
    scan: Address,
    next: Address,
}

impl<'a> Collector<'a> {
    /// Run one minor collection.
    pub fn collect(zone: &'a mut NewZone, roots: &mut dyn Roots, trace: &dyn Trace) {
        tracing::debug!(
            allocated = zone.allocated_bytes(),
            occupancy = %zone.allocation_percent(),
            "minor collection starting"
        );

        zone.swap_spaces();
        let fromspace = zone.fromspace();
        let mut collector = Collector {
            zone,
            scan: fromspace,
            next: fromspace,
        };

        collector.process_roots(roots);
        collector.process_fromspace(trace);

        let next = collector.next;
        let zone = collector.zone;
        zone.set_current(next);

        tracing::debug!(
            allocated = zone.allocated_bytes(),
            occupancy = %zone.allocation_percent(),
            "minor collection finished"
        );
    }

    fn process_roots(&mut self, roots: &mut dyn Roots) {
        roots.visit_roots(&mut |cell| self.forward_cell(cell, true));
    }

    fn process_fromspace(&mut self, trace: &dyn Trace) {
        while self.scan < self.next {
            // Safety: evacuated objects are laid out back to back from
            // the fromspace base up to the copy pointer.
            let ptr = unsafe { Pointer::at(self.scan) };
            let total = ptr.total_size();
            trace.trace(ptr.object_address(), &mut |cell| {
                self.forward_cell(cell, false)
            });
            self.scan += total;
        }
    }

    /// Evacuate the referent of `cell` and rewrite the cell. Objects
    /// outside the young zone (old generation or process-wide) stay
    /// put.
    fn forward_cell(&mut self, cell: &mut Address, remember: bool) {
        if *cell == UNALLOCATED {
            return;
        }
        if !self.zone.contains(*cell) {
            return;
        }
        // Safety: `*cell` is a payload address inside the zone.
        let src = unsafe { Pointer::from_object_address(*cell) };
        if src.is_forwarding() {
            *cell = src.forwarding_address() + HEADER_SIZE;
            return;
        }

        let total = src.total_size();
        if self.next + total > self.zone.fromspace() + self.zone.semi_size() {
            // both semispaces hold a full copy of the live set at this
            // point, so this cannot happen for any consistent heap
            panic!("collector invariant violated: live set exceeds semispace");
        }

        // Safety: destination range was reserved from the new
        // fromspace above and is disjoint from the source semispace.
        let dst = unsafe { Pointer::copy(self.next, src) };
        self.next += total;
        if remember {
            dst.tag_mut().set_remembered(true);
        }
        src.set_forwarding_address(dst.starting_address());
        *cell = dst.object_address();
    }
}
