use crate::util::{Address, ObjectReference};
use crate::vm::{CompressedOops, EdgesClosure, SlotVisitor, TaggedEdge, TraceSlotFn};

use super::release_buffer;

/// A buffer borrowed from the collector through an [`EdgesClosure`]. Filled buffers go
/// back to the collector and are replaced by fresh ones. On drop the remainder is
/// flushed and the last buffer released.
struct EdgeBuffer {
    closure: EdgesClosure,
    buffer: *mut Address,
    cap: usize,
    cursor: usize,
}

impl EdgeBuffer {
    fn new(closure: EdgesClosure) -> Self {
        let fresh = closure.invoke(std::ptr::null_mut(), 0, 0);
        Self {
            closure,
            buffer: fresh.ptr,
            cap: fresh.capacity,
            cursor: 0,
        }
    }

    #[inline(always)]
    fn push(&mut self, word: Address) {
        debug_assert!(self.cursor < self.cap);
        #[cfg(feature = "extreme_assertions")]
        assert!(!self.buffer.is_null(), "No buffer to report {} into", word);
        unsafe { *self.buffer.add(self.cursor) = word };
        self.cursor += 1;
        if self.cursor >= self.cap {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.cursor > 0 {
            trace!("Flushing {} root words", self.cursor);
            let fresh = self.closure.invoke(self.buffer, self.cursor, self.cap);
            self.buffer = fresh.ptr;
            self.cap = fresh.capacity;
            self.cursor = 0;
        }
    }
}

impl Drop for EdgeBuffer {
    fn drop(&mut self) {
        self.flush();
        if !self.buffer.is_null() {
            unsafe { release_buffer(self.buffer, self.cursor, self.cap) };
        }
    }
}

/// Reports the non-null root slots the VM visits. Under compressed references wide slots
/// carry the tag bit, so the collector can tell them from narrow ones.
pub struct RootsClosure {
    buffer: EdgeBuffer,
    encoding: Option<CompressedOops>,
}

impl RootsClosure {
    pub fn new(closure: EdgesClosure, encoding: Option<CompressedOops>) -> Self {
        Self {
            buffer: EdgeBuffer::new(closure),
            encoding,
        }
    }

    fn report(&mut self, edge: TaggedEdge) {
        if !edge.load_with(self.encoding.as_ref()).is_null() {
            self.buffer.push(edge.raw());
        }
    }
}

fn tag_wide(slot: Address, encoding: Option<&CompressedOops>) -> TaggedEdge {
    assert_eq!(
        slot.as_usize() & TaggedEdge::WIDE_TAG,
        0,
        "Slot {} already has the tag bit set",
        slot
    );
    TaggedEdge::wide(slot, encoding.is_some())
}

impl SlotVisitor for RootsClosure {
    fn visit_slot(&mut self, slot: Address) {
        let edge = tag_wide(slot, self.encoding.as_ref());
        self.report(edge);
    }

    fn visit_narrow_slot(&mut self, slot: Address) {
        self.report(TaggedEdge::narrow(slot));
    }
}

/// Reports the objects non-null root slots point to, rather than the slots. Used for
/// thread roots the collector must not update, such as values held in registers.
pub struct CollectRootObjects {
    buffer: EdgeBuffer,
    encoding: Option<CompressedOops>,
}

impl CollectRootObjects {
    pub fn new(closure: EdgesClosure, encoding: Option<CompressedOops>) -> Self {
        Self {
            buffer: EdgeBuffer::new(closure),
            encoding,
        }
    }

    fn report(&mut self, object: ObjectReference) {
        if !object.is_null() {
            self.buffer.push(object.to_raw_address());
        }
    }
}

impl SlotVisitor for CollectRootObjects {
    fn visit_slot(&mut self, slot: Address) {
        let object = TaggedEdge::wide(slot, false).load_with(None);
        self.report(object);
    }

    fn visit_narrow_slot(&mut self, slot: Address) {
        let object = TaggedEdge::narrow(slot).load_with(self.encoding.as_ref());
        self.report(object);
    }
}

/// Hands every reference slot of one object to the collector's trace function. Slots
/// are tagged like root slots, but neither buffered nor filtered for null.
pub struct ScanObjectClosure {
    trace: TraceSlotFn,
    encoding: Option<CompressedOops>,
}

impl ScanObjectClosure {
    pub fn new(trace: TraceSlotFn, encoding: Option<CompressedOops>) -> Self {
        Self { trace, encoding }
    }
}

impl SlotVisitor for ScanObjectClosure {
    fn visit_slot(&mut self, slot: Address) {
        (self.trace)(tag_wide(slot, self.encoding.as_ref()).raw())
    }

    fn visit_narrow_slot(&mut self, slot: Address) {
        (self.trace)(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanning::{to_edges_closure, to_nodes_closure, EdgeReporter};
    use crate::vm::RootsWorkFactory;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Collect {
        edges: Vec<Vec<TaggedEdge>>,
        nodes: Vec<Vec<ObjectReference>>,
    }

    impl RootsWorkFactory<TaggedEdge> for Collect {
        fn create_process_edge_roots_work(&mut self, edges: Vec<TaggedEdge>) {
            self.edges.push(edges);
        }

        fn create_process_node_roots_work(&mut self, nodes: Vec<ObjectReference>) {
            self.nodes.push(nodes);
        }
    }

    fn objects(n: usize) -> Vec<usize> {
        (1..=n).map(|i| 0x10_0000 + i * 16).collect()
    }

    #[test]
    fn flushes_in_discovery_order() {
        for (n, cap) in [(0usize, 4usize), (3, 4), (4, 4), (9, 4), (10, 1), (7, 7)] {
            let cells = objects(n);
            let mut reporter = EdgeReporter::new(Collect::default(), cap);
            {
                let mut closure = RootsClosure::new(to_edges_closure(&mut reporter), None);
                for cell in &cells {
                    closure.visit_slot(Address::from_ref(cell));
                }
            }
            let batches = &reporter.factory.edges;
            assert_eq!(batches.len(), n.div_ceil(cap), "{} slots, capacity {}", n, cap);
            let reported: Vec<Address> = batches.iter().flatten().map(|e| e.raw()).collect();
            let expected: Vec<Address> = cells.iter().map(Address::from_ref).collect();
            assert_eq!(reported, expected);
            assert!(batches.iter().all(|b| b.len() <= cap));
        }
    }

    #[test]
    fn null_slots_are_skipped() {
        let cells = [0x1000usize, 0, 0x2000, 0];
        let mut reporter = EdgeReporter::new(Collect::default(), 16);
        {
            let mut closure = RootsClosure::new(to_edges_closure(&mut reporter), None);
            for cell in &cells {
                closure.visit_slot(Address::from_ref(cell));
            }
        }
        let reported: Vec<Address> = reporter.factory.edges.concat().iter().map(|e| e.raw()).collect();
        assert_eq!(
            reported,
            vec![Address::from_ref(&cells[0]), Address::from_ref(&cells[2])]
        );
    }

    #[test]
    fn compressed_heap_tags_wide_slots_only() {
        let wide: usize = 0x4000;
        let narrow: u32 = 0x800;
        let mut reporter = EdgeReporter::new(Collect::default(), 16);
        {
            let mut closure = RootsClosure::new(
                to_edges_closure(&mut reporter),
                Some(CompressedOops::UNSCALED),
            );
            closure.visit_slot(Address::from_ref(&wide));
            closure.visit_narrow_slot(Address::from_ref(&narrow));
        }
        let reported = reporter.factory.edges.concat();
        assert_eq!(reported.len(), 2);
        assert!(!reported[0].is_compressed());
        assert_eq!(reported[0].untagged_address(), Address::from_ref(&wide));
        assert!(reported[1].is_compressed());
        assert_eq!(reported[1].raw(), Address::from_ref(&narrow));
    }

    #[test]
    fn root_objects_are_decoded_and_untagged() {
        let oops = CompressedOops {
            base: unsafe { Address::from_usize(0x8_0000_0000) },
            shift: 3,
        };
        let wide: usize = 0x5000;
        let narrow: u32 = 0x10;
        let null: u32 = 0;
        let mut reporter = EdgeReporter::new(Collect::default(), 2);
        {
            let mut closure = CollectRootObjects::new(to_nodes_closure(&mut reporter), Some(oops));
            closure.visit_slot(Address::from_ref(&wide));
            closure.visit_narrow_slot(Address::from_ref(&null));
            closure.visit_narrow_slot(Address::from_ref(&narrow));
        }
        assert!(reporter.factory.edges.is_empty());
        let nodes: Vec<usize> = reporter.factory.nodes.concat().iter().map(|o| o.value()).collect();
        assert_eq!(nodes, vec![0x5000, 0x8_0000_0080]);
        assert_eq!(reporter.factory.nodes.len(), 1);
    }

    lazy_static! {
        static ref TRACED: Mutex<Vec<Address>> = Mutex::new(vec![]);
    }

    extern "C" fn record_slot(slot: Address) {
        TRACED.lock().unwrap().push(slot);
    }

    #[test]
    fn object_scan_reports_every_slot() {
        let null_field: usize = 0;
        let narrow_field: u32 = 0;
        let mut closure = ScanObjectClosure::new(record_slot, Some(CompressedOops::UNSCALED));
        closure.visit_slot(Address::from_ref(&null_field));
        closure.visit_narrow_slot(Address::from_ref(&narrow_field));

        let traced = TRACED.lock().unwrap().clone();
        assert_eq!(
            traced,
            vec![
                TaggedEdge::wide(Address::from_ref(&null_field), true).raw(),
                Address::from_ref(&narrow_field),
            ]
        );
    }
}
