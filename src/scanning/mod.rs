//! Moving root slots from the VM to the collector in buffers.
//!
//! The VM side visits slots with one of the closures in [`roots_closure`]. Those fill
//! buffers obtained through an [`EdgesClosure`]. On the collector side an
//! [`EdgeReporter`] turns each filled buffer into a root work packet and hands out the
//! next buffer. Buffers are `Vec`s allocated by the reporter; ownership moves across the
//! boundary as a raw `(ptr, length, capacity)` triple.

mod roots_closure;

pub use self::roots_closure::{CollectRootObjects, RootsClosure, ScanObjectClosure};

use std::mem::ManuallyDrop;

use libc::c_void;

use crate::util::{Address, ObjectReference};
use crate::vm::{EdgesClosure, NewBuffer, RootsWorkFactory, TaggedEdge};

/// A roots work factory together with the size of the buffers it hands out.
pub struct EdgeReporter<F: RootsWorkFactory<TaggedEdge>> {
    pub factory: F,
    pub capacity: usize,
}

impl<F: RootsWorkFactory<TaggedEdge>> EdgeReporter<F> {
    pub fn new(factory: F, capacity: usize) -> Self {
        assert!(capacity > 0, "Edge buffers must hold at least one slot");
        Self { factory, capacity }
    }

    fn renew_buffer(&self) -> NewBuffer {
        let mut fresh = ManuallyDrop::new(Vec::<Address>::with_capacity(self.capacity));
        NewBuffer {
            ptr: fresh.as_mut_ptr(),
            capacity: fresh.capacity(),
        }
    }
}

extern "C" fn report_edges_and_renew_buffer<F: RootsWorkFactory<TaggedEdge>>(
    ptr: *mut Address,
    length: usize,
    capacity: usize,
    data: *mut c_void,
) -> NewBuffer {
    let reporter = unsafe { &mut *(data as *mut EdgeReporter<F>) };
    if !ptr.is_null() {
        let edges = unsafe { Vec::<TaggedEdge>::from_raw_parts(ptr as *mut TaggedEdge, length, capacity) };
        trace!("Reporting {} root edges", edges.len());
        reporter.factory.create_process_edge_roots_work(edges);
    }
    reporter.renew_buffer()
}

extern "C" fn report_nodes_and_renew_buffer<F: RootsWorkFactory<TaggedEdge>>(
    ptr: *mut Address,
    length: usize,
    capacity: usize,
    data: *mut c_void,
) -> NewBuffer {
    let reporter = unsafe { &mut *(data as *mut EdgeReporter<F>) };
    if !ptr.is_null() {
        let nodes = unsafe {
            Vec::<ObjectReference>::from_raw_parts(ptr as *mut ObjectReference, length, capacity)
        };
        trace!("Reporting {} root nodes", nodes.len());
        reporter.factory.create_process_node_roots_work(nodes);
    }
    reporter.renew_buffer()
}

/// A closure whose buffers become edge root packets. `reporter` must outlive every use of
/// the closure.
pub fn to_edges_closure<F: RootsWorkFactory<TaggedEdge>>(
    reporter: &mut EdgeReporter<F>,
) -> EdgesClosure {
    EdgesClosure {
        func: report_edges_and_renew_buffer::<F>,
        data: reporter as *mut EdgeReporter<F> as *mut c_void,
    }
}

/// A closure whose buffers become node root packets.
pub fn to_nodes_closure<F: RootsWorkFactory<TaggedEdge>>(
    reporter: &mut EdgeReporter<F>,
) -> EdgesClosure {
    EdgesClosure {
        func: report_nodes_and_renew_buffer::<F>,
        data: reporter as *mut EdgeReporter<F> as *mut c_void,
    }
}

/// Free a buffer handed out by an [`EdgeReporter`].
///
/// # Safety
/// `ptr` and `capacity` must come from the same [`NewBuffer`], which must not be used
/// afterwards. At most `length` words may have been written.
pub unsafe fn release_buffer(ptr: *mut Address, length: usize, capacity: usize) {
    drop(Vec::<Address>::from_raw_parts(ptr, length, capacity));
}
