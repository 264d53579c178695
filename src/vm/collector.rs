//! The collector core, as seen from the mutator side. Everything the runtime needs from the
//! collector goes through [`Collector`]. [`NativeCollector`] implements it over the table
//! of C functions the collector module exports.

use std::ptr::NonNull;

use crate::plan::Mutator;
use crate::util::alloc::{AllocationSemantics, AllocatorSelector};
use crate::util::{Address, ObjectReference, VMMutatorThread};

/// Sizes of the allocator records the collector was compiled with.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocatorSizes {
    pub immix_allocator: usize,
    pub free_list_allocator: usize,
}

/// Downcalls into the collector core.
pub trait Collector: Send + Sync {
    /// Create the collector-side state of a new mutator. The returned record is owned by
    /// the collector until it is handed back with [`Collector::release_mutator`].
    fn bind_mutator(&self, tls: VMMutatorThread) -> NonNull<Mutator>;

    /// Give a bound mutator record back to the collector.
    fn release_mutator(&self, mutator: NonNull<Mutator>);

    fn is_gc_initialized(&self) -> bool;

    /// Slow-path allocation. Returns zero on out-of-memory. May block for a collection.
    fn alloc(
        &self,
        mutator: &mut Mutator,
        size: usize,
        align: usize,
        offset: usize,
        semantics: AllocationSemantics,
    ) -> Address;

    fn post_alloc(
        &self,
        mutator: &mut Mutator,
        object: ObjectReference,
        size: usize,
        semantics: AllocationSemantics,
    );

    fn flush_mutator(&self, mutator: &mut Mutator);

    fn destroy_mutator(&self, mutator: &mut Mutator);

    fn array_copy_pre(&self, mutator: &mut Mutator, src: Address, dst: Address, count: usize);

    /// Write barrier slow path, called after the metadata check found the slot unlogged.
    fn object_reference_write_slow_call(
        &self,
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    );

    /// Pre-write barrier entry, called without a metadata check.
    fn object_reference_write_pre_call(
        &self,
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    );

    fn load_reference_call(&self, value: ObjectReference);

    fn object_reference_array_copy_pre_call(&self, src: Address, dst: Address, count: usize);

    fn object_reference_clone_pre_call(&self, dst: ObjectReference);

    fn is_live(&self, object: ObjectReference) -> bool;

    fn report_gc_start(&self);

    fn allocator_sizes(&self) -> AllocatorSizes;

    /// Requests of this size or larger go to the large object space.
    fn max_non_los_default_alloc_bytes(&self) -> usize;

    /// The allocator that serves [`AllocationSemantics::Default`].
    fn default_allocator_selector(&self) -> AllocatorSelector;

    /// Biased base of the unlog-bit side table for the given slot width.
    fn side_metadata_base(&self, compressed: bool) -> Address;

    /// The reserved heap range, `[start, end)`.
    fn heap_range(&self) -> (Address, Address);
}

/// The functions a native collector module exports, in the order the module fills them in.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Downcalls {
    pub bind_mutator: extern "C" fn(tls: VMMutatorThread) -> *mut Mutator,
    pub release_mutator: extern "C" fn(mutator: *mut Mutator),
    pub is_gc_initialized: extern "C" fn() -> bool,
    pub alloc: extern "C" fn(
        mutator: *mut Mutator,
        size: usize,
        align: usize,
        offset: usize,
        semantics: AllocationSemantics,
    ) -> Address,
    pub post_alloc: extern "C" fn(
        mutator: *mut Mutator,
        object: ObjectReference,
        size: usize,
        semantics: AllocationSemantics,
    ),
    pub flush_mutator: extern "C" fn(mutator: *mut Mutator),
    pub destroy_mutator: extern "C" fn(mutator: *mut Mutator),
    pub array_copy_pre:
        extern "C" fn(mutator: *mut Mutator, src: Address, dst: Address, count: usize),
    pub object_reference_write_slow_call:
        extern "C" fn(src: ObjectReference, slot: Address, target: ObjectReference),
    pub object_reference_write_pre_call:
        extern "C" fn(src: ObjectReference, slot: Address, target: ObjectReference),
    pub load_reference_call: extern "C" fn(value: ObjectReference),
    pub object_reference_array_copy_pre_call:
        extern "C" fn(src: Address, dst: Address, count: usize),
    pub object_reference_clone_pre_call: extern "C" fn(dst: ObjectReference),
    pub is_live: extern "C" fn(object: ObjectReference) -> bool,
    pub report_gc_start: extern "C" fn(),
    pub allocator_sizes: extern "C" fn() -> AllocatorSizes,
    pub max_non_los_default_alloc_bytes: extern "C" fn() -> usize,
    pub default_allocator_selector: extern "C" fn() -> AllocatorSelector,
    pub side_metadata_base: extern "C" fn(compressed: bool) -> Address,
    pub heap_start: extern "C" fn() -> Address,
    pub heap_end: extern "C" fn() -> Address,
}

/// A [`Collector`] backed by a native collector module.
pub struct NativeCollector {
    calls: Downcalls,
}

impl NativeCollector {
    pub fn new(calls: Downcalls) -> Self {
        Self { calls }
    }
}

impl Collector for NativeCollector {
    fn bind_mutator(&self, tls: VMMutatorThread) -> NonNull<Mutator> {
        match NonNull::new((self.calls.bind_mutator)(tls)) {
            Some(mutator) => mutator,
            None => panic!("The collector failed to bind a mutator for {:?}", tls),
        }
    }

    fn release_mutator(&self, mutator: NonNull<Mutator>) {
        (self.calls.release_mutator)(mutator.as_ptr())
    }

    fn is_gc_initialized(&self) -> bool {
        (self.calls.is_gc_initialized)()
    }

    fn alloc(
        &self,
        mutator: &mut Mutator,
        size: usize,
        align: usize,
        offset: usize,
        semantics: AllocationSemantics,
    ) -> Address {
        (self.calls.alloc)(mutator, size, align, offset, semantics)
    }

    fn post_alloc(
        &self,
        mutator: &mut Mutator,
        object: ObjectReference,
        size: usize,
        semantics: AllocationSemantics,
    ) {
        (self.calls.post_alloc)(mutator, object, size, semantics)
    }

    fn flush_mutator(&self, mutator: &mut Mutator) {
        (self.calls.flush_mutator)(mutator)
    }

    fn destroy_mutator(&self, mutator: &mut Mutator) {
        (self.calls.destroy_mutator)(mutator)
    }

    fn array_copy_pre(&self, mutator: &mut Mutator, src: Address, dst: Address, count: usize) {
        (self.calls.array_copy_pre)(mutator, src, dst, count)
    }

    fn object_reference_write_slow_call(
        &self,
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    ) {
        (self.calls.object_reference_write_slow_call)(src, slot, target)
    }

    fn object_reference_write_pre_call(
        &self,
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    ) {
        (self.calls.object_reference_write_pre_call)(src, slot, target)
    }

    fn load_reference_call(&self, value: ObjectReference) {
        (self.calls.load_reference_call)(value)
    }

    fn object_reference_array_copy_pre_call(&self, src: Address, dst: Address, count: usize) {
        (self.calls.object_reference_array_copy_pre_call)(src, dst, count)
    }

    fn object_reference_clone_pre_call(&self, dst: ObjectReference) {
        (self.calls.object_reference_clone_pre_call)(dst)
    }

    fn is_live(&self, object: ObjectReference) -> bool {
        (self.calls.is_live)(object)
    }

    fn report_gc_start(&self) {
        (self.calls.report_gc_start)()
    }

    fn allocator_sizes(&self) -> AllocatorSizes {
        (self.calls.allocator_sizes)()
    }

    fn max_non_los_default_alloc_bytes(&self) -> usize {
        (self.calls.max_non_los_default_alloc_bytes)()
    }

    fn default_allocator_selector(&self) -> AllocatorSelector {
        (self.calls.default_allocator_selector)()
    }

    fn side_metadata_base(&self, compressed: bool) -> Address {
        (self.calls.side_metadata_base)(compressed)
    }

    fn heap_range(&self) -> (Address, Address) {
        ((self.calls.heap_start)(), (self.calls.heap_end)())
    }
}
