//! A [`Collector`] built from mocked methods. It hands out heap-allocated mutator records,
//! answers allocations with a fixed address and records every barrier entry it receives.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytemuck::Zeroable;

use super::mock_method::MockMethod;
use crate::abi;
use crate::barrier::SlowPathCall;
use crate::plan::Mutator;
use crate::util::alloc::{AllocationSemantics, AllocatorSelector};
use crate::util::{Address, ObjectReference, VMMutatorThread};
use crate::vm::{AllocatorSizes, Collector};

pub struct MockCollector {
    pub alloc: MockMethod<(usize, AllocationSemantics), ()>,
    pub post_alloc: MockMethod<(ObjectReference, usize), ()>,
    pub flush_mutator: MockMethod<(), ()>,
    pub destroy_mutator: MockMethod<(), ()>,
    pub report_gc_start: MockMethod<(), ()>,
    fail_allocation: AtomicBool,
    last_alloc_semantics: Mutex<Option<AllocationSemantics>>,
    released: Mutex<Vec<Mutator>>,
    released_at: Mutex<Vec<usize>>,
    calls: Mutex<Vec<SlowPathCall>>,
    mutator_array_copies: AtomicUsize,
    live: Mutex<HashSet<ObjectReference>>,
    pub max_non_los: usize,
    pub selector: AllocatorSelector,
    pub sizes: AllocatorSizes,
    pub metadata_base: Address,
}

impl Default for MockCollector {
    fn default() -> Self {
        Self {
            alloc: MockMethod::new_default(),
            post_alloc: MockMethod::new_default(),
            flush_mutator: MockMethod::new_default(),
            destroy_mutator: MockMethod::new_default(),
            report_gc_start: MockMethod::new_default(),
            fail_allocation: AtomicBool::new(false),
            last_alloc_semantics: Mutex::new(None),
            released: Mutex::new(vec![]),
            released_at: Mutex::new(vec![]),
            calls: Mutex::new(vec![]),
            mutator_array_copies: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
            max_non_los: 8192,
            selector: AllocatorSelector::BumpPointer(0),
            sizes: abi::local_allocator_sizes(),
            metadata_base: Address::ZERO,
        }
    }
}

impl MockCollector {
    /// What every successful slow-path allocation returns.
    pub const SLOW_PATH_RESULT: Address = unsafe { Address::from_usize(0xdead_0000) };

    pub fn fail_allocation(&self, fail: bool) {
        self.fail_allocation.store(fail, Ordering::SeqCst);
    }

    pub fn last_alloc_semantics(&self) -> Option<AllocationSemantics> {
        *self.last_alloc_semantics.lock().unwrap()
    }

    /// Addresses of the records given back through `release_mutator`, in order.
    pub fn released_mutators(&self) -> Vec<usize> {
        self.released_at.lock().unwrap().clone()
    }

    /// The default bump cursor of the last released record, as it was at release.
    pub fn last_released_cursor(&self) -> Option<Address> {
        self.released
            .lock()
            .unwrap()
            .last()
            .map(|m| m.allocators.bump_pointer[0].bump_pointer.cursor)
    }

    /// Barrier entries received so far.
    pub fn calls(&self) -> Vec<SlowPathCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Array-copy barriers that came through the mutator-aware entry.
    pub fn mutator_array_copies(&self) -> usize {
        self.mutator_array_copies.load(Ordering::SeqCst)
    }

    pub fn set_live(&self, object: ObjectReference) {
        self.live.lock().unwrap().insert(object);
    }

    fn record(&self, call: SlowPathCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Collector for MockCollector {
    fn bind_mutator(&self, tls: VMMutatorThread) -> NonNull<Mutator> {
        let mut mutator: Box<Mutator> = Box::new(Zeroable::zeroed());
        mutator.mutator_tls = tls;
        // Freed when the collector drops it in `release_mutator`.
        NonNull::from(Box::leak(mutator))
    }

    fn release_mutator(&self, mutator: NonNull<Mutator>) {
        self.released_at
            .lock()
            .unwrap()
            .push(mutator.as_ptr() as usize);
        let record = unsafe { Box::from_raw(mutator.as_ptr()) };
        self.released.lock().unwrap().push(*record);
    }

    fn is_gc_initialized(&self) -> bool {
        true
    }

    fn alloc(
        &self,
        _mutator: &mut Mutator,
        size: usize,
        _align: usize,
        _offset: usize,
        semantics: AllocationSemantics,
    ) -> Address {
        self.alloc.call((size, semantics));
        *self.last_alloc_semantics.lock().unwrap() = Some(semantics);
        if self.fail_allocation.load(Ordering::SeqCst) {
            Address::ZERO
        } else {
            Self::SLOW_PATH_RESULT
        }
    }

    fn post_alloc(
        &self,
        _mutator: &mut Mutator,
        object: ObjectReference,
        size: usize,
        _semantics: AllocationSemantics,
    ) {
        self.post_alloc.call((object, size))
    }

    fn flush_mutator(&self, _mutator: &mut Mutator) {
        self.flush_mutator.call(())
    }

    fn destroy_mutator(&self, _mutator: &mut Mutator) {
        self.destroy_mutator.call(())
    }

    fn array_copy_pre(&self, _mutator: &mut Mutator, src: Address, dst: Address, count: usize) {
        self.mutator_array_copies.fetch_add(1, Ordering::SeqCst);
        self.record(SlowPathCall::ArrayCopyPre { src, dst, count });
    }

    fn object_reference_write_slow_call(
        &self,
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    ) {
        self.record(SlowPathCall::WriteSlow { src, slot, target });
    }

    fn object_reference_write_pre_call(
        &self,
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    ) {
        self.record(SlowPathCall::WritePre { src, slot, target });
    }

    fn load_reference_call(&self, value: ObjectReference) {
        self.record(SlowPathCall::LoadReference(value));
    }

    fn object_reference_array_copy_pre_call(&self, src: Address, dst: Address, count: usize) {
        self.record(SlowPathCall::ArrayCopyPre { src, dst, count });
    }

    fn object_reference_clone_pre_call(&self, dst: ObjectReference) {
        self.record(SlowPathCall::ClonePre(dst));
    }

    fn is_live(&self, object: ObjectReference) -> bool {
        self.live.lock().unwrap().contains(&object)
    }

    fn report_gc_start(&self) {
        self.report_gc_start.call(())
    }

    fn allocator_sizes(&self) -> AllocatorSizes {
        self.sizes
    }

    fn max_non_los_default_alloc_bytes(&self) -> usize {
        self.max_non_los
    }

    fn default_allocator_selector(&self) -> AllocatorSelector {
        self.selector
    }

    fn side_metadata_base(&self, _compressed: bool) -> Address {
        self.metadata_base
    }

    fn heap_range(&self) -> (Address, Address) {
        (
            unsafe { Address::from_usize(0x1000_0000) },
            unsafe { Address::from_usize(0x2000_0000) },
        )
    }
}
