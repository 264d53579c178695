use std::ptr::NonNull;

use bytemuck::Zeroable;

use crate::abi;
use crate::util::alloc::allocators::DynPointer;
use crate::util::alloc::{AllocationSemantics, AllocatorSelector, Allocators};
use crate::util::constants::HEAP_WORD_SIZE;
use crate::util::{Address, ObjectReference, OpaquePointer, VMMutatorThread};
use crate::vm::Collector;

/// The collector's per-mutator configuration. Only its size matters on this side.
#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct MutatorConfig {
    pub allocator_mapping: OpaquePointer,
    pub space_mapping: OpaquePointer,
    pub prepare_func: DynPointer,
    pub release_func: DynPointer,
}

/// The collector's mutator record, as laid out by the collector. The runtime keeps a copy
/// of it in every application thread so the compiled fast paths can reach the bump
/// pointers at fixed offsets from the thread.
#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct Mutator {
    pub allocators: Allocators,
    pub barrier: DynPointer,
    pub mutator_tls: VMMutatorThread,
    pub plan: DynPointer,
    pub config: MutatorConfig,
}

impl Mutator {
    pub fn get_tls(&self) -> VMMutatorThread {
        self.mutator_tls
    }
}

/// Process-wide allocation parameters, fixed once the collector is initialized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocationConfig {
    /// Requests of at least this many bytes go to the large object space.
    pub max_non_los_default_alloc_bytes: usize,
    /// The allocator serving default-semantics requests.
    pub selector: AllocatorSelector,
    pub disable_fast_alloc: bool,
    /// Requests above this size may fall back to the large bump pointer of an immix
    /// allocator.
    pub large_bump_threshold: usize,
}

/// The per-thread mutator context: the thread's working copy of the collector record,
/// plus the record it was copied from. The thread holds a lease on `original` from
/// [`MutatorContext::bind`] until [`MutatorContext::destroy`] gives it back.
#[repr(C)]
pub struct MutatorContext {
    pub mutator: Mutator,
    original: *mut Mutator,
}

// A context only moves between threads when its thread is created or torn down.
unsafe impl Send for MutatorContext {}

impl Default for MutatorContext {
    fn default() -> Self {
        Self {
            mutator: Zeroable::zeroed(),
            original: std::ptr::null_mut(),
        }
    }
}

impl MutatorContext {
    /// Bind the thread to the collector: check the record layout, let the collector create
    /// its state, and copy the record into the thread.
    pub fn bind(collector: &dyn Collector, tls: VMMutatorThread) -> Self {
        abi::check_allocator_sizes(&collector.allocator_sizes());
        let original = collector.bind_mutator(tls);
        debug!("Bound mutator {:?} to {:?}", tls, original);
        Self {
            mutator: unsafe { *original.as_ptr() },
            original: original.as_ptr(),
        }
    }

    /// Mutators can be bound once the collector has been initialized.
    pub fn is_ready_to_bind(collector: &dyn Collector) -> bool {
        collector.is_gc_initialized()
    }

    pub fn is_bound(&self) -> bool {
        !self.original.is_null()
    }

    /// The record this context was copied from.
    pub fn original(&self) -> Option<NonNull<Mutator>> {
        NonNull::new(self.original)
    }

    /// Allocate `bytes` (already aligned to the heap word size). Returns zero if the
    /// collector could not satisfy the request.
    #[inline(always)]
    pub fn alloc(
        &mut self,
        collector: &dyn Collector,
        config: &AllocationConfig,
        bytes: usize,
        semantics: AllocationSemantics,
    ) -> Address {
        assert!(
            config.max_non_los_default_alloc_bytes != 0,
            "max_non_los_default_alloc_bytes hasn't been initialized"
        );
        let mut semantics = semantics;
        if bytes >= config.max_non_los_default_alloc_bytes {
            semantics = AllocationSemantics::Los;
        } else if !config.disable_fast_alloc {
            if let Some(result) = self.alloc_fast(config, bytes) {
                return result;
            }
        }
        self.alloc_slow(collector, bytes, semantics)
    }

    #[inline(always)]
    fn alloc_fast(&mut self, config: &AllocationConfig, bytes: usize) -> Option<Address> {
        let allocators = &mut self.mutator.allocators;
        if let Some(result) = allocators
            .bump_pointer_mut(config.selector)
            .and_then(|bump_pointer| bump_pointer.try_alloc(bytes))
        {
            return Some(result);
        }
        if bytes > config.large_bump_threshold {
            return allocators
                .large_bump_pointer_mut(config.selector)
                .and_then(|bump_pointer| bump_pointer.try_alloc(bytes));
        }
        None
    }

    #[inline(never)]
    fn alloc_slow(
        &mut self,
        collector: &dyn Collector,
        bytes: usize,
        semantics: AllocationSemantics,
    ) -> Address {
        let result = collector.alloc(&mut self.mutator, bytes, HEAP_WORD_SIZE, 0, semantics);
        // Default-space objects need no post-allocation work.
        if !result.is_zero() && semantics != AllocationSemantics::Default {
            collector.post_alloc(
                &mut self.mutator,
                ObjectReference::from_raw_address(result),
                bytes,
                semantics,
            );
        }
        result
    }

    pub fn flush(&mut self, collector: &dyn Collector) {
        collector.flush_mutator(&mut self.mutator);
    }

    /// Tear the context down at thread exit. The working copy is written back to the
    /// original record, which is then released to the collector. An unbound context is
    /// left alone.
    pub fn destroy(&mut self, collector: &dyn Collector) {
        let Some(original) = NonNull::new(self.original) else {
            return;
        };
        collector.destroy_mutator(&mut self.mutator);
        unsafe { *original.as_ptr() = self.mutator };
        collector.release_mutator(original);
        debug!("Released mutator {:?}", original);
        self.original = std::ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::alloc::BumpPointer;
    use crate::util::test_util::mock_collector::MockCollector;
    use crate::util::test_util::FakeHeap;

    fn config(threshold: usize) -> AllocationConfig {
        AllocationConfig {
            max_non_los_default_alloc_bytes: threshold,
            selector: AllocatorSelector::BumpPointer(0),
            disable_fast_alloc: false,
            large_bump_threshold: 256,
        }
    }

    fn context_over(heap: &FakeHeap) -> MutatorContext {
        let mut context = MutatorContext::default();
        context.mutator.allocators.bump_pointer[0].bump_pointer =
            BumpPointer::new(heap.start(), heap.end());
        context
    }

    #[test]
    fn fast_path_allocations_are_disjoint() {
        let heap = FakeHeap::new(4096);
        let collector = MockCollector::default();
        let mut context = context_over(&heap);
        let config = config(2048);

        let sizes = [16usize, 8, 64, 24, 512, 8];
        let mut expected = heap.start();
        for size in sizes {
            let result = context.alloc(&collector, &config, size, AllocationSemantics::Default);
            assert_eq!(result, expected);
            expected += size;
        }
        let cursor = context.mutator.allocators.bump_pointer[0].bump_pointer.cursor;
        assert_eq!(cursor, heap.start() + sizes.iter().sum::<usize>());
        assert_eq!(collector.alloc.call_count(), 0);
        assert_eq!(collector.post_alloc.call_count(), 0);
    }

    #[test]
    fn large_requests_skip_the_bump_pointer() {
        for threshold in [1usize, 256, 65536] {
            for size in [threshold - 1, threshold, threshold + 1] {
                let heap = FakeHeap::new(1 << 20);
                let collector = MockCollector::default();
                let mut context = context_over(&heap);
                let result =
                    context.alloc(&collector, &config(threshold), size, AllocationSemantics::Default);
                let cursor = context.mutator.allocators.bump_pointer[0].bump_pointer.cursor;
                if size >= threshold {
                    assert_eq!(cursor, heap.start());
                    assert_eq!(collector.alloc.call_count(), 1);
                    assert_eq!(
                        collector.last_alloc_semantics(),
                        Some(AllocationSemantics::Los)
                    );
                    assert_eq!(result, MockCollector::SLOW_PATH_RESULT);
                } else {
                    assert_eq!(result, heap.start());
                    assert_eq!(cursor, heap.start() + size);
                    assert_eq!(collector.alloc.call_count(), 0);
                }
            }
        }
    }

    #[test]
    fn exhausted_buffer_goes_to_the_collector() {
        let heap = FakeHeap::new(64);
        let collector = MockCollector::default();
        let mut context = context_over(&heap);
        let config = config(1024);

        assert_eq!(
            context.alloc(&collector, &config, 64, AllocationSemantics::Default),
            heap.start()
        );
        let result = context.alloc(&collector, &config, 8, AllocationSemantics::Default);
        assert_eq!(result, MockCollector::SLOW_PATH_RESULT);
        assert_eq!(collector.alloc.call_count(), 1);
        // default-space objects skip the post-allocation hook
        assert_eq!(collector.post_alloc.call_count(), 0);

        let result = context.alloc(&collector, &config, 8, AllocationSemantics::Immortal);
        assert_eq!(result, MockCollector::SLOW_PATH_RESULT);
        assert_eq!(collector.alloc.call_count(), 2);
        assert_eq!(collector.post_alloc.call_count(), 1);
    }

    #[test]
    fn large_objects_get_the_post_alloc_hook() {
        let collector = MockCollector::default();
        let mut context = MutatorContext::default();
        context.alloc(&collector, &config(1024), 2048, AllocationSemantics::Default);
        assert_eq!(collector.last_alloc_semantics(), Some(AllocationSemantics::Los));
        assert_eq!(collector.post_alloc.call_count(), 1);
    }

    #[test]
    fn out_of_memory_skips_post_alloc() {
        let collector = MockCollector::default();
        collector.fail_allocation(true);
        let mut context = MutatorContext::default();
        let result = context.alloc(&collector, &config(1024), 16, AllocationSemantics::Default);
        assert!(result.is_zero());
        assert_eq!(collector.alloc.call_count(), 1);
        assert_eq!(collector.post_alloc.call_count(), 0);
    }

    #[test]
    fn any_semantics_tries_the_bump_pointer_first() {
        let heap = FakeHeap::new(4096);
        let collector = MockCollector::default();
        let mut context = context_over(&heap);
        for semantics in [
            AllocationSemantics::Immortal,
            AllocationSemantics::NonMoving,
            AllocationSemantics::Default,
        ] {
            let before = context.mutator.allocators.bump_pointer[0].bump_pointer.cursor;
            let result = context.alloc(&collector, &config(1024), 16, semantics);
            assert_eq!(result, before, "{:?}", semantics);
        }
        assert_eq!(collector.alloc.call_count(), 0);
        assert_eq!(collector.post_alloc.call_count(), 0);
        assert_eq!(
            context.mutator.allocators.bump_pointer[0].bump_pointer.cursor,
            heap.start() + 48usize
        );

        // once the buffer runs dry the semantics picks the slow path
        context.mutator.allocators.bump_pointer[0].bump_pointer =
            BumpPointer::new(heap.end(), heap.end());
        context.alloc(&collector, &config(1024), 16, AllocationSemantics::Immortal);
        assert_eq!(
            collector.last_alloc_semantics(),
            Some(AllocationSemantics::Immortal)
        );
    }

    #[test]
    fn immix_large_bump_pointer() {
        let small = FakeHeap::new(128);
        let large = FakeHeap::new(4096);
        let collector = MockCollector::default();
        let mut context = MutatorContext::default();
        let immix = &mut context.mutator.allocators.immix[0];
        immix.bump_pointer = BumpPointer::new(small.start(), small.end());
        immix.large_bump_pointer = BumpPointer::new(large.start(), large.end());
        let config = AllocationConfig {
            selector: AllocatorSelector::Immix(0),
            ..config(8192)
        };

        // Too big for the line run, small enough to stay off the large bump pointer.
        let medium = context.alloc(&collector, &config, 200, AllocationSemantics::Default);
        assert_eq!(medium, MockCollector::SLOW_PATH_RESULT);
        let big = context.alloc(&collector, &config, 1024, AllocationSemantics::Default);
        assert_eq!(big, large.start());
        assert_eq!(collector.alloc.call_count(), 1);
    }

    #[test]
    fn disabled_fast_path_always_calls_the_collector() {
        let heap = FakeHeap::new(4096);
        let collector = MockCollector::default();
        let mut context = context_over(&heap);
        let config = AllocationConfig {
            disable_fast_alloc: true,
            ..config(1024)
        };
        context.alloc(&collector, &config, 16, AllocationSemantics::Default);
        assert_eq!(collector.alloc.call_count(), 1);
    }

    #[test]
    #[should_panic(expected = "max_non_los_default_alloc_bytes hasn't been initialized")]
    fn uninitialized_threshold_is_fatal() {
        let collector = MockCollector::default();
        let mut context = MutatorContext::default();
        context.alloc(&collector, &config(0), 16, AllocationSemantics::Default);
    }

    #[test]
    fn destroy_releases_the_lease() {
        let collector = MockCollector::default();
        let tls = VMMutatorThread(crate::util::VMThread::UNINITIALIZED);
        let mut context = MutatorContext::bind(&collector, tls);
        assert!(context.is_bound());
        let original = context.original().unwrap();

        context.mutator.allocators.bump_pointer[0].bump_pointer.cursor =
            unsafe { Address::from_usize(0x1230) };
        context.destroy(&collector);

        assert!(!context.is_bound());
        assert_eq!(collector.destroy_mutator.call_count(), 1);
        assert_eq!(collector.released_mutators(), vec![original.as_ptr() as usize]);
        // the working copy was written back before the release
        assert_eq!(
            collector.last_released_cursor(),
            Some(unsafe { Address::from_usize(0x1230) })
        );

        // a second destroy neither destroys nor releases again
        context.destroy(&collector);
        assert_eq!(collector.destroy_mutator.call_count(), 1);
        assert_eq!(collector.released_mutators().len(), 1);
    }
}
