use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use std::vec::IntoIter;

use crate::barrier::BarrierConfig;
use crate::plan::{AllocationConfig, Mutator};
use crate::util::{Address, VMMutatorThread};
use crate::vm::{MutatorClosure, ThreadControl};

/// Process-wide runtime state. Barriers and the allocation path receive it explicitly
/// instead of reading globals.
// The marking flag is the only field compiled code reads directly, through
// `concurrent_marking_flag_address`. Everything else is fixed after initialization or
// only touched by collector threads during a pause.
pub struct GlobalState {
    /// 1 while concurrent marking runs. Written by the collector at phase changes, read
    /// racily by every reference-load barrier.
    concurrent_marking_active: AtomicU8,
    pub(crate) barrier: BarrierConfig,
    pub(crate) allocation: AllocationConfig,
    /// Cursor over the VM's thread list for `get_next_mutator`. `None` when no walk is
    /// in progress.
    mutator_iterator: spin::Mutex<Option<IntoIter<VMMutatorThread>>>,
    /// The collector's stack-scan callback, held from `stop_all_mutators` to
    /// `resume_mutators`.
    stack_scan_work: spin::Mutex<Option<MutatorClosure>>,
}

impl GlobalState {
    pub fn new(barrier: BarrierConfig, allocation: AllocationConfig) -> Self {
        Self {
            concurrent_marking_active: AtomicU8::new(0),
            barrier,
            allocation,
            mutator_iterator: spin::Mutex::new(None),
            stack_scan_work: spin::Mutex::new(None),
        }
    }

    pub fn barrier_config(&self) -> &BarrierConfig {
        &self.barrier
    }

    pub fn allocation_config(&self) -> &AllocationConfig {
        &self.allocation
    }

    pub fn is_concurrent_marking_active(&self) -> bool {
        self.concurrent_marking_flag() != 0
    }

    /// The raw flag byte, as compiled barriers load it.
    pub fn concurrent_marking_flag(&self) -> u8 {
        self.concurrent_marking_active.load(Ordering::Relaxed)
    }

    pub fn set_concurrent_marking_active(&self, active: bool) {
        debug!("Concurrent marking active: {}", active);
        self.concurrent_marking_active
            .store(active as u8, Ordering::Relaxed);
    }

    /// Address of the flag byte, for code that tests it inline.
    pub fn concurrent_marking_flag_address(&self) -> Address {
        Address::from_ptr(&self.concurrent_marking_active)
    }

    /// Return the next bound mutator of the current walk, starting a walk if none is in
    /// progress. Threads without a mutator are skipped. At the end of the list the walk
    /// is reset and `None` is returned.
    pub fn next_mutator(&self, threads: &dyn ThreadControl) -> Option<NonNull<Mutator>> {
        let mut iterator = self.mutator_iterator.lock();
        let walk = iterator.get_or_insert_with(|| {
            trace!("Starting a walk over the mutator threads");
            threads.mutator_threads().into_iter()
        });
        for tls in walk.by_ref() {
            if let Some(mutator) = threads.mutator_of(tls) {
                return Some(mutator);
            }
        }
        *iterator = None;
        None
    }

    /// Abandon the current walk. The next `next_mutator` starts from the first thread.
    pub fn reset_mutator_iterator(&self) {
        *self.mutator_iterator.lock() = None;
    }

    pub(crate) fn set_stack_scan_work(&self, closure: Option<MutatorClosure>) {
        *self.stack_scan_work.lock() = closure;
    }

    pub(crate) fn stack_scan_work(&self) -> Option<MutatorClosure> {
        *self.stack_scan_work.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::alloc::AllocatorSelector;
    use crate::util::metadata::SideMetadataSpec;
    use crate::util::options::LoadBarrierMode;
    use crate::util::test_util::mock_host::MockHost;

    pub(crate) fn state() -> GlobalState {
        GlobalState::new(
            BarrierConfig {
                fastpath: true,
                unlog_bits: SideMetadataSpec::unlog_bits(Address::ZERO, false),
                no_arraycopy: false,
                reference_load_barrier: true,
                load_barrier_mode: LoadBarrierMode::ReferenceCall,
                unknown_load_short_circuit: false,
                referent_offset: 16,
            },
            AllocationConfig {
                max_non_los_default_alloc_bytes: 8192,
                selector: AllocatorSelector::BumpPointer(0),
                disable_fast_alloc: false,
                large_bump_threshold: 256,
            },
        )
    }

    #[test]
    fn marking_flag_is_one_byte() {
        let state = state();
        assert!(!state.is_concurrent_marking_active());
        state.set_concurrent_marking_active(true);
        let byte = unsafe { state.concurrent_marking_flag_address().load::<u8>() };
        assert_eq!(byte, 1);
        state.set_concurrent_marking_active(false);
        assert_eq!(state.concurrent_marking_flag(), 0);
    }

    #[test]
    fn mutator_walk_ends_with_none_and_restarts() {
        let state = state();
        let host = MockHost::with_mutators(3);
        let expected = host.mutator_pointers();

        let first: Vec<_> = std::iter::from_fn(|| state.next_mutator(&host)).collect();
        assert_eq!(first, expected);
        // the walk was reset at the end
        let second: Vec<_> = std::iter::from_fn(|| state.next_mutator(&host)).collect();
        assert_eq!(second, expected);
    }

    #[test]
    fn reset_abandons_a_walk() {
        let state = state();
        let host = MockHost::with_mutators(3);
        let expected = host.mutator_pointers();
        assert_eq!(state.next_mutator(&host), Some(expected[0]));
        assert_eq!(state.next_mutator(&host), Some(expected[1]));
        state.reset_mutator_iterator();
        assert_eq!(state.next_mutator(&host), Some(expected[0]));
    }

    #[test]
    fn threads_without_mutators_are_skipped() {
        let state = state();
        let host = MockHost::with_mutators(4);
        host.unbind_mutator(1);
        let expected = host.mutator_pointers();
        let walk: Vec<_> = std::iter::from_fn(|| state.next_mutator(&host)).collect();
        assert_eq!(walk.len(), 3);
        assert_eq!(walk, expected);
    }
}
