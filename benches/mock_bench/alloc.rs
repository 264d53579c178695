use criterion::Criterion;

use mmtk_mutator_runtime::plan::{AllocationConfig, MutatorContext};
use mmtk_mutator_runtime::util::alloc::{AllocationSemantics, AllocatorSelector, BumpPointer};
use mmtk_mutator_runtime::util::test_util::mock_collector::MockCollector;
use mmtk_mutator_runtime::util::test_util::FakeHeap;

pub fn bench(c: &mut Criterion) {
    let collector = MockCollector::default();
    let config = AllocationConfig {
        max_non_los_default_alloc_bytes: 8192,
        selector: AllocatorSelector::BumpPointer(0),
        disable_fast_alloc: false,
        large_bump_threshold: 256,
    };
    let heap = FakeHeap::new(1 << 20);
    let mut context = MutatorContext::default();

    c.bench_function("alloc", |b| {
        b.iter(|| {
            let bump_pointer = &mut context.mutator.allocators.bump_pointer[0].bump_pointer;
            if bump_pointer.remaining() < 8 {
                *bump_pointer = BumpPointer::new(heap.start(), heap.end());
            }
            let _addr = context.alloc(&collector, &config, 8, AllocationSemantics::Default);
        })
    });
}
