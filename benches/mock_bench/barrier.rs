use criterion::Criterion;

use mmtk_mutator_runtime::barrier::runtime::RuntimeBarrier;
use mmtk_mutator_runtime::barrier::{BarrierConfig, LiveEnv};
use mmtk_mutator_runtime::global_state::GlobalState;
use mmtk_mutator_runtime::plan::AllocationConfig;
use mmtk_mutator_runtime::util::alloc::AllocatorSelector;
use mmtk_mutator_runtime::util::metadata::SideMetadataTable;
use mmtk_mutator_runtime::util::options::LoadBarrierMode;
use mmtk_mutator_runtime::util::test_util::mock_collector::MockCollector;
use mmtk_mutator_runtime::util::test_util::mock_host::MockHost;
use mmtk_mutator_runtime::util::test_util::FakeHeap;
use mmtk_mutator_runtime::util::ObjectReference;

pub fn bench(c: &mut Criterion) {
    let heap = FakeHeap::new(1 << 16);
    let table = SideMetadataTable::new(heap.start(), heap.end(), false);
    let state = GlobalState::new(
        BarrierConfig {
            fastpath: true,
            unlog_bits: table.spec(),
            no_arraycopy: false,
            reference_load_barrier: true,
            load_barrier_mode: LoadBarrierMode::ReferenceCall,
            unknown_load_short_circuit: false,
            referent_offset: MockHost::REFERENT_OFFSET as isize,
        },
        AllocationConfig {
            max_non_los_default_alloc_bytes: 8192,
            selector: AllocatorSelector::BumpPointer(0),
            disable_fast_alloc: false,
            large_bump_threshold: 256,
        },
    );
    let collector = MockCollector::default();
    let host = MockHost::default();
    let barrier = RuntimeBarrier::new(state.barrier_config());
    let src = ObjectReference::from_raw_address(heap.start());
    let slot = heap.start() + 64usize;

    // Every slot is logged, so each write takes the inline check only.
    c.bench_function("write_barrier_fastpath", |b| {
        b.iter(|| {
            let mut env = LiveEnv::new(&state, &collector, &host);
            barrier.object_reference_write_pre(&mut env, src, slot, src);
        })
    });
}
