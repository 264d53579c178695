use criterion::Criterion;

pub mod alloc;
pub mod barrier;

/// Run the benchmark named by `MMTK_BENCH`, or all of them.
pub fn bench(c: &mut Criterion) {
    match std::env::var("MMTK_BENCH").ok().as_deref() {
        Some("alloc") => alloc::bench(c),
        Some("barrier") => barrier::bench(c),
        Some(other) => panic!("Unknown benchmark {:?}", other),
        None => {
            alloc::bench(c);
            barrier::bench(c);
        }
    }
}
