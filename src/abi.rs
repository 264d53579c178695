//! Layout agreements between this crate, the collector and the VM.
//!
//! The compiled fast paths reach into allocator records and class metadata at fixed
//! offsets, so a mismatch in either layout is unrecoverable. Both checks run once, when
//! the first mutator binds or when the runtime starts.

use crate::util::alloc::allocators::{FREE_LIST_ALLOCATOR_SIZE, IMMIX_ALLOCATOR_SIZE};
use crate::vm::{AllocatorSizes, KlassLayout};

/// The allocator record sizes this crate was compiled with.
pub const fn local_allocator_sizes() -> AllocatorSizes {
    AllocatorSizes {
        immix_allocator: IMMIX_ALLOCATOR_SIZE,
        free_list_allocator: FREE_LIST_ALLOCATOR_SIZE,
    }
}

/// Panics if the collector's allocator records do not have the sizes this crate expects.
pub fn check_allocator_sizes(theirs: &AllocatorSizes) {
    let ours = local_allocator_sizes();
    if ours != *theirs {
        error!(
            "Allocator record mismatch: ImmixAllocator {} (collector) vs {} (runtime), \
             FreeListAllocator {} (collector) vs {} (runtime)",
            theirs.immix_allocator,
            ours.immix_allocator,
            theirs.free_list_allocator,
            ours.free_list_allocator
        );
        panic!(
            "ABI mismatch: the collector and the runtime disagree on allocator layouts: \
             collector {:?}, runtime {:?}",
            theirs, ours
        );
    }
}

/// Panics if the VM's class metadata layout does not produce the checksum the runtime was
/// built against.
pub fn check_klass_layout(layout: &KlassLayout, expected_checksum: usize) {
    let checksum = layout.checksum();
    assert_eq!(
        checksum, expected_checksum,
        "Class layout checksum mismatch: VM reports {:#x} ({:?}), expected {:#x}",
        checksum, layout, expected_checksum
    );
}
