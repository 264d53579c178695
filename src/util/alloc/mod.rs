//! Allocator records shared with the collector, and the bump pointer used by the inline
//! allocation path.

pub mod allocators;
mod bumppointer;

pub use self::allocators::{
    AllocationError, AllocationSemantics, AllocatorInfo, AllocatorSelector, Allocators,
    FreeListAllocator, ImmixAllocator,
};
pub use self::bumppointer::BumpPointer;
