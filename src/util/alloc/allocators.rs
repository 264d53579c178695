use std::mem::size_of;

use bytemuck::Zeroable;
use memoffset::offset_of;

use crate::plan::Mutator;
use crate::util::alloc::BumpPointer;
use crate::util::{Address, OpaquePointer, VMMutatorThread};

pub const MAX_BUMP_ALLOCATORS: usize = 6;
pub const MAX_LARGE_OBJECT_ALLOCATORS: usize = 2;
pub const MAX_MALLOC_ALLOCATORS: usize = 1;
pub const MAX_IMMIX_ALLOCATORS: usize = 1;
pub const MAX_FREE_LIST_ALLOCATORS: usize = 2;
pub const MAX_MARK_COMPACT_ALLOCATORS: usize = 1;

/// A trait-object pointer (`&dyn Space`) held by the collector. Two words: data and vtable.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable)]
pub struct DynPointer {
    pub data: OpaquePointer,
    pub vtable: OpaquePointer,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct BumpAllocator {
    pub tls: VMMutatorThread,
    pub bump_pointer: BumpPointer,
    pub space: DynPointer,
    pub context: OpaquePointer,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct LargeObjectAllocator {
    pub tls: VMMutatorThread,
    pub space: OpaquePointer,
    pub context: OpaquePointer,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct MallocAllocator {
    pub tls: VMMutatorThread,
    pub space: OpaquePointer,
    pub context: OpaquePointer,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct ImmixAllocator {
    pub tls: VMMutatorThread,
    pub bump_pointer: BumpPointer,
    pub space: OpaquePointer,
    pub context: OpaquePointer,
    pub hot: u8,
    pub copy: u8,
    /// Bump pointer for medium objects that did not fit in the current line run.
    pub large_bump_pointer: BumpPointer,
    pub request_for_large: u8,
    pub line_tag: u8,
    pub line: usize,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct FreeListAllocator {
    pub tls: VMMutatorThread,
    pub space: OpaquePointer,
    pub context: OpaquePointer,
    pub available_blocks: OpaquePointer,
    pub available_blocks_stress: OpaquePointer,
    pub unswept_blocks: OpaquePointer,
    pub consumed_blocks: OpaquePointer,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct MarkCompactAllocator {
    pub bump_allocator: BumpAllocator,
}

/// The allocators owned by each mutator, mirroring the collector's layout. A fixed number
/// of allocators per kind is reserved and each collection plan uses a part of them. The
/// record is copied out of the collector on bind, so every field must stay plain data.
#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable)]
pub struct Allocators {
    pub bump_pointer: [BumpAllocator; MAX_BUMP_ALLOCATORS],
    pub large_object: [LargeObjectAllocator; MAX_LARGE_OBJECT_ALLOCATORS],
    pub malloc: [MallocAllocator; MAX_MALLOC_ALLOCATORS],
    pub immix: [ImmixAllocator; MAX_IMMIX_ALLOCATORS],
    pub free_list: [FreeListAllocator; MAX_FREE_LIST_ALLOCATORS],
    pub markcompact: [MarkCompactAllocator; MAX_MARK_COMPACT_ALLOCATORS],
}

impl Allocators {
    /// The bump pointer that the inline allocation path may use for `selector`, if the
    /// selected allocator has one.
    pub fn bump_pointer_mut(&mut self, selector: AllocatorSelector) -> Option<&mut BumpPointer> {
        match selector {
            AllocatorSelector::BumpPointer(index) => {
                Some(&mut self.bump_pointer[index as usize].bump_pointer)
            }
            AllocatorSelector::Immix(index) => Some(&mut self.immix[index as usize].bump_pointer),
            AllocatorSelector::MarkCompact(index) => {
                Some(&mut self.markcompact[index as usize].bump_allocator.bump_pointer)
            }
            _ => None,
        }
    }

    /// The second bump pointer an immix allocator keeps for medium-sized requests.
    pub fn large_bump_pointer_mut(
        &mut self,
        selector: AllocatorSelector,
    ) -> Option<&mut BumpPointer> {
        match selector {
            AllocatorSelector::Immix(index) => {
                Some(&mut self.immix[index as usize].large_bump_pointer)
            }
            _ => None,
        }
    }
}

// This type describes which allocator in the allocators set.
// For the VM, this type is equivalent to the following native types:
// #[repr(C)]
// struct AllocatorSelector {
//   tag: AllocatorSelectorTag,
//   payload: u8,
// }
// #[repr(u8)]
// enum AllocatorSelectorTag {
//   BumpPointer,
//   LargeObject,
//   ...
// }
#[repr(C, u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum AllocatorSelector {
    BumpPointer(u8),
    LargeObject(u8),
    Malloc(u8),
    Immix(u8),
    MarkCompact(u8),
    FreeList(u8),
    #[default]
    None,
}

/// Allocation semantics requested by the VM. Numbered like the collector's enum.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::FromRepr)]
pub enum AllocationSemantics {
    Default = 0,
    Immortal = 1,
    Los = 2,
    Code = 3,
    ReadOnly = 4,
    LargeCode = 5,
    NonMoving = 6,
}

/// Why an allocation slow path failed. Passed to the VM's `out_of_memory` upcall.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationError {
    HeapOutOfMemory,
    MmapOutOfMemory,
}

/// Field offsets, relative to the start of a [`Mutator`], that the compilers need to emit
/// an inline bump allocation sequence.
#[repr(C, u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum AllocatorInfo {
    BumpPointer {
        limit_offset: usize,
        cursor_offset: usize,
    },
    // FIXME: Add free-list fast-path
    Unimplemented,
    #[default]
    None,
}

impl AllocatorInfo {
    /// Return an AllocatorInfo for the given allocator selector.
    pub fn new(selector: AllocatorSelector) -> AllocatorInfo {
        let bump_offsets = |base_offset: usize| AllocatorInfo::BumpPointer {
            limit_offset: base_offset + offset_of!(BumpPointer, limit),
            cursor_offset: base_offset + offset_of!(BumpPointer, cursor),
        };
        match selector {
            AllocatorSelector::BumpPointer(index) => bump_offsets(
                offset_of!(Mutator, allocators)
                    + offset_of!(Allocators, bump_pointer)
                    + size_of::<BumpAllocator>() * index as usize
                    + offset_of!(BumpAllocator, bump_pointer),
            ),
            AllocatorSelector::Immix(index) => bump_offsets(
                offset_of!(Mutator, allocators)
                    + offset_of!(Allocators, immix)
                    + size_of::<ImmixAllocator>() * index as usize
                    + offset_of!(ImmixAllocator, bump_pointer),
            ),
            AllocatorSelector::MarkCompact(index) => bump_offsets(
                offset_of!(Mutator, allocators)
                    + offset_of!(Allocators, markcompact)
                    + size_of::<MarkCompactAllocator>() * index as usize
                    + offset_of!(MarkCompactAllocator, bump_allocator)
                    + offset_of!(BumpAllocator, bump_pointer),
            ),
            AllocatorSelector::FreeList(_) => AllocatorInfo::Unimplemented,
            _ => AllocatorInfo::None,
        }
    }
}

/// Record sizes this crate was compiled with, compared against the collector's at bind.
pub const IMMIX_ALLOCATOR_SIZE: usize = size_of::<ImmixAllocator>();
pub const FREE_LIST_ALLOCATOR_SIZE: usize = size_of::<FreeListAllocator>();
