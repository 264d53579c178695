use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use atomic::Atomic;
use bytemuck::NoUninit;

use crate::util::constants::*;
use crate::util::{Address, ObjectReference};

/// A slot holding an object reference, as the collector sees it.
///
/// A slot stores either a full word or, under compressed references, a 32-bit value relative
/// to the heap base. `load` and `store` convert between that representation and
/// `ObjectReference`. Both sit on the tracing hot path.
pub trait Edge: Copy + Send + Debug + PartialEq + Eq + Hash {
    fn load(&self) -> ObjectReference;

    fn store(&self, object: ObjectReference);
}

/// How 32-bit compressed references map to addresses: `address = base + (narrow << shift)`.
/// Zero always encodes null.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit)]
pub struct CompressedOops {
    pub base: Address,
    pub shift: usize,
}

impl CompressedOops {
    /// Zero-based, unscaled encoding. The narrow value is the address itself.
    pub const UNSCALED: Self = Self {
        base: Address::ZERO,
        shift: 0,
    };

    /// Pick the cheapest encoding that can address every object in `[start, end)`.
    pub fn for_heap(start: Address, end: Address) -> Self {
        if end.as_usize() <= UNSCALED_NARROW_OOP_HEAP_END {
            Self::UNSCALED
        } else if end.as_usize() <= ZERO_BASED_NARROW_OOP_HEAP_END {
            Self {
                base: Address::ZERO,
                shift: LOG_NARROW_OOP_SHIFT,
            }
        } else {
            // The page below the heap keeps every non-null object from encoding to zero.
            Self {
                base: start - BYTES_IN_PAGE,
                shift: LOG_NARROW_OOP_SHIFT,
            }
        }
    }

    #[inline(always)]
    pub fn encode(&self, object: ObjectReference) -> u32 {
        if object.is_null() {
            0
        } else {
            ((object.to_raw_address() - self.base) >> self.shift) as u32
        }
    }

    #[inline(always)]
    pub fn decode(&self, narrow: u32) -> ObjectReference {
        if narrow == 0 {
            ObjectReference::NULL
        } else {
            ObjectReference::from_raw_address(self.base + ((narrow as usize) << self.shift))
        }
    }

    /// Install the process-wide encoding used by [`TaggedEdge`]. `None` means the heap
    /// stores full-width references only.
    pub fn install(config: Option<CompressedOops>) {
        match config {
            Some(oops) => {
                NARROW_OOP_ENCODING.store(oops, Ordering::SeqCst);
                USE_COMPRESSED_OOPS.store(true, Ordering::SeqCst);
            }
            None => USE_COMPRESSED_OOPS.store(false, Ordering::SeqCst),
        }
    }

    /// The installed encoding, or `None` if references are not compressed.
    #[inline(always)]
    pub fn current() -> Option<CompressedOops> {
        if USE_COMPRESSED_OOPS.load(Ordering::Relaxed) {
            Some(NARROW_OOP_ENCODING.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

static USE_COMPRESSED_OOPS: AtomicBool = AtomicBool::new(false);
static NARROW_OOP_ENCODING: Atomic<CompressedOops> = Atomic::new(CompressedOops::UNSCALED);

/// A slot address as it travels in an edge buffer. In a heap with compressed references,
/// bit 63 marks a full-width slot (for example a root in a thread stack); narrow heap slots
/// are reported untagged. In a heap without compressed references no slot is tagged.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaggedEdge(Address);

impl TaggedEdge {
    pub const WIDE_TAG: usize = 1 << 63;

    /// A word-sized slot. It is tagged only when the heap uses compressed references.
    #[inline(always)]
    pub fn wide(slot: Address, compressed_heap: bool) -> Self {
        if compressed_heap {
            Self(unsafe { Address::from_usize(slot.as_usize() | Self::WIDE_TAG) })
        } else {
            Self(slot)
        }
    }

    /// A 32-bit slot holding a compressed reference.
    #[inline(always)]
    pub fn narrow(slot: Address) -> Self {
        Self(slot)
    }

    /// Reinterpret a word taken from an edge buffer.
    #[inline(always)]
    pub fn from_raw(raw: Address) -> Self {
        Self(raw)
    }

    /// The word as stored in an edge buffer, tag included.
    #[inline(always)]
    pub fn raw(&self) -> Address {
        self.0
    }

    #[inline(always)]
    pub fn is_compressed(&self) -> bool {
        self.0.as_usize() & Self::WIDE_TAG == 0
    }

    #[inline(always)]
    pub fn untagged_address(&self) -> Address {
        unsafe { Address::from_usize(self.0.as_usize() << 1 >> 1) }
    }

    fn wide_slot(&self) -> &Atomic<ObjectReference> {
        unsafe { self.untagged_address().as_ref() }
    }

    fn narrow_slot(&self) -> &AtomicU32 {
        unsafe { self.0.as_ref() }
    }

    /// Load using an explicit encoding instead of the installed one.
    #[inline(always)]
    pub fn load_with(&self, encoding: Option<&CompressedOops>) -> ObjectReference {
        match encoding {
            Some(oops) if self.is_compressed() => {
                oops.decode(self.narrow_slot().load(Ordering::Relaxed))
            }
            _ => self.wide_slot().load(Ordering::Relaxed),
        }
    }

    #[inline(always)]
    pub fn store_with(&self, object: ObjectReference, encoding: Option<&CompressedOops>) {
        match encoding {
            Some(oops) if self.is_compressed() => self
                .narrow_slot()
                .store(oops.encode(object), Ordering::Relaxed),
            _ => self.wide_slot().store(object, Ordering::Relaxed),
        }
    }

    pub fn compare_exchange_with(
        &self,
        old: ObjectReference,
        new: ObjectReference,
        encoding: Option<&CompressedOops>,
    ) -> Result<ObjectReference, ObjectReference> {
        match encoding {
            Some(oops) if self.is_compressed() => self
                .narrow_slot()
                .compare_exchange(
                    oops.encode(old),
                    oops.encode(new),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .map(|v| oops.decode(v))
                .map_err(|v| oops.decode(v)),
            _ => self
                .wide_slot()
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst),
        }
    }
}

impl Edge for TaggedEdge {
    #[inline(always)]
    fn load(&self) -> ObjectReference {
        self.load_with(CompressedOops::current().as_ref())
    }

    #[inline(always)]
    fn store(&self, object: ObjectReference) {
        self.store_with(object, CompressedOops::current().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_tagged_edge_should_have_the_same_size_as_a_pointer() {
        assert_eq!(
            std::mem::size_of::<TaggedEdge>(),
            std::mem::size_of::<*mut libc::c_void>()
        );
    }

    #[test]
    fn encoding_follows_heap_end() {
        let gb = |n: usize| unsafe { Address::from_usize(n << LOG_BYTES_IN_GBYTE) };
        assert_eq!(
            CompressedOops::for_heap(gb(1), gb(4)),
            CompressedOops::UNSCALED
        );
        assert_eq!(
            CompressedOops::for_heap(gb(1), gb(32)),
            CompressedOops {
                base: Address::ZERO,
                shift: 3
            }
        );
        assert_eq!(
            CompressedOops::for_heap(gb(40), gb(64)),
            CompressedOops {
                base: gb(40) - 4096usize,
                shift: 3
            }
        );
    }

    #[test]
    fn narrow_values() {
        let oops = CompressedOops {
            base: unsafe { Address::from_usize(0x7_0000_0000) },
            shift: 3,
        };
        let object =
            ObjectReference::from_raw_address(unsafe { Address::from_usize(0x7_0000_1000) });
        assert_eq!(oops.encode(object), 0x200);
        assert_eq!(oops.decode(0x200), object);
        assert_eq!(oops.encode(ObjectReference::NULL), 0);
        assert!(oops.decode(0).is_null());
    }

    #[test]
    fn tag_marks_wide_slots() {
        let slot = unsafe { Address::from_usize(0x1000) };
        let wide = TaggedEdge::wide(slot, true);
        assert!(!wide.is_compressed());
        assert_eq!(wide.raw().as_usize(), 0x1000 | (1 << 63));
        assert_eq!(wide.untagged_address(), slot);

        let narrow = TaggedEdge::narrow(slot);
        assert!(narrow.is_compressed());
        assert_eq!(narrow.untagged_address(), slot);

        assert_eq!(TaggedEdge::wide(slot, false).raw(), slot);
    }

    #[test]
    fn load_and_store_honor_the_width() {
        let oops = CompressedOops::UNSCALED;
        let target = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x4000) });

        let mut narrow_cell: u32 = 0;
        let narrow = TaggedEdge::narrow(Address::from_mut_ptr(&mut narrow_cell));
        narrow.store_with(target, Some(&oops));
        assert_eq!(narrow_cell, 0x4000);
        assert_eq!(narrow.load_with(Some(&oops)), target);

        let mut wide_cell: usize = 0;
        let wide = TaggedEdge::wide(Address::from_mut_ptr(&mut wide_cell), true);
        wide.store_with(target, Some(&oops));
        assert_eq!(wide_cell, 0x4000);
        assert_eq!(wide.load_with(Some(&oops)), target);

        let other = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x8000) });
        assert_eq!(
            wide.compare_exchange_with(other, other, Some(&oops)),
            Err(target)
        );
        assert_eq!(
            narrow.compare_exchange_with(target, other, Some(&oops)),
            Ok(target)
        );
        assert_eq!(narrow_cell, 0x8000);
    }
}
