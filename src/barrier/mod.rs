//! Reference barriers for the field-logging collector.
//!
//! Every barrier follows one protocol: a write consults the unlog bit of the slot and calls
//! the collector's slow path if the slot has not been logged in this cycle; a load of a
//! weak, phantom or unknown-strength reference reports the loaded value while concurrent
//! marking is active; array copies and clones report their destination.
//!
//! The protocol has three renderings, one per execution tier:
//!
//! -   [`runtime`]: direct calls, used by the interpreter and native code.
//! -   [`baseline`]: a linear instruction list with out-of-line stubs.
//! -   [`optimizing`]: a structured IR built with an ideal-graph style kit.
//!
//! [`protocol`] is the reference interpreter all three are checked against. Every tier
//! touches the world only through a [`BarrierEnv`], so the memory reads and slow calls it
//! makes can be recorded and compared.

mod env;
pub mod baseline;
pub mod optimizing;
pub mod protocol;
pub mod runtime;


pub use self::env::{BarrierEnv, LiveEnv, RecordingEnv};

use crate::util::constants::UNLOGGED_VALUE;
use crate::util::metadata::SideMetadataSpec;
use crate::util::options::{LoadBarrierMode, Options};
use crate::util::{Address, ObjectReference};

/// The strength of the reference a load reads.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceStrength {
    Strong,
    Soft,
    Weak,
    Phantom,
    /// An unsafe or reflective access. It may read the referent of a `Reference`.
    Unknown,
}

/// What the compiler knows statically about the base object of an unknown-strength load.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BaseTypeFacts {
    #[default]
    Unknown,
    Array,
    /// A loaded class that is neither a subclass of `Reference` nor `Object`.
    NotReference,
    /// A class that may be a `Reference`.
    MaybeReference,
}

/// A reference store. The barrier runs before the store itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StoreSite {
    pub src: ObjectReference,
    pub slot: Address,
    pub target: ObjectReference,
    /// The slot is in the heap (not a root or an off-heap handle).
    pub in_heap: bool,
    /// The stored value is the constant null.
    pub target_is_null_constant: bool,
    /// The destination object is the result of an allocation in the same compilation unit
    /// with no safepoint in between.
    pub dst_just_allocated: bool,
    /// The field offset is not resolved yet; the baseline tier must patch it.
    pub needs_patching: bool,
}

impl StoreSite {
    /// A compiler may drop the barrier for a constant null stored into an object it just
    /// allocated: the slot held null and the collector has nothing to log.
    pub fn is_elidable(&self) -> bool {
        self.target_is_null_constant && self.dst_just_allocated
    }
}

/// A reference load. The barrier runs after the load.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoadSite {
    pub base: ObjectReference,
    pub offset: isize,
    /// `offset` is a compile-time constant.
    pub offset_is_constant: bool,
    pub slot: Address,
    /// The value the load produced.
    pub value: ObjectReference,
    pub strength: ReferenceStrength,
    pub in_heap: bool,
    pub base_facts: BaseTypeFacts,
}

impl LoadSite {
    pub fn needs_barrier(&self, config: &BarrierConfig) -> bool {
        config.reference_load_barrier && self.in_heap && self.strength != ReferenceStrength::Strong
    }

    /// Compile-time filters for an unknown-strength load: the access provably does not
    /// read the referent field of a `Reference`.
    pub fn statically_not_referent(&self, config: &BarrierConfig) -> bool {
        if self.offset_is_constant && self.offset != config.referent_offset {
            return true;
        }
        matches!(
            self.base_facts,
            BaseTypeFacts::Array | BaseTypeFacts::NotReference
        )
    }
}

/// A copy of `count` reference slots from `src` to `dst`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArrayCopySite {
    pub src: Address,
    pub dst: Address,
    pub count: usize,
    /// The element type is a reference type.
    pub is_oop: bool,
    pub dest_uninitialized: bool,
}

/// A shallow object clone of `size` bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CloneSite {
    pub src: ObjectReference,
    pub dst: ObjectReference,
    pub size: usize,
    pub dst_just_allocated: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BarrierSite {
    Store(StoreSite),
    Load(LoadSite),
    ArrayCopy(ArrayCopySite),
    Clone(CloneSite),
}

/// A value the access itself supplies to compiled barrier code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessOperand {
    /// Base object of a field access, source object of a clone.
    Base,
    Slot,
    /// Stored value, or the value a load produced.
    Value,
    Offset,
    /// Array-copy source.
    Src,
    /// Array-copy or clone destination.
    Dst,
    Count,
    Size,
}

impl BarrierSite {
    /// The raw word for `operand` at this access.
    pub fn operand(&self, operand: AccessOperand) -> usize {
        use AccessOperand::*;
        match (self, operand) {
            (BarrierSite::Store(s), Base) => s.src.value(),
            (BarrierSite::Store(s), Slot) => s.slot.as_usize(),
            (BarrierSite::Store(s), Value) => s.target.value(),
            (BarrierSite::Load(l), Base) => l.base.value(),
            (BarrierSite::Load(l), Slot) => l.slot.as_usize(),
            (BarrierSite::Load(l), Value) => l.value.value(),
            (BarrierSite::Load(l), Offset) => l.offset as usize,
            (BarrierSite::ArrayCopy(c), Src) => c.src.as_usize(),
            (BarrierSite::ArrayCopy(c), Dst) => c.dst.as_usize(),
            (BarrierSite::ArrayCopy(c), Count) => c.count,
            (BarrierSite::Clone(c), Base) => c.src.value(),
            (BarrierSite::Clone(c), Dst) => c.dst.value(),
            (BarrierSite::Clone(c), Size) => c.size,
            (site, operand) => panic!("{:?} has no operand {:?}", site, operand),
        }
    }
}

/// Barrier parameters fixed at startup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarrierConfig {
    /// Inline the unlog-bit check. When false every store calls the pre-write entry.
    pub fastpath: bool,
    pub unlog_bits: SideMetadataSpec,
    pub no_arraycopy: bool,
    pub reference_load_barrier: bool,
    pub load_barrier_mode: LoadBarrierMode,
    pub unknown_load_short_circuit: bool,
    /// Offset of the referent field in `java.lang.ref.Reference`.
    pub referent_offset: isize,
}

impl BarrierConfig {
    pub fn new(options: &Options, metadata_base: Address, referent_offset: isize) -> Self {
        Self {
            fastpath: options.barrier_fastpath,
            unlog_bits: SideMetadataSpec::unlog_bits(metadata_base, options.use_compressed_oops),
            no_arraycopy: options.field_barrier_no_arraycopy,
            reference_load_barrier: options.reference_load_barrier,
            load_barrier_mode: options.load_barrier_mode,
            unknown_load_short_circuit: options.unknown_load_short_circuit,
            referent_offset,
        }
    }

    /// Bit test on a metadata byte already loaded for `slot`.
    pub fn is_unlogged_in(&self, byte: u8, slot: Address) -> bool {
        (byte >> self.unlog_bits.meta_byte_lshift(slot)) & 1 == UNLOGGED_VALUE
    }
}

/// Compile-time rules a tier applies on top of the protocol.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TierFeatures {
    pub elide_constant_null_stores: bool,
    pub unknown_load_short_circuit: bool,
}

impl TierFeatures {
    /// The direct-call tier knows nothing at compile time.
    pub const RUNTIME: Self = Self {
        elide_constant_null_stores: false,
        unknown_load_short_circuit: false,
    };

    pub const BASELINE: Self = Self {
        elide_constant_null_stores: true,
        unknown_load_short_circuit: false,
    };

    pub fn optimizing(config: &BarrierConfig) -> Self {
        Self {
            elide_constant_null_stores: true,
            unknown_load_short_circuit: config.unknown_load_short_circuit,
        }
    }
}

/// The collector's barrier entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlowPathCall {
    WriteSlow {
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    },
    WritePre {
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    },
    LoadReference(ObjectReference),
    ArrayCopyPre {
        src: Address,
        dst: Address,
        count: usize,
    },
    ClonePre(ObjectReference),
}

/// A collector entry as compiled code names it. Arguments are passed as raw words.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuntimeEntry {
    WriteSlow,
    WritePre,
    LoadReference,
    ArrayCopyPre,
    ClonePre,
}

impl RuntimeEntry {
    pub const fn arity(self) -> usize {
        match self {
            RuntimeEntry::WriteSlow | RuntimeEntry::WritePre | RuntimeEntry::ArrayCopyPre => 3,
            RuntimeEntry::LoadReference | RuntimeEntry::ClonePre => 1,
        }
    }

    /// The symbol the entry is exported under.
    pub const fn symbol(self) -> &'static str {
        match self {
            RuntimeEntry::WriteSlow => "mmtk_object_reference_write_slow",
            RuntimeEntry::WritePre => "mmtk_object_reference_write_pre",
            RuntimeEntry::LoadReference => "mmtk_load_reference",
            RuntimeEntry::ArrayCopyPre => "mmtk_object_reference_array_copy_pre",
            RuntimeEntry::ClonePre => "mmtk_object_reference_clone_pre",
        }
    }

    pub fn bind(self, args: &[usize]) -> SlowPathCall {
        assert_eq!(
            args.len(),
            self.arity(),
            "{} takes {} arguments",
            self.symbol(),
            self.arity()
        );
        let addr = |i: usize| unsafe { Address::from_usize(args[i]) };
        let obj = |i: usize| ObjectReference::from_raw_address(addr(i));
        match self {
            RuntimeEntry::WriteSlow => SlowPathCall::WriteSlow {
                src: obj(0),
                slot: addr(1),
                target: obj(2),
            },
            RuntimeEntry::WritePre => SlowPathCall::WritePre {
                src: obj(0),
                slot: addr(1),
                target: obj(2),
            },
            RuntimeEntry::LoadReference => SlowPathCall::LoadReference(obj(0)),
            RuntimeEntry::ArrayCopyPre => SlowPathCall::ArrayCopyPre {
                src: addr(0),
                dst: addr(1),
                count: args[2],
            },
            RuntimeEntry::ClonePre => SlowPathCall::ClonePre(obj(0)),
        }
    }
}

/// An observable step of a barrier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BarrierEvent {
    /// A load of the unlog metadata byte at this address.
    LoadMetadata(Address),
    LoadMarkingFlag,
    CheckReferenceInstance(ObjectReference),
    Call(SlowPathCall),
    RawCopy {
        src: ObjectReference,
        dst: ObjectReference,
        size: usize,
    },
    Fence,
}
