use atomic_traits::Atomic;
use bytemuck::{NoUninit, Zeroable};

use std::fmt;
use std::ops::*;
use std::sync::atomic::Ordering;

/// A length in bytes.
pub type ByteSize = usize;
/// A signed distance in bytes.
pub type ByteOffset = isize;

/// An arbitrary address in the VM's address space: a slot, a bump cursor, a side metadata
/// byte or the start of an object. The type is a plain word with no overhead so it can sit
/// inside `#[repr(C)]` records shared with the VM.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit, Zeroable, Default)]
pub struct Address(usize);

impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, bytes: ByteSize) -> Address {
        Address(self.0 + bytes)
    }
}

impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, bytes: ByteSize) {
        self.0 += bytes;
    }
}

/// Field offsets such as the referent offset may be negative relative to a base.
impl Add<ByteOffset> for Address {
    type Output = Address;
    fn add(self, offset: ByteOffset) -> Address {
        Address(self.0.wrapping_add_signed(offset))
    }
}

impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, bytes: ByteSize) -> Address {
        Address(self.0 - bytes)
    }
}

/// The distance from `other` up to `self`.
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "Address {} is below {} in a distance computation",
            self,
            other
        );
        self.0 - other.0
    }
}

impl BitAnd<usize> for Address {
    type Output = usize;
    fn bitand(self, mask: usize) -> usize {
        self.0 & mask
    }
}

/// Shifting an address yields an index, for example into a side metadata table.
impl Shr<usize> for Address {
    type Output = usize;
    fn shr(self, shift: usize) -> usize {
        self.0 >> shift
    }
}

impl Address {
    /// Also the result of a failed allocation.
    pub const ZERO: Self = Address(0);
    pub const MAX: Self = Address(usize::MAX);

    pub fn from_ptr<T>(ptr: *const T) -> Address {
        Address(ptr as usize)
    }

    pub fn from_ref<T>(r: &T) -> Address {
        Address(r as *const T as usize)
    }

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// # Safety
    /// Nothing checks that the word is a valid address. Use it for constants and for words
    /// that crossed the VM boundary.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    // `Add` is not usable in const contexts.
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }

    /// Side metadata bases are biased so that `base + (addr >> shift)` lands in the table.
    /// The bias itself may lie below zero, so the sum has to wrap.
    pub const fn wrapping_add(self, bytes: usize) -> Address {
        Address(self.0.wrapping_add(bytes))
    }

    pub const fn checked_add(self, bytes: usize) -> Option<Address> {
        match self.0.checked_add(bytes) {
            Some(raw) => Some(Address(raw)),
            None => None,
        }
    }

    /// # Safety
    /// The address must be valid and aligned for `T`.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *mut T)
    }

    /// Overwrites without dropping the previous value.
    ///
    /// # Safety
    /// The address must be valid and aligned for `T`.
    pub unsafe fn store<T>(self, value: T) {
        (self.0 as *mut T).write(value);
    }

    /// # Safety
    /// The address must be valid and aligned for `T`.
    pub unsafe fn atomic_load<T: Atomic>(self, order: Ordering) -> T::Type {
        (*(self.0 as *const T)).load(order)
    }

    /// # Safety
    /// The address must be valid and aligned for `T`.
    pub unsafe fn atomic_store<T: Atomic>(self, value: T::Type, order: Ordering) {
        (*(self.0 as *const T)).store(value, order)
    }

    /// # Safety
    /// The address must be valid and aligned for `T`.
    pub unsafe fn compare_exchange<T: Atomic>(
        self,
        old: T::Type,
        new: T::Type,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T::Type, T::Type> {
        (*(self.0 as *const T)).compare_exchange(old, new, success, failure)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn align_up(self, align: ByteSize) -> Address {
        Address(crate::util::conversions::raw_align_up(self.0, align))
    }

    pub const fn align_down(self, align: ByteSize) -> Address {
        Address(crate::util::conversions::raw_align_down(self.0, align))
    }

    pub const fn is_aligned_to(self, align: usize) -> bool {
        crate::util::conversions::raw_is_aligned(self.0, align)
    }

    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// # Safety
    /// The address must point to a live `T` for as long as `'a`.
    pub unsafe fn as_ref<'a, T>(self) -> &'a T {
        &*self.to_mut_ptr()
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A reference to a managed object, as the VM hands it over. No arithmetic is allowed on
/// it. Zero is the null reference; both the barriers and the scanning closures test for it
/// before doing any work.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit, Zeroable, Default)]
pub struct ObjectReference(usize);

impl ObjectReference {
    pub const NULL: ObjectReference = ObjectReference(0);

    pub fn to_raw_address(self) -> Address {
        Address(self.0)
    }

    pub fn from_raw_address(addr: Address) -> ObjectReference {
        ObjectReference(addr.0)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw word, as stored in a full-width slot.
    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
