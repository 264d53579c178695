use crate::util::Address;
use bytemuck::Zeroable;
use libc::c_void;

/// A pointer the runtime receives from the VM and hands back to it, but never dereferences:
/// a thread, its thread-local storage, or the collector's per-thread state.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct OpaquePointer(*mut c_void);

// Never dereferenced on this side of the boundary.
unsafe impl Sync for OpaquePointer {}
unsafe impl Send for OpaquePointer {}
unsafe impl Zeroable for OpaquePointer {}

impl Default for OpaquePointer {
    fn default() -> Self {
        Self::UNINITIALIZED
    }
}

impl OpaquePointer {
    /// Represents an uninitialized value for [`OpaquePointer`].
    pub const UNINITIALIZED: Self = Self(std::ptr::null_mut());

    /// Cast an [`Address`] type to an [`OpaquePointer`].
    pub fn from_address(addr: Address) -> Self {
        OpaquePointer(addr.to_mut_ptr::<c_void>())
    }

    /// Cast the opaque pointer to an [`Address`] type.
    pub fn to_address(self) -> Address {
        Address::from_mut_ptr(self.0)
    }

    /// Is this opaque pointer null?
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Uniquely identifies a VM thread (a `JavaThread*`, the VM control thread, or a GC worker).
/// The runtime stores it and passes it back through the upcalls so the VM knows the context.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct VMThread(pub OpaquePointer);

unsafe impl Zeroable for VMThread {}

impl VMThread {
    /// Represents an uninitialized value for [`VMThread`].
    pub const UNINITIALIZED: Self = Self(OpaquePointer::UNINITIALIZED);

    pub fn from_address(addr: Address) -> Self {
        Self(OpaquePointer::from_address(addr))
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// A thread that owns a [`crate::plan::Mutator`]. Functions taking it run in the context
/// of that application thread.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct VMMutatorThread(pub VMThread);

unsafe impl Zeroable for VMMutatorThread {}

/// A collector worker thread. Functions taking it run in the context of that worker.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct VMWorkerThread(pub VMThread);
