//! The two services the runtime sits between.
//!
//! -   The host VM (threads, object layout, roots) is reached through [`HostVm`], which is
//!     split into [`ThreadControl`], [`ObjectModel`] and [`RootScanning`] in the same way
//!     the core crate splits a binding into `Collection`, `ObjectModel` and `Scanning`.
//! -   The collector core is reached through [`Collector`].
//!
//! Both have native implementations over C function tables ([`NativeHost`],
//! [`NativeCollector`]) and can be implemented in Rust for tests.

pub mod collection;
pub mod collector;
pub mod edge_shape;
pub mod ffi;
pub mod native_host;
pub mod object_model;
pub mod scanning;

pub use self::collection::{GcLocker, GcThreadKind, ThreadControl, ThreadState};
pub use self::collector::{AllocatorSizes, Collector, Downcalls, NativeCollector};
pub use self::edge_shape::{CompressedOops, Edge, TaggedEdge};
pub use self::ffi::{EdgesClosure, MutatorClosure, NewBuffer, TraceSlotFn, Upcalls};
pub use self::native_host::{HostCallbacks, NativeHost};
pub use self::object_model::{KlassLayout, ObjectModel};
pub use self::scanning::{
    IsAlive, RootKind, RootScanning, RootsWorkFactory, SlotVisitor, WeakStorage,
};

/// Everything the runtime needs from the host VM.
pub trait HostVm: ThreadControl + ObjectModel + RootScanning + 'static {
    fn as_thread_control(&self) -> &dyn ThreadControl;

    fn as_object_model(&self) -> &dyn ObjectModel;
}

impl<T: ThreadControl + ObjectModel + RootScanning + 'static> HostVm for T {
    fn as_thread_control(&self) -> &dyn ThreadControl {
        self
    }

    fn as_object_model(&self) -> &dyn ObjectModel {
        self
    }
}
