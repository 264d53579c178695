//! Stopping and restarting the world.
//!
//! The collector never talks to application threads directly. It asks the [`Companion`]
//! for a state, the companion asks the [`VmThread`] to run a [`StwOperation`], and threads
//! blocked for a collection wait on the [`GcNotifier`].

mod companion;
mod gc_notifier;
mod thread_role;
mod vm_operation;

pub use companion::{Companion, StwState};
pub use gc_notifier::GcNotifier;
pub use thread_role::ThreadRole;
pub use vm_operation::{HeapLock, StwOperation, VmOperation, VmThread};
