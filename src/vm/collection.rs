use crate::plan::Mutator;
use crate::util::alloc::AllocationError;
use crate::util::{OpaquePointer, VMMutatorThread, VMThread};

use std::ptr::NonNull;

/// What kind of thread the collector asks the VM to spawn.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::FromRepr)]
pub enum GcThreadKind {
    /// The collector's controller thread.
    Controller = 0,
    /// A collector worker thread.
    Worker = 1,
}

/// The VM's view of where an application thread is executing.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::FromRepr)]
pub enum ThreadState {
    InNative = 0,
    InVm = 1,
    InJava = 2,
    Blocked = 3,
}

/// The VM's critical-region exclusion (the GC locker). While a thread is inside a critical
/// region the collector may not stop the world.
pub trait GcLocker: Send + Sync {
    /// Called by the VM thread inside the pause. Returns true if a critical region is
    /// active, in which case the pause must be abandoned and retried.
    fn check_active_before_gc(&self) -> bool;

    /// Block the calling thread until no critical region is active.
    fn stall_until_clear(&self);
}

/// Thread management services the VM provides to the runtime.
pub trait ThreadControl: Send + Sync {
    /// Snapshot of all application threads, in the VM's iteration order.
    fn mutator_threads(&self) -> Vec<VMMutatorThread>;

    fn number_of_mutators(&self) -> usize {
        self.mutator_threads().len()
    }

    /// The mutator context embedded in an application thread.
    fn mutator_of(&self, tls: VMMutatorThread) -> Option<NonNull<Mutator>>;

    /// The calling thread.
    fn current_thread(&self) -> VMThread;

    /// Whether the thread is one of the collector's worker or controller threads.
    fn is_collector_thread(&self, tls: VMThread) -> bool;

    /// Whether the thread runs managed code.
    fn is_java_thread(&self, tls: VMThread) -> bool;

    /// Create and start a collector thread. `ctx` is handed back to the collector when the
    /// thread starts running.
    fn spawn_gc_thread(&self, tls: VMThread, kind: GcThreadKind, ctx: OpaquePointer);

    /// Report an allocation failure to the VM. The VM usually throws `OutOfMemoryError`.
    fn out_of_memory(&self, tls: VMThread, err: AllocationError);

    fn thread_state(&self, tls: VMThread) -> ThreadState;

    fn set_thread_state(&self, tls: VMThread, state: ThreadState);

    /// Halt every application thread at a safepoint. Called on the VM thread.
    fn safepoint_begin(&self);

    /// Release the application threads halted by [`ThreadControl::safepoint_begin`].
    fn safepoint_end(&self);

    fn gc_locker(&self) -> &dyn GcLocker;

    /// Whether reference processing left objects for the VM's reference handler thread.
    fn has_reference_pending_list(&self) -> bool {
        false
    }

    /// Clean up per-pause VM caches after the world restarts.
    fn cleanup_after_gc(&self) {}

    /// Called before the world stops: reset derived-pointer bookkeeping.
    fn gc_prologue(&self) {}

    /// Called before the world restarts: fix derived pointers and finish nmethod marking.
    fn gc_epilogue(&self) {}
}
