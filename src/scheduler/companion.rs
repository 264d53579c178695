//! The companion thread moves the world between running and stopped on behalf of the
//! collector.
//!
//! A collector thread asks for a state with [`Companion::request`]. The companion wakes
//! up, hands a [`StwOperation`] to the VM thread and blocks until the VM thread has run
//! it. The VM thread halts every application thread, reports `Suspended` and parks inside
//! the safepoint until the collector asks for `Resumed`. Once the operation returns, the
//! companion reports `Resumed`.
//!
//! If a critical region is active when the VM thread checks the GC locker, the operation
//! returns early and the companion retries it once the region is left. The collector is
//! not involved in the retry and keeps waiting for `Suspended`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use super::thread_role::ThreadRole;
use super::vm_operation::{HeapLock, StwOperation, VmThread};
use crate::vm::HostVm;

/// The two states of the world.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::FromRepr)]
pub enum StwState {
    Suspended = 0,
    Resumed = 1,
}

struct CompanionSync {
    /// What the collector asked for.
    desired: StwState,
    /// What the world is in. Differs from `desired` while a transition is in progress.
    reached: StwState,
    /// The VM thread must take the next pause itself.
    vm_thread_requires_gc_pause: bool,
    /// The companion has handed the pending pause to the VM thread.
    vm_thread_suspend_for_gc: bool,
    /// The last pause was abandoned for the GC locker and must be retried.
    wait_for_gc_locker: bool,
    terminate: bool,
}

pub struct Companion {
    sync: Mutex<CompanionSync>,
    cond: Condvar,
    host: Arc<dyn HostVm>,
    heap_lock: HeapLock,
    vm_thread: Arc<VmThread>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Companion {
    pub fn new(host: Arc<dyn HostVm>, vm_thread: Arc<VmThread>) -> Self {
        Self {
            sync: Mutex::new(CompanionSync {
                desired: StwState::Resumed,
                reached: StwState::Resumed,
                vm_thread_requires_gc_pause: false,
                vm_thread_suspend_for_gc: false,
                wait_for_gc_locker: false,
                terminate: false,
            }),
            cond: Condvar::new(),
            host,
            heap_lock: HeapLock::default(),
            vm_thread,
            handle: Mutex::new(None),
        }
    }

    /// Start the companion thread.
    pub fn spawn(self: &Arc<Self>, name: &str) {
        let companion = self.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                ThreadRole::bind_current(ThreadRole::Companion);
                companion.run();
            })
            .unwrap_or_else(|e| panic!("Failed to spawn the companion thread: {}", e));
        *self.handle.lock().unwrap() = Some(handle);
        debug!("Spawned companion thread {:?}", name);
    }

    pub(crate) fn host(&self) -> &dyn HostVm {
        &*self.host
    }

    pub fn heap_lock(&self) -> &HeapLock {
        &self.heap_lock
    }

    pub fn vm_thread(&self) -> &Arc<VmThread> {
        &self.vm_thread
    }

    fn lock(&self) -> MutexGuard<'_, CompanionSync> {
        self.sync.lock().unwrap()
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, CompanionSync>) -> MutexGuard<'a, CompanionSync> {
        self.cond.wait(guard).unwrap()
    }

    fn run(self: Arc<Self>) {
        loop {
            trace!("Companion: waiting for a suspend request");
            if !self.lock().wait_for_gc_locker {
                let mut sync = self.lock();
                assert_eq!(
                    sync.reached,
                    StwState::Resumed,
                    "Threads should be running at this moment."
                );
                while sync.desired != StwState::Suspended && !sync.terminate {
                    sync = self.wait(sync);
                }
                if sync.terminate {
                    debug!("Companion: terminated");
                    return;
                }
                assert_eq!(
                    sync.reached,
                    StwState::Resumed,
                    "Threads should still be running at this moment."
                );
            }

            let vm_thread_pause = {
                let mut sync = self.lock();
                if sync.vm_thread_requires_gc_pause {
                    assert!(
                        !sync.wait_for_gc_locker,
                        "The VM thread is triggering a GC while the companion is waiting for the GC locker"
                    );
                    sync.vm_thread_requires_gc_pause = false;
                    sync.vm_thread_suspend_for_gc = true;
                    self.cond.notify_all();
                    trace!("Companion: letting the VM thread take the pause");
                    while sync.vm_thread_suspend_for_gc {
                        sync = self.wait(sync);
                    }
                    true
                } else {
                    false
                }
            };

            if !vm_thread_pause {
                if self.lock().wait_for_gc_locker {
                    debug!("Companion: waiting for the GC locker to clear");
                    self.host.gc_locker().stall_until_clear();
                    self.lock().wait_for_gc_locker = false;
                }
                trace!("Companion: letting the VM thread execute the pause");
                self.vm_thread
                    .execute(Box::new(StwOperation::new(self.clone())));
            }

            let mut sync = self.lock();
            if !sync.wait_for_gc_locker {
                assert_eq!(
                    sync.desired,
                    StwState::Resumed,
                    "Start-the-world should be requested."
                );
                assert_eq!(
                    sync.reached,
                    StwState::Suspended,
                    "Threads should still be suspended at this moment."
                );
                sync.reached = StwState::Resumed;
                self.cond.notify_all();
                debug!("Companion: the world has resumed");
            }
        }
    }

    fn assert_requester(&self, what: &str) {
        let role = ThreadRole::current();
        assert!(
            role.may_request_pauses(),
            "{} can only be made by collector threads. Found {:?}.",
            what,
            role
        );
        assert!(
            !self.host.is_java_thread(self.host.current_thread()),
            "{} can only be made by collector threads. Found a Java thread.",
            what
        );
    }

    /// Ask for the world to reach `desired`. With `wait_until_reached`, block until it has.
    pub fn request(&self, desired: StwState, wait_until_reached: bool) {
        self.assert_requester("Requests");
        let mut sync = self.lock();
        assert_ne!(
            sync.desired, desired,
            "State {:?} already requested.",
            desired
        );
        debug!("Companion: {:?} requested", desired);
        sync.desired = desired;
        self.cond.notify_all();
        if wait_until_reached {
            while sync.reached != desired {
                sync = self.wait(sync);
            }
            debug!("Companion: {:?} reached", desired);
        }
    }

    /// Block until a state requested earlier is reached.
    pub fn wait_for_reached(&self, desired: StwState) {
        self.assert_requester("Waits");
        let mut sync = self.lock();
        assert_eq!(sync.desired, desired, "State {:?} not requested.", desired);
        while sync.reached != desired {
            sync = self.wait(sync);
        }
    }

    /// Called by the VM thread once every application thread is halted. Blocks until the
    /// collector asks for the world back.
    pub fn reach_suspended_and_wait_for_resume(&self) {
        assert_eq!(
            ThreadRole::current(),
            ThreadRole::VmThread,
            "reach_suspended_and_wait_for_resume can only be executed by the VM thread"
        );
        let mut sync = self.lock();
        sync.reached = StwState::Suspended;
        self.cond.notify_all();
        debug!("Companion: the world has stopped");
        while sync.desired != StwState::Resumed {
            sync = self.wait(sync);
        }
    }

    /// The VM thread is about to trigger a collection and will take the pause itself
    /// through [`Companion::block_vm_thread`].
    pub fn vm_thread_requires_gc_pause(&self) {
        self.lock().vm_thread_requires_gc_pause = true;
    }

    /// Called by the VM thread after [`Companion::vm_thread_requires_gc_pause`]. Waits
    /// until the companion hands the pause over, then runs it on this thread.
    pub fn block_vm_thread(self: &Arc<Self>) {
        {
            let mut sync = self.lock();
            while !sync.vm_thread_suspend_for_gc {
                sync = self.wait(sync);
            }
        }

        self.vm_thread
            .execute(Box::new(StwOperation::new(self.clone())));

        let mut sync = self.lock();
        sync.vm_thread_suspend_for_gc = false;
        self.cond.notify_all();
    }

    pub(crate) fn set_wait_for_gc_locker(&self) {
        self.lock().wait_for_gc_locker = true;
    }

    /// The current `(desired, reached)` pair.
    pub fn states(&self) -> (StwState, StwState) {
        let sync = self.lock();
        (sync.desired, sync.reached)
    }

    /// Stop the companion thread. The world must be running.
    pub fn shutdown(&self) {
        {
            let mut sync = self.lock();
            assert_eq!(
                (sync.desired, sync.reached),
                (StwState::Resumed, StwState::Resumed),
                "The companion can only stop while the world is running"
            );
            sync.terminate = true;
            self.cond.notify_all();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("The companion thread panicked");
            }
        }
    }
}
