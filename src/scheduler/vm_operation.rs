//! Operations that run on the VM thread inside a safepoint, and the thread that runs them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};

use super::companion::Companion;
use super::thread_role::ThreadRole;
use crate::vm::HostVm;

/// An operation executed by the VM thread while every application thread is halted.
pub trait VmOperation: Send {
    fn name(&self) -> &'static str;

    /// Runs on the requesting thread before the operation is handed over.
    fn doit_prologue(&mut self) {}

    /// Runs on the VM thread inside the safepoint.
    fn doit(&mut self);

    /// Runs on the requesting thread after the safepoint has ended.
    fn doit_epilogue(&mut self) {}
}

enum Request {
    Execute(Box<dyn VmOperation>, Sender<Box<dyn VmOperation>>),
    Terminate,
}

/// The VM thread: a dedicated thread that executes [`VmOperation`]s one at a time, each
/// inside its own safepoint.
pub struct VmThread {
    requests: Sender<Request>,
    at_safepoint: Arc<AtomicBool>,
    host: Arc<dyn HostVm>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl VmThread {
    pub fn spawn(host: Arc<dyn HostVm>) -> Self {
        let (requests, receiver) = channel::unbounded();
        let at_safepoint = Arc::new(AtomicBool::new(false));
        let handle = {
            let host = host.clone();
            let at_safepoint = at_safepoint.clone();
            std::thread::Builder::new()
                .name("VM Thread".to_string())
                .spawn(move || Self::run(receiver, host, at_safepoint))
                .unwrap_or_else(|e| panic!("Failed to spawn the VM thread: {}", e))
        };
        Self {
            requests,
            at_safepoint,
            host,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn run(receiver: Receiver<Request>, host: Arc<dyn HostVm>, at_safepoint: Arc<AtomicBool>) {
        ThreadRole::bind_current(ThreadRole::VmThread);
        for request in receiver.iter() {
            match request {
                Request::Execute(mut op, done) => {
                    debug!("VM thread: evaluating {}", op.name());
                    Self::evaluate_at_safepoint(&*host, &at_safepoint, &mut *op);
                    // The requester is blocked on the reply, so this only fails if it died.
                    if done.send(op).is_err() {
                        warn!("VM thread: the requester of an operation has gone away");
                    }
                }
                Request::Terminate => break,
            }
        }
        debug!("VM thread: terminated");
    }

    fn evaluate_at_safepoint(host: &dyn HostVm, at_safepoint: &AtomicBool, op: &mut dyn VmOperation) {
        host.safepoint_begin();
        at_safepoint.store(true, Ordering::SeqCst);
        op.doit();
        at_safepoint.store(false, Ordering::SeqCst);
        host.safepoint_end();
    }

    pub fn is_at_safepoint(&self) -> bool {
        self.at_safepoint.load(Ordering::SeqCst)
    }

    /// Execute `op` and return once it has completed.
    ///
    /// On the VM thread itself the operation is evaluated inline, without prologue and
    /// epilogue, and only opens a safepoint if none is open yet.
    pub fn execute(&self, mut op: Box<dyn VmOperation>) {
        if ThreadRole::current() == ThreadRole::VmThread {
            trace!("VM thread: evaluating {} inline", op.name());
            if self.is_at_safepoint() {
                op.doit();
            } else {
                Self::evaluate_at_safepoint(&*self.host, &self.at_safepoint, &mut *op);
            }
            return;
        }

        op.doit_prologue();
        let (done, finished) = channel::bounded(1);
        if self.requests.send(Request::Execute(op, done)).is_err() {
            panic!("The VM thread has terminated");
        }
        let mut op = match finished.recv() {
            Ok(op) => op,
            Err(_) => panic!("The VM thread terminated before completing an operation"),
        };
        op.doit_epilogue();
    }

    /// Stop the thread after the queued operations have run.
    pub fn shutdown(&self) {
        // An error means the thread already stopped.
        let _ = self.requests.send(Request::Terminate);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("The VM thread panicked");
            }
        }
    }
}

/// The VM's heap lock. Held for the whole stop-the-world operation. Threads waiting for
/// the reference-pending list wait on it for a notification.
#[derive(Default)]
pub struct HeapLock {
    sync: Mutex<HeapLockSync>,
    cond: Condvar,
}

#[derive(Default)]
struct HeapLockSync {
    locked: bool,
    notifications: usize,
}

impl HeapLock {
    pub fn lock(&self) {
        let mut sync = self.sync.lock().unwrap();
        while sync.locked {
            sync = self.cond.wait(sync).unwrap();
        }
        sync.locked = true;
    }

    pub fn unlock(&self) {
        let mut sync = self.sync.lock().unwrap();
        assert!(sync.locked, "Heap lock is not held");
        sync.locked = false;
        self.cond.notify_all();
    }

    pub fn is_locked(&self) -> bool {
        self.sync.lock().unwrap().locked
    }

    pub fn notify_all(&self) {
        self.sync.lock().unwrap().notifications += 1;
        self.cond.notify_all();
    }

    /// Block until the next [`HeapLock::notify_all`].
    pub fn wait_for_notification(&self) {
        let mut sync = self.sync.lock().unwrap();
        let seen = sync.notifications;
        while sync.notifications == seen {
            sync = self.cond.wait(sync).unwrap();
        }
    }

    pub fn notifications(&self) -> usize {
        self.sync.lock().unwrap().notifications
    }
}

/// Stops the world for the collector. The VM thread reports the world stopped to the
/// companion and stays in the safepoint until the collector asks for the world back.
pub struct StwOperation {
    companion: Arc<Companion>,
}

impl StwOperation {
    pub fn new(companion: Arc<Companion>) -> Self {
        Self { companion }
    }
}

impl VmOperation for StwOperation {
    fn name(&self) -> &'static str {
        "StwOperation"
    }

    fn doit_prologue(&mut self) {
        self.companion.heap_lock().lock();
    }

    fn doit(&mut self) {
        let host = self.companion.host();
        if host.gc_locker().check_active_before_gc() {
            // The thread leaving the critical region triggers the retry.
            info!("A critical region is active. The pause is abandoned and will be retried.");
            self.companion.set_wait_for_gc_locker();
            return;
        }
        trace!("Entered StwOperation::doit()");
        self.companion.reach_suspended_and_wait_for_resume();
        trace!("Leaving StwOperation::doit()");
    }

    fn doit_epilogue(&mut self) {
        let host = self.companion.host();
        host.cleanup_after_gc();
        if host.has_reference_pending_list() {
            self.companion.heap_lock().notify_all();
        }
        self.companion.heap_lock().unlock();
    }
}
