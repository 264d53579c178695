//! An in-process [`HostVm`](crate::vm::HostVm) for tests: a thread list with embedded
//! mutator records, a GC locker, configurable roots and object layouts, and counters for
//! every pause hook.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use bytemuck::Zeroable;

use crate::plan::Mutator;
use crate::util::alloc::AllocationError;
use crate::util::{Address, ObjectReference, OpaquePointer, VMMutatorThread, VMThread};
use crate::vm::{
    GcLocker, GcThreadKind, IsAlive, KlassLayout, ObjectModel, RootKind, RootScanning,
    SlotVisitor, ThreadControl, ThreadState, WeakStorage,
};

/// A reference slot the mock VM reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MockSlot {
    Wide(Address),
    Narrow(Address),
}

impl MockSlot {
    fn visit(self, visitor: &mut dyn SlotVisitor) {
        match self {
            MockSlot::Wide(slot) => visitor.visit_slot(slot),
            MockSlot::Narrow(slot) => visitor.visit_narrow_slot(slot),
        }
    }
}

/// A GC locker whose critical region tests enter and leave by hand.
#[derive(Default)]
pub struct MockGcLocker {
    active: Mutex<bool>,
    cleared: Condvar,
    pub checks: AtomicUsize,
    pub stalls: AtomicUsize,
}

impl MockGcLocker {
    pub fn enter_critical(&self) {
        *self.active.lock().unwrap() = true;
    }

    pub fn exit_critical(&self) {
        *self.active.lock().unwrap() = false;
        self.cleared.notify_all();
    }
}

impl GcLocker for MockGcLocker {
    fn check_active_before_gc(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        *self.active.lock().unwrap()
    }

    fn stall_until_clear(&self) {
        self.stalls.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock().unwrap();
        while *active {
            active = self.cleared.wait(active).unwrap();
        }
    }
}

struct MockThread {
    tls: VMMutatorThread,
    mutator: Option<Box<Mutator>>,
}

thread_local! {
    static CURRENT: Cell<VMThread> = const { Cell::new(VMThread::UNINITIALIZED) };
}

#[derive(Default)]
pub struct MockHost {
    threads: Mutex<Vec<MockThread>>,
    collector_threads: Mutex<HashSet<VMThread>>,
    thread_states: Mutex<HashMap<VMThread, ThreadState>>,
    pub gc_locker: MockGcLocker,
    /// True between `safepoint_begin` and `safepoint_end`.
    pub world_stopped: AtomicBool,
    pub safepoints: AtomicUsize,
    pub prologues: AtomicUsize,
    pub epilogues: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub finalizer_wakeups: AtomicUsize,
    pub nmethod_fixups: AtomicUsize,
    pub re_scan_preparations: AtomicUsize,
    pub reference_pending_list: AtomicBool,
    pub out_of_memory: Mutex<Vec<(VMThread, AllocationError)>>,
    pub spawned: Mutex<Vec<GcThreadKind>>,
    roots: Mutex<HashMap<RootKind, Vec<MockSlot>>>,
    thread_roots: Mutex<HashMap<VMMutatorThread, Vec<MockSlot>>>,
    cld_roots: Mutex<(Vec<MockSlot>, Vec<MockSlot>)>,
    weak_slots: Mutex<HashMap<WeakStorage, Vec<Address>>>,
    objects: Mutex<HashMap<ObjectReference, (Vec<MockSlot>, usize)>>,
    reference_instances: Mutex<HashSet<ObjectReference>>,
    pub klass_layout: KlassLayout,
}

impl MockHost {
    pub const REFERENT_OFFSET: i32 = 16;
    pub const OBJECT_ALIGNMENT: i32 = 16;

    /// A VM with `n` application threads, each bound to a zeroed mutator record.
    pub fn with_mutators(n: usize) -> Self {
        let host = Self::default();
        for i in 0..n {
            host.add_mutator_thread(Self::thread(i + 1));
        }
        host
    }

    /// A distinct, never dereferenced thread handle.
    pub fn thread(id: usize) -> VMMutatorThread {
        VMMutatorThread(VMThread::from_address(unsafe {
            Address::from_usize(0x7f00_0000 + id * 0x100)
        }))
    }

    pub fn add_mutator_thread(&self, tls: VMMutatorThread) {
        let mut mutator: Box<Mutator> = Box::new(Zeroable::zeroed());
        mutator.mutator_tls = tls;
        self.threads.lock().unwrap().push(MockThread {
            tls,
            mutator: Some(mutator),
        });
        self.thread_states
            .lock()
            .unwrap()
            .insert(tls.0, ThreadState::InJava);
    }

    /// Detach the mutator record of the `index`th thread. The thread stays in the list.
    pub fn unbind_mutator(&self, index: usize) {
        self.threads.lock().unwrap()[index].mutator = None;
    }

    pub fn mutator_pointers(&self) -> Vec<NonNull<Mutator>> {
        self.threads
            .lock()
            .unwrap()
            .iter_mut()
            .filter_map(|t| t.mutator.as_deref_mut().map(NonNull::from))
            .collect()
    }

    pub fn register_collector_thread(&self, tls: VMThread) {
        self.collector_threads.lock().unwrap().insert(tls);
    }

    /// Make `tls` the identity of the calling OS thread.
    pub fn attach_current_thread(tls: VMThread) {
        CURRENT.with(|current| current.set(tls));
    }

    pub fn set_roots(&self, kind: RootKind, slots: Vec<MockSlot>) {
        self.roots.lock().unwrap().insert(kind, slots);
    }

    pub fn set_thread_roots(&self, tls: VMMutatorThread, slots: Vec<MockSlot>) {
        self.thread_roots.lock().unwrap().insert(tls, slots);
    }

    pub fn set_class_loader_roots(&self, strong: Vec<MockSlot>, weak: Vec<MockSlot>) {
        *self.cld_roots.lock().unwrap() = (strong, weak);
    }

    /// Full-width slots that hold weak references in `storage`.
    pub fn set_weak_slots(&self, storage: WeakStorage, slots: Vec<Address>) {
        self.weak_slots.lock().unwrap().insert(storage, slots);
    }

    pub fn add_object(&self, object: ObjectReference, fields: Vec<MockSlot>, size: usize) {
        self.objects.lock().unwrap().insert(object, (fields, size));
    }

    pub fn add_reference_instance(&self, object: ObjectReference) {
        self.reference_instances.lock().unwrap().insert(object);
    }
}

impl ThreadControl for MockHost {
    fn mutator_threads(&self) -> Vec<VMMutatorThread> {
        self.threads.lock().unwrap().iter().map(|t| t.tls).collect()
    }

    fn mutator_of(&self, tls: VMMutatorThread) -> Option<NonNull<Mutator>> {
        self.threads
            .lock()
            .unwrap()
            .iter_mut()
            .find(|t| t.tls == tls)
            .and_then(|t| t.mutator.as_deref_mut().map(NonNull::from))
    }

    fn current_thread(&self) -> VMThread {
        CURRENT.with(|current| current.get())
    }

    fn is_collector_thread(&self, tls: VMThread) -> bool {
        self.collector_threads.lock().unwrap().contains(&tls)
    }

    fn is_java_thread(&self, tls: VMThread) -> bool {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.tls.0 == tls)
    }

    fn spawn_gc_thread(&self, _tls: VMThread, kind: GcThreadKind, _ctx: OpaquePointer) {
        self.spawned.lock().unwrap().push(kind);
    }

    fn out_of_memory(&self, tls: VMThread, err: AllocationError) {
        self.out_of_memory.lock().unwrap().push((tls, err));
    }

    fn thread_state(&self, tls: VMThread) -> ThreadState {
        self.thread_states
            .lock()
            .unwrap()
            .get(&tls)
            .copied()
            .unwrap_or(ThreadState::InNative)
    }

    fn set_thread_state(&self, tls: VMThread, state: ThreadState) {
        self.thread_states.lock().unwrap().insert(tls, state);
    }

    fn safepoint_begin(&self) {
        assert!(
            !self.world_stopped.swap(true, Ordering::SeqCst),
            "nested safepoint"
        );
        self.safepoints.fetch_add(1, Ordering::SeqCst);
    }

    fn safepoint_end(&self) {
        assert!(self.world_stopped.swap(false, Ordering::SeqCst));
    }

    fn gc_locker(&self) -> &dyn GcLocker {
        &self.gc_locker
    }

    fn has_reference_pending_list(&self) -> bool {
        self.reference_pending_list.load(Ordering::SeqCst)
    }

    fn cleanup_after_gc(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn gc_prologue(&self) {
        self.prologues.fetch_add(1, Ordering::SeqCst);
    }

    fn gc_epilogue(&self) {
        self.epilogues.fetch_add(1, Ordering::SeqCst);
    }
}

impl ObjectModel for MockHost {
    fn scan_object(
        &self,
        object: ObjectReference,
        visitor: &mut dyn SlotVisitor,
        _follow_clds: bool,
        _claim_clds: bool,
    ) {
        let fields = self
            .objects
            .lock()
            .unwrap()
            .get(&object)
            .map(|(fields, _)| fields.clone())
            .unwrap_or_default();
        for field in fields {
            field.visit(visitor);
        }
    }

    fn object_size(&self, object: ObjectReference) -> usize {
        self.objects
            .lock()
            .unwrap()
            .get(&object)
            .map_or(0, |(_, size)| *size)
    }

    fn describe_object(&self, object: ObjectReference) -> String {
        format!("mock object {}", object)
    }

    fn klass_layout(&self) -> KlassLayout {
        self.klass_layout
    }

    fn offset_of_static_fields(&self) -> i32 {
        112
    }

    fn static_oop_field_count_offset(&self) -> i32 {
        104
    }

    fn referent_offset(&self) -> i32 {
        Self::REFERENT_OFFSET
    }

    fn discovered_offset(&self) -> i32 {
        Self::REFERENT_OFFSET + 16
    }

    fn object_alignment(&self) -> i32 {
        Self::OBJECT_ALIGNMENT
    }

    fn is_reference_instance(&self, object: ObjectReference) -> bool {
        self.reference_instances.lock().unwrap().contains(&object)
    }
}

impl RootScanning for MockHost {
    fn scan_roots(&self, kind: RootKind, visitor: &mut dyn SlotVisitor) {
        let slots = self
            .roots
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        for slot in slots {
            slot.visit(visitor);
        }
    }

    fn scan_thread_roots(&self, tls: VMMutatorThread, visitor: &mut dyn SlotVisitor) {
        let slots = self
            .thread_roots
            .lock()
            .unwrap()
            .get(&tls)
            .cloned()
            .unwrap_or_default();
        for slot in slots {
            slot.visit(visitor);
        }
    }

    fn scan_class_loader_data_graph_roots(&self, visitor: &mut dyn SlotVisitor, scan_weak: bool) {
        let (strong, weak) = self.cld_roots.lock().unwrap().clone();
        for slot in strong {
            slot.visit(visitor);
        }
        if scan_weak {
            for slot in weak {
                slot.visit(visitor);
            }
        }
    }

    fn weak_oops_do(
        &self,
        storage: WeakStorage,
        is_alive: &mut IsAlive<'_>,
        forward: &mut dyn SlotVisitor,
    ) {
        let slots = self
            .weak_slots
            .lock()
            .unwrap()
            .get(&storage)
            .cloned()
            .unwrap_or_default();
        for slot in slots {
            let object: ObjectReference = unsafe { slot.load() };
            if object.is_null() {
                continue;
            }
            if is_alive(object) {
                forward.visit_slot(slot);
            } else {
                unsafe { slot.store(ObjectReference::NULL) };
            }
        }
    }

    fn schedule_finalizer(&self) {
        self.finalizer_wakeups.fetch_add(1, Ordering::SeqCst);
    }

    fn prepare_for_roots_re_scanning(&self) {
        self.re_scan_preparations.fetch_add(1, Ordering::SeqCst);
    }

    fn fix_nmethod_relocations(&self) {
        self.nmethod_fixups.fetch_add(1, Ordering::SeqCst);
    }
}
