//! A [`HostVm`](crate::vm::HostVm) backed by callbacks the VM registers at startup.

use std::ffi::CStr;
use std::ptr::NonNull;

use libc::{c_char, c_void};

use crate::plan::Mutator;
use crate::util::alloc::AllocationError;
use crate::util::{Address, ObjectReference, OpaquePointer, VMMutatorThread, VMThread};
use crate::vm::collection::{GcLocker, GcThreadKind, ThreadControl, ThreadState};
use crate::vm::object_model::{KlassLayout, ObjectModel};
use crate::vm::scanning::{IsAlive, RootKind, RootScanning, SlotVisitor, WeakStorage};

/// A slot visitor in a form native code can call.
#[repr(C)]
pub struct SlotVisitorCallbacks {
    pub visit_slot: extern "C" fn(data: *mut c_void, slot: Address),
    pub visit_narrow_slot: extern "C" fn(data: *mut c_void, slot: Address),
    pub data: *mut c_void,
}

/// A liveness query in a form native code can call.
#[repr(C)]
pub struct IsAliveCallback {
    pub is_alive: extern "C" fn(data: *mut c_void, object: ObjectReference) -> bool,
    pub data: *mut c_void,
}

/// Receives one thread per call while the VM walks its thread list.
#[repr(C)]
pub struct ThreadVisitorCallback {
    pub visit: extern "C" fn(data: *mut c_void, tls: VMMutatorThread),
    pub data: *mut c_void,
}

extern "C" fn visit_slot_trampoline(data: *mut c_void, slot: Address) {
    let visitor = unsafe { &mut *(data as *mut &mut dyn SlotVisitor) };
    visitor.visit_slot(slot)
}

extern "C" fn visit_narrow_slot_trampoline(data: *mut c_void, slot: Address) {
    let visitor = unsafe { &mut *(data as *mut &mut dyn SlotVisitor) };
    visitor.visit_narrow_slot(slot)
}

extern "C" fn is_alive_trampoline(data: *mut c_void, object: ObjectReference) -> bool {
    let is_alive = unsafe { &mut *(data as *mut &mut dyn FnMut(ObjectReference) -> bool) };
    is_alive(object)
}

extern "C" fn push_thread(data: *mut c_void, tls: VMMutatorThread) {
    let threads = unsafe { &mut *(data as *mut Vec<VMMutatorThread>) };
    threads.push(tls);
}

fn slot_visitor_callbacks(visitor: &mut &mut dyn SlotVisitor) -> SlotVisitorCallbacks {
    SlotVisitorCallbacks {
        visit_slot: visit_slot_trampoline,
        visit_narrow_slot: visit_narrow_slot_trampoline,
        data: visitor as *mut &mut dyn SlotVisitor as *mut c_void,
    }
}

/// The VM services, as C functions. The VM fills this in and passes it to
/// `mmtk_runtime_init`.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct HostCallbacks {
    pub for_each_mutator_thread: extern "C" fn(visitor: ThreadVisitorCallback),
    pub number_of_mutators: extern "C" fn() -> usize,
    pub mutator_of: extern "C" fn(tls: VMMutatorThread) -> *mut Mutator,
    pub current_thread: extern "C" fn() -> VMThread,
    pub is_collector_thread: extern "C" fn(tls: VMThread) -> bool,
    pub is_java_thread: extern "C" fn(tls: VMThread) -> bool,
    pub spawn_gc_thread: extern "C" fn(tls: VMThread, kind: GcThreadKind, ctx: *mut c_void),
    pub out_of_memory: extern "C" fn(tls: VMThread, err: AllocationError),
    pub thread_state: extern "C" fn(tls: VMThread) -> ThreadState,
    pub set_thread_state: extern "C" fn(tls: VMThread, state: ThreadState),
    pub safepoint_begin: extern "C" fn(),
    pub safepoint_end: extern "C" fn(),
    pub gc_locker_check_active_before_gc: extern "C" fn() -> bool,
    pub gc_locker_stall_until_clear: extern "C" fn(),
    pub has_reference_pending_list: extern "C" fn() -> bool,
    pub cleanup_after_gc: extern "C" fn(),
    pub gc_prologue: extern "C" fn(),
    pub gc_epilogue: extern "C" fn(),
    pub scan_object: extern "C" fn(
        object: ObjectReference,
        visitor: SlotVisitorCallbacks,
        follow_clds: bool,
        claim_clds: bool,
    ),
    pub object_size: extern "C" fn(object: ObjectReference) -> usize,
    /// Returns a string owned by the VM's resource area.
    pub describe_object: extern "C" fn(object: ObjectReference) -> *const c_char,
    pub klass_layout: extern "C" fn() -> KlassLayout,
    pub offset_of_static_fields: extern "C" fn() -> i32,
    pub static_oop_field_count_offset: extern "C" fn() -> i32,
    pub referent_offset: extern "C" fn() -> i32,
    pub discovered_offset: extern "C" fn() -> i32,
    pub object_alignment: extern "C" fn() -> i32,
    pub is_reference_instance: extern "C" fn(object: ObjectReference) -> bool,
    pub scan_roots: extern "C" fn(kind: i32, visitor: SlotVisitorCallbacks),
    pub scan_thread_roots: extern "C" fn(tls: VMMutatorThread, visitor: SlotVisitorCallbacks),
    pub scan_class_loader_data_graph_roots:
        extern "C" fn(visitor: SlotVisitorCallbacks, scan_weak: bool),
    pub weak_oops_do:
        extern "C" fn(storage: WeakStorage, is_alive: IsAliveCallback, forward: SlotVisitorCallbacks),
    pub schedule_finalizer: extern "C" fn(),
    pub prepare_for_roots_re_scanning: extern "C" fn(),
    pub fix_nmethod_relocations: extern "C" fn(),
}

pub struct NativeHost {
    calls: HostCallbacks,
}

impl NativeHost {
    pub fn new(calls: HostCallbacks) -> Self {
        Self { calls }
    }
}

impl GcLocker for NativeHost {
    fn check_active_before_gc(&self) -> bool {
        (self.calls.gc_locker_check_active_before_gc)()
    }

    fn stall_until_clear(&self) {
        (self.calls.gc_locker_stall_until_clear)()
    }
}

impl ThreadControl for NativeHost {
    fn mutator_threads(&self) -> Vec<VMMutatorThread> {
        let mut threads: Vec<VMMutatorThread> = Vec::new();
        (self.calls.for_each_mutator_thread)(ThreadVisitorCallback {
            visit: push_thread,
            data: &mut threads as *mut Vec<VMMutatorThread> as *mut c_void,
        });
        threads
    }

    fn number_of_mutators(&self) -> usize {
        (self.calls.number_of_mutators)()
    }

    fn mutator_of(&self, tls: VMMutatorThread) -> Option<NonNull<Mutator>> {
        NonNull::new((self.calls.mutator_of)(tls))
    }

    fn current_thread(&self) -> VMThread {
        (self.calls.current_thread)()
    }

    fn is_collector_thread(&self, tls: VMThread) -> bool {
        (self.calls.is_collector_thread)(tls)
    }

    fn is_java_thread(&self, tls: VMThread) -> bool {
        (self.calls.is_java_thread)(tls)
    }

    fn spawn_gc_thread(&self, tls: VMThread, kind: GcThreadKind, ctx: OpaquePointer) {
        (self.calls.spawn_gc_thread)(tls, kind, ctx.to_address().to_mut_ptr())
    }

    fn out_of_memory(&self, tls: VMThread, err: AllocationError) {
        (self.calls.out_of_memory)(tls, err)
    }

    fn thread_state(&self, tls: VMThread) -> ThreadState {
        (self.calls.thread_state)(tls)
    }

    fn set_thread_state(&self, tls: VMThread, state: ThreadState) {
        (self.calls.set_thread_state)(tls, state)
    }

    fn safepoint_begin(&self) {
        (self.calls.safepoint_begin)()
    }

    fn safepoint_end(&self) {
        (self.calls.safepoint_end)()
    }

    fn gc_locker(&self) -> &dyn GcLocker {
        self
    }

    fn has_reference_pending_list(&self) -> bool {
        (self.calls.has_reference_pending_list)()
    }

    fn cleanup_after_gc(&self) {
        (self.calls.cleanup_after_gc)()
    }

    fn gc_prologue(&self) {
        (self.calls.gc_prologue)()
    }

    fn gc_epilogue(&self) {
        (self.calls.gc_epilogue)()
    }
}

impl ObjectModel for NativeHost {
    fn scan_object(
        &self,
        object: ObjectReference,
        mut visitor: &mut dyn SlotVisitor,
        follow_clds: bool,
        claim_clds: bool,
    ) {
        let callbacks = slot_visitor_callbacks(&mut visitor);
        (self.calls.scan_object)(object, callbacks, follow_clds, claim_clds)
    }

    fn object_size(&self, object: ObjectReference) -> usize {
        (self.calls.object_size)(object)
    }

    fn describe_object(&self, object: ObjectReference) -> String {
        let raw = (self.calls.describe_object)(object);
        if raw.is_null() {
            return format!("{}", object);
        }
        unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
    }

    fn klass_layout(&self) -> KlassLayout {
        (self.calls.klass_layout)()
    }

    fn offset_of_static_fields(&self) -> i32 {
        (self.calls.offset_of_static_fields)()
    }

    fn static_oop_field_count_offset(&self) -> i32 {
        (self.calls.static_oop_field_count_offset)()
    }

    fn referent_offset(&self) -> i32 {
        (self.calls.referent_offset)()
    }

    fn discovered_offset(&self) -> i32 {
        (self.calls.discovered_offset)()
    }

    fn object_alignment(&self) -> i32 {
        (self.calls.object_alignment)()
    }

    fn is_reference_instance(&self, object: ObjectReference) -> bool {
        (self.calls.is_reference_instance)(object)
    }
}

impl RootScanning for NativeHost {
    fn scan_roots(&self, kind: RootKind, mut visitor: &mut dyn SlotVisitor) {
        let callbacks = slot_visitor_callbacks(&mut visitor);
        (self.calls.scan_roots)(kind as i32, callbacks)
    }

    fn scan_thread_roots(&self, tls: VMMutatorThread, mut visitor: &mut dyn SlotVisitor) {
        let callbacks = slot_visitor_callbacks(&mut visitor);
        (self.calls.scan_thread_roots)(tls, callbacks)
    }

    fn scan_class_loader_data_graph_roots(
        &self,
        mut visitor: &mut dyn SlotVisitor,
        scan_weak: bool,
    ) {
        let callbacks = slot_visitor_callbacks(&mut visitor);
        (self.calls.scan_class_loader_data_graph_roots)(callbacks, scan_weak)
    }

    fn weak_oops_do(
        &self,
        storage: WeakStorage,
        mut is_alive: &mut IsAlive<'_>,
        mut forward: &mut dyn SlotVisitor,
    ) {
        let is_alive = IsAliveCallback {
            is_alive: is_alive_trampoline,
            data: &mut is_alive as *mut _ as *mut c_void,
        };
        let forward = slot_visitor_callbacks(&mut forward);
        (self.calls.weak_oops_do)(storage, is_alive, forward)
    }

    fn schedule_finalizer(&self) {
        (self.calls.schedule_finalizer)()
    }

    fn prepare_for_roots_re_scanning(&self) {
        (self.calls.prepare_for_roots_re_scanning)()
    }

    fn fix_nmethod_relocations(&self) {
        (self.calls.fix_nmethod_relocations)()
    }
}
