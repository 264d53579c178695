//! Types shared with native code across the upcall boundary.

use libc::{c_char, c_void};

use crate::plan::Mutator;
use crate::util::alloc::AllocationError;
use crate::util::{Address, ObjectReference, OpaquePointer, VMMutatorThread, VMThread};

/// A fresh buffer handed out by an edge reporter.
#[repr(C)]
pub struct NewBuffer {
    pub ptr: *mut Address,
    pub capacity: usize,
}

/// A closure for reporting mutators.  The caller passes `data` back as the last argument.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct MutatorClosure {
    pub func: extern "C" fn(mutator: *mut Mutator, data: *mut c_void),
    pub data: *mut c_void,
}

// The closure is stored while the world is stopped and only invoked by the collector
// thread that owns `data`.
unsafe impl Send for MutatorClosure {}

impl MutatorClosure {
    pub fn invoke(&self, mutator: *mut Mutator) {
        (self.func)(mutator, self.data)
    }
}

/// A closure for reporting a filled buffer of root slots (or root objects). The callee
/// takes ownership of `buf` and returns the buffer the caller fills next. Calling it with
/// a null `buf` only asks for a buffer.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct EdgesClosure {
    pub func: extern "C" fn(
        buf: *mut Address,
        size: usize,
        cap: usize,
        data: *mut c_void,
    ) -> NewBuffer,
    pub data: *mut c_void,
}

impl EdgesClosure {
    pub fn invoke(&self, buf: *mut Address, size: usize, cap: usize) -> NewBuffer {
        (self.func)(buf, size, cap, self.data)
    }
}

/// Called once per reference slot of a scanned object, with the tagged slot address.
pub type TraceSlotFn = extern "C" fn(slot: Address);

/// The upcall table handed to the collector. The order is part of the ABI.
#[repr(C)]
pub struct Upcalls {
    pub stop_all_mutators: extern "C" fn(tls: VMThread, closure: MutatorClosure),
    pub resume_mutators: extern "C" fn(tls: VMThread),
    pub spawn_gc_thread: extern "C" fn(tls: VMThread, kind: i32, ctx: *mut c_void),
    pub block_for_gc: extern "C" fn(),
    pub out_of_memory: extern "C" fn(tls: VMThread, err: AllocationError),
    pub get_next_mutator: extern "C" fn() -> *mut Mutator,
    pub reset_mutator_iterator: extern "C" fn(),
    pub scan_object: extern "C" fn(trace: TraceSlotFn, object: ObjectReference, tls: OpaquePointer),
    pub dump_object: extern "C" fn(object: ObjectReference),
    pub get_object_size: extern "C" fn(object: ObjectReference) -> usize,
    pub get_mmtk_mutator: extern "C" fn(tls: VMMutatorThread) -> *mut Mutator,
    pub is_mutator: extern "C" fn(tls: VMThread) -> bool,
    pub enter_vm: extern "C" fn() -> i32,
    pub leave_vm: extern "C" fn(state: i32),
    pub compute_klass_mem_layout_checksum: extern "C" fn() -> usize,
    pub offset_of_static_fields: extern "C" fn() -> i32,
    pub static_oop_field_count_offset: extern "C" fn() -> i32,
    pub referent_offset: extern "C" fn() -> i32,
    pub discovered_offset: extern "C" fn() -> i32,
    pub dump_object_string: extern "C" fn(object: ObjectReference) -> *const c_char,
    pub scan_static_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_global_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_all_thread_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_thread_roots: extern "C" fn(closure: EdgesClosure, tls: VMMutatorThread),
    pub scan_thread_root_objects: extern "C" fn(closure: EdgesClosure, tls: VMMutatorThread),
    pub scan_universe_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_jni_handle_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_object_synchronizer_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_management_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_jvmti_export_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_aot_loader_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_system_dictionary_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_code_cache_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_string_table_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_class_loader_data_graph_roots: extern "C" fn(closure: EdgesClosure, scan_weak: bool),
    pub scan_weak_processor_roots: extern "C" fn(closure: EdgesClosure),
    pub scan_vm_thread_roots: extern "C" fn(closure: EdgesClosure),
    pub number_of_mutators: extern "C" fn() -> usize,
    pub schedule_finalizer: extern "C" fn(),
    pub prepare_for_roots_re_scanning: extern "C" fn(),
    pub object_alignment: extern "C" fn() -> i32,
    pub process_weak_ref: extern "C" fn(id: i32),
    pub process_nmethods: extern "C" fn(),
}
