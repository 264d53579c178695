//! The functions the collector calls back into the VM through.
//!
//! Each upcall is a method on [`Runtime`] so it can be exercised on any runtime instance.
//! The `extern "C"` thunks in [`UPCALLS`] forward to the process-wide runtime.

use std::cell::RefCell;
use std::ffi::CString;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, Ordering};

use libc::{c_char, c_void};

use crate::plan::Mutator;
use crate::runtime::{runtime, Runtime};
use crate::scanning::{CollectRootObjects, RootsClosure, ScanObjectClosure};
use crate::scheduler::{StwState, ThreadRole};
use crate::util::alloc::AllocationError;
use crate::util::constants::HEAP_WORD_SIZE;
use crate::util::object_forwarding;
use crate::util::{Address, ObjectReference, OpaquePointer, VMMutatorThread, VMThread};
use crate::vm::{
    EdgesClosure, GcThreadKind, MutatorClosure, RootKind, SlotVisitor, ThreadState,
    TraceSlotFn, Upcalls, WeakStorage,
};

/// Points live weak slots at the new copies of forwarded objects. Compressed slots are
/// left alone.
struct ForwardClosure;

impl SlotVisitor for ForwardClosure {
    fn visit_slot(&mut self, slot: Address) {
        let object: ObjectReference = unsafe { slot.load() };
        if object.is_null() {
            return;
        }
        if let Some(new_object) = object_forwarding::get_forwarded_object(object) {
            trace!("Weak slot {}: {} -> {}", slot, object, new_object);
            unsafe { slot.store(new_object) };
        }
    }

    fn visit_narrow_slot(&mut self, _slot: Address) {}
}

thread_local! {
    static OBJECT_STRING: RefCell<CString> = RefCell::new(CString::default());
}

fn as_ptr(mutator: Option<NonNull<Mutator>>) -> *mut Mutator {
    mutator.map_or(ptr::null_mut(), NonNull::as_ptr)
}

impl Runtime {
    /// Stop the world and hand every mutator to `closure`, which creates the stack
    /// scanning work for it.
    pub fn stop_all_mutators(&self, closure: MutatorClosure) {
        info!("Stopping all mutators");
        self.state.set_stack_scan_work(Some(closure));
        self.host.gc_prologue();
        self.companion.request(StwState::Suspended, true);
        self.collector.report_gc_start();
        for tls in self.host.mutator_threads() {
            if let Some(mutator) = self.host.mutator_of(tls) {
                closure.invoke(mutator.as_ptr());
            }
        }
        debug!("All mutators stopped");
    }

    /// Fix up weak storages, then restart the world and wake threads blocked for this
    /// collection.
    pub fn resume_mutators(&self) {
        info!("Resuming all mutators");
        for storage in (0..).map_while(WeakStorage::from_repr) {
            self.process_weak_storage(storage);
        }
        self.host.gc_epilogue();
        fence(Ordering::SeqCst);
        self.state.set_stack_scan_work(None);
        self.companion.request(StwState::Resumed, true);
        self.gc_notifier.notify_resumed();
        debug!("All mutators resumed");
    }

    /// The stack scanning closure of the current pause, if the world is stopped.
    pub fn stack_scan_work(&self) -> Option<MutatorClosure> {
        self.state.stack_scan_work()
    }

    fn process_weak_storage(&self, storage: WeakStorage) {
        trace!("Processing weak storage {}", storage);
        let collector = &*self.collector;
        let mut is_alive = |object: ObjectReference| !object.is_null() && collector.is_live(object);
        self.host
            .weak_oops_do(storage, &mut is_alive, &mut ForwardClosure);
    }

    /// Process one weak storage by its numeric id.
    pub fn process_weak_ref(&self, id: i32) {
        let storage = WeakStorage::from_repr(id)
            .unwrap_or_else(|| panic!("Unknown weak storage id {}", id));
        self.process_weak_storage(storage);
    }

    pub fn process_nmethods(&self) {
        self.host.fix_nmethod_relocations();
    }

    pub fn spawn_gc_thread(&self, tls: VMThread, kind: i32, ctx: OpaquePointer) {
        let kind = GcThreadKind::from_repr(kind)
            .unwrap_or_else(|| panic!("Unknown GC thread kind {}", kind));
        debug!("Spawning a GC thread: {:?}", kind);
        self.host.spawn_gc_thread(tls, kind, ctx);
    }

    /// Block the calling thread until the next time the world restarts.
    pub fn block_for_gc(&self) {
        let tls = self.host.current_thread();
        let java = self.host.is_java_thread(tls);
        let previous = self.host.thread_state(tls);
        if java {
            self.host.set_thread_state(tls, ThreadState::Blocked);
        }
        debug!("Thread {:?} is blocked for GC", tls);
        self.gc_notifier.block_for_gc();
        if java {
            self.host.set_thread_state(tls, previous);
        }
        debug!("Thread {:?} is resumed after GC", tls);
    }

    pub fn out_of_memory(&self, tls: VMThread, err: AllocationError) {
        warn!("Out of memory on {:?}: {:?}", tls, err);
        self.host.out_of_memory(tls, err);
    }

    pub fn get_next_mutator(&self) -> *mut Mutator {
        as_ptr(self.state.next_mutator(self.host.as_thread_control()))
    }

    pub fn reset_mutator_iterator(&self) {
        self.state.reset_mutator_iterator();
    }

    pub fn get_mmtk_mutator(&self, tls: VMMutatorThread) -> *mut Mutator {
        as_ptr(self.host.mutator_of(tls))
    }

    pub fn is_mutator(&self, tls: VMThread) -> bool {
        !tls.is_null() && !self.host.is_collector_thread(tls)
    }

    /// Move the calling Java thread into the VM. Returns the state to restore with
    /// [`Runtime::leave_vm`].
    pub fn enter_vm(&self) -> i32 {
        let tls = self.host.current_thread();
        assert!(
            self.host.is_java_thread(tls),
            "enter_vm can only be called by Java threads. Found {:?}.",
            tls
        );
        let previous = self.host.thread_state(tls);
        self.host.set_thread_state(tls, ThreadState::InVm);
        previous as i32
    }

    pub fn leave_vm(&self, state: i32) {
        let tls = self.host.current_thread();
        assert!(self.host.is_java_thread(tls));
        assert_eq!(
            self.host.thread_state(tls),
            ThreadState::InVm,
            "leave_vm without a matching enter_vm"
        );
        let state = ThreadState::from_repr(state)
            .unwrap_or_else(|| panic!("Unknown thread state {}", state));
        self.host.set_thread_state(tls, state);
    }

    pub fn scan_object(&self, trace: TraceSlotFn, object: ObjectReference) {
        let mut closure = ScanObjectClosure::new(trace, self.encoding());
        self.host.scan_object(object, &mut closure, true, false);
    }

    pub fn dump_object(&self, object: ObjectReference) {
        info!("{}", self.host.describe_object(object));
    }

    /// The description of `object`, valid until this thread describes another object.
    pub fn dump_object_string(&self, object: ObjectReference) -> *const c_char {
        let description = self.host.describe_object(object).replace('\0', " ");
        OBJECT_STRING.with(|cell| {
            let mut string = cell.borrow_mut();
            *string = CString::new(description).unwrap_or_default();
            string.as_ptr()
        })
    }

    pub fn get_object_size(&self, object: ObjectReference) -> usize {
        self.host.object_size(object)
    }

    pub fn scan_roots(&self, kind: RootKind, closure: EdgesClosure) {
        trace!("Scanning {} roots", kind);
        let mut roots = RootsClosure::new(closure, self.encoding());
        self.host.scan_roots(kind, &mut roots);
    }

    /// Scan the roots of every application thread into one run of buffers.
    pub fn scan_all_thread_roots(&self, closure: EdgesClosure) {
        let mut roots = RootsClosure::new(closure, self.encoding());
        for tls in self.host.mutator_threads() {
            self.host.scan_thread_roots(tls, &mut roots);
        }
    }

    pub fn scan_thread_roots(&self, closure: EdgesClosure, tls: VMMutatorThread) {
        let mut roots = RootsClosure::new(closure, self.encoding());
        self.host.scan_thread_roots(tls, &mut roots);
    }

    /// Report the objects a thread's roots point to, for roots that must not be updated.
    pub fn scan_thread_root_objects(&self, closure: EdgesClosure, tls: VMMutatorThread) {
        let mut objects = CollectRootObjects::new(closure, self.encoding());
        self.host.scan_thread_roots(tls, &mut objects);
    }

    pub fn scan_class_loader_data_graph_roots(&self, closure: EdgesClosure, scan_weak: bool) {
        let mut roots = RootsClosure::new(closure, self.encoding());
        self.host
            .scan_class_loader_data_graph_roots(&mut roots, scan_weak);
    }
}

/// Collector threads are not created by the runtime. They are tagged on first contact.
fn enter_from_collector() -> &'static Runtime {
    if ThreadRole::current() == ThreadRole::Unknown {
        ThreadRole::bind_current(ThreadRole::Collector);
    }
    runtime()
}

extern "C" fn stop_all_mutators(_tls: VMThread, closure: MutatorClosure) {
    enter_from_collector().stop_all_mutators(closure)
}

extern "C" fn resume_mutators(_tls: VMThread) {
    enter_from_collector().resume_mutators()
}

extern "C" fn spawn_gc_thread(tls: VMThread, kind: i32, ctx: *mut c_void) {
    let ctx = OpaquePointer::from_address(Address::from_mut_ptr(ctx));
    runtime().spawn_gc_thread(tls, kind, ctx)
}

extern "C" fn block_for_gc() {
    runtime().block_for_gc()
}

extern "C" fn out_of_memory(tls: VMThread, err: AllocationError) {
    runtime().out_of_memory(tls, err)
}

extern "C" fn get_next_mutator() -> *mut Mutator {
    runtime().get_next_mutator()
}

extern "C" fn reset_mutator_iterator() {
    runtime().reset_mutator_iterator()
}

extern "C" fn scan_object(trace: TraceSlotFn, object: ObjectReference, _tls: OpaquePointer) {
    runtime().scan_object(trace, object)
}

extern "C" fn dump_object(object: ObjectReference) {
    runtime().dump_object(object)
}

extern "C" fn get_object_size(object: ObjectReference) -> usize {
    runtime().get_object_size(object)
}

extern "C" fn get_mmtk_mutator(tls: VMMutatorThread) -> *mut Mutator {
    runtime().get_mmtk_mutator(tls)
}

extern "C" fn is_mutator(tls: VMThread) -> bool {
    runtime().is_mutator(tls)
}

extern "C" fn enter_vm() -> i32 {
    runtime().enter_vm()
}

extern "C" fn leave_vm(state: i32) {
    runtime().leave_vm(state)
}

extern "C" fn compute_klass_mem_layout_checksum() -> usize {
    runtime().host.klass_layout().checksum()
}

extern "C" fn offset_of_static_fields() -> i32 {
    runtime().host.offset_of_static_fields()
}

extern "C" fn static_oop_field_count_offset() -> i32 {
    runtime().host.static_oop_field_count_offset()
}

extern "C" fn referent_offset() -> i32 {
    runtime().host.referent_offset()
}

extern "C" fn discovered_offset() -> i32 {
    runtime().host.discovered_offset()
}

extern "C" fn dump_object_string(object: ObjectReference) -> *const c_char {
    runtime().dump_object_string(object)
}

macro_rules! root_scanners {
    ($($name:ident => $kind:ident),* $(,)?) => {
        $(
            extern "C" fn $name(closure: EdgesClosure) {
                enter_from_collector().scan_roots(RootKind::$kind, closure)
            }
        )*
    };
}

root_scanners! {
    scan_static_roots => Static,
    scan_global_roots => Global,
    scan_universe_roots => Universe,
    scan_jni_handle_roots => JniHandle,
    scan_object_synchronizer_roots => ObjectSynchronizer,
    scan_management_roots => Management,
    scan_jvmti_export_roots => JvmtiExport,
    scan_aot_loader_roots => AotLoader,
    scan_system_dictionary_roots => SystemDictionary,
    scan_code_cache_roots => CodeCache,
    scan_string_table_roots => StringTable,
    scan_weak_processor_roots => WeakProcessor,
    scan_vm_thread_roots => VmThread,
}

extern "C" fn scan_all_thread_roots(closure: EdgesClosure) {
    enter_from_collector().scan_all_thread_roots(closure)
}

extern "C" fn scan_thread_roots(closure: EdgesClosure, tls: VMMutatorThread) {
    enter_from_collector().scan_thread_roots(closure, tls)
}

extern "C" fn scan_thread_root_objects(closure: EdgesClosure, tls: VMMutatorThread) {
    enter_from_collector().scan_thread_root_objects(closure, tls)
}

extern "C" fn scan_class_loader_data_graph_roots(closure: EdgesClosure, scan_weak: bool) {
    enter_from_collector().scan_class_loader_data_graph_roots(closure, scan_weak)
}

extern "C" fn number_of_mutators() -> usize {
    runtime().host.number_of_mutators()
}

extern "C" fn schedule_finalizer() {
    runtime().host.schedule_finalizer()
}

extern "C" fn prepare_for_roots_re_scanning() {
    runtime().host.prepare_for_roots_re_scanning()
}

extern "C" fn object_alignment() -> i32 {
    runtime().host.object_alignment()
}

extern "C" fn process_weak_ref(id: i32) {
    enter_from_collector().process_weak_ref(id)
}

extern "C" fn process_nmethods() {
    enter_from_collector().process_nmethods()
}

/// The upcall table handed to the collector at initialization.
pub static UPCALLS: Upcalls = Upcalls {
    stop_all_mutators,
    resume_mutators,
    spawn_gc_thread,
    block_for_gc,
    out_of_memory,
    get_next_mutator,
    reset_mutator_iterator,
    scan_object,
    dump_object,
    get_object_size,
    get_mmtk_mutator,
    is_mutator,
    enter_vm,
    leave_vm,
    compute_klass_mem_layout_checksum,
    offset_of_static_fields,
    static_oop_field_count_offset,
    referent_offset,
    discovered_offset,
    dump_object_string,
    scan_static_roots,
    scan_global_roots,
    scan_all_thread_roots,
    scan_thread_roots,
    scan_thread_root_objects,
    scan_universe_roots,
    scan_jni_handle_roots,
    scan_object_synchronizer_roots,
    scan_management_roots,
    scan_jvmti_export_roots,
    scan_aot_loader_roots,
    scan_system_dictionary_roots,
    scan_code_cache_roots,
    scan_string_table_roots,
    scan_class_loader_data_graph_roots,
    scan_weak_processor_roots,
    scan_vm_thread_roots,
    number_of_mutators,
    schedule_finalizer,
    prepare_for_roots_re_scanning,
    object_alignment,
    process_weak_ref,
    process_nmethods,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeBuilder;
    use crate::scanning::{to_edges_closure, to_nodes_closure, EdgeReporter};
    use crate::util::test_util::mock_collector::MockCollector;
    use crate::util::test_util::mock_host::{MockHost, MockSlot};
    use crate::util::test_util::{mock_runtime, panic_after, serial_test, FakeHeap, MOCK_HOST};
    use crate::vm::{RootsWorkFactory, TaggedEdge, ThreadControl};
    use std::ffi::CStr;
    use std::sync::Arc;
    use strum::IntoEnumIterator;

    #[derive(Clone, Default)]
    struct Collect {
        edges: Vec<Vec<TaggedEdge>>,
        nodes: Vec<Vec<ObjectReference>>,
    }

    impl RootsWorkFactory<TaggedEdge> for Collect {
        fn create_process_edge_roots_work(&mut self, edges: Vec<TaggedEdge>) {
            self.edges.push(edges);
        }

        fn create_process_node_roots_work(&mut self, nodes: Vec<ObjectReference>) {
            self.nodes.push(nodes);
        }
    }

    fn build(collector: Arc<MockCollector>, host: Arc<MockHost>) -> Runtime {
        RuntimeBuilder::new_no_env_vars().build(collector, host)
    }

    extern "C" fn record_mutator(mutator: *mut Mutator, data: *mut c_void) {
        let seen = unsafe { &mut *(data as *mut Vec<usize>) };
        seen.push(mutator as usize);
    }

    #[test]
    fn stop_and_resume() {
        panic_after(5000, || {
            let collector = Arc::new(MockCollector::default());
            let host = Arc::new(MockHost::with_mutators(3));
            let runtime = build(collector.clone(), host.clone());

            let mut seen: Vec<usize> = vec![];
            let closure = MutatorClosure {
                func: record_mutator,
                data: &mut seen as *mut Vec<usize> as *mut c_void,
            };
            runtime.stop_all_mutators(closure);
            assert!(host.world_stopped.load(Ordering::SeqCst));
            assert_eq!(host.prologues.load(Ordering::SeqCst), 1);
            assert_eq!(collector.report_gc_start.call_count(), 1);
            assert!(runtime.stack_scan_work().is_some());
            let expected: Vec<usize> = host
                .mutator_pointers()
                .iter()
                .map(|m| m.as_ptr() as usize)
                .collect();
            assert_eq!(seen, expected);

            runtime.resume_mutators();
            assert!(!host.world_stopped.load(Ordering::SeqCst));
            assert_eq!(host.epilogues.load(Ordering::SeqCst), 1);
            assert_eq!(host.cleanups.load(Ordering::SeqCst), 1);
            assert!(runtime.stack_scan_work().is_none());
            assert_eq!(runtime.gc_notifier.start_the_world_count(), 1);
            assert_eq!(
                runtime.companion.states(),
                (StwState::Resumed, StwState::Resumed)
            );
            runtime.shutdown();
        })
    }

    #[test]
    fn resume_fixes_up_weak_slots() {
        panic_after(5000, || {
            let heap = FakeHeap::new(128);
            let object = |offset: usize| ObjectReference::from_raw_address(heap.start() + offset);
            let (moved, copy, dead, stays) = (object(0), object(32), object(64), object(96));
            object_forwarding::write_forwarding_pointer(moved, copy);

            let cells: Vec<usize> = vec![moved.value(), dead.value(), stays.value(), 0];
            let slots: Vec<Address> = cells.iter().map(Address::from_ref).collect();

            let collector = Arc::new(MockCollector::default());
            collector.set_live(moved);
            collector.set_live(stays);
            let host = Arc::new(MockHost::default());
            host.set_weak_slots(WeakStorage::VmWeak, slots);
            let runtime = build(collector, host);

            runtime.stop_all_mutators(MutatorClosure {
                func: record_mutator,
                data: &mut Vec::<usize>::new() as *mut Vec<usize> as *mut c_void,
            });
            runtime.resume_mutators();
            assert_eq!(cells, vec![copy.value(), 0, stays.value(), 0]);
            runtime.shutdown();
        })
    }

    #[test]
    fn blocked_threads_wake_after_resume() {
        panic_after(5000, || {
            let host = Arc::new(MockHost::with_mutators(1));
            let runtime = Arc::new(build(Arc::new(MockCollector::default()), host.clone()));

            let blocked = {
                let runtime = runtime.clone();
                let host = host.clone();
                std::thread::spawn(move || {
                    MockHost::attach_current_thread(MockHost::thread(1).0);
                    ThreadRole::bind_current(ThreadRole::Mutator);
                    runtime.block_for_gc();
                    host.thread_state(MockHost::thread(1).0)
                })
            };
            while runtime.gc_notifier.start_the_world_count() == 0 || !blocked.is_finished() {
                let mut seen = vec![];
                runtime.stop_all_mutators(MutatorClosure {
                    func: record_mutator,
                    data: &mut seen as *mut Vec<usize> as *mut c_void,
                });
                runtime.resume_mutators();
            }
            assert_eq!(blocked.join().unwrap(), ThreadState::InJava);
            runtime.shutdown();
        })
    }

    #[test]
    fn enter_and_leave_vm() {
        let host = Arc::new(MockHost::with_mutators(1));
        let runtime = build(Arc::new(MockCollector::default()), host.clone());
        let tls = MockHost::thread(1).0;
        MockHost::attach_current_thread(tls);

        let previous = runtime.enter_vm();
        assert_eq!(previous, ThreadState::InJava as i32);
        assert_eq!(host.thread_state(tls), ThreadState::InVm);
        runtime.leave_vm(previous);
        assert_eq!(host.thread_state(tls), ThreadState::InJava);

        MockHost::attach_current_thread(VMThread::UNINITIALIZED);
        runtime.shutdown();
    }

    #[test]
    #[should_panic(expected = "enter_vm can only be called by Java threads")]
    fn enter_vm_from_a_native_thread() {
        let runtime = build(Arc::new(MockCollector::default()), Arc::new(MockHost::default()));
        runtime.enter_vm();
    }

    #[test]
    fn collector_threads_are_not_mutators() {
        let host = Arc::new(MockHost::with_mutators(1));
        let worker = MockHost::thread(9).0;
        host.register_collector_thread(worker);
        let runtime = build(Arc::new(MockCollector::default()), host);
        assert!(runtime.is_mutator(MockHost::thread(1).0));
        assert!(!runtime.is_mutator(worker));
        assert!(!runtime.is_mutator(VMThread::UNINITIALIZED));
        runtime.shutdown();
    }

    #[test]
    fn gc_threads_and_weak_refs_by_id() {
        let host = Arc::new(MockHost::default());
        let runtime = build(Arc::new(MockCollector::default()), host.clone());
        runtime.spawn_gc_thread(VMThread::UNINITIALIZED, 1, OpaquePointer::UNINITIALIZED);
        runtime.spawn_gc_thread(VMThread::UNINITIALIZED, 0, OpaquePointer::UNINITIALIZED);
        assert_eq!(
            *host.spawned.lock().unwrap(),
            vec![GcThreadKind::Worker, GcThreadKind::Controller]
        );
        runtime.process_weak_ref(WeakStorage::Jfr as i32);
        runtime.process_nmethods();
        assert_eq!(host.nmethod_fixups.load(Ordering::SeqCst), 1);
        runtime.shutdown();
    }

    #[test]
    #[should_panic(expected = "Unknown weak storage id 7")]
    fn unknown_weak_storage() {
        let runtime = build(Arc::new(MockCollector::default()), Arc::new(MockHost::default()));
        runtime.process_weak_ref(7);
    }

    #[test]
    fn root_scans() {
        let host = Arc::new(MockHost::with_mutators(2));
        let (a, b, c, null) = (0x1000usize, 0x2000usize, 0x3000usize, 0usize);
        let slot = |cell: &usize| MockSlot::Wide(Address::from_ref(cell));
        host.set_roots(RootKind::StringTable, vec![slot(&a), slot(&null)]);
        host.set_thread_roots(MockHost::thread(1), vec![slot(&b)]);
        host.set_thread_roots(MockHost::thread(2), vec![slot(&c), slot(&a)]);
        host.set_class_loader_roots(vec![slot(&a)], vec![slot(&b)]);
        let runtime = build(Arc::new(MockCollector::default()), host);

        let reported = |scan: &dyn Fn(EdgesClosure)| -> Vec<Address> {
            let mut reporter = EdgeReporter::new(Collect::default(), 8);
            scan(to_edges_closure(&mut reporter));
            reporter.factory.edges.concat().iter().map(|e| e.raw()).collect()
        };

        assert_eq!(
            reported(&|cl| runtime.scan_roots(RootKind::StringTable, cl)),
            vec![Address::from_ref(&a)]
        );
        assert!(reported(&|cl| runtime.scan_roots(RootKind::CodeCache, cl)).is_empty());
        assert_eq!(
            reported(&|cl| runtime.scan_all_thread_roots(cl)),
            vec![Address::from_ref(&b), Address::from_ref(&c), Address::from_ref(&a)]
        );
        assert_eq!(
            reported(&|cl| runtime.scan_thread_roots(cl, MockHost::thread(2))),
            vec![Address::from_ref(&c), Address::from_ref(&a)]
        );
        assert_eq!(
            reported(&|cl| runtime.scan_class_loader_data_graph_roots(cl, false)).len(),
            1
        );
        assert_eq!(
            reported(&|cl| runtime.scan_class_loader_data_graph_roots(cl, true)).len(),
            2
        );

        let mut reporter = EdgeReporter::new(Collect::default(), 8);
        runtime.scan_thread_root_objects(to_nodes_closure(&mut reporter), MockHost::thread(2));
        let nodes: Vec<usize> = reporter.factory.nodes.concat().iter().map(|o| o.value()).collect();
        assert_eq!(nodes, vec![0x3000, 0x1000]);
        runtime.shutdown();
    }

    #[test]
    fn every_root_kind_is_scanned_separately() {
        let host = Arc::new(MockHost::default());
        let cells: Vec<usize> = RootKind::iter().map(|kind| 0x1000 * (kind as usize + 1)).collect();
        for (kind, cell) in RootKind::iter().zip(&cells) {
            host.set_roots(kind, vec![MockSlot::Wide(Address::from_ref(cell))]);
        }
        let runtime = build(Arc::new(MockCollector::default()), host);
        for (kind, cell) in RootKind::iter().zip(&cells) {
            let mut reporter = EdgeReporter::new(Collect::default(), 4);
            runtime.scan_roots(kind, to_edges_closure(&mut reporter));
            let reported: Vec<Address> = reporter.factory.edges.concat().iter().map(|e| e.raw()).collect();
            assert_eq!(reported, vec![Address::from_ref(cell)], "{} roots", kind);
        }
        runtime.shutdown();
    }

    #[test]
    fn object_queries() {
        let host = Arc::new(MockHost::default());
        let object = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x4_0000) });
        host.add_object(object, vec![], 48);
        let runtime = build(Arc::new(MockCollector::default()), host);
        assert_eq!(runtime.get_object_size(object), 48);
        let description = unsafe { CStr::from_ptr(runtime.dump_object_string(object)) };
        assert_eq!(description.to_str().unwrap(), "mock object 0x40000");
        runtime.shutdown();
    }

    #[test]
    fn upcall_table_reaches_the_installed_runtime() {
        serial_test(|| {
            mock_runtime();
            assert_eq!((UPCALLS.number_of_mutators)(), 2);
            // the VM's setting, not the heap word size
            assert_eq!((UPCALLS.object_alignment)(), MockHost::OBJECT_ALIGNMENT);
            assert_ne!(MockHost::OBJECT_ALIGNMENT, HEAP_WORD_SIZE as i32);
            assert_eq!((UPCALLS.referent_offset)(), MockHost::REFERENT_OFFSET);

            (UPCALLS.reset_mutator_iterator)();
            let mut walked = vec![];
            loop {
                let mutator = (UPCALLS.get_next_mutator)();
                if mutator.is_null() {
                    break;
                }
                walked.push(mutator as usize);
            }
            let expected: Vec<usize> = MOCK_HOST
                .mutator_pointers()
                .iter()
                .map(|m| m.as_ptr() as usize)
                .collect();
            assert_eq!(walked, expected);
            assert_eq!(
                (UPCALLS.get_mmtk_mutator)(MockHost::thread(2)) as usize,
                expected[1]
            );
        })
    }
}
