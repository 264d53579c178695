use crate::util::{Address, ObjectReference, VMMutatorThread};
use crate::vm::edge_shape::Edge;

/// Callback trait of VM scanning functions that report reference slots.
pub trait SlotVisitor {
    /// A word-sized slot.
    fn visit_slot(&mut self, slot: Address);

    /// A 32-bit slot holding a compressed reference.
    fn visit_narrow_slot(&mut self, slot: Address);
}

/// This lets us use a closure as a SlotVisitor when the width does not matter.
impl<F: FnMut(Address)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: Address) {
        self(slot)
    }

    fn visit_narrow_slot(&mut self, slot: Address) {
        self(slot)
    }
}

/// Root-scanning methods use this trait to create work packets for processing roots.
///
/// Notes on the required traits:
///
/// -   `Clone`: The collector may divide one root-scanning call into multiple packets to
///     scan roots in parallel.  In this case, the factory shall be cloned to be given to
///     multiple work packets.
///
/// -   `Send` + 'static: The factory will be given to root-scanning work packets that
///     execute on different GC workers.
pub trait RootsWorkFactory<ES: Edge>: Clone + Send + 'static {
    /// Create work packets to handle root edges.
    ///
    /// The work packet may update the edges.
    fn create_process_edge_roots_work(&mut self, edges: Vec<ES>);

    /// Create work packets to handle nodes pointed by root edges.
    ///
    /// The work packet cannot update root edges, therefore it cannot move the objects.
    /// Register-held thread roots are reported this way.
    fn create_process_node_roots_work(&mut self, nodes: Vec<ObjectReference>);
}

/// The VM's root categories that have a scan entry of their own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum_macros::EnumIter, strum_macros::Display)]
pub enum RootKind {
    Static,
    Global,
    Universe,
    JniHandle,
    ObjectSynchronizer,
    Management,
    JvmtiExport,
    AotLoader,
    SystemDictionary,
    CodeCache,
    StringTable,
    WeakProcessor,
    VmThread,
}

/// Weak reference storages that the collector can ask the runtime to process one by one.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum_macros::FromRepr, strum_macros::Display)]
pub enum WeakStorage {
    JniHandles = 0,
    JvmtiExport = 1,
    VmWeak = 2,
    Jfr = 3,
}

/// The liveness query handed to weak processing.
pub type IsAlive<'a> = dyn FnMut(ObjectReference) -> bool + 'a;

/// VM-specific root enumeration.
pub trait RootScanning: Send + Sync {
    /// Report the slots of one root category.
    fn scan_roots(&self, kind: RootKind, visitor: &mut dyn SlotVisitor);

    /// Report the stack and handle slots of one application thread.
    fn scan_thread_roots(&self, tls: VMMutatorThread, visitor: &mut dyn SlotVisitor);

    /// Report the class loader data graph, optionally including weakly held loaders.
    fn scan_class_loader_data_graph_roots(&self, visitor: &mut dyn SlotVisitor, scan_weak: bool);

    /// Clear dead weak slots of one storage and let `forward` fix up the live ones.
    fn weak_oops_do(
        &self,
        storage: WeakStorage,
        is_alive: &mut IsAlive<'_>,
        forward: &mut dyn SlotVisitor,
    );

    /// Wake the finalizer thread.
    fn schedule_finalizer(&self);

    /// Prepare derived pointers before roots are scanned a second time.
    fn prepare_for_roots_re_scanning(&self) {}

    /// Fix the embedded oops of compiled code after objects moved.
    fn fix_nmethod_relocations(&self) {}
}
