//! This is for testing the assumption that RootsWorkFactory can work with embedded Box or Arc
//! to hold or share large components in the heap, when the factory sits behind an
//! `EdgeReporter` and receives its buffers from the runtime's root closures.

use std::sync::{Arc, Mutex};

use mmtk_mutator_runtime::scanning::{to_edges_closure, EdgeReporter, RootsClosure};
use mmtk_mutator_runtime::util::{Address, ObjectReference};
use mmtk_mutator_runtime::vm::{RootsWorkFactory, SlotVisitor, TaggedEdge};

static CELLS: [usize; 3] = [0x1000, 0x2000, 0x3000];

fn cell_slots() -> Vec<Address> {
    CELLS.iter().map(Address::from_ref).collect()
}

/// A factory with a plain value, a boxed value and a shared data with Arc.
#[derive(Clone)]
struct MockFactory {
    round: i32,
    v: String,
    #[allow(clippy::box_collection)] // for testing `Box` inside a factory
    b: Box<String>,
    a: Arc<Mutex<String>>,
    reported: Arc<Mutex<Vec<Address>>>,
}

impl MockFactory {
    fn new(round: i32) -> Self {
        Self {
            round,
            v: "y".to_string(),
            b: Box::new("b".to_string()),
            a: Arc::new(Mutex::new("a".to_string())),
            reported: Arc::default(),
        }
    }
}

impl RootsWorkFactory<TaggedEdge> for MockFactory {
    fn create_process_edge_roots_work(&mut self, edges: Vec<TaggedEdge>) {
        match self.round {
            1 => {
                assert_eq!(self.v, "y");
                assert_eq!(*self.b, "b");
                assert_eq!(self.a.lock().unwrap().clone(), "a");
            }
            2 => {
                assert_eq!(self.v, "y");
                assert_eq!(*self.b, "b");
                assert_eq!(self.a.lock().unwrap().clone(), "a2");
            }
            3 => {
                assert_eq!(self.v, "y2");
                assert_eq!(*self.b, "b2");
                assert_eq!(self.a.lock().unwrap().clone(), "a2");
            }
            _ => {
                panic!("Unreachable");
            }
        }
        self.reported
            .lock()
            .unwrap()
            .extend(edges.iter().map(|e| e.untagged_address()));
    }

    fn create_process_node_roots_work(&mut self, _nodes: Vec<ObjectReference>) {
        unimplemented!();
    }
}

fn mock_scan_roots(factory: MockFactory, capacity: usize) {
    let mut reporter = EdgeReporter::new(factory, capacity);
    let mut closure = RootsClosure::new(to_edges_closure(&mut reporter), None);
    for slot in cell_slots() {
        closure.visit_slot(slot);
    }
}

#[test]
fn test_scan() {
    let factory = MockFactory::new(1);
    let reported = factory.reported.clone();
    mock_scan_roots(factory, 2);
    assert_eq!(*reported.lock().unwrap(), cell_slots());
}

#[test]
fn test_clone() {
    let factory1 = MockFactory::new(2);

    let mut factory2 = factory1.clone();
    factory2.round = 3;
    factory2.v = "y2".to_string();
    *factory2.b = "b2".to_string();
    *factory2.a.lock().unwrap() = "a2".to_string();

    let reported = factory1.reported.clone();
    mock_scan_roots(factory1, 1);
    mock_scan_roots(factory2, 8);
    let mut expected = cell_slots();
    expected.extend(cell_slots());
    assert_eq!(*reported.lock().unwrap(), expected);
}
