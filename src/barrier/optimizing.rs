//! The optimizing-compiler rendering.
//!
//! Barriers are built with an [`IdealKit`] as structured IR: expression trees, guarded
//! blocks with a branch probability, leaf calls into the collector and memory barriers.
//! The compiler applies its static knowledge while building the graph, so the emitted IR
//! for a site may be empty.

use super::*;
use crate::util::options::LoadBarrierMode;

const PROB_UNLIKELY: f32 = 0.001;

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Con(usize),
    Input(AccessOperand),
    URShift(Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    AddP(Box<Node>, Box<Node>),
    /// A raw byte load from side metadata.
    LoadB(Box<Node>),
    /// A byte load of the concurrent-marking flag.
    LoadFlag,
    /// 1 if the object is a `java.lang.ref.Reference`, 0 otherwise (also for null).
    InstanceOfReference(Box<Node>),
}

impl Node {
    pub fn urshift(value: Node, amount: Node) -> Node {
        Node::URShift(Box::new(value), Box::new(amount))
    }

    pub fn and(lhs: Node, rhs: Node) -> Node {
        Node::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn addp(base: Node, offset: Node) -> Node {
        Node::AddP(Box::new(base), Box::new(offset))
    }

    pub fn load_b(addr: Node) -> Node {
        Node::LoadB(Box::new(addr))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoolTest {
    Eq,
    Ne,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemBarKind {
    /// Orders memory operations for the compiler only.
    CpuOrder,
    /// A full fence.
    Volatile,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    IfThen {
        lhs: Node,
        test: BoolTest,
        rhs: Node,
        prob: f32,
        then: Vec<Stmt>,
    },
    LeafCall {
        entry: RuntimeEntry,
        args: Vec<Node>,
    },
    MemBar(MemBarKind),
    /// Copy the object body for a clone.
    CloneCopy { src: Node, dst: Node, size: Node },
}

/// Builds a graph of nested blocks.
#[derive(Default)]
pub struct IdealKit {
    current: Vec<Stmt>,
}

impl IdealKit {
    pub fn if_then(
        &mut self,
        lhs: Node,
        test: BoolTest,
        rhs: Node,
        prob: f32,
        body: impl FnOnce(&mut IdealKit),
    ) {
        let outer = std::mem::take(&mut self.current);
        body(self);
        let then = std::mem::replace(&mut self.current, outer);
        self.current.push(Stmt::IfThen {
            lhs,
            test,
            rhs,
            prob,
            then,
        });
    }

    pub fn make_leaf_call(&mut self, entry: RuntimeEntry, args: Vec<Node>) {
        debug_assert_eq!(args.len(), entry.arity());
        self.current.push(Stmt::LeafCall { entry, args });
    }

    pub fn insert_mem_bar(&mut self, kind: MemBarKind) {
        self.current.push(Stmt::MemBar(kind));
    }

    pub fn clone_copy(&mut self, src: Node, dst: Node, size: Node) {
        self.current.push(Stmt::CloneCopy { src, dst, size });
    }

    pub fn finish(self) -> Graph {
        Graph { body: self.current }
    }
}

/// Emits barrier IR for accesses.
pub struct BarrierSetC2<'c> {
    config: &'c BarrierConfig,
}

impl<'c> BarrierSetC2<'c> {
    pub fn new(config: &'c BarrierConfig) -> Self {
        Self { config }
    }

    pub fn compile(&self, site: &BarrierSite) -> Graph {
        let mut kit = IdealKit::default();
        match site {
            BarrierSite::Store(store) => self.object_reference_write_pre(&mut kit, store),
            BarrierSite::Load(load) => self.load_at_resolved(&mut kit, load),
            BarrierSite::ArrayCopy(copy) => self.arraycopy_prologue(&mut kit, copy),
            BarrierSite::Clone(clone) => self.clone_barrier(&mut kit, clone),
        }
        kit.finish()
    }

    fn object_reference_write_pre(&self, kit: &mut IdealKit, store: &StoreSite) {
        if !store.in_heap || store.is_elidable() {
            return;
        }
        self.insert_write_barrier_common(
            kit,
            Node::Input(AccessOperand::Base),
            Node::Input(AccessOperand::Slot),
            Node::Input(AccessOperand::Value),
        );
    }

    fn insert_write_barrier_common(&self, kit: &mut IdealKit, src: Node, slot: Node, val: Node) {
        if !self.config.fastpath {
            kit.make_leaf_call(RuntimeEntry::WritePre, vec![src, slot, val]);
            return;
        }
        let spec = &self.config.unlog_bits;
        let meta_addr = Node::addp(
            Node::Con(spec.base.as_usize()),
            Node::urshift(
                slot.clone(),
                Node::Con(spec.log_bytes_per_meta_byte() as usize),
            ),
        );
        let byte = Node::load_b(meta_addr);
        let shift = Node::and(
            Node::urshift(slot.clone(), Node::Con(spec.log_bytes_in_region as usize)),
            Node::Con(7),
        );
        let result = Node::and(Node::urshift(byte, shift), Node::Con(1));
        kit.if_then(result, BoolTest::Ne, Node::Con(0), PROB_UNLIKELY, |kit| {
            kit.make_leaf_call(RuntimeEntry::WriteSlow, vec![src, slot, val]);
        });
    }

    fn reference_load_barrier(&self, kit: &mut IdealKit, emit_barrier: bool) {
        kit.if_then(Node::LoadFlag, BoolTest::Ne, Node::Con(0), PROB_UNLIKELY, |kit| {
            let val = Node::Input(AccessOperand::Value);
            kit.if_then(val.clone(), BoolTest::Ne, Node::Con(0), 0.5, |kit| {
                match self.config.load_barrier_mode {
                    LoadBarrierMode::ReferenceCall => {
                        kit.make_leaf_call(RuntimeEntry::LoadReference, vec![val])
                    }
                    LoadBarrierMode::SlotLogging => self.insert_write_barrier_common(
                        kit,
                        val.clone(),
                        Node::Input(AccessOperand::Slot),
                        val,
                    ),
                }
            });
        });
        if emit_barrier {
            kit.insert_mem_bar(MemBarKind::CpuOrder);
        }
    }

    fn load_at_resolved(&self, kit: &mut IdealKit, load: &LoadSite) {
        if !load.needs_barrier(self.config) {
            return;
        }
        if load.strength != ReferenceStrength::Unknown {
            self.reference_load_barrier(kit, true);
            return;
        }
        if self.config.unknown_load_short_circuit && load.statically_not_referent(self.config) {
            trace!("Unknown load at offset {} cannot read a referent", load.offset);
            return;
        }
        let referent_off = Node::Con(self.config.referent_offset as usize);
        kit.if_then(
            Node::Input(AccessOperand::Offset),
            BoolTest::Eq,
            referent_off,
            PROB_UNLIKELY,
            |kit| {
                let is_instof = Node::InstanceOfReference(Box::new(Node::Input(AccessOperand::Base)));
                kit.if_then(is_instof, BoolTest::Eq, Node::Con(1), PROB_UNLIKELY, |kit| {
                    self.reference_load_barrier(kit, false);
                    kit.insert_mem_bar(MemBarKind::CpuOrder);
                });
            },
        );
    }

    fn arraycopy_prologue(&self, kit: &mut IdealKit, copy: &ArrayCopySite) {
        if !copy.is_oop || copy.dest_uninitialized || self.config.no_arraycopy {
            return;
        }
        kit.if_then(
            Node::Input(AccessOperand::Count),
            BoolTest::Ne,
            Node::Con(0),
            0.9,
            |kit| {
                kit.make_leaf_call(
                    RuntimeEntry::ArrayCopyPre,
                    vec![
                        Node::Input(AccessOperand::Src),
                        Node::Input(AccessOperand::Dst),
                        Node::Input(AccessOperand::Count),
                    ],
                )
            },
        );
    }

    fn clone_barrier(&self, kit: &mut IdealKit, clone: &CloneSite) {
        kit.clone_copy(
            Node::Input(AccessOperand::Base),
            Node::Input(AccessOperand::Dst),
            Node::Input(AccessOperand::Size),
        );
        if !clone.dst_just_allocated {
            kit.make_leaf_call(RuntimeEntry::ClonePre, vec![Node::Input(AccessOperand::Dst)]);
            kit.insert_mem_bar(MemBarKind::Volatile);
        }
    }
}

/// The IR for one access.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    pub body: Vec<Stmt>,
}

impl Graph {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Number of leaf calls in the graph.
    pub fn call_count(&self) -> usize {
        fn count(stmts: &[Stmt]) -> usize {
            stmts
                .iter()
                .map(|s| match s {
                    Stmt::IfThen { then, .. } => count(then),
                    Stmt::LeafCall { .. } => 1,
                    _ => 0,
                })
                .sum()
        }
        count(&self.body)
    }

    pub fn run(&self, site: &BarrierSite, env: &mut dyn BarrierEnv) {
        Self::exec(&self.body, site, env)
    }

    fn exec(stmts: &[Stmt], site: &BarrierSite, env: &mut dyn BarrierEnv) {
        for stmt in stmts {
            match stmt {
                Stmt::IfThen {
                    lhs,
                    test,
                    rhs,
                    then,
                    ..
                } => {
                    let l = Self::eval(lhs, site, env);
                    let r = Self::eval(rhs, site, env);
                    let taken = match test {
                        BoolTest::Eq => l == r,
                        BoolTest::Ne => l != r,
                    };
                    if taken {
                        Self::exec(then, site, env);
                    }
                }
                Stmt::LeafCall { entry, args } => {
                    let args: Vec<usize> = args.iter().map(|a| Self::eval(a, site, env)).collect();
                    env.slow_call(entry.bind(&args));
                }
                Stmt::MemBar(MemBarKind::CpuOrder) => {}
                Stmt::MemBar(MemBarKind::Volatile) => env.fence(),
                Stmt::CloneCopy { src, dst, size } => {
                    let src = Self::eval(src, site, env);
                    let dst = Self::eval(dst, site, env);
                    let size = Self::eval(size, site, env);
                    env.raw_copy(Self::object(src), Self::object(dst), size);
                }
            }
        }
    }

    fn object(raw: usize) -> ObjectReference {
        ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) })
    }

    fn eval(node: &Node, site: &BarrierSite, env: &mut dyn BarrierEnv) -> usize {
        match node {
            Node::Con(v) => *v,
            Node::Input(operand) => site.operand(*operand),
            Node::URShift(v, amount) => {
                let v = Self::eval(v, site, env);
                v >> Self::eval(amount, site, env)
            }
            Node::And(l, r) => {
                let l = Self::eval(l, site, env);
                l & Self::eval(r, site, env)
            }
            Node::AddP(base, offset) => {
                let base = Self::eval(base, site, env);
                base.wrapping_add(Self::eval(offset, site, env))
            }
            Node::LoadB(addr) => {
                let addr = Self::eval(addr, site, env);
                env.load_metadata_byte(unsafe { Address::from_usize(addr) }) as usize
            }
            Node::LoadFlag => env.load_marking_flag() as usize,
            Node::InstanceOfReference(object) => {
                let object = Self::object(Self::eval(object, site, env));
                env.is_reference_instance(object) as usize
            }
        }
    }
}
