//! The baseline-compiler rendering.
//!
//! A barrier is emitted as a straight-line instruction list over virtual registers. Rare
//! paths (the slow call, the patching medium path) live in out-of-line stubs that are
//! placed after the main body and jump back to a continuation label, the way a template
//! compiler lays out its code stubs.
//!
//! [`CodeBlob::run`] executes the emitted code against a [`BarrierEnv`]; values the access
//! itself produces (the base, the slot address, the loaded value) enter through
//! [`Insn::Arg`]. A patched field's slot is only materialized inside its stub.

use std::fmt;

use super::*;
use crate::util::options::LoadBarrierMode;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VReg(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(VReg),
    Imm(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    Equal,
    NotEqual,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Insn {
    Arg { dst: VReg, arg: AccessOperand },
    Move { dst: VReg, src: Operand },
    UnsignedShiftRight { dst: VReg, amount: Operand },
    LogicalAnd { dst: VReg, mask: Operand },
    /// `dst = *(u8*)(base + index)` from side metadata.
    LoadByte { dst: VReg, base: VReg, index: VReg },
    LoadMarkingFlag { dst: VReg },
    InstanceOfReference { dst: VReg, object: VReg },
    Branch {
        cond: Cond,
        lhs: VReg,
        rhs: Operand,
        target: Label,
    },
    Jump(Label),
    Bind(Label),
    CallLeaf { entry: RuntimeEntry, args: Vec<VReg> },
    RawCopy { src: VReg, dst: VReg, size: VReg },
    Fence,
    Return,
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Bind(l) => write!(f, "L{}:", l.0),
            Insn::CallLeaf { entry, args } => write!(f, "  call {} {:?}", entry.symbol(), args),
            other => write!(f, "  {:?}", other),
        }
    }
}

enum StubKind {
    Write {
        src: VReg,
        slot: Option<VReg>,
        value: VReg,
    },
    ReferenceLoad {
        value: VReg,
    },
}

struct Stub {
    entry: Label,
    continuation: Label,
    kind: StubKind,
}

/// Generates the code for one access.
pub struct LirGenerator<'c> {
    config: &'c BarrierConfig,
    insns: Vec<Insn>,
    stubs: Vec<Stub>,
    next_reg: u32,
    next_label: u32,
}

impl<'c> LirGenerator<'c> {
    pub fn new(config: &'c BarrierConfig) -> Self {
        Self {
            config,
            insns: vec![],
            stubs: vec![],
            next_reg: 0,
            next_label: 0,
        }
    }

    fn new_register(&mut self) -> VReg {
        self.next_reg += 1;
        VReg(self.next_reg - 1)
    }

    fn new_label(&mut self) -> Label {
        self.next_label += 1;
        Label(self.next_label - 1)
    }

    fn arg(&mut self, arg: AccessOperand) -> VReg {
        let dst = self.new_register();
        self.insns.push(Insn::Arg { dst, arg });
        dst
    }

    fn add_stub(&mut self, kind: StubKind) -> (Label, Label) {
        let entry = self.new_label();
        let continuation = self.new_label();
        self.stubs.push(Stub {
            entry,
            continuation,
            kind,
        });
        (entry, continuation)
    }

    /// Emit the unlog-bit test for `slot`, leaving 0 or 1 in the returned register.
    fn unlog_bit(&mut self, slot: VReg) -> VReg {
        let spec = self.config.unlog_bits;
        let offset = self.new_register();
        self.insns.push(Insn::Move {
            dst: offset,
            src: Operand::Reg(slot),
        });
        self.insns.push(Insn::UnsignedShiftRight {
            dst: offset,
            amount: Operand::Imm(spec.log_bytes_per_meta_byte() as usize),
        });
        let base = self.new_register();
        self.insns.push(Insn::Move {
            dst: base,
            src: Operand::Imm(spec.base.as_usize()),
        });
        let byte = self.new_register();
        self.insns.push(Insn::LoadByte {
            dst: byte,
            base,
            index: offset,
        });
        let shift = self.new_register();
        self.insns.push(Insn::Move {
            dst: shift,
            src: Operand::Reg(slot),
        });
        self.insns.push(Insn::UnsignedShiftRight {
            dst: shift,
            amount: Operand::Imm(spec.log_bytes_in_region as usize),
        });
        self.insns.push(Insn::LogicalAnd {
            dst: shift,
            mask: Operand::Imm(0b111),
        });
        self.insns.push(Insn::UnsignedShiftRight {
            dst: byte,
            amount: Operand::Reg(shift),
        });
        self.insns.push(Insn::LogicalAnd {
            dst: byte,
            mask: Operand::Imm(1),
        });
        byte
    }

    pub fn emit(&mut self, site: &BarrierSite) {
        match site {
            BarrierSite::Store(store) => self.object_reference_write_pre(store),
            BarrierSite::Load(load) => self.load_at_resolved(load),
            BarrierSite::ArrayCopy(copy) => self.arraycopy_prologue(copy),
            BarrierSite::Clone(clone) => self.clone_barrier(clone),
        }
    }

    fn object_reference_write_pre(&mut self, store: &StoreSite) {
        if !store.in_heap || store.is_elidable() {
            return;
        }
        let src = self.arg(AccessOperand::Base);
        let value = self.arg(AccessOperand::Value);
        if store.needs_patching {
            // The stub resolves the slot once the field offset is patched in.
            let (entry, continuation) = self.add_stub(StubKind::Write {
                src,
                slot: None,
                value,
            });
            self.insns.push(Insn::Jump(entry));
            self.insns.push(Insn::Bind(continuation));
            return;
        }
        let slot = self.arg(AccessOperand::Slot);
        let (entry, continuation) = self.add_stub(StubKind::Write {
            src,
            slot: Some(slot),
            value,
        });
        if self.config.fastpath {
            let bit = self.unlog_bit(slot);
            self.insns.push(Insn::Branch {
                cond: Cond::Equal,
                lhs: bit,
                rhs: Operand::Imm(UNLOGGED_VALUE as usize),
                target: entry,
            });
        } else {
            self.insns.push(Insn::Jump(entry));
        }
        self.insns.push(Insn::Bind(continuation));
    }

    fn load_at_resolved(&mut self, load: &LoadSite) {
        if !load.needs_barrier(self.config) {
            return;
        }
        let cont_anonymous = if load.strength == ReferenceStrength::Unknown {
            let label = self.new_label();
            self.generate_referent_check(label);
            Some(label)
        } else {
            None
        };
        let value = self.arg(AccessOperand::Value);
        let (entry, continuation) = self.add_stub(StubKind::ReferenceLoad { value });
        let flag = self.new_register();
        self.insns.push(Insn::LoadMarkingFlag { dst: flag });
        self.insns.push(Insn::Branch {
            cond: Cond::NotEqual,
            lhs: flag,
            rhs: Operand::Imm(0),
            target: entry,
        });
        self.insns.push(Insn::Bind(continuation));
        if let Some(label) = cont_anonymous {
            self.insns.push(Insn::Bind(label));
        }
    }

    /// Skip to `cont` unless the access reads the referent of a `Reference`.
    fn generate_referent_check(&mut self, cont: Label) {
        let offset = self.arg(AccessOperand::Offset);
        self.insns.push(Insn::Branch {
            cond: Cond::NotEqual,
            lhs: offset,
            rhs: Operand::Imm(self.config.referent_offset as usize),
            target: cont,
        });
        let base = self.arg(AccessOperand::Base);
        let is_ref = self.new_register();
        self.insns.push(Insn::InstanceOfReference {
            dst: is_ref,
            object: base,
        });
        self.insns.push(Insn::Branch {
            cond: Cond::Equal,
            lhs: is_ref,
            rhs: Operand::Imm(0),
            target: cont,
        });
    }

    fn arraycopy_prologue(&mut self, copy: &ArrayCopySite) {
        if !copy.is_oop || copy.dest_uninitialized || self.config.no_arraycopy {
            return;
        }
        let done = self.new_label();
        let count = self.arg(AccessOperand::Count);
        self.insns.push(Insn::Branch {
            cond: Cond::Equal,
            lhs: count,
            rhs: Operand::Imm(0),
            target: done,
        });
        let src = self.arg(AccessOperand::Src);
        let dst = self.arg(AccessOperand::Dst);
        self.insns.push(Insn::CallLeaf {
            entry: RuntimeEntry::ArrayCopyPre,
            args: vec![src, dst, count],
        });
        self.insns.push(Insn::Bind(done));
    }

    fn clone_barrier(&mut self, clone: &CloneSite) {
        let src = self.arg(AccessOperand::Base);
        let dst = self.arg(AccessOperand::Dst);
        let size = self.arg(AccessOperand::Size);
        self.insns.push(Insn::RawCopy { src, dst, size });
        if !clone.dst_just_allocated {
            self.insns.push(Insn::CallLeaf {
                entry: RuntimeEntry::ClonePre,
                args: vec![dst],
            });
            self.insns.push(Insn::Fence);
        }
    }

    fn emit_stub(&mut self, stub: Stub) {
        self.insns.push(Insn::Bind(stub.entry));
        match stub.kind {
            StubKind::Write { src, slot, value } => {
                let patched = slot.is_none();
                let slot = match slot {
                    Some(slot) => slot,
                    None => self.arg(AccessOperand::Slot),
                };
                // Medium path: a patched store still checks the unlog bit.
                if patched && self.config.fastpath {
                    let bit = self.unlog_bit(slot);
                    self.insns.push(Insn::Branch {
                        cond: Cond::NotEqual,
                        lhs: bit,
                        rhs: Operand::Imm(UNLOGGED_VALUE as usize),
                        target: stub.continuation,
                    });
                }
                self.call_write_entry(src, slot, value);
            }
            StubKind::ReferenceLoad { value } => {
                self.insns.push(Insn::Branch {
                    cond: Cond::Equal,
                    lhs: value,
                    rhs: Operand::Imm(0),
                    target: stub.continuation,
                });
                match self.config.load_barrier_mode {
                    LoadBarrierMode::ReferenceCall => self.insns.push(Insn::CallLeaf {
                        entry: RuntimeEntry::LoadReference,
                        args: vec![value],
                    }),
                    LoadBarrierMode::SlotLogging => {
                        let slot = self.arg(AccessOperand::Slot);
                        if self.config.fastpath {
                            let bit = self.unlog_bit(slot);
                            self.insns.push(Insn::Branch {
                                cond: Cond::NotEqual,
                                lhs: bit,
                                rhs: Operand::Imm(UNLOGGED_VALUE as usize),
                                target: stub.continuation,
                            });
                        }
                        self.call_write_entry(value, slot, value);
                    }
                }
            }
        }
        self.insns.push(Insn::Jump(stub.continuation));
    }

    fn call_write_entry(&mut self, src: VReg, slot: VReg, value: VReg) {
        let entry = if self.config.fastpath {
            RuntimeEntry::WriteSlow
        } else {
            RuntimeEntry::WritePre
        };
        self.insns.push(Insn::CallLeaf {
            entry,
            args: vec![src, slot, value],
        });
    }

    /// Lay out the main body followed by the stubs.
    pub fn finish(mut self) -> CodeBlob {
        self.insns.push(Insn::Return);
        let stubs = std::mem::take(&mut self.stubs);
        for stub in stubs {
            self.emit_stub(stub);
        }
        let mut labels = vec![usize::MAX; self.next_label as usize];
        for (pc, insn) in self.insns.iter().enumerate() {
            if let Insn::Bind(label) = insn {
                labels[label.0 as usize] = pc;
            }
        }
        CodeBlob {
            insns: self.insns,
            labels,
            registers: self.next_reg as usize,
        }
    }
}

/// Emit the baseline barrier code for `site`.
pub fn compile(config: &BarrierConfig, site: &BarrierSite) -> CodeBlob {
    let mut gen = LirGenerator::new(config);
    gen.emit(site);
    gen.finish()
}

pub struct CodeBlob {
    insns: Vec<Insn>,
    labels: Vec<usize>,
    registers: usize,
}

impl CodeBlob {
    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    /// No barrier code besides the final return.
    pub fn is_empty(&self) -> bool {
        matches!(self.insns.as_slice(), [Insn::Return])
    }

    /// Execute the code for an access described by `site`.
    pub fn run(&self, site: &BarrierSite, env: &mut dyn BarrierEnv) {
        let mut regs = vec![0usize; self.registers];
        let operand = |regs: &[usize], op: Operand| match op {
            Operand::Reg(r) => regs[r.0 as usize],
            Operand::Imm(imm) => imm,
        };
        let mut pc = 0;
        loop {
            let insn = &self.insns[pc];
            pc += 1;
            match insn {
                Insn::Arg { dst, arg } => regs[dst.0 as usize] = site.operand(*arg),
                Insn::Move { dst, src } => regs[dst.0 as usize] = operand(&regs, *src),
                Insn::UnsignedShiftRight { dst, amount } => {
                    let amount = operand(&regs, *amount);
                    regs[dst.0 as usize] >>= amount;
                }
                Insn::LogicalAnd { dst, mask } => {
                    let mask = operand(&regs, *mask);
                    regs[dst.0 as usize] &= mask;
                }
                Insn::LoadByte { dst, base, index } => {
                    let addr = regs[base.0 as usize].wrapping_add(regs[index.0 as usize]);
                    regs[dst.0 as usize] =
                        env.load_metadata_byte(unsafe { Address::from_usize(addr) }) as usize;
                }
                Insn::LoadMarkingFlag { dst } => {
                    regs[dst.0 as usize] = env.load_marking_flag() as usize
                }
                Insn::InstanceOfReference { dst, object } => {
                    let object = ObjectReference::from_raw_address(unsafe {
                        Address::from_usize(regs[object.0 as usize])
                    });
                    regs[dst.0 as usize] = env.is_reference_instance(object) as usize;
                }
                Insn::Branch {
                    cond,
                    lhs,
                    rhs,
                    target,
                } => {
                    let (l, r) = (regs[lhs.0 as usize], operand(&regs, *rhs));
                    let taken = match cond {
                        Cond::Equal => l == r,
                        Cond::NotEqual => l != r,
                    };
                    if taken {
                        pc = self.labels[target.0 as usize];
                    }
                }
                Insn::Jump(target) => pc = self.labels[target.0 as usize],
                Insn::Bind(_) => {}
                Insn::CallLeaf { entry, args } => {
                    let args: Vec<usize> = args.iter().map(|r| regs[r.0 as usize]).collect();
                    env.slow_call(entry.bind(&args));
                }
                Insn::RawCopy { src, dst, size } => {
                    let obj = |r: &VReg| {
                        ObjectReference::from_raw_address(unsafe {
                            Address::from_usize(regs[r.0 as usize])
                        })
                    };
                    env.raw_copy(obj(src), obj(dst), regs[size.0 as usize]);
                }
                Insn::Fence => env.fence(),
                Insn::Return => return,
            }
        }
    }
}

impl fmt::Display for CodeBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for insn in &self.insns {
            writeln!(f, "{}", insn)?;
        }
        Ok(())
    }
}
