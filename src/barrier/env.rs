use std::collections::{HashMap, HashSet};
use std::sync::atomic::{fence, AtomicU8, Ordering};

use crate::barrier::{BarrierEvent, SlowPathCall};
use crate::global_state::GlobalState;
use crate::plan::Mutator;
use crate::util::metadata::SideMetadataSpec;
use crate::util::{Address, ObjectReference};
use crate::vm::{Collector, ObjectModel};

/// The world as a barrier sees it.
pub trait BarrierEnv {
    /// Load one byte of unlog metadata.
    fn load_metadata_byte(&mut self, meta_addr: Address) -> u8;

    /// Load the concurrent-marking flag.
    fn load_marking_flag(&mut self) -> u8;

    /// Whether `object` is an instance of `java.lang.ref.Reference`. False for null.
    fn is_reference_instance(&mut self, object: ObjectReference) -> bool;

    fn slow_call(&mut self, call: SlowPathCall);

    /// Copy the body of `src` over `dst`.
    fn raw_copy(&mut self, src: ObjectReference, dst: ObjectReference, size: usize);

    fn fence(&mut self);
}

/// The real environment: process memory, the collector's entries and the VM's class checks.
pub struct LiveEnv<'a> {
    state: &'a GlobalState,
    collector: &'a dyn Collector,
    object_model: &'a dyn ObjectModel,
    mutator: Option<&'a mut Mutator>,
}

impl<'a> LiveEnv<'a> {
    pub fn new(
        state: &'a GlobalState,
        collector: &'a dyn Collector,
        object_model: &'a dyn ObjectModel,
    ) -> Self {
        Self {
            state,
            collector,
            object_model,
            mutator: None,
        }
    }

    /// Route array-copy barriers through the mutator-aware entry.
    pub fn with_mutator(mut self, mutator: &'a mut Mutator) -> Self {
        self.mutator = Some(mutator);
        self
    }
}

impl BarrierEnv for LiveEnv<'_> {
    fn load_metadata_byte(&mut self, meta_addr: Address) -> u8 {
        unsafe { meta_addr.atomic_load::<AtomicU8>(Ordering::Relaxed) }
    }

    fn load_marking_flag(&mut self) -> u8 {
        self.state.concurrent_marking_flag()
    }

    fn is_reference_instance(&mut self, object: ObjectReference) -> bool {
        !object.is_null() && self.object_model.is_reference_instance(object)
    }

    fn slow_call(&mut self, call: SlowPathCall) {
        match call {
            SlowPathCall::WriteSlow { src, slot, target } => {
                self.collector
                    .object_reference_write_slow_call(src, slot, target)
            }
            SlowPathCall::WritePre { src, slot, target } => {
                self.collector
                    .object_reference_write_pre_call(src, slot, target)
            }
            SlowPathCall::LoadReference(value) => self.collector.load_reference_call(value),
            SlowPathCall::ArrayCopyPre { src, dst, count } => match self.mutator.as_deref_mut() {
                Some(mutator) => self.collector.array_copy_pre(mutator, src, dst, count),
                None => self
                    .collector
                    .object_reference_array_copy_pre_call(src, dst, count),
            },
            SlowPathCall::ClonePre(dst) => self.collector.object_reference_clone_pre_call(dst),
        }
    }

    fn raw_copy(&mut self, src: ObjectReference, dst: ObjectReference, size: usize) {
        unsafe {
            std::ptr::copy(
                src.to_raw_address().to_ptr::<u8>(),
                dst.to_raw_address().to_mut_ptr::<u8>(),
                size,
            )
        }
    }

    fn fence(&mut self) {
        fence(Ordering::SeqCst);
    }
}

/// A model environment that records every step. Metadata bytes default to zero (logged).
/// When `log_on_slow_write` is set, a `WriteSlow` call logs its slot the way the collector
/// would.
#[derive(Clone, Debug, Default)]
pub struct RecordingEnv {
    pub metadata: HashMap<Address, u8>,
    pub marking_flag: u8,
    pub reference_instances: HashSet<ObjectReference>,
    pub log_on_slow_write: Option<SideMetadataSpec>,
    pub events: Vec<BarrierEvent>,
}

impl RecordingEnv {
    pub fn calls(&self) -> Vec<SlowPathCall> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BarrierEvent::Call(call) => Some(*call),
                _ => None,
            })
            .collect()
    }

    /// Set the unlog bit of `slot`.
    pub fn mark_unlogged(&mut self, spec: &SideMetadataSpec, slot: Address) {
        let byte = self
            .metadata
            .entry(spec.address_to_meta_address(slot))
            .or_insert(0);
        *byte |= 1 << spec.meta_byte_lshift(slot);
    }
}

impl BarrierEnv for RecordingEnv {
    fn load_metadata_byte(&mut self, meta_addr: Address) -> u8 {
        self.events.push(BarrierEvent::LoadMetadata(meta_addr));
        self.metadata.get(&meta_addr).copied().unwrap_or(0)
    }

    fn load_marking_flag(&mut self) -> u8 {
        self.events.push(BarrierEvent::LoadMarkingFlag);
        self.marking_flag
    }

    fn is_reference_instance(&mut self, object: ObjectReference) -> bool {
        self.events
            .push(BarrierEvent::CheckReferenceInstance(object));
        !object.is_null() && self.reference_instances.contains(&object)
    }

    fn slow_call(&mut self, call: SlowPathCall) {
        self.events.push(BarrierEvent::Call(call));
        if let (SlowPathCall::WriteSlow { slot, .. }, Some(spec)) = (call, self.log_on_slow_write)
        {
            if let Some(byte) = self.metadata.get_mut(&spec.address_to_meta_address(slot)) {
                *byte &= !(1 << spec.meta_byte_lshift(slot));
            }
        }
    }

    fn raw_copy(&mut self, src: ObjectReference, dst: ObjectReference, size: usize) {
        self.events.push(BarrierEvent::RawCopy { src, dst, size });
    }

    fn fence(&mut self) {
        self.events.push(BarrierEvent::Fence);
    }
}
