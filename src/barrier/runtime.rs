//! The direct-call rendering: the interpreter, native code and the VM's own accessors call
//! these functions around each reference access.

use super::*;
use crate::util::options::LoadBarrierMode;

/// Barrier entry points for runtime reference accesses.
#[derive(Copy, Clone)]
pub struct RuntimeBarrier<'c> {
    config: &'c BarrierConfig,
}

impl<'c> RuntimeBarrier<'c> {
    pub fn new(config: &'c BarrierConfig) -> Self {
        Self { config }
    }

    /// Run the barrier for one access site.
    pub fn on_access(&self, site: &BarrierSite, env: &mut dyn BarrierEnv) {
        match *site {
            BarrierSite::Store(s) if s.in_heap => {
                self.object_reference_write_pre(env, s.src, s.slot, s.target)
            }
            BarrierSite::Store(_) => {}
            BarrierSite::Load(l) => self.load_reference_at(env, &l),
            BarrierSite::ArrayCopy(c) => {
                if c.is_oop && !c.dest_uninitialized {
                    self.object_reference_array_copy_pre(env, c.src, c.dst, c.count)
                }
            }
            BarrierSite::Clone(c) => self.clone_in_heap(env, c.src, c.dst, c.size, c.dst_just_allocated),
        }
    }

    /// Called before `target` is written into `slot` of `src`.
    pub fn object_reference_write_pre(
        &self,
        env: &mut dyn BarrierEnv,
        src: ObjectReference,
        slot: Address,
        target: ObjectReference,
    ) {
        if self.config.fastpath {
            let spec = &self.config.unlog_bits;
            let meta_addr = spec
                .base
                .wrapping_add(slot >> spec.log_bytes_per_meta_byte() as usize);
            let shift = (slot >> spec.log_bytes_in_region as usize) & 0b111;
            let byte = env.load_metadata_byte(meta_addr);
            if (byte >> shift) & 1 == UNLOGGED_VALUE {
                env.slow_call(SlowPathCall::WriteSlow { src, slot, target });
            }
        } else {
            env.slow_call(SlowPathCall::WritePre { src, slot, target });
        }
    }

    /// Called after a non-strong reference load produced `load.value`.
    pub fn load_reference_at(&self, env: &mut dyn BarrierEnv, load: &LoadSite) {
        if !load.needs_barrier(self.config) {
            return;
        }
        if load.strength == ReferenceStrength::Unknown
            && !(load.offset == self.config.referent_offset && env.is_reference_instance(load.base))
        {
            return;
        }
        self.load_reference(env, load.slot, load.value);
    }

    /// Report `value` if concurrent marking is running.
    pub fn load_reference(&self, env: &mut dyn BarrierEnv, slot: Address, value: ObjectReference) {
        if env.load_marking_flag() != 0 && !value.is_null() {
            match self.config.load_barrier_mode {
                LoadBarrierMode::ReferenceCall => env.slow_call(SlowPathCall::LoadReference(value)),
                LoadBarrierMode::SlotLogging => {
                    self.object_reference_write_pre(env, value, slot, value)
                }
            }
        }
    }

    pub fn object_reference_array_copy_pre(
        &self,
        env: &mut dyn BarrierEnv,
        src: Address,
        dst: Address,
        count: usize,
    ) {
        if self.config.no_arraycopy || count == 0 {
            return;
        }
        env.slow_call(SlowPathCall::ArrayCopyPre { src, dst, count });
    }

    /// Copy `src` into `dst` and report the destination unless it is a fresh allocation.
    pub fn clone_in_heap(
        &self,
        env: &mut dyn BarrierEnv,
        src: ObjectReference,
        dst: ObjectReference,
        size: usize,
        dst_just_allocated: bool,
    ) {
        env.raw_copy(src, dst, size);
        if !dst_just_allocated {
            env.slow_call(SlowPathCall::ClonePre(dst));
            env.fence();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::metadata::SideMetadataTable;
    use crate::util::test_util::FakeHeap;

    #[test]
    fn reads_real_side_metadata() {
        let heap = FakeHeap::new(4096);
        let table = SideMetadataTable::new(heap.start(), heap.end(), false);
        let config = BarrierConfig {
            fastpath: true,
            unlog_bits: table.spec(),
            no_arraycopy: false,
            reference_load_barrier: true,
            load_barrier_mode: LoadBarrierMode::ReferenceCall,
            unknown_load_short_circuit: false,
            referent_offset: 16,
        };
        let slot = heap.start() + 64usize;
        let src = ObjectReference::from_raw_address(heap.start());
        table.spec().mark_as_unlogged(slot);

        let mut env = RecordingEnv::default();
        let meta_addr = table.spec().address_to_meta_address(slot);
        env.metadata
            .insert(meta_addr, table.spec().load_byte(slot));
        RuntimeBarrier::new(&config).object_reference_write_pre(
            &mut env,
            src,
            slot,
            ObjectReference::NULL,
        );
        assert_eq!(
            env.events,
            vec![
                BarrierEvent::LoadMetadata(meta_addr),
                BarrierEvent::Call(SlowPathCall::WriteSlow {
                    src,
                    slot,
                    target: ObjectReference::NULL
                }),
            ]
        );
    }

    #[test]
    fn disabled_array_copy_barrier() {
        let config = BarrierConfig {
            fastpath: true,
            unlog_bits: SideMetadataSpec::unlog_bits(Address::ZERO, true),
            no_arraycopy: true,
            reference_load_barrier: true,
            load_barrier_mode: LoadBarrierMode::ReferenceCall,
            unknown_load_short_circuit: false,
            referent_offset: 12,
        };
        let mut env = RecordingEnv::default();
        let a = unsafe { Address::from_usize(0x1000) };
        RuntimeBarrier::new(&config).object_reference_array_copy_pre(&mut env, a, a + 64usize, 8);
        assert!(env.events.is_empty());
    }
}
