//! The barrier protocol as a plain interpreter over [`BarrierSite`]s.
//!
//! Each tier must produce exactly the events this interpreter produces for the same site,
//! configuration and environment, given the tier's [`TierFeatures`].

use super::*;
use crate::util::options::LoadBarrierMode;

pub fn interpret(
    config: &BarrierConfig,
    features: TierFeatures,
    site: &BarrierSite,
    env: &mut dyn BarrierEnv,
) {
    match site {
        BarrierSite::Store(store) => {
            if !store.in_heap {
                return;
            }
            if features.elide_constant_null_stores && store.is_elidable() {
                return;
            }
            pre_write(config, env, store.src, store.slot, store.target);
        }
        BarrierSite::Load(load) => {
            if !load.needs_barrier(config) {
                return;
            }
            if load.strength == ReferenceStrength::Unknown {
                if features.unknown_load_short_circuit && load.statically_not_referent(config) {
                    return;
                }
                if load.offset != config.referent_offset {
                    return;
                }
                if !env.is_reference_instance(load.base) {
                    return;
                }
            }
            if env.load_marking_flag() == 0 || load.value.is_null() {
                return;
            }
            match config.load_barrier_mode {
                LoadBarrierMode::ReferenceCall => {
                    env.slow_call(SlowPathCall::LoadReference(load.value))
                }
                LoadBarrierMode::SlotLogging => {
                    pre_write(config, env, load.value, load.slot, load.value)
                }
            }
        }
        BarrierSite::ArrayCopy(copy) => {
            if config.no_arraycopy || !copy.is_oop || copy.dest_uninitialized || copy.count == 0 {
                return;
            }
            env.slow_call(SlowPathCall::ArrayCopyPre {
                src: copy.src,
                dst: copy.dst,
                count: copy.count,
            });
        }
        BarrierSite::Clone(clone) => {
            env.raw_copy(clone.src, clone.dst, clone.size);
            if clone.dst_just_allocated {
                return;
            }
            env.slow_call(SlowPathCall::ClonePre(clone.dst));
            env.fence();
        }
    }
}

fn pre_write(
    config: &BarrierConfig,
    env: &mut dyn BarrierEnv,
    src: ObjectReference,
    slot: Address,
    target: ObjectReference,
) {
    if !config.fastpath {
        env.slow_call(SlowPathCall::WritePre { src, slot, target });
        return;
    }
    let byte = env.load_metadata_byte(config.unlog_bits.address_to_meta_address(slot));
    if config.is_unlogged_in(byte, slot) {
        env.slow_call(SlowPathCall::WriteSlow { src, slot, target });
    }
}
