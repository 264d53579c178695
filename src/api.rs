//! The entry points the VM links against.
//!
//! The safe functions at the top are the Rust API. The `mmtk_*` functions below expose
//! them to native code and forward to the process-wide runtime; the VM is responsible for
//! the pointers it passes in.

// All functions here are extern function. There is no point for marking them as unsafe.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::CStr;
use std::sync::Arc;

use libc::c_char;

use crate::barrier::runtime::RuntimeBarrier;
use crate::barrier::LiveEnv;
use crate::plan::MutatorContext;
use crate::runtime::{self, runtime, InitError, Runtime, RuntimeBuilder};
use crate::scanning;
use crate::util::alloc::AllocationSemantics;
use crate::util::{Address, ObjectReference, VMMutatorThread};
use crate::vm::{Collector, Downcalls, HostCallbacks, HostVm, NativeCollector, NativeHost, Upcalls};

/// Start the runtime over `collector` and `host`, with the options in `builder`
/// overridden by `command_line` (a space-separated `name=value` list).
pub fn initialize_runtime(
    mut builder: RuntimeBuilder,
    command_line: Option<&str>,
    collector: Arc<dyn Collector>,
    host: Arc<dyn HostVm>,
) -> Result<(), InitError> {
    if let Some(options) = command_line {
        builder.set_options_from_command_line(options)?;
    }
    runtime::initialize_runtime(builder, collector, host).map(|_| ())
}

/// Bind the calling thread into `context`, which lives in the VM's thread structure.
pub fn bind_mutator(runtime: &Runtime, context: &mut MutatorContext, tls: VMMutatorThread) {
    *context = MutatorContext::bind(&*runtime.collector, tls);
}

/// Bind `context` to the calling thread if it has not been bound yet and the collector
/// is ready. Contexts are bound on their first allocation or barrier event.
pub fn ensure_bound(runtime: &Runtime, context: &mut MutatorContext) {
    if !context.is_bound() && MutatorContext::is_ready_to_bind(&*runtime.collector) {
        let tls = VMMutatorThread(runtime.host.current_thread());
        trace!("Binding mutator {:?} on first use", tls);
        bind_mutator(runtime, context, tls);
    }
}

pub fn alloc(
    runtime: &Runtime,
    context: &mut MutatorContext,
    size: usize,
    semantics: AllocationSemantics,
) -> Address {
    ensure_bound(runtime, context);
    context.alloc(
        &*runtime.collector,
        runtime.state.allocation_config(),
        size,
        semantics,
    )
}

fn live_env(runtime: &Runtime) -> LiveEnv<'_> {
    LiveEnv::new(
        &runtime.state,
        &*runtime.collector,
        runtime.host.as_object_model(),
    )
}

fn barrier(runtime: &Runtime) -> RuntimeBarrier<'_> {
    RuntimeBarrier::new(runtime.state.barrier_config())
}

/// Initialize the runtime. `options` may be null. A failure is fatal.
#[no_mangle]
pub extern "C" fn mmtk_runtime_init(
    downcalls: &Downcalls,
    host: &HostCallbacks,
    options: *const c_char,
    expected_klass_checksum: usize,
) {
    let result = (|| -> Result<(), InitError> {
        let command_line = if options.is_null() {
            None
        } else {
            let options = unsafe { CStr::from_ptr(options) };
            Some(
                options
                    .to_str()
                    .map_err(|_| InitError::InvalidOptions(options.to_string_lossy().into_owned()))?,
            )
        };
        let mut builder = RuntimeBuilder::new();
        builder.expect_klass_checksum(expected_klass_checksum);
        initialize_runtime(
            builder,
            command_line,
            Arc::new(NativeCollector::new(*downcalls)),
            Arc::new(NativeHost::new(*host)),
        )
    })();
    if let Err(e) = result {
        error!("Failed to initialize the runtime: {}", e);
        panic!("Failed to initialize the runtime: {}", e);
    }
}

/// The upcall table the collector is initialized with.
#[no_mangle]
pub extern "C" fn mmtk_runtime_upcalls() -> *const Upcalls {
    &crate::upcalls::UPCALLS
}

#[no_mangle]
pub extern "C" fn mmtk_is_ready_to_bind() -> bool {
    MutatorContext::is_ready_to_bind(&*runtime().collector)
}

#[no_mangle]
pub extern "C" fn mmtk_bind_mutator(context: *mut MutatorContext, tls: VMMutatorThread) {
    let context = unsafe { &mut *context };
    bind_mutator(runtime(), context, tls)
}

#[no_mangle]
pub extern "C" fn mmtk_alloc(
    context: *mut MutatorContext,
    size: usize,
    semantics: AllocationSemantics,
) -> Address {
    alloc(runtime(), unsafe { &mut *context }, size, semantics)
}

#[no_mangle]
pub extern "C" fn mmtk_flush_mutator(context: *mut MutatorContext) {
    unsafe { &mut *context }.flush(&*runtime().collector)
}

#[no_mangle]
pub extern "C" fn mmtk_destroy_mutator(context: *mut MutatorContext) {
    unsafe { &mut *context }.destroy(&*runtime().collector)
}

#[no_mangle]
pub extern "C" fn mmtk_object_reference_write_pre(
    src: ObjectReference,
    slot: Address,
    target: ObjectReference,
) {
    let runtime = runtime();
    barrier(runtime).object_reference_write_pre(&mut live_env(runtime), src, slot, target)
}

#[no_mangle]
pub extern "C" fn mmtk_load_reference(slot: Address, value: ObjectReference) {
    let runtime = runtime();
    barrier(runtime).load_reference(&mut live_env(runtime), slot, value)
}

/// `context` may be null, in which case the copy is reported without a mutator.
#[no_mangle]
pub extern "C" fn mmtk_object_reference_array_copy_pre(
    context: *mut MutatorContext,
    src: Address,
    dst: Address,
    count: usize,
) {
    let runtime = runtime();
    let env = live_env(runtime);
    let mut env = match unsafe { context.as_mut() } {
        Some(context) => {
            ensure_bound(runtime, context);
            env.with_mutator(&mut context.mutator)
        }
        None => env,
    };
    barrier(runtime).object_reference_array_copy_pre(&mut env, src, dst, count)
}

#[no_mangle]
pub extern "C" fn mmtk_object_reference_clone(
    src: ObjectReference,
    dst: ObjectReference,
    size: usize,
    dst_just_allocated: bool,
) {
    let runtime = runtime();
    barrier(runtime).clone_in_heap(&mut live_env(runtime), src, dst, size, dst_just_allocated)
}

/// Free the last buffer of a root scan.
#[no_mangle]
pub extern "C" fn mmtk_release_buffer(ptr: *mut Address, length: usize, capacity: usize) {
    unsafe { scanning::release_buffer(ptr, length, capacity) }
}

#[no_mangle]
pub extern "C" fn mmtk_set_concurrent_marking_active(active: bool) {
    runtime().state.set_concurrent_marking_active(active)
}

/// The byte compiled barriers read to test for concurrent marking.
#[no_mangle]
pub extern "C" fn mmtk_concurrent_marking_flag_address() -> Address {
    runtime().state.concurrent_marking_flag_address()
}

#[no_mangle]
pub extern "C" fn mmtk_vm_thread_requires_gc_pause() {
    runtime().companion.vm_thread_requires_gc_pause()
}

#[no_mangle]
pub extern "C" fn mmtk_block_vm_thread() {
    runtime().companion.block_vm_thread()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::SlowPathCall;
    use crate::util::test_util::mock_host::MockHost;
    use crate::util::test_util::{mock_runtime, serial_test, MOCK_COLLECTOR};
    use crate::vm::NewBuffer;

    #[test]
    fn command_line_failures_are_reported() {
        let result = initialize_runtime(
            RuntimeBuilder::new_no_env_vars(),
            Some("large_bump_threshold=-1"),
            MOCK_COLLECTOR.clone(),
            Arc::new(MockHost::default()),
        );
        assert_eq!(
            result,
            Err(InitError::InvalidOptions("large_bump_threshold=-1".into()))
        );
    }

    #[test]
    fn second_initialization_fails() {
        serial_test(|| {
            mock_runtime();
            let result = initialize_runtime(
                RuntimeBuilder::new_no_env_vars(),
                None,
                MOCK_COLLECTOR.clone(),
                Arc::new(MockHost::default()),
            );
            assert_eq!(result, Err(InitError::AlreadyInitialized));
        })
    }

    #[test]
    fn mutator_lifecycle() {
        serial_test(|| {
            mock_runtime();
            assert!(mmtk_is_ready_to_bind());
            let mut context = MutatorContext::default();
            mmtk_bind_mutator(&mut context, MockHost::thread(5));
            assert!(context.is_bound());
            let original = context.original().unwrap().as_ptr() as usize;

            // The record starts without a buffer, so this goes to the collector.
            let before = MOCK_COLLECTOR.alloc.call_count();
            let result = mmtk_alloc(&mut context, 64, AllocationSemantics::Default);
            assert_eq!(result, crate::util::test_util::mock_collector::MockCollector::SLOW_PATH_RESULT);
            assert_eq!(MOCK_COLLECTOR.alloc.call_count(), before + 1);

            let flushes = MOCK_COLLECTOR.flush_mutator.call_count();
            mmtk_flush_mutator(&mut context);
            assert_eq!(MOCK_COLLECTOR.flush_mutator.call_count(), flushes + 1);

            mmtk_destroy_mutator(&mut context);
            assert!(!context.is_bound());
            assert_eq!(MOCK_COLLECTOR.released_mutators().last(), Some(&original));
        })
    }

    #[test]
    fn first_use_binds_the_context() {
        serial_test(|| {
            mock_runtime();
            let tls = MockHost::thread(7);
            MockHost::attach_current_thread(tls.0);

            let mut context = MutatorContext::default();
            assert!(!context.is_bound());
            let before = MOCK_COLLECTOR.alloc.call_count();
            mmtk_alloc(&mut context, 64, AllocationSemantics::Default);
            assert!(context.is_bound());
            // the collector saw the bound record, not a zeroed one
            assert_eq!(context.mutator.get_tls(), tls);
            assert_eq!(MOCK_COLLECTOR.alloc.call_count(), before + 1);

            let mut copier = MutatorContext::default();
            let a = unsafe { Address::from_usize(0x8000) };
            mmtk_object_reference_array_copy_pre(&mut copier, a, a + 64usize, 2);
            assert!(copier.is_bound());
            assert_eq!(copier.mutator.get_tls(), tls);

            mmtk_destroy_mutator(&mut context);
            mmtk_destroy_mutator(&mut copier);
            MockHost::attach_current_thread(crate::util::VMThread::UNINITIALIZED);
        })
    }

    #[test]
    fn barrier_entries_reach_the_collector() {
        serial_test(|| {
            mock_runtime();
            // The mock collector publishes a zero metadata base, so the unlog byte of a
            // slot lives at `slot >> 6`.
            let meta = [0xffu8; 1];
            let slot = unsafe { Address::from_usize(Address::from_ref(&meta[0]).as_usize() << 6) };
            let spec = runtime().state.barrier_config().unlog_bits;
            assert_eq!(spec.address_to_meta_address(slot), Address::from_ref(&meta[0]));

            let src = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1000) });
            let target = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x2000) });
            mmtk_object_reference_write_pre(src, slot, target);
            assert_eq!(
                MOCK_COLLECTOR.calls().last(),
                Some(&SlowPathCall::WriteSlow { src, slot, target })
            );

            mmtk_set_concurrent_marking_active(true);
            let flag: u8 = unsafe { mmtk_concurrent_marking_flag_address().load() };
            assert_eq!(flag, 1);
            mmtk_load_reference(slot, target);
            assert_eq!(
                MOCK_COLLECTOR.calls().last(),
                Some(&SlowPathCall::LoadReference(target))
            );
            mmtk_set_concurrent_marking_active(false);
            let calls = MOCK_COLLECTOR.calls().len();
            mmtk_load_reference(slot, target);
            assert_eq!(MOCK_COLLECTOR.calls().len(), calls);

            let mut context = MutatorContext::default();
            let copies = MOCK_COLLECTOR.mutator_array_copies();
            mmtk_object_reference_array_copy_pre(&mut context, slot, slot, 0);
            mmtk_object_reference_array_copy_pre(&mut context, slot, slot, 4);
            assert_eq!(MOCK_COLLECTOR.mutator_array_copies(), copies + 1);
            mmtk_object_reference_array_copy_pre(std::ptr::null_mut(), slot, slot, 4);
            assert_eq!(MOCK_COLLECTOR.mutator_array_copies(), copies + 1);
            assert_eq!(
                MOCK_COLLECTOR.calls().last(),
                Some(&SlowPathCall::ArrayCopyPre { src: slot, dst: slot, count: 4 })
            );
        })
    }

    #[test]
    fn clone_copies_and_reports() {
        serial_test(|| {
            mock_runtime();
            let from = [1usize, 2, 3];
            let mut to = [0usize; 3];
            let src = ObjectReference::from_raw_address(Address::from_ref(&from));
            let dst = ObjectReference::from_raw_address(Address::from_mut_ptr(to.as_mut_ptr()));
            mmtk_object_reference_clone(src, dst, std::mem::size_of_val(&from), false);
            assert_eq!(to, from);
            assert_eq!(MOCK_COLLECTOR.calls().last(), Some(&SlowPathCall::ClonePre(dst)));
        })
    }

    #[test]
    fn upcall_table_is_static() {
        assert_eq!(mmtk_runtime_upcalls(), &crate::upcalls::UPCALLS as *const Upcalls);
    }

    #[test]
    fn released_buffers_are_freed() {
        let mut buffer = std::mem::ManuallyDrop::new(Vec::<Address>::with_capacity(8));
        let fresh = NewBuffer {
            ptr: buffer.as_mut_ptr(),
            capacity: buffer.capacity(),
        };
        unsafe { fresh.ptr.write(Address::ZERO) };
        mmtk_release_buffer(fresh.ptr, 1, fresh.capacity);
    }
}
