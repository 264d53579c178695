//! Runtime construction and the process-wide instance.

use std::fmt;
use std::sync::Arc;

use crate::abi;
use crate::barrier::BarrierConfig;
use crate::global_state::GlobalState;
use crate::plan::AllocationConfig;
use crate::scheduler::{Companion, GcNotifier, VmThread};
use crate::util::options::Options;
use crate::vm::{Collector, CompressedOops, HostVm};

/// Why the runtime could not start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitError {
    AlreadyInitialized,
    /// Some of the options passed on the command line could not be applied.
    InvalidOptions(String),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::AlreadyInitialized => write!(f, "the runtime is already initialized"),
            InitError::InvalidOptions(options) => write!(f, "invalid options: {:?}", options),
        }
    }
}

impl std::error::Error for InitError {}

/// Collects the options and layout expectations before the runtime starts.
pub struct RuntimeBuilder {
    pub options: Options,
    expected_klass_checksum: Option<usize>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Default options overridden by `MMTK_*` environment variables.
    pub fn new() -> Self {
        let mut options = Options::default();
        options.read_env_var_settings();
        Self {
            options,
            expected_klass_checksum: None,
        }
    }

    /// Default options only. The environment is ignored.
    pub fn new_no_env_vars() -> Self {
        Self {
            options: Options::default(),
            expected_klass_checksum: None,
        }
    }

    pub fn set_option(&mut self, name: &str, value: &str) -> bool {
        self.options.set_from_str(name, value)
    }

    /// Apply `name=value` pairs from the VM command line.
    pub fn set_options_from_command_line(&mut self, options: &str) -> Result<(), InitError> {
        if self.options.set_bulk_from_command_line(options) {
            Ok(())
        } else {
            Err(InitError::InvalidOptions(options.to_string()))
        }
    }

    /// Check the VM's class layout against this checksum when the runtime starts.
    pub fn expect_klass_checksum(&mut self, checksum: usize) {
        self.expected_klass_checksum = Some(checksum);
    }

    /// Check the layouts shared with the collector and the VM, derive the barrier and
    /// allocation parameters, and start the VM and companion threads.
    pub fn build(self, collector: Arc<dyn Collector>, host: Arc<dyn HostVm>) -> Runtime {
        let options = self.options;
        abi::check_allocator_sizes(&collector.allocator_sizes());
        if let Some(expected) = self.expected_klass_checksum {
            abi::check_klass_layout(&host.klass_layout(), expected);
        }

        let encoding = if options.use_compressed_oops {
            let (start, end) = collector.heap_range();
            Some(CompressedOops::for_heap(start, end))
        } else {
            None
        };
        CompressedOops::install(encoding);
        info!("Reference encoding: {:?}", encoding);

        let barrier = BarrierConfig::new(
            &options,
            collector.side_metadata_base(options.use_compressed_oops),
            host.referent_offset() as isize,
        );
        let allocation = AllocationConfig {
            max_non_los_default_alloc_bytes: collector.max_non_los_default_alloc_bytes(),
            selector: collector.default_allocator_selector(),
            disable_fast_alloc: options.disable_fast_alloc,
            large_bump_threshold: options.large_bump_threshold,
        };
        debug!("Barrier: {:?}", barrier);
        debug!("Allocation: {:?}", allocation);
        let state = GlobalState::new(barrier, allocation);

        let vm_thread = Arc::new(VmThread::spawn(host.clone()));
        let companion = Arc::new(Companion::new(host.clone(), vm_thread));
        companion.spawn(&options.companion_thread_name);

        Runtime {
            options,
            state,
            collector,
            host,
            companion,
            gc_notifier: GcNotifier::default(),
            encoding,
        }
    }
}

/// Everything the mutator side of the collector needs at run time.
pub struct Runtime {
    pub options: Options,
    pub state: GlobalState,
    pub collector: Arc<dyn Collector>,
    pub host: Arc<dyn HostVm>,
    pub companion: Arc<Companion>,
    pub gc_notifier: GcNotifier,
    encoding: Option<CompressedOops>,
}

impl Runtime {
    /// The reference encoding, or `None` if the heap stores full-width references.
    pub fn encoding(&self) -> Option<CompressedOops> {
        self.encoding
    }

    /// Stop the companion and VM threads. The world must be running.
    pub fn shutdown(&self) {
        self.companion.shutdown();
        self.companion.vm_thread().shutdown();
        info!("Runtime shut down");
    }
}

static RUNTIME: spin::Once<Runtime> = spin::Once::new();

/// Install the process-wide runtime. Fails if one is installed already.
pub fn initialize_runtime(
    builder: RuntimeBuilder,
    collector: Arc<dyn Collector>,
    host: Arc<dyn HostVm>,
) -> Result<&'static Runtime, InitError> {
    crate::util::logger::init_once();
    if RUNTIME.is_completed() {
        return Err(InitError::AlreadyInitialized);
    }
    let mut built_here = false;
    let runtime = RUNTIME.call_once(|| {
        built_here = true;
        builder.build(collector, host)
    });
    if built_here {
        info!("Runtime initialized");
        Ok(runtime)
    } else {
        Err(InitError::AlreadyInitialized)
    }
}

/// The process-wide runtime. Panics if it has not been initialized.
pub fn runtime() -> &'static Runtime {
    match RUNTIME.get() {
        Some(runtime) => runtime,
        None => panic!("The runtime has not been initialized"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::alloc::AllocatorSelector;
    use crate::util::options::LoadBarrierMode;
    use crate::util::test_util::mock_collector::MockCollector;
    use crate::util::test_util::mock_host::MockHost;
    use crate::util::Address;
    use crate::vm::KlassLayout;

    #[test]
    fn init_error_messages() {
        assert_eq!(
            InitError::AlreadyInitialized.to_string(),
            "the runtime is already initialized"
        );
        assert!(InitError::InvalidOptions("x".into())
            .to_string()
            .contains("invalid options"));
    }

    #[test]
    fn command_line_errors_are_reported() {
        let mut builder = RuntimeBuilder::new_no_env_vars();
        assert_eq!(
            builder.set_options_from_command_line("barrier_fastpath=nope"),
            Err(InitError::InvalidOptions("barrier_fastpath=nope".into()))
        );
        assert!(builder
            .set_options_from_command_line("load_barrier_mode=SlotLogging")
            .is_ok());
        assert_eq!(builder.options.load_barrier_mode, LoadBarrierMode::SlotLogging);
    }

    #[test]
    fn build_derives_parameters_from_the_collector() {
        let mut collector = MockCollector::default();
        collector.max_non_los = 4096;
        collector.selector = AllocatorSelector::Immix(0);
        collector.metadata_base = unsafe { Address::from_usize(0x6000_0000) };
        let host = Arc::new(MockHost::default());
        let mut builder = RuntimeBuilder::new_no_env_vars();
        builder.set_option("large_bump_threshold", "32");
        let runtime = builder.build(Arc::new(collector), host);

        let allocation = runtime.state.allocation_config();
        assert_eq!(allocation.max_non_los_default_alloc_bytes, 4096);
        assert_eq!(allocation.selector, AllocatorSelector::Immix(0));
        let barrier = runtime.state.barrier_config();
        assert_eq!(barrier.unlog_bits.base.as_usize(), 0x6000_0000);
        assert_eq!(barrier.referent_offset, MockHost::REFERENT_OFFSET as isize);
        assert_eq!(allocation.large_bump_threshold, 32);
        assert_eq!(runtime.encoding(), None);
        runtime.shutdown();
    }

    #[test]
    #[should_panic(expected = "Class layout checksum mismatch")]
    fn klass_layout_is_checked() {
        let mut host = MockHost::default();
        host.klass_layout = KlassLayout {
            klass: 8,
            ..Default::default()
        };
        let mut builder = RuntimeBuilder::new_no_env_vars();
        builder.expect_klass_checksum(16);
        builder.build(Arc::new(MockCollector::default()), Arc::new(host));
    }
}
