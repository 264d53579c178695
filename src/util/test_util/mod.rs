use std::panic;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

pub mod mock_collector;
pub mod mock_host;
pub mod mock_method;

// https://github.com/rust-lang/rfcs/issues/2798#issuecomment-552949300
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T,
    F: Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        done_tx.send(()).expect("Unable to send completion signal");
        val
    });

    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(_) => handle.join().expect("Thread panicked"),
        Err(e) => panic!("Thread took too long: {}", e),
    }
}

lazy_static! {
    // Tests that touch environment variables or the process-wide runtime take this lock.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

// force some tests to be executed serially
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A failed test poisons the lock. Later tests still run.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

// Always execute a cleanup closure no matter the test panics or not.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

/// A zero-filled buffer with a stable address, used as fake heap memory by tests.
pub struct FakeHeap {
    words: Box<[usize]>,
}

impl FakeHeap {
    pub fn new(bytes: usize) -> Self {
        let words = crate::util::conversions::raw_align_up(bytes, std::mem::size_of::<usize>())
            / std::mem::size_of::<usize>();
        Self {
            words: vec![0usize; words].into_boxed_slice(),
        }
    }

    pub fn start(&self) -> crate::util::Address {
        crate::util::Address::from_ptr(self.words.as_ptr())
    }

    pub fn end(&self) -> crate::util::Address {
        self.start() + self.words.len() * std::mem::size_of::<usize>()
    }
}

lazy_static! {
    /// The VM behind [`mock_runtime`]: two application threads with bound mutators.
    pub static ref MOCK_HOST: std::sync::Arc<mock_host::MockHost> =
        std::sync::Arc::new(mock_host::MockHost::with_mutators(2));
    pub static ref MOCK_COLLECTOR: std::sync::Arc<mock_collector::MockCollector> =
        std::sync::Arc::new(mock_collector::MockCollector::default());
}

/// The process-wide runtime, installed over [`MOCK_HOST`] and [`MOCK_COLLECTOR`] on first
/// use. Tests that stop the world through it must hold [`serial_test`].
pub fn mock_runtime() -> &'static crate::runtime::Runtime {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let result = crate::runtime::initialize_runtime(
            crate::runtime::RuntimeBuilder::new_no_env_vars(),
            MOCK_COLLECTOR.clone(),
            MOCK_HOST.clone(),
        );
        assert!(result.is_ok(), "Failed to install the mock runtime");
    });
    crate::runtime::runtime()
}
