use std::cell::Cell;

/// What the calling OS thread is, as far as the stop-the-world protocol cares. Threads
/// created by the runtime tag themselves when they start. Collector threads are tagged
/// when the collector first calls into the runtime from them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThreadRole {
    /// A collector controller or worker thread.
    Collector,
    /// The thread that runs safepoint operations.
    VmThread,
    Companion,
    /// An application thread.
    Mutator,
    Unknown,
}

thread_local! {
    static ROLE: Cell<ThreadRole> = const { Cell::new(ThreadRole::Unknown) };
}

impl ThreadRole {
    /// Tag the calling thread.
    pub fn bind_current(role: ThreadRole) {
        ROLE.with(|r| r.set(role));
    }

    pub fn current() -> ThreadRole {
        ROLE.with(|r| r.get())
    }

    /// Whether this role may drive the world through
    /// [`Companion::request`](crate::scheduler::Companion::request).
    pub fn may_request_pauses(self) -> bool {
        !matches!(
            self,
            ThreadRole::VmThread | ThreadRole::Companion | ThreadRole::Mutator
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_per_thread() {
        ThreadRole::bind_current(ThreadRole::Collector);
        let other = std::thread::spawn(ThreadRole::current).join().unwrap();
        assert_eq!(other, ThreadRole::Unknown);
        assert_eq!(ThreadRole::current(), ThreadRole::Collector);
    }

    #[test]
    fn only_outsiders_request() {
        assert!(ThreadRole::Collector.may_request_pauses());
        assert!(ThreadRole::Unknown.may_request_pauses());
        assert!(!ThreadRole::VmThread.may_request_pauses());
        assert!(!ThreadRole::Companion.may_request_pauses());
        assert!(!ThreadRole::Mutator.may_request_pauses());
    }
}
