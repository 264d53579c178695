use std::sync::{Condvar, Mutex};

/// Counts how many times the world has been restarted, so that threads blocked for a
/// collection can tell when theirs has finished.
#[derive(Default)]
pub struct GcNotifier {
    start_the_world_count: Mutex<usize>,
    cond: Condvar,
}

impl GcNotifier {
    /// Called after the world has resumed.
    pub fn notify_resumed(&self) {
        let mut count = self.start_the_world_count.lock().unwrap();
        *count += 1;
        self.cond.notify_all();
    }

    /// Block until the world has been restarted at least once after this call.
    pub fn block_for_gc(&self) {
        let mut count = self.start_the_world_count.lock().unwrap();
        let next = *count + 1;
        while *count < next {
            count = self.cond.wait(count).unwrap();
        }
    }

    pub fn start_the_world_count(&self) -> usize {
        *self.start_the_world_count.lock().unwrap()
    }
}
