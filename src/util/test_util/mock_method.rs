use std::sync::atomic::{AtomicUsize, Ordering};

/// A mocked method. It either returns a fixed answer or cycles through a sequence of
/// answers, and counts how many times it has been called. Calls take `&self` so a mock can
/// sit behind the `&self` methods of the collector and host traits.
pub struct MockMethod<I, R> {
    imp: MockImpl<I, R>,
}

pub enum MockImpl<I, R> {
    Sequence(Vec<MockClosure<I, R>>),
    Fixed(MockClosure<I, R>),
}

pub type MockClosureSignature<I, R> = Box<dyn Fn(I) -> R + Send + Sync>;

pub struct MockClosure<I, R> {
    closure: MockClosureSignature<I, R>,
    call_count: AtomicUsize,
}

impl<I, R> MockClosure<I, R> {
    fn new(closure: MockClosureSignature<I, R>) -> Self {
        Self {
            closure,
            call_count: AtomicUsize::new(0),
        }
    }
    fn call(&self, args: I) -> R {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        (self.closure)(args)
    }
}

impl<I, R> std::default::Default for MockMethod<I, R> {
    fn default() -> Self {
        Self::new_unimplemented()
    }
}

impl<I, R> MockMethod<I, R> {
    pub fn new_unimplemented() -> Self {
        Self {
            imp: MockImpl::Fixed(MockClosure::new(Box::new(|_| unimplemented!()))),
        }
    }

    pub fn new_default() -> Self
    where
        R: Default,
    {
        Self {
            imp: MockImpl::Fixed(MockClosure::new(Box::new(|_| R::default()))),
        }
    }

    pub fn new_fixed(closure: MockClosureSignature<I, R>) -> Self {
        Self {
            imp: MockImpl::Fixed(MockClosure::new(closure)),
        }
    }

    pub fn new_sequence(closures: Vec<MockClosureSignature<I, R>>) -> Self {
        Self {
            imp: MockImpl::Sequence(closures.into_iter().map(MockClosure::new).collect()),
        }
    }

    pub fn call(&self, args: I) -> R {
        let cur_call = self.call_count();

        match &self.imp {
            MockImpl::Sequence(closures) => {
                let len = closures.len();
                closures[cur_call % len].call(args)
            }
            MockImpl::Fixed(closure) => closure.call(args),
        }
    }

    pub fn is_called(&self) -> bool {
        self.call_count() > 0
    }

    pub fn call_count(&self) -> usize {
        match &self.imp {
            MockImpl::Fixed(c) => c.call_count.load(Ordering::SeqCst),
            MockImpl::Sequence(vec) => vec
                .iter()
                .map(|c| c.call_count.load(Ordering::SeqCst))
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_fixed_multi_args() {
        let mock = MockMethod::new_fixed(Box::new(|(a, b): (usize, usize)| -> usize { a + b }));
        assert!(!mock.is_called());
        assert_eq!(mock.call((1, 1)), 2);
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn mock_sequence_cycles() {
        let mock = MockMethod::new_sequence(vec![
            Box::new(|()| -> usize { 0 }),
            Box::new(|()| -> usize { 1 }),
        ]);
        assert_eq!(mock.call(()), 0);
        assert_eq!(mock.call(()), 1);
        assert_eq!(mock.call(()), 0);
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    #[should_panic(expected = "not implemented")]
    fn mock_unimplemented_panics() {
        let mock: MockMethod<(), ()> = MockMethod::new_unimplemented();
        mock.call(());
    }
}
