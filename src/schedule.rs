//! Blocking waits, abstracted so the ingestion loop can be driven by any scheduler.

use std::time::Duration;

/// Something that can block the current worker for a while.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::cell::RefCell;

    /// Records requested waits without blocking.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSleeper {
        pub waits: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.waits.borrow_mut().push(duration);
        }
    }

    /// Runs a callback instead of sleeping, e.g. to grow a file between two samples.
    pub(crate) struct CallbackSleeper<F: Fn()>(pub F);

    impl<F: Fn()> Sleeper for CallbackSleeper<F> {
        fn sleep(&self, _duration: Duration) {
            (self.0)()
        }
    }

    #[test]
    fn thread_sleeper_waits() {
        let start = std::time::Instant::now();
        ThreadSleeper.sleep(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
