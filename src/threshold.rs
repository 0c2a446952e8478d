use std::fmt::Debug;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicUsize, Ordering};

/// Atomic primitive backing a [`ThresholdCounter`].
pub trait CounterAtom: Send + Sync {
    type Value: Copy + PartialOrd + Debug;

    fn with_value(value: Self::Value) -> Self;

    fn zero() -> Self::Value;

    /// Adds `delta`, returning the new count.
    fn add(&self, delta: Self::Value) -> Self::Value;

    fn load(&self) -> Self::Value;

    fn store(&self, value: Self::Value);

    /// Whether `value` can only be the result of an overflow.
    fn is_overflowed(value: Self::Value) -> bool;
}

macro_rules! signed_counter_atom {
    ($atomic:ty, $value:ty) => {
        impl CounterAtom for $atomic {
            type Value = $value;

            fn with_value(value: $value) -> Self {
                <$atomic>::new(value)
            }

            fn zero() -> $value {
                0
            }

            fn add(&self, delta: $value) -> $value {
                self.fetch_add(delta, Ordering::AcqRel).wrapping_add(delta)
            }

            fn load(&self) -> $value {
                <$atomic>::load(self, Ordering::Acquire)
            }

            fn store(&self, value: $value) {
                <$atomic>::store(self, value, Ordering::Release)
            }

            fn is_overflowed(value: $value) -> bool {
                value < 0
            }
        }
    };
}

signed_counter_atom!(AtomicI32, i32);
signed_counter_atom!(AtomicI64, i64);

// Unsigned counts cannot go negative, so they saturate instead of wrapping.
impl CounterAtom for AtomicUsize {
    type Value = usize;

    fn with_value(value: usize) -> Self {
        AtomicUsize::new(value)
    }

    fn zero() -> usize {
        0
    }

    fn add(&self, delta: usize) -> usize {
        let previous = self
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta))
            })
            .unwrap_or_else(|current| current);
        previous.saturating_add(delta)
    }

    fn load(&self) -> usize {
        AtomicUsize::load(self, Ordering::Acquire)
    }

    fn store(&self, value: usize) {
        AtomicUsize::store(self, value, Ordering::Release)
    }

    fn is_overflowed(value: usize) -> bool {
        value == usize::MAX
    }
}

/// Counter that reports when it reaches a threshold.
///
/// Overflowed counts are treated as reached rather than wrapping back below
/// the threshold.
#[derive(Debug)]
pub struct ThresholdCounter<A: CounterAtom = AtomicI64> {
    count: A,
    threshold: A::Value,
}

impl<A: CounterAtom> ThresholdCounter<A> {
    pub fn new(threshold: A::Value) -> Self {
        Self {
            count: A::with_value(A::zero()),
            threshold,
        }
    }

    /// Adds `delta` and returns the new count.
    pub fn increase(&self, delta: A::Value) -> A::Value {
        self.count.add(delta)
    }

    /// Adds `delta` and returns whether the threshold is now reached.
    pub fn increase_and_check(&self, delta: A::Value) -> bool {
        let count = self.increase(delta);
        self.reached_at(count)
    }

    pub fn get(&self) -> A::Value {
        self.count.load()
    }

    pub fn reset(&self) {
        self.count.store(A::zero());
    }

    pub fn threshold(&self) -> A::Value {
        self.threshold
    }

    pub fn is_reached(&self) -> bool {
        self.reached_at(self.get())
    }

    fn reached_at(&self, count: A::Value) -> bool {
        A::is_overflowed(count) || count >= self.threshold
    }
}
