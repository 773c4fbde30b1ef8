use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` cell supporting lock-free accumulation from many threads.
///
/// Addition is done with a compare-and-swap loop on the bit pattern, so the
/// only source of nondeterminism is the order in which rounding happens.
#[derive(Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Adds `value` and returns the previous contents.
    #[inline]
    pub fn fetch_add(&self, value: f64) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(current) + value).to_bits();
            match self
                .0
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(prev) => return f64::from_bits(prev),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.load())
    }
}

impl fmt::Debug for AtomicF64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.load())
    }
}

/// Allocate `n` zeroed atomic cells.
pub fn zeroed(n: usize) -> Vec<AtomicF64> {
    (0..n).map(|_| AtomicF64::default()).collect()
}
