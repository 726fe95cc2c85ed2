/// Width of the controller's tick counter.
pub const COUNTER_BITS: u32 = 32;

/// Fixed-width tick counter. Increments wrap silently; a threshold the
/// counter cannot reach keeps the controller in its timed state forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter(u32);

impl Counter {
    pub const ZERO: Counter = Counter(0);

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn incremented(self) -> Self {
        Counter(self.0.wrapping_add(1))
    }

    pub fn reached(self, threshold: u64) -> bool {
        u64::from(self.0) >= threshold
    }
}
