//! Monotonic time, deadlines and retry backoff
//!
//! Nothing in the library reads a hardware timer directly. The host supplies a
//! [`Clock`]; every timeout is a [`Deadline`] computed from it and every retry
//! loop is paced by a [`Backoff`].

/// Host-supplied millisecond clock.
///
/// `now_ms` must be monotonic. `delay_ms` is the only place the library
/// yields the processor, so a cooperative scheduler can run other work there.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u64;
    /// Sleep (or yield) for roughly `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

impl<T: Clock + ?Sized> Clock for &mut T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// A point in time after which an operation is considered timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    at_ms: u64,
}

impl Deadline {
    /// Deadline `ms` milliseconds from now.
    pub fn after<C: Clock + ?Sized>(clock: &C, ms: u32) -> Self {
        Self {
            at_ms: clock.now_ms().saturating_add(ms as u64),
        }
    }

    /// Deadline at an absolute clock reading.
    pub const fn at(at_ms: u64) -> Self {
        Self { at_ms }
    }

    /// Absolute clock reading of the deadline.
    pub fn instant_ms(&self) -> u64 {
        self.at_ms
    }

    /// Whether the deadline has passed.
    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now_ms() >= self.at_ms
    }

    /// Milliseconds left before expiry, zero once expired.
    pub fn remaining_ms<C: Clock + ?Sized>(&self, clock: &C) -> u64 {
        self.at_ms.saturating_sub(clock.now_ms())
    }
}

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_ms: u32,
    /// Upper bound on any single delay
    pub max_ms: u32,
    /// Growth factor applied after every retry
    pub multiplier: u32,
    /// Number of retries before giving up
    pub max_retries: u8,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2,
            max_retries: 8,
        }
    }
}

/// Retry pacing state derived from a [`BackoffConfig`].
///
/// ```rust
/// use libcellular::time::{Backoff, BackoffConfig};
///
/// let mut backoff = Backoff::new(BackoffConfig {
///     initial_ms: 100,
///     max_ms: 300,
///     multiplier: 2,
///     max_retries: 4,
/// });
/// assert_eq!(backoff.next_delay(), Some(100));
/// assert_eq!(backoff.next_delay(), Some(200));
/// assert_eq!(backoff.next_delay(), Some(300));
/// assert_eq!(backoff.next_delay(), Some(300));
/// assert_eq!(backoff.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    retries: u8,
    next_ms: u32,
}

impl Backoff {
    /// Start a fresh retry sequence.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retries: 0,
            next_ms: config.initial_ms.min(config.max_ms),
        }
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<u32> {
        if self.retries >= self.config.max_retries {
            return None;
        }
        self.retries += 1;
        let delay = self.next_ms;
        self.next_ms = delay
            .saturating_mul(self.config.multiplier.max(1))
            .min(self.config.max_ms);
        Some(delay)
    }

    /// Retries handed out so far.
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Forget all retries taken so far.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}
