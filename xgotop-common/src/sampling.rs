//! Per-event-type probabilistic admission
//!
//! Rates are percentages (0-100) looked up by [`EventType`] in a small map
//! written by userspace. A missing entry means full admission.

use crate::EventType;

/// Rate used when no override is configured
pub const DEFAULT_RATE: u32 = 100;

/// Capacity of the `SAMPLING_RATES` map
pub const MAX_SAMPLING_ENTRIES: u32 = 32;

/// Source of sampling configuration and randomness
pub trait SamplingConfig {
    /// Configured admission percentage for `event_type`, if any
    fn rate(&self, event_type: EventType) -> Option<u32>;

    /// Uniform pseudo-random value
    fn random_u32(&self) -> u32;
}

/// Decide whether to keep an event of `event_type`.
///
/// O(1), allocation-free. Only draws a random number when the rate is below
/// 100.
#[inline(always)]
pub fn admit<S: SamplingConfig>(config: &S, event_type: EventType) -> bool {
    let rate = config.rate(event_type).unwrap_or(DEFAULT_RATE);
    if rate >= DEFAULT_RATE {
        return true;
    }
    config.random_u32() % 100 < rate
}
