//! Concurrency gate: how many tasks may be started right now.

/// `max - running`, floored at zero.
///
/// `running` may exceed `max` (the cap was lowered live, or another
/// scheduler instance raced us); that simply means no slots.
pub fn available_slots(max_concurrent_workers: u32, running: u64) -> usize {
    let max = u64::from(max_concurrent_workers);
    // bounded by max (<= 128), so the cast cannot truncate
    max.saturating_sub(running) as usize
}
