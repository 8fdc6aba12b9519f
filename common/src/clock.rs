use core::convert::TryInto;
use std::{
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

pub trait Clock {
    /// Milliseconds since boot; never goes backwards.
    fn now_ms(&self) -> u64;
    /// Blocks the calling context.
    fn sleep_ms(&self, ms: u64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
