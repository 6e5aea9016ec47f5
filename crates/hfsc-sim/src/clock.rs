//! Tick sources for the simulation loop. One tick is one microsecond, the
//! unit the scheduler expects.

use std::time::Duration;

use quanta::Instant;

pub trait TickSource {
    /// Current tick.
    fn now(&self) -> u64;

    /// Move time forward to `tick`. Ticks in the past are a no-op.
    fn advance_to(&mut self, tick: u64);
}

/// Time that moves only when told to.
#[derive(Debug, Default, Clone)]
pub struct VirtualClock {
    now: u64,
}

impl VirtualClock {
    pub fn starting_at(now: u64) -> Self {
        Self { now }
    }
}

impl TickSource for VirtualClock {
    fn now(&self) -> u64 {
        self.now
    }

    fn advance_to(&mut self, tick: u64) {
        self.now = self.now.max(tick);
    }
}

/// Monotonic wall time since construction; advancing sleeps.
#[derive(Debug, Clone)]
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for WallClock {
    fn now(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn advance_to(&mut self, tick: u64) {
        let now = self.now();
        if tick > now {
            std::thread::sleep(Duration::from_micros(tick - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_never_goes_back() {
        let mut clock = VirtualClock::starting_at(100);
        clock.advance_to(50);
        assert_eq!(clock.now(), 100);
        clock.advance_to(1_000);
        assert_eq!(clock.now(), 1_000);
    }

    #[test]
    fn wall_clock_sleeps_until_target() {
        let mut clock = WallClock::new();
        let target = clock.now() + 2_000;
        clock.advance_to(target);
        assert!(clock.now() >= target);
    }
}
