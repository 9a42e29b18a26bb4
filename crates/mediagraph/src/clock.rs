//! Driver timing: hardware clock readings and the per-cycle quantum
//!
//! A device thread publishes readings into a [`Clock`] with plain atomic
//! stores; the data loop reads them when a driver starts a cycle. Nothing
//! here locks.

use std::sync::atomic::Ordering;

use portable_atomic::{AtomicF64, AtomicI64, AtomicU32, AtomicU64};
use serde::Serialize;

/// Timing descriptor for one graph cycle, computed by the driver and read by
/// every node it clocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quantum {
    /// Monotonic timestamp of the cycle start.
    pub nsec: u64,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Ratio between the device rate and the nominal rate.
    pub rate_diff: f64,
    /// Running sample position of the cycle start.
    pub position: u64,
    /// Device delay in samples.
    pub delay: i64,
    /// Frames in this cycle.
    pub size: u32,
}

impl Quantum {
    pub fn new(size: u32, rate: u32) -> Self {
        Self {
            nsec: 0,
            rate,
            rate_diff: 1.0,
            position: 0,
            delay: 0,
            size,
        }
    }
}

/// Snapshot of a [`Clock`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReading {
    pub nsec: u64,
    pub rate: u32,
    pub rate_diff: f64,
    pub position: u64,
    pub delay: i64,
}

/// Hardware clock shared between a device thread (writer) and the data loop
/// (reader).
#[derive(Debug)]
pub struct Clock {
    nsec: AtomicU64,
    rate: AtomicU32,
    rate_diff: AtomicF64,
    position: AtomicU64,
    delay: AtomicI64,
}

impl Clock {
    pub fn new(rate: u32) -> Self {
        Self {
            nsec: AtomicU64::new(0),
            rate: AtomicU32::new(rate),
            rate_diff: AtomicF64::new(1.0),
            position: AtomicU64::new(0),
            delay: AtomicI64::new(0),
        }
    }

    /// Publish a new reading.
    pub fn update(&self, reading: ClockReading) {
        self.rate.store(reading.rate, Ordering::Relaxed);
        self.rate_diff.store(reading.rate_diff, Ordering::Relaxed);
        self.position.store(reading.position, Ordering::Relaxed);
        self.delay.store(reading.delay, Ordering::Relaxed);
        // nsec last: readers that see the new timestamp see the rest too.
        self.nsec.store(reading.nsec, Ordering::Release);
    }

    pub fn read(&self) -> ClockReading {
        let nsec = self.nsec.load(Ordering::Acquire);
        ClockReading {
            nsec,
            rate: self.rate.load(Ordering::Relaxed),
            rate_diff: self.rate_diff.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
            delay: self.delay.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_round_trip() {
        let clock = Clock::new(48_000);
        let reading = ClockReading {
            nsec: 1_000_000,
            rate: 44_100,
            rate_diff: 1.0001,
            position: 4096,
            delay: 64,
        };
        clock.update(reading);
        assert_eq!(clock.read(), reading);
    }

    #[test]
    fn test_new_quantum_is_at_origin() {
        let q = Quantum::new(128, 48_000);
        assert_eq!(q.position, 0);
        assert_eq!(q.size, 128);
        assert_eq!(q.rate_diff, 1.0);
    }
}
