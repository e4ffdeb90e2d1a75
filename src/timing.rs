//! Tick pacing for render workers.
//!
//! Workers sleep in short chunks and re-check shutdown atomics between
//! chunks, so cancellation never waits on a full tick. The schedule is
//! anchored to target instants rather than to wakeup times, which keeps the
//! average rate honest under scheduler jitter.

use std::time::{Duration, Instant};

/// Longest uninterruptible sleep chunk.
const SLEEP_CHUNK: Duration = Duration::from_millis(5);

/// Result of waiting for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickWait {
    /// Woke at (or slightly after) the scheduled instant.
    OnTime,
    /// The previous iteration overran; the schedule was reset.
    Lagged,
    /// A cancellation condition became true while sleeping.
    Cancelled,
}

/// Sleep up to `dur`, polling `cancelled` between chunks.
/// Returns false if the sleep was cut short by cancellation.
pub fn sleep_interruptible(dur: Duration, cancelled: &dyn Fn() -> bool) -> bool {
    let deadline = Instant::now() + dur;
    loop {
        if cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_CHUNK));
    }
}

/// Fixed-rate tick scheduler with lag recovery.
pub struct TickClock {
    interval: Duration,
    next: Instant,
}

impl TickClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    /// Build a clock from a ticks-per-second rate.
    pub fn from_rate(ticks_per_sec: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / ticks_per_sec.max(1) as f64))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the tick rate. No-op if the rate is unchanged.
    pub fn set_rate(&mut self, ticks_per_sec: u32) {
        let interval = Duration::from_secs_f64(1.0 / ticks_per_sec.max(1) as f64);
        if interval != self.interval {
            self.interval = interval;
            self.next = Instant::now() + interval;
        }
    }

    /// Sleep until the next tick boundary, polling `cancelled` between
    /// chunks. Advances the schedule by one interval on return. If the
    /// caller overran by more than one interval the schedule re-anchors to
    /// now and the wait reports `Lagged`.
    pub fn wait(&mut self, cancelled: &dyn Fn() -> bool) -> TickWait {
        let target = self.next;
        let now = Instant::now();

        if now < target && !sleep_interruptible(target - now, cancelled) {
            return TickWait::Cancelled;
        }
        if cancelled() {
            return TickWait::Cancelled;
        }

        self.next = target + self.interval;
        let after = Instant::now();
        if after > self.next + self.interval {
            // Fallen behind by more than a full tick; re-anchor.
            self.next = after + self.interval;
            return TickWait::Lagged;
        }
        TickWait::OnTime
    }
}

/// Monotonic timestamp in nanoseconds since an arbitrary process-local epoch.
pub fn monotonic_ns() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(epoch).as_nanos() as u64
}
