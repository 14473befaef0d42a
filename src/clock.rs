// Real-time pacing: wall-clock time elapsed since the last call is turned
// into a cycle budget at the target frequency. The backlog is capped so a
// host stall never turns into a runaway catch-up burst.

use std::time::Instant;

pub const DEFAULT_FREQ: f64 = 12_000_000.0;

// One turbo grant; pacing is bypassed entirely.
const TURBO_CHUNK: u64 = 65_536;

// At most a fifth of a second of cycles may accumulate.
const BACKLOG_FRACTION: f64 = 0.2;

pub struct Clock {
    freq: f64,
    turbo: bool,
    pending: f64,
    last: Instant,
}

impl Clock {
    pub fn new(freq: f64, turbo: bool) -> Self {
        Clock { freq, turbo, pending: 0.0, last: Instant::now() }
    }

    /// Cycles the CPU may run right now, at most `max_cycles`. Unspent
    /// entitlement carries over to the next call.
    pub fn budget(&mut self, max_cycles: u64) -> u64 {
        if self.turbo {
            return TURBO_CHUNK;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.pending = (self.pending + elapsed * self.freq).min(self.freq * BACKLOG_FRACTION);
        let granted = (self.pending as u64).min(max_cycles);
        self.pending -= granted as f64;
        granted
    }

    pub fn reset(&mut self) {
        self.pending = 0.0;
        self.last = Instant::now();
    }

    pub fn freq(&self) -> f64 {
        self.freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn budget_tracks_wall_clock() {
        let mut clock = Clock::new(1_000_000.0, false);
        thread::sleep(Duration::from_millis(20));
        let granted = clock.budget(u64::MAX);
        // 20 ms at 1 MHz is 20k cycles; leave generous slack for scheduling
        assert!(granted >= 10_000, "granted {}", granted);
        assert!(granted <= 200_000, "granted {}", granted);
    }

    #[test]
    fn backlog_is_capped() {
        let mut clock = Clock::new(1_000_000.0, false);
        thread::sleep(Duration::from_millis(30));
        // a grant can never exceed a fifth of a second of cycles
        assert!(clock.budget(u64::MAX) <= 200_000);
    }

    #[test]
    fn turbo_ignores_time() {
        let mut clock = Clock::new(1_000_000.0, true);
        assert_eq!(clock.budget(10), TURBO_CHUNK);
    }
}
