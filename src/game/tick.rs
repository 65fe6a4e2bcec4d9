//! Tick Pacing
//!
//! Turns wall-clock time into a whole number of simulation steps. Elapsed
//! time accumulates; every full interval becomes one step and the remainder
//! carries into the next iteration, so the long-run tick rate is exact even
//! when individual iterations run late.

use std::time::Duration;

/// Sleeps shorter than this are skipped; the loop just spins again.
pub const MIN_SLEEP: Duration = Duration::from_micros(500);

/// Slowest speed multiplier accepted.
const MIN_RATE: f64 = 0.01;

/// What the loop should do this iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepPlan {
    /// Ticks to simulate now
    pub steps: u32,
    /// How long to sleep afterwards, if worth it
    pub sleep: Option<Duration>,
}

/// Fixed-interval accumulator.
#[derive(Clone, Debug)]
pub struct TickClock {
    interval: Duration,
    carry: Duration,
}

impl TickClock {
    /// Clock for `ticks_per_second` scaled by a game speed multiplier.
    pub fn new(ticks_per_second: u32, speed: f64) -> Self {
        let rate = (f64::from(ticks_per_second) * speed).max(MIN_RATE);
        Self {
            interval: Duration::from_secs_f64(1.0 / rate),
            carry: Duration::ZERO,
        }
    }

    /// Time per step.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time accumulated towards the next step.
    pub fn carry(&self) -> Duration {
        self.carry
    }

    /// Account for `elapsed` and plan the steps it pays for.
    pub fn advance(&mut self, elapsed: Duration) -> StepPlan {
        self.carry += elapsed;

        let interval = self.interval.as_nanos().max(1);
        let steps = self.carry.as_nanos() / interval;
        let spent = steps * interval;
        let left = self.carry.as_nanos() - spent;
        self.carry = Duration::from_nanos(u64::try_from(left).unwrap_or(u64::MAX));

        let wait = self.interval.saturating_sub(self.carry);
        StepPlan {
            steps: u32::try_from(steps).unwrap_or(u32::MAX),
            sleep: (wait >= MIN_SLEEP).then_some(wait),
        }
    }

    /// Drop accumulated time, e.g. after a capped catch-up burst.
    pub fn reset(&mut self) {
        self.carry = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partial_intervals_carry() {
        let mut clock = TickClock::new(20, 1.0);
        assert_eq!(clock.interval(), Duration::from_millis(50));

        let plan = clock.advance(Duration::from_millis(175));
        assert_eq!(plan.steps, 3);
        assert_eq!(clock.carry(), Duration::from_millis(25));
        assert_eq!(plan.sleep, Some(Duration::from_millis(25)));

        let plan = clock.advance(Duration::from_millis(30));
        assert_eq!(plan.steps, 1);
        assert_eq!(clock.carry(), Duration::from_millis(5));
    }

    #[test]
    fn test_short_sleep_is_skipped() {
        let mut clock = TickClock::new(20, 1.0);
        let plan = clock.advance(Duration::from_micros(49_800));
        assert_eq!(plan.steps, 0);
        assert_eq!(plan.sleep, None);
    }

    #[test]
    fn test_speed_scales_interval() {
        assert_eq!(TickClock::new(20, 2.0).interval(), Duration::from_millis(25));
        // Zero speed clamps instead of dividing by zero
        assert!(TickClock::new(20, 0.0).interval() >= Duration::from_secs(99));
    }

    #[test]
    fn test_reset_drops_carry() {
        let mut clock = TickClock::new(10, 1.0);
        clock.advance(Duration::from_millis(150));
        clock.reset();
        assert_eq!(clock.carry(), Duration::ZERO);
    }

    proptest! {
        /// However time is sliced, total steps match total time.
        #[test]
        fn prop_steps_track_elapsed(slices in prop::collection::vec(0u64..200_000, 1..50)) {
            let mut clock = TickClock::new(20, 1.0);
            let mut steps = 0u64;
            for micros in &slices {
                steps += u64::from(clock.advance(Duration::from_micros(*micros)).steps);
                prop_assert!(clock.carry() < clock.interval());
            }
            let total: u64 = slices.iter().sum();
            prop_assert_eq!(steps, total / 50_000);
        }
    }
}
