// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A hashed timing wheel holding delayed cleanup tasks.

use std::time::Duration;

struct Timer<T> {
    circle: usize,
    value: T,
}

/// A ring of time buckets advanced one slot per tick.
///
/// A timer `steps` ticks away lands `steps` slots ahead of the current position and waits
/// `(steps - 1) / slots` full revolutions before it fires.
pub(crate) struct TimingWheel<T> {
    slots: Vec<Vec<Timer<T>>>,
    position: usize,
    interval: Duration,
    len: usize,
}

impl<T> std::fmt::Debug for TimingWheel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingWheel")
            .field("slots", &self.slots.len())
            .field("position", &self.position)
            .field("interval", &self.interval)
            .field("len", &self.len)
            .finish()
    }
}

impl<T> TimingWheel<T> {
    pub fn new(slots: usize, interval: Duration) -> Self {
        let slots = slots.max(1);
        let interval = if interval.is_zero() { Duration::from_millis(1) } else { interval };
        Self {
            slots: (0..slots).map(|_| Vec::new()).collect(),
            position: 0,
            interval,
            len: 0,
        }
    }

    pub fn add(&mut self, delay: Duration, value: T) {
        let steps = self.steps(delay);
        let slot = (self.position + steps % self.slots.len()) % self.slots.len();
        let circle = (steps - 1) / self.slots.len();

        self.slots[slot].push(Timer { circle, value });
        self.len += 1;
    }

    /// Moves to the next slot and returns every timer that is due there.
    pub fn advance(&mut self) -> Vec<T> {
        self.position = (self.position + 1) % self.slots.len();

        let bucket = std::mem::take(&mut self.slots[self.position]);
        let mut due = Vec::new();
        for mut timer in bucket {
            if timer.circle == 0 {
                due.push(timer.value);
            } else {
                timer.circle -= 1;
                self.slots[self.position].push(timer);
            }
        }

        self.len -= due.len();
        due
    }

    /// Removes every pending timer regardless of its deadline.
    pub fn drain(&mut self) -> Vec<T> {
        self.len = 0;
        self.slots.iter_mut().flat_map(std::mem::take).map(|timer| timer.value).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten().map(|timer| &timer.value)
    }

    fn steps(&self, delay: Duration) -> usize {
        let interval = self.interval.as_nanos();
        let steps = delay.as_nanos().div_ceil(interval).max(1);
        usize::try_from(steps).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn ticks_until_due<T>(wheel: &mut TimingWheel<T>, limit: usize) -> Option<usize> {
        for tick in 1..=limit {
            if !wheel.advance().is_empty() {
                return Some(tick);
            }
        }
        None
    }

    #[test]
    fn timer_fires_after_its_steps() {
        let mut wheel = TimingWheel::new(300, SECOND);
        wheel.add(Duration::from_secs(5), "task");
        assert_eq!(wheel.len(), 1);

        assert_eq!(ticks_until_due(&mut wheel, 10), Some(5));
        assert_eq!(wheel.len(), 0);
    }

    #[test]
    fn long_delays_wait_full_revolutions() {
        let mut wheel = TimingWheel::new(300, SECOND);
        wheel.add(Duration::from_secs(3600), "task");
        assert_eq!(ticks_until_due(&mut wheel, 4000), Some(3600));
    }

    #[test]
    fn delay_of_exactly_one_revolution() {
        let mut wheel = TimingWheel::new(10, SECOND);
        wheel.add(Duration::from_secs(10), "task");
        assert_eq!(ticks_until_due(&mut wheel, 30), Some(10));
    }

    #[test]
    fn partial_intervals_round_up() {
        let mut wheel = TimingWheel::new(10, SECOND);
        wheel.add(Duration::from_millis(1500), "task");
        assert_eq!(ticks_until_due(&mut wheel, 10), Some(2));
    }

    #[test]
    fn zero_delay_fires_on_next_tick() {
        let mut wheel = TimingWheel::new(10, SECOND);
        wheel.add(Duration::ZERO, "task");
        assert_eq!(ticks_until_due(&mut wheel, 10), Some(1));
    }

    #[test]
    fn timers_added_mid_revolution_are_relative_to_position() {
        let mut wheel = TimingWheel::new(10, SECOND);
        for _ in 0..7 {
            assert!(wheel.advance().is_empty());
        }
        wheel.add(Duration::from_secs(5), "task");
        assert_eq!(ticks_until_due(&mut wheel, 10), Some(5));
    }

    #[test]
    fn drain_returns_everything() {
        let mut wheel = TimingWheel::new(10, SECOND);
        wheel.add(Duration::from_secs(1), 1);
        wheel.add(Duration::from_secs(100), 2);

        let mut drained = wheel.drain();
        drained.sort_unstable();
        assert_eq!(drained, [1, 2]);
        assert_eq!(wheel.len(), 0);
        assert_eq!(wheel.iter().count(), 0);
    }
}
