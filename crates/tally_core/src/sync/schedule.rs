//! Deadlines of the host loop: periodic tick and external-change debounce.
//!
//! Pure bookkeeping over `Instant`s; the runtime sleeps until
//! [`TimerSchedule::next_deadline`] and then asks for what is due.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick,
    Debounce,
}

#[derive(Debug)]
pub struct TimerSchedule {
    tick_interval: Duration,
    debounce: Duration,
    next_tick: Option<Instant>,
    debounce_at: Option<Instant>,
}

impl TimerSchedule {
    pub fn new(tick_interval: Duration, debounce: Duration) -> Self {
        Self {
            tick_interval,
            debounce,
            next_tick: None,
            debounce_at: None,
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn start_ticking(&mut self, now: Instant) {
        if self.next_tick.is_none() {
            self.next_tick = Some(now + self.tick_interval);
        }
    }

    pub fn stop_ticking(&mut self) {
        self.next_tick = None;
    }

    /// Arms the debounce unless already armed. Observations inside an armed
    /// window coalesce into the pending one. Returns whether it was armed now.
    pub fn arm_debounce(&mut self, now: Instant) -> bool {
        if self.debounce_at.is_some() {
            return false;
        }
        self.debounce_at = Some(now + self.debounce);
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_tick, self.debounce_at) {
            (Some(tick), Some(debounce)) => Some(tick.min(debounce)),
            (tick, debounce) => tick.or(debounce),
        }
    }

    /// Time left until the next deadline, `None` when nothing is scheduled.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Removes and returns every event due at `now`; the tick re-arms.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerEvent> {
        let mut due = Vec::new();
        if self.debounce_at.is_some_and(|at| at <= now) {
            self.debounce_at = None;
            due.push(TimerEvent::Debounce);
        }
        if let Some(tick) = self.next_tick {
            if tick <= now {
                let next = tick + self.tick_interval;
                self.next_tick = Some(if next <= now {
                    now + self.tick_interval
                } else {
                    next
                });
                due.push(TimerEvent::Tick);
            }
        }
        due
    }

    pub fn cancel_all(&mut self) {
        self.next_tick = None;
        self.debounce_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{TimerEvent, TimerSchedule};
    use std::time::{Duration, Instant};

    fn schedule() -> TimerSchedule {
        TimerSchedule::new(Duration::from_millis(10_000), Duration::from_millis(100))
    }

    #[test]
    fn nothing_scheduled_means_no_timeout() {
        let schedule = schedule();
        assert_eq!(schedule.timeout(Instant::now()), None);
    }

    #[test]
    fn tick_rearms_after_firing() {
        let start = Instant::now();
        let mut schedule = schedule();
        schedule.start_ticking(start);
        assert!(schedule.take_due(start).is_empty());

        let due_at = start + Duration::from_millis(10_000);
        assert_eq!(schedule.take_due(due_at), vec![TimerEvent::Tick]);
        assert_eq!(
            schedule.next_deadline(),
            Some(start + Duration::from_millis(20_000))
        );
    }

    #[test]
    fn late_wakeup_does_not_burst_ticks() {
        let start = Instant::now();
        let mut schedule = schedule();
        schedule.start_ticking(start);

        let late = start + Duration::from_millis(35_000);
        assert_eq!(schedule.take_due(late), vec![TimerEvent::Tick]);
        assert_eq!(
            schedule.next_deadline(),
            Some(late + Duration::from_millis(10_000))
        );
    }

    #[test]
    fn bursts_coalesce_into_one_debounce() {
        let start = Instant::now();
        let mut schedule = schedule();
        assert!(schedule.arm_debounce(start));
        assert!(!schedule.arm_debounce(start + Duration::from_millis(40)));

        let fire = start + Duration::from_millis(100);
        assert_eq!(schedule.timeout(start), Some(Duration::from_millis(100)));
        assert_eq!(schedule.take_due(fire), vec![TimerEvent::Debounce]);
        assert!(schedule.take_due(fire).is_empty());
    }

    #[test]
    fn cancel_clears_every_deadline() {
        let start = Instant::now();
        let mut schedule = schedule();
        schedule.start_ticking(start);
        schedule.arm_debounce(start);
        schedule.cancel_all();
        assert_eq!(schedule.next_deadline(), None);
        assert!(!schedule.is_ticking());
    }
}
