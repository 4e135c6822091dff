//! Pomodoro-style countdown.

use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DURATION_MS: u64 = 25 * 60 * 1000;
pub const TICK_MS: u64 = 1000;

/// Quick-add amounts offered next to the display (+5m, +10m, +15m, +30m)
pub const ADJUST_PRESETS_MS: [i64; 4] = [300_000, 600_000, 900_000, 1_800_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { remaining_ms: u64 },
    Finished,
}

#[derive(Debug, Clone)]
pub struct CountdownTimer {
    initial_ms: u64,
    time_left_ms: u64,
    active: bool,
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_MS)
    }
}

impl CountdownTimer {
    pub fn new(initial_ms: u64) -> Self {
        Self {
            initial_ms,
            time_left_ms: initial_ms,
            active: false,
        }
    }

    pub fn initial_ms(&self) -> u64 {
        self.initial_ms
    }

    pub fn time_left_ms(&self) -> u64 {
        self.time_left_ms
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// "Time's up" state: nothing left and not running
    pub fn is_finished(&self) -> bool {
        self.time_left_ms == 0 && !self.active
    }

    /// Toggle running; does nothing once the time has run out
    pub fn start_pause(&mut self) {
        if self.time_left_ms > 0 {
            self.active = !self.active;
        }
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.initial_ms = 0;
        self.time_left_ms = 0;
    }

    /// Add (or remove, when negative) time, clamped at zero.
    ///
    /// While idle the change applies to the configured duration; while running
    /// it applies to what is left. Either way both values end up equal.
    pub fn adjust(&mut self, amount_ms: i64) {
        let base = if self.active {
            self.time_left_ms
        } else {
            self.initial_ms
        };
        let updated = if amount_ms >= 0 {
            base.saturating_add(amount_ms.unsigned_abs())
        } else {
            base.saturating_sub(amount_ms.unsigned_abs())
        };
        self.initial_ms = updated;
        self.time_left_ms = updated;
    }

    /// Advance the clock; `Finished` is reported exactly once
    pub fn tick(&mut self, elapsed_ms: u64) -> Option<TimerEvent> {
        if !self.active {
            return None;
        }
        self.time_left_ms = self.time_left_ms.saturating_sub(elapsed_ms);
        if self.time_left_ms == 0 {
            self.active = false;
            Some(TimerEvent::Finished)
        } else {
            Some(TimerEvent::Tick {
                remaining_ms: self.time_left_ms,
            })
        }
    }

    pub fn display(&self) -> String {
        format_hms(self.time_left_ms)
    }
}

/// `HH:MM:SS`, truncating partial seconds
pub fn format_hms(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Drive a running timer once per second until it finishes, is paused, or `cancel` fires.
///
/// Returns true when the countdown reached zero.
pub async fn run_countdown<F>(timer: &mut CountdownTimer, cancel: &CancellationToken, mut on_event: F) -> bool
where
    F: FnMut(TimerEvent),
{
    let mut ticker = interval(Duration::from_millis(TICK_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    while timer.is_active() {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(remaining_ms = timer.time_left_ms(), "countdown cancelled");
                return false;
            }
            _ = ticker.tick() => {
                if let Some(event) = timer.tick(TICK_MS) {
                    on_event(event);
                    if event == TimerEvent::Finished {
                        return true;
                    }
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(DEFAULT_DURATION_MS), "00:25:00");
        assert_eq!(format_hms(3_661_999), "01:01:01");
        assert_eq!(format_hms(0), "00:00:00");
    }

    #[test]
    fn start_pause_needs_time_left() {
        let mut timer = CountdownTimer::default();
        timer.start_pause();
        assert!(timer.is_active());
        timer.start_pause();
        assert!(!timer.is_active());

        timer.reset();
        timer.start_pause();
        assert!(!timer.is_active());
        assert!(timer.is_finished());
    }

    #[test]
    fn adjust_targets_initial_when_idle_and_remaining_when_running() {
        let mut timer = CountdownTimer::new(60_000);
        timer.adjust(ADJUST_PRESETS_MS[0]);
        assert_eq!(timer.initial_ms(), 360_000);
        assert_eq!(timer.time_left_ms(), 360_000);

        timer.start_pause();
        timer.tick(10_000);
        timer.adjust(60_000);
        assert_eq!(timer.time_left_ms(), 410_000);
        assert_eq!(timer.initial_ms(), 410_000);

        timer.adjust(-1_000_000);
        assert_eq!(timer.time_left_ms(), 0);
    }

    #[test]
    fn tick_reports_finished_once() {
        let mut timer = CountdownTimer::new(2_000);
        assert_eq!(timer.tick(1_000), None);

        timer.start_pause();
        assert_eq!(timer.tick(1_000), Some(TimerEvent::Tick { remaining_ms: 1_000 }));
        assert_eq!(timer.tick(1_000), Some(TimerEvent::Finished));
        assert_eq!(timer.tick(1_000), None);
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_runs_to_zero() {
        let mut timer = CountdownTimer::new(3_000);
        timer.start_pause();

        let mut events = Vec::new();
        let finished = run_countdown(&mut timer, &CancellationToken::new(), |e| events.push(e)).await;

        assert!(finished);
        assert_eq!(
            events,
            vec![
                TimerEvent::Tick { remaining_ms: 2_000 },
                TimerEvent::Tick { remaining_ms: 1_000 },
                TimerEvent::Finished,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_stops_on_cancel() {
        let mut timer = CountdownTimer::new(60_000);
        timer.start_pause();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let finished = run_countdown(&mut timer, &cancel, |_| {}).await;
        assert!(!finished);
        assert_eq!(timer.time_left_ms(), 60_000);
    }

    #[tokio::test]
    async fn idle_timer_returns_immediately() {
        let mut timer = CountdownTimer::default();
        assert!(!run_countdown(&mut timer, &CancellationToken::new(), |_| {}).await);
    }
}
