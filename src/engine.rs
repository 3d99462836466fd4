//! Budget-gated win/loss decision engine.
//!
//! The engine holds the daily win budget in memory and decides each play with
//! a uniform draw against the configured win rate. The budget resets at local
//! midnight, detected lazily at the top of every public method rather than by
//! a timer, because the kiosk process may sleep through midnight.
//!
//! All methods are synchronous and take `&mut self`: the period check and the
//! budget decrement can never interleave with another call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{Days, NaiveDate};
use rand::Rng;
use tracing::{debug, info};

use crate::types::{now_millis, InventoryCounter, Outcome};

// === Randomness & Time Sources ===

/// Source of uniform draws in `[0, 100)`.
///
/// Not cryptographic. The kiosk is a consumer amusement device, not a
/// regulated gaming machine.
pub trait RollSource: Send {
    fn roll(&mut self) -> f64;
}

/// Production roll source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngRoll;

impl RollSource for ThreadRngRoll {
    fn roll(&mut self) -> f64 {
        rand::rng().random_range(0.0..100.0)
    }
}

/// Replays a fixed sequence of draws, then repeats the last one.
///
/// Used by simulations and tests that need reproducible outcomes.
#[derive(Debug, Clone)]
pub struct ScriptedRolls {
    queue: VecDeque<f64>,
    last: f64,
}

impl ScriptedRolls {
    pub fn new(rolls: impl IntoIterator<Item = f64>) -> Self {
        Self {
            queue: rolls.into_iter().collect(),
            last: 99.0,
        }
    }
}

impl RollSource for ScriptedRolls {
    fn roll(&mut self) -> f64 {
        if let Some(next) = self.queue.pop_front() {
            self.last = next;
        }
        self.last
    }
}

/// Source of the kiosk's local calendar date.
pub trait LocalClock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local calendar date from the OS timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Manually driven clock. Clones share the same date, so a test can keep a
/// handle and advance the day after the engine took ownership of its copy.
#[derive(Debug, Clone)]
pub struct ManualClock {
    date: Arc<Mutex<NaiveDate>>,
}

impl ManualClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Arc::new(Mutex::new(date)),
        }
    }

    pub fn set(&self, date: NaiveDate) {
        *self.date.lock().unwrap_or_else(|e| e.into_inner()) = date;
    }

    pub fn advance_days(&self, days: u64) {
        let mut date = self.date.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = date.checked_add_days(Days::new(days)) {
            *date = next;
        }
    }
}

impl LocalClock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.date.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// === Outcome Engine ===

/// Decides win or loss for each play while enforcing the daily budget.
pub struct OutcomeEngine {
    win_rate: f64,
    initial_budget: u32,
    remaining_budget: u32,
    last_reset_date: NaiveDate,
    rolls: Box<dyn RollSource>,
    clock: Box<dyn LocalClock>,
}

impl OutcomeEngine {
    /// Engine with the thread RNG and the OS local date.
    pub fn new(win_rate: f64, daily_budget: i64) -> Self {
        Self::with_sources(win_rate, daily_budget, ThreadRngRoll, SystemClock)
    }

    pub fn with_sources(
        win_rate: f64,
        daily_budget: i64,
        rolls: impl RollSource + 'static,
        clock: impl LocalClock + 'static,
    ) -> Self {
        let budget = clamp_budget(daily_budget);
        let today = clock.today();

        Self {
            win_rate: clamp_rate(win_rate),
            initial_budget: budget,
            remaining_budget: budget,
            last_reset_date: today,
            rolls: Box::new(rolls),
            clock: Box::new(clock),
        }
    }

    /// Reset the budget if the local date moved past the last reset date.
    fn ensure_current_period(&mut self) {
        let today = self.clock.today();
        if today != self.last_reset_date {
            self.remaining_budget = self.initial_budget;
            self.last_reset_date = today;
            info!(
                "[ENGINE] Daily budget reset to {} for {}",
                self.initial_budget, today
            );
        }
    }

    /// Decide the outcome of one play. A win consumes one unit of budget.
    pub fn determine_outcome(&mut self) -> Outcome {
        self.ensure_current_period();

        if self.remaining_budget == 0 {
            debug!("[ENGINE] Budget exhausted, forcing loss");
            return Outcome::Loss;
        }

        let roll = self.rolls.roll();
        if roll < self.win_rate {
            self.remaining_budget -= 1;
            debug!(
                "[ENGINE] Win (roll={:.2} < rate={:.2}), remaining budget {}",
                roll, self.win_rate, self.remaining_budget
            );
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }

    /// Set the win rate, clamped to `[0, 100]`. Applies from the next play.
    pub fn set_win_rate(&mut self, rate: f64) {
        self.ensure_current_period();
        self.win_rate = clamp_rate(rate);
    }

    /// Replace both initial and remaining budget immediately.
    ///
    /// Harder than the midnight rollover: wins already paid today are forgotten.
    pub fn set_budget(&mut self, budget: i64) {
        self.ensure_current_period();
        let budget = clamp_budget(budget);
        self.initial_budget = budget;
        self.remaining_budget = budget;
        info!("[ENGINE] Budget set to {}", budget);
    }

    pub fn remaining_budget(&mut self) -> u32 {
        self.ensure_current_period();
        self.remaining_budget
    }

    pub fn win_rate(&self) -> f64 {
        self.win_rate
    }

    pub fn initial_budget(&self) -> u32 {
        self.initial_budget
    }

    pub fn last_reset_date(&self) -> NaiveDate {
        self.last_reset_date
    }

    /// Refill the budget and stamp today as the reset date.
    pub fn force_reset(&mut self) {
        self.remaining_budget = self.initial_budget;
        self.last_reset_date = self.clock.today();
    }

    /// Current counter, suitable for persisting.
    pub fn snapshot(&mut self, kiosk_id: &str) -> InventoryCounter {
        self.ensure_current_period();
        InventoryCounter {
            kiosk_id: kiosk_id.to_string(),
            date: self.last_reset_date,
            initial_budget: self.initial_budget,
            remaining_budget: self.remaining_budget,
            last_updated: now_millis(),
        }
    }

    /// Resume from a persisted counter.
    ///
    /// A counter dated today restores the remaining budget as-is; an older one
    /// only carries its initial budget into a fresh day.
    pub fn restore(&mut self, counter: &InventoryCounter) {
        let today = self.clock.today();
        self.initial_budget = counter.initial_budget;

        if counter.date == today {
            self.remaining_budget = counter.remaining_budget.min(counter.initial_budget);
        } else {
            self.remaining_budget = counter.initial_budget;
        }
        self.last_reset_date = today;

        info!(
            "[ENGINE] Restored budget {}/{} (counter dated {})",
            self.remaining_budget, self.initial_budget, counter.date
        );
    }
}

impl std::fmt::Debug for OutcomeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeEngine")
            .field("win_rate", &self.win_rate)
            .field("initial_budget", &self.initial_budget)
            .field("remaining_budget", &self.remaining_budget)
            .field("last_reset_date", &self.last_reset_date)
            .finish_non_exhaustive()
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        return 0.0;
    }
    rate.clamp(0.0, 100.0)
}

pub(crate) fn clamp_budget(budget: i64) -> u32 {
    budget.clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine(rate: f64, budget: i64, rolls: Vec<f64>, clock: &ManualClock) -> OutcomeEngine {
        OutcomeEngine::with_sources(rate, budget, ScriptedRolls::new(rolls), clock.clone())
    }

    #[test]
    fn test_budget_exhaustion_forces_loss() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(30.0, 2, vec![10.0, 10.0, 10.0], &clock);

        assert_eq!(e.determine_outcome(), Outcome::Win);
        assert_eq!(e.determine_outcome(), Outcome::Win);
        assert_eq!(e.determine_outcome(), Outcome::Loss);
        assert_eq!(e.remaining_budget(), 0);
    }

    #[test]
    fn test_loss_does_not_consume_budget() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(30.0, 3, vec![30.0, 99.9, 50.0], &clock);

        for _ in 0..3 {
            assert_eq!(e.determine_outcome(), Outcome::Loss);
        }
        assert_eq!(e.remaining_budget(), 3);
    }

    #[test]
    fn test_midnight_rollover_restores_initial_budget() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(100.0, 2, vec![0.0], &clock);

        e.determine_outcome();
        e.determine_outcome();
        assert_eq!(e.remaining_budget(), 0);

        clock.advance_days(1);
        assert_eq!(e.remaining_budget(), 2);
        assert_eq!(e.last_reset_date(), day(2026, 3, 2));
    }

    #[test]
    fn test_rollover_applies_before_the_play() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(100.0, 1, vec![0.0], &clock);

        assert_eq!(e.determine_outcome(), Outcome::Win);
        assert_eq!(e.determine_outcome(), Outcome::Loss);

        clock.advance_days(1);
        assert_eq!(e.determine_outcome(), Outcome::Win);
    }

    #[test]
    fn test_set_budget_is_a_hard_reset() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(100.0, 3, vec![0.0], &clock);

        e.determine_outcome();
        e.determine_outcome();
        assert_eq!(e.remaining_budget(), 1);

        e.set_budget(5);
        assert_eq!(e.remaining_budget(), 5);
        assert_eq!(e.initial_budget(), 5);
    }

    #[test]
    fn test_inputs_are_clamped() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(30.0, 1, vec![], &clock);

        e.set_win_rate(-5.0);
        assert_eq!(e.win_rate(), 0.0);
        e.set_win_rate(250.0);
        assert_eq!(e.win_rate(), 100.0);
        e.set_win_rate(f64::NAN);
        assert_eq!(e.win_rate(), 0.0);

        e.set_budget(-3);
        assert_eq!(e.remaining_budget(), 0);
    }

    #[test]
    fn test_zero_rate_never_wins() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(0.0, 10, vec![0.0], &clock);

        for _ in 0..20 {
            assert_eq!(e.determine_outcome(), Outcome::Loss);
        }
    }

    #[test]
    fn test_restore_same_day_keeps_remaining() {
        let clock = ManualClock::new(day(2026, 3, 1));
        let mut e = engine(30.0, 50, vec![], &clock);

        e.restore(&InventoryCounter {
            kiosk_id: "K".into(),
            date: day(2026, 3, 1),
            initial_budget: 20,
            remaining_budget: 4,
            last_updated: 0,
        });
        assert_eq!(e.initial_budget(), 20);
        assert_eq!(e.remaining_budget(), 4);
    }

    #[test]
    fn test_restore_stale_counter_starts_fresh_day() {
        let clock = ManualClock::new(day(2026, 3, 2));
        let mut e = engine(30.0, 50, vec![], &clock);

        e.restore(&InventoryCounter {
            kiosk_id: "K".into(),
            date: day(2026, 3, 1),
            initial_budget: 20,
            remaining_budget: 0,
            last_updated: 0,
        });
        assert_eq!(e.remaining_budget(), 20);
        assert_eq!(e.snapshot("K").date, day(2026, 3, 2));
    }

    #[test]
    fn test_thread_rng_roll_in_range() {
        let mut rolls = ThreadRngRoll;
        for _ in 0..1000 {
            let r = rolls.roll();
            assert!((0.0..100.0).contains(&r));
        }
    }
}
