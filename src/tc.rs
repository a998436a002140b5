//! Per-side time-control ledger.
//!
//! A [`Clock`] consumes the measured duration of each move and reports
//! whether the side has fallen off its clock under the configured time
//! system. The arbiter owns the authoritative clock; engines only receive
//! `time_left` adverts derived from it.

use std::fmt;
use std::time::Duration;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum TimeSystem {
    #[default]
    None,
    Absolute,
    Canadian,
    Japanese,
}

impl TimeSystem {
    pub fn parse(s: &str) -> Option<TimeSystem> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "none" => Some(TimeSystem::None),
            "1" | "absolute" => Some(TimeSystem::Absolute),
            "2" | "canadian" => Some(TimeSystem::Canadian),
            "3" | "japanese" => Some(TimeSystem::Japanese),
            _ => None,
        }
    }
}

impl fmt::Display for TimeSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeSystem::None => "none",
            TimeSystem::Absolute => "absolute",
            TimeSystem::Canadian => "canadian byo-yomi",
            TimeSystem::Japanese => "japanese byo-yomi",
        };
        write!(f, "{s}")
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct TimeSettings {
    pub system: TimeSystem,
    pub main_time: Duration,
    pub period_time: Duration,
    pub period_count: u32,
    /// `None` disables violation checking entirely (config tolerance < 0).
    pub tolerance: Option<Duration>,
}

impl Default for TimeSettings {
    fn default() -> TimeSettings {
        TimeSettings {
            system: TimeSystem::None,
            main_time: Duration::ZERO,
            period_time: Duration::ZERO,
            period_count: 1,
            tolerance: Some(Duration::ZERO),
        }
    }
}

impl TimeSettings {
    pub fn validate(&self) -> Result<(), String> {
        match self.system {
            TimeSystem::Canadian | TimeSystem::Japanese => {
                if self.period_time.is_zero() {
                    return Err(format!("{} requires periodTime > 0", self.system));
                }
                if self.period_count == 0 {
                    return Err(format!("{} requires periodCount >= 1", self.system));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether the ledger tracks anything at all for these settings.
    pub fn checking(&self) -> bool {
        self.system != TimeSystem::None && self.tolerance.is_some()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Phase {
    Main,
    Period,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StepResult {
    Ok,
    Violation,
}

/// One side's clock for one game.
#[derive(Copy, Clone, Debug)]
pub struct Clock {
    settings: TimeSettings,
    phase: Phase,
    main_left: Duration,
    period_left: Duration,
    stones_left: u32,
    periods_left: u32,
    violated: bool,
}

impl Clock {
    pub fn new(settings: TimeSettings) -> Clock {
        Clock {
            settings,
            phase: Phase::Main,
            main_left: settings.main_time,
            period_left: settings.period_time,
            stones_left: settings.period_count,
            periods_left: settings.period_count,
            violated: false,
        }
    }

    pub fn violated(&self) -> bool {
        self.violated
    }

    /// Consume the measured thinking time of one move.
    pub fn deduct(&mut self, elapsed: Duration) -> StepResult {
        if !self.settings.checking() {
            return StepResult::Ok;
        }
        let tolerance = self.settings.tolerance.unwrap_or_default();
        match self.settings.system {
            TimeSystem::None => StepResult::Ok,
            TimeSystem::Absolute => {
                if elapsed <= self.main_left {
                    self.main_left -= elapsed;
                    return StepResult::Ok;
                }
                let over = elapsed - self.main_left;
                self.main_left = Duration::ZERO;
                if over > tolerance {
                    self.violated = true;
                    StepResult::Violation
                } else {
                    StepResult::Ok
                }
            }
            TimeSystem::Canadian => {
                let Some(spent) = self.enter_overtime(elapsed) else {
                    return StepResult::Ok;
                };
                let mut result = StepResult::Ok;
                if spent <= self.period_left {
                    self.period_left -= spent;
                } else {
                    let over = spent - self.period_left;
                    self.period_left = Duration::ZERO;
                    if over > tolerance {
                        result = StepResult::Violation;
                    }
                }
                self.stones_left -= 1;
                if self.stones_left == 0 {
                    self.period_left = self.settings.period_time;
                    self.stones_left = self.settings.period_count;
                }
                if result == StepResult::Violation {
                    // keep the side playable: one stone in one fresh period
                    self.violated = true;
                    self.period_left = self.settings.period_time;
                    self.stones_left = 1;
                }
                result
            }
            TimeSystem::Japanese => {
                let Some(spent) = self.enter_overtime(elapsed) else {
                    return StepResult::Ok;
                };
                let period = self.settings.period_time.as_secs_f64();
                let mut exhausted = (spent.as_secs_f64() / period) as u32;
                if exhausted >= self.periods_left {
                    let adjusted = spent.saturating_sub(tolerance);
                    exhausted = (adjusted.as_secs_f64() / period) as u32;
                }
                self.period_left = self.settings.period_time;
                if exhausted >= self.periods_left {
                    self.violated = true;
                    self.periods_left = 1;
                    StepResult::Violation
                } else {
                    self.periods_left -= exhausted;
                    StepResult::Ok
                }
            }
        }
    }

    /// Burn main time; when it underflows, switch to overtime and return the
    /// residual to be charged against the first period.
    fn enter_overtime(&mut self, elapsed: Duration) -> Option<Duration> {
        match self.phase {
            Phase::Period => Some(elapsed),
            Phase::Main => {
                if elapsed <= self.main_left {
                    self.main_left -= elapsed;
                    None
                } else {
                    let residual = elapsed - self.main_left;
                    self.main_left = Duration::ZERO;
                    self.phase = Phase::Period;
                    self.period_left = self.settings.period_time;
                    self.stones_left = self.settings.period_count;
                    self.periods_left = self.settings.period_count;
                    Some(residual)
                }
            }
        }
    }

    /// Everything this side could still think before a violation. Used as
    /// the `genmove` transport deadline so a well-behaved engine can never
    /// hit a transport timeout before a clock violation.
    pub fn budget(&self) -> Option<Duration> {
        if !self.settings.checking() {
            return None;
        }
        let tolerance = self.settings.tolerance.unwrap_or_default();
        let overtime = match self.settings.system {
            TimeSystem::None => return None,
            TimeSystem::Absolute => Duration::ZERO,
            TimeSystem::Canadian => self.period_left,
            TimeSystem::Japanese => self.settings.period_time * self.periods_left,
        };
        Some(self.main_left + overtime + tolerance)
    }

    /// `(seconds, count)` for the GTP `time_left` advert: seconds remaining
    /// in main time or the current period, and stones (Canadian) or periods
    /// (Japanese) remaining, 0 otherwise. `None` when no advert applies.
    pub fn time_left_args(&self) -> Option<(u64, u32)> {
        if !self.settings.checking() {
            return None;
        }
        let in_main = self.phase == Phase::Main
            && (self.settings.system == TimeSystem::Absolute || !self.main_left.is_zero());
        if in_main {
            return Some((self.main_left.as_secs(), 0));
        }
        match self.settings.system {
            TimeSystem::Canadian => Some((self.period_left.as_secs(), self.stones_left)),
            TimeSystem::Japanese => Some((
                self.settings.period_time.as_secs(),
                self.periods_left.max(1),
            )),
            _ => Some((self.main_left.as_secs(), 0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn settings(system: TimeSystem, main: f64, period: f64, count: u32, tol: f64) -> TimeSettings {
        TimeSettings {
            system,
            main_time: secs(main),
            period_time: secs(period),
            period_count: count,
            tolerance: if tol < 0.0 { None } else { Some(secs(tol)) },
        }
    }

    #[test]
    fn untimed_never_violates() {
        let mut clock = Clock::new(settings(TimeSystem::None, 0.0, 0.0, 1, 0.0));
        assert_eq!(clock.deduct(secs(3600.0)), StepResult::Ok);
        assert_eq!(clock.budget(), None);
        assert_eq!(clock.time_left_args(), None);
    }

    #[test]
    fn disabled_tolerance_disables_checking() {
        let mut clock = Clock::new(settings(TimeSystem::Absolute, 1.0, 0.0, 1, -1.0));
        assert_eq!(clock.deduct(secs(100.0)), StepResult::Ok);
        assert!(!clock.violated());
        assert_eq!(clock.budget(), None);
    }

    #[test]
    fn absolute_violates_past_tolerance() {
        let mut clock = Clock::new(settings(TimeSystem::Absolute, 10.0, 0.0, 1, 0.5));
        assert_eq!(clock.deduct(secs(6.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((4, 0)));
        // 4 left, 4.4 spent: over by 0.4, inside tolerance
        assert_eq!(clock.deduct(secs(4.4)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((0, 0)));
        // anything further past tolerance violates
        assert_eq!(clock.deduct(secs(0.6)), StepResult::Violation);
        assert!(clock.violated());
    }

    #[test]
    fn canadian_enforced_timeout_on_first_move() {
        // main 0, one stone per 5s period, tolerance 0.05
        let mut clock = Clock::new(settings(TimeSystem::Canadian, 0.0, 5.0, 1, 0.05));
        assert_eq!(clock.deduct(secs(5.20)), StepResult::Violation);
        assert!(clock.violated());
        // post-violation state: one stone in one full period
        assert_eq!(clock.time_left_args(), Some((5, 1)));
    }

    #[test]
    fn canadian_block_refills_after_last_stone() {
        let mut clock = Clock::new(settings(TimeSystem::Canadian, 0.0, 30.0, 3, 0.0));
        assert_eq!(clock.deduct(secs(10.0)), StepResult::Ok);
        assert_eq!(clock.deduct(secs(10.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((10, 1)));
        // last stone of the block within budget: refill
        assert_eq!(clock.deduct(secs(9.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((30, 3)));
    }

    #[test]
    fn canadian_overrunning_the_block_violates() {
        let mut clock = Clock::new(settings(TimeSystem::Canadian, 0.0, 30.0, 5, 0.0));
        for _ in 0..4 {
            assert_eq!(clock.deduct(secs(7.0)), StepResult::Ok);
        }
        // 2s left for the 5th stone
        assert_eq!(clock.deduct(secs(3.0)), StepResult::Violation);
        assert_eq!(clock.time_left_args(), Some((30, 1)));
    }

    #[test]
    fn canadian_consumes_main_before_periods() {
        let mut clock = Clock::new(settings(TimeSystem::Canadian, 10.0, 5.0, 2, 0.0));
        assert_eq!(clock.deduct(secs(8.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((2, 0)));
        // 2s main + 4s of the first period, one stone used
        assert_eq!(clock.deduct(secs(6.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((1, 1)));
    }

    #[test]
    fn japanese_period_refill() {
        // three 10s periods, tolerance 0
        let mut clock = Clock::new(settings(TimeSystem::Japanese, 0.0, 10.0, 3, 0.0));
        assert_eq!(clock.deduct(secs(9.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((10, 3)));
        assert_eq!(clock.deduct(secs(11.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((10, 2)));
        assert_eq!(clock.deduct(secs(9.0)), StepResult::Ok);
        assert_eq!(clock.time_left_args(), Some((10, 2)));
        assert!(!clock.violated());
    }

    #[test]
    fn japanese_burning_all_periods_violates() {
        let mut clock = Clock::new(settings(TimeSystem::Japanese, 0.0, 10.0, 3, 0.05));
        assert_eq!(clock.deduct(secs(15.0)), StepResult::Ok); // 2 periods left
        assert_eq!(clock.deduct(secs(25.0)), StepResult::Violation);
        // clamped to one period for an unenforced continuation
        assert_eq!(clock.time_left_args(), Some((10, 1)));
    }

    #[test]
    fn japanese_tolerance_rescues_boundary_moves() {
        let mut clock = Clock::new(settings(TimeSystem::Japanese, 0.0, 10.0, 1, 0.5));
        // 10.3s on a single 10s period: tolerance-adjusted to 9.8s, no violation
        assert_eq!(clock.deduct(secs(10.3)), StepResult::Ok);
        assert_eq!(clock.deduct(secs(10.6)), StepResult::Violation);
    }

    #[test]
    fn budget_covers_all_spendable_time() {
        let clock = Clock::new(settings(TimeSystem::Japanese, 30.0, 10.0, 3, 0.0));
        assert_eq!(clock.budget(), Some(secs(60.0)));

        let clock = Clock::new(settings(TimeSystem::Canadian, 30.0, 10.0, 5, 0.0));
        assert_eq!(clock.budget(), Some(secs(40.0)));

        let clock = Clock::new(settings(TimeSystem::Absolute, 30.0, 0.0, 1, 1.0));
        assert_eq!(clock.budget(), Some(secs(31.0)));
    }

    #[test]
    fn validation_requires_period_data_for_byoyomi() {
        assert!(settings(TimeSystem::Japanese, 0.0, 0.0, 1, 0.0).validate().is_err());
        assert!(settings(TimeSystem::Canadian, 0.0, 5.0, 0, 0.0).validate().is_err());
        assert!(settings(TimeSystem::Absolute, 0.0, 0.0, 0, 0.0).validate().is_ok());
    }
}
