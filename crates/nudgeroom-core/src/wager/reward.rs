//! Payout for a won bet.
//!
//! `reward = round(wager * (1 + streak_bonus + time_bonus))`
//!
//! - `streak_bonus = 0.15 * ln(ln(streak + e))`, zero for a fresh streak.
//! - `time_bonus` scales with the slack between the bet deadline and the
//!   task's own due time, saturating at two weeks.

use chrono::{DateTime, Duration, Utc};

/// Weight of the streak term.
pub const STREAK_WEIGHT: f64 = 0.15;

/// Largest possible time bonus.
pub const MAX_TIME_BONUS: f64 = 0.25;

/// Fraction of [`MAX_TIME_BONUS`] granted when the task has no due time.
pub const NO_DUE_FRACTION: f64 = 0.3;

/// Slack at which the time bonus saturates.
pub fn time_bonus_horizon() -> Duration {
    Duration::days(14)
}

pub fn streak_bonus(streak: u32) -> f64 {
    // ln(ln(e)) is 0 mathematically; skip the float round trip.
    if streak == 0 {
        return 0.0;
    }
    STREAK_WEIGHT * (f64::from(streak) + std::f64::consts::E).ln().ln()
}

pub fn time_bonus(deadline: DateTime<Utc>, task_due: Option<DateTime<Utc>>) -> f64 {
    let Some(due) = task_due else {
        return MAX_TIME_BONUS * NO_DUE_FRACTION;
    };
    let horizon = time_bonus_horizon();
    let slack = (due - deadline).clamp(Duration::zero(), horizon);
    // Millisecond counts stay far below 2^53, so the conversion is exact.
    #[allow(clippy::cast_precision_loss)]
    let ratio = slack.num_milliseconds() as f64 / horizon.num_milliseconds() as f64;
    ratio * MAX_TIME_BONUS
}

/// Points credited for winning a bet of `wager` with `streak` prior wins.
pub fn reward(
    wager: i64,
    streak: u32,
    deadline: DateTime<Utc>,
    task_due: Option<DateTime<Utc>>,
) -> i64 {
    let multiplier = 1.0 + streak_bonus(streak) + time_bonus(deadline, task_due);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let points = (wager as f64 * multiplier).round() as i64;
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn fresh_streak_without_due_time() {
        // 20 * 1.075 = 21.5, rounded half away from zero.
        assert_eq!(reward(20, 0, at(0), None), 22);
    }

    #[test]
    fn streak_bonus_grows_slowly() {
        assert_eq!(streak_bonus(0), 0.0);
        assert!(streak_bonus(1) > 0.0);
        assert!(streak_bonus(10) < 0.15);
    }

    #[test]
    fn time_bonus_saturates_at_horizon() {
        let deadline = at(0);
        assert_eq!(time_bonus(deadline, Some(deadline)), 0.0);
        assert_eq!(time_bonus(deadline, Some(deadline + Duration::days(30))), MAX_TIME_BONUS);
        let half = time_bonus(deadline, Some(deadline + Duration::days(7)));
        assert!((half - MAX_TIME_BONUS / 2.0).abs() < 1e-12);
    }

    #[test]
    fn max_bonus_example() {
        // 100 * (1 + 0 + 0.25)
        assert_eq!(reward(100, 0, at(0), Some(at(0) + Duration::days(14))), 125);
    }

    proptest! {
        #[test]
        fn prop_reward_never_below_wager(
            wager in 1i64..10_000,
            streak in 0u32..1_000,
            slack_hours in -500i64..1_000,
        ) {
            let deadline = at(1_700_000_000);
            let due = deadline + Duration::hours(slack_hours);
            prop_assert!(reward(wager, streak, deadline, Some(due)) >= wager);
            prop_assert!(reward(wager, streak, deadline, None) >= wager);
        }

        #[test]
        fn prop_reward_monotonic_in_streak(wager in 1i64..10_000, streak in 0u32..1_000) {
            let deadline = at(1_700_000_000);
            prop_assert!(
                reward(wager, streak + 1, deadline, None) >= reward(wager, streak, deadline, None)
            );
        }

        #[test]
        fn prop_reward_monotonic_in_slack(wager in 1i64..10_000, hours in 0i64..400) {
            let deadline = at(1_700_000_000);
            let near = reward(wager, 3, deadline, Some(deadline + Duration::hours(hours)));
            let far = reward(wager, 3, deadline, Some(deadline + Duration::hours(hours + 1)));
            prop_assert!(far >= near);
        }
    }
}
