use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::warn;

use taskbeat_core::TriggerSpec;

use crate::{lunar, visual};

/// Result of a next-fire computation. `Never` carries the reason so the UI
/// can distinguish an exhausted one-shot from a broken configuration from a
/// trigger that waits on an external condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextFire {
    At(DateTime<Utc>),
    Never(NeverReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeverReason {
    /// One-shot trigger whose instant has already passed.
    Exhausted,
    /// Missing or malformed configuration for the declared kind.
    InvalidConfig,
    /// Fires only when an external monitor delivers a condition event.
    AwaitingCondition,
}

impl NextFire {
    pub fn at(self) -> Option<DateTime<Utc>> {
        match self {
            NextFire::At(t) => Some(t),
            NextFire::Never(_) => None,
        }
    }
}

/// Compute the next fire time for `trigger`, strictly after `now`.
///
/// Bad configuration resolves to `Never(InvalidConfig)` with a logged
/// warning — one broken task must not take the scheduler down.
pub fn next_fire_time(trigger: &TriggerSpec, now: DateTime<Utc>) -> NextFire {
    match trigger {
        TriggerSpec::Cron { expression } => cron_next(expression, now),
        TriggerSpec::Interval { millis } => {
            if *millis == 0 {
                return NextFire::Never(NeverReason::InvalidConfig);
            }
            NextFire::At(now + Duration::milliseconds(*millis as i64))
        }
        TriggerSpec::Date { at } => {
            if *at > now {
                NextFire::At(*at)
            } else {
                NextFire::Never(NeverReason::Exhausted)
            }
        }
        TriggerSpec::Visual(spec) => match visual::next_occurrence(spec, now) {
            Some(at) => NextFire::At(at),
            None => {
                warn!(spec = ?spec, "Incomplete visual trigger configuration");
                NextFire::Never(NeverReason::InvalidConfig)
            }
        },
        TriggerSpec::Lunar {
            month, day, time, ..
        } => match lunar::next_occurrence(*month, *day, time.as_deref(), now) {
            Some(at) => NextFire::At(at),
            None => {
                warn!(month, day, "Invalid lunar trigger configuration");
                NextFire::Never(NeverReason::InvalidConfig)
            }
        },
        TriggerSpec::Countdown {
            hours,
            minutes,
            seconds,
            started_at,
        } => {
            let total_secs = i64::from(*hours) * 3600 + i64::from(*minutes) * 60 + i64::from(*seconds);
            if total_secs == 0 {
                return NextFire::Never(NeverReason::InvalidConfig);
            }
            let at = *started_at + Duration::seconds(total_secs);
            if at > now {
                NextFire::At(at)
            } else {
                NextFire::Never(NeverReason::Exhausted)
            }
        }
        // Startup/resume sub-kinds are armed by the dispatch table through the
        // condition event channel; resource sub-kinds wait on an external
        // monitor. A pure time computation cannot resolve either.
        TriggerSpec::Conditional(_) => NextFire::Never(NeverReason::AwaitingCondition),
    }
}

/// Whether a fired trigger re-arms itself.
pub fn is_recurring(trigger: &TriggerSpec) -> bool {
    match trigger {
        TriggerSpec::Cron { .. } | TriggerSpec::Interval { .. } | TriggerSpec::Visual(_) => true,
        TriggerSpec::Lunar { repeat, .. } => *repeat,
        TriggerSpec::Date { .. } | TriggerSpec::Countdown { .. } | TriggerSpec::Conditional(_) => {
            false
        }
    }
}

/// Next cron occurrence strictly after `now`, evaluated in UTC.
///
/// Accepts the 5-field form (min hour dom mon dow) and normalizes it to the
/// 6-field form the `cron` crate expects by prepending a zero seconds field.
fn cron_next(expression: &str, now: DateTime<Utc>) -> NextFire {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        _ => {
            warn!(expression, "Cron expression must have 5-7 fields");
            return NextFire::Never(NeverReason::InvalidConfig);
        }
    };
    match Schedule::from_str(&normalized) {
        Ok(schedule) => match schedule.after(&now).next() {
            Some(next) => NextFire::At(next),
            None => NextFire::Never(NeverReason::Exhausted),
        },
        Err(e) => {
            warn!(expression, error = %e, "Invalid cron expression");
            NextFire::Never(NeverReason::InvalidConfig)
        }
    }
}
