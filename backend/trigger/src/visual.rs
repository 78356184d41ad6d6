//! Human-friendly recurrence ("visual" triggers): once / minute / hour /
//! day / week / month, computed in UTC.
//!
//! Tie-break rule: a computed instant that is not strictly after `now`
//! advances by one additional period.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use taskbeat_core::{VisualKind, VisualSpec};

/// Parse a "HH:MM" wall-clock string.
pub(crate) fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some((h, m))
}

/// Next occurrence strictly after `now`, or `None` when the spec is
/// incomplete for its declared kind.
pub fn next_occurrence(spec: &VisualSpec, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match spec.visual_type {
        VisualKind::Once => {
            let (h, m) = parse_hhmm(spec.visual_time.as_deref()?)?;
            let mut t = now.date_naive().and_hms_opt(h, m, 0)?.and_utc();
            if t <= now {
                t += Duration::days(1);
            }
            Some(t)
        }
        VisualKind::Minute => {
            let n = spec.visual_interval.unwrap_or(1);
            (n > 0).then(|| now + Duration::minutes(i64::from(n)))
        }
        VisualKind::Hour => {
            let n = spec.visual_interval.unwrap_or(1);
            (n > 0).then(|| now + Duration::hours(i64::from(n)))
        }
        VisualKind::Day => {
            let n = spec.visual_interval.unwrap_or(1);
            if n == 0 {
                return None;
            }
            let (h, m) = parse_hhmm(spec.visual_time.as_deref()?)?;
            let mut t = now.date_naive().and_hms_opt(h, m, 0)?.and_utc();
            if t <= now {
                t += Duration::days(i64::from(n));
            }
            Some(t)
        }
        VisualKind::Week => {
            let weekday = spec.visual_weekday?;
            if weekday > 6 {
                return None;
            }
            let (h, m) = parse_hhmm(spec.visual_time.as_deref()?)?;
            let today = now.weekday().num_days_from_sunday();
            let ahead = (weekday + 7 - today) % 7;
            let mut t = (now.date_naive() + Duration::days(i64::from(ahead)))
                .and_hms_opt(h, m, 0)?
                .and_utc();
            if t <= now {
                t += Duration::days(7);
            }
            Some(t)
        }
        VisualKind::Month => {
            let day = spec.visual_day?;
            if !(1..=31).contains(&day) {
                return None;
            }
            let (h, m) = parse_hhmm(spec.visual_time.as_deref()?)?;
            let (mut year, mut month) = (now.year(), now.month());
            // Skip months that lack the requested day (e.g. the 31st).
            for _ in 0..24 {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    let t = date.and_hms_opt(h, m, 0)?.and_utc();
                    if t > now {
                        return Some(t);
                    }
                }
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn spec(kind: VisualKind) -> VisualSpec {
        VisualSpec {
            visual_type: kind,
            visual_time: None,
            visual_interval: None,
            visual_weekday: None,
            visual_day: None,
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn once_rolls_to_tomorrow_when_time_already_passed() {
        let mut s = spec(VisualKind::Once);
        s.visual_time = Some("09:00".into());
        let now = at(2024, 1, 1, 10, 0);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 2, 9, 0)));
    }

    #[test]
    fn once_fires_today_when_time_still_ahead() {
        let mut s = spec(VisualKind::Once);
        s.visual_time = Some("23:30".into());
        let now = at(2024, 1, 1, 10, 0);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 1, 23, 30)));
    }

    #[test]
    fn minute_and_hour_are_fixed_periods_from_now() {
        let now = at(2024, 1, 1, 10, 0);
        let mut s = spec(VisualKind::Minute);
        s.visual_interval = Some(5);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 1, 10, 5)));

        let mut s = spec(VisualKind::Hour);
        s.visual_interval = Some(2);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 1, 12, 0)));
    }

    #[test]
    fn day_kind_advances_by_the_configured_stride() {
        let mut s = spec(VisualKind::Day);
        s.visual_interval = Some(3);
        s.visual_time = Some("08:00".into());
        let now = at(2024, 1, 1, 9, 0);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 4, 8, 0)));
    }

    #[test]
    fn week_wraps_to_next_week_when_day_has_passed() {
        // 2024-01-01 is a Monday (weekday index 1).
        let mut s = spec(VisualKind::Week);
        s.visual_weekday = Some(1);
        s.visual_time = Some("08:00".into());
        let now = at(2024, 1, 1, 9, 0);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 8, 8, 0)));

        // Friday (index 5) is still ahead this week.
        s.visual_weekday = Some(5);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 5, 8, 0)));
    }

    #[test]
    fn month_prefers_this_month_when_not_yet_passed() {
        let mut s = spec(VisualKind::Month);
        s.visual_day = Some(15);
        s.visual_time = Some("12:00".into());
        let now = at(2024, 1, 10, 0, 0);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 1, 15, 12, 0)));

        let now = at(2024, 1, 20, 0, 0);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 2, 15, 12, 0)));
    }

    #[test]
    fn month_skips_months_without_the_requested_day() {
        let mut s = spec(VisualKind::Month);
        s.visual_day = Some(31);
        s.visual_time = Some("00:30".into());
        // February has no 31st; March does.
        let now = at(2024, 2, 1, 0, 0);
        assert_eq!(next_occurrence(&s, now), Some(at(2024, 3, 31, 0, 30)));
    }

    #[test]
    fn incomplete_specs_yield_none() {
        let now = at(2024, 1, 1, 10, 0);
        assert_eq!(next_occurrence(&spec(VisualKind::Once), now), None);
        assert_eq!(next_occurrence(&spec(VisualKind::Week), now), None);
        assert_eq!(next_occurrence(&spec(VisualKind::Month), now), None);

        let mut s = spec(VisualKind::Once);
        s.visual_time = Some("25:00".into());
        assert_eq!(next_occurrence(&s, now), None);
    }
}
