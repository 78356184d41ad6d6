//! Lunar (Chinese lunisolar) calendar conversion.
//!
//! Uses the standard packed-bitfield year table covering 1900–2100: the low
//! nibble holds the leap month (0 = none), bits 4–15 hold the 29/30-day flag
//! for months 12..1, and bit 16 holds the leap month's length.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::visual::parse_hhmm;

const FIRST_YEAR: i32 = 1900;
const LAST_YEAR: i32 = 2100;

#[rustfmt::skip]
const LUNAR_INFO: [u32; 201] = [
    // 1900-1909
    0x04bd8, 0x04ae0, 0x0a570, 0x054d5, 0x0d260, 0x0d950, 0x16554, 0x056a0, 0x09ad0, 0x055d2,
    // 1910-1919
    0x04ae0, 0x0a5b6, 0x0a4d0, 0x0d250, 0x1d255, 0x0b540, 0x0d6a0, 0x0ada2, 0x095b0, 0x14977,
    // 1920-1929
    0x04970, 0x0a4b0, 0x0b4b5, 0x06a50, 0x06d40, 0x1ab54, 0x02b60, 0x09570, 0x052f2, 0x04970,
    // 1930-1939
    0x06566, 0x0d4a0, 0x0ea50, 0x06e95, 0x05ad0, 0x02b60, 0x186e3, 0x092e0, 0x1c8d7, 0x0c950,
    // 1940-1949
    0x0d4a0, 0x1d8a6, 0x0b550, 0x056a0, 0x1a5b4, 0x025d0, 0x092d0, 0x0d2b2, 0x0a950, 0x0b557,
    // 1950-1959
    0x06ca0, 0x0b550, 0x15355, 0x04da0, 0x0a5b0, 0x14573, 0x052b0, 0x0a9a8, 0x0e950, 0x06aa0,
    // 1960-1969
    0x0aea6, 0x0ab50, 0x04b60, 0x0aae4, 0x0a570, 0x05260, 0x0f263, 0x0d950, 0x05b57, 0x056a0,
    // 1970-1979
    0x096d0, 0x04dd5, 0x04ad0, 0x0a4d0, 0x0d4d4, 0x0d250, 0x0d558, 0x0b540, 0x0b6a0, 0x195a6,
    // 1980-1989
    0x095b0, 0x049b0, 0x0a974, 0x0a4b0, 0x0b27a, 0x06a50, 0x06d40, 0x0af46, 0x0ab60, 0x09570,
    // 1990-1999
    0x04af5, 0x04970, 0x064b0, 0x074a3, 0x0ea50, 0x06b58, 0x05ac0, 0x0ab60, 0x096d5, 0x092e0,
    // 2000-2009
    0x0c960, 0x0d954, 0x0d4a0, 0x0da50, 0x07552, 0x056a0, 0x0abb7, 0x025d0, 0x092d0, 0x0cab5,
    // 2010-2019
    0x0a950, 0x0b4a0, 0x0baa4, 0x0ad50, 0x055d9, 0x04ba0, 0x0a5b0, 0x15176, 0x052b0, 0x0a930,
    // 2020-2029
    0x07954, 0x06aa0, 0x0ad50, 0x05b52, 0x04b60, 0x0a6e6, 0x0a4e0, 0x0d260, 0x0ea65, 0x0d530,
    // 2030-2039
    0x05aa0, 0x076a3, 0x096d0, 0x04afb, 0x04ad0, 0x0a4d0, 0x1d0b6, 0x0d250, 0x0d520, 0x0dd45,
    // 2040-2049
    0x0b5a0, 0x056d0, 0x055b2, 0x049b0, 0x0a577, 0x0a4b0, 0x0aa50, 0x1b255, 0x06d20, 0x0ada0,
    // 2050-2059
    0x14b63, 0x09370, 0x049f8, 0x04970, 0x064b0, 0x168a6, 0x0ea50, 0x06b20, 0x1a6c4, 0x0aae0,
    // 2060-2069
    0x0a2e0, 0x0d2e3, 0x0c960, 0x0d557, 0x0d4a0, 0x0da50, 0x05d55, 0x056a0, 0x0a6d0, 0x055d4,
    // 2070-2079
    0x052d0, 0x0a9b8, 0x0a950, 0x0b4a0, 0x0b6a6, 0x0ad50, 0x055a0, 0x0aba4, 0x0a5b0, 0x052b0,
    // 2080-2089
    0x0b273, 0x06930, 0x07337, 0x06aa0, 0x0ad50, 0x14b55, 0x04b60, 0x0a570, 0x054e4, 0x0d160,
    // 2090-2099
    0x0e968, 0x0d520, 0x0daa0, 0x16aa6, 0x056d0, 0x04ae0, 0x0a9d4, 0x0a2d0, 0x0d150, 0x0f252,
    // 2100
    0x0d520,
];

fn info(year: i32) -> u32 {
    LUNAR_INFO[(year - FIRST_YEAR) as usize]
}

/// Leap month of a lunar year (0 = no leap month).
fn leap_month(year: i32) -> u32 {
    info(year) & 0xf
}

fn leap_days(year: i32) -> i64 {
    if leap_month(year) == 0 {
        0
    } else if info(year) & 0x10000 != 0 {
        30
    } else {
        29
    }
}

/// Days in regular lunar month `month` (1..=12) of `year`.
fn month_days(year: i32, month: u32) -> i64 {
    if info(year) & (0x10000 >> month) != 0 {
        30
    } else {
        29
    }
}

fn year_days(year: i32) -> i64 {
    let mut sum = 348;
    let mut bit = 0x8000;
    while bit > 0x8 {
        if info(year) & bit != 0 {
            sum += 1;
        }
        bit >>= 1;
    }
    sum + leap_days(year)
}

/// Convert lunar (year, month, day) to a Gregorian date. Leap months are not
/// addressable; `None` for out-of-range years or days the month lacks.
pub fn lunar_to_solar(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(FIRST_YEAR..=LAST_YEAR).contains(&year) || !(1..=12).contains(&month) {
        return None;
    }
    if day == 0 || i64::from(day) > month_days(year, month) {
        return None;
    }
    // Lunar 1900-01-01 == Gregorian 1900-01-31.
    let mut offset: i64 = 0;
    for y in FIRST_YEAR..year {
        offset += year_days(y);
    }
    let leap = leap_month(year);
    for m in 1..month {
        offset += month_days(year, m);
        if m == leap {
            offset += leap_days(year);
        }
    }
    offset += i64::from(day) - 1;
    let base = NaiveDate::from_ymd_opt(1900, 1, 31)?;
    Some(base + Duration::days(offset))
}

/// Nearest future Gregorian occurrence of a lunar month/day, strictly after
/// `now`. Rolls to the next lunar year when this year's instant has passed.
pub fn next_occurrence(
    month: u32,
    day: u32,
    time: Option<&str>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let (h, m) = match time {
        Some(s) => parse_hhmm(s)?,
        None => (0, 0),
    };
    // A late lunar month of year Y-1 can land in Gregorian year Y, so start
    // one lunar year back. Years lacking the day (29-day month, day 30) are
    // skipped, hence the extra headroom.
    for lunar_year in (now.year() - 1)..=(now.year() + 3) {
        if let Some(date) = lunar_to_solar(lunar_year, month, day) {
            let t = date.and_hms_opt(h, m, 0)?.and_utc();
            if t > now {
                return Some(t);
            }
        }
    }
    None
}
