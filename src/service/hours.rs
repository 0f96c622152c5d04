//! Hours arithmetic (C4). Everything is computed in whole minutes and only
//! converted to 2-decimal hours at the edge.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::calendar::{ProductionCalendar, ProductionDayKind};
use crate::model::{BreakPolicy, Employment, Position, RegionId};

pub fn round2(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

pub fn minutes_to_hours(minutes: i64) -> f64 {
    round2(minutes as f64 / 60.0)
}

/// Gross shift length minus the break-table deduction, floored at zero.
pub fn work_minutes(start: NaiveDateTime, end: NaiveDateTime, policy: &BreakPolicy) -> i64 {
    let gross = (end - start).num_minutes();
    (gross - policy.break_minutes_for(gross)).max(0)
}

pub fn interval_work_hours(start: NaiveDateTime, end: NaiveDateTime, policy: &BreakPolicy) -> f64 {
    minutes_to_hours(work_minutes(start, end, policy))
}

/// Minutes of `[start, end)` that fall into the configured night band.
/// The band may wrap midnight (22:00–06:00); each calendar day touched by
/// the shift contributes its own copy of the band.
pub fn night_minutes(
    start: NaiveDateTime,
    end: NaiveDateTime,
    night_start: NaiveTime,
    night_end: NaiveTime,
) -> i64 {
    if end <= start {
        return 0;
    }
    let mut total = 0i64;
    // Bands anchored one day before the shift can still overlap its head.
    let mut day = start.date() - Duration::days(1);
    let last = end.date();
    while day <= last {
        let bands: Vec<(NaiveDateTime, NaiveDateTime)> = if night_start > night_end {
            vec![(day.and_time(night_start), (day + Duration::days(1)).and_time(night_end))]
        } else {
            vec![(day.and_time(night_start), day.and_time(night_end))]
        };
        for (band_start, band_end) in bands {
            let lo = start.max(band_start);
            let hi = end.min(band_end);
            if hi > lo {
                total += (hi - lo).num_minutes();
            }
        }
        day += Duration::days(1);
    }
    total
}

/// Split a worked interval into (day, night) hours. Breaks are deducted from
/// the day part first, matching how the tabulation treats them.
pub fn split_day_night(
    start: NaiveDateTime,
    end: NaiveDateTime,
    policy: &BreakPolicy,
    night_start: NaiveTime,
    night_end: NaiveTime,
) -> (f64, f64) {
    let net = work_minutes(start, end, policy);
    let night = night_minutes(start, end, night_start, night_end).min(net);
    let day = net - night;
    (minutes_to_hours(day), minutes_to_hours(night))
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month");
    (next - first).num_days() as u32
}

/// Daily norm of an employment: weekly position norm scaled by the
/// employment rate, spread over a five-day week.
pub fn daily_norm_hours(employment: &Employment, position: &Position) -> f64 {
    position.hours_in_a_week * (employment.norm_work_hours / 100.0) / 40.0 * 8.0
}

/// Norm hours over an inclusive date range: the daily norm on every working
/// calendar day, one hour less on abbreviated days.
pub fn norm_hours(
    employment: &Employment,
    position: &Position,
    region_id: Option<RegionId>,
    calendar: &ProductionCalendar,
    dt_from: NaiveDate,
    dt_to: NaiveDate,
) -> f64 {
    let per_day = daily_norm_hours(employment, position);
    let mut total = 0.0;
    for (_, kind) in calendar.working_days(region_id, dt_from, dt_to) {
        total += match kind {
            ProductionDayKind::ShortWorkday => (per_day - 1.0).max(0.0),
            _ => per_day,
        };
    }
    round2(total)
}

pub fn month_norm_hours(
    employment: &Employment,
    position: &Position,
    region_id: Option<RegionId>,
    calendar: &ProductionCalendar,
    year: i32,
    month: u32,
) -> f64 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month)).expect("valid day");
    norm_hours(employment, position, region_id, calendar, first, last)
}

/// Daily average used by `average_sawh` absence types: the month norm spread
/// over every calendar day of the month.
pub fn average_sawh(month_norm: f64, year: i32, month: u32) -> f64 {
    round2(month_norm / days_in_month(year, month) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BreakRule;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn policy(rules: Vec<(i64, Vec<i64>)>) -> BreakPolicy {
        BreakPolicy::new(
            1,
            "test",
            rules
                .into_iter()
                .map(|(min_shift_minutes, breaks_minutes)| BreakRule { min_shift_minutes, breaks_minutes })
                .collect(),
        )
    }

    #[test]
    fn nine_hour_shift_loses_its_breaks() {
        let p = policy(vec![(540, vec![30, 30, 15])]);
        let h = interval_work_hours(dt(2024, 3, 10, 9, 0), dt(2024, 3, 10, 18, 0), &p);
        assert_eq!(h, 7.75);
    }

    #[test]
    fn breaks_never_push_below_zero() {
        let p = policy(vec![(0, vec![120])]);
        assert_eq!(work_minutes(dt(2024, 3, 10, 9, 0), dt(2024, 3, 10, 10, 0), &p), 0);
    }

    #[test]
    fn night_shift_is_entirely_night() {
        // 22:00 → 06:00 inside a 22:00–06:00 band, one hour of break.
        let p = policy(vec![(480, vec![60])]);
        let (day, night) = split_day_night(
            dt(2024, 3, 10, 22, 0),
            dt(2024, 3, 11, 6, 0),
            &p,
            t(22, 0),
            t(6, 0),
        );
        assert_eq!(night, 7.0);
        assert_eq!(day, 0.0);
    }

    #[test]
    fn evening_shift_splits_at_band_start() {
        let p = policy(vec![]);
        let (day, night) = split_day_night(
            dt(2024, 3, 10, 18, 0),
            dt(2024, 3, 10, 23, 0),
            &p,
            t(22, 0),
            t(6, 0),
        );
        assert_eq!(day, 4.0);
        assert_eq!(night, 1.0);
    }

    #[test]
    fn early_morning_head_overlaps_previous_band() {
        let p = policy(vec![]);
        let (day, night) = split_day_night(
            dt(2024, 3, 10, 5, 0),
            dt(2024, 3, 10, 9, 0),
            &p,
            t(22, 0),
            t(6, 0),
        );
        assert_eq!(night, 1.0);
        assert_eq!(day, 3.0);
    }

    #[test]
    fn non_wrapping_band_works_too() {
        let p = policy(vec![]);
        let n = night_minutes(dt(2024, 3, 10, 0, 0), dt(2024, 3, 10, 8, 0), t(2, 0), t(5, 0));
        assert_eq!(n, 180);
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 12), 31);
    }

    #[test]
    fn norm_scales_with_rate_and_short_days() {
        use crate::model::calendar::{ProductionCalendar, ProductionDayKind};

        let employment = Employment {
            id: 1,
            employee_id: 1,
            shop_id: 1,
            position_id: 1,
            norm_work_hours: 50.0,
            dt_hired: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            dt_fired: None,
            week_availability: None,
            dttm_deleted: None,
        };
        let position = Position {
            id: 1,
            title: "p".into(),
            hours_in_a_week: 40.0,
            break_policy_id: None,
            default_work_type_id: None,
        };
        let mut cal = ProductionCalendar::new();
        // Mon 2024-03-04 .. Fri 2024-03-08, Friday abbreviated.
        cal.set_day(0, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(), ProductionDayKind::ShortWorkday);

        let norm = norm_hours(
            &employment,
            &position,
            Some(0),
            &cal,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
        );
        // Half rate: 4h/day × 5 − 1h short-day decrement
        assert_eq!(norm, 19.0);
    }

    #[test]
    fn average_sawh_spreads_over_calendar_days() {
        assert_eq!(average_sawh(168.0, 2024, 3), round2(168.0 / 31.0));
    }
}
