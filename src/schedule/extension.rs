use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use super::dates::BreakCalendar;
use super::resolver::{
    get_end_date, get_schedule_weeks, week_breakdown, CourseRules, ScheduleInput, ScheduledWeek,
};
use super::weeks::WeekdayPattern;

pub const NEXT_COURSE_SCAN_DAYS: i64 = 60;

/// First class day after `end_date` that is not inside a break, scanning at
/// most [`NEXT_COURSE_SCAN_DAYS`] days.
pub fn get_next_course_date(
    end_date: NaiveDate,
    course_days: WeekdayPattern,
    breaks: &BreakCalendar,
) -> NaiveDate {
    next_course_date_within(end_date, course_days, breaks, NEXT_COURSE_SCAN_DAYS)
}

/// Scan bound is configurable per workspace. When nothing qualifies the
/// boundary date is returned.
pub fn next_course_date_within(
    end_date: NaiveDate,
    course_days: WeekdayPattern,
    breaks: &BreakCalendar,
    scan_days: i64,
) -> NaiveDate {
    let scan_days = scan_days.max(1);
    (1..=scan_days)
        .map(|off| end_date + Duration::days(off))
        .find(|d| course_days.is_class_day(*d) && !breaks.contains(*d))
        .unwrap_or_else(|| {
            tracing::debug!(%end_date, scan_days, "no class day found within scan bound");
            end_date + Duration::days(scan_days)
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionPlan {
    pub start_date: NaiveDate,
    pub weeks: i64,
    pub schedule_weeks: u32,
    pub break_weeks: BTreeSet<u32>,
    pub end_date: NaiveDate,
    pub breakdown: Vec<ScheduledWeek>,
}

/// Project an extension of `weeks` paid weeks. Without an explicit start the
/// extension begins on the next class day after `current_end`.
pub fn plan_extension(
    current_end: NaiveDate,
    weeks: i64,
    rules: &CourseRules,
    start_override: Option<NaiveDate>,
    scan_days: i64,
) -> ExtensionPlan {
    let start_date = start_override
        .unwrap_or_else(|| next_course_date_within(current_end, rules.days, &rules.breaks, scan_days));
    let input = ScheduleInput {
        start_date: Some(start_date),
        duration_weeks: weeks,
        skip_weeks: &[],
        rules,
    };
    let schedule = get_schedule_weeks(&input);
    let breakdown = week_breakdown(&input, &schedule);
    ExtensionPlan {
        start_date,
        weeks: weeks.max(0),
        schedule_weeks: schedule.schedule_weeks,
        end_date: get_end_date(start_date, schedule.schedule_weeks, rules.end_pattern()),
        break_weeks: schedule.break_week_set,
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::dates::BreakRange;
    use crate::schedule::resolver::WeekKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn mwf() -> WeekdayPattern {
        WeekdayPattern::from_days([1, 3, 5])
    }

    #[test]
    fn friday_end_rolls_to_next_monday() {
        let next = get_next_course_date(date(2025, 3, 7), mwf(), &BreakCalendar::default());
        assert_eq!(next, date(2025, 3, 10));
    }

    #[test]
    fn skips_class_days_inside_breaks() {
        let breaks = BreakCalendar::new([BreakRange::new(date(2025, 3, 10), date(2025, 3, 12)).unwrap()]);
        assert_eq!(get_next_course_date(date(2025, 3, 7), mwf(), &breaks), date(2025, 3, 14));
    }

    #[test]
    fn empty_pattern_takes_the_next_day() {
        assert_eq!(
            get_next_course_date(date(2025, 3, 7), WeekdayPattern::EMPTY, &BreakCalendar::default()),
            date(2025, 3, 8)
        );
    }

    #[test]
    fn scan_is_bounded() {
        let breaks = BreakCalendar::new([BreakRange::new(date(2025, 1, 1), date(2025, 12, 31)).unwrap()]);
        assert_eq!(
            get_next_course_date(date(2025, 3, 7), mwf(), &breaks),
            date(2025, 3, 7) + Duration::days(NEXT_COURSE_SCAN_DAYS)
        );
    }

    #[test]
    fn extension_reuses_the_resolver() {
        let rules = CourseRules {
            days: WeekdayPattern::from_days([1, 3]),
            end_days: WeekdayPattern::EMPTY,
            breaks: BreakCalendar::new([BreakRange::new(date(2025, 3, 17), date(2025, 3, 23)).unwrap()]),
        };
        // Current span ends Wed 2025-03-05
        let plan = plan_extension(date(2025, 3, 5), 2, &rules, None, NEXT_COURSE_SCAN_DAYS);
        assert_eq!(plan.start_date, date(2025, 3, 10));
        assert_eq!(plan.schedule_weeks, 3);
        assert_eq!(plan.break_weeks, BTreeSet::from([2]));
        assert_eq!(plan.end_date, date(2025, 3, 26));
        let kinds: Vec<WeekKind> = plan.breakdown.iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WeekKind::Attended, WeekKind::Break, WeekKind::Attended]);
    }

    #[test]
    fn explicit_start_is_respected() {
        let rules = CourseRules {
            days: WeekdayPattern::from_days([1, 3]),
            ..CourseRules::default()
        };
        let plan = plan_extension(date(2025, 3, 5), 1, &rules, Some(date(2025, 4, 7)), 60);
        assert_eq!(plan.start_date, date(2025, 4, 7));
        assert_eq!(plan.end_date, date(2025, 4, 9));
    }
}
