use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use super::dates::{weekday_index, BreakCalendar};
use super::weeks::WeekdayPattern;

/// Upper bound on paid weeks the resolver walks for one segment.
pub const MAX_DURATION_WEEKS: i64 = 1040;
/// Upper bound on skipped/break weeks walked on top of the paid count.
pub const MAX_EXTRA_WEEKS: u32 = 520;

/// Per-course scheduling rules: meeting days, end days and breaks.
/// End days are independent of meeting days and need not be a subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseRules {
    pub days: WeekdayPattern,
    pub end_days: WeekdayPattern,
    pub breaks: BreakCalendar,
}

impl CourseRules {
    /// Pattern used to place the end date inside the last week.
    pub fn end_pattern(&self) -> WeekdayPattern {
        if self.end_days.is_empty() {
            self.days
        } else {
            self.end_days
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleInput<'a> {
    pub start_date: Option<NaiveDate>,
    pub duration_weeks: i64,
    pub skip_weeks: &'a [u32],
    pub rules: &'a CourseRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSchedule {
    pub schedule_weeks: u32,
    pub break_week_set: BTreeSet<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WeekKind {
    Attended,
    Skipped,
    Break,
}

/// One calendar week of a resolved schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledWeek {
    pub index: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub kind: WeekKind,
}

fn week_start(start: NaiveDate, index: u32) -> NaiveDate {
    start + Duration::weeks(i64::from(index) - 1)
}

fn hits_break(week_start: NaiveDate, rules: &CourseRules) -> bool {
    if rules.breaks.is_empty() {
        return false;
    }
    (0..7)
        .map(|off| week_start + Duration::days(off))
        .any(|d| rules.days.is_class_day(d) && rules.breaks.contains(d))
}

/// How many calendar weeks are needed to deliver `duration_weeks` attended
/// weeks once skip and break weeks are excluded.
pub fn get_schedule_weeks(input: &ScheduleInput<'_>) -> EnrollmentSchedule {
    if input.duration_weeks <= 0 {
        return EnrollmentSchedule::default();
    }
    let duration = input.duration_weeks.min(MAX_DURATION_WEEKS) as u32;
    let Some(start) = input.start_date else {
        tracing::debug!(duration, "schedule start date missing; using neutral schedule");
        return EnrollmentSchedule {
            schedule_weeks: duration,
            break_week_set: BTreeSet::new(),
        };
    };

    let skips: BTreeSet<u32> = input.skip_weeks.iter().copied().filter(|w| *w >= 1).collect();
    let mut break_week_set = BTreeSet::new();
    let mut attended = 0u32;
    let mut week = 0u32;
    while attended < duration {
        if week >= duration + MAX_EXTRA_WEEKS {
            tracing::debug!(week, attended, "schedule walk hit its bound");
            break;
        }
        week += 1;
        if skips.contains(&week) || hits_break(week_start(start, week), input.rules) {
            break_week_set.insert(week);
        } else {
            attended += 1;
        }
    }

    EnrollmentSchedule {
        schedule_weeks: week,
        break_week_set,
    }
}

/// Date of the last `end_pattern` day inside calendar week `schedule_weeks`
/// counted from `start_date`.
pub fn get_end_date(
    start_date: NaiveDate,
    schedule_weeks: u32,
    end_pattern: WeekdayPattern,
) -> NaiveDate {
    if schedule_weeks == 0 {
        return start_date;
    }
    let last = week_start(start_date, schedule_weeks);
    last + Duration::days(end_pattern.end_offset(weekday_index(last)))
}

/// Week-by-week view of a resolved schedule. The last week ends on the same
/// date [`get_end_date`] returns.
pub fn week_breakdown(input: &ScheduleInput<'_>, schedule: &EnrollmentSchedule) -> Vec<ScheduledWeek> {
    let Some(start) = input.start_date else {
        return Vec::new();
    };
    let end_pattern = input.rules.end_pattern();
    (1..=schedule.schedule_weeks)
        .map(|index| {
            let ws = week_start(start, index);
            let end = if index == schedule.schedule_weeks {
                get_end_date(start, index, end_pattern)
            } else {
                ws + Duration::days(input.rules.days.end_offset(weekday_index(ws)))
            };
            let kind = if input.skip_weeks.contains(&index) {
                WeekKind::Skipped
            } else if schedule.break_week_set.contains(&index) {
                WeekKind::Break
            } else {
                WeekKind::Attended
            };
            ScheduledWeek {
                index,
                start: ws,
                end,
                kind,
            }
        })
        .collect()
}
