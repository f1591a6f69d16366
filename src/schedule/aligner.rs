//! Aligns per-student week numbering with the shared ("global") week
//! sequence of a course or merge group and counts weekly attendance.
//!
//! Global week `g` is 1-based; week 1 is the week holding the earliest start
//! among the students being aligned. A student's relative week is
//! `g - start_index + 1`. Filters run in a fixed order and short-circuit:
//! merge ranges (global coordinates), then skip/break weeks, then the
//! weekday-attendance check.
//!
//! Skip and break weeks are carried as dates, not week numbers: a student who
//! starts mid-week counts calendar weeks from their own start, which need not
//! line up with the shared weeks. Each excluded date is placed on the shared
//! week that holds it.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::weeks::{build_weeks, CourseWeek, WeekdayPattern};

/// 1-based inclusive range of global weeks a merge group applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekRange {
    pub start: u32,
    pub end: u32,
}

impl WeekRange {
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, week: u32) -> bool {
        self.start <= week && week <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct AlignerStudent {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pattern: WeekdayPattern,
    /// Class days standing for the weeks the student does not attend
    /// (skip, break and gap weeks). The shared week holding a day is skipped.
    pub excluded_days: BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WeekMark {
    /// Week lies outside every merge range.
    MergeExcluded,
    /// Week lies before the student's first or after their last week.
    Outside,
    Skipped,
    /// Enrolled, but no meeting day falls inside the enrolled part of the week.
    NoClass,
    Attended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekCell {
    pub week: u32,
    pub relative_week: Option<u32>,
    pub mark: WeekMark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentWeeks {
    pub id: String,
    pub start_index: Option<u32>,
    pub end_index: Option<u32>,
    pub attended_count: u32,
    pub cells: Vec<WeekCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekTotal {
    pub week: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub in_range: bool,
    pub attendees: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alignment {
    pub weeks: Vec<WeekTotal>,
    pub students: Vec<StudentWeeks>,
}

/// Shared week sequence covering every student, anchored on the earliest start.
pub fn shared_weeks(students: &[AlignerStudent], pattern: WeekdayPattern) -> Vec<CourseWeek> {
    let origin = students.iter().map(|s| s.start_date).min();
    let last = students.iter().map(|s| s.end_date).max();
    match (origin, last) {
        (Some(origin), Some(last)) => build_weeks(origin, last, pattern),
        _ => Vec::new(),
    }
}

/// Global indices (1-based) of the first and last week touching `[start, end]`.
pub fn locate(weeks: &[CourseWeek], start: NaiveDate, end: NaiveDate) -> Option<(u32, u32)> {
    if start > end {
        return None;
    }
    let first = weeks.iter().position(|w| w.end >= start)?;
    let last = weeks.iter().rposition(|w| w.start <= end)?;
    (first <= last).then(|| (first as u32 + 1, last as u32 + 1))
}

/// Relative week of global week `week` for a student starting at
/// `start_index`; `None` when the week precedes the enrollment.
pub fn relative_week(week: u32, start_index: u32) -> Option<u32> {
    let rel = i64::from(week) - i64::from(start_index) + 1;
    u32::try_from(rel).ok().filter(|r| *r >= 1)
}

fn in_merge_ranges(ranges: Option<&[WeekRange]>, week: u32) -> bool {
    match ranges {
        Some(r) if !r.is_empty() => r.iter().any(|wr| wr.contains(week)),
        _ => true,
    }
}

/// Global index (1-based) of the shared week whose 7-day span holds `d`.
pub fn week_of(weeks: &[CourseWeek], d: NaiveDate) -> Option<u32> {
    weeks
        .iter()
        .position(|w| w.start <= d && d < w.start + Duration::days(7))
        .map(|i| i as u32 + 1)
}

fn excluded_globals(weeks: &[CourseWeek], student: &AlignerStudent) -> BTreeSet<u32> {
    student
        .excluded_days
        .iter()
        .filter_map(|d| week_of(weeks, *d))
        .collect()
}

fn mark_week(
    week: &CourseWeek,
    global: u32,
    student: &AlignerStudent,
    span: Option<(u32, u32)>,
    excluded: &BTreeSet<u32>,
) -> (Option<u32>, WeekMark) {
    let Some((start_index, end_index)) = span else {
        return (None, WeekMark::Outside);
    };
    let Some(rel) = relative_week(global, start_index) else {
        return (None, WeekMark::Outside);
    };
    if global > end_index {
        return (None, WeekMark::Outside);
    }
    if excluded.contains(&global) {
        return (Some(rel), WeekMark::Skipped);
    }
    let attended = week
        .overlap(student.start_date, student.end_date)
        .is_some_and(|(lo, hi)| student.pattern.has_class_day(lo, hi));
    let mark = if attended {
        WeekMark::Attended
    } else {
        WeekMark::NoClass
    };
    (Some(rel), mark)
}

/// Mark every (week, student) pair and count attendees per week.
pub fn align(
    weeks: &[CourseWeek],
    students: &[AlignerStudent],
    merge_ranges: Option<&[WeekRange]>,
) -> Alignment {
    let spans: Vec<Option<(u32, u32)>> = students
        .iter()
        .map(|s| locate(weeks, s.start_date, s.end_date))
        .collect();
    let excluded: Vec<BTreeSet<u32>> = students.iter().map(|s| excluded_globals(weeks, s)).collect();

    let mut rows: Vec<StudentWeeks> = students
        .iter()
        .zip(&spans)
        .map(|(s, span)| StudentWeeks {
            id: s.id.clone(),
            start_index: span.map(|(a, _)| a),
            end_index: span.map(|(_, b)| b),
            attended_count: 0,
            cells: Vec::with_capacity(weeks.len()),
        })
        .collect();

    let mut totals = Vec::with_capacity(weeks.len());
    for (i, week) in weeks.iter().enumerate() {
        let global = i as u32 + 1;
        let in_range = in_merge_ranges(merge_ranges, global);
        let mut attendees = 0u32;

        for (((student, span), skipped), row) in
            students.iter().zip(&spans).zip(&excluded).zip(rows.iter_mut())
        {
            let (relative_week, mark) = if in_range {
                mark_week(week, global, student, *span, skipped)
            } else {
                (None, WeekMark::MergeExcluded)
            };
            if mark == WeekMark::Attended {
                attendees += 1;
                row.attended_count += 1;
            }
            row.cells.push(WeekCell {
                week: global,
                relative_week,
                mark,
            });
        }

        totals.push(WeekTotal {
            week: global,
            start: week.start,
            end: week.end,
            in_range,
            attendees,
        });
    }

    Alignment {
        weeks: totals,
        students: rows,
    }
}
