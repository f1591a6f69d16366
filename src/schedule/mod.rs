//! Recurring schedule engine: week building, schedule resolution, status,
//! week alignment for merge groups and extension planning. Everything here is
//! pure; callers pass in the catalog snapshot and a single `now` per request.

pub mod aligner;
pub mod catalog;
pub mod dates;
pub mod extension;
pub mod resolver;
pub mod status;
pub mod weeks;

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

pub use aligner::{align, shared_weeks, AlignerStudent, WeekRange};
pub use catalog::{Catalog, CourseInfo, CourseTime};
pub use dates::{format_date, parse_date, parse_date_value, BreakCalendar, BreakRange};
pub use extension::{get_next_course_date, next_course_date_within, plan_extension, ExtensionPlan};
pub use resolver::{
    get_end_date, get_schedule_weeks, week_breakdown, CourseRules, ScheduleInput, ScheduledWeek,
    WeekKind,
};
pub use status::{get_registration_status, RegistrationStatus};
pub use weeks::{build_weeks, WeekdayPattern};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationInput {
    pub start_date: Option<NaiveDate>,
    pub weeks: i64,
    pub skip_weeks: Vec<u32>,
    pub withdrawn_at: Option<NaiveDate>,
    pub transferred_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInput {
    pub id: String,
    pub start_date: NaiveDate,
    pub weeks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentKind {
    Base,
    Extension,
}

/// One paid block of an enrollment: the base registration or one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub kind: SegmentKind,
    pub id: Option<String>,
    pub start_date: NaiveDate,
    pub weeks: i64,
    pub schedule_weeks: u32,
    pub break_weeks: BTreeSet<u32>,
    pub end_date: NaiveDate,
    pub breakdown: Vec<ScheduledWeek>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Cutoff {
    Withdrawn,
    Transferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentPlan {
    pub start_date: Option<NaiveDate>,
    /// End of the last paid segment, ignoring withdrawal and transfer.
    pub scheduled_end_date: Option<NaiveDate>,
    pub effective_end_date: Option<NaiveDate>,
    pub cutoff: Option<Cutoff>,
    pub status: RegistrationStatus,
    pub weeks_paid: i64,
    pub segments: Vec<Segment>,
}

fn resolve_segment(
    kind: SegmentKind,
    id: Option<String>,
    start_date: NaiveDate,
    weeks: i64,
    skip_weeks: &[u32],
    rules: &CourseRules,
) -> Segment {
    let input = ScheduleInput {
        start_date: Some(start_date),
        duration_weeks: weeks,
        skip_weeks,
        rules,
    };
    let schedule = get_schedule_weeks(&input);
    let breakdown = week_breakdown(&input, &schedule);
    Segment {
        kind,
        id,
        start_date,
        weeks: weeks.max(0),
        schedule_weeks: schedule.schedule_weeks,
        end_date: get_end_date(start_date, schedule.schedule_weeks, rules.end_pattern()),
        break_weeks: schedule.break_week_set,
        breakdown,
    }
}

/// Single entry point every call site uses to derive an enrollment's weeks,
/// end dates and status. Extensions are applied in start-date order.
pub fn plan_enrollment(
    rules: &CourseRules,
    reg: &RegistrationInput,
    extensions: &[ExtensionInput],
    now: NaiveDate,
) -> EnrollmentPlan {
    let ext_weeks: i64 = extensions.iter().map(|e| e.weeks.max(0)).sum();
    let weeks_paid = reg.weeks.max(0) + ext_weeks;

    let cutoff = match (reg.withdrawn_at, reg.transferred_at) {
        (Some(w), Some(t)) if t < w => Some((Cutoff::Transferred, t)),
        (Some(w), _) => Some((Cutoff::Withdrawn, w)),
        (None, Some(t)) => Some((Cutoff::Transferred, t)),
        (None, None) => None,
    };

    let Some(start_date) = reg.start_date else {
        return EnrollmentPlan {
            start_date: None,
            scheduled_end_date: None,
            effective_end_date: cutoff.map(|(_, d)| d),
            cutoff: cutoff.map(|(c, _)| c),
            status: get_registration_status(None, cutoff.map(|(_, d)| d), now),
            weeks_paid,
            segments: Vec::new(),
        };
    };

    let mut segments = vec![resolve_segment(
        SegmentKind::Base,
        None,
        start_date,
        reg.weeks,
        &reg.skip_weeks,
        rules,
    )];
    let mut ordered: Vec<&ExtensionInput> = extensions.iter().filter(|e| e.weeks > 0).collect();
    ordered.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.id.cmp(&b.id)));
    for ext in ordered {
        segments.push(resolve_segment(
            SegmentKind::Extension,
            Some(ext.id.clone()),
            ext.start_date,
            ext.weeks,
            &[],
            rules,
        ));
    }

    let scheduled_end = segments
        .iter()
        .map(|s| s.end_date)
        .max()
        .unwrap_or(start_date);
    let (effective_end, applied_cutoff) = match cutoff {
        Some((kind, at)) if at < scheduled_end => (at.max(start_date), Some(kind)),
        _ => (scheduled_end, None),
    };

    EnrollmentPlan {
        start_date: Some(start_date),
        scheduled_end_date: Some(scheduled_end),
        effective_end_date: Some(effective_end),
        cutoff: applied_cutoff,
        status: get_registration_status(Some(start_date), Some(effective_end), now),
        weeks_paid,
        segments,
    }
}

impl EnrollmentPlan {
    /// Calendar weeks (relative to the base start) spanned by all segments.
    pub fn span_weeks(&self) -> u32 {
        let Some(start) = self.start_date else {
            return 0;
        };
        self.segments
            .iter()
            .map(|s| segment_offset(start, s.start_date) + s.schedule_weeks)
            .max()
            .unwrap_or(0)
    }

    /// Relative weeks the student attends, across every segment.
    pub fn attended_weeks(&self) -> BTreeSet<u32> {
        let Some(start) = self.start_date else {
            return BTreeSet::new();
        };
        self.segments
            .iter()
            .flat_map(|s| {
                let offset = segment_offset(start, s.start_date);
                s.breakdown
                    .iter()
                    .filter(|w| w.kind == WeekKind::Attended)
                    .map(move |w| offset + w.index)
            })
            .collect()
    }

    /// Relative weeks inside the span that are not attended: skips, breaks and
    /// gaps between segments.
    pub fn excluded_weeks(&self) -> BTreeSet<u32> {
        let attended = self.attended_weeks();
        (1..=self.span_weeks())
            .filter(|w| !attended.contains(w))
            .collect()
    }

    /// Attended weeks that started on or before `date` and before any cutoff.
    pub fn attended_weeks_before(&self, date: NaiveDate) -> u32 {
        let limit = match self.effective_end_date {
            Some(end) => date.min(end),
            None => date,
        };
        self.segments
            .iter()
            .flat_map(|s| s.breakdown.iter())
            .filter(|w| w.kind == WeekKind::Attended && w.start <= limit)
            .count() as u32
    }

    /// Class days that place the non-attended weeks on a shared timeline:
    /// the break days of a break week, the first class day of a skipped week
    /// and every class day in a gap between segments.
    pub fn excluded_days(&self, rules: &CourseRules) -> BTreeSet<NaiveDate> {
        let class_days = |from: NaiveDate, to: NaiveDate| {
            from.iter_days()
                .take_while(move |d| *d <= to)
                .filter(move |d| rules.days.is_class_day(*d))
        };
        let mut out = BTreeSet::new();
        let mut covered_until: Option<NaiveDate> = None;
        for seg in &self.segments {
            if let Some(prev_end) = covered_until {
                let gap_start = prev_end + Duration::days(1);
                if gap_start < seg.start_date {
                    out.extend(class_days(gap_start, seg.start_date - Duration::days(1)));
                }
            }
            for w in &seg.breakdown {
                let span_end = w.start + Duration::days(6);
                match w.kind {
                    WeekKind::Attended => {}
                    WeekKind::Break => {
                        let hits: Vec<NaiveDate> = class_days(w.start, span_end)
                            .filter(|d| rules.breaks.contains(*d))
                            .collect();
                        if hits.is_empty() {
                            out.extend(class_days(w.start, span_end).next());
                        } else {
                            out.extend(hits);
                        }
                    }
                    WeekKind::Skipped => out.extend(class_days(w.start, span_end).next()),
                }
            }
            let seg_end = seg.start_date + Duration::weeks(i64::from(seg.schedule_weeks)) - Duration::days(1);
            covered_until = Some(covered_until.map_or(seg_end, |c| c.max(seg_end)));
        }
        out
    }

    /// Row for the week aligner; `None` when the enrollment has no start date.
    pub fn aligner_student(&self, id: &str, rules: &CourseRules) -> Option<AlignerStudent> {
        Some(AlignerStudent {
            id: id.to_string(),
            start_date: self.start_date?,
            end_date: self.effective_end_date?,
            pattern: rules.days,
            excluded_days: self.excluded_days(rules),
        })
    }
}

fn segment_offset(base_start: NaiveDate, seg_start: NaiveDate) -> u32 {
    let days = (seg_start - base_start).num_days().max(0);
    (days / 7) as u32
}

/// Next start date for an extension appended to `plan`.
pub fn next_extension_start(
    plan: &EnrollmentPlan,
    rules: &CourseRules,
    scan_days: Option<i64>,
) -> Option<NaiveDate> {
    let end = plan.effective_end_date?;
    Some(match scan_days {
        Some(scan) => next_course_date_within(end, rules.days, &rules.breaks, scan),
        None => get_next_course_date(end, rules.days, &rules.breaks),
    })
}
