use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db;
use crate::ipc::handlers::merges::merge_group_json;
use crate::ipc::helpers::{
    day_list, load_catalog, load_planned, load_schedule_setup, opt_date, opt_i64_range, opt_str,
    plan_registration, registration_json, request_today, required_date, required_str, week_list,
    with_conn, HandlerErr, PlannedRegistration,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::aligner::StudentWeeks;
use crate::schedule::resolver::MAX_DURATION_WEEKS;
use crate::schedule::{
    self, align, build_weeks, shared_weeks, BreakCalendar, Catalog, CourseInfo, CourseRules,
    RegistrationInput, RegistrationStatus, WeekRange, WeekdayPattern,
};

/// Rules from `courseId`/`course`, with ad-hoc `days`/`endDays`/`breakRanges`
/// overriding the catalog entry field by field.
fn rules_from_params<'c>(
    catalog: &'c Catalog,
    params: &Value,
) -> Result<(Option<&'c CourseInfo>, CourseRules), HandlerErr> {
    let course = match (opt_str(params, "courseId"), opt_str(params, "course")) {
        (Some(id), _) => Some(
            catalog
                .get(&id)
                .ok_or_else(|| HandlerErr::not_found("course not found"))?,
        ),
        (None, Some(text)) => catalog.resolve(&text),
        (None, None) => None,
    };
    let mut rules = course.map(CourseInfo::rules).unwrap_or_default();
    if let Some(v) = params.get("days") {
        rules.days = WeekdayPattern::from_days(day_list(v, "days")?);
    }
    if let Some(v) = params.get("endDays").or_else(|| params.get("endDay")) {
        rules.end_days = WeekdayPattern::from_days(day_list(v, "endDays")?);
    }
    if let Some(v) = params.get("breakRanges") {
        let arr = v
            .as_array()
            .ok_or_else(|| HandlerErr::bad_params("breakRanges must be an array"))?;
        rules.breaks = BreakCalendar::from_loose(arr);
    }
    Ok((course, rules))
}

fn schedule_weeks(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let range_start = required_date(params, "rangeStart")?;
    let range_end = required_date(params, "rangeEnd")?;
    let catalog = load_catalog(conn)?;
    let (_, rules) = rules_from_params(&catalog, params)?;
    Ok(json!({ "weeks": build_weeks(range_start, range_end, rules.days) }))
}

fn schedule_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let catalog = load_catalog(conn)?;
    let (course, rules) = rules_from_params(&catalog, params)?;
    let reg = RegistrationInput {
        start_date: opt_date(params, "startDate")?,
        weeks: opt_i64_range(params, "weeks", 0, MAX_DURATION_WEEKS)?
            .ok_or_else(|| HandlerErr::bad_params("missing weeks"))?,
        skip_weeks: week_list(params, "skipWeeks")?.unwrap_or_default(),
        withdrawn_at: opt_date(params, "withdrawnAt")?,
        transferred_at: None,
    };
    let plan = schedule::plan_enrollment(&rules, &reg, &[], today);
    Ok(json!({
        "today": today,
        "course": course,
        "breakRanges": rules.breaks.ranges(),
        "plan": plan,
        "excludedWeeks": plan.excluded_weeks(),
    }))
}

fn schedule_registration(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let id = required_str(params, "registrationId")?;
    let catalog = load_catalog(conn)?;
    let p = load_planned(conn, &catalog, &id, today)?;
    let scan_days = load_schedule_setup(conn).next_course_scan_days;
    let extensions: Vec<Value> = p
        .extensions
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "startDate": e.start_date,
                "weeks": e.weeks,
                "tuitionFee": e.tuition_fee,
            })
        })
        .collect();
    Ok(json!({
        "today": today,
        "registration": registration_json(&p),
        "course": p.course,
        "plan": p.plan,
        "excludedWeeks": p.plan.excluded_weeks(),
        "weeksAttended": p.plan.attended_weeks_before(today),
        "extensions": extensions,
        "nextExtensionStart": schedule::next_extension_start(&p.plan, &p.rules, Some(scan_days)),
    }))
}

fn plan_all<'c>(
    conn: &Connection,
    catalog: &'c Catalog,
    today: NaiveDate,
) -> Result<Vec<PlannedRegistration<'c>>, HandlerErr> {
    db::list_registrations(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|row| plan_registration(conn, catalog, row, today))
        .collect()
}

fn schedule_dashboard(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let horizon = opt_i64_range(params, "horizonDays", 0, 366)?.unwrap_or(14);
    let horizon_end = today + Duration::days(horizon);
    let catalog = load_catalog(conn)?;
    let planned = plan_all(conn, &catalog, today)?;

    let mut counts: BTreeMap<&'static str, u32> = [
        RegistrationStatus::Pending,
        RegistrationStatus::Active,
        RegistrationStatus::Completed,
        RegistrationStatus::Unknown,
    ]
    .into_iter()
    .map(|s| (s.as_str(), 0))
    .collect();
    let mut per_course: BTreeMap<String, (Option<String>, u32, u32)> = BTreeMap::new();
    let mut ending_soon = Vec::new();
    let mut starting_soon = Vec::new();

    for p in &planned {
        *counts.entry(p.plan.status.as_str()).or_default() += 1;
        let label = p
            .course
            .map(|c| c.label.clone())
            .unwrap_or_else(|| p.row.course_text.clone());
        let entry = per_course
            .entry(label)
            .or_insert_with(|| (p.course.map(|c| c.id.clone()), 0, 0));
        match p.plan.status {
            RegistrationStatus::Active => entry.1 += 1,
            RegistrationStatus::Pending => entry.2 += 1,
            _ => {}
        }
        if p.plan.status == RegistrationStatus::Active
            && p.plan.effective_end_date.is_some_and(|e| e <= horizon_end)
        {
            ending_soon.push(registration_json(p));
        }
        if p.plan.status == RegistrationStatus::Pending
            && p.plan.start_date.is_some_and(|s| s <= horizon_end)
        {
            starting_soon.push(registration_json(p));
        }
    }

    let courses: Vec<Value> = per_course
        .into_iter()
        .map(|(label, (id, active, pending))| {
            json!({ "courseId": id, "label": label, "active": active, "pending": pending })
        })
        .collect();
    Ok(json!({
        "today": today,
        "horizonDays": horizon,
        "counts": counts,
        "courses": courses,
        "endingSoon": ending_soon,
        "startingSoon": starting_soon,
    }))
}

fn schedule_gantt(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let catalog = load_catalog(conn)?;
    let course = match opt_str(params, "courseId") {
        Some(id) => Some(
            catalog
                .get(&id)
                .ok_or_else(|| HandlerErr::not_found("course not found"))?,
        ),
        None => None,
    };
    let include_completed = params
        .get("includeCompleted")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let planned: Vec<PlannedRegistration<'_>> = plan_all(conn, &catalog, today)?
        .into_iter()
        .filter(|p| course.map_or(true, |c| p.course.map(|pc| pc.id.as_str()) == Some(c.id.as_str())))
        .filter(|p| include_completed || p.plan.status != RegistrationStatus::Completed)
        .collect();

    let pattern = course.map(|c| c.days).unwrap_or(WeekdayPattern::EMPTY);
    let students: Vec<_> = planned
        .iter()
        .filter_map(|p| p.plan.aligner_student(&p.row.id, &p.rules))
        .collect();
    let weeks = shared_weeks(&students, pattern);
    let alignment = align(&weeks, &students, None);
    let timelines: HashMap<&str, &StudentWeeks> = alignment
        .students
        .iter()
        .map(|s| (s.id.as_str(), s))
        .collect();

    let rows: Vec<Value> = planned
        .iter()
        .map(|p| {
            let segments: Vec<Value> = p
                .plan
                .segments
                .iter()
                .map(|s| {
                    json!({
                        "kind": s.kind,
                        "id": s.id,
                        "startDate": s.start_date,
                        "endDate": s.end_date,
                        "weeks": s.breakdown,
                    })
                })
                .collect();
            json!({
                "registration": registration_json(p),
                "segments": segments,
                "timeline": timelines.get(p.row.id.as_str()),
            })
        })
        .collect();

    Ok(json!({
        "today": today,
        "courseId": course.map(|c| c.id.clone()),
        "weeks": alignment.weeks,
        "rows": rows,
    }))
}

fn schedule_merge_totals(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let catalog = load_catalog(conn)?;
    let setup = load_schedule_setup(conn);

    // A merge group, or a single course treated as a group of one.
    let (group_json, members, ranges): (Value, Vec<&CourseInfo>, Vec<WeekRange>) =
        match (opt_str(params, "mergeId"), opt_str(params, "courseId")) {
            (Some(id), _) => {
                let group = db::get_merge_group(conn, &id)
                    .map_err(HandlerErr::query)?
                    .ok_or_else(|| HandlerErr::not_found("merge group not found"))?;
                let members = group
                    .course_labels
                    .iter()
                    .filter_map(|l| catalog.by_label(l))
                    .collect();
                (merge_group_json(&group), members, group.week_ranges.clone())
            }
            (None, Some(id)) => {
                let c = catalog
                    .get(&id)
                    .ok_or_else(|| HandlerErr::not_found("course not found"))?;
                (json!(null), vec![c], Vec::new())
            }
            (None, None) => return Err(HandlerErr::bad_params("missing mergeId or courseId")),
        };

    let member_ids: HashSet<&str> = members.iter().map(|c| c.id.as_str()).collect();
    let union = members
        .iter()
        .fold(WeekdayPattern::EMPTY, |acc, c| acc.union(c.days));

    let planned: Vec<PlannedRegistration<'_>> = plan_all(conn, &catalog, today)?
        .into_iter()
        .filter(|p| p.course.is_some_and(|c| member_ids.contains(c.id.as_str())))
        .collect();
    let students: Vec<_> = planned
        .iter()
        .filter_map(|p| p.plan.aligner_student(&p.row.id, &p.rules))
        .collect();
    let weeks = shared_weeks(&students, union);

    let applied_ranges = if setup.merge_week_ranges_enabled {
        Some(ranges.as_slice())
    } else {
        None
    };
    let alignment = align(&weeks, &students, applied_ranges);

    let names: BTreeMap<&str, &str> = planned
        .iter()
        .map(|p| (p.row.id.as_str(), p.row.student_name.as_str()))
        .collect();
    let students_out: Vec<Value> = alignment
        .students
        .iter()
        .map(|s| {
            let mut v = json!(s);
            v["studentName"] = json!(names.get(s.id.as_str()));
            v
        })
        .collect();

    Ok(json!({
        "today": today,
        "merge": group_json,
        "days": union,
        "weekRangesApplied": setup.merge_week_ranges_enabled && !ranges.is_empty(),
        "weeks": alignment.weeks,
        "students": students_out,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.weeks" => Some(with_conn(state, req, schedule_weeks)),
        "schedule.preview" => Some(with_conn(state, req, schedule_preview)),
        "schedule.registration" => Some(with_conn(state, req, schedule_registration)),
        "schedule.dashboard" => Some(with_conn(state, req, schedule_dashboard)),
        "schedule.gantt" => Some(with_conn(state, req, schedule_gantt)),
        "schedule.mergeTotals" => Some(with_conn(state, req, schedule_merge_totals)),
        _ => None,
    }
}
