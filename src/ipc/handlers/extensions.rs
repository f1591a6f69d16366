use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db;
use crate::ipc::helpers::{
    load_catalog, load_extension_setup, load_planned, load_schedule_setup, now_ts, opt_date,
    opt_i64_range, plan_registration, registration_json, request_today, required_str, with_conn,
    HandlerErr, PlannedRegistration,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::aligner::locate;
use crate::schedule::{format_date, plan_extension, shared_weeks, Catalog, CourseInfo, ExtensionPlan};

fn extensions_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let id = required_str(params, "registrationId")?;
    let catalog = load_catalog(conn)?;
    let p = load_planned(conn, &catalog, &id, today)?;
    let out: Vec<Value> = p
        .extensions
        .iter()
        .map(|e| {
            let segment = p
                .plan
                .segments
                .iter()
                .find(|s| s.id.as_deref() == Some(e.id.as_str()));
            json!({
                "id": e.id,
                "registrationId": e.registration_id,
                "startDate": e.start_date,
                "weeks": e.weeks,
                "tuitionFee": e.tuition_fee,
                "createdAt": e.created_at,
                "endDate": segment.map(|s| s.end_date),
                "breakWeeks": segment.map(|s| &s.break_weeks),
            })
        })
        .collect();
    Ok(json!({ "registrationId": id, "extensions": out }))
}

/// Weeks of the course's shared timeline that had already run when the
/// student joined. The timeline starts at the earliest start among the
/// course's registrations.
fn elapsed_weeks(
    conn: &Connection,
    catalog: &Catalog,
    course: &CourseInfo,
    target: &PlannedRegistration<'_>,
    today: NaiveDate,
) -> Result<u32, HandlerErr> {
    let (Some(start), Some(end)) = (target.plan.start_date, target.plan.effective_end_date) else {
        return Ok(0);
    };
    let mut students = Vec::new();
    for row in db::list_registrations(conn).map_err(HandlerErr::query)? {
        let p = plan_registration(conn, catalog, row, today)?;
        if p.course.map(|c| c.id.as_str()) != Some(course.id.as_str()) {
            continue;
        }
        if let Some(s) = p.plan.aligner_student(&p.row.id, &p.rules) {
            students.push(s);
        }
    }
    let weeks = shared_weeks(&students, course.days);
    Ok(locate(&weeks, start, end)
        .map(|(start_index, _)| start_index.saturating_sub(1))
        .unwrap_or(0))
}

struct Evaluation {
    eligible: bool,
    reasons: Vec<&'static str>,
    weeks: i64,
    student_max_weeks: i64,
    elapsed_weeks: u32,
    plan: Option<ExtensionPlan>,
}

fn evaluate(
    conn: &Connection,
    catalog: &Catalog,
    target: &PlannedRegistration<'_>,
    params: &Value,
    today: NaiveDate,
) -> Result<Evaluation, HandlerErr> {
    let ext_setup = load_extension_setup(conn);
    let scan_days = load_schedule_setup(conn).next_course_scan_days;
    let weeks = opt_i64_range(params, "weeks", 1, ext_setup.max_extension_weeks)?
        .unwrap_or(ext_setup.default_extension_weeks);
    let start_override = opt_date(params, "startDate")?;

    let mut reasons = Vec::new();
    if target.row.withdrawn_at.is_some() {
        reasons.push("withdrawn");
    }
    if target.row.transfer_to_id.is_some() {
        reasons.push("transferred");
    }
    let Some(course) = target.course else {
        return Ok(Evaluation {
            eligible: false,
            reasons: vec!["courseNotFound"],
            weeks,
            student_max_weeks: 0,
            elapsed_weeks: 0,
            plan: None,
        });
    };
    if ext_setup.require_installment_eligible && !course.installment_eligible {
        reasons.push("courseNotInstallmentEligible");
    }
    let Some(current_end) = target.plan.effective_end_date.filter(|_| target.plan.start_date.is_some()) else {
        reasons.push("noStartDate");
        return Ok(Evaluation {
            eligible: false,
            reasons,
            weeks,
            student_max_weeks: course.max_weeks,
            elapsed_weeks: 0,
            plan: None,
        });
    };
    if let Some(s) = start_override {
        if s <= current_end {
            return Err(HandlerErr::new("conflict", "extension must start after the current end date")
                .with_details(json!({ "endDate": current_end, "startDate": s })));
        }
    }

    let elapsed = elapsed_weeks(conn, catalog, course, target, today)?;
    let student_max_weeks = (course.max_weeks - i64::from(elapsed)).max(0);
    if target.plan.weeks_paid >= student_max_weeks {
        reasons.push("maxWeeksReached");
    } else if target.plan.weeks_paid + weeks > student_max_weeks {
        reasons.push("exceedsMaxWeeks");
    }

    let plan = plan_extension(current_end, weeks, &target.rules, start_override, scan_days);
    Ok(Evaluation {
        eligible: reasons.is_empty(),
        reasons,
        weeks,
        student_max_weeks,
        elapsed_weeks: elapsed,
        plan: Some(plan),
    })
}

fn evaluation_json(target: &PlannedRegistration<'_>, ev: &Evaluation) -> Value {
    json!({
        "eligible": ev.eligible,
        "reasons": ev.reasons,
        "weeks": ev.weeks,
        "weeksPaid": target.plan.weeks_paid,
        "studentMaxWeeks": ev.student_max_weeks,
        "elapsedWeeks": ev.elapsed_weeks,
        "currentEndDate": target.plan.effective_end_date,
        "plan": ev.plan,
    })
}

fn extensions_plan(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let id = required_str(params, "registrationId")?;
    let catalog = load_catalog(conn)?;
    let target = load_planned(conn, &catalog, &id, today)?;
    let ev = evaluate(conn, &catalog, &target, params, today)?;
    Ok(evaluation_json(&target, &ev))
}

fn extensions_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let id = required_str(params, "registrationId")?;
    let tuition_fee = opt_i64_range(params, "tuitionFee", 0, i64::MAX)?.unwrap_or(0);
    let catalog = load_catalog(conn)?;
    let target = load_planned(conn, &catalog, &id, today)?;
    let ev = evaluate(conn, &catalog, &target, params, today)?;
    let plan = match (&ev.plan, ev.eligible) {
        (Some(plan), true) => plan,
        _ => {
            return Err(HandlerErr::new("not_eligible", "registration cannot be extended")
                .with_details(evaluation_json(&target, &ev)))
        }
    };

    let ext_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO extensions(id, registration_id, start_date, weeks, tuition_fee, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&ext_id, &id, format_date(plan.start_date), ev.weeks, tuition_fee, now_ts()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "extensions" }))
    })?;
    tracing::info!(registration = %id, extension = %ext_id, weeks = ev.weeks, "extension created");

    let refreshed = load_planned(conn, &catalog, &id, today)?;
    Ok(json!({
        "extensionId": ext_id,
        "plan": plan,
        "registration": registration_json(&refreshed),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "extensions.list" => Some(with_conn(state, req, extensions_list)),
        "extensions.plan" => Some(with_conn(state, req, extensions_plan)),
        "extensions.create" => Some(with_conn(state, req, extensions_create)),
        _ => None,
    }
}
