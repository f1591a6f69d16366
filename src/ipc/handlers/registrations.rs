use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::{self, RegistrationRow};
use crate::ipc::helpers::{
    load_catalog, load_planned, load_schedule_setup, now_ts, opt_date, opt_i64_range, opt_str,
    plan_registration, registration_json, request_today, required_str, week_list, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::resolver::MAX_DURATION_WEEKS;
use crate::schedule::{format_date, next_course_date_within, Catalog, CourseInfo};

fn registrations_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let course_filter = opt_str(params, "courseId");
    let status_filter = opt_str(params, "status");
    let catalog = load_catalog(conn)?;
    let rows = db::list_registrations(conn).map_err(HandlerErr::query)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let planned = plan_registration(conn, &catalog, row, today)?;
        if let Some(cid) = course_filter.as_deref() {
            if planned.course.map(|c| c.id.as_str()) != Some(cid) {
                continue;
            }
        }
        if let Some(s) = status_filter.as_deref() {
            if planned.plan.status.as_str() != s {
                continue;
            }
        }
        out.push(registration_json(&planned));
    }
    Ok(json!({ "today": today, "registrations": out }))
}

/// Course by explicit id, else by best-prefix match on the course text.
fn pick_course<'c>(
    catalog: &'c Catalog,
    params: &Value,
    id_key: &str,
    text_key: &str,
) -> Result<(Option<&'c CourseInfo>, String), HandlerErr> {
    if let Some(id) = opt_str(params, id_key) {
        let course = catalog
            .get(&id)
            .ok_or_else(|| HandlerErr::not_found("course not found"))?;
        return Ok((Some(course), course.label.clone()));
    }
    let text = required_str(params, text_key)?;
    Ok((catalog.resolve(&text), text))
}

fn check_weeks(course: Option<&CourseInfo>, weeks: i64) -> Result<(), HandlerErr> {
    if let Some(c) = course {
        if weeks < c.min_weeks || weeks > c.max_weeks {
            return Err(HandlerErr::bad_params(format!(
                "weeks must be in {}..={} for {}",
                c.min_weeks, c.max_weeks, c.label
            )));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn insert_registration(
    conn: &Connection,
    id: &str,
    student_name: &str,
    course: Option<&CourseInfo>,
    course_text: &str,
    start_date: NaiveDate,
    weeks: i64,
    skip_weeks: &[u32],
    tuition_fee: i64,
    transfer_from_id: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO registrations(id, student_name, course_id, course_text, start_date, weeks,
             skip_weeks_json, tuition_fee, transfer_from_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            student_name,
            course.map(|c| c.id.as_str()),
            course_text,
            format_date(start_date),
            weeks,
            serde_json::to_string(skip_weeks).unwrap_or_else(|_| "[]".to_string()),
            tuition_fee,
            transfer_from_id,
            now_ts(),
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "registrations" }))
    })?;
    Ok(())
}

fn registrations_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let student_name = required_str(params, "studentName")?;
    let start_date = opt_date(params, "startDate")?
        .ok_or_else(|| HandlerErr::bad_params("missing startDate"))?;
    let weeks = opt_i64_range(params, "weeks", 1, MAX_DURATION_WEEKS)?
        .ok_or_else(|| HandlerErr::bad_params("missing weeks"))?;
    let skip_weeks = week_list(params, "skipWeeks")?.unwrap_or_default();
    let tuition_fee = opt_i64_range(params, "tuitionFee", 0, i64::MAX)?.unwrap_or(0);

    let catalog = load_catalog(conn)?;
    let (course, course_text) = pick_course(&catalog, params, "courseId", "course")?;
    check_weeks(course, weeks)?;

    let id = Uuid::new_v4().to_string();
    insert_registration(
        conn,
        &id,
        &student_name,
        course,
        &course_text,
        start_date,
        weeks,
        &skip_weeks,
        tuition_fee,
        None,
    )?;
    tracing::info!(registration = %id, course = %course_text, "registration created");

    let planned = load_planned(conn, &catalog, &id, today)?;
    Ok(json!({ "registration": registration_json(&planned) }))
}

fn ensure_open(row: &RegistrationRow) -> Result<(), HandlerErr> {
    if row.withdrawn_at.is_some() {
        return Err(HandlerErr::new("conflict", "registration is withdrawn"));
    }
    if row.transfer_to_id.is_some() {
        return Err(HandlerErr::new("conflict", "registration was transferred")
            .with_details(json!({ "transferToId": row.transfer_to_id })));
    }
    Ok(())
}

fn registrations_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let id = required_str(params, "registrationId")?;
    let catalog = load_catalog(conn)?;
    let current = load_planned(conn, &catalog, &id, today)?;
    ensure_open(&current.row)?;
    let Some(patch) = params.get("patch").filter(|p| p.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let student_name = opt_str(patch, "studentName").unwrap_or_else(|| current.row.student_name.clone());
    let start_date = match opt_date(patch, "startDate")? {
        Some(d) => Some(format_date(d)),
        None => current.row.start_date.clone(),
    };
    let weeks = opt_i64_range(patch, "weeks", 1, MAX_DURATION_WEEKS)?.unwrap_or(current.row.weeks);
    let skip_weeks = week_list(patch, "skipWeeks")?.unwrap_or_else(|| current.row.skip_weeks.clone());
    let tuition_fee = opt_i64_range(patch, "tuitionFee", 0, i64::MAX)?.unwrap_or(current.row.tuition_fee);
    check_weeks(current.course, weeks)?;

    conn.execute(
        "UPDATE registrations
         SET student_name = ?, start_date = ?, weeks = ?, skip_weeks_json = ?, tuition_fee = ?,
             updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            student_name,
            start_date,
            weeks,
            serde_json::to_string(&skip_weeks).unwrap_or_else(|_| "[]".to_string()),
            tuition_fee,
            now_ts(),
            id,
        ],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let planned = load_planned(conn, &catalog, &id, today)?;
    Ok(json!({ "registration": registration_json(&planned) }))
}

fn registrations_withdraw(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let id = required_str(params, "registrationId")?;
    let catalog = load_catalog(conn)?;
    let current = load_planned(conn, &catalog, &id, today)?;
    ensure_open(&current.row)?;
    let withdrawn_at = opt_date(params, "withdrawnAt")?.unwrap_or(today);
    if let Some(start) = current.plan.start_date {
        if withdrawn_at < start {
            return Err(HandlerErr::bad_params("withdrawnAt must not precede startDate"));
        }
    }

    conn.execute(
        "UPDATE registrations SET withdrawn_at = ?, updated_at = ? WHERE id = ?",
        (format_date(withdrawn_at), now_ts(), &id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(registration = %id, %withdrawn_at, "registration withdrawn");

    let planned = load_planned(conn, &catalog, &id, today)?;
    Ok(json!({
        "registration": registration_json(&planned),
        "weeksAttended": current.plan.attended_weeks_before(withdrawn_at),
    }))
}

fn registrations_transfer(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = request_today(params)?;
    let id = required_str(params, "registrationId")?;
    let catalog = load_catalog(conn)?;
    let current = load_planned(conn, &catalog, &id, today)?;
    ensure_open(&current.row)?;
    let Some(start) = current.plan.start_date else {
        return Err(HandlerErr::new("not_eligible", "registration has no start date"));
    };

    let transfer_at = opt_date(params, "transferAt")?.unwrap_or(today);
    if transfer_at < start {
        return Err(HandlerErr::bad_params("transferAt must not precede startDate"));
    }
    let (to_course, to_text) = pick_course(&catalog, params, "toCourseId", "toCourse")?;
    let Some(to_course) = to_course else {
        return Err(HandlerErr::not_found("target course not found").with_details(json!({ "toCourse": to_text })));
    };

    // Weeks that began before the transfer day are used up.
    let consumed = current
        .plan
        .attended_weeks_before(transfer_at - Duration::days(1));
    let remaining = (current.plan.weeks_paid - i64::from(consumed)).max(0);
    let weeks = opt_i64_range(params, "weeks", 1, MAX_DURATION_WEEKS)?.unwrap_or(remaining);
    if weeks <= 0 {
        return Err(HandlerErr::new("not_eligible", "no remaining weeks to transfer")
            .with_details(json!({ "weeksPaid": current.plan.weeks_paid, "weeksAttended": consumed })));
    }
    check_weeks(Some(to_course), weeks)?;

    let scan_days = load_schedule_setup(conn).next_course_scan_days;
    let to_rules = to_course.rules();
    let start_date = match opt_date(params, "startDate")? {
        Some(d) => d,
        None if to_rules.days.contains_date(transfer_at) && !to_rules.breaks.contains(transfer_at) => {
            transfer_at
        }
        None => next_course_date_within(transfer_at, to_rules.days, &to_rules.breaks, scan_days),
    };

    let new_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    insert_registration(
        &tx,
        &new_id,
        &current.row.student_name,
        Some(to_course),
        &to_course.label,
        start_date,
        weeks,
        &[],
        0,
        Some(&id),
    )?;
    tx.execute(
        "UPDATE registrations SET transfer_to_id = ?, transfer_at = ?, updated_at = ? WHERE id = ?",
        (&new_id, format_date(transfer_at), now_ts(), &id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(from = %id, to = %new_id, %transfer_at, "registration transferred");

    let from = load_planned(conn, &catalog, &id, today)?;
    let to = load_planned(conn, &catalog, &new_id, today)?;
    Ok(json!({
        "from": registration_json(&from),
        "to": registration_json(&to),
        "weeksAttended": consumed,
        "weeksTransferred": weeks,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "registrations.list" => Some(with_conn(state, req, registrations_list)),
        "registrations.create" => Some(with_conn(state, req, registrations_create)),
        "registrations.update" => Some(with_conn(state, req, registrations_update)),
        "registrations.withdraw" => Some(with_conn(state, req, registrations_withdraw)),
        "registrations.transfer" => Some(with_conn(state, req, registrations_transfer)),
        _ => None,
    }
}
