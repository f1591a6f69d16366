use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    day_list, db_conn, load_catalog, now_ts, opt_i64_range, opt_str, required_str, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::resolver::MAX_DURATION_WEEKS;
use crate::schedule::{BreakRange, CourseInfo, CourseTime, WeekdayPattern};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Ok(conn) = db_conn(state) else {
        return ok(&req.id, json!({ "courses": [] }));
    };
    match db::list_courses(conn) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => HandlerErr::query(e).response(&req.id),
    }
}

fn parse_break_ranges(v: Option<&Value>) -> Result<Vec<BreakRange>, HandlerErr> {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params("breakRanges must be an array"))?;
    arr.iter()
        .enumerate()
        .map(|(i, r)| {
            BreakRange::from_loose(r).ok_or_else(|| {
                HandlerErr::bad_params("breakRanges entries need startDate <= endDate")
                    .with_details(json!({ "index": i }))
            })
        })
        .collect()
}

fn parse_course(params: &Value, existing: Option<&CourseInfo>) -> Result<CourseInfo, HandlerErr> {
    let label = match (opt_str(params, "label"), existing) {
        (Some(l), _) => l,
        (None, Some(c)) => c.label.clone(),
        (None, None) => return Err(HandlerErr::bad_params("missing label")),
    };
    let days = match params.get("days") {
        Some(v) => WeekdayPattern::from_days(day_list(v, "days")?),
        None => existing.map(|c| c.days).unwrap_or_default(),
    };
    // Single endDay and endDays list are both accepted.
    let end_days = match params.get("endDays").or_else(|| params.get("endDay")) {
        Some(v) => WeekdayPattern::from_days(day_list(v, "endDays")?),
        None => existing.map(|c| c.end_days).unwrap_or_default(),
    };
    let min_weeks = opt_i64_range(params, "minWeeks", 1, MAX_DURATION_WEEKS)?
        .or(existing.map(|c| c.min_weeks))
        .unwrap_or(1);
    let max_weeks = opt_i64_range(params, "maxWeeks", 1, MAX_DURATION_WEEKS)?
        .or(existing.map(|c| c.max_weeks))
        .unwrap_or(52);
    if min_weeks > max_weeks {
        return Err(HandlerErr::bad_params("minWeeks must not exceed maxWeeks"));
    }
    let break_ranges = match params.get("breakRanges") {
        Some(v) => parse_break_ranges(Some(v))?,
        None => existing.map(|c| c.break_ranges.clone()).unwrap_or_default(),
    };
    let installment_eligible = match params.get("installmentEligible") {
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("installmentEligible must be boolean"))?,
        None => existing.map(|c| c.installment_eligible).unwrap_or(false),
    };
    let time = match params.get("time") {
        Some(Value::Null) => None,
        Some(v) => Some(
            CourseTime::from_loose(v)
                .ok_or_else(|| HandlerErr::bad_params("time must be a string or a label -> time map"))?,
        ),
        None => existing.and_then(|c| c.time.clone()),
    };

    Ok(CourseInfo {
        id: existing
            .map(|c| c.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        label,
        days,
        end_days,
        min_weeks,
        max_weeks,
        break_ranges,
        installment_eligible,
        time,
    })
}

fn label_taken(conn: &Connection, label: &str, except_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM courses WHERE label = ? AND id <> ?",
        (label, except_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn to_json_text<T: serde::Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Merge groups name member courses by label; keep them pointing at a
/// renamed course.
fn relabel_merge_groups(conn: &Connection, from: &str, to: &str) -> Result<(), HandlerErr> {
    let groups = db::list_merge_groups(conn).map_err(HandlerErr::query)?;
    for g in groups.into_iter().filter(|g| g.course_labels.iter().any(|l| l == from)) {
        let labels: Vec<&str> = g
            .course_labels
            .iter()
            .map(|l| if l == from { to } else { l.as_str() })
            .collect();
        conn.execute(
            "UPDATE merge_groups SET course_labels_json = ?, updated_at = ? WHERE id = ?",
            (to_json_text(&labels), now_ts(), &g.id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        tracing::info!(merge = %g.id, %from, %to, "merge group relabeled");
    }
    Ok(())
}

fn courses_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let existing = match opt_str(params, "id") {
        Some(id) => Some(
            db::get_course(conn, &id)
                .map_err(HandlerErr::query)?
                .ok_or_else(|| HandlerErr::not_found("course not found"))?,
        ),
        None => None,
    };
    let course = parse_course(params, existing.as_ref())?;
    if label_taken(conn, &course.label, &course.id)? {
        return Err(HandlerErr::new("conflict", "course label already exists")
            .with_details(json!({ "label": course.label })));
    }

    let time_json = course.time.as_ref().map(to_json_text);
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let res = if existing.is_some() {
        tx.execute(
            "UPDATE courses
             SET label = ?, days_json = ?, end_days_json = ?, min_weeks = ?, max_weeks = ?,
                 break_ranges_json = ?, installment_eligible = ?, time_json = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                course.label,
                to_json_text(&course.days),
                to_json_text(&course.end_days),
                course.min_weeks,
                course.max_weeks,
                to_json_text(&course.break_ranges),
                course.installment_eligible as i64,
                time_json,
                now_ts(),
                course.id,
            ],
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))
    } else {
        tx.execute(
            "INSERT INTO courses(id, label, days_json, end_days_json, min_weeks, max_weeks,
                 break_ranges_json, installment_eligible, time_json, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                course.id,
                course.label,
                to_json_text(&course.days),
                to_json_text(&course.end_days),
                course.min_weeks,
                course.max_weeks,
                to_json_text(&course.break_ranges),
                course.installment_eligible as i64,
                time_json,
                now_ts(),
            ],
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "courses" }))
        })
    };
    res?;
    if let Some(prev) = existing.as_ref().filter(|p| p.label != course.label) {
        relabel_merge_groups(&tx, &prev.label, &course.label)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(course = %course.id, label = %course.label, "course saved");
    Ok(json!({ "course": course, "created": existing.is_none() }))
}

fn courses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "courseId")?;
    if db::get_course(conn, &id).map_err(HandlerErr::query)?.is_none() {
        return Err(HandlerErr::not_found("course not found"));
    }
    let refs: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM registrations WHERE course_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if refs > 0 {
        return Err(HandlerErr::new("conflict", "course is referenced by registrations")
            .with_details(json!({ "registrations": refs })));
    }
    conn.execute("DELETE FROM courses WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn courses_resolve(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let text = required_str(params, "text")?;
    let catalog = load_catalog(conn)?;
    Ok(json!({ "course": catalog.resolve(&text) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.upsert" => Some(with_conn(state, req, courses_upsert)),
        "courses.delete" => Some(with_conn(state, req, courses_delete)),
        "courses.resolve" => Some(with_conn(state, req, courses_resolve)),
        _ => None,
    }
}
