use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::{self, MergeGroupRow};
use crate::ipc::helpers::{load_catalog, now_ts, opt_str, required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::WeekRange;

pub fn merge_group_json(g: &MergeGroupRow) -> Value {
    json!({
        "id": g.id,
        "name": g.name,
        "courseLabels": g.course_labels,
        "weekRanges": g.week_ranges,
    })
}

fn merges_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let groups = db::list_merge_groups(conn).map_err(HandlerErr::query)?;
    let out: Vec<Value> = groups.iter().map(merge_group_json).collect();
    Ok(json!({ "merges": out }))
}

fn parse_week_ranges(v: Option<&Value>) -> Result<Vec<WeekRange>, HandlerErr> {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params("weekRanges must be an array"))?;
    let mut out = Vec::with_capacity(arr.len());
    for (i, r) in arr.iter().enumerate() {
        let bound = |k: &str| {
            r.get(k)
                .and_then(|x| x.as_u64())
                .and_then(|n| u32::try_from(n).ok())
        };
        let range = match (bound("start"), bound("end")) {
            (Some(s), Some(e)) => WeekRange::new(s, e),
            _ => None,
        };
        let Some(range) = range else {
            return Err(HandlerErr::bad_params("weekRanges entries need 1 <= start <= end")
                .with_details(json!({ "index": i })));
        };
        out.push(range);
    }
    out.sort_by_key(|r| (r.start, r.end));
    Ok(out)
}

fn merges_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let existing = match opt_str(params, "id") {
        Some(id) => Some(
            db::get_merge_group(conn, &id)
                .map_err(HandlerErr::query)?
                .ok_or_else(|| HandlerErr::not_found("merge group not found"))?,
        ),
        None => None,
    };
    let name = match (opt_str(params, "name"), existing.as_ref()) {
        (Some(n), _) => n,
        (None, Some(g)) => g.name.clone(),
        (None, None) => return Err(HandlerErr::bad_params("missing name")),
    };

    let course_labels: Vec<String> = match params.get("courseLabels") {
        Some(v) => v
            .as_array()
            .ok_or_else(|| HandlerErr::bad_params("courseLabels must be an array"))?
            .iter()
            .filter_map(|x| x.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => existing.as_ref().map(|g| g.course_labels.clone()).unwrap_or_default(),
    };
    if course_labels.is_empty() {
        return Err(HandlerErr::bad_params("courseLabels must not be empty"));
    }
    let catalog = load_catalog(conn)?;
    let unknown: Vec<&String> = course_labels
        .iter()
        .filter(|l| catalog.by_label(l).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(HandlerErr::bad_params("unknown course labels")
            .with_details(json!({ "labels": unknown })));
    }

    let week_ranges = match params.get("weekRanges") {
        Some(v) => parse_week_ranges(Some(v))?,
        None => existing.as_ref().map(|g| g.week_ranges.clone()).unwrap_or_default(),
    };

    let group = MergeGroupRow {
        id: existing
            .as_ref()
            .map(|g| g.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name,
        course_labels,
        week_ranges,
    };
    let labels_json = serde_json::to_string(&group.course_labels).unwrap_or_else(|_| "[]".into());
    let ranges_json = serde_json::to_string(&group.week_ranges).unwrap_or_else(|_| "[]".into());
    if existing.is_some() {
        conn.execute(
            "UPDATE merge_groups
             SET name = ?, course_labels_json = ?, week_ranges_json = ?, updated_at = ?
             WHERE id = ?",
            (&group.name, &labels_json, &ranges_json, now_ts(), &group.id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    } else {
        conn.execute(
            "INSERT INTO merge_groups(id, name, course_labels_json, week_ranges_json, updated_at)
             VALUES(?, ?, ?, ?, ?)",
            (&group.id, &group.name, &labels_json, &ranges_json, now_ts()),
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "merge_groups" }))
        })?;
    }
    Ok(json!({ "merge": merge_group_json(&group), "created": existing.is_none() }))
}

fn merges_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "mergeId")?;
    let n = conn
        .execute("DELETE FROM merge_groups WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if n == 0 {
        return Err(HandlerErr::not_found("merge group not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "merges.list" => Some(with_conn(state, req, merges_list)),
        "merges.upsert" => Some(with_conn(state, req, merges_upsert)),
        "merges.delete" => Some(with_conn(state, req, merges_delete)),
        _ => None,
    }
}
