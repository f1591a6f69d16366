use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::{self, ExtensionRow, RegistrationRow};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    self, parse_date, parse_date_value, Catalog, CourseInfo, CourseRules, EnrollmentPlan,
    ExtensionInput, RegistrationInput,
};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Runs `f` against the workspace connection and wraps the outcome in the
/// response envelope.
pub fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    match db_conn(state).and_then(|conn| f(conn, &req.params)) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

pub fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    opt_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent or null reads as `None`; anything present must parse as a date.
pub fn opt_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_date_value(v)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a date", key))),
    }
}

pub fn required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    opt_date(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_i64_range(params: &Value, key: &str, min: i64, max: i64) -> Result<Option<i64>, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let n = v
        .as_i64()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key)))?;
    if !(min..=max).contains(&n) {
        return Err(HandlerErr::bad_params(format!("{} must be in {}..={}", key, min, max)));
    }
    Ok(Some(n))
}

/// Sorted, de-duplicated list of 1-based week indices.
pub fn week_list(params: &Value, key: &str) -> Result<Option<Vec<u32>>, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", key)))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let w = item
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} entries must be integers >= 1", key)))?;
        out.push(w);
    }
    out.sort_unstable();
    out.dedup();
    Ok(Some(out))
}

pub fn day_list(v: &Value, key: &str) -> Result<Vec<i64>, HandlerErr> {
    let arr = match v {
        Value::Null => return Ok(Vec::new()),
        Value::Number(_) => std::slice::from_ref(v),
        Value::Array(a) => a.as_slice(),
        _ => return Err(HandlerErr::bad_params(format!("{} must be an array", key))),
    };
    arr.iter()
        .map(|d| {
            d.as_i64()
                .filter(|n| (0..=6).contains(n))
                .ok_or_else(|| HandlerErr::bad_params(format!("{} entries must be weekdays 0..=6", key)))
        })
        .collect()
}

/// The single "today" a request classifies against.
pub fn request_today(params: &Value) -> Result<NaiveDate, HandlerErr> {
    Ok(opt_date(params, "today")?.unwrap_or_else(|| chrono::Local::now().date_naive()))
}

pub fn load_catalog(conn: &Connection) -> Result<Catalog, HandlerErr> {
    let courses = db::list_courses(conn).map_err(HandlerErr::query)?;
    Catalog::new(courses).map_err(|e| HandlerErr::new("conflict", e.to_string()))
}

/// Explicit course id first, else best-prefix match on the free-text name.
pub fn course_for<'c>(catalog: &'c Catalog, reg: &RegistrationRow) -> Option<&'c CourseInfo> {
    reg.course_id
        .as_deref()
        .and_then(|id| catalog.get(id))
        .or_else(|| catalog.resolve(&reg.course_text))
}

pub fn registration_input(reg: &RegistrationRow) -> RegistrationInput {
    RegistrationInput {
        start_date: reg.start_date.as_deref().and_then(parse_date),
        weeks: reg.weeks,
        skip_weeks: reg.skip_weeks.clone(),
        withdrawn_at: reg.withdrawn_at.as_deref().and_then(parse_date),
        transferred_at: reg.transfer_at.as_deref().and_then(parse_date),
    }
}

pub fn extension_inputs(rows: &[ExtensionRow]) -> Vec<ExtensionInput> {
    rows.iter()
        .filter_map(|e| {
            let Some(start_date) = parse_date(&e.start_date) else {
                tracing::debug!(extension = %e.id, raw = %e.start_date, "unparseable extension start");
                return None;
            };
            Some(ExtensionInput {
                id: e.id.clone(),
                start_date,
                weeks: e.weeks,
            })
        })
        .collect()
}

pub struct PlannedRegistration<'c> {
    pub row: RegistrationRow,
    pub course: Option<&'c CourseInfo>,
    pub extensions: Vec<ExtensionRow>,
    pub rules: CourseRules,
    pub plan: EnrollmentPlan,
}

pub fn plan_registration<'c>(
    conn: &Connection,
    catalog: &'c Catalog,
    row: RegistrationRow,
    now: NaiveDate,
) -> Result<PlannedRegistration<'c>, HandlerErr> {
    let extensions = db::list_extensions(conn, &row.id).map_err(HandlerErr::query)?;
    let course = course_for(catalog, &row);
    if course.is_none() {
        tracing::debug!(registration = %row.id, course = %row.course_text, "no catalog entry for registration");
    }
    let rules = course.map(CourseInfo::rules).unwrap_or_default();
    let plan = schedule::plan_enrollment(
        &rules,
        &registration_input(&row),
        &extension_inputs(&extensions),
        now,
    );
    Ok(PlannedRegistration {
        row,
        course,
        extensions,
        rules,
        plan,
    })
}

pub fn load_planned<'c>(
    conn: &Connection,
    catalog: &'c Catalog,
    registration_id: &str,
    now: NaiveDate,
) -> Result<PlannedRegistration<'c>, HandlerErr> {
    let row = db::get_registration(conn, registration_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("registration not found"))?;
    plan_registration(conn, catalog, row, now)
}

pub fn registration_json(p: &PlannedRegistration<'_>) -> Value {
    json!({
        "id": p.row.id,
        "studentName": p.row.student_name,
        "courseText": p.row.course_text,
        "courseId": p.course.map(|c| c.id.clone()),
        "courseLabel": p.course.map(|c| c.label.clone()),
        "startDate": p.plan.start_date,
        "weeks": p.row.weeks,
        "skipWeeks": p.row.skip_weeks,
        "tuitionFee": p.row.tuition_fee,
        "weeksPaid": p.plan.weeks_paid,
        "extensionCount": p.extensions.len(),
        "scheduledEndDate": p.plan.scheduled_end_date,
        "endDate": p.plan.effective_end_date,
        "status": p.plan.status,
        "cutoff": p.plan.cutoff,
        "withdrawnAt": p.row.withdrawn_at,
        "transferToId": p.row.transfer_to_id,
        "transferFromId": p.row.transfer_from_id,
        "transferAt": p.row.transfer_at,
        "createdAt": p.row.created_at,
    })
}

fn load_setup_section(conn: &Connection, key: &str) -> Map<String, Value> {
    db::settings_get_json(conn, key)
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleSetup {
    pub next_course_scan_days: i64,
    pub merge_week_ranges_enabled: bool,
}

pub fn load_schedule_setup(conn: &Connection) -> ScheduleSetup {
    let obj = load_setup_section(conn, "setup.schedule");
    ScheduleSetup {
        next_course_scan_days: obj
            .get("nextCourseScanDays")
            .and_then(|v| v.as_i64())
            .filter(|v| (7..=366).contains(v))
            .unwrap_or(schedule::extension::NEXT_COURSE_SCAN_DAYS),
        merge_week_ranges_enabled: obj
            .get("mergeWeekRangesEnabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtensionSetup {
    pub require_installment_eligible: bool,
    pub default_extension_weeks: i64,
    pub max_extension_weeks: i64,
}

pub fn load_extension_setup(conn: &Connection) -> ExtensionSetup {
    let obj = load_setup_section(conn, "setup.extensions");
    ExtensionSetup {
        require_installment_eligible: obj
            .get("requireInstallmentEligible")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        default_extension_weeks: obj
            .get("defaultExtensionWeeks")
            .and_then(|v| v.as_i64())
            .filter(|v| (1..=52).contains(v))
            .unwrap_or(4),
        max_extension_weeks: obj
            .get("maxExtensionWeeks")
            .and_then(|v| v.as_i64())
            .filter(|v| (1..=104).contains(v))
            .unwrap_or(52),
    }
}
