use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;

use crate::schedule::{BreakRange, CourseInfo, CourseTime, WeekRange, WeekdayPattern};

pub const DB_FILE: &str = "academyd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            days_json TEXT NOT NULL DEFAULT '[]',
            end_days_json TEXT NOT NULL DEFAULT '[]',
            min_weeks INTEGER NOT NULL DEFAULT 1,
            max_weeks INTEGER NOT NULL DEFAULT 52,
            break_ranges_json TEXT NOT NULL DEFAULT '[]',
            installment_eligible INTEGER NOT NULL DEFAULT 0,
            time_json TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations(
            id TEXT PRIMARY KEY,
            student_name TEXT NOT NULL,
            course_text TEXT NOT NULL,
            start_date TEXT,
            weeks INTEGER NOT NULL,
            skip_weeks_json TEXT NOT NULL DEFAULT '[]',
            tuition_fee INTEGER NOT NULL DEFAULT 0,
            withdrawn_at TEXT,
            transfer_to_id TEXT,
            transfer_from_id TEXT,
            transfer_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    // Older workspaces matched courses by label text only.
    ensure_registrations_course_id(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_course ON registrations(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS extensions(
            id TEXT PRIMARY KEY,
            registration_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            weeks INTEGER NOT NULL,
            tuition_fee INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(registration_id) REFERENCES registrations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_extensions_registration ON extensions(registration_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS merge_groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            course_labels_json TEXT NOT NULL DEFAULT '[]',
            week_ranges_json TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_registrations_course_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "registrations", "course_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE registrations ADD COLUMN course_id TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Lenient JSON-list column decode; damaged values read as empty.
pub fn parse_json_list<T: serde::de::DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str::<Vec<serde_json::Value>>(raw)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

const COURSE_COLUMNS: &str = "id, label, days_json, end_days_json, min_weeks, max_weeks,
    break_ranges_json, installment_eligible, time_json";

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<CourseInfo> {
    let days_raw: String = r.get(2)?;
    let end_days_raw: String = r.get(3)?;
    let breaks_raw: String = r.get(6)?;
    let time_raw: Option<String> = r.get(8)?;
    let breaks: Vec<serde_json::Value> = parse_json_list(&breaks_raw);
    Ok(CourseInfo {
        id: r.get(0)?,
        label: r.get(1)?,
        days: WeekdayPattern::from_days(parse_json_list::<i64>(&days_raw)),
        end_days: WeekdayPattern::from_days(parse_json_list::<i64>(&end_days_raw)),
        min_weeks: r.get(4)?,
        max_weeks: r.get(5)?,
        break_ranges: breaks.iter().filter_map(BreakRange::from_loose).collect(),
        installment_eligible: r.get::<_, i64>(7)? != 0,
        time: time_raw
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
            .and_then(|v| CourseTime::from_loose(&v)),
    })
}

pub fn list_courses(conn: &Connection) -> anyhow::Result<Vec<CourseInfo>> {
    let sql = format!("SELECT {COURSE_COLUMNS} FROM courses ORDER BY label");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_course(conn: &Connection, id: &str) -> anyhow::Result<Option<CourseInfo>> {
    let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?");
    Ok(conn.query_row(&sql, [id], course_from_row).optional()?)
}

#[derive(Debug, Clone)]
pub struct RegistrationRow {
    pub id: String,
    pub student_name: String,
    pub course_id: Option<String>,
    pub course_text: String,
    pub start_date: Option<String>,
    pub weeks: i64,
    pub skip_weeks: Vec<u32>,
    pub tuition_fee: i64,
    pub withdrawn_at: Option<String>,
    pub transfer_to_id: Option<String>,
    pub transfer_from_id: Option<String>,
    pub transfer_at: Option<String>,
    pub created_at: String,
}

const REGISTRATION_COLUMNS: &str = "id, student_name, course_id, course_text, start_date, weeks,
    skip_weeks_json, tuition_fee, withdrawn_at, transfer_to_id, transfer_from_id, transfer_at,
    created_at";

fn registration_from_row(r: &Row<'_>) -> rusqlite::Result<RegistrationRow> {
    let skips_raw: String = r.get(6)?;
    Ok(RegistrationRow {
        id: r.get(0)?,
        student_name: r.get(1)?,
        course_id: r.get(2)?,
        course_text: r.get(3)?,
        start_date: r.get(4)?,
        weeks: r.get(5)?,
        skip_weeks: parse_json_list(&skips_raw),
        tuition_fee: r.get(7)?,
        withdrawn_at: r.get(8)?,
        transfer_to_id: r.get(9)?,
        transfer_from_id: r.get(10)?,
        transfer_at: r.get(11)?,
        created_at: r.get(12)?,
    })
}

pub fn list_registrations(conn: &Connection) -> anyhow::Result<Vec<RegistrationRow>> {
    let sql = format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registrations ORDER BY start_date, student_name, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], registration_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_registration(conn: &Connection, id: &str) -> anyhow::Result<Option<RegistrationRow>> {
    let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = ?");
    Ok(conn.query_row(&sql, [id], registration_from_row).optional()?)
}

#[derive(Debug, Clone)]
pub struct ExtensionRow {
    pub id: String,
    pub registration_id: String,
    pub start_date: String,
    pub weeks: i64,
    pub tuition_fee: i64,
    pub created_at: String,
}

pub fn list_extensions(conn: &Connection, registration_id: &str) -> anyhow::Result<Vec<ExtensionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, registration_id, start_date, weeks, tuition_fee, created_at
         FROM extensions
         WHERE registration_id = ?
         ORDER BY start_date, id",
    )?;
    let rows = stmt
        .query_map([registration_id], |r| {
            Ok(ExtensionRow {
                id: r.get(0)?,
                registration_id: r.get(1)?,
                start_date: r.get(2)?,
                weeks: r.get(3)?,
                tuition_fee: r.get(4)?,
                created_at: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct MergeGroupRow {
    pub id: String,
    pub name: String,
    pub course_labels: Vec<String>,
    pub week_ranges: Vec<WeekRange>,
}

fn merge_group_from_row(r: &Row<'_>) -> rusqlite::Result<MergeGroupRow> {
    let labels_raw: String = r.get(2)?;
    let ranges_raw: String = r.get(3)?;
    Ok(MergeGroupRow {
        id: r.get(0)?,
        name: r.get(1)?,
        course_labels: parse_json_list(&labels_raw),
        week_ranges: parse_json_list::<WeekRange>(&ranges_raw)
            .into_iter()
            .filter_map(|w| WeekRange::new(w.start, w.end))
            .collect(),
    })
}

pub fn list_merge_groups(conn: &Connection) -> anyhow::Result<Vec<MergeGroupRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, course_labels_json, week_ranges_json FROM merge_groups ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([], merge_group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_merge_group(conn: &Connection, id: &str) -> anyhow::Result<Option<MergeGroupRow>> {
    Ok(conn
        .query_row(
            "SELECT id, name, course_labels_json, week_ranges_json FROM merge_groups WHERE id = ?",
            [id],
            merge_group_from_row,
        )
        .optional()?)
}
