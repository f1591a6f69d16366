use chrono::{DateTime, Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

pub const ISO_DATE: &str = "%Y-%m-%d";

/// Parse a calendar date from the loose forms upstream records carry:
/// `YYYY-MM-DD`, `YYYY.MM.DD`, `YYYY/MM/DD` (single-digit month/day and
/// spaces after separators allowed), optionally followed by a time part
/// (`T...` or ` ...`) or a trailing `.`. The time part is dropped.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    let bytes = t.as_bytes();
    let mut parts = [0u32; 3];
    let mut pos = 0usize;

    for (i, part) in parts.iter_mut().enumerate() {
        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let len = pos - start;
        let len_ok = if i == 0 { len == 4 } else { (1..=2).contains(&len) };
        if !len_ok {
            return None;
        }
        *part = t[start..pos].parse().ok()?;
        if i < 2 {
            if pos >= bytes.len() || !matches!(bytes[pos], b'-' | b'.' | b'/') {
                return None;
            }
            pos += 1;
        }
    }

    if let Some(&next) = bytes.get(pos) {
        if !matches!(next, b'T' | b't' | b' ' | b'.') {
            return None;
        }
    }
    NaiveDate::from_ymd_opt(i32::try_from(parts[0]).ok()?, parts[1], parts[2])
}

/// Same as [`parse_date`] for JSON inputs. Numbers are epoch milliseconds
/// (serialized native date objects), read as a local calendar date.
pub fn parse_date_value(v: &serde_json::Value) -> Option<NaiveDate> {
    match v {
        serde_json::Value::String(s) => parse_date(s),
        serde_json::Value::Number(n) => {
            let ms = n.as_i64()?;
            let d = DateTime::from_timestamp_millis(ms)?
                .with_timezone(&Local)
                .date_naive();
            (1..=9999).contains(&d.year()).then_some(d)
        }
        _ => None,
    }
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(ISO_DATE).to_string()
}

/// Sunday = 0 .. Saturday = 6.
pub fn weekday_index(d: NaiveDate) -> u8 {
    d.weekday().num_days_from_sunday() as u8
}

/// Inclusive calendar interval during which no class is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl BreakRange {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Option<Self> {
        (start_date <= end_date).then_some(Self {
            start_date,
            end_date,
        })
    }

    /// Accepts `{startDate, endDate}` or `{start, end}` with any loose date form.
    pub fn from_loose(v: &serde_json::Value) -> Option<Self> {
        let obj = v.as_object()?;
        let start = obj.get("startDate").or_else(|| obj.get("start"))?;
        let end = obj.get("endDate").or_else(|| obj.get("end"))?;
        Self::new(parse_date_value(start)?, parse_date_value(end)?)
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        self.start_date <= d && d <= self.end_date
    }
}

/// Break ranges of one course, sorted and merged so that lookups never see
/// overlapping or adjacent ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakCalendar {
    ranges: Vec<BreakRange>,
}

impl BreakCalendar {
    pub fn new<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = BreakRange>,
    {
        let mut sorted: Vec<BreakRange> = ranges
            .into_iter()
            .filter(|r| r.start_date <= r.end_date)
            .collect();
        sorted.sort();

        let mut merged: Vec<BreakRange> = Vec::with_capacity(sorted.len());
        for r in sorted {
            match merged.last_mut() {
                Some(last) if r.start_date <= last.end_date.succ_opt().unwrap_or(last.end_date) => {
                    if r.end_date > last.end_date {
                        last.end_date = r.end_date;
                    }
                }
                _ => merged.push(r),
            }
        }
        Self { ranges: merged }
    }

    /// Builds from raw JSON, silently dropping entries that do not parse.
    pub fn from_loose(values: &[serde_json::Value]) -> Self {
        Self::new(values.iter().filter_map(BreakRange::from_loose))
    }

    pub fn ranges(&self) -> &[BreakRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        // Ranges are sorted and disjoint: the only candidate is the last range
        // starting on or before `d`.
        let idx = self.ranges.partition_point(|r| r.start_date <= d);
        idx > 0 && self.ranges[idx - 1].contains(d)
    }
}
