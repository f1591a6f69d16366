use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::dates::weekday_index;

/// Days of the week a course meets, Sunday = 0 .. Saturday = 6.
/// An empty pattern means "no fixed pattern": weeks are plain 7-day buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdayPattern(u8);

impl WeekdayPattern {
    pub const EMPTY: Self = Self(0);

    /// Values outside 0..=6 are ignored.
    pub fn from_days<I>(days: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut mask = 0u8;
        for d in days {
            if (0..7).contains(&d) {
                mask |= 1 << d;
            }
        }
        Self(mask)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, weekday: u8) -> bool {
        weekday < 7 && self.0 & (1 << weekday) != 0
    }

    pub fn contains_date(self, d: NaiveDate) -> bool {
        self.contains(weekday_index(d))
    }

    /// A day counts as a class day when it matches the pattern, or always when
    /// the pattern is empty.
    pub fn is_class_day(self, d: NaiveDate) -> bool {
        self.is_empty() || self.contains_date(d)
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn days(self) -> Vec<u8> {
        (0..7).filter(|d| self.contains(*d)).collect()
    }

    /// Offset (0..=6) from a week starting on `start_weekday` to the last
    /// pattern weekday inside that 7-day span. Empty patterns span all 7 days.
    pub fn end_offset(self, start_weekday: u8) -> i64 {
        (0..7_u8)
            .rev()
            .find(|off| self.contains((start_weekday + off) % 7))
            .map(i64::from)
            .unwrap_or(6)
    }

    /// First date on or after `from` (and not after `until`) matching the pattern.
    pub fn first_on_or_after(self, from: NaiveDate, until: NaiveDate) -> Option<NaiveDate> {
        if self.is_empty() {
            return (from <= until).then_some(from);
        }
        (0..7)
            .map(|off| from + Duration::days(off))
            .take_while(|d| *d <= until)
            .find(|d| self.contains_date(*d))
    }

    /// True when at least one class day falls inside `[from, to]`.
    pub fn has_class_day(self, from: NaiveDate, to: NaiveDate) -> bool {
        if from > to {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        self.first_on_or_after(from, to).is_some()
    }
}

impl Serialize for WeekdayPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.days().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WeekdayPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let days = Vec::<i64>::deserialize(deserializer)?;
        Ok(Self::from_days(days))
    }
}

/// One calendar week of a course, as shown in week buckets and Gantt rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseWeek {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CourseWeek {
    /// Intersection with `[from, to]`, if any.
    pub fn overlap(&self, from: NaiveDate, to: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let lo = self.start.max(from);
        let hi = self.end.min(to);
        (lo <= hi).then_some((lo, hi))
    }
}

/// Partition `[range_start, range_end]` into course weeks aligned to `pattern`.
pub fn build_weeks(
    range_start: NaiveDate,
    range_end: NaiveDate,
    pattern: WeekdayPattern,
) -> Vec<CourseWeek> {
    if range_start > range_end {
        return Vec::new();
    }
    let Some(anchor) = pattern.first_on_or_after(range_start, range_end) else {
        return Vec::new();
    };
    let end_offset = pattern.end_offset(weekday_index(anchor));

    let mut weeks = Vec::new();
    let mut start = anchor;
    while start <= range_end {
        let end = (start + Duration::days(end_offset)).min(range_end);
        weeks.push(CourseWeek { start, end });
        start += Duration::days(7);
    }
    weeks
}
