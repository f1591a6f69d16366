use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dates::{BreakCalendar, BreakRange};
use super::resolver::CourseRules;
use super::weeks::WeekdayPattern;

/// Class time of a course. Upstream records carry this as a bare string, an
/// online/offline pair, or a free label -> time map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CourseTime {
    Simple {
        time: String,
    },
    #[serde(rename_all = "camelCase")]
    OnOffline {
        online: Option<String>,
        offline: Option<String>,
    },
    Dynamic {
        slots: BTreeMap<String, String>,
    },
}

impl CourseTime {
    pub fn from_loose(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| Self::Simple { time: s.to_string() })
            }
            Value::Object(obj) => {
                // Already normalized.
                if obj.contains_key("kind") {
                    return serde_json::from_value(v.clone()).ok();
                }
                let text = |k: &str| {
                    obj.get(k)
                        .and_then(|x| x.as_str())
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                };
                if obj.contains_key("online") || obj.contains_key("offline") {
                    return Some(Self::OnOffline {
                        online: text("online"),
                        offline: text("offline"),
                    });
                }
                let slots: BTreeMap<String, String> = obj
                    .iter()
                    .filter_map(|(k, x)| Some((k.trim().to_string(), x.as_str()?.trim().to_string())))
                    .filter(|(k, _)| !k.is_empty())
                    .collect();
                (!slots.is_empty()).then_some(Self::Dynamic { slots })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub id: String,
    pub label: String,
    pub days: WeekdayPattern,
    pub end_days: WeekdayPattern,
    pub min_weeks: i64,
    pub max_weeks: i64,
    pub break_ranges: Vec<BreakRange>,
    pub installment_eligible: bool,
    pub time: Option<CourseTime>,
}

impl CourseInfo {
    pub fn rules(&self) -> CourseRules {
        CourseRules {
            days: self.days,
            end_days: self.end_days,
            breaks: BreakCalendar::new(self.break_ranges.iter().copied()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("course {id} has an empty label")]
    EmptyLabel { id: String },
    #[error("course label {label:?} is used by more than one course ({first}, {second})")]
    AmbiguousLabel {
        label: String,
        first: String,
        second: String,
    },
}

/// Immutable snapshot of the course catalog, built once per request.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    courses: Vec<CourseInfo>,
    by_id: HashMap<String, usize>,
    by_label: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(courses: Vec<CourseInfo>) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(courses.len());
        let mut by_label: HashMap<String, usize> = HashMap::with_capacity(courses.len());
        for (i, c) in courses.iter().enumerate() {
            let label = c.label.trim();
            if label.is_empty() {
                return Err(CatalogError::EmptyLabel { id: c.id.clone() });
            }
            if let Some(&prev) = by_label.get(label) {
                return Err(CatalogError::AmbiguousLabel {
                    label: label.to_string(),
                    first: courses[prev].id.clone(),
                    second: c.id.clone(),
                });
            }
            by_label.insert(label.to_string(), i);
            by_id.insert(c.id.clone(), i);
        }
        Ok(Self {
            courses,
            by_id,
            by_label,
        })
    }

    pub fn get(&self, id: &str) -> Option<&CourseInfo> {
        self.by_id.get(id).map(|&i| &self.courses[i])
    }

    pub fn by_label(&self, label: &str) -> Option<&CourseInfo> {
        self.by_label.get(label.trim()).map(|&i| &self.courses[i])
    }

    /// Entry whose label is the longest prefix of the free-text course name.
    /// Labels are unique, so at most one entry has the longest match.
    pub fn resolve(&self, course_text: &str) -> Option<&CourseInfo> {
        let text = course_text.trim();
        self.by_label
            .iter()
            .filter(|(label, _)| text.starts_with(label.as_str()))
            .max_by_key(|(label, _)| label.len())
            .map(|(_, &i)| &self.courses[i])
    }
}
