use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Active,
    Completed,
    Unknown,
}

impl RegistrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Unknown => "unknown",
        }
    }
}

/// Classify an enrollment span against `now`. All comparisons are by
/// calendar day; callers snapshot `now` once per pass.
pub fn get_registration_status(
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    now: NaiveDate,
) -> RegistrationStatus {
    if start_date.is_none() && end_date.is_none() {
        return RegistrationStatus::Unknown;
    }
    if start_date.is_some_and(|s| s > now) {
        return RegistrationStatus::Pending;
    }
    if end_date.is_some_and(|e| e < now) {
        return RegistrationStatus::Completed;
    }
    RegistrationStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::dates::parse_date;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn classifies_by_calendar_day() {
        let now = date(2025, 3, 10);
        let s = Some(date(2025, 3, 10));
        let e = Some(date(2025, 3, 31));
        assert_eq!(get_registration_status(s, e, now), RegistrationStatus::Active);
        assert_eq!(
            get_registration_status(Some(date(2025, 3, 11)), e, now),
            RegistrationStatus::Pending
        );
        assert_eq!(
            get_registration_status(s, Some(date(2025, 3, 9)), now),
            RegistrationStatus::Completed
        );
        // End day itself is still active
        assert_eq!(
            get_registration_status(Some(date(2025, 3, 1)), Some(now), now),
            RegistrationStatus::Active
        );
    }

    #[test]
    fn single_bound_is_active_on_the_right_side() {
        let now = date(2025, 3, 10);
        assert_eq!(
            get_registration_status(Some(date(2025, 3, 1)), None, now),
            RegistrationStatus::Active
        );
        assert_eq!(
            get_registration_status(None, Some(date(2025, 3, 20)), now),
            RegistrationStatus::Active
        );
        assert_eq!(
            get_registration_status(None, Some(date(2025, 3, 2)), now),
            RegistrationStatus::Completed
        );
        assert_eq!(
            get_registration_status(Some(date(2025, 4, 1)), None, now),
            RegistrationStatus::Pending
        );
    }

    #[test]
    fn unparseable_bounds_are_unknown() {
        let now = date(2025, 3, 10);
        let classify = |s: &str, e: &str| get_registration_status(parse_date(s), parse_date(e), now);
        assert_eq!(classify("soon", ""), RegistrationStatus::Unknown);
        assert_eq!(
            classify("2025.03.01", "2025-03-09T18:00:00"),
            RegistrationStatus::Completed
        );
    }

    #[test]
    fn parseable_triples_are_never_unknown() {
        let now = date(2025, 3, 10);
        for s in 0..20 {
            for e in 0..20 {
                let start = date(2025, 3, 1) + chrono::Duration::days(s);
                let end = date(2025, 3, 1) + chrono::Duration::days(e);
                assert_ne!(
                    get_registration_status(Some(start), Some(end), now),
                    RegistrationStatus::Unknown
                );
            }
        }
    }
}
