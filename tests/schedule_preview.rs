mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, str_at, u64_list};

fn preview(extra: serde_json::Value) -> serde_json::Value {
    let mut params = json!({ "days": [1, 3], "startDate": "2025-03-03", "today": "2025-03-01" });
    if let (Some(base), Some(more)) = (params.as_object_mut(), extra.as_object()) {
        for (k, v) in more {
            base.insert(k.clone(), v.clone());
        }
    }
    params
}

#[test]
fn preview_resolves_weeks_skips_and_breaks() {
    let (_child, mut stdin, mut reader) = open_workspace("academyd-schedule-preview");

    let plain = request_ok(&mut stdin, &mut reader, "1", "schedule.preview", preview(json!({ "weeks": 3 })));
    assert_eq!(plain.pointer("/plan/segments/0/scheduleWeeks"), Some(&json!(3)));
    assert_eq!(str_at(&plain, "/plan/effectiveEndDate"), Some("2025-03-19"));
    assert_eq!(str_at(&plain, "/plan/status"), Some("pending"));

    let skipped = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.preview",
        preview(json!({ "weeks": 3, "skipWeeks": [2] })),
    );
    assert_eq!(skipped.pointer("/plan/segments/0/scheduleWeeks"), Some(&json!(4)));
    assert_eq!(u64_list(&skipped, "/excludedWeeks"), vec![2]);
    assert_eq!(str_at(&skipped, "/plan/effectiveEndDate"), Some("2025-03-26"));

    let breaks = json!([{ "startDate": "2025-03-10", "endDate": "2025-03-16" }]);
    let on_break = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.preview",
        preview(json!({ "weeks": 3, "breakRanges": breaks })),
    );
    assert_eq!(on_break.pointer("/plan/segments/0/scheduleWeeks"), Some(&json!(4)));
    assert_eq!(u64_list(&on_break, "/plan/segments/0/breakWeeks"), vec![2]);

    // A skipped week that is also a break week is only added once.
    let both = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.preview",
        preview(json!({ "weeks": 3, "skipWeeks": [2], "breakRanges": breaks })),
    );
    assert_eq!(both.pointer("/plan/segments/0/scheduleWeeks"), Some(&json!(4)));

    let zero = request_ok(&mut stdin, &mut reader, "5", "schedule.preview", preview(json!({ "weeks": 0 })));
    assert_eq!(str_at(&zero, "/plan/effectiveEndDate"), Some("2025-03-03"));

    let no_start = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.preview",
        json!({ "days": [1, 3], "weeks": 3 }),
    );
    assert_eq!(str_at(&no_start, "/plan/status"), Some("unknown"));
    assert_eq!(no_start.pointer("/plan/segments"), Some(&json!([])));

    let garbage = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.preview",
        preview(json!({ "weeks": 3, "startDate": "March third" })),
    );
    assert_eq!(garbage, "bad_params");
    let missing_weeks = request_err(&mut stdin, &mut reader, "8", "schedule.preview", preview(json!({})));
    assert_eq!(missing_weeks, "bad_params");
}

#[test]
fn weeks_partition_a_range_on_class_days() {
    let (_child, mut stdin, mut reader) = open_workspace("academyd-schedule-weeks");

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.weeks",
        json!({ "days": [1, 3], "rangeStart": "2025-03-01", "rangeEnd": "2025-03-23" }),
    );
    let weeks = out.get("weeks").and_then(|v| v.as_array()).expect("weeks");
    assert_eq!(weeks.len(), 3);
    assert_eq!(str_at(&weeks[0], "/start"), Some("2025-03-03"));
    assert_eq!(str_at(&weeks[0], "/end"), Some("2025-03-05"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.weeks",
        json!({ "days": [1], "rangeStart": "2025-03-01" }),
    );
    assert_eq!(code, "bad_params");
}
