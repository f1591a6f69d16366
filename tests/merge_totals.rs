mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, str_at};

fn attendees(v: &serde_json::Value) -> Vec<u64> {
    v.get("weeks")
        .and_then(|w| w.as_array())
        .map(|a| a.iter().filter_map(|w| w.get("attendees").and_then(|n| n.as_u64())).collect())
        .unwrap_or_default()
}

#[test]
fn merge_totals_respect_week_ranges_and_skips() {
    let (_child, mut stdin, mut reader) = open_workspace("academyd-merge-totals");

    let a = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.upsert",
        json!({ "label": "Math A", "days": [1, 3] }),
    );
    let a_id = str_at(&a, "/course/id").expect("a id").to_string();
    let b = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.upsert",
        json!({ "label": "Math B", "days": [1, 3] }),
    );
    let b_id = str_at(&b, "/course/id").expect("b id").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "registrations.create",
        json!({ "studentName": "Kim", "courseId": a_id, "startDate": "2025-03-03", "weeks": 5 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "registrations.create",
        json!({ "studentName": "Lee", "courseId": b_id, "startDate": "2025-03-03", "weeks": 4, "skipWeeks": [4] }),
    );

    let unknown = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "merges.upsert",
        json!({ "name": "Math", "courseLabels": ["Math A", "Math C"] }),
    );
    assert_eq!(unknown, "bad_params");
    let bad_range = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "merges.upsert",
        json!({ "name": "Math", "courseLabels": ["Math A"], "weekRanges": [{ "start": 4, "end": 2 }] }),
    );
    assert_eq!(bad_range, "bad_params");

    let merge = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "merges.upsert",
        json!({
            "name": "Math",
            "courseLabels": ["Math A", "Math B"],
            "weekRanges": [{ "start": 3, "end": 5 }]
        }),
    );
    let merge_id = str_at(&merge, "/merge/id").expect("merge id").to_string();

    let totals = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.mergeTotals",
        json!({ "mergeId": merge_id, "today": "2025-03-20" }),
    );
    assert_eq!(attendees(&totals), vec![0, 0, 2, 1, 2]);
    assert_eq!(totals.get("weekRangesApplied"), Some(&json!(true)));
    assert_eq!(totals.get("days"), Some(&json!([1, 3])));
    let students = totals.get("students").and_then(|v| v.as_array()).expect("students");
    assert_eq!(students.len(), 2);
    assert!(students.iter().any(|s| str_at(s, "/studentName") == Some("Lee")));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({ "section": "schedule", "patch": { "mergeWeekRangesEnabled": false } }),
    );
    let totals = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "schedule.mergeTotals",
        json!({ "mergeId": merge_id, "today": "2025-03-20" }),
    );
    assert_eq!(attendees(&totals), vec![2, 2, 2, 1, 2]);
    assert_eq!(totals.get("weekRangesApplied"), Some(&json!(false)));

    // A single course aligns as a group of one.
    let single = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "schedule.mergeTotals",
        json!({ "courseId": b_id, "today": "2025-03-20" }),
    );
    assert_eq!(attendees(&single), vec![1, 1, 1, 0, 1]);
    assert_eq!(single.get("merge"), Some(&json!(null)));

    let none = request_err(&mut stdin, &mut reader, "12", "schedule.mergeTotals", json!({}));
    assert_eq!(none, "bad_params");

    let listed = request_ok(&mut stdin, &mut reader, "13", "merges.list", json!({}));
    assert_eq!(listed.get("merges").and_then(|v| v.as_array()).map(|a| a.len()), Some(1));
    let _ = request_ok(&mut stdin, &mut reader, "14", "merges.delete", json!({ "mergeId": merge_id }));
    let gone = request_err(&mut stdin, &mut reader, "15", "merges.delete", json!({ "mergeId": merge_id }));
    assert_eq!(gone, "not_found");
}

#[test]
fn renaming_a_course_keeps_its_merge_group_membership() {
    let (_child, mut stdin, mut reader) = open_workspace("academyd-merge-relabel");

    let a = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.upsert",
        json!({ "label": "Math A", "days": [1, 3] }),
    );
    let a_id = str_at(&a, "/course/id").expect("a id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.upsert",
        json!({ "label": "Math B", "days": [1, 3] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "registrations.create",
        json!({ "studentName": "Kim", "courseId": a_id, "startDate": "2025-03-03", "weeks": 2 }),
    );
    let merge = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "merges.upsert",
        json!({ "name": "Math", "courseLabels": ["Math A", "Math B"] }),
    );
    let merge_id = str_at(&merge, "/merge/id").expect("merge id").to_string();

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.upsert",
        json!({ "id": a_id, "label": "Math Alpha" }),
    );
    assert_eq!(str_at(&renamed, "/course/label"), Some("Math Alpha"));

    let listed = request_ok(&mut stdin, &mut reader, "6", "merges.list", json!({}));
    assert_eq!(
        listed.pointer("/merges/0/courseLabels"),
        Some(&json!(["Math Alpha", "Math B"]))
    );

    let totals = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.mergeTotals",
        json!({ "mergeId": merge_id, "today": "2025-03-05" }),
    );
    assert_eq!(attendees(&totals), vec![1, 1]);
    assert_eq!(totals.get("students").and_then(|v| v.as_array()).map(|a| a.len()), Some(1));
}
