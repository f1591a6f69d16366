mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, str_at};

fn reasons(v: &serde_json::Value) -> Vec<String> {
    v.get("reasons")
        .and_then(|r| r.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[test]
fn extension_starts_on_next_class_day_and_respects_max_weeks() {
    let (_child, mut stdin, mut reader) = open_workspace("academyd-extensions-plan");

    let piano = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.upsert",
        json!({ "label": "Piano", "days": [1, 3, 5], "maxWeeks": 12, "installmentEligible": true }),
    );
    let piano_id = str_at(&piano, "/course/id").expect("piano id").to_string();

    let park = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "registrations.create",
        json!({ "studentName": "Park", "courseId": piano_id, "startDate": "2025-03-03", "weeks": 1 }),
    );
    let park_id = str_at(&park, "/registration/id").expect("park id").to_string();
    assert_eq!(str_at(&park, "/registration/endDate"), Some("2025-03-07"));

    let plan = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "extensions.plan",
        json!({ "registrationId": park_id, "weeks": 2, "today": "2025-03-01" }),
    );
    assert_eq!(plan.get("eligible"), Some(&json!(true)));
    assert_eq!(plan.get("studentMaxWeeks"), Some(&json!(12)));
    assert_eq!(str_at(&plan, "/plan/startDate"), Some("2025-03-10"));
    assert_eq!(str_at(&plan, "/plan/endDate"), Some("2025-03-21"));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "extensions.create",
        json!({ "registrationId": park_id, "weeks": 2, "today": "2025-03-01" }),
    );
    assert_eq!(str_at(&created, "/registration/endDate"), Some("2025-03-21"));
    assert_eq!(created.pointer("/registration/weeksPaid"), Some(&json!(3)));
    assert_eq!(created.pointer("/registration/extensionCount"), Some(&json!(1)));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "extensions.list",
        json!({ "registrationId": park_id }),
    );
    let exts = listed.get("extensions").and_then(|v| v.as_array()).expect("extensions");
    assert_eq!(exts.len(), 1);
    assert_eq!(str_at(&exts[0], "/endDate"), Some("2025-03-21"));

    let overlap = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "extensions.plan",
        json!({ "registrationId": park_id, "weeks": 1, "startDate": "2025-03-21" }),
    );
    assert_eq!(overlap, "conflict");

    let too_many = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "extensions.create",
        json!({ "registrationId": park_id, "weeks": 10, "today": "2025-03-01" }),
    );
    assert_eq!(too_many, "not_eligible");

    // A student joining in week three of the shared timeline has two fewer weeks.
    let choi = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "registrations.create",
        json!({ "studentName": "Choi", "courseId": piano_id, "startDate": "2025-03-17", "weeks": 2 }),
    );
    let choi_id = str_at(&choi, "/registration/id").expect("choi id").to_string();
    let fits = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "extensions.plan",
        json!({ "registrationId": choi_id, "weeks": 8, "today": "2025-03-01" }),
    );
    assert_eq!(fits.get("elapsedWeeks"), Some(&json!(2)));
    assert_eq!(fits.get("studentMaxWeeks"), Some(&json!(10)));
    assert_eq!(fits.get("eligible"), Some(&json!(true)));
    let over = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "extensions.plan",
        json!({ "registrationId": choi_id, "weeks": 9, "today": "2025-03-01" }),
    );
    assert_eq!(over.get("eligible"), Some(&json!(false)));
    assert_eq!(reasons(&over), vec!["exceedsMaxWeeks".to_string()]);
}

#[test]
fn installment_flag_and_setup_defaults_shape_eligibility() {
    let (_child, mut stdin, mut reader) = open_workspace("academyd-extensions-setup");

    let drums = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.upsert",
        json!({ "label": "Drums", "days": [2, 4] }),
    );
    let drums_id = str_at(&drums, "/course/id").expect("drums id").to_string();
    let reg = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "registrations.create",
        json!({ "studentName": "Yoon", "courseId": drums_id, "startDate": "2025-03-04", "weeks": 2 }),
    );
    let reg_id = str_at(&reg, "/registration/id").expect("reg id").to_string();

    let blocked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "extensions.plan",
        json!({ "registrationId": reg_id }),
    );
    assert_eq!(blocked.get("eligible"), Some(&json!(false)));
    assert!(reasons(&blocked).contains(&"courseNotInstallmentEligible".to_string()));
    assert_eq!(blocked.get("weeks"), Some(&json!(4)));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({
            "section": "extensions",
            "patch": { "requireInstallmentEligible": false, "defaultExtensionWeeks": 6 }
        }),
    );
    let open = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "extensions.plan",
        json!({ "registrationId": reg_id }),
    );
    assert_eq!(open.get("eligible"), Some(&json!(true)));
    assert_eq!(open.get("weeks"), Some(&json!(6)));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "registrations.withdraw",
        json!({ "registrationId": reg_id, "withdrawnAt": "2025-03-06" }),
    );
    let closed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "extensions.plan",
        json!({ "registrationId": reg_id }),
    );
    assert!(reasons(&closed).contains(&"withdrawn".to_string()));
}
