mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, spawn_sidecar};

#[test]
fn setup_requires_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(code, "no_workspace");
}

#[test]
fn setup_sections_have_defaults_and_validate_patches() {
    let (_child, mut stdin, mut reader) = open_workspace("academyd-setup-defaults");

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(setup.pointer("/schedule/nextCourseScanDays"), Some(&json!(60)));
    assert_eq!(setup.pointer("/schedule/mergeWeekRangesEnabled"), Some(&json!(true)));
    assert_eq!(setup.pointer("/extensions/requireInstallmentEligible"), Some(&json!(true)));
    assert_eq!(setup.pointer("/extensions/defaultExtensionWeeks"), Some(&json!(4)));
    assert_eq!(setup.pointer("/extensions/maxExtensionWeeks"), Some(&json!(52)));

    let bad = [
        json!({ "section": "schedule", "patch": { "nextCourseScanDays": 5 } }),
        json!({ "section": "schedule", "patch": { "mergeWeekRangesEnabled": "no" } }),
        json!({ "section": "schedule", "patch": { "colour": "red" } }),
        json!({ "section": "extensions", "patch": { "defaultExtensionWeeks": 60 } }),
        json!({ "section": "extensions", "patch": { "maxExtensionWeeks": 3 } }),
        json!({ "section": "billing", "patch": {} }),
        json!({ "section": "schedule", "patch": 3 }),
    ];
    for (i, params) in bad.into_iter().enumerate() {
        let code = request_err(&mut stdin, &mut reader, &format!("b{}", i), "setup.update", params);
        assert_eq!(code, "bad_params");
    }

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "schedule", "patch": { "nextCourseScanDays": 90, "mergeWeekRangesEnabled": false } }),
    );
    assert_eq!(updated.pointer("/schedule/nextCourseScanDays"), Some(&json!(90)));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "extensions", "patch": { "defaultExtensionWeeks": 6, "maxExtensionWeeks": 8 } }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(setup.pointer("/schedule/nextCourseScanDays"), Some(&json!(90)));
    assert_eq!(setup.pointer("/schedule/mergeWeekRangesEnabled"), Some(&json!(false)));
    assert_eq!(setup.pointer("/extensions/defaultExtensionWeeks"), Some(&json!(6)));
    assert_eq!(setup.pointer("/extensions/maxExtensionWeeks"), Some(&json!(8)));
    // Rejected patches left nothing behind.
    assert_eq!(setup.pointer("/extensions/requireInstallmentEligible"), Some(&json!(true)));
}
