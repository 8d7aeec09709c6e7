mod test_support;

use serde_json::json;
use test_support::{fixture, spawn_sidecar};

#[test]
fn lecture_time_range_must_be_forward() {
    let mut fx = fixture("toppersd-lectures-range");
    let batch = fx.batch_a.clone();

    let input = fx.lecture_input(&batch, "Monday", "10:00", "09:00");
    let err = fx
        .sc
        .expect_code("lectures.create", json!({ "input": input }), "invalid_time_range");
    assert_eq!(err["message"], "Start time must be before end time.");

    let input = fx.lecture_input(&batch, "Monday", "09:00", "09:00");
    fx.sc
        .expect_code("lectures.create", json!({ "input": input }), "invalid_time_range");

    let listed = fx
        .sc
        .request_ok("lectures.list", json!({ "batchId": batch }));
    assert_eq!(listed["lectures"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn adjacent_lectures_are_allowed_and_overlaps_rejected() {
    let mut fx = fixture("toppersd-lectures-overlap");
    let batch = fx.batch_a.clone();

    let first = fx.create_lecture(&batch, "Monday", "09:00", "10:00");
    // Touching end/start boundaries do not overlap.
    fx.create_lecture(&batch, "Monday", "10:00", "11:00");
    fx.create_lecture(&batch, "Monday", "08:00", "09:00");

    let input = fx.lecture_input(&batch, "Monday", "09:59", "10:30");
    let err = fx
        .sc
        .expect_code("lectures.create", json!({ "input": input }), "schedule_conflict");
    let ids = err["details"]["conflictingIds"]
        .as_array()
        .expect("conflictingIds");
    assert!(ids.iter().any(|v| v.as_str() == Some(first.as_str())));

    // Same slot, other weekday or other batch: fine.
    fx.create_lecture(&batch, "Tuesday", "09:00", "10:00");
    let other = fx.batch_b.clone();
    fx.create_lecture(&other, "Monday", "09:00", "10:00");

    let listed = fx
        .sc
        .request_ok("lectures.list", json!({ "batchId": batch, "day": "Monday" }));
    let starts: Vec<String> = listed["lectures"]
        .as_array()
        .expect("lectures")
        .iter()
        .map(|l| l["startTime"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(starts, vec!["08:00:00", "09:00:00", "10:00:00"]);
}

#[test]
fn enclosing_lecture_reports_every_conflict() {
    let mut fx = fixture("toppersd-lectures-enclose");
    let batch = fx.batch_a.clone();
    let a = fx.create_lecture(&batch, "Wednesday", "09:00", "10:00");
    let b = fx.create_lecture(&batch, "Wednesday", "10:30", "11:30");

    let input = fx.lecture_input(&batch, "Wednesday", "08:30", "12:00");
    let err = fx
        .sc
        .expect_code("lectures.create", json!({ "input": input }), "schedule_conflict");
    let mut ids: Vec<String> = err["details"]["conflictingIds"]
        .as_array()
        .expect("conflictingIds")
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    ids.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn resaving_a_lecture_does_not_conflict_with_itself() {
    let mut fx = fixture("toppersd-lectures-resave");
    let batch = fx.batch_a.clone();
    let id = fx.create_lecture(&batch, "Thursday", "14:00", "15:00");
    let neighbour = fx.create_lecture(&batch, "Thursday", "15:00", "16:00");

    let res = fx.sc.request_ok(
        "lectures.update",
        json!({ "lectureId": id, "patch": { "topic": "Kinematics" } }),
    );
    assert_eq!(res["lecture"]["topic"], "Kinematics");

    let res = fx.sc.request_ok(
        "lectures.update",
        json!({ "lectureId": id, "patch": { "startTime": "13:30", "endTime": "14:45" } }),
    );
    assert_eq!(res["lecture"]["startTime"], "13:30:00");

    let err = fx.sc.expect_code(
        "lectures.update",
        json!({ "lectureId": id, "patch": { "endTime": "15:15" } }),
        "schedule_conflict",
    );
    assert_eq!(err["details"]["conflictingIds"], json!([neighbour]));

    // Moving to another day leaves the old slot free.
    fx.sc.request_ok(
        "lectures.update",
        json!({ "lectureId": neighbour, "patch": { "day": "Friday" } }),
    );
    fx.sc.request_ok(
        "lectures.update",
        json!({ "lectureId": id, "patch": { "endTime": "15:15" } }),
    );
}

#[test]
fn class_date_sets_the_weekday() {
    let mut fx = fixture("toppersd-lectures-date");
    let batch = fx.batch_a.clone();

    // 2026-03-02 is a Monday.
    let mut input = fx.lecture_input(&batch, "Monday", "09:00", "10:00");
    input["classDate"] = json!("2026-03-02");
    let res = fx.sc.request_ok("lectures.create", json!({ "input": input }));
    assert_eq!(res["lecture"]["day"], "Monday");
    assert_eq!(res["lecture"]["classDate"], "2026-03-02");

    let mut input = fx.lecture_input(&batch, "Monday", "11:00", "12:00");
    input.as_object_mut().expect("input").remove("day");
    input["classDate"] = json!("2026-03-07");
    let res = fx.sc.request_ok("lectures.create", json!({ "input": input }));
    assert_eq!(res["lecture"]["day"], "Saturday");

    let mut input = fx.lecture_input(&batch, "Tuesday", "09:00", "10:00");
    input["classDate"] = json!("2026-03-02");
    fx.sc
        .expect_code("lectures.create", json!({ "input": input }), "validation_failed");

    let mut input = fx.lecture_input(&batch, "Monday", "09:00", "10:00");
    input.as_object_mut().expect("input").remove("day");
    input["classDate"] = json!("2026-03-08");
    let err = fx
        .sc
        .expect_code("lectures.create", json!({ "input": input }), "validation_failed");
    assert_eq!(err["message"], "Lectures cannot be scheduled on a Sunday.");

    let input = fx.lecture_input(&batch, "Sunday", "09:00", "10:00");
    fx.sc
        .expect_code("lectures.create", json!({ "input": input }), "bad_params");
}

#[test]
fn working_time_comes_from_timetable_setup() {
    let mut fx = fixture("toppersd-lectures-hours");
    let batch = fx.batch_a.clone();
    fx.sc.request_ok(
        "setup.update",
        json!({
            "section": "timetable",
            "patch": {
                "workingDays": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"],
                "dayStart": "08:00",
                "dayEnd": "18:00"
            }
        }),
    );

    let input = fx.lecture_input(&batch, "Saturday", "09:00", "10:00");
    let err = fx
        .sc
        .expect_code("lectures.create", json!({ "input": input }), "validation_failed");
    assert_eq!(err["message"], "Saturday is not a working day.");

    let input = fx.lecture_input(&batch, "Monday", "17:30", "18:30");
    fx.sc
        .expect_code("lectures.create", json!({ "input": input }), "validation_failed");

    fx.create_lecture(&batch, "Monday", "17:00", "18:00");
}

#[test]
fn fresh_workspace_allows_early_and_late_lectures() {
    let mut fx = fixture("toppersd-lectures-open-hours");
    let batch = fx.batch_a.clone();
    fx.create_lecture(&batch, "Monday", "21:00", "22:00");
    fx.create_lecture(&batch, "Monday", "06:00", "07:00");
    fx.create_lecture(&batch, "Tuesday", "00:00", "23:59");
}

#[test]
fn second_process_sees_lectures_written_by_the_first() {
    let mut fx = fixture("toppersd-lectures-two-procs");
    let batch = fx.batch_a.clone();
    let first = fx.create_lecture(&batch, "Wednesday", "09:00", "10:00");

    let mut other = spawn_sidecar();
    other.request_ok(
        "workspace.select",
        json!({ "path": fx.workspace.to_string_lossy() }),
    );
    other.login_admin();
    let input = fx.lecture_input(&batch, "Wednesday", "09:30", "10:30");
    let err = other.expect_code(
        "lectures.create",
        json!({ "input": input }),
        "schedule_conflict",
    );
    assert_eq!(err["details"]["conflictingIds"], json!([first]));

    let listed = other.request_ok("lectures.list", json!({ "batchId": batch }));
    assert_eq!(listed["lectures"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn check_reports_without_writing() {
    let mut fx = fixture("toppersd-lectures-check");
    let batch = fx.batch_a.clone();
    let id = fx.create_lecture(&batch, "Friday", "09:00", "10:00");

    let input = fx.lecture_input(&batch, "Friday", "09:30", "10:30");
    let res = fx.sc.request_ok("lectures.check", json!({ "input": input }));
    assert_eq!(res["valid"], false);
    assert_eq!(res["error"]["code"], "schedule_conflict");
    assert_eq!(res["error"]["details"]["conflictingIds"], json!([id]));

    let res = fx.sc.request_ok(
        "lectures.check",
        json!({ "lectureId": id, "input": { "startTime": "09:15" } }),
    );
    assert_eq!(res["valid"], true);

    let listed = fx.sc.request_ok("lectures.list", json!({ "batchId": batch }));
    assert_eq!(listed["lectures"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(listed["lectures"][0]["startTime"], "09:00:00");
}

#[test]
fn lecture_references_must_exist() {
    let mut fx = fixture("toppersd-lectures-refs");
    let batch = fx.batch_a.clone();

    let mut input = fx.lecture_input(&batch, "Monday", "09:00", "10:00");
    input["subjectId"] = json!("missing-subject");
    fx.sc
        .expect_code("lectures.create", json!({ "input": input }), "not_found");

    let mut input = fx.lecture_input(&batch, "Monday", "09:00", "10:00");
    input["teacherId"] = json!(fx.admin_id.clone());
    fx.sc
        .expect_code("lectures.create", json!({ "input": input }), "not_found");

    fx.sc.expect_code(
        "lectures.update",
        json!({ "lectureId": "nope", "patch": {} }),
        "not_found",
    );
}

#[test]
fn deleting_a_lecture_removes_its_attendance() {
    let mut fx = fixture("toppersd-lectures-delete");
    let batch = fx.batch_a.clone();
    let lecture = fx.create_lecture(&batch, "Monday", "09:00", "10:00");
    let student = fx.add_student("sam", "ENR-1", &batch);

    fx.sc.login("tina", test_support::USER_PASSWORD, "teacher");
    fx.sc.request_ok(
        "attendance.mark",
        json!({ "lectureId": lecture, "marks": { student.clone(): "present" } }),
    );
    fx.sc.expect_code("lectures.delete", json!({ "lectureId": lecture }), "forbidden");

    fx.sc.login_admin();
    let res = fx
        .sc
        .request_ok("lectures.delete", json!({ "lectureId": lecture }));
    assert_eq!(res["attendanceRemoved"], 1);

    let records = fx
        .sc
        .request_ok("attendance.list", json!({ "studentId": student }));
    assert_eq!(records["records"].as_array().map(|a| a.len()), Some(0));
    fx.sc
        .expect_code("lectures.open", json!({ "lectureId": lecture }), "not_found");
}
