mod test_support;

use serde_json::json;
use test_support::{fixture, USER_PASSWORD};

#[test]
fn teacher_marks_attendance_for_their_batch() {
    let mut fx = fixture("toppersd-attendance-mark");
    let batch = fx.batch_a.clone();
    let other_batch = fx.batch_b.clone();
    let lecture = fx.create_lecture(&batch, "Monday", "09:00", "10:00");
    let ana = fx.add_student("ana", "ENR-10", &batch);
    let ben = fx.add_student("ben", "ENR-11", &batch);
    fx.add_student("cy", "ENR-12", &other_batch);

    fx.sc.login("tina", USER_PASSWORD, "teacher");
    let mine = fx.sc.request_ok("teachers.lectures", json!({}));
    assert_eq!(mine["lectures"].as_array().map(|a| a.len()), Some(1));

    let sheet = fx
        .sc
        .request_ok("attendance.sheet", json!({ "lectureId": lecture }));
    let students = sheet["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);
    assert!(students.iter().all(|s| s["status"] == "absent"));

    fx.sc.expect_code(
        "attendance.mark",
        json!({ "lectureId": lecture, "marks": { ana.clone(): "late" } }),
        "bad_params",
    );

    // Unlisted students are recorded absent.
    let res = fx.sc.request_ok(
        "attendance.mark",
        json!({ "lectureId": lecture, "marks": { ana.clone(): "present" } }),
    );
    assert_eq!(res["summary"]["present"], 1);
    assert_eq!(res["summary"]["absent"], 1);
    assert_eq!(res["summary"]["total"], 2);

    // Re-marking replaces the previous record.
    let res = fx.sc.request_ok(
        "attendance.mark",
        json!({ "lectureId": lecture, "marks": { ana.clone(): "present", ben.clone(): "present" } }),
    );
    assert_eq!(res["summary"]["present"], 2);

    fx.sc.login_admin();
    let all = fx.sc.request_ok("attendance.list", json!({}));
    assert_eq!(all["records"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(all["summary"]["percentage"], 100.0);

    let notes = fx.sc.request_ok("notifications.list", json!({}));
    let attendance_notes = notes["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .filter(|n| n["kind"] == "attendance")
        .count();
    assert_eq!(attendance_notes, 2);
}

#[test]
fn only_the_assigned_teacher_can_mark() {
    let mut fx = fixture("toppersd-attendance-owner");
    let batch = fx.batch_a.clone();
    let lecture = fx.create_lecture(&batch, "Tuesday", "09:00", "10:00");
    fx.sc.add_user("teacher", "omar", None);

    fx.sc.login("omar", USER_PASSWORD, "teacher");
    fx.sc
        .expect_code("attendance.sheet", json!({ "lectureId": lecture }), "forbidden");
    fx.sc.expect_code(
        "attendance.mark",
        json!({ "lectureId": lecture, "marks": {} }),
        "forbidden",
    );
    fx.sc
        .expect_code("attendance.sheet", json!({ "lectureId": "missing" }), "not_found");
}

#[test]
fn students_see_their_own_attendance_summary() {
    let mut fx = fixture("toppersd-attendance-student");
    let batch = fx.batch_a.clone();
    let first = fx.create_lecture(&batch, "Monday", "09:00", "10:00");
    let second = fx.create_lecture(&batch, "Tuesday", "09:00", "10:00");
    let third = fx.create_lecture(&batch, "Wednesday", "09:00", "10:00");
    let ana = fx.add_student("ana", "ENR-20", &batch);

    fx.sc.login("tina", USER_PASSWORD, "teacher");
    for (lecture, status) in [(&first, "present"), (&second, "absent"), (&third, "present")] {
        fx.sc.request_ok(
            "attendance.mark",
            json!({ "lectureId": lecture, "marks": { ana.clone(): status } }),
        );
    }

    fx.sc.login("ana", USER_PASSWORD, "student");
    let mine = fx.sc.request_ok("students.attendance", json!({}));
    assert_eq!(mine["records"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(mine["summary"]["present"], 2);
    assert_eq!(mine["summary"]["total"], 3);
    let pct = mine["summary"]["percentage"].as_f64().expect("percentage");
    assert!((pct - 66.67).abs() < 0.01, "{}", pct);

    let lectures = fx.sc.request_ok("students.lectures", json!({}));
    let days: Vec<&str> = lectures["lectures"]
        .as_array()
        .expect("lectures")
        .iter()
        .filter_map(|l| l["day"].as_str())
        .collect();
    assert_eq!(days, vec!["Monday", "Tuesday", "Wednesday"]);

    let dash = fx.sc.request_ok("students.dashboard", json!({}));
    assert_eq!(dash["attendance"]["present"], 2);
    assert_eq!(dash["lectures"].as_array().map(|a| a.len()), Some(3));
}
