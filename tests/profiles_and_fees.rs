mod test_support;

use serde_json::json;
use test_support::{fixture, USER_PASSWORD};

#[test]
fn admin_completes_and_updates_a_student_profile() {
    let mut fx = fixture("toppersd-profiles-student");
    let batch = fx.batch_a.clone();
    let subject = fx.subject_id.clone();
    let student = fx.sc.add_user("student", "maya", None);

    fx.sc.expect_code(
        "students.update",
        json!({ "userId": student, "patch": { "totalFees": 1000 } }),
        "profile_incomplete",
    );

    let res = fx.sc.request_ok(
        "students.completeProfile",
        json!({
            "userId": student,
            "profile": {
                "enrollmentNumber": "ENR-100",
                "guardianName": "Ravi",
                "guardianPhone": "9000000000",
                "batchId": batch,
                "subjectIds": [subject],
                "totalFees": 40000,
                "feesPaid": 10000
            }
        }),
    );
    assert_eq!(res["profile"]["fees"]["remaining"], 30000.0);
    assert_eq!(res["profile"]["batchName"], "JEE Morning");

    fx.sc.expect_code(
        "students.completeProfile",
        json!({ "userId": student, "profile": { "enrollmentNumber": "ENR-101" } }),
        "conflict",
    );

    // A bad amount rejects the whole patch.
    fx.sc.expect_code(
        "students.update",
        json!({ "userId": student, "patch": { "firstName": "Changed", "feesPaid": -5 } }),
        "bad_params",
    );
    let listed = fx.sc.request_ok("students.list", json!({ "search": "ENR-100" }));
    let rows = listed["students"].as_array().expect("students");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user"]["firstName"], "maya");

    let res = fx.sc.request_ok(
        "students.update",
        json!({ "userId": student, "patch": { "feesPaid": 40000 } }),
    );
    assert_eq!(res["profile"]["fees"]["remaining"], 0.0);

    let notes = fx.sc.request_ok("notifications.list", json!({}));
    assert!(notes["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .any(|n| n["kind"] == "fees"));

    fx.sc.login("maya", USER_PASSWORD, "student");
    let fees = fx.sc.request_ok("students.fees", json!({}));
    assert_eq!(fees["fees"]["due"], 40000.0);
    assert_eq!(fees["fees"]["paid"], 40000.0);
}

#[test]
fn enrollment_numbers_are_unique() {
    let mut fx = fixture("toppersd-profiles-enrollment");
    let batch = fx.batch_a.clone();
    fx.add_student("one", "ENR-7", &batch);
    let err = fx.sc.request_err(
        "students.add",
        json!({
            "username": "two",
            "password": USER_PASSWORD,
            "email": "two@toppers.test",
            "firstName": "Two",
            "profile": {
                "enrollmentNumber": "ENR-7",
                "guardianName": "Parent",
                "guardianPhone": "9222222222"
            }
        }),
    );
    assert_eq!(err["code"], "conflict");
    assert_eq!(err["message"], "Enrollment number already exists.");

    // Nothing from the failed add was kept.
    fx.sc.request_ok(
        "students.add",
        json!({
            "username": "two",
            "password": USER_PASSWORD,
            "email": "two@toppers.test",
            "firstName": "Two"
        }),
    );
}

#[test]
fn student_submissions_wait_for_review() {
    let mut fx = fixture("toppersd-profiles-submit");
    let batch = fx.batch_a.clone();
    let student = fx.add_student("lee", "ENR-30", &batch);

    fx.sc.login("lee", USER_PASSWORD, "student");
    fx.sc.expect_code(
        "students.profile.submit",
        json!({ "profile": { "totalFees": 0 } }),
        "forbidden",
    );
    let res = fx.sc.request_ok(
        "students.profile.submit",
        json!({ "profile": { "guardianPhone": "8111111111", "phone": "7000000000" } }),
    );
    assert_eq!(res["profile"]["profileUpdateStatus"], "pending");
    assert_eq!(res["profile"]["guardianPhone"], "8111111111");
    assert_eq!(res["profile"]["fees"]["due"], 50000.0);

    fx.sc.login_admin();
    let pending = fx.sc.request_ok("profileUpdates.listPending", json!({}));
    let students = pending["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["user"]["phone"], "7000000000");

    let dash = fx.sc.request_ok("admin.dashboard", json!({}));
    assert_eq!(dash["pendingProfileUpdates"], 1);

    let res = fx.sc.request_ok(
        "profileUpdates.approve",
        json!({ "kind": "student", "userId": student }),
    );
    assert_eq!(res["profileUpdateStatus"], "approved");
    let pending = fx.sc.request_ok("profileUpdates.listPending", json!({}));
    assert_eq!(pending["students"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn teacher_salary_and_profile() {
    let mut fx = fixture("toppersd-profiles-teacher");
    let teacher = fx.teacher_id.clone();

    fx.sc.expect_code(
        "teachers.update",
        json!({ "userId": teacher, "patch": { "experienceYears": 120 } }),
        "bad_params",
    );
    let res = fx.sc.request_ok(
        "teachers.update",
        json!({ "userId": teacher, "patch": { "salary": 60000, "salaryPaid": 45000 } }),
    );
    assert_eq!(res["profile"]["salary"]["remaining"], 15000.0);
    assert_eq!(res["profile"]["subjectsTaught"][0]["name"], "Physics");

    fx.sc.login("tina", USER_PASSWORD, "teacher");
    let salary = fx.sc.request_ok("teachers.salary", json!({}));
    assert_eq!(salary["salary"]["paid"], 45000.0);

    fx.sc.expect_code(
        "teachers.profile.submit",
        json!({ "profile": { "salaryPaid": 60000 } }),
        "forbidden",
    );
    let res = fx.sc.request_ok(
        "teachers.profile.submit",
        json!({ "profile": { "qualifications": "PhD Physics" } }),
    );
    assert_eq!(res["profile"]["profileUpdateStatus"], "pending");

    let dash = fx.sc.request_ok("teachers.dashboard", json!({}));
    assert_eq!(dash["totalLectures"], 0);
    assert_eq!(dash["profile"]["qualifications"], "PhD Physics");
}

#[test]
fn deleting_a_teacher_removes_their_lectures() {
    let mut fx = fixture("toppersd-profiles-delete");
    let batch = fx.batch_a.clone();
    let teacher = fx.teacher_id.clone();
    fx.create_lecture(&batch, "Monday", "09:00", "10:00");
    let student = fx.add_student("kim", "ENR-40", &batch);

    fx.sc.request_ok("teachers.delete", json!({ "userId": teacher }));
    let listed = fx.sc.request_ok("lectures.list", json!({}));
    assert_eq!(listed["lectures"].as_array().map(|a| a.len()), Some(0));
    fx.sc
        .expect_code("teachers.delete", json!({ "userId": teacher }), "not_found");

    fx.sc.request_ok("students.delete", json!({ "userId": student }));
    let listed = fx.sc.request_ok("students.list", json!({}));
    assert_eq!(listed["students"].as_array().map(|a| a.len()), Some(0));
}
