#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_PASSWORD: &str = "admin-pass-1";
pub const USER_PASSWORD: &str = "secret-pass-1";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: u64,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_toppersd");
    let mut child = Command::new(exe)
        .env_remove("TOPPERSD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn toppersd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        seq: 0,
    }
}

impl Sidecar {
    /// Writes one raw line and reads one response line.
    pub fn raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.seq += 1;
        let id = self.seq.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp["result"].clone()
    }

    /// Expects a failure and returns the `error` object.
    pub fn request_err(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp["error"].clone()
    }

    pub fn expect_code(&mut self, method: &str, params: Value, code: &str) -> Value {
        let error = self.request_err(method, params);
        assert_eq!(error["code"], code, "{}: {}", method, error);
        error
    }

    pub fn open_workspace(&mut self, prefix: &str) -> PathBuf {
        let ws = temp_dir(prefix);
        self.request_ok("workspace.select", json!({ "path": ws.to_string_lossy() }));
        ws
    }

    pub fn login(&mut self, username: &str, password: &str, role: &str) -> Value {
        self.request_ok(
            "auth.login",
            json!({ "username": username, "password": password, "role": role }),
        )
    }

    pub fn bootstrap_admin(&mut self) -> String {
        let res = self.request_ok(
            "auth.bootstrapAdmin",
            json!({
                "username": "admin",
                "password": ADMIN_PASSWORD,
                "email": "admin@toppers.test",
                "firstName": "Site",
                "lastName": "Admin"
            }),
        );
        res["userId"].as_str().expect("admin id").to_string()
    }

    pub fn login_admin(&mut self) {
        self.login("admin", ADMIN_PASSWORD, "admin");
    }

    pub fn create_named(&mut self, method: &str, name: &str) -> String {
        let res = self.request_ok(method, json!({ "name": name }));
        res["id"].as_str().expect("id").to_string()
    }

    /// Admin-side account creation; the account is approved immediately.
    pub fn add_user(&mut self, role: &str, username: &str, profile: Option<Value>) -> String {
        let method = match role {
            "student" => "students.add",
            "teacher" => "teachers.add",
            other => panic!("unsupported role {}", other),
        };
        let mut params = json!({
            "username": username,
            "password": USER_PASSWORD,
            "email": format!("{}@toppers.test", username),
            "firstName": username,
            "lastName": "Test",
            "dateOfBirth": "1990-05-20"
        });
        if let Some(p) = profile {
            params["profile"] = p;
        }
        let res = self.request_ok(method, params);
        res["userId"].as_str().expect("user id").to_string()
    }
}

/// Workspace with an admin logged in, one subject, two batches and one teacher.
pub struct Fixture {
    pub sc: Sidecar,
    pub workspace: PathBuf,
    pub admin_id: String,
    pub subject_id: String,
    pub batch_a: String,
    pub batch_b: String,
    pub teacher_id: String,
}

pub fn fixture(prefix: &str) -> Fixture {
    let mut sc = spawn_sidecar();
    let workspace = sc.open_workspace(prefix);
    let admin_id = sc.bootstrap_admin();
    sc.login_admin();
    let subject_id = sc.create_named("subjects.create", "Physics");
    let batch_a = sc.create_named("batches.create", "JEE Morning");
    let batch_b = sc.create_named("batches.create", "NEET Evening");
    let teacher_id = sc.add_user(
        "teacher",
        "tina",
        Some(json!({
            "employeeId": "EMP-001",
            "qualifications": "M.Sc Physics",
            "experienceYears": 6,
            "subjectIds": [subject_id]
        })),
    );
    Fixture {
        sc,
        workspace,
        admin_id,
        subject_id,
        batch_a,
        batch_b,
        teacher_id,
    }
}

impl Fixture {
    pub fn lecture_input(&self, batch: &str, day: &str, start: &str, end: &str) -> Value {
        json!({
            "teacherId": self.teacher_id,
            "subjectId": self.subject_id,
            "batchId": batch,
            "day": day,
            "startTime": start,
            "endTime": end
        })
    }

    pub fn create_lecture(&mut self, batch: &str, day: &str, start: &str, end: &str) -> String {
        let input = self.lecture_input(batch, day, start, end);
        let res = self.sc.request_ok("lectures.create", json!({ "input": input }));
        res["lectureId"].as_str().expect("lecture id").to_string()
    }

    pub fn add_student(&mut self, username: &str, enrollment: &str, batch: &str) -> String {
        let subject = self.subject_id.clone();
        self.sc.add_user(
            "student",
            username,
            Some(json!({
                "enrollmentNumber": enrollment,
                "guardianName": "Guardian",
                "guardianPhone": "9999999999",
                "batchId": batch,
                "subjectIds": [subject],
                "totalFees": 50000,
                "feesPaid": 20000
            })),
        )
    }
}
