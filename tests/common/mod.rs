#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Date the sidecar clock is pinned to: odd semester of 2025/2026.
pub const TODAY: &str = "2025-09-01";

pub struct Sidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub workspace: TempDir,
}

impl Sidecar {
    pub fn spawn_with(today: &str, extra_args: &[&str]) -> Sidecar {
        let exe = env!("CARGO_BIN_EXE_absensid");
        let mut child = Command::new(exe)
            .args(extra_args)
            .env("ABSENSID_TODAY", today)
            .env_remove("ABSENSID_WORKSPACE")
            .env_remove("ABSENSID_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn absensid");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let workspace = tempfile::tempdir().expect("temp workspace");
        Sidecar {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            next_id: 0,
            workspace,
        }
    }

    /// Spawns with the pinned clock and selects a fresh workspace.
    pub fn start() -> Sidecar {
        let mut sc = Sidecar::spawn_with(TODAY, &[]);
        let path = sc.workspace.path().to_string_lossy().to_string();
        sc.ok(None, "workspace.select", json!({ "path": path }));
        sc
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{}", line).expect("write request");
        stdin.flush().expect("flush request");

        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, actor: Option<&Value>, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(a) = actor {
            payload["actor"] = a.clone();
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, actor: Option<&Value>, method: &str, params: Value) -> Value {
        let value = self.call(actor, method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Asserts the call failed and returns its error code.
    pub fn err_code(&mut self, actor: Option<&Value>, method: &str, params: Value) -> String {
        let value = self.call(actor, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"].as_str().expect("error code").to_string()
    }

    /// Polls the actor's inbox until `pred` holds or a few seconds pass.
    pub fn wait_for_inbox(&mut self, actor: &Value, pred: impl Fn(&Value) -> bool) -> Value {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let page = self.ok(Some(actor), "notifications.list", json!({ "perPage": 200 }));
            if pred(&page) || Instant::now() > deadline {
                return page;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
    }
}

pub fn actor(role: &str, id: &str) -> Value {
    json!({ "role": role, "id": id })
}

pub fn str_at<'a>(v: &'a Value, key: &str) -> &'a str {
    v[key].as_str().unwrap_or_else(|| panic!("missing {key} in {v}"))
}

pub fn event_types(page: &Value) -> Vec<String> {
    page["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|n| n["eventType"].as_str().expect("eventType").to_string())
        .collect()
}

/// Two teachers, one homeroom teacher, two subjects, two classes and one
/// enrolled student per class.
pub struct School {
    pub admin: Value,
    pub admin_id: String,
    pub t1: String,
    pub t2: String,
    pub h: String,
    pub math: String,
    pub bio: String,
    pub c7a: String,
    pub c7b: String,
    pub s1: String,
    pub s2: String,
}

impl School {
    pub fn seed(sc: &mut Sidecar) -> School {
        let boot = actor("admin", "bootstrap");
        let admin = sc.ok(
            Some(&boot),
            "admins.create",
            json!({ "name": "Admin", "email": "admin@school.test" }),
        );
        let admin_id = str_at(&admin["admin"], "id").to_string();
        let admin = actor("admin", &admin_id);

        let teacher = |sc: &mut Sidecar, name: &str| {
            let r = sc.ok(
                Some(&admin),
                "teachers.create",
                json!({ "name": name, "email": format!("{name}@school.test") }),
            );
            str_at(&r["teacher"], "id").to_string()
        };
        let t1 = teacher(sc, "t1");
        let t2 = teacher(sc, "t2");
        let h = teacher(sc, "h");

        let math = sc.ok(Some(&admin), "subjects.create", json!({ "name": "Math", "code": "MAT" }));
        let bio = sc.ok(Some(&admin), "subjects.create", json!({ "name": "Biology", "code": "BIO" }));
        let c7a = sc.ok(Some(&admin), "classes.create", json!({ "name": "7A" }));
        let c7b = sc.ok(Some(&admin), "classes.create", json!({ "name": "7B" }));
        let s1 = sc.ok(Some(&admin), "students.create", json!({ "name": "S1", "nisn": "0001" }));
        let s2 = sc.ok(Some(&admin), "students.create", json!({ "name": "S2", "nisn": "0002" }));

        let school = School {
            admin_id,
            t1,
            t2,
            h,
            math: str_at(&math["subject"], "id").to_string(),
            bio: str_at(&bio["subject"], "id").to_string(),
            c7a: str_at(&c7a["class"], "id").to_string(),
            c7b: str_at(&c7b["class"], "id").to_string(),
            s1: str_at(&s1["student"], "id").to_string(),
            s2: str_at(&s2["student"], "id").to_string(),
            admin,
        };
        sc.ok(
            Some(&school.admin),
            "roster.enroll",
            json!({ "studentId": school.s1, "classId": school.c7a }),
        );
        sc.ok(
            Some(&school.admin),
            "roster.enroll",
            json!({ "studentId": school.s2, "classId": school.c7b }),
        );
        school
    }

    pub fn guru(&self, id: &str) -> Value {
        actor("guru", id)
    }

    pub fn homeroom(&self) -> Value {
        actor("homeroom_teacher", &self.h)
    }

    pub fn assign(&self, sc: &mut Sidecar, teacher: &str, subject: &str, class: &str) -> String {
        let r = sc.ok(
            Some(&self.admin),
            "assignments.assign",
            json!({ "teacherId": teacher, "subjectId": subject, "classId": class }),
        );
        str_at(&r["assignment"], "id").to_string()
    }
}
