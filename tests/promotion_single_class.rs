use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const ADMIN_PASSWORD: &str = "promote-me-2025";

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = request_ok(
        stdin,
        reader,
        "admin",
        "admins.create",
        json!({
            "name": "Head Admin",
            "email": "head@school.test",
            "password": ADMIN_PASSWORD
        }),
    );
    admin
        .get("adminId")
        .and_then(|v| v.as_str())
        .expect("adminId")
        .to_string()
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    grade: &str,
) -> i64 {
    let result = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({ "name": name, "grade": grade }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_i64())
        .expect("studentId")
}

fn grades_of(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    grade: &str,
) -> Vec<i64> {
    let result = request_ok(
        stdin,
        reader,
        id,
        "students.list",
        json!({ "grade": grade }),
    );
    result
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .map(|s| s.get("id").and_then(|v| v.as_i64()).expect("id"))
        .collect()
}

#[test]
fn promoting_a_class_moves_every_student_one_grade_up() {
    let workspace = temp_dir("schoold-promote-single");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin_id = setup(&mut stdin, &mut reader, &workspace);

    let mut cohort = Vec::new();
    for i in 0..5 {
        cohort.push(create_student(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            &format!("Third Grader {}", i),
            "3",
        ));
    }
    // A bystander in another grade must not move.
    let bystander = create_student(&mut stdin, &mut reader, "sb", "Bystander", "5");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "promotion.promoteClass",
        json!({ "grade": "3", "adminId": admin_id, "password": ADMIN_PASSWORD }),
    );
    assert_eq!(result.get("promotedCount").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(result.get("nextGrade").and_then(|v| v.as_str()), Some("4"));
    assert!(result.get("archiveFile").is_none());

    let mut now_in_four = grades_of(&mut stdin, &mut reader, "l1", "4");
    now_in_four.sort();
    let mut expected = cohort.clone();
    expected.sort();
    assert_eq!(now_in_four, expected);
    assert!(grades_of(&mut stdin, &mut reader, "l2", "3").is_empty());
    assert_eq!(grades_of(&mut stdin, &mut reader, "l3", "5"), vec![bystander]);

    // No archive is written for a non-terminal promotion.
    assert!(!workspace.join("graduated").exists());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn promoting_an_empty_grade_reports_zero() {
    let workspace = temp_dir("schoold-promote-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin_id = setup(&mut stdin, &mut reader, &workspace);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "promotion.promoteClass",
        json!({ "grade": "4", "adminId": admin_id, "password": ADMIN_PASSWORD }),
    );
    assert_eq!(result.get("promotedCount").and_then(|v| v.as_u64()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_grade_is_rejected_before_any_mutation() {
    let workspace = temp_dir("schoold-promote-unknown");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin_id = setup(&mut stdin, &mut reader, &workspace);
    let student = create_student(&mut stdin, &mut reader, "s1", "Settled", "2");

    for (i, bad) in ["7", "Two", "Kindergarten", ""].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad{}", i),
            "promotion.promoteClass",
            json!({ "grade": bad, "adminId": admin_id, "password": ADMIN_PASSWORD }),
        );
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(
            resp.get("error")
                .and_then(|e| e.get("code"))
                .and_then(|v| v.as_str()),
            Some("bad_params"),
            "grade {:?}",
            bad
        );
    }

    assert_eq!(grades_of(&mut stdin, &mut reader, "l1", "2"), vec![student]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_summary_and_preview_reflect_the_ladder() {
    let workspace = temp_dir("schoold-promote-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _admin_id = setup(&mut stdin, &mut reader, &workspace);
    let _ = create_student(&mut stdin, &mut reader, "s1", "Junior", "Nursery");
    let _ = create_student(&mut stdin, &mut reader, "s2", "Senior", "6");

    let summary = request_ok(&mut stdin, &mut reader, "c1", "promotion.classSummary", json!({}));
    let classes = summary
        .get("classes")
        .and_then(|v| v.as_array())
        .expect("classes");
    assert_eq!(classes.len(), 9);

    let by_grade = |g: &str| -> &Value {
        classes
            .iter()
            .find(|c| c.get("grade").and_then(|v| v.as_str()) == Some(g))
            .unwrap_or_else(|| panic!("grade {} missing from summary", g))
    };
    assert_eq!(
        by_grade("Nursery").get("nextGrade").and_then(|v| v.as_str()),
        Some("L.K.G.")
    );
    assert_eq!(
        by_grade("Nursery").get("studentCount").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        by_grade("Nursery").get("canPromote").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        by_grade("6").get("nextGrade").and_then(|v| v.as_str()),
        Some("Graduated")
    );
    assert_eq!(
        by_grade("5").get("canPromote").and_then(|v| v.as_bool()),
        Some(false)
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "promotion.preview",
        json!({ "grade": "6" }),
    );
    assert_eq!(preview.get("nextGrade").and_then(|v| v.as_str()), Some("Graduated"));
    assert_eq!(preview.get("totalStudents").and_then(|v| v.as_u64()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
