use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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

fn worksheet_xml(path: &Path) -> String {
    let f = File::open(path).expect("open xlsx");
    let mut archive = zip::ZipArchive::new(f).expect("read xlsx package");
    let mut xml = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .expect("worksheet entry")
        .read_to_string(&mut xml)
        .expect("read worksheet xml");
    xml
}

fn data_row_count(path: &Path) -> usize {
    worksheet_xml(path).matches("<row ").count() - 1
}

#[test]
fn roster_export_covers_one_grade_or_the_whole_school() {
    let workspace = temp_dir("schoold-roster");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({
            "name": "Mina Gurung",
            "grade": "2",
            "fatherPhone": "9811111111",
            "address": "Lalitpur",
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "students.create",
        json!({ "name": "Hari Shrestha", "grade": "2" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s3",
        "students.create",
        json!({ "name": "Sita Lama", "grade": "5" }),
    );

    let grade_out = workspace.join("class-2.xlsx");
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "roster.export",
        json!({ "grade": "2", "outPath": grade_out.to_string_lossy() }),
    );
    assert_eq!(result.get("studentCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(data_row_count(&grade_out), 2);
    let xml = worksheet_xml(&grade_out);
    assert!(xml.contains("Mina Gurung"));
    assert!(xml.contains("9811111111"));
    assert!(!xml.contains("Sita Lama"));

    let all_out = workspace.join("whole-school.xlsx");
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "e2",
        "roster.export",
        json!({ "grade": "all", "outPath": all_out.to_string_lossy() }),
    );
    assert_eq!(result.get("studentCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(data_row_count(&all_out), 3);
    assert!(worksheet_xml(&all_out).contains("Sita Lama"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_roster_still_exports_a_placeholder_document() {
    let workspace = temp_dir("schoold-roster-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let out = workspace.join("empty-class.xlsx");
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "roster.export",
        json!({ "grade": "6", "outPath": out.to_string_lossy() }),
    );
    assert_eq!(result.get("studentCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(result.get("rowCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(data_row_count(&out), 1);
    assert!(worksheet_xml(&out).contains("No students enrolled"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn roster_export_rejects_unknown_grades() {
    let workspace = temp_dir("schoold-roster-unknown");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let out = workspace.join("never-written.xlsx");
    let resp = request(
        &mut stdin,
        &mut reader,
        "e1",
        "roster.export",
        json!({ "grade": "13", "outPath": out.to_string_lossy() }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert!(!out.exists());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn roster_export_rejects_a_numeric_grade_instead_of_widening_to_all() {
    let workspace = temp_dir("schoold-roster-numeric");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "name": "Scoped Pupil", "grade": "3" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "students.create",
        json!({ "name": "Other Pupil", "grade": "5" }),
    );

    let out = workspace.join("never-written.xlsx");
    let resp = request(
        &mut stdin,
        &mut reader,
        "e1",
        "roster.export",
        json!({ "grade": 3, "outPath": out.to_string_lossy() }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );
    assert!(!out.exists());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
