use super::students::{db_conn, required_grade, students_in_grade, StudentRow};
use crate::grades;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sheet::Workbook;
use serde_json::{json, Value};
use std::path::Path;

/// Fixed column order of the roster export sheet.
const ROSTER_COLUMNS: [&str; 10] = [
    "S.No",
    "Name",
    "Class",
    "Father Name",
    "Father Phone",
    "Mother Name",
    "Mother Phone",
    "Address",
    "Email",
    "Student ID",
];

fn roster_row(serial: usize, s: &StudentRow) -> Vec<String> {
    vec![
        serial.to_string(),
        s.name.clone(),
        format!("{} {}", s.grade, s.section),
        s.father_name.clone().unwrap_or_default(),
        s.father_phone.clone().unwrap_or_default(),
        s.mother_name.clone().unwrap_or_default(),
        s.mother_phone.clone().unwrap_or_default(),
        s.address.clone().unwrap_or_default(),
        s.email.clone().unwrap_or_default(),
        s.id.to_string(),
    ]
}

/// An empty roster still produces a document; callers use these exports as
/// pre-promotion audit snapshots and expect a file either way.
fn placeholder_row(scope: &str) -> Vec<String> {
    let mut row = vec![String::new(); ROSTER_COLUMNS.len()];
    row[1] = format!("No students enrolled ({})", scope);
    row
}

fn handle_roster_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let out_path = req
            .params
            .get("outPath")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing outPath"))?
            .to_string();

        // An omitted grade means the whole school; a grade that is present
        // but malformed is an error, never a silent widening of the scope.
        let (scope_label, cohorts): (String, Vec<&'static str>) = match req.params.get("grade") {
            None | Some(Value::Null) => {
                ("All Classes".to_string(), grades::GRADE_SEQUENCE.to_vec())
            }
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("all") => {
                ("All Classes".to_string(), grades::GRADE_SEQUENCE.to_vec())
            }
            Some(_) => {
                let grade = required_grade(&req.params, "grade")?;
                (format!("Class {}", grade), vec![grade])
            }
        };

        let mut workbook = Workbook::new(&scope_label, &ROSTER_COLUMNS);
        let mut serial = 0usize;
        for grade in &cohorts {
            for s in students_in_grade(conn, grade)? {
                serial += 1;
                workbook.push_row(roster_row(serial, &s));
            }
        }
        if workbook.row_count() == 0 {
            workbook.push_row(placeholder_row(&scope_label));
        }
        let row_count = workbook.row_count();

        let bytes = workbook
            .to_bytes()
            .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;
        let out = Path::new(&out_path);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
        }
        std::fs::write(out, &bytes).map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;

        Ok(json!({
            "outPath": out_path,
            "scope": scope_label,
            "studentCount": serial,
            "rowCount": row_count,
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.export" => Some(handle_roster_export(state, req)),
        _ => None,
    }
}
