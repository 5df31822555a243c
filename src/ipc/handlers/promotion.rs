use super::students::{db_conn, required_grade, students_in_grade, StudentRow};
use crate::archive;
use crate::db;
use crate::grades::{self, Progression};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sheet::Workbook;
use chrono::{Datelike, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Fixed column order of the graduation archive sheet.
const ARCHIVE_COLUMNS: [&str; 11] = [
    "Name",
    "Class",
    "Father Name",
    "Father Phone",
    "Mother Name",
    "Mother Phone",
    "Address",
    "Email",
    "Student ID",
    "Academic Year",
    "Graduated At",
];

/// Re-verify the acting admin's password before anything destructive runs.
/// Rejection happens here, before any transaction opens.
fn verify_admin(conn: &Connection, params: &Value) -> Result<(), HandlerErr> {
    let admin_id = params
        .get("adminId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing adminId"))?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing password confirmation"))?;

    let stored: Option<String> = conn
        .query_row(
            "SELECT password_hash FROM admins WHERE id = ?",
            [admin_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let Some(stored) = stored else {
        return Err(HandlerErr::new("auth_failed", "admin not found"));
    };
    if !db::verify_password(password, &stored) {
        return Err(HandlerErr::new("auth_failed", "password mismatch"));
    }
    Ok(())
}

fn academic_year(params: &Value) -> Result<String, HandlerErr> {
    match params.get("academicYear") {
        None | Some(Value::Null) => Ok(Utc::now().year().to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(y) => Ok(y.to_string()),
            None => Err(HandlerErr::new(
                "bad_params",
                "academicYear must be an integer year",
            )),
        },
        Some(other) => Err(HandlerErr::new(
            "bad_params",
            format!(
                "academicYear must be a non-empty string or integer, got {}",
                other
            ),
        )),
    }
}

fn count_in_grade(conn: &Connection, grade: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM students WHERE grade = ?",
        [grade],
        |r| r.get(0),
    )
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// What one grade's promotion step did, for the response breakdown.
enum GradeOutcome {
    Promoted { to_grade: &'static str, count: usize },
    Graduated { count: usize, archive_file: Option<String> },
}

impl GradeOutcome {
    fn to_json(&self, grade: &str) -> Value {
        match self {
            GradeOutcome::Promoted { to_grade, count } => json!({
                "grade": grade,
                "action": "promoted",
                "toGrade": to_grade,
                "count": count,
            }),
            GradeOutcome::Graduated { count, archive_file } => json!({
                "grade": grade,
                "action": "graduated",
                "count": count,
                "archiveFile": archive_file,
            }),
        }
    }
}

/// Advance or graduate one grade inside the caller's open transaction.
/// Archive files written along the way are recorded in `written` so a later
/// rollback can remove them.
fn promote_grade(
    tx: &Connection,
    workspace: &Path,
    grade: &'static str,
    year: &str,
    written: &mut Vec<PathBuf>,
) -> Result<GradeOutcome, HandlerErr> {
    match grades::successor(grade)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown grade: {}", grade)))?
    {
        Progression::Advances(next) => {
            // One bulk update, not a per-student loop.
            let count = tx
                .execute(
                    "UPDATE students SET grade = ? WHERE grade = ?",
                    (next, grade),
                )
                .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            Ok(GradeOutcome::Promoted { to_grade: next, count })
        }
        Progression::Graduates => {
            let cohort = students_in_grade(tx, grade)?;
            if cohort.is_empty() {
                return Ok(GradeOutcome::Graduated {
                    count: 0,
                    archive_file: None,
                });
            }

            let graduated_at = Utc::now().to_rfc3339();
            let mut workbook = Workbook::new(&format!("Graduated {}", year), &ARCHIVE_COLUMNS);
            for s in &cohort {
                workbook.push_row(archive_row(s, year, &graduated_at));
            }

            // The durable copy must exist before the delete can commit.
            let path = archive::unique_archive_path(workspace, grade, year)
                .map_err(|e| HandlerErr::new("archive_write_failed", format!("{e:#}")))?;
            let bytes = workbook
                .to_bytes()
                .map_err(|e| HandlerErr::new("archive_write_failed", format!("{e:#}")))?;
            archive::write_archive(&path, &bytes)
                .map_err(|e| HandlerErr::new("archive_write_failed", format!("{e:#}")))?;
            written.push(path.clone());
            let file_name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            for s in &cohort {
                tx.execute(
                    "INSERT INTO graduation_events(
                        id, student_id, student_name, grade, academic_year,
                        archive_file, graduated_at
                     ) VALUES(?, ?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        s.id,
                        s.name,
                        grade,
                        year,
                        file_name,
                        graduated_at,
                    ],
                )
                .map_err(|e| {
                    HandlerErr::new("db_insert_failed", e.to_string())
                        .with_details(json!({ "table": "graduation_events" }))
                })?;
            }

            let deleted = tx
                .execute("DELETE FROM students WHERE grade = ?", [grade])
                .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
            if deleted != cohort.len() {
                // Cohort changed under us mid-transaction; refuse to commit.
                return Err(HandlerErr::new(
                    "db_delete_failed",
                    format!(
                        "graduation cohort drifted: read {}, deleted {}",
                        cohort.len(),
                        deleted
                    ),
                ));
            }

            Ok(GradeOutcome::Graduated {
                count: cohort.len(),
                archive_file: Some(file_name),
            })
        }
    }
}

fn archive_row(s: &StudentRow, year: &str, graduated_at: &str) -> Vec<String> {
    vec![
        s.name.clone(),
        s.grade.clone(),
        s.father_name.clone().unwrap_or_default(),
        s.father_phone.clone().unwrap_or_default(),
        s.mother_name.clone().unwrap_or_default(),
        s.mother_phone.clone().unwrap_or_default(),
        s.address.clone().unwrap_or_default(),
        s.email.clone().unwrap_or_default(),
        s.id.to_string(),
        year.to_string(),
        graduated_at.to_string(),
    ]
}

fn remove_written(written: &[PathBuf]) {
    for path in written {
        let _ = std::fs::remove_file(path);
    }
}

fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let mut classes = Vec::new();
        for grade in grades::GRADE_SEQUENCE {
            let count = count_in_grade(conn, grade)?;
            classes.push(json!({
                "grade": grade,
                "nextGrade": grades::successor_label(grade),
                "studentCount": count,
                "canPromote": count > 0,
            }));
        }
        Ok(json!({ "classes": classes }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let grade = required_grade(&req.params, "grade")?;
        let cohort = students_in_grade(conn, grade)?;
        let students: Vec<Value> = cohort
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "name": s.name,
                    "fatherName": s.father_name,
                    "fatherPhone": s.father_phone,
                    "motherName": s.mother_name,
                    "motherPhone": s.mother_phone,
                    "email": s.email,
                })
            })
            .collect();
        Ok(json!({
            "grade": grade,
            "nextGrade": grades::successor_label(grade),
            "totalStudents": cohort.len(),
            "students": students,
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_promote_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match state.workspace.clone() {
        Some(p) => p,
        None => return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id),
    };

    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        // Validate and authorize before any mutation.
        let grade = required_grade(&req.params, "grade")?;
        let year = academic_year(&req.params)?;
        verify_admin(conn, &req.params)?;

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

        let mut written = Vec::new();
        let outcome = match promote_grade(&tx, &workspace, grade, &year, &mut written) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                remove_written(&written);
                return Err(e);
            }
        };
        if let Err(e) = tx.commit() {
            remove_written(&written);
            return Err(HandlerErr::new("db_commit_failed", e.to_string()));
        }

        Ok(match outcome {
            GradeOutcome::Promoted { to_grade, count } => json!({
                "grade": grade,
                "promotedCount": count,
                "nextGrade": to_grade,
            }),
            GradeOutcome::Graduated { count, archive_file } => json!({
                "grade": grade,
                "graduatedCount": count,
                "archiveFile": archive_file,
            }),
        })
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_promote_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match state.workspace.clone() {
        Some(p) => p,
        None => return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id),
    };

    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let year = academic_year(&req.params)?;
        verify_admin(conn, &req.params)?;

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

        // Terminal grade first, then downwards, so a cohort moved into a
        // grade is not picked up again later in the same pass.
        let mut written = Vec::new();
        let mut breakdown = Vec::new();
        let mut total_promoted = 0usize;
        let mut total_graduated = 0usize;
        for grade in grades::promotion_order() {
            match promote_grade(&tx, &workspace, grade, &year, &mut written) {
                Ok(outcome) => {
                    match &outcome {
                        GradeOutcome::Promoted { count, .. } => total_promoted += count,
                        GradeOutcome::Graduated { count, .. } => total_graduated += count,
                    }
                    breakdown.push(outcome.to_json(grade));
                }
                Err(e) => {
                    let _ = tx.rollback();
                    remove_written(&written);
                    return Err(e);
                }
            }
        }
        if let Err(e) = tx.commit() {
            remove_written(&written);
            return Err(HandlerErr::new("db_commit_failed", e.to_string()));
        }

        Ok(json!({
            "totalPromoted": total_promoted,
            "totalGraduated": total_graduated,
            "classes": breakdown,
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotion.classSummary" => Some(handle_class_summary(state, req)),
        "promotion.preview" => Some(handle_preview(state, req)),
        "promotion.promoteClass" => Some(handle_promote_class(state, req)),
        "promotion.promoteAll" => Some(handle_promote_all(state, req)),
        _ => None,
    }
}
