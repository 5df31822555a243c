use crate::db;
use crate::grades;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: i64,
    pub name: String,
    pub grade: String,
    pub section: String,
    pub father_name: Option<String>,
    pub father_phone: Option<String>,
    pub mother_name: Option<String>,
    pub mother_phone: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
}

impl StudentRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "grade": self.grade,
            "section": self.section,
            "fatherName": self.father_name,
            "fatherPhone": self.father_phone,
            "motherName": self.mother_name,
            "motherPhone": self.mother_phone,
            "address": self.address,
            "email": self.email,
        })
    }
}

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Grade labels are a closed set; everything outside it is rejected at the
/// boundary so no repair pass is ever needed downstream. A grade that is
/// present but not a string (a bare number, say) is a contract violation,
/// not a missing filter.
pub fn required_grade(params: &Value, key: &str) -> Result<&'static str, HandlerErr> {
    let value = params
        .get(key)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    let raw = value.as_str().ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            format!("{} must be a string grade label", key),
        )
        .with_details(json!({ "got": value.clone() }))
    })?;
    grades::normalize(raw).ok_or_else(|| {
        HandlerErr::new("bad_params", format!("unknown grade: {}", raw)).with_details(json!({
            "grade": raw,
            "known": grades::GRADE_SEQUENCE,
        }))
    })
}

fn optional_phone(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = params.get(key).and_then(|v| v.as_str()) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() != 10 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must be exactly 10 digits or empty", key),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

fn optional_trimmed(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn students_in_grade(conn: &Connection, grade: &str) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, grade, section, father_name, father_phone,
                    mother_name, mother_phone, address, email
             FROM students
             WHERE grade = ?
             ORDER BY name, id",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([grade], row_to_student)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(rows)
}

fn row_to_student(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        name: row.get(1)?,
        grade: row.get(2)?,
        section: row.get(3)?,
        father_name: row.get(4)?,
        father_phone: row.get(5)?,
        mother_name: row.get(6)?,
        mother_phone: row.get(7)?,
        address: row.get(8)?,
        email: row.get(9)?,
    })
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let params = &req.params;

        let name = optional_trimmed(params, "name")
            .ok_or_else(|| HandlerErr::new("bad_params", "missing name"))?;
        let grade = required_grade(params, "grade")?;
        let section = optional_trimmed(params, "section").unwrap_or_else(|| "A".to_string());
        let father_name = optional_trimmed(params, "fatherName");
        let father_phone = optional_phone(params, "fatherPhone")?;
        let mother_name = optional_trimmed(params, "motherName");
        let mother_phone = optional_phone(params, "motherPhone")?;
        let address = optional_trimmed(params, "address");
        let email = optional_trimmed(params, "email");
        let password_hash = params
            .get("password")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(db::hash_password);

        conn.execute(
            "INSERT INTO students(
                name, grade, section, father_name, father_phone,
                mother_name, mother_phone, address, email, password_hash, created_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                name,
                grade,
                section,
                father_name,
                father_phone,
                mother_name,
                mother_phone,
                address,
                email,
                password_hash,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "students" }))
        })?;

        let student_id = conn.last_insert_rowid();
        Ok(json!({ "studentId": student_id, "grade": grade, "section": section }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let students = match req.params.get("grade") {
            Some(Value::Null) | None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, name, grade, section, father_name, father_phone,
                                mother_name, mother_phone, address, email
                         FROM students
                         ORDER BY grade, name, id",
                    )
                    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
                stmt.query_map([], row_to_student)
                    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
            }
            Some(_) => {
                let grade = required_grade(&req.params, "grade")?;
                students_in_grade(conn, grade)?
            }
        };
        let students: Vec<Value> = students.iter().map(|s| s.to_json()).collect();
        Ok(json!({ "students": students }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let student_id = req
            .params
            .get("studentId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing studentId"))?;
        let patch = req
            .params
            .get("patch")
            .and_then(|v| v.as_object())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing patch"))?;

        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        if exists.is_none() {
            return Err(HandlerErr::new("not_found", "student not found"));
        }

        let patch_value = Value::Object(patch.clone());
        let mut sets: Vec<(&str, Option<String>)> = Vec::new();
        if patch.contains_key("name") {
            let name = optional_trimmed(&patch_value, "name")
                .ok_or_else(|| HandlerErr::new("bad_params", "name must not be empty"))?;
            sets.push(("name", Some(name)));
        }
        if patch.contains_key("grade") {
            let grade = required_grade(&patch_value, "grade")?;
            sets.push(("grade", Some(grade.to_string())));
        }
        if patch.contains_key("section") {
            let section = optional_trimmed(&patch_value, "section").unwrap_or_else(|| "A".to_string());
            sets.push(("section", Some(section)));
        }
        if patch.contains_key("fatherName") {
            sets.push(("father_name", optional_trimmed(&patch_value, "fatherName")));
        }
        if patch.contains_key("fatherPhone") {
            sets.push(("father_phone", optional_phone(&patch_value, "fatherPhone")?));
        }
        if patch.contains_key("motherName") {
            sets.push(("mother_name", optional_trimmed(&patch_value, "motherName")));
        }
        if patch.contains_key("motherPhone") {
            sets.push(("mother_phone", optional_phone(&patch_value, "motherPhone")?));
        }
        if patch.contains_key("address") {
            sets.push(("address", optional_trimmed(&patch_value, "address")));
        }
        if patch.contains_key("email") {
            sets.push(("email", optional_trimmed(&patch_value, "email")));
        }
        if sets.is_empty() {
            return Err(HandlerErr::new("bad_params", "patch has no known fields"));
        }

        let assignments: Vec<String> = sets.iter().map(|(col, _)| format!("{} = ?", col)).collect();
        let sql = format!(
            "UPDATE students SET {} WHERE id = ?",
            assignments.join(", ")
        );
        let mut values: Vec<rusqlite::types::Value> = sets
            .into_iter()
            .map(|(_, v)| match v {
                Some(s) => rusqlite::types::Value::Text(s),
                None => rusqlite::types::Value::Null,
            })
            .collect();
        values.push(rusqlite::types::Value::Integer(student_id));

        conn.execute(&sql, rusqlite::params_from_iter(values))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

        Ok(json!({ "studentId": student_id }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let student_id = req
            .params
            .get("studentId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing studentId"))?;
        let deleted = conn
            .execute("DELETE FROM students WHERE id = ?", [student_id])
            .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
        if deleted == 0 {
            return Err(HandlerErr::new("not_found", "student not found"));
        }
        Ok(json!({ "studentId": student_id }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
