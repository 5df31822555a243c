use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_admins_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing email", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing password", None),
    };

    let admin_id = Uuid::new_v4().to_string();
    let hash = db::hash_password(&password);
    if let Err(e) = conn.execute(
        "INSERT INTO admins(id, name, email, password_hash) VALUES(?, ?, ?, ?)",
        (&admin_id, &name, &email, &hash),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "admins" })),
        );
    }

    ok(&req.id, json!({ "adminId": admin_id, "name": name, "email": email }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admins.create" => Some(handle_admins_create(state, req)),
        _ => None,
    }
}
