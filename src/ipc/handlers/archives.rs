use crate::archive;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn workspace_of(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn handle_archives_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let workspace = workspace_of(state)?;
        let entries = archive::list_archives(&workspace)
            .map_err(|e| HandlerErr::new("archive_list_failed", format!("{e:#}")))?;
        let archives: Vec<Value> = entries
            .iter()
            .map(|a| {
                json!({
                    "fileName": a.file_name,
                    "size": a.size,
                    "createdAt": a.created_at,
                })
            })
            .collect();
        Ok(json!({ "archives": archives }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_archives_download(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let workspace = workspace_of(state)?;
        let file_name = req
            .params
            .get("fileName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing fileName"))?;
        let out_path = req
            .params
            .get("outPath")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing outPath"))?;

        let src = archive::resolve_archive(&workspace, file_name)
            .map_err(|e| HandlerErr::new("not_found", format!("{e:#}")))?;
        if let Some(parent) = PathBuf::from(out_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
        }
        let size = std::fs::copy(&src, out_path)
            .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;

        Ok(json!({
            "fileName": file_name,
            "outPath": out_path,
            "size": size,
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "archives.list" => Some(handle_archives_list(state, req)),
        "archives.download" => Some(handle_archives_download(state, req)),
        _ => None,
    }
}
