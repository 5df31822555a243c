use anyhow::Context;
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory under the workspace holding one .xlsx per graduation event.
const ARCHIVE_DIR: &str = "graduated";

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub file_name: String,
    pub size: u64,
    pub created_at: String,
}

pub fn archive_dir(workspace: &Path) -> PathBuf {
    workspace.join(ARCHIVE_DIR)
}

/// Reserve a path for a new graduation archive. Creates the archive
/// directory if absent. The name carries the grade, academic year and a
/// timestamp; an existing file at the same second gets a numeric suffix so
/// a prior export is never overwritten.
pub fn unique_archive_path(
    workspace: &Path,
    grade: &str,
    academic_year: &str,
) -> anyhow::Result<PathBuf> {
    let dir = archive_dir(workspace);
    std::fs::create_dir_all(&dir).with_context(|| {
        format!(
            "failed to create archive directory {}",
            dir.to_string_lossy()
        )
    })?;

    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let base = format!(
        "Graduated_Class_{}_{}_{}",
        sanitize_label(grade),
        sanitize_label(academic_year),
        stamp
    );

    let first = dir.join(format!("{}.xlsx", base));
    if !first.exists() {
        return Ok(first);
    }
    for n in 2.. {
        let candidate = dir.join(format!("{}_{}.xlsx", base, n));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    unreachable!("archive name space exhausted")
}

/// Write the archive bytes, removing any partial file on failure so a
/// truncated export can never be mistaken for a durable copy.
pub fn write_archive(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let write = || -> anyhow::Result<()> {
        let mut f = File::create(path).with_context(|| {
            format!("failed to create archive file {}", path.to_string_lossy())
        })?;
        f.write_all(bytes).context("failed to write archive file")?;
        f.flush().context("failed to flush archive file")?;
        Ok(())
    };
    if let Err(e) = write() {
        let _ = std::fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

pub fn list_archives(workspace: &Path) -> anyhow::Result<Vec<ArchiveEntry>> {
    let dir = archive_dir(workspace);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for ent in std::fs::read_dir(&dir)
        .with_context(|| format!("failed to read {}", dir.to_string_lossy()))?
    {
        let ent = ent?;
        let path = ent.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.to_ascii_lowercase().ends_with(".xlsx") {
            continue;
        }
        let meta = ent.metadata()?;
        let created = meta
            .modified()
            .map(|t| chrono::DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_default();
        entries.push(ArchiveEntry {
            file_name: name.to_string(),
            size: meta.len(),
            created_at: created,
        });
    }
    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(entries)
}

/// Resolve a stored archive by bare file name. Names containing path
/// separators are rejected so callers cannot reach outside the archive
/// directory.
pub fn resolve_archive(workspace: &Path, file_name: &str) -> anyhow::Result<PathBuf> {
    if file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains("..")
    {
        anyhow::bail!("invalid archive file name: {}", file_name);
    }
    let path = archive_dir(workspace).join(file_name);
    if !path.is_file() {
        anyhow::bail!("archive not found: {}", file_name);
    }
    Ok(path)
}

fn sanitize_label(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            _ => c,
        })
        .collect()
}
