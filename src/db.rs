use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("school.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            grade TEXT NOT NULL,
            section TEXT NOT NULL DEFAULT 'A',
            father_name TEXT,
            father_phone TEXT,
            mother_name TEXT,
            mother_phone TEXT,
            address TEXT,
            email TEXT,
            password_hash TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade ON students(grade)",
        [],
    )?;

    // Existing workspaces may predate the section column. Add and backfill.
    ensure_students_section(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS graduation_events(
            id TEXT PRIMARY KEY,
            student_id INTEGER NOT NULL,
            student_name TEXT NOT NULL,
            grade TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            archive_file TEXT NOT NULL,
            graduated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_graduation_events_year ON graduation_events(academic_year)",
        [],
    )?;

    // Repair grade labels written before the closed-enumeration checks
    // existed. New writes are validated, so this runs dry on healthy DBs.
    repair_legacy_grade_labels(&conn)?;

    Ok(conn)
}

fn ensure_students_section(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "section")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN section TEXT NOT NULL DEFAULT 'A'",
        [],
    )?;
    Ok(())
}

fn repair_legacy_grade_labels(conn: &Connection) -> anyhow::Result<()> {
    // Known drift from older imports: spelled-out numerals.
    conn.execute("UPDATE students SET grade = '2' WHERE grade = 'Two'", [])?;
    conn.execute(
        "UPDATE students SET grade = TRIM(grade) WHERE grade != TRIM(grade)",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Same scheme the login middleware uses: lowercase sha256 hex.
pub fn hash_password(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(plain: &str, stored_hash: &str) -> bool {
    hash_password(plain) == stored_hash
}
