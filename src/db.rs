use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("marking.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            is_guest INTEGER NOT NULL DEFAULT 0,
            is_admin INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS role_assignments(
            course_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            PRIMARY KEY(course_id, user_id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_role_assignments_user ON role_assignments(user_id)",
        [],
    )?;

    // course_id is not a foreign key; the host may remove courses.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marking_instances(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            grading_method TEXT NOT NULL,
            total_pages INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marking_instances_course ON marking_instances(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rubric_definitions(
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(instance_id) REFERENCES marking_instances(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rubric_criteria(
            id TEXT PRIMARY KEY,
            definition_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            description TEXT NOT NULL,
            FOREIGN KEY(definition_id) REFERENCES rubric_definitions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rubric_criteria_definition ON rubric_criteria(definition_id, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rubric_levels(
            id TEXT PRIMARY KEY,
            criterion_id TEXT NOT NULL,
            score REAL NOT NULL,
            definition TEXT NOT NULL,
            FOREIGN KEY(criterion_id) REFERENCES rubric_criteria(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rubric_levels_criterion ON rubric_levels(criterion_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marker_criteria(
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL,
            criterion_id TEXT NOT NULL,
            marker_id TEXT NOT NULL,
            block INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(instance_id) REFERENCES marking_instances(id),
            FOREIGN KEY(criterion_id) REFERENCES rubric_criteria(id),
            FOREIGN KEY(marker_id) REFERENCES users(id),
            UNIQUE(instance_id, criterion_id, marker_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marker_criteria_instance ON marker_criteria(instance_id, block)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marker_criteria_marker ON marker_criteria(marker_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS page_criteria(
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL,
            criterion_id TEXT NOT NULL,
            page INTEGER NOT NULL,
            block INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(instance_id) REFERENCES marking_instances(id),
            FOREIGN KEY(criterion_id) REFERENCES rubric_criteria(id),
            UNIQUE(instance_id, criterion_id, page)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_page_criteria_instance ON page_criteria(instance_id, block)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_events(
            id TEXT PRIMARY KEY,
            event_name TEXT NOT NULL,
            instance_id TEXT NOT NULL,
            object_id TEXT NOT NULL,
            user_id TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_events_instance ON audit_events(instance_id)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
