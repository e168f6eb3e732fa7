//! Session checks, capabilities and the audit trail.

use crate::db;
use crate::error::{AppError, AppResult};
use crate::strings::get_string;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    EditingTeacher,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "editingteacher" => Some(Self::EditingTeacher),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::EditingTeacher => "editingteacher",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }

    pub fn grants(self, cap: Capability) -> bool {
        match cap {
            Capability::View => true,
            Capability::Grade => !matches!(self, Self::Student),
            Capability::AssignMarkers => matches!(self, Self::Manager | Self::EditingTeacher),
        }
    }

    fn granting(cap: Capability) -> Vec<Role> {
        [Self::Manager, Self::EditingTeacher, Self::Teacher, Self::Student]
            .into_iter()
            .filter(|r| r.grants(cap))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    View,
    Grade,
    AssignMarkers,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "marking:view",
            Self::Grade => "marking:grade",
            Self::AssignMarkers => "marking:assignmarkers",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_guest: bool,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

impl UserSummary {
    pub fn new(id: String, first_name: String, last_name: String) -> Self {
        let full_name = format!("{} {}", first_name, last_name).trim().to_string();
        Self {
            id,
            first_name,
            last_name,
            full_name,
        }
    }
}

pub fn load_user(conn: &Connection, user_id: &str) -> AppResult<Option<SessionUser>> {
    conn.query_row(
        "SELECT id, username, first_name, last_name, is_guest, is_admin
         FROM users
         WHERE id = ?",
        [user_id],
        |r| {
            Ok(SessionUser {
                id: r.get(0)?,
                username: r.get(1)?,
                first_name: r.get(2)?,
                last_name: r.get(3)?,
                is_guest: r.get::<_, i64>(4)? != 0,
                is_admin: r.get::<_, i64>(5)? != 0,
            })
        },
    )
    .optional()
    .map_err(AppError::query)
}

fn course_role(conn: &Connection, course_id: &str, user_id: &str) -> AppResult<Option<Role>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT role FROM role_assignments WHERE course_id = ? AND user_id = ?",
            (course_id, user_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw.as_deref().and_then(Role::parse))
}

/// Resolves the session user and makes sure they may enter the course.
/// Guests are let through here; callers refuse them separately.
pub fn require_login(
    conn: &Connection,
    user_id: Option<&str>,
    course_id: &str,
) -> AppResult<SessionUser> {
    let Some(user_id) = user_id.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(AppError::new("not_logged_in", get_string("notloggedin")));
    };
    let Some(user) = load_user(conn, user_id)? else {
        return Err(AppError::new("not_logged_in", get_string("notloggedin"))
            .with_details(json!({ "userId": user_id })));
    };
    if user.is_admin || user.is_guest {
        return Ok(user);
    }
    if course_role(conn, course_id, &user.id)?.is_none() {
        return Err(AppError::new("not_enrolled", get_string("notenrolled"))
            .with_details(json!({ "courseId": course_id })));
    }
    Ok(user)
}

pub fn require_not_guest(user: &SessionUser) -> AppResult<()> {
    if user.is_guest {
        return Err(AppError::new("guest_denied", get_string("guestdenied")));
    }
    Ok(())
}

pub fn has_capability(
    conn: &Connection,
    user: &SessionUser,
    course_id: &str,
    cap: Capability,
) -> AppResult<bool> {
    if user.is_admin {
        return Ok(true);
    }
    if user.is_guest {
        return Ok(cap == Capability::View);
    }
    Ok(course_role(conn, course_id, &user.id)?
        .map(|r| r.grants(cap))
        .unwrap_or(false))
}

/// Enrolled users holding `cap` in the course, ordered by last name.
pub fn users_with_capability(
    conn: &Connection,
    course_id: &str,
    cap: Capability,
) -> AppResult<Vec<UserSummary>> {
    let roles = Role::granting(cap);
    let placeholders = vec!["?"; roles.len()].join(", ");
    let sql = format!(
        "SELECT u.id, u.first_name, u.last_name
         FROM role_assignments ra
         JOIN users u ON u.id = ra.user_id
         WHERE ra.course_id = ? AND u.is_guest = 0 AND ra.role IN ({})
         ORDER BY u.last_name, u.first_name, u.id",
        placeholders
    );
    let mut bind: Vec<Value> = vec![Value::Text(course_id.to_string())];
    bind.extend(roles.iter().map(|r| Value::Text(r.as_str().to_string())));

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(UserSummary::new(r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(users)
}

pub const EVENT_MARKERS_ACCESS_DENIED: &str = "markers_access_denied";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub event_name: String,
    pub instance_id: String,
    pub object_id: String,
    pub user_id: Option<String>,
    pub created_at: i64,
}

pub fn record_event(
    conn: &Connection,
    event_name: &str,
    instance_id: &str,
    object_id: &str,
    user_id: Option<&str>,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO audit_events(id, event_name, instance_id, object_id, user_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            event_name,
            instance_id,
            object_id,
            user_id,
            db::now_unix(),
        ),
    )
    .map_err(|e| AppError::insert("audit_events", e))?;
    tracing::warn!(event = event_name, instance_id, user_id = ?user_id, "audit event recorded");
    Ok(())
}

pub fn list_events(conn: &Connection, instance_id: Option<&str>) -> AppResult<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_name, instance_id, object_id, user_id, created_at
         FROM audit_events
         WHERE (?1 IS NULL OR instance_id = ?1)
         ORDER BY created_at, rowid",
    )?;
    let events = stmt
        .query_map([instance_id], |r| {
            Ok(AuditEvent {
                id: r.get(0)?,
                event_name: r.get(1)?,
                instance_id: r.get(2)?,
                object_id: r.get(3)?,
                user_id: r.get(4)?,
                created_at: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(events)
}
