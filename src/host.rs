//! Host-managed records: courses, users, enrolments and marking instances.

use crate::db;
use crate::error::{AppError, AppResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingMethod {
    Rubric,
    Simple,
    Guide,
}

impl GradingMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rubric" => Some(Self::Rubric),
            "simple" => Some(Self::Simple),
            "guide" => Some(Self::Guide),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rubric => "rubric",
            Self::Simple => "simple",
            Self::Guide => "guide",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub course_id: String,
    pub name: String,
    pub grading_method: String,
    pub total_pages: i64,
}

impl Instance {
    pub fn method(&self) -> Option<GradingMethod> {
        GradingMethod::parse(&self.grading_method)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub is_guest: bool,
    pub is_admin: bool,
}

pub fn load_course(conn: &Connection, course_id: &str) -> AppResult<Option<Course>> {
    conn.query_row(
        "SELECT id, name FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(Course {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(AppError::query)
}

pub fn load_instance(conn: &Connection, instance_id: &str) -> AppResult<Option<Instance>> {
    conn.query_row(
        "SELECT id, course_id, name, grading_method, total_pages
         FROM marking_instances
         WHERE id = ?",
        [instance_id],
        |r| {
            Ok(Instance {
                id: r.get(0)?,
                course_id: r.get(1)?,
                name: r.get(2)?,
                grading_method: r.get(3)?,
                total_pages: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(AppError::query)
}

pub fn create_course(conn: &Connection, name: &str) -> AppResult<Course> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::bad_params("name must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO courses(id, name) VALUES(?, ?)", (&id, name))
        .map_err(|e| AppError::insert("courses", e))?;
    Ok(Course {
        id,
        name: name.to_string(),
    })
}

pub fn create_user(conn: &Connection, user: &NewUser) -> AppResult<String> {
    if user.username.trim().is_empty() {
        return Err(AppError::bad_params("username must not be empty"));
    }
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [user.username.trim()],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(AppError::new("conflict", "username already exists")
            .with_details(serde_json::json!({ "username": user.username.trim() })));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, first_name, last_name, email, is_guest, is_admin)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            user.username.trim(),
            user.first_name.trim(),
            user.last_name.trim(),
            user.email.as_deref(),
            user.is_guest as i64,
            user.is_admin as i64,
        ),
    )
    .map_err(|e| AppError::insert("users", e))?;
    Ok(id)
}

pub fn assign_role(conn: &Connection, course_id: &str, user_id: &str, role: &str) -> AppResult<()> {
    conn.execute(
        "INSERT INTO role_assignments(course_id, user_id, role) VALUES(?, ?, ?)
         ON CONFLICT(course_id, user_id) DO UPDATE SET role = excluded.role",
        (course_id, user_id, role),
    )
    .map_err(|e| AppError::insert("role_assignments", e))?;
    Ok(())
}

/// Upper bound on `total_pages`; the page form lists every page.
pub const MAX_TOTAL_PAGES: i64 = 10_000;

pub fn create_instance(
    conn: &Connection,
    course_id: &str,
    name: &str,
    method: GradingMethod,
    total_pages: i64,
) -> AppResult<Instance> {
    if !(1..=MAX_TOTAL_PAGES).contains(&total_pages) {
        return Err(AppError::bad_params(format!(
            "totalPages must be in 1..={}",
            MAX_TOTAL_PAGES
        ))
        .with_details(json!({ "totalPages": total_pages })));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marking_instances(id, course_id, name, grading_method, total_pages, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, course_id, name.trim(), method.as_str(), total_pages, db::now_unix()),
    )
    .map_err(|e| AppError::insert("marking_instances", e))?;
    Ok(Instance {
        id,
        course_id: course_id.to_string(),
        name: name.trim().to_string(),
        grading_method: method.as_str().to_string(),
        total_pages,
    })
}
