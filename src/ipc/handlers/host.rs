use crate::access::{self, Role};
use crate::host::{self, GradingMethod, NewUser};
use crate::ipc::error::{app_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, parse_bool, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match host::create_course(conn, &name) {
        Ok(course) => ok(&req.id, json!({ "courseId": course.id, "name": course.name })),
        Err(e) => app_err(&req.id, e),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_guest = match parse_bool(req, "isGuest", false) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_admin = match parse_bool(req, "isAdmin", false) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if is_guest && is_admin {
        return err(&req.id, "bad_params", "a guest cannot be an admin", None);
    }

    let user = NewUser {
        username,
        first_name: optional_str(req, "firstName").unwrap_or_default(),
        last_name: optional_str(req, "lastName").unwrap_or_default(),
        email: optional_str(req, "email"),
        is_guest,
        is_admin,
    };
    match host::create_user(conn, &user) {
        Ok(user_id) => ok(&req.id, json!({ "userId": user_id })),
        Err(e) => app_err(&req.id, e),
    }
}

fn handle_enrolments_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: manager, editingteacher, teacher, student",
            Some(json!({ "role": role_raw })),
        );
    };

    match host::load_course(conn, &course_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return app_err(&req.id, e),
    }
    match access::load_user(conn, &user_id) {
        Ok(Some(u)) if u.is_guest => {
            return err(&req.id, "bad_params", "guests cannot be enrolled", None)
        }
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return app_err(&req.id, e),
    }

    match host::assign_role(conn, &course_id, &user_id, role.as_str()) {
        Ok(()) => ok(&req.id, json!({ "ok": true, "role": role.as_str() })),
        Err(e) => app_err(&req.id, e),
    }
}

fn handle_instances_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let method_raw = optional_str(req, "gradingMethod").unwrap_or_else(|| "rubric".to_string());
    let Some(method) = GradingMethod::parse(&method_raw) else {
        return err(
            &req.id,
            "bad_params",
            "gradingMethod must be one of: rubric, simple, guide",
            Some(json!({ "gradingMethod": method_raw })),
        );
    };
    let total_pages = match req.params.get("totalPages") {
        None => 1,
        Some(v) => match v.as_i64() {
            Some(n) => n,
            None => return err(&req.id, "bad_params", "totalPages must be integer", None),
        },
    };

    match host::load_course(conn, &course_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return app_err(&req.id, e),
    }

    match host::create_instance(conn, &course_id, &name, method, total_pages) {
        Ok(instance) => {
            tracing::info!(instance_id = %instance.id, course_id = %course_id, "marking instance created");
            ok(&req.id, json!({ "instanceId": instance.id, "instance": instance }))
        }
        Err(e) => app_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "enrolments.assign" => Some(handle_enrolments_assign(state, req)),
        "instances.create" => Some(handle_instances_create(state, req)),
        _ => None,
    }
}
