use crate::access::Capability;
use crate::assign::{self, AssociationKind};
use crate::ipc::error::{app_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::markers::{
    self, PageAction, PageContext, PageRequest, Submission, FORM_ADD_MARKERS, FORM_ADD_PAGES,
};
use serde_json::json;

use super::setup;

/// Criterion ids arrive as strings or numbers; empty or `0` means none.
fn criterion_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    let raw = match req.params.get("criterion") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                "criterion must be a string or number",
                Some(json!({ "criterion": other })),
            ))
        }
    };
    Ok(Some(raw).filter(|s| !s.is_empty() && s != "0"))
}

fn parse_submission(req: &Request, raw: &serde_json::Value) -> Result<Submission, serde_json::Value> {
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid submission: {}", e),
            None,
        )
    })
}

fn run_page(state: &mut AppState, req: &Request, page_req: PageRequest) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let settings = match setup::load_markers_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match markers::handle_page(conn, &page_req, &settings) {
        Ok(model) => ok(&req.id, json!({ "page": model })),
        Err(e) => {
            tracing::info!(code = e.code, instance_id = %page_req.instance_id, "markers page refused");
            app_err(&req.id, e)
        }
    }
}

fn base_request(req: &Request) -> Result<PageRequest, serde_json::Value> {
    let instance_id = required_str(req, "id")?;
    Ok(PageRequest {
        user_id: optional_str(req, "userId"),
        instance_id,
        criterion_id: criterion_param(req)?,
        action: PageAction::View,
        submit: None,
    })
}

fn handle_markers_page(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut page_req = match base_request(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    page_req.action = PageAction::parse(req.params.get("action").and_then(|v| v.as_str()));
    if let Some(raw) = req.params.get("submit").filter(|v| !v.is_null()) {
        page_req.submit = match parse_submission(req, raw) {
            Ok(s) => Some(s),
            Err(e) => return e,
        };
    }
    run_page(state, req, page_req)
}

/// `markers.assign` / `pages.assign`: the form submission as its own method.
fn handle_assign(state: &mut AppState, req: &Request, form: &str) -> serde_json::Value {
    let mut page_req = match base_request(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut submission = match parse_submission(req, &req.params) {
        Ok(s) => s,
        Err(e) => return e,
    };
    submission.action = form.to_string();
    page_req.submit = Some(submission);
    run_page(state, req, page_req)
}

fn handle_delete(state: &mut AppState, req: &Request, action: PageAction) -> serde_json::Value {
    let mut page_req = match base_request(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if page_req.criterion_id.is_none() {
        return err(&req.id, "bad_params", "missing criterion", None);
    }
    page_req.action = action;
    run_page(state, req, page_req)
}

/// The markers page's access checks, for methods that read its data.
pub(super) fn authorize_read(
    conn: &rusqlite::Connection,
    req: &Request,
    instance_id: &str,
) -> Result<PageContext, serde_json::Value> {
    let settings = setup::load_markers_settings(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let user_id = optional_str(req, "userId");
    markers::authorize(
        conn,
        user_id.as_deref(),
        instance_id,
        None,
        Capability::AssignMarkers,
        &settings,
    )
    .map_err(|e| {
        tracing::info!(code = e.code, instance_id, method = %req.method, "read refused");
        app_err(&req.id, e)
    })
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind_raw = optional_str(req, "kind").unwrap_or_else(|| "markers".to_string());
    let Some(kind) = AssociationKind::parse(&kind_raw) else {
        return err(
            &req.id,
            "bad_params",
            "kind must be one of: markers, pages",
            Some(json!({ "kind": kind_raw })),
        );
    };
    let ctx = match authorize_read(conn, req, &instance_id) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match assign::list_rows(conn, kind, &ctx.instance.id) {
        Ok(rows) => ok(&req.id, json!({ "kind": kind, "rows": rows })),
        Err(e) => app_err(&req.id, e),
    }
}

fn handle_markers_scope(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let marker_id = match required_str(req, "markerId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match setup::load_markers_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let user_id = optional_str(req, "userId");
    let ctx = match markers::authorize_scope(
        conn,
        user_id.as_deref(),
        &instance_id,
        &marker_id,
        &settings,
    ) {
        Ok(c) => c,
        Err(e) => return app_err(&req.id, e),
    };
    match assign::marker_scope(
        conn,
        &ctx.instance.id,
        ctx.instance.total_pages,
        &ctx.definition,
        &marker_id,
    ) {
        Ok(scope) => ok(&req.id, json!({ "scope": scope })),
        Err(e) => app_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "markers.page" => Some(handle_markers_page(state, req)),
        "markers.assign" => Some(handle_assign(state, req, FORM_ADD_MARKERS)),
        "pages.assign" => Some(handle_assign(state, req, FORM_ADD_PAGES)),
        "markers.delete" => Some(handle_delete(state, req, PageAction::DeleteMarkers)),
        "pages.delete" => Some(handle_delete(state, req, PageAction::DeletePages)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "markers.scope" => Some(handle_markers_scope(state, req)),
        _ => None,
    }
}
