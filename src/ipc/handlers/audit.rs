use crate::access;
use crate::ipc::error::{app_err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

use super::markers::authorize_read;

fn handle_audit_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "instanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = match authorize_read(conn, req, &instance_id) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match access::list_events(conn, Some(&ctx.instance.id)) {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => app_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}
