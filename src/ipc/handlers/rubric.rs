use crate::host;
use crate::ipc::error::{app_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::rubric::{self, CriterionInput};
use serde_json::json;

fn handle_rubric_define(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "instanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_criteria) = req.params.get("criteria") else {
        return err(&req.id, "bad_params", "missing criteria[]", None);
    };
    let criteria: Vec<CriterionInput> = match serde_json::from_value(raw_criteria.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid criteria: {}", e),
                None,
            )
        }
    };
    let name = optional_str(req, "name").unwrap_or_else(|| "Rubric".to_string());

    let instance = match host::load_instance(conn, &instance_id) {
        Ok(Some(i)) => i,
        Ok(None) => return err(&req.id, "not_found", "marking instance not found", None),
        Err(e) => return app_err(&req.id, e),
    };

    match rubric::define(conn, &instance, &name, &criteria) {
        Ok(definition) => ok(&req.id, json!({ "definition": definition })),
        Err(e) => app_err(&req.id, e),
    }
}

fn handle_rubric_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "instanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match rubric::load_definition(conn, &instance_id) {
        Ok(definition) => ok(&req.id, json!({ "definition": definition })),
        Err(e) => app_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rubric.define" => Some(handle_rubric_define(state, req)),
        "rubric.get" => Some(handle_rubric_get(state, req)),
        _ => None,
    }
}
