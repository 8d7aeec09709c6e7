use crate::auth::Role;
use crate::db;
use crate::ipc::helpers::{conn_as, db_conn, params_object, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::setup::{load_section, merge_section_patch, SetupSection};
use serde_json::{json, Map, Value};

fn setup_get(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let v = load_section(conn, section)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        out.insert(section.name().to_string(), v);
    }
    Ok(Value::Object(out))
}

fn setup_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let patch = params_object(params, "patch")?;

    let mut current = load_section(conn, section)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    merge_section_patch(section, &mut current, patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(section = section.name(), "setup section updated");
    Ok(json!({ "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(respond(&req.id, setup_get(state))),
        "setup.update" => Some(respond(&req.id, setup_update(state, &req.params))),
        _ => None,
    }
}
