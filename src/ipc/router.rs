use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: [TryHandle; 11] = [
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::auth::try_handle,
    handlers::accounts::try_handle,
    handlers::profiles::try_handle,
    handlers::catalog::try_handle,
    handlers::timetable::try_handle,
    handlers::attendance::try_handle,
    handlers::students::try_handle,
    handlers::teachers::try_handle,
    handlers::notifications::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "dispatch");
    for try_handle in FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
