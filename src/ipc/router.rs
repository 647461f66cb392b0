use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::students::try_handle,
    handlers::courses::try_handle,
    handlers::semesters::try_handle,
    handlers::grades::try_handle,
    handlers::import::try_handle,
    handlers::reports::try_handle,
    handlers::auth::try_handle,
    handlers::me::try_handle,
    handlers::notifications::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
    let _enter = span.enter();

    for try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            if let Some(code) = resp.pointer("/error/code").and_then(|c| c.as_str()) {
                tracing::warn!(
                    code,
                    message = resp.pointer("/error/message").and_then(|m| m.as_str()).unwrap_or(""),
                    "request failed"
                );
            } else {
                tracing::debug!("request ok");
            }
            return resp;
        }
    }

    tracing::warn!("unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
