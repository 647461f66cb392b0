use crate::auth::{self, Role, Session};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, require_role, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_auth_sign_up(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = (|| -> Result<Value, HandlerErr> {
        let username = get_required_str(&req.params, "username")?;
        let password = req
            .params
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
        let role = match get_opt_str(&req.params, "role")? {
            Some(r) => Role::parse(&r)
                .ok_or_else(|| HandlerErr::bad_params("role must be admin or student"))?,
            None => Role::Student,
        };
        // Only the first admin may register without an admin session.
        if auth::admin_exists(conn)? {
            require_role(state, Role::Admin)?;
        }
        auth::create_user(conn, &username, password, role)?;
        Ok(json!({ "username": username, "role": role }))
    })();
    respond(req, result)
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = (|| -> Result<Session, HandlerErr> {
        let username = get_required_str(&req.params, "username")?;
        let password = req
            .params
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
        Ok(auth::authenticate(conn, &username, password)?)
    })();
    match result {
        Ok(session) => {
            let body = json!({ "session": session });
            state.session = Some(session);
            ok(&req.id, body)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_auth_logout(state: &mut AppState, req: &Request) -> Value {
    let was = state.session.take();
    if let Some(s) = &was {
        tracing::info!(username = %s.username, session_id = %s.session_id, "logout");
    }
    ok(&req.id, json!({ "loggedOut": was.is_some() }))
}

fn handle_auth_reset_password(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = (|| -> Result<Value, HandlerErr> {
        let admin = require_role(state, Role::Admin)?;
        let username = get_required_str(&req.params, "username")?;
        let password = req
            .params
            .get("newPassword")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("missing newPassword"))?;
        auth::reset_password(conn, &username, password)?;
        tracing::info!(admin = %admin.username, username = %username, "admin reset password");
        Ok(json!({ "username": username }))
    })();
    respond(req, result)
}

fn handle_auth_whoami(state: &mut AppState, req: &Request) -> Value {
    ok(&req.id, json!({ "session": state.session }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signUp" => Some(handle_auth_sign_up(state, req)),
        "auth.login" => Some(handle_auth_login(state, req)),
        "auth.logout" => Some(handle_auth_logout(state, req)),
        "auth.whoami" => Some(handle_auth_whoami(state, req)),
        "auth.resetPassword" => Some(handle_auth_reset_password(state, req)),
        _ => None,
    }
}
