use crate::{
    auth::{
        AuthenticatedSession, CurrentUser, SessionHandle,
        session::{build_clear_cookie, build_set_cookie},
    },
    error::AppError,
    server::Server,
    utils::request_context::RequestContext,
};
use axum::{
    Router,
    extract::{Query, State},
    http::header::SET_COOKIE,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::warn;
use url::Url;

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub fn create_auth_routes() -> Router<Server> {
    Router::new()
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        .route("/logout", post(logout_handler))
        .route("/me", get(me_handler))
}

/// Start a sign-in: issue a state token and send the browser to Google
pub async fn login_handler(State(server): State<Server>) -> Result<Redirect, AppError> {
    let request = server.login_flow.begin()?;
    Ok(Redirect::to(&request.authorization_url))
}

pub async fn callback_handler(
    State(server): State<Server>,
    Query(params): Query<CallbackQuery>,
    handle: SessionHandle,
    context: RequestContext,
) -> Result<Response, AppError> {
    if let Some(error) = params.error {
        // the attempt is over, so its state must not stay usable
        if let Some(state) = params.state.as_deref() {
            server.login_flow.state_store().consume(state);
        }
        let message = params
            .error_description
            .unwrap_or_else(|| "Google sign-in was cancelled or failed".to_string());
        warn!(error = %error, "Identity provider returned an error");
        return Ok(Redirect::to(&build_error_url(&error, &message)?).into_response());
    }

    let state = params.state.unwrap_or_default();
    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        server.login_flow.state_store().consume(&state);
        let url = build_error_url("invalid_request", "Missing authorization code")?;
        return Ok(Redirect::to(&url).into_response());
    };

    let session = match server.login_flow.complete(&code, &state, &context).await {
        Ok(session) => session,
        Err(e) => {
            let url = build_error_url(e.kind(), &e.to_string())?;
            return Ok(Redirect::to(&url).into_response());
        }
    };

    // a fresh login replaces whatever this browser had before
    if let Some(previous) = handle.id.as_deref().and_then(|id| server.sessions.remove(id)) {
        end_session(&server, previous).await;
    }

    let session_id = server.sessions.insert(session);
    let cookie = build_set_cookie(
        &server.config.session.cookie_name,
        &session_id,
        server.config.session.ttl_seconds,
        server.config.session.cookie_secure,
    );

    Ok(([(SET_COOKIE, cookie)], Redirect::to("/")).into_response())
}

pub async fn logout_handler(State(server): State<Server>, handle: SessionHandle) -> Response {
    if let Some(session) = handle.id.as_deref().and_then(|id| server.sessions.remove(id)) {
        end_session(&server, session).await;
    }

    let cookie = build_clear_cookie(
        &server.config.session.cookie_name,
        server.config.session.cookie_secure,
    );
    ([(SET_COOKIE, cookie)], Redirect::to("/")).into_response()
}

/// Current signed-in user
pub async fn me_handler(CurrentUser(session): CurrentUser) -> Json<AuthenticatedSession> {
    Json(session)
}

async fn end_session(server: &Server, session: AuthenticatedSession) {
    let usage_session_id = session.usage_session_id;
    if let Err(e) = server.login_flow.logout(session).await {
        warn!(usage_session_id, error = %e, "Failed to close usage session");
    }
}

/// Relative redirect to the landing page carrying the failure
fn build_error_url(kind: &str, message: &str) -> Result<String, AppError> {
    let mut url = Url::parse("http://temp/")
        .map_err(|e| AppError::Internal(format!("Failed to parse base URL: {e}")))?;

    url.query_pairs_mut()
        .append_pair("error", kind)
        .append_pair("message", message);

    Ok(format!("/?{}", url.query().unwrap_or("")))
}
