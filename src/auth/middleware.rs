use super::{AuthenticatedSession, session::cookie_value};
use crate::{error::AppError, server::Server};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::COOKIE, request::Parts},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use tracing::trace;

/// Browser session attached to the request by [`session_middleware`].
///
/// `id` is the cookie value when the registry still knows it.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    pub id: Option<String>,
    pub session: Option<AuthenticatedSession>,
}

impl SessionHandle {
    pub fn is_authenticated(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.authenticated)
    }
}

/// Resolve the session cookie against the registry
pub async fn session_middleware(
    State(server): State<Server>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_header = request
        .headers()
        .get(COOKIE)
        .and_then(|value| value.to_str().ok());

    let handle = cookie_value(cookie_header, &server.config.session.cookie_name)
        .and_then(|id| {
            server
                .sessions
                .get(&id)
                .map(|session| (id, session))
        })
        .map(|(id, session)| {
            trace!(user_id = session.user_id, "Resolved browser session");
            SessionHandle {
                id: Some(id),
                session: Some(session),
            }
        })
        .unwrap_or_default();

    request.extensions_mut().insert(handle);
    next.run(request).await
}

impl<S> FromRequestParts<S> for SessionHandle
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Extractor for handlers that need a signed-in user
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedSession);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .and_then(|handle| handle.session.clone())
            .filter(|session| session.authenticated)
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Not signed in".to_string()))
    }
}
