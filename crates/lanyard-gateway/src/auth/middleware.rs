//! Session extractors for axum.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use std::time::Duration;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::SET_COOKIE, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use lanyard_core::identity::{DanglingPolicy, HydratedSession, IdentityError};
use lanyard_core::store::{CredentialStore, SessionPayload, SessionStore};
use lanyard_core::types::SessionId;
use lanyard_core::user::UserRecord;

use super::ApiError;
use super::cookie::CookieSigner;

/// Shared authentication state.
pub struct AuthState {
    /// User records.
    pub users: Arc<dyn CredentialStore>,
    /// Session payloads.
    pub sessions: Arc<dyn SessionStore>,
    /// Session cookie codec.
    pub cookies: CookieSigner,
    /// Treatment of members whose record is gone.
    pub dangling: DanglingPolicy,
}

impl AuthState {
    /// Create a new auth state.
    #[must_use]
    pub fn new(
        users: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        cookies: CookieSigner,
        dangling: DanglingPolicy,
    ) -> Self {
        Self {
            users,
            sessions,
            cookies,
            dangling,
        }
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("cookies", &self.cookies)
            .field("dangling", &self.dangling)
            .finish_non_exhaustive()
    }
}

/// The identities signed in to this request's browser session.
///
/// Dereferences to [`HydratedSession`] for queries and the
/// login/switch/logout operations. A handler that may have changed the
/// session must hand its response to [`SessionUsers::finish`], which
/// persists the change and sets the cookie.
pub struct SessionUsers {
    auth: Arc<AuthState>,
    sid: SessionId,
    has_cookie: bool,
    payload: SessionPayload,
    session: HydratedSession,
    payload_dirty: bool,
    finished: bool,
}

impl SessionUsers {
    /// Resolve the session named by the request's cookie.
    ///
    /// A missing or forged cookie starts a fresh session. Nothing is
    /// written until the session changes.
    ///
    /// # Errors
    ///
    /// Returns error if the session store fails.
    pub async fn load(auth: Arc<AuthState>, headers: &HeaderMap) -> Result<Self, ApiError> {
        let (sid, has_cookie) = match auth.cookies.from_headers(headers) {
            Some(sid) => (sid, true),
            None => (SessionId::generate(), false),
        };

        let payload = if has_cookie {
            auth.sessions.load(&sid).await?
        } else {
            SessionPayload::new(Duration::ZERO)
        };

        let session =
            HydratedSession::hydrate(payload.identities.clone(), auth.users.as_ref(), auth.dangling)
                .await;
        tracing::debug!(session = ?sid, members = session.identities().len(), "Session hydrated");

        Ok(Self {
            auth,
            sid,
            has_cookie,
            payload,
            session,
            payload_dirty: false,
            finished: false,
        })
    }

    /// Remember the state issued for an OAuth redirect.
    pub fn set_oauth_state(&mut self, state: String) {
        self.payload.oauth_state = Some(state);
        self.payload_dirty = true;
    }

    /// Consume the pending OAuth state. It is single use.
    pub fn take_oauth_state(&mut self) -> Option<String> {
        let state = self.payload.oauth_state.take();
        if state.is_some() {
            self.payload_dirty = true;
        }
        state
    }

    /// Whether anything must be written back.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.payload_dirty || self.session.is_modified()
    }

    /// Whether a stored, signed-in session has used up half its lifetime.
    ///
    /// Saving it again pushes the expiry out. A busy session is rewritten
    /// at most once per half TTL.
    #[must_use]
    pub fn needs_renewal(&self) -> bool {
        if !self.has_cookie || self.payload.identities.is_empty() {
            return false;
        }
        let half = self.auth.cookies.max_age() / 2;
        chrono::Duration::from_std(half)
            .is_ok_and(|half| self.payload.expires_at - Utc::now() < half)
    }

    /// Persist any change, then return `response` with the session cookie.
    ///
    /// If persisting fails the prepared response is discarded and a 500 is
    /// returned instead, so a client never sees a success that was not saved.
    pub async fn finish(mut self, response: impl IntoResponse) -> Response {
        self.finished = true;
        let mut response = response.into_response();
        if !self.is_dirty() && !self.needs_renewal() {
            return response;
        }

        let mut payload = self.payload.clone();
        payload.identities = self.session.identities().clone();
        let sessions = &self.auth.sessions;

        let cookie = if payload.identities.is_empty() && payload.oauth_state.is_none() {
            if let Err(e) = sessions.destroy(&self.sid).await {
                tracing::warn!(session = ?self.sid, error = %e, "Failed to destroy session");
                return ApiError::from(e).into_response();
            }
            tracing::debug!(session = ?self.sid, "Session emptied");
            self.has_cookie
                .then(|| self.auth.cookies.clear_cookie())
                .flatten()
        } else {
            // A login is never persisted under an id the client already held.
            let previous = (self.has_cookie && self.session.is_escalated())
                .then(|| std::mem::replace(&mut self.sid, SessionId::generate()));

            if let Err(e) = sessions.save(&self.sid, &payload).await {
                tracing::warn!(session = ?self.sid, error = %e, "Failed to save session");
                return ApiError::from(e).into_response();
            }
            if let Some(previous) = previous {
                if let Err(e) = sessions.destroy(&previous).await {
                    tracing::warn!(session = ?previous, error = %e, "Failed to retire session id");
                    return ApiError::from(e).into_response();
                }
                tracing::debug!(from = ?previous, to = ?self.sid, "Session id rotated");
            }
            self.auth.cookies.set_cookie(&self.sid)
        };

        if let Some(cookie) = cookie {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        response
    }
}

impl Deref for SessionUsers {
    type Target = HydratedSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for SessionUsers {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for SessionUsers {
    fn drop(&mut self) {
        if !self.finished && self.is_dirty() {
            tracing::warn!(session = ?self.sid, "Session changed but was never persisted");
        }
    }
}

impl<S> FromRequestParts<S> for SessionUsers
where
    S: Send + Sync,
    Arc<AuthState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<AuthState>::from_ref(state);
        Self::load(auth, &parts.headers).await
    }
}

/// Extractor for pages that need a signed-in user.
///
/// Rejects with a redirect to `/login` when nobody is active.
pub struct RequireUser {
    /// The active user.
    pub user: UserRecord,
    /// The session it came from.
    pub session: SessionUsers,
}

impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
    Arc<AuthState>: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = SessionUsers::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match session.current().cloned() {
            Some(user) => Ok(Self { user, session }),
            // Hydration may have pruned members; keep that even when rejecting.
            None => Err(session
                .finish(ApiError::Identity(IdentityError::Unauthenticated))
                .await),
        }
    }
}
