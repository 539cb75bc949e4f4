//! HTTP routes.

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    middleware as axum_middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use lanyard_core::identity::SessionState;
use lanyard_core::store::CredentialStore;
use lanyard_core::types::UserId;
use lanyard_core::user::{NewUser, PublicUser, UserRecord};
use lanyard_core::validation::{
    ProfileInput, RegistrationInput, normalize_username, validate_profile_update,
    validate_registration,
};

use crate::auth::{ApiError, RequireUser, SessionUsers};
use crate::middleware::limit_credentials;
use crate::oauth::OAuthError;
use crate::server::GatewayState;

const OAUTH_STATE_BYTES: usize = 16;

/// Build the application router.
pub fn router(state: GatewayState) -> Router {
    let credentials = Router::new()
        .route("/login", post(login_handler))
        .route("/register", post(register_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            limit_credentials,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(home_handler))
        .route("/switch", get(switch_handler))
        .route("/logout", get(logout_handler))
        .route("/logoutAll", get(logout_all_handler))
        .route("/me", get(me_handler))
        .route("/account", post(account_handler))
        .route("/oauth/discord", get(oauth_start_handler))
        .route("/oauth/discord/callback", get(oauth_callback_handler))
        .route("/discord", get(discord_handler))
        .merge(credentials)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.server.timeout()))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct HomeView {
    current: PublicUser,
    users: Vec<PublicUser>,
    state: SessionState,
}

async fn home_handler(users: SessionUsers) -> Response {
    let view = users.current().map(|current| HomeView {
        current: current.to_public(),
        users: users.all().into_iter().map(UserRecord::to_public).collect(),
        state: users.state(),
    });

    match view {
        Some(view) => users.finish(Json(view)).await,
        None => users.finish(Redirect::to("/register")).await,
    }
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn authenticate(
    store: &dyn CredentialStore,
    form: &LoginForm,
) -> Result<UserRecord, ApiError> {
    let user = store
        .find_by_username(&normalize_username(&form.username))
        .await?
        .ok_or(ApiError::InvalidCredentials("no user with that username"))?;

    if !store.verify_password(&user, &form.password) {
        return Err(ApiError::InvalidCredentials("incorrect password"));
    }
    Ok(user)
}

async fn login_handler(
    State(state): State<GatewayState>,
    mut users: SessionUsers,
    Form(form): Form<LoginForm>,
) -> Response {
    match authenticate(state.auth.users.as_ref(), &form).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, username = %user.username, "User logged in");
            users.login(user);
            users.finish(Redirect::to("/")).await
        }
        Err(e) => {
            tracing::debug!(username = %form.username, error = %e, "Login refused");
            users.finish(e).await
        }
    }
}

async fn register(state: &GatewayState, input: &RegistrationInput) -> Result<UserRecord, ApiError> {
    let policy = &state.config.registration;
    if !policy.enabled {
        return Err(ApiError::RegistrationClosed);
    }

    let registration = validate_registration(input, policy)?;
    let new_user = registration.into_new_user()?;
    Ok(state.auth.users.create(new_user).await?)
}

async fn register_handler(
    State(state): State<GatewayState>,
    mut users: SessionUsers,
    Form(input): Form<RegistrationInput>,
) -> Response {
    match register(&state, &input).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, username = %user.username, "User registered");
            users.login(user);
            users.finish(Redirect::to("/")).await
        }
        Err(e) => users.finish(e).await,
    }
}

#[derive(Debug, Deserialize)]
struct SwitchQuery {
    id: String,
}

async fn switch_handler(mut users: SessionUsers, Query(query): Query<SwitchQuery>) -> Response {
    let id = UserId::new(query.id);
    let result = users.switch(&id).map(|user| {
        tracing::info!(user_id = %user.id, "Switched active identity");
    });

    match result {
        Ok(()) => users.finish(Redirect::to("/")).await,
        Err(e) => users.finish(ApiError::from(e)).await,
    }
}

#[derive(Debug, Deserialize)]
struct LogoutQuery {
    #[serde(default)]
    id: Option<String>,
}

async fn logout_handler(mut users: SessionUsers, Query(query): Query<LogoutQuery>) -> Response {
    let target = query
        .id
        .map(UserId::new)
        .or_else(|| users.identities().active().cloned());

    if let Some(id) = target {
        if users.logout(&id) {
            tracing::info!(user_id = %id, "User logged out");
        }
    }
    users.finish(Redirect::to("/")).await
}

async fn logout_all_handler(mut users: SessionUsers) -> Response {
    let count = users.identities().len();
    users.logout_all();
    tracing::info!(count, "All identities logged out");
    users.finish(Redirect::to("/")).await
}

async fn me_handler(RequireUser { user, session }: RequireUser) -> Response {
    session.finish(Json(user.to_public())).await
}

async fn update_account(
    state: &GatewayState,
    user: &UserRecord,
    input: &ProfileInput,
) -> Result<UserRecord, ApiError> {
    let update = validate_profile_update(user, input, &state.config.registration)?;
    let mut record = user.clone();
    if update.is_empty() {
        return Ok(record);
    }

    update.apply(&mut record)?;
    state.auth.users.save(&record).await?;
    tracing::info!(user_id = %record.id, username = %record.username, "Account updated");
    Ok(record)
}

async fn account_handler(
    State(state): State<GatewayState>,
    RequireUser { user, mut session }: RequireUser,
    Form(input): Form<ProfileInput>,
) -> Response {
    match update_account(&state, &user, &input).await {
        Ok(record) => {
            session.refresh(record);
            session.finish(Redirect::to("/")).await
        }
        Err(e) => session.finish(e).await,
    }
}

async fn oauth_start_handler(
    State(state): State<GatewayState>,
    mut users: SessionUsers,
) -> Response {
    let Some(oauth) = state.oauth.clone() else {
        return users.finish(ApiError::NotConfigured("Discord login")).await;
    };

    let mut bytes = [0u8; OAUTH_STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let csrf_state = hex::encode(bytes);

    match oauth.authorization_url(&csrf_state) {
        Ok(url) => {
            users.set_oauth_state(csrf_state);
            users.finish(Redirect::to(&url)).await
        }
        Err(e) => users.finish(ApiError::from(e)).await,
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn oauth_login(
    state: &GatewayState,
    expected_state: Option<String>,
    query: CallbackQuery,
) -> Result<UserRecord, ApiError> {
    let oauth = state
        .oauth
        .as_ref()
        .ok_or(ApiError::NotConfigured("Discord login"))?;

    if let Some(error) = query.error {
        return Err(OAuthError::Denied(error).into());
    }
    match (expected_state, query.state) {
        (Some(expected), Some(got)) if expected == got => {}
        _ => return Err(OAuthError::StateMismatch.into()),
    }
    let code = query
        .code
        .ok_or_else(|| OAuthError::Denied("missing code".to_string()))?;

    let token = oauth.exchange_code(&code).await?;
    let external = oauth.fetch_profile(&token).await?;

    let users = &state.auth.users;
    match users
        .find_by_external_identity(&external.provider, &external.external_id)
        .await?
    {
        Some(mut user) => {
            if user.external() != Some(&external) {
                user.link_external(external);
                users.save(&user).await?;
            }
            Ok(user)
        }
        None => {
            let user = users.create(NewUser::linked(external)).await?;
            tracing::info!(user_id = %user.id, username = %user.username, "Created linked account");
            Ok(user)
        }
    }
}

async fn oauth_callback_handler(
    State(state): State<GatewayState>,
    mut users: SessionUsers,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let expected = users.take_oauth_state();
    match oauth_login(&state, expected, query).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, username = %user.username, "User logged in via OAuth");
            users.login(user);
            users.finish(Redirect::to("/")).await
        }
        Err(e) => users.finish(e).await,
    }
}

async fn discord_handler(State(state): State<GatewayState>) -> Response {
    match &state.config.discord.invite {
        Some(invite) => Redirect::to(invite).into_response(),
        None => ApiError::NotConfigured("Discord invite").into_response(),
    }
}
