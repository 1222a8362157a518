use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{AppError, FieldErrors},
    models::{
        session::Session,
        trip::TripScope,
        user::{User, UserGroup},
    },
    state::AppState,
};

pub const SESSION_COOKIE: &str = "taxi_sessionid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
    pub group: Option<UserGroup>,
}

impl AuthenticatedUser {
    pub fn trip_scope(&self) -> Option<TripScope> {
        TripScope::for_member(self.id, self.group)
    }

    pub fn require_group(&self, group: UserGroup) -> Result<(), AppError> {
        if self.group == Some(group) {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

impl From<&User> for AuthenticatedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            group: user.group,
        }
    }
}

/// The user attached to the request by [`session_layer`], if any.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }

    pub fn require_group(&self, group: UserGroup) -> Result<&AuthenticatedUser, AppError> {
        let user = self.require_user()?;
        user.require_group(group)?;
        Ok(user)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub group: Option<UserGroup>,
    pub photo: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
            password: password.into(),
            group: None,
            photo: None,
        }
    }

    pub fn with_group(mut self, group: UserGroup) -> Self {
        self.group = Some(group);
        self
    }
}

pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AppError::Other(anyhow!("failed to hash password: {err}")))
    })
    .await
    .map_err(|err| AppError::Other(err.into()))?
}

pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let password = password.to_owned();
    let password_hash = password_hash.to_owned();
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|err| AppError::Other(anyhow!("stored password hash is invalid: {err}")))?;
        Ok::<_, AppError>(
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
        )
    })
    .await
    .map_err(|err| AppError::Other(err.into()))?
}

pub async fn find_user_by_username(
    state: &AppState,
    username: &str,
) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?1")
        .bind(username)
        .fetch_optional(&state.db)
        .await?;
    Ok(user)
}

fn duplicate_username() -> AppError {
    AppError::Validation(FieldErrors::single(
        "username",
        "A user with that username already exists.",
    ))
}

pub async fn register_user(state: &AppState, new_user: NewUser) -> Result<User, AppError> {
    if find_user_by_username(state, &new_user.username)
        .await?
        .is_some()
    {
        return Err(duplicate_username());
    }

    let password_hash = hash_password(&new_user.password).await?;
    let inserted = sqlx::query_as::<_, User>(
        r#"INSERT INTO users (username, password_hash, first_name, last_name, group_name, photo, date_joined)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           RETURNING *"#,
    )
    .bind(&new_user.username)
    .bind(&password_hash)
    .bind(&new_user.first_name)
    .bind(&new_user.last_name)
    .bind(new_user.group)
    .bind(&new_user.photo)
    .bind(Utc::now())
    // SQLite only commits a RETURNING statement once every row has been read
    .fetch_all(&state.db)
    .await;

    match inserted {
        Ok(rows) => {
            let user = rows
                .into_iter()
                .next()
                .ok_or_else(|| AppError::Other(anyhow!("user insert returned no row")))?;
            info!(user_id = user.id, username = %user.username, "registered user");
            Ok(user)
        }
        // lost a race against a concurrent sign-up
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(duplicate_username()),
        Err(err) => Err(err.into()),
    }
}

/// Checks credentials and stamps `last_login`. Any mismatch is `Unauthorized`.
pub async fn authenticate_user(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<User, AppError> {
    let Some(mut user) = find_user_by_username(state, username).await? else {
        debug!(%username, "login for unknown user");
        return Err(AppError::Unauthorized);
    };
    if !verify_password(password, &user.password_hash).await? {
        debug!(%username, "login with wrong password");
        return Err(AppError::Unauthorized);
    }

    let now = Utc::now();
    sqlx::query("UPDATE users SET last_login = ?1 WHERE id = ?2")
        .bind(now)
        .bind(user.id)
        .execute(&state.db)
        .await?;
    user.last_login = Some(now);
    Ok(user)
}

/// Expiry for a session opened at `now`.
pub fn session_expiry(now: DateTime<Utc>, ttl_hours: i64) -> Result<DateTime<Utc>, AppError> {
    Duration::try_hours(ttl_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AppError::Config(format!("session lifetime of {ttl_hours}h is out of range")))
}

pub async fn create_session(state: &AppState, user_id: i64) -> Result<String, AppError> {
    let now = Utc::now();
    prune_expired_sessions(state, now).await?;
    let session = Session {
        id: Uuid::new_v4().simple().to_string(),
        user_id,
        created_at: now,
        last_seen_at: now,
        expires_at: Some(session_expiry(now, state.config.session_ttl_hours)?),
    };
    sqlx::query(
        r#"INSERT INTO sessions (id, user_id, created_at, last_seen_at, expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
    )
    .bind(&session.id)
    .bind(session.user_id)
    .bind(session.created_at)
    .bind(session.last_seen_at)
    .bind(session.expires_at)
    .execute(&state.db)
    .await?;
    Ok(session.id)
}

pub async fn destroy_session(state: &AppState, session_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?1")
        .bind(session_id)
        .execute(&state.db)
        .await?;
    Ok(())
}

pub async fn prune_expired_sessions(state: &AppState, now: DateTime<Utc>) -> Result<u64, AppError> {
    let result =
        sqlx::query("DELETE FROM sessions WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(now)
            .execute(&state.db)
            .await?;
    if result.rows_affected() > 0 {
        debug!(pruned = result.rows_affected(), "removed expired sessions");
    }
    Ok(result.rows_affected())
}

/// Resolves a session id to its user and marks the session as seen.
/// Expired sessions are removed on sight.
pub async fn load_session_user(
    state: &AppState,
    session_id: &str,
) -> Result<Option<AuthenticatedUser>, AppError> {
    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?1")
        .bind(session_id)
        .fetch_optional(&state.db)
        .await?;
    let Some(session) = session else {
        return Ok(None);
    };
    let now = Utc::now();
    if session.is_expired(now) {
        destroy_session(state, &session.id).await?;
        return Ok(None);
    }
    sqlx::query("UPDATE sessions SET last_seen_at = ?1 WHERE id = ?2")
        .bind(now)
        .bind(&session.id)
        .execute(&state.db)
        .await?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
        .bind(session.user_id)
        .fetch_optional(&state.db)
        .await?;
    Ok(user.as_ref().map(AuthenticatedUser::from))
}

pub fn apply_session_cookie(jar: PrivateCookieJar, session_id: &str) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_owned()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

/// Attaches the session user, if any, to the request extensions.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(user) = load_session_user(&state, cookie.value()).await? {
            request.extensions_mut().insert(user);
        }
    }
    Ok(next.run(request).await)
}

/// Rejects anonymous requests before they reach the wrapped route.
pub async fn require_authenticated(
    current: CurrentUser,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    current.require_user()?;
    Ok(next.run(request).await)
}
