use std::{env, net::SocketAddr, path::PathBuf};

use crate::error::AppError;

/// Ten years.
const MAX_SESSION_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub media_root: PathBuf,
    pub media_url: String,
    pub cookie_secret: String,
    pub session_ttl_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://taxi.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let media_root = env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("media"));

        let media_url = normalize_media_url(
            env::var("MEDIA_URL").unwrap_or_else(|_| "/media/".to_string()),
        );

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-taxi-session-cookie-secret".to_string());

        let session_ttl_hours = parse_session_ttl(
            &env::var("SESSION_TTL_HOURS").unwrap_or_else(|_| "336".to_string()),
        )?;

        Ok(Self {
            database_url,
            listen_addr,
            media_root,
            media_url,
            cookie_secret,
            session_ttl_hours,
        })
    }
}

fn parse_session_ttl(raw: &str) -> Result<i64, AppError> {
    let hours: i64 = raw
        .trim()
        .parse()
        .map_err(|err| AppError::Config(format!("invalid SESSION_TTL_HOURS: {err}")))?;
    if !(1..=MAX_SESSION_TTL_HOURS).contains(&hours) {
        return Err(AppError::Config(format!(
            "SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}"
        )));
    }
    Ok(hours)
}

/// Media URLs are joined by plain concatenation, so the prefix always ends in `/`.
fn normalize_media_url(raw: String) -> String {
    if raw.ends_with('/') {
        raw
    } else {
        format!("{raw}/")
    }
}
