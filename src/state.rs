use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    config::AppConfig,
    db::{self, DbPool},
    error::AppError,
    services::{events::TripEvents, media::MediaStorage, trips::TripStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub media: MediaStorage,
    pub trips: TripStore,
    pub events: TripEvents,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        let media = MediaStorage::new(config.media_root.clone(), config.media_url.clone());
        let trips = TripStore::new(db.clone());
        Self {
            config,
            db,
            media,
            trips,
            events: TripEvents::default(),
            cookie_key,
        }
    }

    /// Connects the pool, applies migrations and prepares the media directory.
    pub async fn initialise(config: AppConfig) -> Result<Self, AppError> {
        let pool = db::init_pool(&config.database_url).await?;
        db::run_migrations(&pool).await?;
        let state = Self::new(config, pool);
        state.media.ensure_structure().await?;
        Ok(state)
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
