use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::{
    models::user::{UserGroup, UserProfile, UserResponse},
    services::media::MediaStorage,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    #[default]
    Requested,
    Started,
    InProgress,
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "REQUESTED",
            TripStatus::Started => "STARTED",
            TripStatus::InProgress => "IN_PROGRESS",
            TripStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Trip {
    pub id: String,
    pub pick_up_address: String,
    pub drop_off_address: String,
    pub status: TripStatus,
    pub rider_id: Option<i64>,
    pub driver_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Trip {
    pub fn url(&self) -> String {
        trip_url(&self.id)
    }
}

pub fn trip_url(trip_id: &str) -> String {
    format!("/api/trip/{trip_id}/")
}

#[derive(Debug, Clone)]
pub struct NewTrip {
    pub pick_up_address: String,
    pub drop_off_address: String,
    pub rider_id: Option<i64>,
}

/// A trip together with the users it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripDetail {
    pub trip: Trip,
    pub rider: Option<UserProfile>,
    pub driver: Option<UserProfile>,
}

/// Which trips a user may see. Users without a group see none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripScope {
    Driver(i64),
    Rider(i64),
}

impl TripScope {
    pub fn for_member(user_id: i64, group: Option<UserGroup>) -> Option<Self> {
        match group? {
            UserGroup::Driver => Some(TripScope::Driver(user_id)),
            UserGroup::Rider => Some(TripScope::Rider(user_id)),
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            TripScope::Driver(id) | TripScope::Rider(id) => *id,
        }
    }

    /// SQL predicate over the `t` trips alias; binds the user id as `?1`.
    pub fn sql_filter(&self) -> &'static str {
        match self {
            TripScope::Driver(_) => "(t.status = 'REQUESTED' OR t.driver_id = ?1)",
            TripScope::Rider(_) => "t.rider_id = ?1",
        }
    }

    pub fn permits(&self, trip: &Trip) -> bool {
        match self {
            TripScope::Driver(id) => {
                trip.status == TripStatus::Requested || trip.driver_id == Some(*id)
            }
            TripScope::Rider(id) => trip.rider_id == Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripResponse {
    pub id: String,
    pub pick_up_address: String,
    pub drop_off_address: String,
    pub status: TripStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub rider: Option<UserResponse>,
    pub driver: Option<UserResponse>,
}

impl TripResponse {
    pub fn new(detail: TripDetail, media: &MediaStorage) -> Self {
        let TripDetail {
            trip,
            rider,
            driver,
        } = detail;
        Self {
            id: trip.id,
            pick_up_address: trip.pick_up_address,
            drop_off_address: trip.drop_off_address,
            status: trip.status,
            created: trip.created,
            updated: trip.updated,
            rider: rider.map(|profile| UserResponse::new(profile, media)),
            driver: driver.map(|profile| UserResponse::new(profile, media)),
        }
    }
}
