use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};

use crate::services::media::MediaStorage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserGroup {
    Driver,
    Rider,
}

impl UserGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserGroup::Driver => "driver",
            UserGroup::Rider => "rider",
        }
    }
}

impl fmt::Display for UserGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGroup(pub String);

impl fmt::Display for UnknownGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" is not a valid choice.", self.0)
    }
}

impl FromStr for UserGroup {
    type Err = UnknownGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(UserGroup::Driver),
            "rider" => Ok(UserGroup::Rider),
            other => Err(UnknownGroup(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    #[sqlx(rename = "group_name")]
    pub group: Option<UserGroup>,
    pub photo: Option<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// The columns of a user that may be shown to other users.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[sqlx(rename = "group_name")]
    pub group: Option<UserGroup>,
    pub photo: Option<String>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            group: user.group,
            photo: user.photo,
        }
    }
}

/// Public JSON representation of a user. Passwords never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub group: Option<UserGroup>,
    pub photo: Option<String>,
}

impl UserResponse {
    pub fn new(profile: UserProfile, media: &MediaStorage) -> Self {
        Self {
            id: profile.id,
            username: profile.username,
            first_name: profile.first_name,
            last_name: profile.last_name,
            group: profile.group,
            photo: profile.photo.as_deref().and_then(|name| media.url_for(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_parse_from_their_wire_names() {
        assert_eq!("driver".parse(), Ok(UserGroup::Driver));
        assert_eq!("rider".parse(), Ok(UserGroup::Rider));
        let err = "pilot".parse::<UserGroup>().unwrap_err();
        assert_eq!(err.to_string(), "\"pilot\" is not a valid choice.");
    }

    #[test]
    fn groups_are_case_sensitive() {
        assert!("Driver".parse::<UserGroup>().is_err());
    }

    #[test]
    fn user_response_hides_password_and_builds_photo_url() {
        let media = MediaStorage::new("media".into(), "/media/".into());
        let profile = UserProfile {
            id: 7,
            username: "rider@example.com".into(),
            first_name: "Test".into(),
            last_name: "Rider".into(),
            group: Some(UserGroup::Rider),
            photo: Some("photos/abc.png".into()),
        };
        let json = serde_json::to_value(UserResponse::new(profile, &media)).unwrap();
        assert_eq!(json["photo"], "/media/photos/abc.png");
        assert_eq!(json["group"], "rider");
        assert!(json.get("password").is_none());
        assert!(json.get("password_hash").is_none());
    }
}
