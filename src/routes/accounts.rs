use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    routing::post,
    Form, Json, Router,
};
use axum_extra::extract::{cookie::PrivateCookieJar, WithRejection};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    auth::{self, CurrentUser, NewUser},
    error::{AppError, FieldErrors, NON_FIELD_ERRORS},
    models::user::{UserGroup, UserProfile, UserResponse},
    services::media::MediaStorage,
    state::AppState,
};

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";
const TOO_LONG: &str = "Ensure this field has no more than 150 characters.";
const INVALID_USERNAME: &str = "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";
const INVALID_IMAGE: &str = "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
const BAD_CREDENTIALS: &str = "Please enter a correct username and password. Note that both fields may be case-sensitive.";
const MAX_NAME_LEN: usize = 150;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sign_up/", post(sign_up))
        .route("/log_in/", post(log_in))
        .route("/log_out/", post(log_out))
}

#[derive(Debug)]
struct PhotoUpload {
    file_name: String,
    data: Bytes,
}

#[derive(Debug, Default)]
struct SignUpForm {
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    password1: Option<String>,
    password2: Option<String>,
    group: Option<String>,
    photo: Option<PhotoUpload>,
}

#[derive(Debug)]
struct ValidPhoto {
    extension: String,
    data: Bytes,
}

#[derive(Debug)]
struct ValidSignUp {
    user: NewUser,
    photo: Option<ValidPhoto>,
}

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::BadRequest(format!("malformed multipart body: {err}"))
}

impl SignUpForm {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            if name == "photo" {
                let file_name = field.file_name().map(str::to_owned);
                let data = field.bytes().await.map_err(bad_multipart)?;
                // an empty file part means "no photo"
                form.photo = match file_name {
                    Some(file_name) if !file_name.is_empty() && !data.is_empty() => {
                        Some(PhotoUpload { file_name, data })
                    }
                    _ => None,
                };
                continue;
            }
            let value = field.text().await.map_err(bad_multipart)?;
            match name.as_str() {
                "username" => form.username = Some(value),
                "first_name" => form.first_name = Some(value),
                "last_name" => form.last_name = Some(value),
                "password1" => form.password1 = Some(value),
                "password2" => form.password2 = Some(value),
                "group" => form.group = Some(value),
                _ => {}
            }
        }
        Ok(form)
    }

    fn validate(self) -> Result<ValidSignUp, FieldErrors> {
        let mut errors = FieldErrors::new();

        let username = required_text(&mut errors, "username", self.username.as_deref(), true);
        if let Some(username) = username.as_deref() {
            if username.chars().count() > MAX_NAME_LEN {
                errors.add("username", TOO_LONG);
            } else if !username
                .chars()
                .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
            {
                errors.add("username", INVALID_USERNAME);
            }
        }

        let first_name = optional_name(&mut errors, "first_name", self.first_name);
        let last_name = optional_name(&mut errors, "last_name", self.last_name);
        let password1 = required_text(&mut errors, "password1", self.password1.as_deref(), false);
        let password2 = required_text(&mut errors, "password2", self.password2.as_deref(), false);

        let group = required_text(&mut errors, "group", self.group.as_deref(), true).and_then(
            |raw| match raw.parse::<UserGroup>() {
                Ok(group) => Some(group),
                Err(err) => {
                    errors.add("group", err.to_string());
                    None
                }
            },
        );

        let photo = self.photo.and_then(|upload| {
            match MediaStorage::image_extension(&upload.file_name, &upload.data) {
                Some(extension) => Some(ValidPhoto {
                    extension,
                    data: upload.data,
                }),
                None => {
                    errors.add("photo", INVALID_IMAGE);
                    None
                }
            }
        });

        // cross-field checks only run once every field is valid on its own
        if errors.is_empty() && password1 != password2 {
            errors.add(NON_FIELD_ERRORS, "Passwords must match.");
        }

        match (username, password1, group) {
            (Some(username), Some(password), Some(group)) if errors.is_empty() => Ok(ValidSignUp {
                user: NewUser {
                    username,
                    first_name,
                    last_name,
                    password,
                    group: Some(group),
                    photo: None,
                },
                photo,
            }),
            _ => Err(errors),
        }
    }
}

fn required_text(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
    trim: bool,
) -> Option<String> {
    let Some(value) = value else {
        errors.add(field, REQUIRED);
        return None;
    };
    let value = if trim { value.trim() } else { value };
    if value.is_empty() {
        errors.add(field, BLANK);
        return None;
    }
    Some(value.to_string())
}

fn optional_name(errors: &mut FieldErrors, field: &str, value: Option<String>) -> String {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.chars().count() > MAX_NAME_LEN {
        errors.add(field, TOO_LONG);
    }
    value
}

async fn sign_up(
    State(state): State<AppState>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let form = SignUpForm::from_multipart(multipart).await?;
    let ValidSignUp { mut user, photo } = form.validate().map_err(AppError::Validation)?;

    let stored_photo = match photo {
        Some(photo) => Some(state.media.save_photo(&photo.extension, &photo.data).await?),
        None => None,
    };
    user.photo = stored_photo.clone();

    let created = match auth::register_user(&state, user).await {
        Ok(created) => created,
        Err(err) => {
            if let Some(name) = stored_photo {
                if let Err(cleanup) = state.media.remove(&name).await {
                    warn!("failed to remove orphaned photo {name}: {cleanup}");
                }
            }
            return Err(err);
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(UserResponse::new(UserProfile::from(created), &state.media)),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogInForm {
    username: Option<String>,
    password: Option<String>,
}

/// Accepts a JSON body, or a urlencoded form for anything else.
#[async_trait]
impl<S> FromRequest<S> for LogInForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim_start().starts_with("application/json"));
        if is_json {
            let Json(form) = Json::<LogInForm>::from_request(req, state).await?;
            Ok(form)
        } else {
            let Form(form) = Form::<LogInForm>::from_request(req, state).await?;
            Ok(form)
        }
    }
}

async fn log_in(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    form: LogInForm,
) -> Result<(PrivateCookieJar, Json<UserResponse>), AppError> {
    let mut errors = FieldErrors::new();
    let username = required_text(&mut errors, "username", form.username.as_deref(), false);
    let password = required_text(&mut errors, "password", form.password.as_deref(), false);
    errors.into_result()?;
    let (Some(username), Some(password)) = (username, password) else {
        return Err(AppError::BadRequest("username and password are required".into()));
    };

    let user = match auth::authenticate_user(&state, &username, &password).await {
        Ok(user) => user,
        Err(AppError::Unauthorized) => {
            return Err(AppError::Validation(FieldErrors::single(
                "__all__",
                BAD_CREDENTIALS,
            )))
        }
        Err(err) => return Err(err),
    };

    if let Some(previous) = jar.get(auth::SESSION_COOKIE) {
        auth::destroy_session(&state, previous.value()).await?;
    }
    let session_id = auth::create_session(&state, user.id).await?;
    info!(user_id = user.id, "user logged in");

    Ok((
        auth::apply_session_cookie(jar, &session_id),
        Json(UserResponse::new(UserProfile::from(user), &state.media)),
    ))
}

async fn log_out(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, StatusCode), AppError> {
    let user = current.require_user()?;
    if let Some(cookie) = jar.get(auth::SESSION_COOKIE) {
        auth::destroy_session(&state, cookie.value()).await?;
    }
    info!(user_id = user.id, "user logged out");
    Ok((auth::clear_session_cookie(jar), StatusCode::NO_CONTENT))
}
