#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use taxi::{
    auth::{self, NewUser},
    config::AppConfig,
    models::{
        trip::{NewTrip, Trip, TripStatus},
        user::{User, UserGroup},
    },
    routes::create_router,
    state::AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const PASSWORD: &str = "pAssw0rd!";
/// PNG signature plus the start of an IHDR chunk.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";
const BOUNDARY: &str = "taxi-test-boundary";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _root: TempDir,
}

pub async fn spawn_app() -> TestApp {
    let root = TempDir::new().expect("create temp dir");
    let database_url = format!(
        "sqlite://{}",
        root.path().join("taxi.sqlite").to_string_lossy()
    );
    let config = AppConfig {
        database_url,
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        media_root: root.path().join("media"),
        media_url: "/media/".into(),
        cookie_secret: "test-cookie-secret".into(),
        session_ttl_hours: 1,
    };
    let state = AppState::initialise(config)
        .await
        .expect("initialise app state");
    let router = create_router(state.clone());
    TestApp {
        state,
        router,
        _root: root,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `name=value` of the session cookie set by this response.
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|pair| pair.starts_with(&format!("{}=", auth::SESSION_COOKIE)))
            .map(str::to_owned)
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: Value, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_form(&self, uri: &str, body: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_owned())).unwrap())
            .await
    }

    pub async fn sign_up(
        &self,
        fields: &[(&str, &str)],
        photo: Option<(&str, &[u8])>,
    ) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri("/api/sign_up/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, photo)))
            .unwrap();
        self.send(request).await
    }

    pub async fn log_in(&self, username: &str, password: &str) -> TestResponse {
        self.post_json(
            "/api/log_in/",
            serde_json::json!({ "username": username, "password": password }),
            None,
        )
        .await
    }

    /// Logs in and returns the cookie header value for later requests.
    pub async fn session_for(&self, username: &str) -> String {
        let response = self.log_in(username, PASSWORD).await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        response.session_cookie().expect("session cookie")
    }

    pub async fn create_user(&self, username: &str, group: Option<UserGroup>) -> User {
        let new_user = match group {
            Some(group) => NewUser::new(username, PASSWORD).with_group(group),
            None => NewUser::new(username, PASSWORD),
        };
        auth::register_user(&self.state, new_user)
            .await
            .expect("register user")
    }

    pub async fn create_trip(&self, pick_up: &str, drop_off: &str, rider: Option<&User>) -> Trip {
        self.state
            .trips
            .create(NewTrip {
                pick_up_address: pick_up.into(),
                drop_off_address: drop_off.into(),
                rider_id: rider.map(|user| user.id),
            })
            .await
            .expect("create trip")
    }

    pub async fn assign_driver(&self, trip: &Trip, driver: &User, status: TripStatus) -> Trip {
        self.state
            .trips
            .update(&trip.id, status, Some(driver.id))
            .await
            .expect("assign driver")
    }

    pub async fn user_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.state.db)
            .await
            .expect("count users")
    }
}

pub fn multipart_body(fields: &[(&str, &str)], photo: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, data)) = photo {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn trip_ids(body: &Value) -> Vec<String> {
    let mut ids: Vec<String> = body
        .as_array()
        .expect("trip list is an array")
        .iter()
        .map(|trip| trip["id"].as_str().expect("trip id").to_owned())
        .collect();
    ids.sort();
    ids
}
