mod common;

use std::{collections::HashMap, fmt};

use axum::http::StatusCode;
use common::{spawn_app, TestApp, TestResponse};
use cucumber::{given, then, when, World as _};
use serde_json::json;
use taxi::{auth, models::user::UserGroup};

#[derive(cucumber::World, Default)]
struct TaxiWorld {
    app: Option<TestApp>,
    sessions: HashMap<String, String>,
    last: Option<TestResponse>,
}

impl fmt::Debug for TaxiWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaxiWorld")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("last_status", &self.last.as_ref().map(|r| r.status))
            .finish()
    }
}

impl TaxiWorld {
    fn app(&self) -> &TestApp {
        self.app.as_ref().expect("state must be initialised first")
    }

    fn last(&self) -> &TestResponse {
        self.last.as_ref().expect("a request must have been made")
    }
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut TaxiWorld) {
    world.app = Some(spawn_app().await);
    world.sessions.clear();
    world.last = None;
}

#[given(regex = r#"^a "(driver|rider)" named "([^"]+)"$"#)]
async fn given_member(world: &mut TaxiWorld, group: String, username: String) {
    let group: UserGroup = group.parse().expect("known group");
    world.app().create_user(&username, Some(group)).await;
}

#[given(regex = r#"^an unassigned trip from "([^"]+)" to "([^"]+)"$"#)]
async fn given_unassigned_trip(world: &mut TaxiWorld, from: String, to: String) {
    world.app().create_trip(&from, &to, None).await;
}

#[given(regex = r#"^a trip from "([^"]+)" to "([^"]+)" requested by "([^"]+)"$"#)]
async fn given_requested_trip(world: &mut TaxiWorld, from: String, to: String, rider: String) {
    let rider = auth::find_user_by_username(&world.app().state, &rider)
        .await
        .expect("query user")
        .expect("rider exists");
    world.app().create_trip(&from, &to, Some(&rider)).await;
}

#[given(regex = r#"^"([^"]+)" is logged in$"#)]
async fn given_logged_in(world: &mut TaxiWorld, username: String) {
    let cookie = world.app().session_for(&username).await;
    world.sessions.insert(username, cookie);
}

#[when(
    regex = r#"^I sign up as "([^"]+)" in group "([^"]+)" with passwords "([^"]*)" and "([^"]*)"$"#
)]
async fn when_sign_up(
    world: &mut TaxiWorld,
    username: String,
    group: String,
    password1: String,
    password2: String,
) {
    let fields = [
        ("username", username.as_str()),
        ("first_name", "Test"),
        ("last_name", "User"),
        ("password1", password1.as_str()),
        ("password2", password2.as_str()),
        ("group", group.as_str()),
    ];
    let response = world.app().sign_up(&fields, None).await;
    world.last = Some(response);
}

#[when(regex = r#"^"([^"]+)" logs out$"#)]
async fn when_log_out(world: &mut TaxiWorld, username: String) {
    let cookie = world.sessions.get(&username).cloned();
    let response = world
        .app()
        .post_json("/api/log_out/", json!({}), cookie.as_deref())
        .await;
    world.last = Some(response);
}

#[when(regex = r#"^"([^"]+)" lists trips$"#)]
async fn when_list_trips(world: &mut TaxiWorld, username: String) {
    let cookie = world.sessions.get(&username).cloned();
    let response = world.app().get("/api/trip/", cookie.as_deref()).await;
    world.last = Some(response);
}

#[then(regex = r"^the response status is (\d+)$")]
async fn then_status(world: &mut TaxiWorld, status: u16) {
    assert_eq!(world.last().status, StatusCode::from_u16(status).unwrap());
}

#[then(regex = r"^there are (\d+) users$")]
async fn then_user_count(world: &mut TaxiWorld, expected: i64) {
    assert_eq!(world.app().user_count().await, expected);
}

#[then(regex = r#"^"([^"]+)" can log in with password "([^"]+)"$"#)]
async fn then_can_log_in(world: &mut TaxiWorld, username: String, password: String) {
    let user = auth::authenticate_user(&world.app().state, &username, &password)
        .await
        .expect("authentication");
    assert_eq!(user.username, username);
    let response = world.app().log_in(&username, &password).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[then(regex = r"^(\d+) trips are listed$")]
async fn then_trips_listed(world: &mut TaxiWorld, expected: usize) {
    let last = world.last();
    assert_eq!(last.status, StatusCode::OK);
    let trips = last.body.as_array().expect("trip list");
    assert_eq!(trips.len(), expected);
}

#[tokio::main]
async fn main() {
    TaxiWorld::cucumber()
        .fail_on_skipped()
        .run_and_exit("tests/features")
        .await;
}
