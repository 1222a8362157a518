//! Websocket endpoint for live trip updates.
//!
//! Frames are JSON objects of the form `{"type": ..., "data": ...}`. Riders
//! request trips with `create.trip`, drivers take requested trips or move their
//! own along with `update.trip`, and every connection is pushed `trip.created` /
//! `trip.updated` events for the trips its user is allowed to list.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    middleware,
    response::Response,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{self, AuthenticatedUser, CurrentUser},
    error::AppError,
    models::{
        trip::{NewTrip, TripResponse, TripStatus},
        user::UserGroup,
    },
    services::events::{TripEvent, TripEventKind},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/taxi/", get(taxi_socket))
        .route_layer(middleware::from_fn(auth::require_authenticated))
}

async fn taxi_socket(
    State(state): State<AppState>,
    current: CurrentUser,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let user = current.require_user()?.clone();
    Ok(ws.on_upgrade(move |socket| TripConsumer::new(state, user).run(socket)))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TripRequest {
    pub pick_up_address: String,
    pub drop_off_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TripUpdate {
    pub id: String,
    pub status: TripStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "echo.message")]
    Echo(Value),
    #[serde(rename = "create.trip")]
    CreateTrip(TripRequest),
    #[serde(rename = "update.trip")]
    UpdateTrip(TripUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "echo.message")]
    Echo(Value),
    #[serde(rename = "trip.created")]
    TripCreated(TripResponse),
    #[serde(rename = "trip.updated")]
    TripUpdated(TripResponse),
    #[serde(rename = "error")]
    Error { detail: String },
}

impl ServerMessage {
    fn error(detail: impl Into<String>) -> Self {
        ServerMessage::Error {
            detail: detail.into(),
        }
    }
}

/// One authenticated websocket connection.
pub struct TripConsumer {
    state: AppState,
    user: AuthenticatedUser,
}

impl TripConsumer {
    pub fn new(state: AppState, user: AuthenticatedUser) -> Self {
        Self { state, user }
    }

    pub async fn run(self, mut socket: WebSocket) {
        let mut events = self.state.events.subscribe();
        info!(user_id = self.user.id, "websocket connected");

        loop {
            tokio::select! {
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = self.handle_text(&text).await {
                            if send(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(user_id = self.user.id, "websocket receive failed: {err}");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(message) = self.filter_event(event) {
                            if send(&mut socket, &message).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(user_id = self.user.id, skipped, "websocket fell behind trip events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!(user_id = self.user.id, "websocket disconnected");
    }

    /// Handles one client frame. Trip changes are announced through the event
    /// channel, so only echoes and errors produce a direct reply.
    pub async fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(user_id = self.user.id, "unreadable websocket frame: {err}");
                return Some(ServerMessage::error(format!("invalid message: {err}")));
            }
        };

        match self.handle(message).await {
            Ok(reply) => reply,
            Err(AppError::Forbidden) => Some(ServerMessage::error(AppError::Forbidden.to_string())),
            Err(AppError::NotFound) => Some(ServerMessage::error(AppError::NotFound.to_string())),
            Err(AppError::BadRequest(detail)) => Some(ServerMessage::error(detail)),
            Err(err) => {
                warn!(user_id = self.user.id, "websocket message failed: {err:?}");
                Some(ServerMessage::error("Internal server error."))
            }
        }
    }

    async fn handle(&self, message: ClientMessage) -> Result<Option<ServerMessage>, AppError> {
        match message {
            ClientMessage::Echo(data) => Ok(Some(ServerMessage::Echo(data))),
            ClientMessage::CreateTrip(request) => {
                self.user.require_group(UserGroup::Rider)?;
                let pick_up_address = request.pick_up_address.trim().to_string();
                let drop_off_address = request.drop_off_address.trim().to_string();
                if pick_up_address.is_empty() || drop_off_address.is_empty() {
                    return Err(AppError::BadRequest(
                        "pick-up and drop-off addresses are required".into(),
                    ));
                }
                let trip = self
                    .state
                    .trips
                    .create(NewTrip {
                        pick_up_address,
                        drop_off_address,
                        rider_id: Some(self.user.id),
                    })
                    .await?;
                info!(user_id = self.user.id, trip_id = %trip.id, "trip requested");
                self.announce(TripEventKind::Created, &trip.id).await?;
                Ok(None)
            }
            ClientMessage::UpdateTrip(update) => {
                self.user.require_group(UserGroup::Driver)?;
                let scope = self.user.trip_scope().ok_or(AppError::Forbidden)?;
                let trip_id = Uuid::parse_str(&update.id).map_err(|_| AppError::NotFound)?;
                let trip = self
                    .state
                    .trips
                    .update_visible(scope, &trip_id.to_string(), update.status, Some(self.user.id))
                    .await?;
                info!(user_id = self.user.id, trip_id = %trip.id, status = %trip.status, "trip updated");
                self.announce(TripEventKind::Updated, &trip.id).await?;
                Ok(None)
            }
        }
    }

    async fn announce(&self, kind: TripEventKind, trip_id: &str) -> Result<(), AppError> {
        let detail = self
            .state
            .trips
            .find_detail(trip_id)
            .await?
            .ok_or(AppError::NotFound)?;
        self.state.events.publish(kind, detail);
        Ok(())
    }

    /// The message this connection should see for an event, if any.
    pub fn filter_event(&self, event: TripEvent) -> Option<ServerMessage> {
        let scope = self.user.trip_scope()?;
        if !scope.permits(&event.trip.trip) {
            return None;
        }
        let trip = TripResponse::new(event.trip, &self.state.media);
        Some(match event.kind {
            TripEventKind::Created => ServerMessage::TripCreated(trip),
            TripEventKind::Updated => ServerMessage::TripUpdated(trip),
        })
    }
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(err) => {
            warn!("failed to encode websocket message: {err}");
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}
