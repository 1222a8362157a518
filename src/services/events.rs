use tokio::sync::broadcast;
use tracing::debug;

use crate::models::trip::TripDetail;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripEventKind {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct TripEvent {
    pub kind: TripEventKind,
    pub trip: TripDetail,
}

/// Fan-out of trip changes to every open websocket.
#[derive(Debug, Clone)]
pub struct TripEvents {
    sender: broadcast::Sender<TripEvent>,
}

impl Default for TripEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TripEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TripEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, kind: TripEventKind, trip: TripDetail) -> usize {
        let trip_id = trip.trip.id.clone();
        match self.sender.send(TripEvent { kind, trip }) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(%trip_id, "no websocket listeners for trip event");
                0
            }
        }
    }
}
