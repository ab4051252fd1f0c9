//! JSON wire types for the HTTP API

use eventstore_core::{Event, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of `POST /events`
#[derive(Debug, Deserialize)]
pub struct EventsRequest {
    pub events: Vec<WireEvent>,
}

/// One submitted event; `ts` and `samplerate` are optional on the wire
#[derive(Debug, Deserialize)]
pub struct WireEvent {
    pub tag: String,
    pub ts: Option<Timestamp>,
    pub samplerate: Option<i64>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl WireEvent {
    /// Convert to a core event, stamping `now` when no timestamp was sent
    pub fn into_event(self, now: Timestamp) -> Event {
        let mut event = Event::new(self.tag, self.ts.unwrap_or(now));
        if let Some(samplerate) = self.samplerate {
            event = event.with_samplerate(samplerate);
        }
        event.data = self.data;
        event
    }
}

impl EventsRequest {
    pub fn into_events(self, now: Timestamp) -> Vec<Event> {
        self.events.into_iter().map(|e| e.into_event(now)).collect()
    }
}

/// Reply to `POST /events`
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ingested: usize,
}

/// Query string of `POST /debug`
#[derive(Debug, Default, Deserialize)]
pub struct DebugParams {
    pub wipe: Option<String>,
}

impl DebugParams {
    /// Accepts `true` in any case, as sent by form encoders
    pub fn wipe_requested(&self) -> bool {
        self.wipe
            .as_deref()
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }
}

/// Reply to `POST /debug`
#[derive(Debug, Serialize, Deserialize)]
pub struct DebugResponse {
    pub wiped: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
