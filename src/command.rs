//! Requests and replies of the JSON-lines protocol.
//!
//! One request object per line, tagged by `op`:
//!
//! ```text
//! {"op":"create","hall_id":"A","start":1723190400000,"end":1723194000000,"seats":40}
//! ```
//!
//! Every request gets exactly one reply line, either
//! `{"status":"ok","data":...}` or `{"status":"<kind>","error":"..."}`.

use serde::Deserialize;
use serde_json::Value;
use ulid::Ulid;

use crate::model::Ms;
use crate::resolver::{BookingError, BookingRequest};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Halls,
    Create {
        hall_id: String,
        start: Ms,
        end: Ms,
        seats: u32,
    },
    CreateBatch {
        bookings: Vec<BookingRequest>,
    },
    Update {
        id: Ulid,
        start: Ms,
        end: Ms,
        seats: u32,
    },
    Cancel {
        id: Ulid,
    },
    List {
        start: Ms,
        end: Ms,
    },
    AvailableHalls {
        start: Ms,
        end: Ms,
        #[serde(default)]
        min_seats: u32,
    },
    Availability {
        hall_id: String,
        start: Ms,
        end: Ms,
        #[serde(default)]
        min_duration: Option<Ms>,
    },
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bad request: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError("empty request".into()));
    }
    serde_json::from_str(line).map_err(|e| ParseError(e.to_string()))
}

/// A single reply line.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: &'static str,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(data: Value) -> Self {
        Self {
            status: "ok",
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(e: &BookingError) -> Self {
        Self {
            status: e.kind().as_str(),
            data: None,
            error: Some(e.to_string()),
        }
    }

    pub fn bad_request(e: &ParseError) -> Self {
        Self {
            status: "bad_request",
            data: None,
            error: Some(e.0.clone()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn to_json(&self) -> Value {
        let mut reply = serde_json::Map::new();
        reply.insert("status".into(), Value::from(self.status));
        if let Some(data) = &self.data {
            reply.insert("data".into(), data.clone());
        }
        if let Some(error) = &self.error {
            reply.insert("error".into(), Value::from(error.as_str()));
        }
        Value::Object(reply)
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
