use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::command::{self, Command, ParseError, Reply};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{REQUESTS_TOTAL, command_label};
use crate::resolver::{BookingError, BookingResolver};

/// One inbound line, or the marker for a line that blew the length limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Line(String),
    TooLong,
}

/// `LinesCodec` that reports an over-long line as `Request::TooLong` instead of
/// an error. `Framed` ends the stream after any decode error; the inner codec
/// keeps discarding up to the next newline on its own.
#[derive(Debug)]
pub struct RequestCodec {
    lines: LinesCodec,
}

impl RequestCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }
}

fn too_long(
    decoded: Result<Option<String>, LinesCodecError>,
) -> Result<Option<Request>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(Request::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Request::TooLong)),
        Err(e) => Err(e),
    }
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, LinesCodecError> {
        too_long(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, LinesCodecError> {
        too_long(self.lines.decode_eof(buf))
    }
}

impl Encoder<String> for RequestCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.lines.encode(line, buf)
    }
}

/// Serve one client until it disconnects. Each request line gets one reply line.
pub async fn process_connection(
    socket: TcpStream,
    resolver: Arc<BookingResolver>,
) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, RequestCodec::new(MAX_LINE_LEN));

    while let Some(request) = lines.next().await {
        let reply = match request? {
            Request::Line(line) if line.trim().is_empty() => continue,
            Request::Line(line) => handle_line(&resolver, &line).await,
            Request::TooLong => {
                warn!("request line over {MAX_LINE_LEN} bytes dropped");
                Reply::bad_request(&ParseError(format!("request line over {MAX_LINE_LEN} bytes")))
            }
        };
        lines.send(reply.to_string()).await?;
    }
    Ok(())
}

pub async fn handle_line(resolver: &BookingResolver, line: &str) -> Reply {
    match command::parse(line) {
        Ok(cmd) => execute(resolver, cmd).await,
        Err(e) => {
            debug!("{e}");
            Reply::bad_request(&e)
        }
    }
}

fn reply<T>(result: Result<T, BookingError>, data: impl FnOnce(T) -> Value) -> Reply {
    match result {
        Ok(v) => Reply::ok(data(v)),
        Err(e) => Reply::failure(&e),
    }
}

pub async fn execute(resolver: &BookingResolver, cmd: Command) -> Reply {
    let op = command_label(&cmd);
    metrics::counter!(REQUESTS_TOTAL, "op" => op).increment(1);
    debug!(op, "request");

    match cmd {
        Command::Halls => Reply::ok(json!(resolver.halls().halls())),
        Command::Create {
            hall_id,
            start,
            end,
            seats,
        } => reply(resolver.create(&hall_id, start, end, seats).await, |id| {
            json!({ "id": id })
        }),
        Command::CreateBatch { bookings } => {
            reply(resolver.create_batch(bookings).await, |results| {
                let items: Vec<Value> = results
                    .into_iter()
                    .map(|r| match r {
                        Ok(id) => json!({ "status": "ok", "id": id }),
                        Err(e) => json!({ "status": e.kind(), "error": e.to_string() }),
                    })
                    .collect();
                Value::Array(items)
            })
        }
        Command::Update {
            id,
            start,
            end,
            seats,
        } => reply(resolver.update(id, start, end, seats).await, |b| json!(b)),
        Command::Cancel { id } => reply(resolver.cancel(id).await, |b| json!(b)),
        Command::List { start, end } => reply(resolver.list(start, end).await, |b| json!(b)),
        Command::AvailableHalls {
            start,
            end,
            min_seats,
        } => reply(
            resolver.available_halls(start, end, min_seats).await,
            |halls| json!(halls),
        ),
        Command::Availability {
            hall_id,
            start,
            end,
            min_duration,
        } => reply(
            resolver.availability(&hall_id, start, end, min_duration).await,
            |spans| json!(spans),
        ),
        Command::Clear => reply(resolver.clear_all().await, |removed| {
            json!({ "removed": removed })
        }),
    }
}
