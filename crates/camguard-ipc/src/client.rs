//! IPC client implementation

use camguard_api::{Command, Event, Request, Response, ResponsePayload, ResponseResult};
use camguard_util::ClientId;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::{IpcError, IpcResult};

/// IPC client for connecting to camguardd.
///
/// Once subscribed, events and responses share the connection. Events that
/// arrive while waiting for a response are queued for [`IpcClient::next_event`].
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
    pending_events: VecDeque<Event>,
}

enum Incoming {
    Response(Response),
    Event(Event),
}

impl IpcClient {
    /// Connect to camguardd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            pending_events: VecDeque::new(),
        })
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        loop {
            match self.read_message().await? {
                Incoming::Response(response) if response.request_id == request_id => {
                    return Ok(response);
                }
                Incoming::Response(response) => {
                    debug!(request_id = response.request_id, "Dropping unexpected response");
                }
                Incoming::Event(event) => self.pending_events.push_back(event),
            }
        }
    }

    /// Subscribe this connection to events
    pub async fn subscribe(&mut self) -> IpcResult<ClientId> {
        let response = self.send(Command::SubscribeEvents).await?;

        match response.result {
            ResponseResult::Ok(ResponsePayload::Subscribed { client_id }) => Ok(client_id),
            ResponseResult::Ok(other) => Err(IpcError::InvalidMessage(format!(
                "unexpected subscribe response: {:?}",
                other
            ))),
            ResponseResult::Err(e) => Err(IpcError::ServerError(e.message)),
        }
    }

    /// Wait for the next event
    pub async fn next_event(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }

        loop {
            match self.read_message().await? {
                Incoming::Event(event) => return Ok(event),
                Incoming::Response(response) => {
                    debug!(request_id = response.request_id, "Dropping unexpected response");
                }
            }
        }
    }

    async fn read_message(&mut self) -> IpcResult<Incoming> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }
            if !line.trim().is_empty() {
                break;
            }
        }

        let value: Value = serde_json::from_str(line.trim())?;
        if value.get("request_id").is_some() {
            Ok(Incoming::Response(serde_json::from_value(value)?))
        } else if value.get("payload").is_some() {
            Ok(Incoming::Event(serde_json::from_value(value)?))
        } else {
            Err(IpcError::InvalidMessage(line.trim().to_string()))
        }
    }
}
