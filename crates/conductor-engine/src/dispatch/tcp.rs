//! Per-call TCP transport.
//!
//! Request framing is the control-message line the modules already accept:
//! `COMMAND|{"arg": value, ...}\n`. The module answers with one line of JSON,
//! `{"status": "ok"|"error", "message": ...}`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use conductor_core::{Ack, CommandRequest, CommandResponse, DispatchFailure, ModuleAddress};

use super::{Dispatcher, bounded};

#[derive(Debug, Default)]
pub struct TcpDispatcher;

impl TcpDispatcher {
    pub fn new() -> Self {
        Self
    }
}

/// Encode a request as one control line, newline included.
pub fn encode_request(request: &CommandRequest) -> Result<String, DispatchFailure> {
    if request.command.contains(['|', '\n']) {
        return Err(DispatchFailure::Protocol(format!(
            "command '{}' cannot be framed",
            request.command
        )));
    }
    let args = serde_json::to_string(&request.args)
        .map_err(|e| DispatchFailure::Protocol(format!("unencodable args: {e}")))?;
    Ok(format!("{}|{}\n", request.command, args))
}

/// Decode one response line.
pub fn decode_response(line: &str) -> Result<Ack, DispatchFailure> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DispatchFailure::Protocol("connection closed without a response".into()));
    }
    serde_json::from_str::<CommandResponse>(trimmed)
        .map_err(|e| DispatchFailure::Protocol(format!("bad response '{trimmed}': {e}")))?
        .into_ack()
}

async fn round_trip(address: &ModuleAddress, line: &str) -> Result<String, DispatchFailure> {
    let mut stream = TcpStream::connect((address.host.as_str(), address.port))
        .await
        .map_err(|e| DispatchFailure::Transport(format!("connect {address}: {e}")))?;
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| DispatchFailure::Transport(format!("write {address}: {e}")))?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    let _ = reader
        .read_line(&mut response)
        .await
        .map_err(|e| DispatchFailure::Transport(format!("read {address}: {e}")))?;
    Ok(response)
}

#[async_trait]
impl Dispatcher for TcpDispatcher {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn dispatch(
        &self,
        address: &ModuleAddress,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<Ack, DispatchFailure> {
        let line = encode_request(request)?;
        debug!(%address, command = %request.command, "tcp dispatch");
        let response = bounded(timeout, round_trip(address, &line)).await?;
        decode_response(&response)
    }
}
