//! HTTP transport: `POST http://host:port/command` with a JSON
//! [`CommandRequest`] body.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use conductor_core::{Ack, CommandRequest, CommandResponse, DispatchFailure, ModuleAddress};

use super::{Dispatcher, bounded};

pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint(address: &ModuleAddress) -> String {
        format!("http://{address}/command")
    }

    async fn post(
        &self,
        address: &ModuleAddress,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<Ack, DispatchFailure> {
        let response = self
            .client
            .post(Self::endpoint(address))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;
        let decoded = serde_json::from_str::<CommandResponse>(&body);

        if !status.is_success() {
            let message = decoded
                .ok()
                .and_then(|r| r.message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(DispatchFailure::Rejected(message));
        }

        decoded
            .map_err(|e| DispatchFailure::Protocol(format!("bad response body: {e}")))?
            .into_ack()
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> DispatchFailure {
    if error.is_timeout() {
        DispatchFailure::Timeout(timeout)
    } else {
        DispatchFailure::Transport(error.to_string())
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn dispatch(
        &self,
        address: &ModuleAddress,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<Ack, DispatchFailure> {
        debug!(%address, command = %request.command, "http dispatch");
        bounded(timeout, self.post(address, request, timeout)).await
    }
}
