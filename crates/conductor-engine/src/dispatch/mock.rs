//! Scripted dispatcher for tests and dry runs.
//!
//! Replies are keyed by command verb and consumed in order; once a verb's
//! script is exhausted the default reply is used. Every call is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use conductor_core::{Ack, CommandRequest, DispatchFailure, ModuleAddress};

use super::Dispatcher;

/// What the fake module does with one command.
#[derive(Clone, Debug)]
pub enum MockReply {
    Ack,
    Reject(String),
    Transport(String),
    /// Never answer; the call ends when its timeout expires.
    Hang,
    Delay(Duration, Box<MockReply>),
}

/// One recorded round trip.
#[derive(Clone, Debug)]
pub struct DispatchCall {
    pub address: ModuleAddress,
    pub request: CommandRequest,
    pub at: tokio::time::Instant,
}

pub struct ScriptedDispatcher {
    default: MockReply,
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<DispatchCall>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self {
            default: MockReply::Ack,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default = reply;
        self
    }

    /// Queue `reply` for the next unscripted call of `command`.
    pub fn on_command(self, command: &str, reply: MockReply) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(command.to_string())
                .or_default()
                .push_back(reply);
        }
        self
    }

    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Verbs in dispatch order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.request.command)
            .collect()
    }

    fn next_reply(&self, command: &str) -> MockReply {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(command).and_then(VecDeque::pop_front))
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Default for ScriptedDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn play(reply: MockReply, timeout: Duration) -> Result<Ack, DispatchFailure> {
    let mut reply = reply;
    let mut remaining = timeout;
    loop {
        match reply {
            MockReply::Ack => return Ok(Ack::default()),
            MockReply::Reject(msg) => return Err(DispatchFailure::Rejected(msg)),
            MockReply::Transport(msg) => return Err(DispatchFailure::Transport(msg)),
            MockReply::Hang => {
                tokio::time::sleep(remaining).await;
                return Err(DispatchFailure::Timeout(timeout));
            }
            MockReply::Delay(delay, next) => {
                if delay >= remaining {
                    tokio::time::sleep(remaining).await;
                    return Err(DispatchFailure::Timeout(timeout));
                }
                tokio::time::sleep(delay).await;
                remaining -= delay;
                reply = *next;
            }
        }
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn dispatch(
        &self,
        address: &ModuleAddress,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<Ack, DispatchFailure> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(DispatchCall {
                address: address.clone(),
                request: request.clone(),
                at: tokio::time::Instant::now(),
            });
        }
        let reply = self.next_reply(&request.command);
        play(reply, timeout).await
    }
}
