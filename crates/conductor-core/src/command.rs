use serde::{Deserialize, Serialize};

use crate::errors::DispatchFailure;
use crate::macros::ParamMap;

/// A command step with its arguments bound to concrete values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedCommand {
    pub step_index: usize,
    pub target_module: String,
    pub command: String,
    pub args: ParamMap,
}

impl ResolvedCommand {
    pub fn request(&self) -> CommandRequest {
        CommandRequest {
            command: self.command.clone(),
            args: self.args.clone(),
        }
    }
}

/// Payload sent to a module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: ParamMap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Payload a module answers with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
        }
    }

    /// Turn a decoded response into the dispatcher's outcome.
    pub fn into_ack(self) -> Result<Ack, DispatchFailure> {
        match self.status {
            ResponseStatus::Ok => Ok(Ack {
                message: self.message,
            }),
            ResponseStatus::Error => Err(DispatchFailure::Rejected(
                self.message.unwrap_or_else(|| "no message".into()),
            )),
        }
    }
}

/// Positive acknowledgement from a module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
