//! Per-invocation run records.
//!
//! A [`MacroRun`] is created `Pending` when a macro is invoked, moves to
//! `Running` when the first step is about to be dispatched, and ends in
//! exactly one terminal state. Steps that were never attempted stay
//! [`StepStatus::Skipped`], so callers can see which side effects happened
//! and issue compensating macros themselves.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RunId;
use crate::macros::MacroDef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownModule,
    DispatchTimeout,
    DispatchError,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_id: String,
    pub target_module: String,
    pub command: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Where and why a run stopped early.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub step_index: usize,
    pub target_module: String,
    pub command: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacroRun {
    pub run_id: RunId,
    pub macro_name: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl MacroRun {
    pub fn new(run_id: RunId, macro_def: &MacroDef) -> Self {
        let steps = macro_def
            .steps
            .iter()
            .enumerate()
            .map(|(step_index, step)| StepResult {
                step_index,
                step_id: step.step_id.clone(),
                target_module: step.target_module.clone(),
                command: step.command.clone(),
                status: StepStatus::Skipped,
                error: None,
                latency: Duration::ZERO,
                dispatched_at: None,
            })
            .collect();
        Self {
            run_id,
            macro_name: macro_def.name.clone(),
            state: RunState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            steps,
            failure: None,
        }
    }

    pub fn start(&mut self) {
        if self.state == RunState::Pending {
            self.state = RunState::Running;
        }
    }

    pub fn record_ok(
        &mut self,
        step_index: usize,
        latency: Duration,
        dispatched_at: DateTime<Utc>,
    ) {
        if let Some(step) = self.steps.get_mut(step_index) {
            step.status = StepStatus::Ok;
            step.latency = latency;
            step.dispatched_at = Some(dispatched_at);
        }
    }

    /// Mark a step failed and end the run.
    pub fn record_failure(
        &mut self,
        step_index: usize,
        kind: FailureKind,
        message: impl Into<String>,
        latency: Duration,
        dispatched_at: Option<DateTime<Utc>>,
    ) {
        let message = message.into();
        if let Some(step) = self.steps.get_mut(step_index) {
            step.status = StepStatus::Failed;
            step.error = Some(message.clone());
            step.latency = latency;
            step.dispatched_at = dispatched_at;
        }
        self.failure = Some(self.failure_at(step_index, kind, message));
        self.finish(RunState::Failed);
    }

    /// End the run because cancellation was observed before `step_index`
    /// started.
    pub fn record_cancelled(&mut self, step_index: usize) {
        self.failure = Some(self.failure_at(
            step_index,
            FailureKind::Cancelled,
            "cancelled before step started".into(),
        ));
        self.finish(RunState::Cancelled);
    }

    pub fn complete(&mut self) {
        self.finish(RunState::Completed);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Indices of steps whose side effects were acknowledged.
    pub fn succeeded_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Ok)
            .map(|s| s.step_index)
            .collect()
    }

    pub fn total_latency(&self) -> Duration {
        self.steps.iter().map(|s| s.latency).sum()
    }

    fn failure_at(&self, step_index: usize, kind: FailureKind, message: String) -> RunFailure {
        let (target_module, command) = self
            .steps
            .get(step_index)
            .map(|s| (s.target_module.clone(), s.command.clone()))
            .unwrap_or_default();
        RunFailure {
            step_index,
            target_module,
            command,
            kind,
            message,
        }
    }

    fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
