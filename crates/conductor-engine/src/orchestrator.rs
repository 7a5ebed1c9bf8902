//! Run orchestrator: run ids, cancellation, and run history on top of the
//! executor.
//!
//! Each invocation gets a [`RunId`] and a `CancellationToken` registered in
//! `active_runs` for as long as it executes. Finished runs move to a bounded
//! history so callers that started a run in the background can poll it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conductor_core::{ConductorError, MacroRun, ParamMap, Result, RunId};

use crate::catalog::{MacroSummary, UnresolvedTarget};
use crate::executor::{MacroExecutor, PreparedRun};
use crate::registry::ModuleSummary;

/// Where a run is, as seen by a poller.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running {
        macro_name: String,
        started_at: DateTime<Utc>,
    },
    Finished(MacroRun),
}

struct ActiveRun {
    cancel: CancellationToken,
    macro_name: String,
    started_at: DateTime<Utc>,
}

pub struct Orchestrator {
    executor: Arc<MacroExecutor>,
    active_runs: Arc<DashMap<RunId, ActiveRun>>,
    history: Arc<Mutex<VecDeque<MacroRun>>>,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(executor: MacroExecutor, history_limit: usize) -> Self {
        Self {
            executor: Arc::new(executor),
            active_runs: Arc::new(DashMap::new()),
            history: Arc::new(Mutex::new(VecDeque::new())),
            history_limit,
        }
    }

    pub fn executor(&self) -> &Arc<MacroExecutor> {
        &self.executor
    }

    /// Execute a macro to completion. The run can be cancelled by id from
    /// another task while it executes.
    ///
    /// Execution happens on its own task, so dropping this future leaves the
    /// run to finish (or be cancelled) and land in history.
    pub async fn run_macro(&self, name: &str, overrides: &ParamMap) -> Result<MacroRun> {
        let (run_id, handle) = self.spawn_run(name, overrides)?;
        handle.await.map_err(|e| {
            error!(%run_id, error = %e, "run task failed");
            ConductorError::Internal(format!("run {run_id} aborted: {e}"))
        })
    }

    /// Validate a macro invocation and execute it in the background.
    pub fn start_macro(&self, name: &str, overrides: &ParamMap) -> Result<RunId> {
        let (run_id, _handle) = self.spawn_run(name, overrides)?;
        Ok(run_id)
    }

    /// `None` when the id is unknown or its record was evicted.
    pub fn status(&self, run_id: &RunId) -> Option<RunStatus> {
        if let Some(run) = lock(&self.history).iter().find(|r| &r.run_id == run_id) {
            return Some(RunStatus::Finished(run.clone()));
        }
        self.active_runs.get(run_id).map(|run| RunStatus::Running {
            macro_name: run.macro_name.clone(),
            started_at: run.started_at,
        })
    }

    /// Request cancellation; the run stops at its next step boundary.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        match self.active_runs.get(run_id) {
            Some(run) => {
                info!(%run_id, macro_name = %run.macro_name, "cancelling run");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active_runs.iter() {
            entry.value().cancel.cancel();
            count += 1;
        }
        if count > 0 {
            info!(count, "cancelling all runs");
        }
        count
    }

    pub fn active_count(&self) -> usize {
        self.active_runs.len()
    }

    pub fn list_macros(&self) -> Vec<MacroSummary> {
        self.executor.catalog().list()
    }

    pub fn list_modules(&self) -> Vec<ModuleSummary> {
        self.executor.registry().list()
    }

    pub fn unresolved_targets(&self) -> Vec<UnresolvedTarget> {
        self.executor
            .catalog()
            .unresolved_targets(self.executor.registry())
    }

    /// Validate synchronously, register the run, then execute it on a
    /// spawned task.
    fn spawn_run(&self, name: &str, overrides: &ParamMap) -> Result<(RunId, JoinHandle<MacroRun>)> {
        let prepared = self.executor.prepare(name, overrides)?;
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let _ = self.active_runs.insert(
            run_id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                macro_name: prepared.macro_def.name.clone(),
                started_at: Utc::now(),
            },
        );

        let executor = Arc::clone(&self.executor);
        let active_runs = Arc::clone(&self.active_runs);
        let history = Arc::clone(&self.history);
        let history_limit = self.history_limit;
        let id = run_id.clone();
        let handle = tokio::spawn(async move {
            execute(
                &executor,
                &active_runs,
                &history,
                history_limit,
                id,
                prepared,
                cancel,
            )
            .await
        });
        Ok((run_id, handle))
    }
}

async fn execute(
    executor: &MacroExecutor,
    active_runs: &DashMap<RunId, ActiveRun>,
    history: &Mutex<VecDeque<MacroRun>>,
    history_limit: usize,
    run_id: RunId,
    prepared: PreparedRun,
    cancel: CancellationToken,
) -> MacroRun {
    let run = executor
        .execute_prepared(run_id.clone(), &prepared, &cancel)
        .await;

    // History first, so a poller never sees the run vanish between the two.
    if history_limit > 0 {
        let mut history = lock(history);
        history.push_back(run.clone());
        while history.len() > history_limit {
            let _ = history.pop_front();
        }
    }
    let _ = active_runs.remove(&run_id);
    run
}

fn lock(history: &Mutex<VecDeque<MacroRun>>) -> MutexGuard<'_, VecDeque<MacroRun>> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::catalog::MacroCatalog;
    use crate::dispatch::{MockReply, ScriptedDispatcher};
    use crate::executor::ExecutorConfig;
    use crate::registry::ModuleRegistry;
    use assert_matches::assert_matches;
    use conductor_core::{CommandStep, MacroDef, Module, ModuleAddress, ModuleRole, RunState};
    use serde_json::json;

    fn make_orchestrator(mock: Arc<ScriptedDispatcher>, history_limit: usize) -> Orchestrator {
        let registry = ModuleRegistry::from_modules(vec![
            Module {
                name: "dp-lsl-recording".into(),
                address: ModuleAddress::new("127.0.0.1", 8082),
                role: ModuleRole::Recording,
            },
            Module {
                name: "dp-auditory-aphasia-paradigm".into(),
                address: ModuleAddress::new("127.0.0.1", 8083),
                role: ModuleRole::Paradigm,
            },
        ])
        .unwrap();
        let catalog = MacroCatalog::from_macros(vec![
            MacroDef::new("start_recording")
                .default_param("delay_s", json!(1))
                .step(CommandStep::new("com1", "dp-lsl-recording", "UPDATE"))
                .step(CommandStep::new("com2", "dp-lsl-recording", "RECORD")),
            MacroDef::new("start_paradigm")
                .step(CommandStep::new("com1", "dp-auditory-aphasia-paradigm", "START")),
        ])
        .unwrap();
        let executor = MacroExecutor::new(
            Arc::new(registry),
            Arc::new(catalog),
            mock,
            ExecutorConfig {
                dispatch_timeout: Duration::from_secs(1),
                default_delay: Duration::ZERO,
            },
        );
        Orchestrator::new(executor, history_limit)
    }

    async fn run_now(orch: &Orchestrator, name: &str) -> MacroRun {
        orch.run_macro(name, &ParamMap::new()).await.unwrap()
    }

    fn start(orch: &Orchestrator, name: &str) -> RunId {
        orch.start_macro(name, &ParamMap::new()).unwrap()
    }

    async fn wait_finished(orch: &Orchestrator, run_id: &RunId) -> MacroRun {
        loop {
            if let Some(RunStatus::Finished(run)) = orch.status(run_id) {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_macro_records_history() {
        let orch = make_orchestrator(Arc::new(ScriptedDispatcher::new()), 8);
        let run = run_now(&orch, "start_paradigm").await;

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(orch.active_count(), 0);
        assert_matches!(orch.status(&run.run_id), Some(RunStatus::Finished(r)) if r == run);
    }

    #[tokio::test(start_paused = true)]
    async fn start_macro_runs_in_background() {
        let mock = Arc::new(ScriptedDispatcher::new());
        let orch = make_orchestrator(mock.clone(), 8);

        let run_id = start(&orch, "start_recording");
        assert_matches!(
            orch.status(&run_id),
            Some(RunStatus::Running { macro_name, .. }) if macro_name == "start_recording"
        );

        let run = wait_finished(&orch, &run_id).await;
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(mock.commands(), vec!["UPDATE", "RECORD"]);
        assert_eq!(orch.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_at_step_boundary() {
        let mock = Arc::new(ScriptedDispatcher::new());
        let orch = make_orchestrator(mock.clone(), 8);

        let run_id = start(&orch, "start_recording");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(orch.cancel(&run_id));

        let run = wait_finished(&orch, &run_id).await;
        assert_eq!(run.state, RunState::Cancelled);
        assert_eq!(run.failure.unwrap().step_index, 1);
        assert_eq!(mock.commands(), vec!["UPDATE"]);
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_false() {
        let orch = make_orchestrator(Arc::new(ScriptedDispatcher::new()), 8);
        assert!(!orch.cancel(&RunId::new()));
        assert!(orch.status(&RunId::new()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_counts_active_runs() {
        let orch = make_orchestrator(Arc::new(ScriptedDispatcher::new()), 8);
        let a = start(&orch, "start_recording");
        let b = start(&orch, "start_recording");

        assert_eq!(orch.cancel_all(), 2);
        assert_eq!(wait_finished(&orch, &a).await.state, RunState::Cancelled);
        assert_eq!(wait_finished(&orch, &b).await.state, RunState::Cancelled);
        assert_eq!(orch.cancel_all(), 0);
    }

    #[tokio::test]
    async fn pre_dispatch_errors_register_nothing() {
        let orch = make_orchestrator(Arc::new(ScriptedDispatcher::new()), 8);
        assert_matches!(
            orch.start_macro("start_training", &ParamMap::new()),
            Err(ConductorError::UnknownMacro(_))
        );
        assert_eq!(orch.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn history_evicts_oldest() {
        let orch = make_orchestrator(Arc::new(ScriptedDispatcher::new()), 2);
        let first = run_now(&orch, "start_paradigm").await;
        let second = run_now(&orch, "start_paradigm").await;
        let third = run_now(&orch, "start_paradigm").await;

        assert!(orch.status(&first.run_id).is_none());
        assert!(orch.status(&second.run_id).is_some());
        assert!(orch.status(&third.run_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_macro_still_finishes() {
        let mock = Arc::new(ScriptedDispatcher::new());
        let orch = make_orchestrator(mock.clone(), 8);

        // Caller gives up during the 1s inter-command delay.
        let waited = tokio::time::timeout(
            Duration::from_millis(500),
            orch.run_macro("start_recording", &ParamMap::new()),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(orch.active_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(orch.active_count(), 0);
        assert_eq!(mock.commands(), vec!["UPDATE", "RECORD"]);

        let history = lock(&orch.history);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_macro_lets_in_flight_dispatch_finish() {
        let slow_ack = MockReply::Delay(Duration::from_millis(300), Box::new(MockReply::Ack));
        let mock = Arc::new(ScriptedDispatcher::new().on_command("START", slow_ack));
        let orch = make_orchestrator(mock.clone(), 8);

        let waited = tokio::time::timeout(
            Duration::from_millis(100),
            orch.run_macro("start_paradigm", &ParamMap::new()),
        )
        .await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orch.active_count(), 0);
        let history = lock(&orch.history);
        assert_eq!(history[0].state, RunState::Completed);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_is_finished_not_error() {
        let mock = Arc::new(ScriptedDispatcher::new().on_command("START", MockReply::Hang));
        let orch = make_orchestrator(mock, 8);
        let run = run_now(&orch, "start_paradigm").await;
        assert_eq!(run.state, RunState::Failed);
    }

    #[test]
    fn listings_come_from_registry_and_catalog() {
        let orch = make_orchestrator(Arc::new(ScriptedDispatcher::new()), 8);
        let macros: Vec<String> = orch.list_macros().into_iter().map(|m| m.name).collect();
        assert_eq!(macros, vec!["start_paradigm", "start_recording"]);

        let modules = orch.list_modules();
        assert_eq!(modules[0].name, "dp-auditory-aphasia-paradigm");
        assert_eq!(modules[0].role, ModuleRole::Paradigm);
        assert_eq!(modules[1].address, "127.0.0.1:8082");
        assert!(orch.unresolved_targets().is_empty());
    }

    #[test]
    fn running_status_serializes_with_tag() {
        let status = RunStatus::Running {
            macro_name: "start_recording".into(),
            started_at: Utc::now(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["macro_name"], "start_recording");
    }
}
