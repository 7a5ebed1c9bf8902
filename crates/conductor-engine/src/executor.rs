//! Macro executor.
//!
//! Runs one macro invocation as a sequential task: every step's arguments
//! are bound before the first command leaves, each step waits for its
//! acknowledgement before the next starts, and the first failure halts the
//! run. Nothing that already happened is undone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conductor_core::{
    ConductorError, DispatchFailure, FailureKind, MacroDef, MacroRun, ParamMap, ResolvedCommand,
    Result, RunId,
};
use conductor_settings::DispatchSettings;

use crate::catalog::MacroCatalog;
use crate::dispatch::Dispatcher;
use crate::registry::ModuleRegistry;
use crate::resolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub dispatch_timeout: Duration,
    /// Used when a macro sets no `delay_s`.
    pub default_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for ExecutorConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            dispatch_timeout: settings.timeout(),
            default_delay: settings.default_delay(),
        }
    }
}

/// A validated invocation: every binding resolved, ready to dispatch.
#[derive(Clone, Debug)]
pub struct PreparedRun {
    pub macro_def: Arc<MacroDef>,
    pub commands: Vec<ResolvedCommand>,
    pub delay: Duration,
}

pub struct MacroExecutor {
    registry: Arc<ModuleRegistry>,
    catalog: Arc<MacroCatalog>,
    dispatcher: Arc<dyn Dispatcher>,
    config: ExecutorConfig,
}

impl MacroExecutor {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        catalog: Arc<MacroCatalog>,
        dispatcher: Arc<dyn Dispatcher>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            dispatcher,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<MacroCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> ExecutorConfig {
        self.config
    }

    /// Look up the macro and bind everything. Errors here mean nothing was
    /// dispatched.
    pub fn prepare(&self, name: &str, overrides: &ParamMap) -> Result<PreparedRun> {
        let macro_def = self.catalog.get(name)?;
        let commands = resolver::resolve_commands(&macro_def, overrides)?;
        let delay = resolver::resolve_delay(&macro_def, overrides, self.config.default_delay)?;
        Ok(PreparedRun {
            macro_def,
            commands,
            delay,
        })
    }

    /// Prepare and execute in one call.
    pub async fn run(
        &self,
        name: &str,
        overrides: &ParamMap,
        cancel: &CancellationToken,
    ) -> Result<MacroRun> {
        let prepared = self.prepare(name, overrides)?;
        Ok(self.execute_prepared(RunId::new(), &prepared, cancel).await)
    }

    /// Dispatch the prepared steps in order. Always returns a terminal run.
    pub async fn execute_prepared(
        &self,
        run_id: RunId,
        prepared: &PreparedRun,
        cancel: &CancellationToken,
    ) -> MacroRun {
        let macro_name = prepared.macro_def.name.as_str();
        let mut run = MacroRun::new(run_id, &prepared.macro_def);
        run.start();
        info!(
            run_id = %run.run_id,
            macro_name,
            steps = prepared.commands.len(),
            transport = self.dispatcher.name(),
            "macro run started"
        );

        for command in &prepared.commands {
            let step_index = command.step_index;

            if step_index > 0 && !prepared.delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(prepared.delay) => {}
                }
            }
            if cancel.is_cancelled() {
                info!(run_id = %run.run_id, macro_name, step_index, "macro run cancelled");
                run.record_cancelled(step_index);
                return run;
            }

            let address = match self.registry.resolve(&command.target_module) {
                Ok(address) => address,
                Err(e) => {
                    warn!(
                        macro_name,
                        step_index,
                        module = %command.target_module,
                        error = %e,
                        "macro step failed"
                    );
                    run.record_failure(
                        step_index,
                        FailureKind::UnknownModule,
                        e.to_string(),
                        Duration::ZERO,
                        None,
                    );
                    break;
                }
            };

            debug!(
                macro_name,
                step_index,
                module = %command.target_module,
                %address,
                command = %command.command,
                "dispatching"
            );
            let dispatched_at = Utc::now();
            let started = Instant::now();
            let outcome = self
                .dispatcher
                .dispatch(address, &command.request(), self.config.dispatch_timeout)
                .await;
            let latency = started.elapsed();

            match outcome {
                Ok(_) => run.record_ok(step_index, latency, dispatched_at),
                Err(failure) => {
                    let kind = failure_kind(&failure);
                    let error = ConductorError::from(failure);
                    warn!(
                        macro_name,
                        step_index,
                        module = %command.target_module,
                        command = %command.command,
                        error = %error,
                        "macro step failed"
                    );
                    run.record_failure(
                        step_index,
                        kind,
                        error.to_string(),
                        latency,
                        Some(dispatched_at),
                    );
                    break;
                }
            }
        }

        if !run.is_terminal() {
            run.complete();
        }
        info!(
            run_id = %run.run_id,
            macro_name,
            state = ?run.state,
            succeeded = run.succeeded_steps().len(),
            elapsed_ms = run.total_latency().as_millis() as u64,
            "macro run finished"
        );
        run
    }
}

fn failure_kind(failure: &DispatchFailure) -> FailureKind {
    match failure {
        DispatchFailure::Timeout(_) => FailureKind::DispatchTimeout,
        _ => FailureKind::DispatchError,
    }
}
