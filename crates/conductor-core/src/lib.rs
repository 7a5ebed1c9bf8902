//! # conductor-core
//!
//! Foundation types shared by every conductor crate: modules and their
//! addresses, macro definitions with parameter bindings, the command wire
//! payloads, per-run records, and the [`errors::ConductorError`] taxonomy.

pub mod command;
pub mod errors;
pub mod ids;
pub mod macros;
pub mod module;
pub mod run;

pub use command::{Ack, CommandRequest, CommandResponse, ResolvedCommand, ResponseStatus};
pub use errors::{ConductorError, DispatchFailure, Result};
pub use ids::RunId;
pub use macros::{ArgBinding, CommandStep, MacroDef, ParamMap};
pub use module::{Module, ModuleAddress, ModuleRole};
pub use run::{FailureKind, MacroRun, RunFailure, RunState, StepResult, StepStatus};
