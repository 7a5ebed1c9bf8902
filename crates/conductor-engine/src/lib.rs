//! # conductor-engine
//!
//! The orchestration core. Leaves first:
//!
//! - [`registry::ModuleRegistry`]: module name → address and role
//! - [`catalog::MacroCatalog`]: macro name → definition
//! - [`resolver`]: pure parameter binding per step
//! - [`dispatch::Dispatcher`]: one command round trip to one module
//! - [`executor::MacroExecutor`]: ordered, delayed, fail-fast step execution
//! - [`orchestrator::Orchestrator`]: run ids, cancellation, run history
//!
//! Registry and catalog are immutable after load and shared through `Arc`.

pub mod bootstrap;
pub mod catalog;
pub mod dispatch;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod resolver;

pub use catalog::{MacroCatalog, MacroSummary};
pub use dispatch::Dispatcher;
pub use executor::{ExecutorConfig, MacroExecutor, PreparedRun};
pub use orchestrator::{Orchestrator, RunStatus};
pub use registry::{ModuleRegistry, ModuleSummary};
