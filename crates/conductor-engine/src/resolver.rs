//! Parameter resolution.
//!
//! Each step binding `(local, source)` takes its value from the run-time
//! overrides first and the macro's default parameters second. Resolution is
//! a pure function of `(macro, overrides)`; the output maps are ordered, so
//! resolving the same inputs twice serializes byte-identically.

use std::time::Duration;

use conductor_core::{ConductorError, MacroDef, ParamMap, ResolvedCommand, Result};

/// Reserved parameter holding the inter-command delay in seconds.
pub const DELAY_PARAM: &str = "delay_s";

/// Bind every step of `def`. Index `i` of the result holds step `i`'s args.
pub fn resolve(def: &MacroDef, overrides: &ParamMap) -> Result<Vec<ParamMap>> {
    def.steps
        .iter()
        .enumerate()
        .map(|(step_index, step)| {
            step.bindings
                .iter()
                .map(|binding| {
                    lookup(&binding.source, def, overrides)
                        .map(|value| (binding.local.clone(), value.clone()))
                        .ok_or_else(|| ConductorError::UnresolvedParameter {
                            step_index,
                            source_name: binding.source.clone(),
                        })
                })
                .collect::<Result<ParamMap>>()
        })
        .collect()
}

/// [`resolve`], paired with each step's target and verb.
pub fn resolve_commands(def: &MacroDef, overrides: &ParamMap) -> Result<Vec<ResolvedCommand>> {
    let bindings = resolve(def, overrides)?;
    Ok(def
        .steps
        .iter()
        .zip(bindings)
        .enumerate()
        .map(|(step_index, (step, args))| ResolvedCommand {
            step_index,
            target_module: step.target_module.clone(),
            command: step.command.clone(),
            args,
        })
        .collect())
}

/// Inter-command delay for one run of `def`.
///
/// `delay_s` from the overrides or defaults wins over `fallback`. A value
/// that is not a finite, non-negative number is rejected.
pub fn resolve_delay(def: &MacroDef, overrides: &ParamMap, fallback: Duration) -> Result<Duration> {
    let Some(value) = lookup(DELAY_PARAM, def, overrides) else {
        return Ok(fallback);
    };
    let invalid = |reason: &str| ConductorError::InvalidParameter {
        name: DELAY_PARAM.to_string(),
        reason: reason.to_string(),
    };
    let secs = value
        .as_f64()
        .ok_or_else(|| invalid("expected a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| invalid("must be a finite, non-negative number"))
}

fn lookup<'a>(
    name: &str,
    def: &'a MacroDef,
    overrides: &'a ParamMap,
) -> Option<&'a serde_json::Value> {
    overrides.get(name).or_else(|| def.default_params.get(name))
}
