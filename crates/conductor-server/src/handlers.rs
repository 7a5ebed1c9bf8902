//! RPC method handlers.

use std::sync::Arc;

use serde::Serialize;

use conductor_core::{ParamMap, RunId};
use conductor_engine::Orchestrator;

use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub orchestrator: Arc<Orchestrator>,
}

impl HandlerState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// camelCase keys accepted as aliases of the snake_case ones.
const CAMEL_TO_SNAKE: &[(&str, &str)] = &[("runId", "run_id"), ("macroName", "name")];

fn normalize_params(params: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = params.as_object() else {
        return params.clone();
    };
    let mut result = obj.clone();
    for &(camel, snake) in CAMEL_TO_SNAKE {
        if let Some(val) = result.remove(camel) {
            if !result.contains_key(snake) {
                let _ = result.insert(snake.to_string(), val);
            }
        }
    }
    serde_json::Value::Object(result)
}

/// Dispatch an RPC method to the appropriate handler.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let params = normalize_params(params);

    match method {
        // Macros
        "macro.run" => macro_run(state, &params, id).await,
        "macro.start" => macro_start(state, &params, id),
        "macro.list" => macro_list(state, id),

        // Modules
        "module.list" => module_list(state, id),

        // Runs
        "run.get" | "run.status" => run_get(state, &params, id),
        "run.cancel" => run_cancel(state, &params, id),
        "run.cancelAll" => run_cancel_all(state, id),

        // System
        "system.ping" | "health" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn respond<T: Serialize>(id: Option<serde_json::Value>, value: &T) -> RpcResponse {
    match serde_json::to_value(value) {
        Ok(result) => RpcResponse::success(id, result),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

/// `name` plus an optional `overrides` object.
fn macro_call(params: &serde_json::Value) -> Result<(String, ParamMap), String> {
    let name = rpc::require_str(params, "name")?.to_string();
    let overrides = match params.get("overrides") {
        None | Some(serde_json::Value::Null) => ParamMap::new(),
        Some(serde_json::Value::Object(map)) => {
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        }
        Some(_) => return Err("Parameter 'overrides' must be an object".into()),
    };
    Ok((name, overrides))
}

async fn macro_run(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (name, overrides) = match macro_call(params) {
        Ok(call) => call,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.orchestrator.run_macro(&name, &overrides).await {
        Ok(run) => respond(id, &run),
        Err(e) => RpcResponse::from_conductor_error(id, &e),
    }
}

fn macro_start(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (name, overrides) = match macro_call(params) {
        Ok(call) => call,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.orchestrator.start_macro(&name, &overrides) {
        Ok(run_id) => RpcResponse::success(id, serde_json::json!({"run_id": run_id})),
        Err(e) => RpcResponse::from_conductor_error(id, &e),
    }
}

fn macro_list(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let macros = state.orchestrator.list_macros();
    respond(id, &serde_json::json!({"macros": macros}))
}

fn module_list(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let modules = state.orchestrator.list_modules();
    respond(id, &serde_json::json!({"modules": modules}))
}

fn run_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let run_id = match rpc::require_str(params, "run_id") {
        Ok(s) => RunId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.orchestrator.status(&run_id) {
        Some(status) => respond(id, &status),
        None => RpcResponse::run_not_found(id, run_id.as_str()),
    }
}

fn run_cancel(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let run_id = match rpc::require_str(params, "run_id") {
        Ok(s) => RunId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let cancelled = state.orchestrator.cancel(&run_id);
    RpcResponse::success(id, serde_json::json!({"cancelled": cancelled}))
}

fn run_cancel_all(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let count = state.orchestrator.cancel_all();
    RpcResponse::success(id, serde_json::json!({"cancelled": count}))
}

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let orch = &state.orchestrator;
    RpcResponse::success(
        id,
        serde_json::json!({
            "status": "healthy",
            "modules": orch.list_modules().len(),
            "macros": orch.list_macros().len(),
            "active_runs": orch.active_count(),
        }),
    )
}
