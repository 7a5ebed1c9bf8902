//! # conductor-server
//!
//! JSON-RPC over `POST /rpc` for invoking macros and polling runs, plus
//! `GET /health`.

pub mod handlers;
pub mod rpc;
pub mod server;

pub use handlers::HandlerState;
pub use server::{ServerConfig, ServerHandle, build_router, start};
