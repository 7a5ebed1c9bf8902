//! Command dispatch to module control endpoints.
//!
//! A [`Dispatcher`] performs exactly one round trip per call and never
//! retries: commands such as `RECORD` have side effects that must not be
//! duplicated. Retry policy belongs to whoever invokes the macro.

pub mod http;
pub mod locked;
pub mod mock;
pub mod tcp;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use conductor_core::{Ack, CommandRequest, DispatchFailure, ModuleAddress};
use conductor_settings::{DispatchSettings, TransportKind};

pub use http::HttpDispatcher;
pub use locked::ModuleLockedDispatcher;
pub use mock::{DispatchCall, MockReply, ScriptedDispatcher};
pub use tcp::TcpDispatcher;

/// Sends one command to one module and awaits its answer.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver `request` to `address`. Must return within `timeout`.
    async fn dispatch(
        &self,
        address: &ModuleAddress,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<Ack, DispatchFailure>;
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn dispatch(
        &self,
        address: &ModuleAddress,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<Ack, DispatchFailure> {
        (**self).dispatch(address, request, timeout).await
    }
}

/// Bound `fut` by `timeout`, mapping expiry to [`DispatchFailure::Timeout`].
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, DispatchFailure>
where
    F: Future<Output = Result<T, DispatchFailure>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(DispatchFailure::Timeout(timeout)))
}

/// Build the dispatcher selected by settings.
pub fn from_settings(settings: &DispatchSettings) -> Arc<dyn Dispatcher> {
    let transport: Arc<dyn Dispatcher> = match settings.transport {
        TransportKind::Tcp => Arc::new(TcpDispatcher::new()),
        TransportKind::Http => Arc::new(HttpDispatcher::new()),
    };
    if settings.serialize_per_module {
        Arc::new(ModuleLockedDispatcher::new(transport))
    } else {
        transport
    }
}
