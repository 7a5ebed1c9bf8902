//! Per-module serialization.
//!
//! Two macros running at once may both target the same module. Wrapping the
//! transport in [`ModuleLockedDispatcher`] makes every round trip to one
//! address exclusive, while different modules stay concurrent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use conductor_core::{Ack, CommandRequest, DispatchFailure, ModuleAddress};

use super::{Dispatcher, bounded};

pub struct ModuleLockedDispatcher {
    inner: Arc<dyn Dispatcher>,
    name: String,
    locks: DashMap<ModuleAddress, Arc<Mutex<()>>>,
}

impl ModuleLockedDispatcher {
    pub fn new(inner: Arc<dyn Dispatcher>) -> Self {
        let name = format!("{}+module-lock", inner.name());
        Self {
            inner,
            name,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, address: &ModuleAddress) -> Arc<Mutex<()>> {
        self.locks.entry(address.clone()).or_default().clone()
    }
}

#[async_trait]
impl Dispatcher for ModuleLockedDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(
        &self,
        address: &ModuleAddress,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<Ack, DispatchFailure> {
        let lock = self.lock_for(address);
        // Waiting for the lock counts against the command's timeout.
        bounded(timeout, async {
            let _guard = lock.lock().await;
            self.inner.dispatch(address, request, timeout).await
        })
        .await
    }
}
