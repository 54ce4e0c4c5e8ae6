// MIT License - Copyright (c) 2026 Peter Wright
// Named set of bridges

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bridge::IpanoBridge;
use crate::services::ServiceCall;

/// The bridges an application runs, keyed by name.
///
/// Owned by the application and handed to whatever executes service calls;
/// there is no process-wide registry.
#[derive(Debug, Default)]
pub struct BridgeRegistry {
    bridges: BTreeMap<String, Arc<IpanoBridge>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bridge under its configured name, returning any bridge it
    /// replaced. The replaced bridge is not stopped.
    pub fn insert(&mut self, bridge: IpanoBridge) -> Option<Arc<IpanoBridge>> {
        let name = bridge.name().to_string();
        self.bridges.insert(name, Arc::new(bridge))
    }

    /// Remove a bridge and stop it.
    pub async fn remove(&mut self, name: &str) -> Option<Arc<IpanoBridge>> {
        let bridge = self.bridges.remove(name)?;
        bridge.stop().await;
        info!("{}: removed from registry", name);
        Some(bridge)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<IpanoBridge>> {
        self.bridges.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bridges.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IpanoBridge>> {
        self.bridges.values()
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    /// Start every bridge concurrently. Returns how many connected.
    pub async fn start_all(&self) -> usize {
        let mut starts = JoinSet::new();
        for bridge in self.bridges.values() {
            let bridge = Arc::clone(bridge);
            starts.spawn(async move { bridge.start().await });
        }

        let mut connected = 0;
        while let Some(result) = starts.join_next().await {
            match result {
                Ok(true) => connected += 1,
                Ok(false) => {}
                Err(e) => error!("Bridge start task failed: {}", e),
            }
        }
        info!("{} of {} bridges connected", connected, self.len());
        connected
    }

    pub async fn stop_all(&self) {
        for bridge in self.bridges.values() {
            bridge.stop().await;
        }
    }

    /// Validate `call` and run it on every bridge in turn.
    ///
    /// True only if every bridge succeeded. Fails without sending anything
    /// when the call is invalid or no bridge is registered.
    pub async fn call(&self, call: &ServiceCall) -> bool {
        if let Err(e) = call.validate() {
            warn!("Rejected {} call: {}", call.name(), e);
            return false;
        }
        if self.is_empty() {
            error!("No iPano Plus devices configured");
            return false;
        }

        debug!("Running {} on {} bridges", call.name(), self.len());
        let mut all_ok = true;
        for bridge in self.bridges.values() {
            all_ok &= call.run_on(bridge).await;
        }
        all_ok
    }
}
