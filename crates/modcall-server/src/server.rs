//! Running server

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use modcall_http_server::{Listener, ListenerConfig};

use crate::Result;
use crate::builder::RpcServerBuilder;
use crate::registry::ModuleRegistry;

/// Listener, pipeline and module registry, ready to start
pub struct RpcServer {
    listener: Listener,
    registry: Arc<ModuleRegistry>,
}

impl RpcServer {
    pub(crate) fn new(listener: Listener, registry: Arc<ModuleRegistry>) -> Self {
        Self { listener, registry }
    }

    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }

    pub fn config(&self) -> &ListenerConfig {
        self.listener.config()
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Bind and start accepting; returns the bound address
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = self.listener.start().await?;
        info!(
            address = %addr,
            path = %self.config().endpoint_path,
            modules = self.registry.module_count(),
            "RPC server listening"
        );
        Ok(addr)
    }

    /// Stop accepting, cancel in-flight calls and wait for them to finish
    pub async fn stop(&self) -> Result<()> {
        self.listener.stop().await?;
        info!("RPC server stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.listener.is_running().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().await
    }

    /// Serve until Ctrl-C, then stop gracefully
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for shutdown signal");
        }
        info!("shutdown requested");
        self.stop().await
    }
}
