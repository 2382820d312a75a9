use crate::{
    config::AppConfig,
    github::RestGatewayProvider,
    server::{self, ServerState},
    usage::MetricsStore,
};
use anyhow::{Context, Result};
use std::sync::Arc;

/// High-level application orchestrator.
pub struct App {
    config: Arc<AppConfig>,
    gateways: Arc<RestGatewayProvider>,
    store: MetricsStore,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let gateways = RestGatewayProvider::from_config(&config.github)
            .context("failed to configure github client")?;
        if !gateways.has_default_token() {
            tracing::warn!(
                "no default GitHub token configured; requests must supply one via Authorization or X-GitHub-Token"
            );
        }

        let store = MetricsStore::new(config.metrics.history_capacity);
        tracing::info!(
            api_base_url = %config.github.api_base_url,
            history_capacity = store.capacity(),
            "configured metrics service"
        );

        Ok(Self {
            config: Arc::new(config),
            gateways: Arc::new(gateways),
            store,
        })
    }

    pub async fn run(self) -> Result<()> {
        let state = ServerState::new(self.gateways.clone(), self.store.clone());
        let handle = server::spawn(&self.config.server, state).await?;
        tracing::info!(listen = %handle.local_addr(), "press Ctrl-C to stop");

        shutdown_signal().await;
        tracing::info!("shutdown requested");
        if !self.store.is_empty() {
            tracing::info!(snapshots = self.store.len(), "discarding in-memory usage history");
        }
        handle.shutdown().await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_default_token() {
        let mut config = AppConfig::default();
        config.metrics.history_capacity = 0;
        let app = App::new(config).unwrap();
        assert_eq!(app.store.capacity(), 1);
        assert!(!app.gateways.has_default_token());
    }

    #[test]
    fn invalid_api_url_fails_startup() {
        let mut config = AppConfig::default();
        config.github.api_base_url = String::new();
        assert!(App::new(config).is_err());
    }
}
