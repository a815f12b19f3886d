use super::tcp::{Protocol, TcpServer};
use crate::api::{ApiClient, DeliveryApi};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::imap::ImapContext;
use crate::smtp::SmtpContext;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Both listeners, bound and serving
pub struct RunningGateway {
    pub imap_addr: SocketAddr,
    pub smtp_addr: SocketAddr,
    shutdown: CancellationToken,
    listeners: Vec<JoinHandle<()>>,
}

impl RunningGateway {
    /// Token that stops both listeners when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait until both listeners have stopped and drained their sessions
    pub async fn wait(self) {
        for handle in self.listeners {
            if let Err(e) = handle.await {
                warn!("Listener task ended abnormally: {}", e);
            }
        }
    }
}

/// Wires the upstream client into the IMAP and SMTP listeners
pub struct Application {
    config: GatewayConfig,
    api: Arc<dyn DeliveryApi>,
}

impl Application {
    /// Build the application with the real HTTP client. No network traffic
    /// happens here; the token is fetched on the first upstream call.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let api: Arc<dyn DeliveryApi> = Arc::new(ApiClient::new(config.api.clone())?);
        Ok(Self::with_api(config, api))
    }

    pub fn with_api(config: GatewayConfig, api: Arc<dyn DeliveryApi>) -> Self {
        Self { config, api }
    }

    /// Bind both listeners and start serving until `shutdown` is cancelled
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningGateway, GatewayError> {
        let uid_validity = chrono::Utc::now().timestamp().clamp(1, u32::MAX as i64) as u32;

        let imap_ctx = Arc::new(ImapContext::new(
            Arc::clone(&self.api),
            self.config.auth.clone(),
            &self.config.imap,
            self.config.api.page_size,
            uid_validity,
        ));
        let smtp_ctx = Arc::new(SmtpContext::new(
            Arc::clone(&self.api),
            self.config.auth.clone(),
            &self.config.smtp,
        ));

        // Bind both before serving either, so a port clash fails startup cleanly
        let imap = TcpServer::bind(
            &self.config.imap.host,
            self.config.imap.port,
            Protocol::Imap(imap_ctx),
        )
        .await?;
        let smtp = TcpServer::bind(
            &self.config.smtp.host,
            self.config.smtp.port,
            Protocol::Smtp(smtp_ctx),
        )
        .await?;

        let imap_addr = imap.local_addr()?;
        let smtp_addr = smtp.local_addr()?;
        info!(
            "e-Doreczenia gateway for {} serving IMAP on {}, SMTP on {}",
            if self.config.api.address.is_empty() {
                "(unset address)"
            } else {
                self.config.api.address.as_str()
            },
            imap_addr,
            smtp_addr
        );

        let listeners = vec![
            tokio::spawn(imap.run(shutdown.clone())),
            tokio::spawn(smtp.run(shutdown.clone())),
        ];

        Ok(RunningGateway {
            imap_addr,
            smtp_addr,
            shutdown,
            listeners,
        })
    }

    /// Serve until SIGINT or SIGTERM, then drain and return
    pub async fn run(self) -> Result<(), GatewayError> {
        let shutdown = CancellationToken::new();
        let running = self.start(shutdown.clone()).await?;

        wait_for_signal().await;
        info!("Shutdown requested, no longer accepting connections");
        shutdown.cancel();

        running.wait().await;
        info!("Gateway stopped");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
