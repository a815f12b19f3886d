use crate::error::GatewayError;
use crate::imap::{ImapContext, ImapSession};
use crate::smtp::{SmtpContext, SmtpSession};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Global connection ID counter, shared by both listeners
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// How long in-flight sessions may run on after shutdown was requested
pub const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Protocol served by a listener, with the state its sessions share
#[derive(Clone)]
pub enum Protocol {
    Imap(Arc<ImapContext>),
    Smtp(Arc<SmtpContext>),
}

impl Protocol {
    fn name(&self) -> &'static str {
        match self {
            Protocol::Imap(_) => "IMAP",
            Protocol::Smtp(_) => "SMTP",
        }
    }
}

/// Per-connection protocol state
enum ProtocolState {
    Imap(ImapSession),
    Smtp(SmtpSession),
}

impl ProtocolState {
    fn new(protocol: &Protocol, conn_id: u64) -> Self {
        match protocol {
            Protocol::Imap(ctx) => ProtocolState::Imap(ImapSession::new(Arc::clone(ctx), conn_id)),
            Protocol::Smtp(ctx) => ProtocolState::Smtp(SmtpSession::new(Arc::clone(ctx), conn_id)),
        }
    }

    fn greeting(&self) -> Vec<u8> {
        match self {
            ProtocolState::Imap(session) => session.greeting(),
            ProtocolState::Smtp(session) => session.greeting(),
        }
    }

    /// Returns (response_data, should_close)
    async fn process_input(&mut self, data: &[u8]) -> (Vec<u8>, bool) {
        match self {
            ProtocolState::Imap(session) => session.process_input(data).await,
            ProtocolState::Smtp(session) => session.process_input(data).await,
        }
    }
}

/// A bound TCP listener that runs one session task per accepted connection
pub struct TcpServer {
    listener: TcpListener,
    protocol: Protocol,
}

impl TcpServer {
    /// Bind `host:port`; port 0 picks a free port
    pub async fn bind(host: &str, port: u16, protocol: Protocol) -> Result<Self, GatewayError> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::bind(&addr, e))?;
        Ok(Self { listener, protocol })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled, then drain.
    ///
    /// Sessions still running after [`DRAIN_GRACE`] are closed.
    pub async fn run(self, shutdown: CancellationToken) {
        let name = self.protocol.name();
        match self.listener.local_addr() {
            Ok(addr) => info!("{} listener started on {}", name, addr),
            Err(_) => info!("{} listener started", name),
        }

        let tracker = TaskTracker::new();
        let force_close = CancellationToken::new();

        loop {
            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        // Typically EMFILE; back off instead of spinning
                        warn!("{} accept failed: {}", name, e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let conn_id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
            info!("[{} {}] New connection from {}", name.to_lowercase(), conn_id, peer);

            let protocol = self.protocol.clone();
            let force_close = force_close.clone();
            tracker.spawn(async move {
                tokio::select! {
                    result = handle_connection(socket, conn_id, &protocol) => {
                        if let Err(e) = result {
                            error!(
                                "[{} {}] Connection from {} failed: {}",
                                name.to_lowercase(), conn_id, peer, e
                            );
                        }
                    }
                    _ = force_close.cancelled() => {
                        warn!("[{} {}] Closed at shutdown", name.to_lowercase(), conn_id);
                    }
                }
                debug!("[{} {}] Connection closed", name.to_lowercase(), conn_id);
            });
        }

        // Stop accepting before draining
        drop(self.listener);
        tracker.close();
        info!(
            "{} listener stopped, waiting for {} session(s)",
            name,
            tracker.len()
        );

        if tokio::time::timeout(DRAIN_GRACE, tracker.wait()).await.is_err() {
            warn!("{} sessions still open after {:?}, closing them", name, DRAIN_GRACE);
            force_close.cancel();
            tracker.wait().await;
        }
        info!("{} listener shut down", name);
    }
}

/// Drive one session: greeting, then read/answer until the session or peer closes
async fn handle_connection(
    mut socket: TcpStream,
    conn_id: u64,
    protocol: &Protocol,
) -> std::io::Result<()> {
    let mut state = ProtocolState::new(protocol, conn_id);
    socket.write_all(&state.greeting()).await?;

    let mut buf = vec![0u8; 8192];
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        let (response, should_close) = state.process_input(&buf[..n]).await;
        if !response.is_empty() {
            socket.write_all(&response).await?;
        }
        if should_close {
            socket.shutdown().await?;
            return Ok(());
        }
    }
}
