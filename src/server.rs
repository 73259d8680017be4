//! TCP listener and process lifecycle.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::federation::Federation;
use crate::room::hub::{self, Hub};
use crate::room::session::{self, SessionContext};

/// How long live sessions get to drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// A bound estuary server: listener + hub + federation, ready to accept.
pub struct Server {
    listener: TcpListener,
    ctx: SessionContext,
    active_sessions: Arc<AtomicUsize>,
}

impl Server {
    /// Bind the configured address and wire up the hub and federation.
    pub async fn bind(config: Config) -> io::Result<Self> {
        let listener = TcpListener::bind(config.server.bind_addr()).await?;
        Ok(Self::with_listener(listener, config))
    }

    /// Build a server around an existing listener. Tests bind port 0
    /// themselves so two servers can learn each other's ports up front.
    pub fn with_listener(listener: TcpListener, config: Config) -> Self {
        let (hub_handle, hub_rx) = hub::channel();
        let federation = Federation::start(hub_handle.clone(), &config.federation.peers);
        tokio::spawn(Hub::new(Arc::clone(&federation)).run(hub_rx));
        let ctx = SessionContext {
            hub: hub_handle,
            federation,
            config: Arc::new(config),
        };
        Self {
            listener,
            ctx,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the listener fails or the task is
    /// aborted.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.listener.local_addr()?, "estuary listening");
        loop {
            let (socket, addr) = self.listener.accept().await?;
            let ctx = self.ctx.clone();
            let active = Arc::clone(&self.active_sessions);
            active.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                session::handle_connection(socket, addr, ctx).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    /// Run until SIGINT/SIGTERM, then stop accepting and give live
    /// sessions a grace window to wind down on their own.
    pub async fn run_until_shutdown(self) -> io::Result<()> {
        let active = Arc::clone(&self.active_sessions);
        let accept = tokio::spawn(self.run());

        shutdown_signal().await;
        info!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "shutdown signal received, refusing new connections"
        );
        accept.abort();

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while active.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        info!(remaining = active.load(Ordering::SeqCst), "shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}
