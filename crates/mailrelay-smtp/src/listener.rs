//! TCP accept loop.

use crate::error::Result;
use crate::session::{Session, SessionConfig};
use crate::types::Envelope;
use std::net::SocketAddr;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts SMTP connections and feeds accepted messages into a queue.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    config: SessionConfig,
}

impl Listener {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config: SessionConfig::default(),
        })
    }

    /// Sets the name announced to clients.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    /// Sets the largest message accepted, in bytes.
    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.config.max_message_size = max_message_size;
        self
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` is cancelled.
    ///
    /// Open sessions are cancelled with the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the listening socket fails.
    pub async fn run(
        self,
        queue: UnboundedSender<Envelope>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("SMTP server listening on {}", self.local_addr()?);
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    };

                    debug!("Accepted connection from {peer}");
                    let session = Session::new(stream, self.config.clone(), queue.clone());
                    let cancelled = shutdown.child_token();
                    sessions.spawn(async move {
                        tokio::select! {
                            result = session.run() => {
                                if let Err(e) = result {
                                    warn!("Session with {peer} ended: {e}");
                                }
                            }
                            () = cancelled.cancelled() => debug!("Session with {peer} cancelled"),
                        }
                    });
                }
            }
        }

        sessions.shutdown().await;
        info!("SMTP server stopped");
        Ok(())
    }
}
