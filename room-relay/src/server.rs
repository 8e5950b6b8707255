use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    config::RelayConfig,
    connection::Connection,
    dispatcher::Dispatcher,
    session::SessionHandler,
    state::RelayState,
};

pub struct Server {
    listener: TcpListener,
    config: RelayConfig,
    state: Arc<RelayState>,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self::with_config(listener, RelayConfig::default())
    }

    pub fn with_config(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            config,
            state: Arc::new(RelayState::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared registries, for inspection while the server runs.
    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Spawns the broadcaster first, then one task per accepted connection.
    /// On shutdown every live connection is told to close; the broadcaster
    /// exits once the last session has dropped its dispatcher handle.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            state,
        } = self;
        let (dispatcher, broadcaster) =
            Dispatcher::channel(config.queue_capacity, Arc::clone(&state));
        tokio::spawn(broadcaster.run());
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &dispatcher, &config);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &RelayState) {
    let connections = state.connections.len().await;
    info!(connections, "relay shutting down");
    state.connections.close_all().await;
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
    dispatcher: &Dispatcher,
    config: &RelayConfig,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, state, dispatcher, config),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<RelayState>,
    dispatcher: &Dispatcher,
    config: &RelayConfig,
) {
    let (connection, outbox) = Connection::new(state.next_id(), peer, config.outbox_capacity);
    let (reader, writer) = stream.into_split();
    let handler = SessionHandler::new(
        connection,
        Arc::clone(state),
        dispatcher.clone(),
        writer,
    );

    tokio::spawn(async move {
        if let Err(err) = handler.run(reader, outbox).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}
