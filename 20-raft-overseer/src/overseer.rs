use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, error, info, warn};

use crate::{
    connection::{ConnectionReader, Framing, write_packet},
    membership::{ClientId, Membership},
    session::{ClientSession, CloseReason, DEFAULT_MAX_CONSECUTIVE_FAILURES, SessionState},
};

#[derive(Debug, Clone, Copy)]
pub struct OverseerConfig {
    /// Rejections in a row before a client is disconnected.
    pub max_consecutive_failures: u32,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

pub struct Overseer {
    listener: TcpListener,
    state: Arc<OverseerState>,
}

struct OverseerState {
    membership: Arc<Membership>,
    config: OverseerConfig,
}

impl Overseer {
    pub fn new(listener: TcpListener, config: OverseerConfig) -> Self {
        Self {
            listener,
            state: Arc::new(OverseerState {
                membership: Arc::new(Membership::new()),
                config,
            }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared view of the logged-in members, valid after `run_until` takes `self`.
    pub fn membership(&self) -> Arc<Membership> {
        Arc::clone(&self.state.membership)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Overseer { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
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

/// Logs the members still connected when the accept loop stops. Their
/// connection tasks keep serving until each client leaves.
async fn handle_shutdown(state: &OverseerState) -> Vec<(ClientId, SocketAddr)> {
    let remaining = state.membership.snapshot().await;
    if remaining.is_empty() {
        info!("overseer shutting down");
    } else {
        let ids: Vec<ClientId> = remaining.iter().map(|(id, _)| *id).collect();
        warn!(
            connected = remaining.len(),
            members = ?ids,
            "overseer shutting down with members still connected"
        );
    }
    remaining
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<OverseerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<OverseerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<OverseerState>,
) -> Result<()> {
    info!(%peer, "connection received");
    let (reader, mut writer) = stream.into_split();
    let mut reader = ConnectionReader::with_framing(reader, Framing::FirstTerminator);

    let Some(mut session) = perform_handshake(&mut reader, &mut writer, peer, &state).await?
    else {
        return Ok(());
    };
    let client_id = session.client_id();

    let result = run_client_session(&mut session, &mut reader, &mut writer).await;
    cleanup_client_disconnect(&state.membership, client_id, session.state()).await;
    result
}

/// Reads the login frame and registers the new member. `None` means the
/// handshake was abandoned or refused and the connection should be dropped.
/// A member whose ACK cannot be delivered is removed again.
async fn perform_handshake<R, W>(
    reader: &mut ConnectionReader<R>,
    writer: &mut W,
    peer: SocketAddr,
    state: &OverseerState,
) -> Result<Option<ClientSession>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(frame) = reader.next_frame().await? else {
        warn!(%peer, "client connected but did not complete initial handshake");
        return Ok(None);
    };

    let membership = &state.membership;
    let (session, ack) = match ClientSession::login(
        &frame,
        state.config.max_consecutive_failures,
        || membership.allocate_id(),
    ) {
        Ok(accepted) => accepted,
        Err(err) => {
            warn!(%peer, error = %err, "handshake refused");
            return Ok(None);
        }
    };

    let client_id = session.client_id();
    membership.register(client_id, peer).await;
    debug!(client_id, response = %ack, "sending login ack");
    if let Err(err) = write_packet(writer, &ack).await {
        membership.remove(client_id).await;
        warn!(client_id, %peer, error = %err, "login ack not delivered");
        return Err(err.into());
    }
    Ok(Some(session))
}

async fn run_client_session<R, W>(
    session: &mut ClientSession,
    reader: &mut ConnectionReader<R>,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let client_id = session.client_id();

    while !session.is_closed() {
        let Some(frame) = reader.next_frame().await? else {
            error!(client_id, "peer closed the connection");
            break;
        };

        let Some(transaction) = session.process(&frame) else {
            break;
        };
        debug!(client_id, response = %transaction.response, "sending response");
        write_packet(writer, &transaction.response).await?;
    }

    Ok(())
}

async fn cleanup_client_disconnect(
    membership: &Membership,
    client_id: ClientId,
    state: SessionState,
) {
    if let Some(peer) = membership.remove(client_id).await {
        match state {
            SessionState::Closed(CloseReason::Evicted) => {
                error!(client_id, %peer, "client forcibly disconnected")
            }
            SessionState::Closed(CloseReason::LoggedOut) => {
                info!(client_id, %peer, "client left the cluster")
            }
            SessionState::Active => info!(client_id, %peer, "client disconnected"),
        }
    }
}
