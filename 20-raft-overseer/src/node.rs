//! Cluster node client: logs in to the overseer, then keeps the connection
//! alive and stands for election when the timer says so.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionReader, write_packet},
    election::{Decision, ElectionConfig, ElectionTimer},
    error::{Error, Result},
    membership::ClientId,
    packet::{Command, Packet},
};

pub struct RaftNode<R, W> {
    reader: ConnectionReader<R>,
    writer: W,
    timer: ElectionTimer,
    next_sequence: u8,
    /// Set while a request has been written but its answer not yet read.
    awaiting_response: bool,
}

impl RaftNode<OwnedReadHalf, OwnedWriteHalf> {
    pub async fn connect(addr: SocketAddr, config: ElectionConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        info!(%addr, "connected to overseer");
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, config))
    }
}

impl<R, W> RaftNode<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, config: ElectionConfig) -> Self {
        if config.election_timeout <= config.keep_alive_interval {
            warn!(
                election_timeout_ms = config.election_timeout.as_millis() as u64,
                keep_alive_ms = config.keep_alive_interval.as_millis() as u64,
                "election timeout does not exceed keep-alive interval; \
                 elections may start before any keep-alive is sent"
            );
        }

        Self {
            reader: ConnectionReader::new(reader),
            writer,
            timer: ElectionTimer::new(config, Instant::now()),
            next_sequence: 0,
            awaiting_response: false,
        }
    }

    pub fn timer(&self) -> &ElectionTimer {
        &self.timer
    }

    /// Sends LOGIN and adopts the identity carried by the ACK.
    pub async fn login(&mut self) -> Result<ClientId> {
        let response = self.transact(Command::Login).await?;
        if response.command != Command::Ack {
            return Err(Error::LoginRejected(response.command));
        }

        let id = response.argument(0).ok_or(Error::MissingIdentity)?;
        self.timer.assign_identity(id);
        info!(cluster_id = id, "logged in to overseer");
        Ok(id)
    }

    /// Runs the keep-alive / election loop until the connection fails.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let command = match self.timer.tick(Instant::now())? {
                Decision::RequestVote { term } => {
                    info!(term, "requesting votes");
                    Command::RequestVote
                }
                Decision::KeepAlive { after } => {
                    if !after.is_zero() {
                        tokio::time::sleep(after).await;
                    }
                    Command::KeepAlive
                }
            };

            match self.transact(command).await {
                Ok(response) if response.command == Command::Nack => warn!(
                    sequence = response.sequence,
                    reason = ?response.argument(0),
                    "overseer rejected {:?}",
                    command
                ),
                Ok(_) => {}
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "discarding malformed response")
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`run`](Self::run), but logs out when `shutdown` resolves first.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let finished = select! {
            result = self.run() => Some(result),
            _ = shutdown => None,
        };

        match finished {
            Some(result) => result,
            None => self.logout().await,
        }
    }

    pub async fn logout(&mut self) -> Result<()> {
        let response = self.transact(Command::Logout).await?;
        match response.command {
            Command::Ack => info!("logged out of overseer"),
            other => warn!(response = ?other, "overseer did not acknowledge logout"),
        }
        Ok(())
    }

    /// One request/response exchange. An answer still owed to an abandoned
    /// exchange is read and dropped first so requests and responses stay paired.
    async fn transact(&mut self, command: Command) -> Result<Packet> {
        if self.awaiting_response {
            match self.read_response().await {
                Ok(stale) => debug!(response = %stale, "dropping response to abandoned request"),
                Err(err) if err.is_recoverable() => {
                    debug!(error = %err, "dropping malformed response to abandoned request")
                }
                Err(err) => return Err(err),
            }
        }

        let request = Packet::new(self.next_sequence, command);
        self.next_sequence = self.next_sequence.wrapping_add(1);

        info!(request = %request, "SEND");
        write_packet(&mut self.writer, &request).await?;
        self.awaiting_response = true;

        let response = self.read_response().await?;
        info!(response = %response, "RECV");
        self.timer.record_transaction(Instant::now());
        Ok(response)
    }

    async fn read_response(&mut self) -> Result<Packet> {
        let frame = self
            .reader
            .next_frame()
            .await?
            .ok_or(Error::PeerDisconnected)?;
        self.awaiting_response = false;
        Packet::decode(&frame)
    }
}
